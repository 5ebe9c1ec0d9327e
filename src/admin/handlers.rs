use axum::{extract::State, Json};
use serde::Serialize;

use super::AdminState;
use crate::dispatch::{ReplayReport, RuntimeSnapshot};
use crate::worker::DeadLetterEntry;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub workers: usize,
    pub queue_depth: usize,
    pub dead_letters: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let snapshot = state.dispatcher.snapshot();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if snapshot.accepting {
            "operational"
        } else {
            "shutting_down"
        },
        workers: snapshot.workers,
        queue_depth: snapshot.queue_depth,
        dead_letters: snapshot.dead_letters,
    })
}

pub async fn get_snapshot(State(state): State<AdminState>) -> Json<RuntimeSnapshot> {
    Json(state.dispatcher.snapshot())
}

pub async fn get_dead_letters(State(state): State<AdminState>) -> Json<Vec<DeadLetterEntry>> {
    Json(state.dispatcher.dead_letters().entries())
}

pub async fn replay_dead_letters(State(state): State<AdminState>) -> Json<ReplayReport> {
    Json(state.dispatcher.replay_dead_letters().await)
}
