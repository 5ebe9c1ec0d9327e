//! Admin HTTP surface.
//!
//! # Data Flow
//! ```text
//! dispatch-cli / operator
//!     → GET /admin/status | /admin/snapshot | /admin/dead-letters
//!     → POST /admin/dead-letters/replay
//!     → auth.rs (bearer key) → handlers.rs → Dispatcher
//! ```

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::dispatch::Dispatcher;

/// Shared state of the admin router.
#[derive(Clone)]
pub struct AdminState {
    pub dispatcher: Arc<Dispatcher>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(dispatcher: Arc<Dispatcher>, api_key: &str) -> Self {
        Self {
            dispatcher,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/snapshot", get(get_snapshot))
        .route("/admin/dead-letters", get(get_dead_letters))
        .route("/admin/dead-letters/replay", post(replay_dead_letters))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}
