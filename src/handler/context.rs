//! Per-invocation context handed to handlers and middleware.

use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

use super::HandlerError;
use crate::event::Event;
use crate::routing::ParsedCommand;
use crate::storage::{KeyValueStore, Scope, STATE_KEY};
use crate::transport::{ApiClient, ApiResponse};

/// Everything a handler may touch while processing one WorkItem.
///
/// Cloning is cheap: the event, API client and store are shared.
#[derive(Clone)]
pub struct Context {
    event: Arc<Event>,
    command: Option<Arc<ParsedCommand>>,
    attempt: u32,
    api: Option<Arc<ApiClient>>,
    storage: Option<Arc<dyn KeyValueStore>>,
}

impl Context {
    pub fn new(event: Arc<Event>) -> Self {
        Self {
            event,
            command: None,
            attempt: 0,
            api: None,
            storage: None,
        }
    }

    pub fn with_command(mut self, command: Option<ParsedCommand>) -> Self {
        self.command = command.map(Arc::new);
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_api(mut self, api: Option<Arc<ApiClient>>) -> Self {
        self.api = api;
        self
    }

    pub fn with_storage(mut self, storage: Option<Arc<dyn KeyValueStore>>) -> Self {
        self.storage = storage;
        self
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn shared_event(&self) -> &Arc<Event> {
        &self.event
    }

    /// Parsed command, when the event text is a command.
    pub fn command(&self) -> Option<&ParsedCommand> {
        self.command.as_deref()
    }

    /// Whitespace-separated command arguments (empty for non-commands).
    pub fn args(&self) -> &[String] {
        self.command
            .as_deref()
            .map(|c| c.args.as_slice())
            .unwrap_or(&[])
    }

    /// Number of earlier failed attempts for this WorkItem.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn api(&self) -> Result<&ApiClient, HandlerError> {
        self.api
            .as_deref()
            .ok_or_else(|| HandlerError::permanent("no API client configured"))
    }

    pub fn storage(&self) -> Result<&dyn KeyValueStore, HandlerError> {
        self.storage
            .as_deref()
            .ok_or_else(|| HandlerError::permanent("no key-value store configured"))
    }

    /// Send `text` to the chat the event came from.
    pub async fn reply(&self, text: &str) -> Result<ApiResponse, HandlerError> {
        let chat_id = self
            .event
            .chat()
            .map(|c| c.id)
            .ok_or_else(|| HandlerError::permanent("event has no chat to reply to"))?;
        Ok(self.api()?.send_message(chat_id, text).await?)
    }

    /// Answer the callback query carried by the event.
    pub async fn answer_callback(&self, text: Option<&str>) -> Result<ApiResponse, HandlerError> {
        let id = match &self.event.kind {
            crate::event::EventKind::CallbackQuery(q) => q.id.as_str(),
            _ => return Err(HandlerError::permanent("event is not a callback query")),
        };
        Ok(self.api()?.answer_callback_query(id, text).await?)
    }

    fn user_scope(&self) -> Result<Scope, HandlerError> {
        self.event
            .user()
            .map(|u| Scope::User(u.id))
            .ok_or_else(|| HandlerError::permanent("event has no user for state scoping"))
    }

    /// Current conversation state of the event's user.
    pub async fn state(&self) -> Result<Option<String>, HandlerError> {
        let scope = self.user_scope()?;
        let value = self.storage()?.get(scope, STATE_KEY).await?;
        Ok(value.and_then(|v| v.as_str().map(str::to_owned)))
    }

    /// State parsed into an application-defined state enum.
    ///
    /// Unknown stored values read as `None` so a renamed state resets the
    /// conversation instead of failing every event.
    pub async fn state_as<S: FromStr>(&self) -> Result<Option<S>, HandlerError> {
        Ok(self.state().await?.and_then(|s| s.parse().ok()))
    }

    pub async fn set_state(&self, state: impl ToString) -> Result<(), HandlerError> {
        let scope = self.user_scope()?;
        self.storage()?
            .set(scope, STATE_KEY, Value::String(state.to_string()), None)
            .await?;
        Ok(())
    }

    pub async fn clear_state(&self) -> Result<(), HandlerError> {
        let scope = self.user_scope()?;
        self.storage()?.delete(scope, STATE_KEY).await?;
        Ok(())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("sequence_id", &self.event.sequence_id)
            .field("command", &self.command)
            .field("attempt", &self.attempt)
            .field("has_api", &self.api.is_some())
            .field("has_storage", &self.storage.is_some())
            .finish()
    }
}
