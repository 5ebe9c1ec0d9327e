//! Update dispatch runtime for messaging bots.

pub mod admin;
pub mod config;
pub mod dispatch;
pub mod event;
pub mod handler;
pub mod lifecycle;
pub mod middleware;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod storage;
pub mod transport;
pub mod worker;

pub use config::schema::RuntimeConfig;
pub use dispatch::Dispatcher;
pub use event::Event;
pub use handler::{handler_fn, Context, Flow, Handler, HandlerError, Outcome};
pub use lifecycle::Shutdown;
pub use routing::{Filter, Router};
