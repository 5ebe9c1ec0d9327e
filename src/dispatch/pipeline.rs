//! Per-item processing: context construction, middleware, routing.

use async_trait::async_trait;
use std::sync::Arc;

use crate::handler::{Context, HandlerError, Outcome};
use crate::middleware::{Middleware, Next};
use crate::routing::Router;
use crate::storage::KeyValueStore;
use crate::transport::ApiClient;
use crate::worker::{Process, WorkItem};

pub struct Pipeline {
    router: Arc<Router>,
    middleware: Vec<Arc<dyn Middleware>>,
    api: Option<Arc<ApiClient>>,
    storage: Option<Arc<dyn KeyValueStore>>,
}

impl Pipeline {
    pub fn new(
        router: Arc<Router>,
        middleware: Vec<Arc<dyn Middleware>>,
        api: Option<Arc<ApiClient>>,
        storage: Option<Arc<dyn KeyValueStore>>,
    ) -> Self {
        Self {
            router,
            middleware,
            api,
            storage,
        }
    }

    /// Context for one attempt at `item`.
    pub fn context(&self, item: &WorkItem) -> Context {
        Context::new(item.event.clone())
            .with_command(self.router.parse_command(&item.event))
            .with_attempt(item.retry_count)
            .with_api(self.api.clone())
            .with_storage(self.storage.clone())
    }

    pub fn middleware_names(&self) -> Vec<String> {
        self.middleware.iter().map(|m| m.name().to_string()).collect()
    }
}

#[async_trait]
impl Process for Pipeline {
    async fn process(&self, item: &WorkItem) -> Result<Outcome, HandlerError> {
        let ctx = self.context(item);
        Next::new(&self.middleware, &self.router).run(&ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Chat, Event, EventKind, Message, User};

    #[test]
    fn context_carries_command_and_attempt() {
        let pipeline = Pipeline::new(Arc::new(Router::default()), Vec::new(), None, None);
        let event = Event::new(
            5,
            EventKind::Message(Message::text(
                1,
                Chat::private(1),
                User::new(1, "u"),
                "/echo hello world",
            )),
        );
        let item = WorkItem::new(Arc::new(event), 2).into_retry();

        let ctx = pipeline.context(&item);
        assert_eq!(ctx.attempt(), 1);
        assert_eq!(ctx.command().map(|c| c.name.as_str()), Some("echo"));
        assert_eq!(ctx.args(), ["hello", "world"]);
        assert!(ctx.api().is_err());
        assert!(Arc::ptr_eq(ctx.shared_event(), &item.event));
    }
}
