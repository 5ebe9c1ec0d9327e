//! Work item definition.

use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::event::Event;

/// Queued unit of work wrapping one event plus scheduling metadata.
///
/// The event is shared read-only; submitting the same event twice yields two
/// items with distinct ids that never observe each other.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub id: Uuid,
    pub event: Arc<Event>,
    /// When the item was first accepted. Retries keep the original value.
    pub enqueue_time: Instant,
    /// Higher is dequeued first.
    pub priority: u8,
    pub retry_count: u32,
}

impl WorkItem {
    pub fn new(event: Arc<Event>, priority: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            event,
            enqueue_time: Instant::now(),
            priority,
            retry_count: 0,
        }
    }

    /// The same item, one retry further along.
    pub fn into_retry(mut self) -> Self {
        self.retry_count += 1;
        self
    }

    /// Time since the item was first accepted.
    pub fn age(&self) -> std::time::Duration {
        self.enqueue_time.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Chat, EventKind, Message, User};

    fn event() -> Arc<Event> {
        Arc::new(Event::new(
            1,
            EventKind::Message(Message::text(1, Chat::private(1), User::new(1, "a"), "hi")),
        ))
    }

    #[test]
    fn same_event_yields_independent_items() {
        let shared = event();
        let a = WorkItem::new(shared.clone(), 1);
        let b = WorkItem::new(shared.clone(), 1);
        assert_ne!(a.id, b.id);
        assert!(Arc::ptr_eq(&a.event, &b.event));
    }

    #[test]
    fn retry_keeps_identity() {
        let item = WorkItem::new(event(), 2);
        let id = item.id;
        let retried = item.into_retry().into_retry();
        assert_eq!(retried.id, id);
        assert_eq!(retried.retry_count, 2);
        assert_eq!(retried.priority, 2);
    }
}
