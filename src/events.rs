use serde_json::json;
use tokio::sync::broadcast;
use tracing::trace;

use crate::models::DomainEvent;

/// A single `tokio::sync::broadcast` channel carrying typed domain
/// events, shared by the task engine, terminal broker, inventory
/// collector, and webhook dispatcher.
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        EventBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    /// Publish is fire-and-forget: a lagging/absent receiver never blocks
    /// or fails the caller.
    pub fn publish(&self, event: DomainEvent) {
        trace!(event_type = %event.event_type, target = %event.target_id, "publishing domain event");
        let _ = self.sender.send(event);
    }

    pub fn emit(
        &self,
        event_type: &str,
        user_ref: Option<i64>,
        target_type: &str,
        target_id: &str,
        meta: serde_json::Value,
        severity: &str,
    ) {
        self.publish(DomainEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            user_ref,
            target_type: target_type.to_string(),
            target_id: target_id.to_string(),
            meta,
            ip: None,
            user_agent: None,
            severity: severity.to_string(),
            timestamp: crate::db::now_iso(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn task_event(event_type: &str, task_id: &str, host_ref: i64, extra: serde_json::Value) -> serde_json::Value {
    json!({ "task_id": task_id, "host_ref": host_ref, "detail": extra, "kind": event_type })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscriber_does_not_panic() {
        let bus = EventBus::new();
        bus.emit("task.completed", None, "task", "t1", json!({}), "info");
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit("task.completed", Some(1), "task", "t1", json!({"ok": true}), "info");
        let evt = rx.recv().await.unwrap();
        assert_eq!(evt.event_type, "task.completed");
        assert_eq!(evt.target_id, "t1");
    }
}
