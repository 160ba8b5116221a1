use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use tierflow_core::{ActionKind, ItemId, ItemStatus};

/// Event emitted after a state transition commits. Delivery is fire and
/// forget: the transition is already durable when a notifier runs, and a
/// failing notifier never rolls it back or surfaces as an engine error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub item_id: ItemId,
    pub action: ActionKind,
    pub actor_name: String,
    pub actor_role: String,
    pub status: ItemStatus,
    pub level: u32,
    pub occurred_at: DateTime<Utc>,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notification: Notification) {}
}

/// Collects notifications for assertions in tests.
#[derive(Clone, Default)]
pub struct InMemoryNotifier {
    notifications: Arc<Mutex<Vec<Notification>>>,
}

impl InMemoryNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        match self.notifications.lock() {
            Ok(notifications) => notifications.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Notifier for InMemoryNotifier {
    fn notify(&self, notification: Notification) {
        match self.notifications.lock() {
            Ok(mut notifications) => notifications.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
    }
}
