pub mod errors;
pub mod notify;
pub mod scheduler;
pub mod service;

pub use errors::EngineError;
pub use notify::{InMemoryNotifier, NoopNotifier, Notification, Notifier};
pub use scheduler::{EscalationScheduler, SweepOutcome};
pub use service::{ApprovalService, BatchFailure, BatchResult, NewItem};
