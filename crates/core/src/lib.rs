pub mod config;
pub mod domain;
pub mod errors;
pub mod guard;
pub mod ladder;
pub mod machine;
pub mod report;
pub mod rules;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::actor::{Actor, ActorKind};
pub use domain::item::{ActionKind, ApprovalItem, HistoryEntry, ItemId, ItemStatus, Priority};
pub use errors::WorkflowError;
pub use guard::can_act;
pub use ladder::{LadderError, RoleLadder};
pub use machine::{ActionRequest, TransitionOutcome, WorkflowAction};
pub use report::{ItemFilter, WorkflowStats};
pub use rules::{ApprovalRule, RuleSet, RuleSetError};
