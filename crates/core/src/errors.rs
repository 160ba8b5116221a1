use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::item::ItemStatus;

/// Domain-level failures raised by the rule resolver, the authorization
/// guard, and the state machine. The engine layer adds repository-facing
/// variants (not-found, version conflicts, batch eligibility) on top.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("no approval rule matches amount {amount}")]
    NoMatchingRule { amount: Decimal },
    #[error("role `{actor_role}` may not act on this item; level {required_level} approval is required")]
    Unauthorized { actor_role: String, required_level: u32 },
    #[error("action not allowed while item is {status:?}")]
    InvalidTransition { status: ItemStatus },
    #[error("role `{role}` is not on the role ladder")]
    UnknownRole { role: String },
    #[error("amount {amount} must not be negative")]
    NegativeAmount { amount: Decimal },
}
