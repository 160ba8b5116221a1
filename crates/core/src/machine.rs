use chrono::{DateTime, Duration, Utc};

use crate::domain::actor::{Actor, ActorKind};
use crate::domain::item::{ActionKind, ApprovalItem, HistoryEntry, ItemStatus};
use crate::errors::WorkflowError;
use crate::guard::can_act;
use crate::ladder::RoleLadder;
use crate::rules::RuleSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkflowAction {
    Approve,
    Reject,
    Escalate,
    Comment,
    /// Scheduler-only terminal transition taken once the automatic
    /// escalation budget for an item is exhausted.
    Expire,
}

impl WorkflowAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Escalate => "escalate",
            Self::Comment => "comment",
            Self::Expire => "expire",
        }
    }
}

impl std::str::FromStr for WorkflowAction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(Self::Approve),
            "reject" => Ok(Self::Reject),
            "escalate" => Ok(Self::Escalate),
            "comment" => Ok(Self::Comment),
            "expire" => Ok(Self::Expire),
            other => Err(format!(
                "unknown action `{other}` (expected approve|reject|escalate|comment)"
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionRequest {
    pub action: WorkflowAction,
    pub comment: Option<String>,
    pub signature: Option<String>,
}

impl ActionRequest {
    pub fn new(action: WorkflowAction) -> Self {
        Self { action, comment: None, signature: None }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub item: ApprovalItem,
    pub from: ItemStatus,
    pub to: ItemStatus,
}

/// Apply one action to a snapshot of an item, producing the next state.
///
/// Pure over its inputs: the caller owns loading the snapshot and committing
/// the result under the item's version token. Exactly one history entry is
/// appended and the version bumps by one per successful application.
pub fn apply(
    ladder: &RoleLadder,
    rules: &RuleSet,
    item: &ApprovalItem,
    request: &ActionRequest,
    actor: &Actor,
    kind: ActorKind,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, WorkflowError> {
    if item.status.is_terminal() {
        return Err(WorkflowError::InvalidTransition { status: item.status });
    }

    authorize(ladder, item, request.action, actor, kind)?;

    let from = item.status;
    let mut next = item.clone();
    let time_spent = (now - item.last_action_at()).max(Duration::zero());
    let escalation_window = rules
        .get(&item.rule_name)
        .map(|rule| rule.auto_escalation)
        .unwrap_or_else(|| item.due_date - item.submitted_at);

    let action_kind = match request.action {
        WorkflowAction::Approve => {
            if next.current_level < next.max_level {
                next.current_level += 1;
                next.due_date = now + escalation_window;
                next.status = ItemStatus::Pending;
            } else {
                next.status = ItemStatus::Approved;
                next.decided_at = Some(now);
            }
            ActionKind::Approved
        }
        WorkflowAction::Reject => {
            next.status = ItemStatus::Rejected;
            next.decided_at = Some(now);
            ActionKind::Rejected
        }
        WorkflowAction::Escalate => {
            // Level is capped at max_level; a capped escalation still counts
            // and still opens a fresh due-date window, so the scheduler
            // escalates at most once per window.
            if next.current_level < next.max_level {
                next.current_level += 1;
            }
            next.due_date = now + escalation_window;
            next.status = ItemStatus::Escalated;
            next.escalation_count += 1;
            ActionKind::Escalated
        }
        WorkflowAction::Comment => ActionKind::Commented,
        WorkflowAction::Expire => {
            next.status = ItemStatus::Expired;
            next.decided_at = Some(now);
            ActionKind::Expired
        }
    };

    next.history.push(HistoryEntry {
        level: item.current_level,
        actor_name: actor.name.clone(),
        actor_role: actor.role.clone(),
        action: action_kind,
        timestamp: now,
        comments: request.comment.clone(),
        signature: request.signature.clone(),
        time_spent_secs: time_spent.num_seconds(),
    });
    next.version += 1;

    Ok(TransitionOutcome { to: next.status, item: next, from })
}

fn authorize(
    ladder: &RoleLadder,
    item: &ApprovalItem,
    action: WorkflowAction,
    actor: &Actor,
    kind: ActorKind,
) -> Result<(), WorkflowError> {
    match kind {
        ActorKind::System => Ok(()),
        ActorKind::Human => match action {
            WorkflowAction::Expire => Err(WorkflowError::Unauthorized {
                actor_role: actor.role.clone(),
                required_level: item.current_level,
            }),
            // Commenting only needs a ladder-known role, not level equality.
            WorkflowAction::Comment => {
                if ladder.contains(&actor.role) {
                    Ok(())
                } else {
                    Err(WorkflowError::UnknownRole { role: actor.role.clone() })
                }
            }
            WorkflowAction::Approve | WorkflowAction::Reject | WorkflowAction::Escalate => {
                if can_act(ladder, item, actor) {
                    Ok(())
                } else {
                    Err(WorkflowError::Unauthorized {
                        actor_role: actor.role.clone(),
                        required_level: item.current_level,
                    })
                }
            }
        },
    }
}
