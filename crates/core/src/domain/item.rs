use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::WorkflowError;
use crate::rules::ApprovalRule;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Approved,
    Rejected,
    Escalated,
    Expired,
}

impl ItemStatus {
    /// Open items accept further actions. `Escalated` is a sub-state of open
    /// that only differs from `Pending` by carrying an escalation count for
    /// reporting; the next action treats it exactly as pending.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::Escalated)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_open()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Escalated => "escalated",
            Self::Expired => "expired",
        }
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "escalated" => Ok(Self::Escalated),
            "expired" => Ok(Self::Expired),
            other => Err(format!(
                "unknown item status `{other}` (expected pending|approved|rejected|escalated|expired)"
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!(
                "unknown priority `{other}` (expected low|medium|high|critical)"
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Approved,
    Rejected,
    Escalated,
    Commented,
    Expired,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Escalated => "escalated",
            Self::Commented => "commented",
            Self::Expired => "expired",
        }
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "escalated" => Ok(Self::Escalated),
            "commented" => Ok(Self::Commented),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown history action `{other}`")),
        }
    }
}

/// One entry of the append-only audit trail. Entries are only ever appended,
/// never mutated or reordered. `time_spent_secs` is the gap since the
/// previous entry (or submission) and feeds mean-time-to-decision reporting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub level: u32,
    pub actor_name: String,
    pub actor_role: String,
    pub action: ActionKind,
    pub timestamp: DateTime<Utc>,
    pub comments: Option<String>,
    pub signature: Option<String>,
    pub time_spent_secs: i64,
}

/// A financial ticket moving through the tiered approval workflow.
///
/// `max_level`, the signature requirement, and batch eligibility are
/// snapshots of the matched rule at creation time; later rule changes never
/// retroactively alter an in-flight item. `version` is the optimistic
/// concurrency token and increases by exactly one per committed mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalItem {
    pub id: ItemId,
    pub title: String,
    pub category: String,
    pub priority: Priority,
    pub amount: Decimal,
    pub requested_by: String,
    pub rule_name: String,
    pub requires_signature: bool,
    pub allow_batch: bool,
    pub current_level: u32,
    pub max_level: u32,
    pub status: ItemStatus,
    pub submitted_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub escalation_count: u32,
    pub version: i64,
    pub history: Vec<HistoryEntry>,
}

impl ApprovalItem {
    /// Create a new item at level 1, pending, with the rule snapshot applied.
    pub fn submit(
        title: impl Into<String>,
        category: impl Into<String>,
        priority: Priority,
        amount: Decimal,
        requested_by: impl Into<String>,
        rule: &ApprovalRule,
        now: DateTime<Utc>,
    ) -> Result<Self, WorkflowError> {
        if amount.is_sign_negative() {
            return Err(WorkflowError::NegativeAmount { amount });
        }

        Ok(Self {
            id: ItemId::generate(),
            title: title.into(),
            category: category.into(),
            priority,
            amount,
            requested_by: requested_by.into(),
            rule_name: rule.name.clone(),
            requires_signature: rule.requires_signature,
            allow_batch: rule.allow_batch,
            current_level: 1,
            max_level: rule.max_level(),
            status: ItemStatus::Pending,
            submitted_at: now,
            due_date: now + rule.auto_escalation,
            decided_at: None,
            escalation_count: 0,
            version: 1,
            history: Vec::new(),
        })
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_open() && now > self.due_date
    }

    /// Timestamp of the most recent action, falling back to submission.
    pub fn last_action_at(&self) -> DateTime<Utc> {
        self.history.last().map(|entry| entry.timestamp).unwrap_or(self.submitted_at)
    }
}
