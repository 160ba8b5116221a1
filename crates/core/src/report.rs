use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::actor::Actor;
use crate::domain::item::{ApprovalItem, ItemStatus, Priority};
use crate::guard::can_act;
use crate::ladder::{normalize_key, RoleLadder};

/// Read-side filter over the item set. All predicates are conjunctive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemFilter {
    pub status: Option<ItemStatus>,
    pub category: Option<String>,
    pub priority: Option<Priority>,
    pub overdue_only: bool,
    /// Items the given actor can currently act on.
    pub assigned_to: Option<Actor>,
}

impl ItemFilter {
    pub fn matches(&self, ladder: &RoleLadder, item: &ApprovalItem, now: DateTime<Utc>) -> bool {
        if let Some(status) = self.status {
            if item.status != status {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if normalize_key(&item.category) != normalize_key(category) {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if item.priority != priority {
                return false;
            }
        }
        if self.overdue_only && !item.is_overdue(now) {
            return false;
        }
        if let Some(actor) = &self.assigned_to {
            if !can_act(ladder, item, actor) {
                return false;
            }
        }
        true
    }
}

/// Aggregates derived from items and their audit trails. Pure read-side
/// computation; never mutates workflow state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStats {
    pub total_items: u64,
    pub count_by_status: BTreeMap<ItemStatus, u64>,
    pub open_item_count: u64,
    pub total_open_value: Decimal,
    pub overdue_count: u64,
    pub total_escalations: u64,
    /// Mean `time_spent` across every history entry system-wide, in seconds.
    pub mean_time_to_decision_secs: Option<f64>,
}

impl WorkflowStats {
    pub fn compute(items: &[ApprovalItem], now: DateTime<Utc>) -> Self {
        let mut count_by_status: BTreeMap<ItemStatus, u64> = BTreeMap::new();
        let mut open_item_count = 0u64;
        let mut total_open_value = Decimal::ZERO;
        let mut overdue_count = 0u64;
        let mut total_escalations = 0u64;
        let mut decision_secs = 0i64;
        let mut decision_entries = 0u64;

        for item in items {
            *count_by_status.entry(item.status).or_insert(0) += 1;
            if item.status.is_open() {
                open_item_count += 1;
                total_open_value += item.amount;
            }
            if item.is_overdue(now) {
                overdue_count += 1;
            }
            total_escalations += u64::from(item.escalation_count);
            for entry in &item.history {
                decision_secs += entry.time_spent_secs;
                decision_entries += 1;
            }
        }

        let mean_time_to_decision_secs = (decision_entries > 0)
            .then(|| decision_secs as f64 / decision_entries as f64);

        Self {
            total_items: items.len() as u64,
            count_by_status,
            open_item_count,
            total_open_value,
            overdue_count,
            total_escalations,
            mean_time_to_decision_secs,
        }
    }
}
