use chrono::Duration;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::errors::WorkflowError;
use crate::ladder::RoleLadder;

/// One amount tier of the approval matrix. `required_roles` is ordered by
/// level; its length is the `max_level` snapshotted onto matched items.
/// `max_amount` is inclusive; `None` marks the unbounded top tier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalRule {
    pub name: String,
    pub min_amount: Decimal,
    pub max_amount: Option<Decimal>,
    pub required_roles: Vec<String>,
    pub auto_escalation: Duration,
    pub requires_signature: bool,
    pub allow_batch: bool,
}

impl ApprovalRule {
    pub fn max_level(&self) -> u32 {
        self.required_roles.len() as u32
    }

    fn covers(&self, amount: Decimal) -> bool {
        amount >= self.min_amount && self.max_amount.map_or(true, |max| amount <= max)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RuleSetError {
    #[error("rule set must contain at least one rule")]
    Empty,
    #[error("rule `{rule}` has no required roles")]
    NoRequiredRoles { rule: String },
    #[error("rule `{rule}` requires role `{role}` which is not on the role ladder")]
    UnknownRole { rule: String, role: String },
    #[error("rule `{rule}` has negative min_amount {min_amount}")]
    NegativeMinAmount { rule: String, min_amount: Decimal },
    #[error("rule `{rule}` has max_amount {max_amount} below its min_amount {min_amount}")]
    InvertedRange { rule: String, min_amount: Decimal, max_amount: Decimal },
    #[error("lowest rule `{rule}` starts at {min_amount}; coverage must start at 0")]
    FirstMinNotZero { rule: String, min_amount: Decimal },
    #[error("coverage gap between rule `{lower}` (up to {upper_bound}) and rule `{upper}` (from {next_min})")]
    Gap { lower: String, upper: String, upper_bound: Decimal, next_min: Decimal },
    #[error("rules `{lower}` and `{upper}` overlap beyond their shared boundary")]
    Overlap { lower: String, upper: String },
    #[error("rule `{rule}` is unbounded but is not the final tier")]
    UnboundedNotLast { rule: String },
    #[error("final rule `{rule}` must be unbounded so coverage reaches infinity")]
    BoundedTop { rule: String },
    #[error("rule `{rule}` has non-positive auto-escalation duration")]
    NonPositiveEscalation { rule: String },
    #[error("rule names must be unique; `{rule}` appears more than once")]
    DuplicateName { rule: String },
}

/// Validated, non-overlapping amount tiers covering `[0, ∞)`.
///
/// Malformed coverage is a configuration defect surfaced at startup through
/// `RuleSet::new`; once constructed, `resolve` is pure and total for any
/// non-negative amount. An amount equal to a shared tier boundary resolves
/// deterministically to the lower tier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<ApprovalRule>,
}

impl RuleSet {
    pub fn new(mut rules: Vec<ApprovalRule>, ladder: &RoleLadder) -> Result<Self, RuleSetError> {
        if rules.is_empty() {
            return Err(RuleSetError::Empty);
        }

        rules.sort_by(|left, right| {
            left.min_amount.cmp(&right.min_amount).then_with(|| left.name.cmp(&right.name))
        });

        for (index, rule) in rules.iter().enumerate() {
            if rules[..index].iter().any(|other| other.name == rule.name) {
                return Err(RuleSetError::DuplicateName { rule: rule.name.clone() });
            }
            if rule.required_roles.is_empty() {
                return Err(RuleSetError::NoRequiredRoles { rule: rule.name.clone() });
            }
            for role in &rule.required_roles {
                if !ladder.contains(role) {
                    return Err(RuleSetError::UnknownRole {
                        rule: rule.name.clone(),
                        role: role.clone(),
                    });
                }
            }
            if rule.min_amount.is_sign_negative() {
                return Err(RuleSetError::NegativeMinAmount {
                    rule: rule.name.clone(),
                    min_amount: rule.min_amount,
                });
            }
            if let Some(max) = rule.max_amount {
                if max < rule.min_amount {
                    return Err(RuleSetError::InvertedRange {
                        rule: rule.name.clone(),
                        min_amount: rule.min_amount,
                        max_amount: max,
                    });
                }
            }
            if rule.auto_escalation <= Duration::zero() {
                return Err(RuleSetError::NonPositiveEscalation { rule: rule.name.clone() });
            }
        }

        let first = &rules[0];
        if first.min_amount != Decimal::ZERO {
            return Err(RuleSetError::FirstMinNotZero {
                rule: first.name.clone(),
                min_amount: first.min_amount,
            });
        }

        for pair in rules.windows(2) {
            let (lower, upper) = (&pair[0], &pair[1]);
            let Some(bound) = lower.max_amount else {
                return Err(RuleSetError::UnboundedNotLast { rule: lower.name.clone() });
            };
            if upper.min_amount > bound {
                return Err(RuleSetError::Gap {
                    lower: lower.name.clone(),
                    upper: upper.name.clone(),
                    upper_bound: bound,
                    next_min: upper.min_amount,
                });
            }
            if upper.min_amount < bound {
                return Err(RuleSetError::Overlap {
                    lower: lower.name.clone(),
                    upper: upper.name.clone(),
                });
            }
        }

        let last = rules.last().expect("non-empty rule set");
        if last.max_amount.is_some() {
            return Err(RuleSetError::BoundedTop { rule: last.name.clone() });
        }

        Ok(Self { rules })
    }

    /// Map an amount to its single matching tier. Rules are kept sorted, so
    /// the first covering rule wins and a boundary amount lands in the lower
    /// tier.
    pub fn resolve(&self, amount: Decimal) -> Result<&ApprovalRule, WorkflowError> {
        self.rules
            .iter()
            .find(|rule| rule.covers(amount))
            .ok_or(WorkflowError::NoMatchingRule { amount })
    }

    pub fn get(&self, name: &str) -> Option<&ApprovalRule> {
        self.rules.iter().find(|rule| rule.name == name)
    }

    pub fn rules(&self) -> &[ApprovalRule] {
        &self.rules
    }
}
