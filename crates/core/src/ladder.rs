use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ordered list of approver roles. An actor's level is its 1-based position
/// on the ladder; the ladder is loaded from configuration, never hardcoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleLadder {
    roles: Vec<String>,
    levels: HashMap<String, u32>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LadderError {
    #[error("role ladder must contain at least one role")]
    Empty,
    #[error("role ladder contains an empty role name at position {position}")]
    EmptyRoleName { position: usize },
    #[error("role `{role}` appears more than once on the ladder")]
    DuplicateRole { role: String },
}

impl RoleLadder {
    pub fn new(roles: Vec<String>) -> Result<Self, LadderError> {
        if roles.is_empty() {
            return Err(LadderError::Empty);
        }

        let mut levels = HashMap::with_capacity(roles.len());
        for (index, role) in roles.iter().enumerate() {
            let key = normalize_key(role);
            if key.is_empty() {
                return Err(LadderError::EmptyRoleName { position: index + 1 });
            }
            if levels.insert(key, (index + 1) as u32).is_some() {
                return Err(LadderError::DuplicateRole { role: role.clone() });
            }
        }

        Ok(Self { roles, levels })
    }

    /// 1-based level of `role`, or `None` when the role is not on the ladder.
    pub fn level(&self, role: &str) -> Option<u32> {
        self.levels.get(&normalize_key(role)).copied()
    }

    pub fn contains(&self, role: &str) -> bool {
        self.level(role).is_some()
    }

    pub fn role_at(&self, level: u32) -> Option<&str> {
        if level == 0 {
            return None;
        }
        self.roles.get((level - 1) as usize).map(String::as_str)
    }

    pub fn height(&self) -> u32 {
        self.roles.len() as u32
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }
}

pub(crate) fn normalize_key(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}
