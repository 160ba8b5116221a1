use serde::{Deserialize, Serialize};

/// Identity acting on an approval item. Supplied explicitly per request by
/// the caller; the engine authorizes by role only and never authenticates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub name: String,
    pub role: String,
}

impl Actor {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self { name: name.into(), role: role.into() }
    }

    /// Synthetic actor used by the escalation scheduler.
    pub fn system() -> Self {
        Self { name: "system".to_string(), role: "automation".to_string() }
    }
}

/// Human actions pass through the authorization guard; system actions
/// (scheduler-driven escalation and expiry) bypass it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActorKind {
    Human,
    System,
}
