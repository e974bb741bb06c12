use overwatch_core::{OverwatchError, OverwatchResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Privilege levels, ordered from least to most powerful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privilege {
    Operator,
    Admin,
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    pub privilege: Privilege,
}

impl Principal {
    pub fn operator(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            privilege: Privilege::Operator,
        }
    }

    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            privilege: Privilege::Admin,
        }
    }

    /// Internal actor used by background jobs and automated escalation.
    pub fn system() -> Self {
        Self::admin("system")
    }

    /// Fails with `Unauthorized` unless this principal holds at least `needed`.
    pub fn require(&self, needed: Privilege) -> OverwatchResult<()> {
        if self.privilege >= needed {
            Ok(())
        } else {
            Err(OverwatchError::Unauthorized(format!(
                "'{}' holds {:?}, {:?} required",
                self.name, self.privilege, needed
            )))
        }
    }
}

/// Bearer-token lookup table.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    keys: HashMap<String, Principal>,
}

impl ApiKeys {
    pub fn new(operator_keys: &[String], admin_keys: &[String]) -> Self {
        let mut keys = HashMap::new();
        for (i, key) in operator_keys.iter().enumerate() {
            keys.insert(key.clone(), Principal::operator(format!("operator-{i}")));
        }
        for (i, key) in admin_keys.iter().enumerate() {
            keys.insert(key.clone(), Principal::admin(format!("admin-{i}")));
        }
        Self { keys }
    }

    /// With no keys configured authentication is disabled.
    pub fn is_open(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn authenticate(&self, token: &str) -> Option<Principal> {
        self.keys.get(token).cloned()
    }
}
