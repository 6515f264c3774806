pub mod handover;
pub mod ledger;
pub mod manifest;
pub mod order;
pub mod settlement;
pub mod sync;
pub mod variant;

use serde::{Deserialize, Serialize};

/// Caller role as supplied by the upstream auth service in the JWT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Operator,
    Rider,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Operator => "operator",
            Role::Rider => "rider",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "manager" => Some(Role::Manager),
            "operator" => Some(Role::Operator),
            "rider" => Some(Role::Rider),
            _ => None,
        }
    }

    /// Hub staff: everyone except riders.
    pub fn is_staff(&self) -> bool {
        !matches!(self, Role::Rider)
    }
}

/// Identity attached to every mutation for the activity trail.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub id: i64,
    pub role: Role,
}

/// A custody holder on the delivery side: our own rider or an external
/// courier identified by its provider code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Party {
    Rider { rider_id: i64 },
    Courier { provider: String },
}

impl Party {
    pub fn rider(rider_id: i64) -> Self {
        Party::Rider { rider_id }
    }

    pub fn courier(provider: impl Into<String>) -> Self {
        Party::Courier { provider: provider.into() }
    }

    pub fn rider_id(&self) -> Option<i64> {
        match self {
            Party::Rider { rider_id } => Some(*rider_id),
            Party::Courier { .. } => None,
        }
    }
}
