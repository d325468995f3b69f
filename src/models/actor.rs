use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Customer,
    Admin,
    Courier,
    /// Internal triggers; never accepted from the outside.
    System,
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActorRole::Customer => "customer",
            ActorRole::Admin => "admin",
            ActorRole::Courier => "courier",
            ActorRole::System => "system",
        };
        f.write_str(name)
    }
}

/// Caller identity as supplied by the auth provider. Trusted, not verified here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub role: ActorRole,
    pub id: Option<Uuid>,
}

impl Actor {
    pub fn admin(id: Uuid) -> Self {
        Self {
            role: ActorRole::Admin,
            id: Some(id),
        }
    }

    pub fn courier(id: Uuid) -> Self {
        Self {
            role: ActorRole::Courier,
            id: Some(id),
        }
    }

    pub fn customer(id: Uuid) -> Self {
        Self {
            role: ActorRole::Customer,
            id: Some(id),
        }
    }

    pub fn system() -> Self {
        Self {
            role: ActorRole::System,
            id: None,
        }
    }
}
