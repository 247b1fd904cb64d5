//! Core domain types used across all microservices

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Staff roles. A closed set; capability checks go through the predicates
/// below instead of string comparison at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Cobrador,
    Oficina,
    Gerencia,
}

impl Role {
    /// Office staff and admins may validate, reject, or annul payments.
    pub fn can_validate_payments(&self) -> bool {
        matches!(self, Role::Admin | Role::Oficina)
    }

    /// Only admins may read the audit trail.
    pub fn can_view_audit(&self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Fee generation is an administrative trigger.
    pub fn can_generate_fees(&self) -> bool {
        matches!(self, Role::Admin | Role::Oficina)
    }
}

impl std::str::FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "cobrador" => Ok(Role::Cobrador),
            "oficina" => Ok(Role::Oficina),
            "gerencia" => Ok(Role::Gerencia),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Admin => "admin",
            Role::Cobrador => "cobrador",
            Role::Oficina => "oficina",
            Role::Gerencia => "gerencia",
        };
        write!(f, "{}", s)
    }
}

/// An authenticated staff member acting on the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    /// Branch office the actor is scoped to; admins may act across branches.
    pub sede_id: Option<Uuid>,
}

impl Actor {
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            role,
            sede_id: None,
        }
    }

    pub fn with_sede(mut self, sede_id: Uuid) -> Self {
        self.sede_id = Some(sede_id);
        self
    }
}

/// Client billing code, assigned exactly once at creation from the registry's
/// creation sequence. Immutable after assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientCode(String);

impl ClientCode {
    pub fn from_sequence(seq: u64) -> Self {
        Self(format!("MIR-{:06}", seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Peruvian national identity number: exactly eight digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dni(String);

impl Dni {
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.len() == 8 && raw.chars().all(|c| c.is_ascii_digit()) {
            Some(Self(raw))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Dni {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
