//! Audit Recorder
//!
//! Append-only trail of state-changing actions. Injected as a handle into
//! the components that write to it; never a process-wide global.

use chrono::Utc;
use miramax_core::{Actor, MiramaxError, Result};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::types::{AuditAction, AuditEntry};

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub table: Option<String>,
    pub action: Option<AuditAction>,
    pub actor_id: Option<Uuid>,
}

#[derive(Clone, Default)]
pub struct AuditTrail {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry. Callers treat a failed append as fatal: the
    /// operation that triggered it must not commit.
    pub fn record(
        &self,
        table: &str,
        record_id: Uuid,
        actor: Option<&Actor>,
        action: AuditAction,
        detail: serde_json::Value,
    ) -> Result<AuditEntry> {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            table: table.to_string(),
            record_id,
            actor_id: actor.map(|a| a.id),
            actor_username: actor.map(|a| a.username.clone()),
            action,
            detail,
            at: Utc::now(),
        };

        let mut entries = self
            .entries
            .write()
            .map_err(|_| MiramaxError::Internal("Audit trail lock poisoned".into()))?;
        entries.push(entry.clone());
        Ok(entry)
    }

    /// Query the trail, newest first. Only admins see entries; everyone else
    /// receives an empty result, deliberately not an authorization error.
    pub fn query(&self, actor: &Actor, filter: &AuditFilter) -> Vec<AuditEntry> {
        if !actor.role.can_view_audit() {
            return Vec::new();
        }

        let entries = match self.entries.read() {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        entries
            .iter()
            .rev()
            .filter(|e| {
                filter.table.as_deref().map_or(true, |t| e.table == t)
                    && filter.action.map_or(true, |a| e.action == a)
                    && filter.actor_id.map_or(true, |u| e.actor_id == Some(u))
            })
            .cloned()
            .collect()
    }

    /// Entries recorded against one record, newest first. Internal read used
    /// by tests and reporting; goes through the same admin gate.
    pub fn for_record(&self, actor: &Actor, table: &str, record_id: Uuid) -> Vec<AuditEntry> {
        self.query(
            actor,
            &AuditFilter {
                table: Some(table.to_string()),
                ..Default::default()
            },
        )
        .into_iter()
        .filter(|e| e.record_id == record_id)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use miramax_core::Role;
    use serde_json::json;

    #[test]
    fn query_is_newest_first_and_filterable() {
        let trail = AuditTrail::new();
        let admin = Actor::new("root", Role::Admin);
        let id_a = Uuid::new_v4();
        let id_b = Uuid::new_v4();

        trail
            .record("Payment", id_a, Some(&admin), AuditAction::Validate, json!({}))
            .unwrap();
        trail
            .record("Payment", id_b, Some(&admin), AuditAction::Cancel, json!({}))
            .unwrap();

        let all = trail.query(&admin, &AuditFilter::default());
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].record_id, id_b);

        let cancels = trail.query(
            &admin,
            &AuditFilter {
                action: Some(AuditAction::Cancel),
                ..Default::default()
            },
        );
        assert_eq!(cancels.len(), 1);
        assert_eq!(cancels[0].record_id, id_b);
    }

    #[test]
    fn non_admins_get_an_empty_result_not_an_error() {
        let trail = AuditTrail::new();
        let admin = Actor::new("root", Role::Admin);
        trail
            .record("Payment", Uuid::new_v4(), Some(&admin), AuditAction::Create, json!({}))
            .unwrap();

        let oficina = Actor::new("ana", Role::Oficina);
        assert!(trail.query(&oficina, &AuditFilter::default()).is_empty());

        let cobrador = Actor::new("luis", Role::Cobrador);
        assert!(trail.query(&cobrador, &AuditFilter::default()).is_empty());
    }

    #[test]
    fn actor_may_be_absent() {
        let trail = AuditTrail::new();
        let entry = trail
            .record("Payment", Uuid::new_v4(), None, AuditAction::Delete, json!({}))
            .unwrap();
        assert!(entry.actor_id.is_none());
        assert!(entry.actor_username.is_none());
    }
}
