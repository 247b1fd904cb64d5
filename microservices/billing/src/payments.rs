//! Payment capture, validation state machine, and annulment workflow
//!
//! A payment moves `pending -> validated` or `pending -> rejected`; both end
//! states are terminal. Annulment re-enters from any non-cash, not-yet-annulled
//! payment and forces `rejected`. Every successful transition appends exactly
//! one audit entry, and the append happens before the mutation commits.

use chrono::Utc;
use dashmap::DashMap;
use miramax_core::{Actor, MiramaxError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::AuditTrail;
use crate::clients::ClientRegistry;
use crate::fees::FeeLedger;
use crate::types::{AuditAction, Payment, PaymentMethod, ValidationStatus};

/// The only two admissible outcomes of a validation decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Validated,
    Rejected,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPayment {
    pub client_id: Uuid,
    pub service_id: Option<Uuid>,
    pub monthly_fee_id: Option<Uuid>,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference_number: Option<String>,
    pub proof_image_url: Option<String>,
}

#[derive(Clone)]
pub struct PaymentDesk {
    payments: Arc<DashMap<Uuid, Payment>>,
    clients: ClientRegistry,
    fees: FeeLedger,
    trail: AuditTrail,
}

impl PaymentDesk {
    pub fn new(clients: ClientRegistry, fees: FeeLedger, trail: AuditTrail) -> Self {
        Self {
            payments: Arc::new(DashMap::new()),
            clients,
            fees,
            trail,
        }
    }

    /// Capture a money-received event in pending validation status
    pub async fn register(&self, actor: &Actor, new: NewPayment) -> Result<Payment> {
        let client = self
            .clients
            .get_client(new.client_id)
            .await
            .ok_or_else(|| MiramaxError::NotFound(format!("Client {} not found", new.client_id)))?;

        if new.amount <= Decimal::ZERO {
            return Err(MiramaxError::Validation("Payment amount must be positive".into()));
        }

        if let Some(fee_id) = new.monthly_fee_id {
            let fee = self
                .fees
                .get(fee_id)
                .ok_or_else(|| MiramaxError::NotFound(format!("Fee {} not found", fee_id)))?;
            if fee.client_id != new.client_id {
                return Err(MiramaxError::Validation(
                    "Target fee belongs to a different client".into(),
                ));
            }
        }

        let payment = Payment {
            id: Uuid::new_v4(),
            client_id: new.client_id,
            service_id: new.service_id,
            monthly_fee_id: new.monthly_fee_id,
            amount: new.amount,
            date: Utc::now(),
            method: new.method,
            reference_number: new.reference_number,
            proof_image_url: new.proof_image_url,
            registered_by: actor.id,
            validated_by: None,
            validation_status: ValidationStatus::Pending,
            rejection_reason: None,
            annulment_reason: None,
            annulled_by: None,
            annulled_at: None,
        };

        // Audit first; the payment only exists if the trail accepted it
        self.trail.record(
            "Payment",
            payment.id,
            Some(actor),
            AuditAction::Create,
            json!({
                "payment_id": payment.id,
                "client": client.name,
                "amount": payment.amount.to_string(),
                "method": payment.method,
            }),
        )?;

        tracing::info!(
            payment_id = %payment.id,
            client_id = %payment.client_id,
            amount = %payment.amount,
            method = ?payment.method,
            "Payment registered"
        );
        self.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    /// Validate or reject a pending payment.
    ///
    /// The single write path that may mark a payment validated. On
    /// validation the targeted fee absorbs the amount.
    pub async fn decide(
        &self,
        payment_id: Uuid,
        verdict: Verdict,
        actor: &Actor,
        reason: Option<&str>,
    ) -> Result<Payment> {
        if !actor.role.can_validate_payments() {
            return Err(MiramaxError::Forbidden(
                "Only office staff can validate payments".into(),
            ));
        }

        let snapshot = self
            .payments
            .get(&payment_id)
            .map(|p| p.clone())
            .ok_or_else(|| MiramaxError::NotFound(format!("Payment {} not found", payment_id)))?;

        if snapshot.validation_status != ValidationStatus::Pending {
            return Err(MiramaxError::Conflict("Payment has already been decided".into()));
        }

        let rejection_reason = match verdict {
            Verdict::Rejected => {
                let reason = reason.map(str::trim).unwrap_or_default();
                if reason.is_empty() {
                    return Err(MiramaxError::Validation("A rejection reason is required".into()));
                }
                Some(reason.to_string())
            }
            Verdict::Validated => None,
        };

        let client = self
            .clients
            .get_client(snapshot.client_id)
            .await
            .ok_or_else(|| MiramaxError::NotFound(format!("Client {} not found", snapshot.client_id)))?;

        let new_status = match verdict {
            Verdict::Validated => ValidationStatus::Validated,
            Verdict::Rejected => ValidationStatus::Rejected,
        };

        let updated = {
            let mut payment = self
                .payments
                .get_mut(&payment_id)
                .ok_or_else(|| MiramaxError::NotFound(format!("Payment {} not found", payment_id)))?;

            // Re-check under the entry lock: a concurrent decision loses here
            if payment.validation_status != ValidationStatus::Pending {
                return Err(MiramaxError::Conflict("Payment has already been decided".into()));
            }

            // Settle the targeted fee first: a failure here aborts the whole
            // decision with the payment still pending and nothing audited
            if verdict == Verdict::Validated {
                if let Some(fee_id) = payment.monthly_fee_id {
                    self.fees.apply_payment(fee_id, payment.id, payment.amount)?;
                }
            }

            self.trail.record(
                "Payment",
                payment.id,
                Some(actor),
                match verdict {
                    Verdict::Validated => AuditAction::Validate,
                    Verdict::Rejected => AuditAction::Reject,
                },
                json!({
                    "payment_id": payment.id,
                    "client": client.name,
                    "amount": payment.amount.to_string(),
                    "status": new_status,
                    "reason": rejection_reason.as_deref().unwrap_or(""),
                }),
            )?;

            payment.validation_status = new_status;
            payment.validated_by = Some(actor.id);
            payment.rejection_reason = rejection_reason;
            payment.clone()
        };

        tracing::info!(
            payment_id = %payment_id,
            status = ?updated.validation_status,
            validated_by = %actor.username,
            "Payment decision recorded"
        );
        Ok(updated)
    }

    /// Annul a previously recorded non-cash payment. One-way.
    pub async fn annul(&self, payment_id: Uuid, actor: &Actor, reason: &str) -> Result<Payment> {
        if !actor.role.can_validate_payments() {
            return Err(MiramaxError::Forbidden("Only office staff can annul payments".into()));
        }

        let snapshot = self
            .payments
            .get(&payment_id)
            .map(|p| p.clone())
            .ok_or_else(|| MiramaxError::NotFound(format!("Payment {} not found", payment_id)))?;

        if snapshot.method == PaymentMethod::Cash {
            return Err(MiramaxError::Policy(
                "Cash payments cannot be annulled through the system".into(),
            ));
        }
        if snapshot.annulled_at.is_some() {
            return Err(MiramaxError::Conflict("Payment has already been annulled".into()));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(MiramaxError::Validation("An annulment reason is required".into()));
        }

        let client = self
            .clients
            .get_client(snapshot.client_id)
            .await
            .ok_or_else(|| MiramaxError::NotFound(format!("Client {} not found", snapshot.client_id)))?;

        let updated = {
            let mut payment = self
                .payments
                .get_mut(&payment_id)
                .ok_or_else(|| MiramaxError::NotFound(format!("Payment {} not found", payment_id)))?;

            // Re-check under the entry lock
            if payment.annulled_at.is_some() {
                return Err(MiramaxError::Conflict("Payment has already been annulled".into()));
            }

            self.trail.record(
                "Payment",
                payment.id,
                Some(actor),
                AuditAction::Cancel,
                json!({
                    "payment_id": payment.id,
                    "client": client.name,
                    "amount": payment.amount.to_string(),
                    "method": payment.method,
                    "reason": reason,
                }),
            )?;

            payment.annulment_reason = Some(reason.to_string());
            payment.annulled_by = Some(actor.id);
            payment.annulled_at = Some(Utc::now());
            payment.validation_status = ValidationStatus::Rejected;
            payment.clone()
        };

        tracing::info!(
            payment_id = %payment_id,
            annulled_by = %actor.username,
            "Payment annulled"
        );
        Ok(updated)
    }

    pub fn get(&self, payment_id: Uuid) -> Option<Payment> {
        self.payments.get(&payment_id).map(|p| p.clone())
    }

    pub fn list_for_client(&self, client_id: Uuid) -> Vec<Payment> {
        let mut payments: Vec<Payment> = self
            .payments
            .iter()
            .filter(|p| p.client_id == client_id)
            .map(|p| p.clone())
            .collect();
        payments.sort_by(|a, b| b.date.cmp(&a.date));
        payments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::NewClient;
    use crate::fees::FeeFilter;
    use crate::pricing::PriceBook;
    use crate::types::{FeeStatus, ServiceType};
    use miramax_core::{Dni, Role};
    use rust_decimal_macros::dec;

    struct Fixture {
        desk: PaymentDesk,
        trail: AuditTrail,
        client_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let registry = ClientRegistry::new();
        let client = registry
            .create_client(NewClient {
                dni: Dni::new("87654321").unwrap(),
                name: "Pedro Castillo".to_string(),
                phone: None,
                address: "Calle Lima 10".to_string(),
                caserio_id: None,
                sede_id: None,
                cobrador_id: None,
            })
            .await
            .unwrap();
        let trail = AuditTrail::new();
        let desk = PaymentDesk::new(registry, FeeLedger::new(14), trail.clone());
        Fixture {
            desk,
            trail,
            client_id: client.id,
        }
    }

    fn new_payment(client_id: Uuid, method: PaymentMethod) -> NewPayment {
        NewPayment {
            client_id,
            service_id: None,
            monthly_fee_id: None,
            amount: dec!(80.00),
            method,
            reference_number: Some("OP-443311".to_string()),
            proof_image_url: None,
        }
    }

    #[tokio::test]
    async fn register_starts_pending_and_audits_create() {
        let fx = fixture().await;
        let cobrador = Actor::new("luis", Role::Cobrador);
        let payment = fx
            .desk
            .register(&cobrador, new_payment(fx.client_id, PaymentMethod::Yape))
            .await
            .unwrap();

        assert_eq!(payment.validation_status, ValidationStatus::Pending);
        assert_eq!(payment.registered_by, cobrador.id);

        let admin = Actor::new("root", Role::Admin);
        let entries = fx.trail.for_record(&admin, "Payment", payment.id);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::Create);
    }

    #[tokio::test]
    async fn non_positive_amounts_are_rejected() {
        let fx = fixture().await;
        let actor = Actor::new("luis", Role::Cobrador);
        let mut payment = new_payment(fx.client_id, PaymentMethod::Cash);
        payment.amount = Decimal::ZERO;
        let err = fx.desk.register(&actor, payment).await.unwrap_err();
        assert!(matches!(err, MiramaxError::Validation(_)));
    }

    #[tokio::test]
    async fn unauthorized_decide_leaves_payment_pending_and_unaudited() {
        let fx = fixture().await;
        let cobrador = Actor::new("luis", Role::Cobrador);
        let payment = fx
            .desk
            .register(&cobrador, new_payment(fx.client_id, PaymentMethod::Yape))
            .await
            .unwrap();

        let err = fx
            .desk
            .decide(payment.id, Verdict::Validated, &cobrador, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MiramaxError::Forbidden(_)));

        let current = fx.desk.get(payment.id).unwrap();
        assert_eq!(current.validation_status, ValidationStatus::Pending);

        // Only the CREATE entry exists; failed attempts are not audited
        let admin = Actor::new("root", Role::Admin);
        assert_eq!(fx.trail.for_record(&admin, "Payment", payment.id).len(), 1);
    }

    #[tokio::test]
    async fn validate_records_actor_and_audits_once() {
        let fx = fixture().await;
        let cobrador = Actor::new("luis", Role::Cobrador);
        let oficina = Actor::new("ana", Role::Oficina);
        let payment = fx
            .desk
            .register(&cobrador, new_payment(fx.client_id, PaymentMethod::Yape))
            .await
            .unwrap();

        let updated = fx
            .desk
            .decide(payment.id, Verdict::Validated, &oficina, None)
            .await
            .unwrap();
        assert_eq!(updated.validation_status, ValidationStatus::Validated);
        assert_eq!(updated.validated_by, Some(oficina.id));

        let admin = Actor::new("root", Role::Admin);
        let validates: Vec<_> = fx
            .trail
            .for_record(&admin, "Payment", payment.id)
            .into_iter()
            .filter(|e| e.action == AuditAction::Validate)
            .collect();
        assert_eq!(validates.len(), 1);
        assert_eq!(validates[0].record_id, payment.id);
    }

    #[tokio::test]
    async fn rejection_requires_a_reason() {
        let fx = fixture().await;
        let oficina = Actor::new("ana", Role::Oficina);
        let payment = fx
            .desk
            .register(&oficina, new_payment(fx.client_id, PaymentMethod::Plin))
            .await
            .unwrap();

        let err = fx
            .desk
            .decide(payment.id, Verdict::Rejected, &oficina, Some("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, MiramaxError::Validation(_)));

        let updated = fx
            .desk
            .decide(payment.id, Verdict::Rejected, &oficina, Some("proof image unreadable"))
            .await
            .unwrap();
        assert_eq!(updated.validation_status, ValidationStatus::Rejected);
        assert_eq!(updated.rejection_reason.as_deref(), Some("proof image unreadable"));
    }

    #[tokio::test]
    async fn validation_settles_the_linked_fee_in_the_same_step() {
        let registry = ClientRegistry::new();
        let client = registry
            .create_client(NewClient {
                dni: Dni::new("87654321").unwrap(),
                name: "Pedro Castillo".to_string(),
                phone: None,
                address: "Calle Lima 10".to_string(),
                caserio_id: None,
                sede_id: None,
                cobrador_id: None,
            })
            .await
            .unwrap();
        registry
            .add_service(client.id, ServiceType::Internet, dec!(80.00))
            .await
            .unwrap();
        let fees = FeeLedger::new(14);
        fees.generate(1, 2024, &registry, &PriceBook::new()).await.unwrap();
        let fee_id = fees.list(&FeeFilter::default())[0].id;

        let desk = PaymentDesk::new(registry, fees.clone(), AuditTrail::new());
        let oficina = Actor::new("ana", Role::Oficina);
        let mut capture = new_payment(client.id, PaymentMethod::Yape);
        capture.monthly_fee_id = Some(fee_id);
        let payment = desk.register(&oficina, capture).await.unwrap();

        let updated = desk
            .decide(payment.id, Verdict::Validated, &oficina, None)
            .await
            .unwrap();
        assert_eq!(updated.validation_status, ValidationStatus::Validated);

        // The fee is settled by the time the decision returns
        let fee = fees.get(fee_id).unwrap();
        assert_eq!(fee.status, FeeStatus::Paid);
        assert_eq!(fee.paid_amount, dec!(80.00));
        assert_eq!(fee.payment_id, Some(payment.id));
    }

    #[tokio::test]
    async fn decided_payments_are_terminal() {
        let fx = fixture().await;
        let oficina = Actor::new("ana", Role::Oficina);
        let payment = fx
            .desk
            .register(&oficina, new_payment(fx.client_id, PaymentMethod::Transfer))
            .await
            .unwrap();
        fx.desk
            .decide(payment.id, Verdict::Validated, &oficina, None)
            .await
            .unwrap();

        let err = fx
            .desk
            .decide(payment.id, Verdict::Rejected, &oficina, Some("double check"))
            .await
            .unwrap_err();
        assert!(matches!(err, MiramaxError::Conflict(_)));
    }

    #[tokio::test]
    async fn cash_payments_can_never_be_annulled() {
        let fx = fixture().await;
        let admin = Actor::new("root", Role::Admin);
        let payment = fx
            .desk
            .register(&admin, new_payment(fx.client_id, PaymentMethod::Cash))
            .await
            .unwrap();

        // Not even an admin can annul cash
        let err = fx.desk.annul(payment.id, &admin, "mistake").await.unwrap_err();
        assert!(matches!(err, MiramaxError::Policy(_)));
    }

    #[tokio::test]
    async fn double_annulment_conflicts_and_preserves_the_original() {
        let fx = fixture().await;
        let oficina = Actor::new("ana", Role::Oficina);
        let payment = fx
            .desk
            .register(&oficina, new_payment(fx.client_id, PaymentMethod::Yape))
            .await
            .unwrap();

        let first = fx
            .desk
            .annul(payment.id, &oficina, "duplicate entry")
            .await
            .unwrap();
        assert_eq!(first.validation_status, ValidationStatus::Rejected);
        assert!(first.annulled_at.is_some());

        let other = Actor::new("root", Role::Admin);
        let err = fx.desk.annul(payment.id, &other, "again").await.unwrap_err();
        assert!(matches!(err, MiramaxError::Conflict(_)));

        let current = fx.desk.get(payment.id).unwrap();
        assert_eq!(current.annulment_reason.as_deref(), Some("duplicate entry"));
        assert_eq!(current.annulled_by, Some(oficina.id));
        assert_eq!(current.annulled_at, first.annulled_at);
    }

    #[tokio::test]
    async fn annulment_requires_capability_and_reason() {
        let fx = fixture().await;
        let cobrador = Actor::new("luis", Role::Cobrador);
        let oficina = Actor::new("ana", Role::Oficina);
        let payment = fx
            .desk
            .register(&cobrador, new_payment(fx.client_id, PaymentMethod::Yape))
            .await
            .unwrap();

        let err = fx.desk.annul(payment.id, &cobrador, "motivo").await.unwrap_err();
        assert!(matches!(err, MiramaxError::Forbidden(_)));

        let err = fx.desk.annul(payment.id, &oficina, "  ").await.unwrap_err();
        assert!(matches!(err, MiramaxError::Validation(_)));
    }

    #[tokio::test]
    async fn annulment_emits_one_cancel_entry() {
        let fx = fixture().await;
        let oficina = Actor::new("ana", Role::Oficina);
        let payment = fx
            .desk
            .register(&oficina, new_payment(fx.client_id, PaymentMethod::Transfer))
            .await
            .unwrap();
        fx.desk.annul(payment.id, &oficina, "wrong client").await.unwrap();

        let admin = Actor::new("root", Role::Admin);
        let cancels: Vec<_> = fx
            .trail
            .for_record(&admin, "Payment", payment.id)
            .into_iter()
            .filter(|e| e.action == AuditAction::Cancel)
            .collect();
        assert_eq!(cancels.len(), 1);
        assert_eq!(cancels[0].detail["reason"], "wrong client");
    }
}
