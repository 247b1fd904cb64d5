//! Billing domain types

use chrono::{DateTime, NaiveDate, Utc};
use miramax_core::{ClientCode, Dni};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Recurring service offering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Internet,
    Cable,
}

/// Subscriber of one or more services, scoped to a branch office
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub code: ClientCode,
    pub dni: Dni,
    pub name: String,
    pub phone: Option<String>,
    pub address: String,
    /// Finest-grained zone (caserío) used for zone-scoped pricing
    pub caserio_id: Option<Uuid>,
    pub sede_id: Option<Uuid>,
    /// Collector this client is assigned to
    pub cobrador_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// One recurring service attached to a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: Uuid,
    pub client_id: Uuid,
    pub service_type: ServiceType,
    /// Flat price, used when no zone price applies
    pub price: Decimal,
    pub is_active: bool,
    pub install_date: NaiveDate,
}

/// Zone-scoped base price rule for one service type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZonePriceConfig {
    pub id: Uuid,
    pub zone_id: Uuid,
    pub service_type: ServiceType,
    pub base_price: Decimal,
    pub effective_from: NaiveDate,
    pub effective_until: Option<NaiveDate>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeStatus {
    Pending,
    Partial,
    Paid,
    Expired,
}

/// One billing obligation for a (client, service, period) triple.
/// At most one exists per triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyFee {
    pub id: Uuid,
    pub client_id: Uuid,
    pub service_id: Uuid,
    /// First day of the billed month
    pub period: NaiveDate,
    pub due_date: NaiveDate,
    pub amount: Decimal,
    pub paid_amount: Decimal,
    pub status: FeeStatus,
    /// Weak back-reference to the payment that settled this fee
    pub payment_id: Option<Uuid>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Yape,
    Plin,
    Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Pending,
    Validated,
    Rejected,
}

/// A money-received event captured against a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub client_id: Uuid,
    pub service_id: Option<Uuid>,
    /// Fee this payment targets; validation applies the amount to it
    pub monthly_fee_id: Option<Uuid>,
    pub amount: Decimal,
    pub date: DateTime<Utc>,
    pub method: PaymentMethod,
    pub reference_number: Option<String>,
    pub proof_image_url: Option<String>,
    pub registered_by: Uuid,
    pub validated_by: Option<Uuid>,
    pub validation_status: ValidationStatus,
    pub rejection_reason: Option<String>,
    // Annulment fields, populated at most once
    pub annulment_reason: Option<String>,
    pub annulled_by: Option<Uuid>,
    pub annulled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Validate,
    Reject,
    Cancel,
}

/// Immutable audit record. Never updated or deleted once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub table: String,
    pub record_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub actor_username: Option<String>,
    pub action: AuditAction,
    pub detail: serde_json::Value,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitOutcome {
    Pago,
    NoEstaba,
    SeMudo,
    NoResponde,
}

/// Collector visit to a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visit {
    pub id: Uuid,
    pub client_id: Uuid,
    pub cobrador_id: Uuid,
    pub at: DateTime<Utc>,
    pub outcome: VisitOutcome,
    pub notes: Option<String>,
}
