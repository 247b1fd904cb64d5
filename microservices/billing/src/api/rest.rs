//! Billing REST API
//!
//! Authentication lives at the gateway; handlers resolve the acting user
//! from forwarded identity headers and enforce capabilities through the
//! role predicates.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Datelike, NaiveDate, Utc};
use miramax_core::{Actor, Dni, MiramaxError, Role};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::audit::{AuditFilter, AuditTrail};
use crate::clients::{ClientRegistry, NewClient};
use crate::fees::{FeeFilter, FeeLedger};
use crate::payments::{NewPayment, PaymentDesk, Verdict};
use crate::pricing::PriceBook;
use crate::types::{FeeStatus, ServiceType, VisitOutcome, ZonePriceConfig};

#[derive(Clone)]
pub struct AppState {
    pub registry: ClientRegistry,
    pub price_book: PriceBook,
    pub fee_ledger: FeeLedger,
    pub payment_desk: PaymentDesk,
    pub audit_trail: AuditTrail,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Clients and services
        .route("/v1/clients", post(create_client))
        .route("/v1/clients/{id}", get(get_client))
        .route("/v1/clients/{id}/services", post(add_service).get(list_services))
        .route("/v1/services/{id}/deactivate", post(deactivate_service))
        // Zone price configs
        .route("/v1/price-configs", post(upsert_price_config))
        .route("/v1/price-configs/{zone_id}", get(list_price_configs))
        // Monthly fees
        .route("/v1/fees", get(list_fees))
        .route("/v1/fees/generate", post(generate_fees))
        .route("/v1/fees/expire", post(expire_fees))
        // Payments
        .route("/v1/payments", post(register_payment).get(list_payments))
        .route("/v1/payments/{id}/validate", post(validate_payment))
        .route("/v1/payments/{id}/anular", post(annul_payment))
        // Visits
        .route("/v1/visits", post(create_visit).get(list_visits))
        // Audit
        .route("/v1/audit", get(query_audit))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}
async fn ready() -> &'static str {
    "OK"
}

/// Error envelope for every handler
#[derive(Debug)]
pub struct ApiError(MiramaxError);

impl From<MiramaxError> for ApiError {
    fn from(e: MiramaxError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "error": self.0.to_string(),
            "code": self.0.error_code(),
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Resolve the acting user from gateway-forwarded identity headers
fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, MiramaxError> {
    let header = |name: &str| -> Option<&str> { headers.get(name).and_then(|v| v.to_str().ok()) };

    let id = header("x-actor-id")
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or_else(|| MiramaxError::Validation("Missing or invalid X-Actor-Id header".into()))?;
    let username = header("x-actor-name")
        .ok_or_else(|| MiramaxError::Validation("Missing X-Actor-Name header".into()))?
        .to_string();
    let role: Role = header("x-actor-role")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| MiramaxError::Validation("Missing or unknown X-Actor-Role header".into()))?;
    let sede_id = header("x-actor-sede").and_then(|v| Uuid::parse_str(v).ok());

    Ok(Actor {
        id,
        username,
        role,
        sede_id,
    })
}

// Client endpoints

#[derive(Deserialize)]
struct CreateClientRequest {
    dni: String,
    name: String,
    phone: Option<String>,
    address: String,
    caserio_id: Option<Uuid>,
    sede_id: Option<Uuid>,
    cobrador_id: Option<Uuid>,
}

async fn create_client(
    State(state): State<AppState>,
    Json(req): Json<CreateClientRequest>,
) -> ApiResult<crate::types::Client> {
    let dni = Dni::new(req.dni)
        .ok_or_else(|| MiramaxError::Validation("DNI must be exactly eight digits".into()))?;
    let client = state
        .registry
        .create_client(NewClient {
            dni,
            name: req.name,
            phone: req.phone,
            address: req.address,
            caserio_id: req.caserio_id,
            sede_id: req.sede_id,
            cobrador_id: req.cobrador_id,
        })
        .await?;
    Ok(Json(client))
}

async fn get_client(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<crate::types::Client> {
    let client = state
        .registry
        .get_client(id)
        .await
        .ok_or_else(|| MiramaxError::NotFound(format!("Client {} not found", id)))?;
    Ok(Json(client))
}

#[derive(Deserialize)]
struct AddServiceRequest {
    service_type: ServiceType,
    price: Decimal,
}

async fn add_service(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AddServiceRequest>,
) -> ApiResult<crate::types::ServiceRecord> {
    let service = state.registry.add_service(id, req.service_type, req.price).await?;
    Ok(Json(service))
}

async fn list_services(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<crate::types::ServiceRecord>> {
    Ok(Json(state.registry.list_services(id).await))
}

async fn deactivate_service(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<serde_json::Value> {
    state.registry.deactivate_service(id).await?;
    Ok(Json(json!({ "status": "deactivated" })))
}

// Price config endpoints

#[derive(Deserialize)]
struct UpsertPriceConfigRequest {
    zone_id: Uuid,
    service_type: ServiceType,
    base_price: Decimal,
    effective_from: NaiveDate,
    effective_until: Option<NaiveDate>,
    #[serde(default = "default_true")]
    active: bool,
}

fn default_true() -> bool {
    true
}

async fn upsert_price_config(
    State(state): State<AppState>,
    Json(req): Json<UpsertPriceConfigRequest>,
) -> ApiResult<ZonePriceConfig> {
    if req.base_price < Decimal::ZERO {
        return Err(MiramaxError::Validation("Base price cannot be negative".into()).into());
    }
    let config = ZonePriceConfig {
        id: Uuid::new_v4(),
        zone_id: req.zone_id,
        service_type: req.service_type,
        base_price: req.base_price,
        effective_from: req.effective_from,
        effective_until: req.effective_until,
        active: req.active,
    };
    state.price_book.upsert(config.clone());
    Ok(Json(config))
}

async fn list_price_configs(
    State(state): State<AppState>,
    Path(zone_id): Path<Uuid>,
) -> ApiResult<Vec<ZonePriceConfig>> {
    Ok(Json(state.price_book.list_for_zone(zone_id)))
}

// Fee endpoints

#[derive(Deserialize, Default)]
struct GenerateFeesRequest {
    #[serde(default)]
    month: Option<u32>,
    #[serde(default)]
    year: Option<i32>,
}

async fn generate_fees(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<GenerateFeesRequest>,
) -> ApiResult<crate::fees::GenerationSummary> {
    let actor = actor_from_headers(&headers)?;
    if !actor.role.can_generate_fees() {
        return Err(MiramaxError::Forbidden("Only office staff can generate fees".into()).into());
    }

    let now = Utc::now().date_naive();
    let month = req.month.unwrap_or_else(|| now.month());
    let year = req.year.unwrap_or_else(|| now.year());

    let summary = state
        .fee_ledger
        .generate(month, year, &state.registry, &state.price_book)
        .await?;
    Ok(Json(summary))
}

#[derive(Deserialize)]
struct FeeListQuery {
    client: Option<Uuid>,
    year: Option<i32>,
    month: Option<u32>,
    status: Option<FeeStatus>,
}

async fn list_fees(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FeeListQuery>,
) -> ApiResult<Vec<crate::types::MonthlyFee>> {
    let actor = actor_from_headers(&headers)?;
    let period = match (query.year, query.month) {
        (Some(y), Some(m)) => Some((y, m)),
        _ => None,
    };
    let mut fees = state.fee_ledger.list(&FeeFilter {
        client_id: query.client,
        period,
        status: query.status,
    });
    // Collectors only see fees for clients in their portfolio
    if actor.role == Role::Cobrador {
        fees.retain(|f| state.registry.is_assigned_to(f.client_id, actor.id));
    }
    Ok(Json(fees))
}

async fn expire_fees(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<serde_json::Value> {
    let actor = actor_from_headers(&headers)?;
    if !actor.role.can_generate_fees() {
        return Err(MiramaxError::Forbidden("Only office staff can expire fees".into()).into());
    }
    let expired = state.fee_ledger.expire_overdue(Utc::now().date_naive());
    Ok(Json(json!({ "expired": expired })))
}

// Payment endpoints

async fn register_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NewPayment>,
) -> ApiResult<crate::types::Payment> {
    let actor = actor_from_headers(&headers)?;
    let payment = state.payment_desk.register(&actor, req).await?;
    Ok(Json(payment))
}

#[derive(Deserialize)]
struct PaymentListQuery {
    client: Uuid,
}

async fn list_payments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PaymentListQuery>,
) -> ApiResult<Vec<crate::types::Payment>> {
    let actor = actor_from_headers(&headers)?;
    let mut payments = state.payment_desk.list_for_client(query.client);
    // Non-admins only see payments for clients of their own branch
    if actor.role != Role::Admin {
        payments.retain(|p| state.registry.in_sede(p.client_id, actor.sede_id));
    }
    Ok(Json(payments))
}

#[derive(Deserialize)]
struct ValidatePaymentRequest {
    status: String,
    reason: Option<String>,
}

async fn validate_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<ValidatePaymentRequest>,
) -> ApiResult<crate::types::Payment> {
    let actor = actor_from_headers(&headers)?;
    let verdict = match req.status.as_str() {
        "validated" => Verdict::Validated,
        "rejected" => Verdict::Rejected,
        other => {
            return Err(MiramaxError::Validation(format!("Invalid status '{}'", other)).into());
        }
    };
    let payment = state
        .payment_desk
        .decide(id, verdict, &actor, req.reason.as_deref())
        .await?;
    Ok(Json(payment))
}

#[derive(Deserialize)]
struct AnnulPaymentRequest {
    motivo: String,
}

async fn annul_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<AnnulPaymentRequest>,
) -> ApiResult<crate::types::Payment> {
    let actor = actor_from_headers(&headers)?;
    let payment = state.payment_desk.annul(id, &actor, &req.motivo).await?;
    Ok(Json(payment))
}

// Visit endpoints

#[derive(Deserialize)]
struct CreateVisitRequest {
    client_id: Uuid,
    outcome: VisitOutcome,
    notes: Option<String>,
}

async fn create_visit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateVisitRequest>,
) -> ApiResult<crate::types::Visit> {
    let actor = actor_from_headers(&headers)?;
    let visit = state
        .registry
        .record_visit(&actor, req.client_id, req.outcome, req.notes)
        .await?;
    Ok(Json(visit))
}

#[derive(Deserialize)]
struct VisitListQuery {
    client: Option<Uuid>,
}

async fn list_visits(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<VisitListQuery>,
) -> ApiResult<Vec<crate::types::Visit>> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(state.registry.list_visits(&actor, query.client).await))
}

// Audit endpoints

#[derive(Deserialize)]
struct AuditQuery {
    table: Option<String>,
    action: Option<crate::types::AuditAction>,
    actor: Option<Uuid>,
}

async fn query_audit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Vec<crate::types::AuditEntry>> {
    let actor = actor_from_headers(&headers)?;
    let entries = state.audit_trail.query(
        &actor,
        &AuditFilter {
            table: query.table,
            action: query.action,
            actor_id: query.actor,
        },
    );
    Ok(Json(entries))
}
