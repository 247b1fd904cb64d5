//! Billing Service
//!
//! Back-office billing core for the Miramax ISP/cable platform:
//! - Zone-scoped price resolution
//! - Monthly fee generation per active service
//! - Payment capture with validation/annulment workflow
//! - Append-only audit trail of state-changing actions

#![allow(dead_code)]

use miramax_core::{
    HealthStatus, MicroserviceRuntime, MiramaxService, ReadinessStatus, Result, ServiceConfig,
};
use std::sync::Arc;
use tracing::info;

mod api;
mod audit;
mod clients;
mod fees;
mod payments;
mod pricing;
mod types;


pub use audit::AuditTrail;
pub use clients::ClientRegistry;
pub use fees::FeeLedger;
pub use payments::PaymentDesk;
pub use pricing::PriceBook;
pub use types::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("billing=debug".parse().expect("valid tracing directive")),
        )
        .json()
        .init();

    info!("Starting Billing Service");

    let service = Arc::new(BillingService::new()?);
    MicroserviceRuntime::run(service).await
}

pub struct BillingService {
    config: BillingConfig,
    registry: ClientRegistry,
    price_book: PriceBook,
    fee_ledger: FeeLedger,
    payment_desk: PaymentDesk,
    audit_trail: AuditTrail,
    start_time: std::time::Instant,
}

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub service: ServiceConfig,
    /// Days between the period start and the fee due date
    pub due_days: i64,
}

impl BillingConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            service: ServiceConfig::from_env()?,
            due_days: std::env::var("DUE_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(14),
        })
    }
}

impl BillingService {
    pub fn new() -> Result<Self> {
        let config = BillingConfig::from_env()?;

        let registry = ClientRegistry::new();
        let price_book = PriceBook::new();
        let fee_ledger = FeeLedger::new(config.due_days);
        let audit_trail = AuditTrail::new();
        let payment_desk =
            PaymentDesk::new(registry.clone(), fee_ledger.clone(), audit_trail.clone());

        Ok(Self {
            config,
            registry,
            price_book,
            fee_ledger,
            payment_desk,
            audit_trail,
            start_time: std::time::Instant::now(),
        })
    }
}

#[async_trait::async_trait]
impl MiramaxService for BillingService {
    fn service_id(&self) -> &'static str {
        "billing"
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus {
            healthy: true,
            service_id: self.service_id().to_string(),
            version: self.version().to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    async fn ready(&self) -> ReadinessStatus {
        ReadinessStatus { ready: true }
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down Billing Service");
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let bind = format!("0.0.0.0:{}", self.config.service.http_port);
        info!(http = %bind, "Starting Billing server");

        let rest_router = api::rest::create_router(api::rest::AppState {
            registry: self.registry.clone(),
            price_book: self.price_book.clone(),
            fee_ledger: self.fee_ledger.clone(),
            payment_desk: self.payment_desk.clone(),
            audit_trail: self.audit_trail.clone(),
        });

        let listener = tokio::net::TcpListener::bind(&bind).await?;
        axum::serve(listener, rest_router)
            .await
            .map_err(|e| miramax_core::MiramaxError::Internal(e.to_string()))?;

        Ok(())
    }
}
