//! Fee Generator and fee ledger
//!
//! One pending fee per active service per billing period. Generation is a
//! batch job: per-service failures are counted and do not abort the run.

use chrono::{Datelike, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use miramax_core::{MiramaxError, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::clients::ClientRegistry;
use crate::pricing::PriceBook;
use crate::types::{FeeStatus, MonthlyFee, ServiceRecord};

/// Aggregate counts reported by one generation run
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct GenerationSummary {
    pub created: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FeeFilter {
    pub client_id: Option<Uuid>,
    /// (year, month) of the billing period
    pub period: Option<(i32, u32)>,
    pub status: Option<FeeStatus>,
}

#[derive(Clone)]
pub struct FeeLedger {
    fees: Arc<DashMap<Uuid, MonthlyFee>>,
    /// Uniqueness index over (client, service, period). Inserts go through
    /// the entry API so concurrent generator runs serialize per key.
    period_index: Arc<DashMap<(Uuid, Uuid, NaiveDate), Uuid>>,
    due_days: i64,
}

enum ItemOutcome {
    Created,
    Skipped,
}

impl FeeLedger {
    pub fn new(due_days: i64) -> Self {
        Self {
            fees: Arc::new(DashMap::new()),
            period_index: Arc::new(DashMap::new()),
            due_days,
        }
    }

    /// First day of the requested billing period
    pub fn period_date(month: u32, year: i32) -> Result<NaiveDate> {
        NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| MiramaxError::Validation(format!("Invalid period {}/{}", month, year)))
    }

    /// Generate fees for every active service for the given period.
    ///
    /// Idempotent: services that already have a fee for the period are
    /// counted as skipped. A failure on one service is counted and logged;
    /// the rest of the batch continues.
    pub async fn generate(
        &self,
        month: u32,
        year: i32,
        registry: &ClientRegistry,
        price_book: &PriceBook,
    ) -> Result<GenerationSummary> {
        let period = Self::period_date(month, year)?;
        let due_date = period + Duration::days(self.due_days);

        let active = registry.active_services();
        tracing::info!(period = %period, services = active.len(), "Generating monthly fees");

        let mut summary = GenerationSummary::default();
        for service in active {
            match self.generate_one(&service, period, due_date, registry, price_book).await {
                Ok(ItemOutcome::Created) => summary.created += 1,
                Ok(ItemOutcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    tracing::error!(
                        service_id = %service.id,
                        client_id = %service.client_id,
                        error = %e,
                        "Fee generation failed for service"
                    );
                    summary.errors += 1;
                }
            }
        }

        tracing::info!(
            created = summary.created,
            skipped = summary.skipped,
            errors = summary.errors,
            "Fee generation completed"
        );
        Ok(summary)
    }

    async fn generate_one(
        &self,
        service: &ServiceRecord,
        period: NaiveDate,
        due_date: NaiveDate,
        registry: &ClientRegistry,
        price_book: &PriceBook,
    ) -> Result<ItemOutcome> {
        let client = registry
            .get_client(service.client_id)
            .await
            .ok_or_else(|| MiramaxError::NotFound(format!("Client {} not found", service.client_id)))?;

        // Zone price wins; the service's flat price is the fallback
        let amount = client
            .caserio_id
            .and_then(|zone| price_book.resolve(zone, service.service_type, period))
            .unwrap_or(service.price);

        let key = (service.client_id, service.id, period);
        match self.period_index.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(ItemOutcome::Skipped),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let fee = MonthlyFee {
                    id: Uuid::new_v4(),
                    client_id: service.client_id,
                    service_id: service.id,
                    period,
                    due_date,
                    amount,
                    paid_amount: Decimal::ZERO,
                    status: FeeStatus::Pending,
                    payment_id: None,
                    generated_at: Utc::now(),
                };
                slot.insert(fee.id);
                self.fees.insert(fee.id, fee);
                Ok(ItemOutcome::Created)
            }
        }
    }

    pub fn get(&self, id: Uuid) -> Option<MonthlyFee> {
        self.fees.get(&id).map(|f| f.clone())
    }

    /// Apply a validated payment's amount to a fee. Moves the fee to Paid
    /// once the paid amount covers the billed amount, otherwise Partial.
    pub fn apply_payment(&self, fee_id: Uuid, payment_id: Uuid, amount: Decimal) -> Result<MonthlyFee> {
        let mut fee = self
            .fees
            .get_mut(&fee_id)
            .ok_or_else(|| MiramaxError::NotFound(format!("Fee {} not found", fee_id)))?;

        fee.paid_amount += amount;
        fee.status = if fee.paid_amount >= fee.amount {
            FeeStatus::Paid
        } else {
            FeeStatus::Partial
        };
        fee.payment_id = Some(payment_id);

        tracing::info!(
            fee_id = %fee_id,
            payment_id = %payment_id,
            paid = %fee.paid_amount,
            status = ?fee.status,
            "Payment applied to fee"
        );
        Ok(fee.clone())
    }

    /// Externally triggered sweep: unpaid fees past their due date expire.
    /// Returns the number of fees transitioned.
    pub fn expire_overdue(&self, today: NaiveDate) -> usize {
        let mut expired = 0;
        for mut fee in self.fees.iter_mut() {
            if matches!(fee.status, FeeStatus::Pending | FeeStatus::Partial) && fee.due_date < today
            {
                fee.status = FeeStatus::Expired;
                expired += 1;
            }
        }
        if expired > 0 {
            tracing::info!(expired, "Overdue fees expired");
        }
        expired
    }

    pub fn list(&self, filter: &FeeFilter) -> Vec<MonthlyFee> {
        let mut fees: Vec<MonthlyFee> = self
            .fees
            .iter()
            .filter(|f| {
                filter.client_id.map_or(true, |c| f.client_id == c)
                    && filter
                        .period
                        .map_or(true, |(y, m)| f.period.year() == y && f.period.month() == m)
                    && filter.status.map_or(true, |s| f.status == s)
            })
            .map(|f| f.clone())
            .collect();
        fees.sort_by(|a, b| b.period.cmp(&a.period));
        fees
    }
}
