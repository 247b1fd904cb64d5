//! Zone Price Resolver
//!
//! Resolves the base price for a (zone, service type) pair from the
//! zone-scoped pricing configuration effective at a given date.

use chrono::NaiveDate;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::types::{ServiceType, ZonePriceConfig};

#[derive(Clone, Default)]
pub struct PriceBook {
    configs: Arc<DashMap<Uuid, ZonePriceConfig>>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a price config
    pub fn upsert(&self, config: ZonePriceConfig) {
        self.configs.insert(config.id, config);
    }

    pub fn get(&self, id: Uuid) -> Option<ZonePriceConfig> {
        self.configs.get(&id).map(|c| c.clone())
    }

    /// Resolve the authoritative price for a zone and service type at `as_of`.
    ///
    /// Among active configs with `effective_from <= as_of`, the one with the
    /// latest effective_from wins. Returns `None` when no rule matches;
    /// callers fall back to the service's flat price.
    pub fn resolve(
        &self,
        zone_id: Uuid,
        service_type: ServiceType,
        as_of: NaiveDate,
    ) -> Option<Decimal> {
        self.configs
            .iter()
            .filter(|c| {
                c.zone_id == zone_id
                    && c.service_type == service_type
                    && c.active
                    && c.effective_from <= as_of
            })
            .max_by_key(|c| c.effective_from)
            .map(|c| c.base_price)
    }

    /// List configs for a zone, newest effective_from first
    pub fn list_for_zone(&self, zone_id: Uuid) -> Vec<ZonePriceConfig> {
        let mut configs: Vec<ZonePriceConfig> = self
            .configs
            .iter()
            .filter(|c| c.zone_id == zone_id)
            .map(|c| c.clone())
            .collect();
        configs.sort_by(|a, b| b.effective_from.cmp(&a.effective_from));
        configs
    }
}
