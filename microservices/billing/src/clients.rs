//! Client registry
//!
//! Clients, their services, and collector visit logging. Billing codes are
//! assigned here, as an explicit step during creation.

use chrono::Utc;
use dashmap::DashMap;
use miramax_core::{Actor, ClientCode, Dni, MiramaxError, Result, Role};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::types::{Client, ServiceRecord, ServiceType, Visit, VisitOutcome};

#[derive(Debug, Clone)]
pub struct NewClient {
    pub dni: Dni,
    pub name: String,
    pub phone: Option<String>,
    pub address: String,
    pub caserio_id: Option<Uuid>,
    pub sede_id: Option<Uuid>,
    pub cobrador_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct ClientRegistry {
    clients: Arc<DashMap<Uuid, Client>>,
    services: Arc<DashMap<Uuid, ServiceRecord>>,
    /// DNI uniqueness index
    dni_index: Arc<DashMap<String, Uuid>>,
    visits: Arc<DashMap<Uuid, Visit>>,
    /// Creation sequence feeding client code assignment
    code_seq: Arc<AtomicU64>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            services: Arc::new(DashMap::new()),
            dni_index: Arc::new(DashMap::new()),
            visits: Arc::new(DashMap::new()),
            code_seq: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Create a client. The billing code is generated here, exactly once;
    /// it never changes afterwards.
    pub async fn create_client(&self, new: NewClient) -> Result<Client> {
        let id = Uuid::new_v4();

        // Entry lock on the DNI serializes concurrent creates for the same number
        match self.dni_index.entry(new.dni.as_str().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(MiramaxError::Conflict(format!(
                    "A client with DNI {} already exists",
                    new.dni
                )));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let code = ClientCode::from_sequence(self.code_seq.fetch_add(1, Ordering::SeqCst));
        let client = Client {
            id,
            code,
            dni: new.dni,
            name: new.name,
            phone: new.phone,
            address: new.address,
            caserio_id: new.caserio_id,
            sede_id: new.sede_id,
            cobrador_id: new.cobrador_id,
            created_at: Utc::now(),
        };

        tracing::info!(client_id = %client.id, code = %client.code, "Client created");
        self.clients.insert(client.id, client.clone());
        Ok(client)
    }

    pub async fn get_client(&self, id: Uuid) -> Option<Client> {
        self.clients.get(&id).map(|c| c.clone())
    }

    /// Zone (caserío) the client's pricing is scoped to
    pub fn get_zone(&self, client_id: Uuid) -> Option<Uuid> {
        self.clients.get(&client_id).and_then(|c| c.caserio_id)
    }

    /// Whether a client is in the given collector's portfolio
    pub fn is_assigned_to(&self, client_id: Uuid, cobrador_id: Uuid) -> bool {
        self.clients
            .get(&client_id)
            .map_or(false, |c| c.cobrador_id == Some(cobrador_id))
    }

    /// Whether a client belongs to the given branch office
    pub fn in_sede(&self, client_id: Uuid, sede_id: Option<Uuid>) -> bool {
        self.clients
            .get(&client_id)
            .map_or(false, |c| c.sede_id == sede_id)
    }

    /// Attach a service to a client
    pub async fn add_service(
        &self,
        client_id: Uuid,
        service_type: ServiceType,
        price: Decimal,
    ) -> Result<ServiceRecord> {
        if !self.clients.contains_key(&client_id) {
            return Err(MiramaxError::NotFound(format!("Client {} not found", client_id)));
        }
        if price < Decimal::ZERO {
            return Err(MiramaxError::Validation("Service price cannot be negative".into()));
        }

        let service = ServiceRecord {
            id: Uuid::new_v4(),
            client_id,
            service_type,
            price,
            is_active: true,
            install_date: Utc::now().date_naive(),
        };
        self.services.insert(service.id, service.clone());
        Ok(service)
    }

    pub async fn get_service(&self, id: Uuid) -> Option<ServiceRecord> {
        self.services.get(&id).map(|s| s.clone())
    }

    /// Deactivate a service: stops future fee generation, keeps history
    pub async fn deactivate_service(&self, service_id: Uuid) -> Result<()> {
        let mut service = self
            .services
            .get_mut(&service_id)
            .ok_or_else(|| MiramaxError::NotFound(format!("Service {} not found", service_id)))?;
        service.is_active = false;
        tracing::info!(service_id = %service_id, "Service deactivated");
        Ok(())
    }

    /// All active services, the fee generator's input
    pub fn active_services(&self) -> Vec<ServiceRecord> {
        self.services
            .iter()
            .filter(|s| s.is_active)
            .map(|s| s.clone())
            .collect()
    }

    pub async fn list_services(&self, client_id: Uuid) -> Vec<ServiceRecord> {
        self.services
            .iter()
            .filter(|s| s.client_id == client_id)
            .map(|s| s.clone())
            .collect()
    }

    /// Record a collector visit. The visit is attributed to the acting user.
    pub async fn record_visit(
        &self,
        actor: &Actor,
        client_id: Uuid,
        outcome: VisitOutcome,
        notes: Option<String>,
    ) -> Result<Visit> {
        if !self.clients.contains_key(&client_id) {
            return Err(MiramaxError::NotFound(format!("Client {} not found", client_id)));
        }

        let visit = Visit {
            id: Uuid::new_v4(),
            client_id,
            cobrador_id: actor.id,
            at: Utc::now(),
            outcome,
            notes,
        };
        self.visits.insert(visit.id, visit.clone());
        Ok(visit)
    }

    /// Visits visible to the actor: collectors see only their own
    pub async fn list_visits(&self, actor: &Actor, client_id: Option<Uuid>) -> Vec<Visit> {
        let mut visits: Vec<Visit> = self
            .visits
            .iter()
            .filter(|v| {
                if actor.role == Role::Cobrador && v.cobrador_id != actor.id {
                    return false;
                }
                client_id.map_or(true, |c| v.client_id == c)
            })
            .map(|v| v.clone())
            .collect();
        visits.sort_by(|a, b| b.at.cmp(&a.at));
        visits
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn new_client(dni: &str) -> NewClient {
        NewClient {
            dni: Dni::new(dni).unwrap(),
            name: "Juan Perez".to_string(),
            phone: None,
            address: "Av. Principal 123".to_string(),
            caserio_id: None,
            sede_id: None,
            cobrador_id: None,
        }
    }

    #[tokio::test]
    async fn codes_are_sequential_and_immutable() {
        let registry = ClientRegistry::new();
        let a = registry.create_client(new_client("11111111")).await.unwrap();
        let b = registry.create_client(new_client("22222222")).await.unwrap();

        assert_eq!(a.code.as_str(), "MIR-000001");
        assert_eq!(b.code.as_str(), "MIR-000002");

        // Re-reading yields the same code
        let again = registry.get_client(a.id).await.unwrap();
        assert_eq!(again.code, a.code);
    }

    #[tokio::test]
    async fn duplicate_dni_is_a_conflict() {
        let registry = ClientRegistry::new();
        registry.create_client(new_client("11111111")).await.unwrap();
        let err = registry.create_client(new_client("11111111")).await.unwrap_err();
        assert!(matches!(err, MiramaxError::Conflict(_)));
    }

    #[tokio::test]
    async fn deactivation_removes_service_from_active_set() {
        let registry = ClientRegistry::new();
        let client = registry.create_client(new_client("11111111")).await.unwrap();
        let service = registry
            .add_service(client.id, ServiceType::Internet, dec!(60.00))
            .await
            .unwrap();

        assert_eq!(registry.active_services().len(), 1);
        registry.deactivate_service(service.id).await.unwrap();
        assert!(registry.active_services().is_empty());

        // History stays
        assert!(registry.get_service(service.id).await.is_some());
    }

    #[tokio::test]
    async fn portfolio_assignment_lookup() {
        let registry = ClientRegistry::new();
        let cobrador = Actor::new("carlos", Role::Cobrador);

        let mut req = new_client("33333333");
        req.cobrador_id = Some(cobrador.id);
        let assigned = registry.create_client(req).await.unwrap();
        let unassigned = registry.create_client(new_client("44444444")).await.unwrap();

        assert!(registry.is_assigned_to(assigned.id, cobrador.id));
        assert!(!registry.is_assigned_to(unassigned.id, cobrador.id));
    }

    #[tokio::test]
    async fn cobradores_see_only_their_own_visits() {
        let registry = ClientRegistry::new();
        let client = registry.create_client(new_client("11111111")).await.unwrap();

        let cobrador_a = Actor::new("carlos", Role::Cobrador);
        let cobrador_b = Actor::new("maria", Role::Cobrador);
        registry
            .record_visit(&cobrador_a, client.id, VisitOutcome::Pago, None)
            .await
            .unwrap();
        registry
            .record_visit(&cobrador_b, client.id, VisitOutcome::NoEstaba, None)
            .await
            .unwrap();

        assert_eq!(registry.list_visits(&cobrador_a, None).await.len(), 1);
        let admin = Actor::new("root", Role::Admin);
        assert_eq!(registry.list_visits(&admin, None).await.len(), 2);
    }
}
