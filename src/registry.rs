//! Service registry interface
//!
//! The bridge reads and mutates registered services only through this trait.
//! [`Database`] is the production implementation.

use crate::db::{Database, NewService, ServiceRecord, ServiceUpdate};
use anyhow::Result;

pub trait ServiceRegistry: Send + Sync {
    /// All services, ordered by name
    fn list(&self) -> Result<Vec<ServiceRecord>>;

    /// Register a service and return its id
    fn add(&self, service: &NewService) -> Result<i64>;

    /// Apply a partial update; `Ok(false)` if the id is unknown
    fn update(&self, id: i64, update: &ServiceUpdate) -> Result<bool>;

    /// Enabled services, the candidate set for prefix matching
    fn enabled_candidates(&self) -> Result<Vec<ServiceRecord>>;
}

impl ServiceRegistry for Database {
    fn list(&self) -> Result<Vec<ServiceRecord>> {
        self.list_services()
    }

    fn add(&self, service: &NewService) -> Result<i64> {
        self.create_service(service)
    }

    fn update(&self, id: i64, update: &ServiceUpdate) -> Result<bool> {
        self.update_service(id, update)
    }

    fn enabled_candidates(&self) -> Result<Vec<ServiceRecord>> {
        self.list_enabled_services()
    }
}
