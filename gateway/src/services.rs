//! Pool of backend endpoints, grouped by service path
//!
//! Endpoint keys follow the registration layout `{root}/{service}/{id}`, so
//! the service path of a key is its parent directory. Stateless services are
//! picked round robin; stateful ones (game hosts) are picked by id so a
//! player keeps landing on the host it was assigned to.

use log::{info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub key: String,
    pub addr: SocketAddr,
}

impl Endpoint {
    /// Last path segment of the key, e.g. `game1`
    pub fn id(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

#[derive(Debug, Default)]
struct Service {
    endpoints: Vec<Endpoint>,
    cursor: AtomicUsize,
}

/// Explicitly constructed registry of backend endpoints
#[derive(Debug, Default)]
pub struct ServicePool {
    services: RwLock<HashMap<String, Service>>,
}

fn service_path(key: &str) -> Option<&str> {
    key.rsplit_once('/').map(|(dir, _)| dir).filter(|dir| !dir.is_empty())
}

impl ServicePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the endpoint registered under `key`
    pub async fn add_service(&self, key: &str, addr: SocketAddr) {
        let Some(path) = service_path(key) else {
            warn!("ignoring service key without a directory: {}", key);
            return;
        };

        let mut services = self.services.write().await;
        let service = services.entry(path.to_string()).or_default();
        let endpoint = Endpoint {
            key: key.to_string(),
            addr,
        };
        match service.endpoints.iter_mut().find(|e| e.key == key) {
            Some(existing) => *existing = endpoint,
            None => service.endpoints.push(endpoint),
        }
        info!("service added: {} --> {}", key, addr);
    }

    /// Removes the endpoint registered under `key`; true if it existed
    pub async fn remove_service(&self, key: &str) -> bool {
        let Some(path) = service_path(key) else {
            return false;
        };

        let mut services = self.services.write().await;
        let Some(service) = services.get_mut(path) else {
            warn!("cannot remove {}: no service {}", key, path);
            return false;
        };
        let before = service.endpoints.len();
        service.endpoints.retain(|e| e.key != key);
        let removed = service.endpoints.len() != before;
        if removed {
            info!("service removed: {}", key);
        }
        removed
    }

    /// Next endpoint of a service, round robin
    pub async fn get_service(&self, path: &str) -> Option<Endpoint> {
        let services = self.services.read().await;
        let service = services.get(path)?;
        if service.endpoints.is_empty() {
            return None;
        }
        let idx = service.cursor.fetch_add(1, Ordering::Relaxed) % service.endpoints.len();
        Some(service.endpoints[idx].clone())
    }

    /// The endpoint of a service registered with a specific id
    pub async fn get_service_with_id(&self, path: &str, id: &str) -> Option<Endpoint> {
        let services = self.services.read().await;
        let full = format!("{}/{}", path, id);
        services
            .get(path)?
            .endpoints
            .iter()
            .find(|e| e.key == full)
            .cloned()
    }

    /// Number of live endpoints of a service
    pub async fn len(&self, path: &str) -> usize {
        self.services
            .read()
            .await
            .get(path)
            .map(|s| s.endpoints.len())
            .unwrap_or(0)
    }
}
