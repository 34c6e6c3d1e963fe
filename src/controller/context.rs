//! Shared state of the outer controller loop

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

use crate::clients::Collaborators;
use crate::cluster::users::RoleMap;
use crate::cluster::{Cluster, NamespacedName};
use crate::config::OperatorConfig;
use crate::controller::error::{BackoffConfig, Error};
use crate::controller::status::StatusBoard;
use crate::crd::PostgresCluster;
use crate::health::HealthState;

/// Consecutive failures of one cluster at one resource generation
#[derive(Clone, Copy, Debug)]
struct FailureRecord {
    generation: Option<i64>,
    attempts: u32,
    retry_at: Instant,
}

/// Shared context for the controller
pub struct Context {
    pub config: Arc<OperatorConfig>,
    pub clients: Collaborators,
    /// Roles every cluster gets, loaded once at start
    pub infrastructure_roles: Arc<RoleMap>,
    pub health: Arc<HealthState>,
    pub statuses: StatusBoard,
    backoff: BackoffConfig,
    clusters: RwLock<HashMap<NamespacedName, Arc<Cluster>>>,
    failures: Mutex<HashMap<NamespacedName, FailureRecord>>,
}

impl Context {
    pub fn new(
        config: Arc<OperatorConfig>,
        clients: Collaborators,
        infrastructure_roles: Arc<RoleMap>,
        health: Arc<HealthState>,
    ) -> Self {
        Self {
            config,
            clients,
            infrastructure_roles,
            health,
            statuses: StatusBoard::new(),
            backoff: BackoffConfig::default(),
            clusters: RwLock::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub async fn cluster(&self, name: &NamespacedName) -> Option<Arc<Cluster>> {
        self.clusters.read().await.get(name).cloned()
    }

    /// All cluster instances, in no particular order
    pub async fn clusters(&self) -> Vec<Arc<Cluster>> {
        self.clusters.read().await.values().cloned().collect()
    }

    /// Create and start the instance for a resource, or return the
    /// instance already registered under its name
    pub async fn register(&self, resource: PostgresCluster) -> Arc<Cluster> {
        let name = NamespacedName::from_resource(&resource);
        let mut clusters = self.clusters.write().await;
        if let Some(existing) = clusters.get(&name) {
            return existing.clone();
        }

        let cluster = Arc::new(Cluster::new(
            resource,
            self.config.clone(),
            self.infrastructure_roles.clone(),
            self.clients.clone(),
        ));
        cluster.run();
        clusters.insert(name.clone(), cluster.clone());
        debug!(cluster = %name, "cluster instance registered");
        self.health.metrics.set_managed_clusters(clusters.len() as i64);
        cluster
    }

    /// Stop and forget the instance of a cluster
    pub async fn deregister(&self, name: &NamespacedName) -> Option<Arc<Cluster>> {
        let mut clusters = self.clusters.write().await;
        let removed = clusters.remove(name);
        self.statuses.forget(name);
        if let Some(cluster) = &removed {
            cluster.stop();
            debug!(cluster = %name, "cluster instance removed");
        }
        self.health.metrics.set_managed_clusters(clusters.len() as i64);
        removed
    }

    /// Remaining wait before the cluster may be retried at this generation
    ///
    /// A new generation is never held back.
    pub fn retry_delay(&self, name: &NamespacedName, generation: Option<i64>) -> Option<Duration> {
        let failures = self.failures.lock().ok()?;
        let record = failures.get(name)?;
        if record.generation != generation {
            return None;
        }
        record
            .retry_at
            .checked_duration_since(Instant::now())
            .filter(|wait| !wait.is_zero())
    }

    /// Count a failure and return how long to wait before the next attempt
    pub fn record_failure(
        &self,
        name: &NamespacedName,
        generation: Option<i64>,
        error: &Error,
    ) -> Duration {
        let Ok(mut failures) = self.failures.lock() else {
            return self.backoff.delay_for_error(error, 0);
        };

        let attempts = match failures.get(name) {
            Some(record) if record.generation == generation => record.attempts + 1,
            _ => 0,
        };
        let delay = self.backoff.delay_for_error(error, attempts);
        failures.insert(
            name.clone(),
            FailureRecord {
                generation,
                attempts,
                retry_at: Instant::now() + delay,
            },
        );
        delay
    }

    pub fn clear_failures(&self, name: &NamespacedName) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(name);
        }
    }
}
