//! External collaborators of the lifecycle driver
//!
//! Each collaborator is a trait so the lifecycle driver and the volume
//! orchestrator can be exercised against mocks; the production
//! implementations live in the submodules.

mod control_plane;
mod exec;
mod postgres;
mod storage;
mod teams;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Endpoints, PersistentVolume, Pod, Secret, Service};

#[cfg(test)]
use mockall::automock;

use crate::cluster::NamespacedName;
use crate::cluster::users::PgUser;
use crate::controller::error::Result;
use crate::crd::ClusterStatus;

pub use self::control_plane::KubeClientImpl;
pub use self::exec::KubePodExecutor;
pub use self::postgres::{PostgresDriver, create_role_statement};
pub use self::storage::DisabledBlockStorage;
pub use self::teams::{DisabledTeamsApi, HttpTeamsApi};

/// Control-plane operations on the objects that make up a cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    async fn create_endpoint(&self, namespace: &str, endpoint: &Endpoints) -> Result<Endpoints>;
    async fn get_endpoint(&self, namespace: &str, name: &str) -> Result<Option<Endpoints>>;
    async fn delete_endpoint(&self, namespace: &str, name: &str) -> Result<()>;

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service>;
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;
    /// Merge-patch the live service's spec with the given one
    async fn update_service(&self, namespace: &str, service: &Service) -> Result<Service>;
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret>;
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;
    async fn list_secrets(&self, namespace: &str, selector: &str) -> Result<Vec<Secret>>;
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    async fn create_statefulset(
        &self,
        namespace: &str,
        statefulset: &StatefulSet,
    ) -> Result<StatefulSet>;
    async fn get_statefulset(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>>;
    /// Merge-patch the live stateful set's spec with the given one
    async fn update_statefulset(
        &self,
        namespace: &str,
        statefulset: &StatefulSet,
    ) -> Result<StatefulSet>;
    /// Delete a stateful set, leaving its pods and claims behind when `orphan` is set
    async fn delete_statefulset(&self, namespace: &str, name: &str, orphan: bool) -> Result<()>;
    /// Wait until a deleted stateful set is gone
    async fn wait_statefulset_deleted(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<()>;

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>>;
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    /// Persistent volumes bound to claims matching the selector
    async fn list_persistent_volumes(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<PersistentVolume>>;
    async fn update_persistent_volume(&self, volume: &PersistentVolume)
    -> Result<PersistentVolume>;

    /// Merge-patch `{"status": <status>}` onto the cluster resource
    async fn patch_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        status: ClusterStatus,
    ) -> Result<()>;

    /// Replace the cluster resource's finalizers; an empty list clears them
    async fn set_cluster_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<()>;
}

/// Cloud block storage
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BlockStorageProvider: Send + Sync {
    /// Grow a block device to `size_gib` gibibytes
    async fn resize_volume(&self, volume_id: &str, size_gib: i64) -> Result<()>;
}

/// Remote command execution inside a database pod
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodExecutor: Send + Sync {
    /// Run a command in the database container and return its standard output
    ///
    /// Any output on the error channel fails the call.
    async fn exec(&self, pod: &NamespacedName, command: Vec<String>) -> Result<String>;
}

/// Connection factory for the cluster's master
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    async fn connect(
        &self,
        cluster: &NamespacedName,
        username: &str,
        password: &str,
    ) -> Result<Box<dyn DatabaseConnection>>;
}

/// An open connection to the cluster's master
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    async fn existing_roles(&self) -> Result<BTreeSet<String>>;
    async fn create_role(&self, user: &PgUser) -> Result<()>;
}

/// Team membership directory
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TeamsApi: Send + Sync {
    async fn team_members(&self, team_id: &str) -> Result<Vec<String>>;
}

/// The set of collaborators a cluster instance talks to
#[derive(Clone)]
pub struct Collaborators {
    pub kube: Arc<dyn KubeClient>,
    pub storage: Arc<dyn BlockStorageProvider>,
    pub exec: Arc<dyn PodExecutor>,
    pub database: Arc<dyn DatabaseDriver>,
    pub teams: Arc<dyn TeamsApi>,
}

impl Collaborators {
    /// Production collaborators backed by a Kubernetes client
    pub fn from_client(client: kube::Client, teams: Arc<dyn TeamsApi>) -> Self {
        Self {
            kube: Arc::new(KubeClientImpl::new(client.clone())),
            storage: Arc::new(DisabledBlockStorage),
            exec: Arc::new(KubePodExecutor::new(client)),
            database: Arc::new(PostgresDriver),
            teams,
        }
    }
}
