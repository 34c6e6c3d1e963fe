//! Common utilities for Kubernetes resource generation
//!
//! Shared names, labels and owner references used by every generator so
//! that the lifecycle driver can find the objects it created.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::crd::PostgresCluster;

/// API version for PostgresCluster CRD
pub const API_VERSION: &str = "spilo.smoketurner.com/v1";

/// Kind for PostgresCluster CRD
pub const KIND: &str = "PostgresCluster";

/// Operator field manager name
pub const FIELD_MANAGER: &str = "spilo-operator";

/// Label every Spilo pod carries; Patroni filters its members by it
pub const APPLICATION_LABEL: &str = "application";
pub const APPLICATION_NAME: &str = "spilo";

/// Label naming the owning cluster
pub const CLUSTER_NAME_LABEL: &str = "cluster-name";

/// Label Patroni sets on each pod to its current role
pub const ROLE_LABEL: &str = "spilo-role";
pub const MASTER_ROLE: &str = "master";
pub const REPLICA_ROLE: &str = "replica";

/// Name of the data volume claim template
pub const DATA_VOLUME_NAME: &str = "pgdata";

/// Volume mode the API server fills in for claims that set none
pub const FILESYSTEM_VOLUME_MODE: &str = "Filesystem";

/// Database container name
pub const POSTGRES_CONTAINER: &str = "postgres";

pub const POSTGRES_PORT: i32 = 5432;
pub const PATRONI_PORT: i32 = 8008;

/// Generate an owner reference for a PostgresCluster
pub fn owner_reference(cluster: &PostgresCluster) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: cluster.name_any(),
        uid: cluster.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Labels for all resources belonging to a cluster
pub fn standard_labels(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            APPLICATION_LABEL.to_string(),
            APPLICATION_NAME.to_string(),
        ),
        (CLUSTER_NAME_LABEL.to_string(), cluster_name.to_string()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
    ])
}

/// Selector labels matching the cluster's pods
pub fn selector_labels(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            APPLICATION_LABEL.to_string(),
            APPLICATION_NAME.to_string(),
        ),
        (CLUSTER_NAME_LABEL.to_string(), cluster_name.to_string()),
    ])
}

/// Label selector string for list calls
pub fn label_selector(cluster_name: &str) -> String {
    selector_labels(cluster_name)
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Name of the credentials secret of one role
pub fn credentials_secret_name(username: &str, cluster_name: &str) -> String {
    format!(
        "{}.{}.credentials",
        username.replace('_', "-"),
        cluster_name
    )
}

/// Name of the n-th pod of a cluster's stateful set
pub fn pod_name(cluster_name: &str, ordinal: i32) -> String {
    format!("{}-{}", cluster_name, ordinal)
}
