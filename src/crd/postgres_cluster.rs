use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// PostgresCluster describes one Spilo-based PostgreSQL cluster
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "spilo.smoketurner.com",
    version = "v1",
    kind = "PostgresCluster",
    plural = "postgresclusters",
    shortname = "pg",
    namespaced,
    status = "ClusterStatus",
    printcolumn = r#"{"name":"Team", "type":"string", "jsonPath":".spec.teamId"}"#,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.postgresql.version"}"#,
    printcolumn = r#"{"name":"Instances", "type":"integer", "jsonPath":".spec.numberOfInstances"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PostgresClusterSpec {
    /// Team owning the cluster; its members become human database roles
    pub team_id: String,

    /// Number of pods in the stateful set
    #[serde(default = "default_instances")]
    pub number_of_instances: i32,

    /// Container image override (operator default when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_image: Option<String>,

    /// Resource requests and limits for the database container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Extra environment variables for the database container
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Data volume
    pub volume: VolumeSpec,

    /// CIDR ranges allowed to reach the load balancer
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_source_ranges: Vec<String>,

    /// Robot users: username -> requested role flags
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub users: BTreeMap<String, Vec<String>>,

    /// Database engine settings
    pub postgresql: PostgresqlSpec,
}

fn default_instances() -> i32 {
    1
}

/// Data volume of every cluster member
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Size of the volume (e.g. "10Gi")
    pub size: String,

    /// Storage class (cluster default if absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

/// Engine version and server parameters
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PostgresqlSpec {
    /// Major version (e.g. "16")
    pub version: String,

    /// postgresql.conf parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

/// Resource requirements for the database container
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceList>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceList>,
}

/// CPU and memory quantities
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ResourceList {
    /// CPU quantity (e.g., "500m", "2")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    /// Memory quantity (e.g., "512Mi", "2Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Lifecycle status persisted in the resource's `status` field
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub enum ClusterStatus {
    Creating,
    Running,
    Updating,
    AddFailed,
    UpdateFailed,
}

impl std::fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterStatus::Creating => write!(f, "Creating"),
            ClusterStatus::Running => write!(f, "Running"),
            ClusterStatus::Updating => write!(f, "Updating"),
            ClusterStatus::AddFailed => write!(f, "AddFailed"),
            ClusterStatus::UpdateFailed => write!(f, "UpdateFailed"),
        }
    }
}

impl PostgresClusterSpec {
    /// Same spec with the engine version replaced
    pub fn with_version(&self, version: &str) -> Self {
        let mut spec = self.clone();
        spec.postgresql.version = version.to_string();
        spec
    }
}
