//! Test fixtures and builders for PostgresCluster resources
//!
//! ```rust,ignore
//! let cluster = create_test_cluster("acid-test", "default", 2);
//!
//! let cluster = PostgresClusterBuilder::new("acid-test", "default")
//!     .with_instances(3)
//!     .with_user("app", &["createdb"])
//!     .with_allowed_source_ranges(&["10.0.0.0/8"])
//!     .build();
//! ```

use std::collections::BTreeMap;

use kube::core::ObjectMeta;
use spilo_operator::OperatorConfig;
use spilo_operator::crd::{
    ClusterStatus, PostgresCluster, PostgresClusterSpec, PostgresqlSpec, ResourceList,
    ResourceRequirements, VolumeSpec,
};

/// Create a cluster with a 10Gi volume and no users
pub fn create_test_cluster(name: &str, namespace: &str, instances: i32) -> PostgresCluster {
    PostgresClusterBuilder::new(name, namespace)
        .with_instances(instances)
        .with_volume("10Gi", Some("standard"))
        .with_uid("test-uid-12345")
        .build()
}

/// Operator configuration with every default
pub fn test_config() -> OperatorConfig {
    OperatorConfig::default()
}

/// Builder for PostgresCluster test resources
pub struct PostgresClusterBuilder {
    name: String,
    namespace: String,
    uid: Option<String>,
    generation: Option<i64>,
    spec: PostgresClusterSpec,
    status: Option<ClusterStatus>,
}

impl PostgresClusterBuilder {
    /// Single-instance cluster of team `acid` on version 16
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            uid: None,
            generation: Some(1),
            spec: PostgresClusterSpec {
                team_id: "acid".to_string(),
                number_of_instances: 1,
                docker_image: None,
                resources: None,
                env: BTreeMap::new(),
                volume: VolumeSpec {
                    size: "1Gi".to_string(),
                    storage_class: None,
                },
                allowed_source_ranges: Vec::new(),
                users: BTreeMap::new(),
                postgresql: PostgresqlSpec {
                    version: "16".to_string(),
                    parameters: BTreeMap::new(),
                },
            },
            status: None,
        }
    }

    pub fn with_uid(mut self, uid: &str) -> Self {
        self.uid = Some(uid.to_string());
        self
    }

    pub fn with_generation(mut self, generation: i64) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn with_team(mut self, team: &str) -> Self {
        self.spec.team_id = team.to_string();
        self
    }

    pub fn with_instances(mut self, instances: i32) -> Self {
        self.spec.number_of_instances = instances;
        self
    }

    pub fn with_volume(mut self, size: &str, storage_class: Option<&str>) -> Self {
        self.spec.volume = VolumeSpec {
            size: size.to_string(),
            storage_class: storage_class.map(String::from),
        };
        self
    }

    pub fn with_image(mut self, image: &str) -> Self {
        self.spec.docker_image = Some(image.to_string());
        self
    }

    /// Set requests and, optionally, limits as `(cpu, memory)` pairs
    pub fn with_resources(mut self, requests: (&str, &str), limits: Option<(&str, &str)>) -> Self {
        let list = |(cpu, memory): (&str, &str)| ResourceList {
            cpu: Some(cpu.to_string()),
            memory: Some(memory.to_string()),
        };
        self.spec.resources = Some(ResourceRequirements {
            requests: Some(list(requests)),
            limits: limits.map(list),
        });
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.spec.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_allowed_source_ranges(mut self, ranges: &[&str]) -> Self {
        self.spec.allowed_source_ranges = ranges.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn with_user(mut self, name: &str, flags: &[&str]) -> Self {
        self.spec.users.insert(
            name.to_string(),
            flags.iter().map(|f| f.to_string()).collect(),
        );
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.spec.postgresql.version = version.to_string();
        self
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.spec
            .postgresql
            .parameters
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_status(mut self, status: ClusterStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn build(self) -> PostgresCluster {
        PostgresCluster {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                uid: self.uid,
                generation: self.generation,
                ..Default::default()
            },
            spec: self.spec,
            status: self.status,
        }
    }
}
