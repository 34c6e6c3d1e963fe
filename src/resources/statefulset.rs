//! Stateful set generation for Spilo pods
//!
//! One stateful set per cluster, one `postgres` container per pod. Patroni
//! inside the container handles leader election through the Kubernetes API,
//! so any pod can become master.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, ResourceRequirements as K8sResources,
    SecretKeySelector, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;
use kube::core::ObjectMeta;
use serde_json::json;

use crate::config::OperatorConfig;
use crate::crd::{PostgresCluster, PostgresClusterSpec, ResourceList, ResourceRequirements};
use crate::resources::common::{
    APPLICATION_LABEL, APPLICATION_NAME, CLUSTER_NAME_LABEL, DATA_VOLUME_NAME,
    FILESYSTEM_VOLUME_MODE, PATRONI_PORT, POSTGRES_CONTAINER, POSTGRES_PORT, ROLE_LABEL,
    credentials_secret_name, owner_reference, selector_labels, standard_labels,
};
use crate::resources::secret::PASSWORD_KEY;

/// Generate the cluster's stateful set from a spec
///
/// The spec is passed separately from the resource so that Update can
/// generate the desired object for a spec that is not yet stored.
pub fn generate_statefulset(
    cluster: &PostgresCluster,
    spec: &PostgresClusterSpec,
    config: &OperatorConfig,
) -> StatefulSet {
    let name = cluster.name_any();
    let labels = standard_labels(&name);

    let image = spec
        .docker_image
        .clone()
        .unwrap_or_else(|| config.docker_image.clone());

    let container = Container {
        name: POSTGRES_CONTAINER.to_string(),
        image: Some(image),
        image_pull_policy: Some("IfNotPresent".to_string()),
        ports: Some(vec![
            ContainerPort {
                container_port: PATRONI_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                container_port: POSTGRES_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        env: Some(generate_env(&name, spec, config)),
        volume_mounts: Some(vec![VolumeMount {
            name: DATA_VOLUME_NAME.to_string(),
            mount_path: config.pgdata_path.clone(),
            ..Default::default()
        }]),
        resources: spec.resources.as_ref().map(to_k8s_resources),
        ..Default::default()
    };

    let pvc_template = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(DATA_VOLUME_NAME.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: spec.volume.storage_class.clone(),
            volume_mode: Some(FILESYSTEM_VOLUME_MODE.to_string()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(spec.volume.size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: cluster.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            service_name: Some(name.clone()),
            replicas: Some(spec.number_of_instances),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(config.pod_service_account_name.clone()),
                    termination_grace_period_seconds: Some(config.pod_termination_grace_period),
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![pvc_template]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn generate_env(name: &str, spec: &PostgresClusterSpec, config: &OperatorConfig) -> Vec<EnvVar> {
    let field_ref = |path: &str| EnvVarSource {
        field_ref: Some(ObjectFieldSelector {
            api_version: Some("v1".to_string()),
            field_path: path.to_string(),
        }),
        ..Default::default()
    };
    let secret_ref = |username: &str| EnvVarSource {
        secret_key_ref: Some(SecretKeySelector {
            name: credentials_secret_name(username, name),
            key: PASSWORD_KEY.to_string(),
            optional: Some(false),
        }),
        ..Default::default()
    };
    let value = |key: &str, value: String| EnvVar {
        name: key.to_string(),
        value: Some(value),
        ..Default::default()
    };

    let spilo_configuration = json!({
        "postgresql": {
            "parameters": spec.postgresql.parameters,
        },
    });

    let mut env = vec![
        value("SCOPE", name.to_string()),
        value("PGROOT", format!("{}/pgroot", config.pgdata_path)),
        value("PGVERSION", spec.postgresql.version.clone()),
        EnvVar {
            name: "POD_IP".to_string(),
            value_from: Some(field_ref("status.podIP")),
            ..Default::default()
        },
        EnvVar {
            name: "POD_NAMESPACE".to_string(),
            value_from: Some(field_ref("metadata.namespace")),
            ..Default::default()
        },
        value("PGUSER_SUPERUSER", config.super_username.clone()),
        EnvVar {
            name: "PGPASSWORD_SUPERUSER".to_string(),
            value_from: Some(secret_ref(&config.super_username)),
            ..Default::default()
        },
        value("PGUSER_STANDBY", config.replication_username.clone()),
        EnvVar {
            name: "PGPASSWORD_STANDBY".to_string(),
            value_from: Some(secret_ref(&config.replication_username)),
            ..Default::default()
        },
        value("DCS_ENABLE_KUBERNETES_API", "true".to_string()),
        value(
            "KUBERNETES_LABELS",
            json!({ APPLICATION_LABEL: APPLICATION_NAME }).to_string(),
        ),
        value("KUBERNETES_SCOPE_LABEL", CLUSTER_NAME_LABEL.to_string()),
        value("KUBERNETES_ROLE_LABEL", ROLE_LABEL.to_string()),
        value("SPILO_CONFIGURATION", spilo_configuration.to_string()),
    ];

    env.extend(
        spec.env
            .iter()
            .map(|(key, val)| value(key, val.clone())),
    );

    env
}

/// Convert the resource's CPU/memory settings to container resources
pub fn to_k8s_resources(resources: &ResourceRequirements) -> K8sResources {
    fn to_map(list: &ResourceList) -> BTreeMap<String, Quantity> {
        let mut map = BTreeMap::new();
        if let Some(cpu) = &list.cpu {
            map.insert("cpu".to_string(), Quantity(cpu.clone()));
        }
        if let Some(memory) = &list.memory {
            map.insert("memory".to_string(), Quantity(memory.clone()));
        }
        map
    }

    K8sResources {
        limits: resources.limits.as_ref().map(to_map),
        requests: resources.requests.as_ref().map(to_map),
        ..Default::default()
    }
}
