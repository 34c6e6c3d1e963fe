//! Unit tests for live vs desired comparison

use std::collections::BTreeMap;

use crate::common::*;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Container, PersistentVolumeClaimStatus, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use spilo_operator::cluster::compare::{
    CompareOutcome, CompareResult, Remediation, compare_resources, compare_service,
    compare_statefulset, compare_volume,
};
use spilo_operator::crd::VolumeSpec;
use spilo_operator::resources::service::generate_service;
use spilo_operator::resources::statefulset::generate_statefulset;

fn desired_statefulset(builder: PostgresClusterBuilder) -> StatefulSet {
    let cluster = builder.build();
    generate_statefulset(&cluster, &cluster.spec, &test_config())
}

fn base() -> PostgresClusterBuilder {
    PostgresClusterBuilder::new("acid-test", "default")
        .with_instances(2)
        .with_volume("10Gi", Some("standard"))
        .with_resources(("100m", "1Gi"), None)
}

fn compared(live: &StatefulSet, desired: &StatefulSet) -> CompareResult {
    match compare_statefulset(live, desired) {
        CompareOutcome::Compared(result) => result,
        CompareOutcome::NoLiveContainers => panic!("live statefulset has containers"),
    }
}

fn first_container(sts: &mut StatefulSet) -> &mut Container {
    &mut sts
        .spec
        .as_mut()
        .unwrap()
        .template
        .spec
        .as_mut()
        .unwrap()
        .containers[0]
}

/// Fill in what the API server sets on a stored stateful set
fn with_api_defaults(mut sts: StatefulSet) -> StatefulSet {
    let spec = sts.spec.as_mut().unwrap();
    for claim in spec.volume_claim_templates.iter_mut().flatten() {
        claim.status = Some(PersistentVolumeClaimStatus {
            phase: Some("Pending".to_string()),
            ..Default::default()
        });
        let claim_spec = claim.spec.as_mut().unwrap();
        claim_spec.volume_mode = Some("Filesystem".to_string());
        let requests = claim_spec
            .resources
            .as_mut()
            .unwrap()
            .requests
            .as_mut()
            .unwrap();
        requests.insert("storage".to_string(), Quantity("10240Mi".to_string()));
    }
    let container = &mut spec.template.spec.as_mut().unwrap().containers[0];
    container.termination_message_path = Some("/dev/termination-log".to_string());
    container.termination_message_policy = Some("File".to_string());
    sts
}

mod statefulset_tests {
    use super::*;

    #[test]
    fn test_identical_statefulsets_match() {
        let sts = desired_statefulset(base());
        let result = compared(&sts, &sts.clone());
        assert!(result.matched);
        assert!(!result.replace);
        assert!(!result.rolling_update);
        assert!(result.reasons.is_empty());
        assert_eq!(result.remediation(), Remediation::None);
    }

    #[test]
    fn test_server_defaults_match_generated() {
        let desired = desired_statefulset(base());
        let live = with_api_defaults(desired.clone());

        let result = compared(&live, &desired);
        assert!(result.matched, "unexpected mismatch: {:?}", result.reasons);
        assert_eq!(result.remediation(), Remediation::None);
    }

    #[test]
    fn test_missing_volume_mode_means_filesystem() {
        let live = with_api_defaults(desired_statefulset(base()));
        let mut desired = desired_statefulset(base());
        desired.spec.as_mut().unwrap().volume_claim_templates.as_mut().unwrap()[0]
            .spec
            .as_mut()
            .unwrap()
            .volume_mode = None;

        assert!(compared(&live, &desired).matched);
    }

    #[test]
    fn test_replica_change_on_stored_set_is_plain_update() {
        let live = with_api_defaults(desired_statefulset(base()));
        let desired = desired_statefulset(base().with_instances(3));

        let result = compared(&live, &desired);
        assert!(!result.replace);
        assert_eq!(result.remediation(), Remediation::Update);
    }

    #[test]
    fn test_volume_size_change_needs_replace() {
        let live = with_api_defaults(desired_statefulset(base()));
        let desired = desired_statefulset(base().with_volume("20Gi", Some("standard")));

        let result = compared(&live, &desired);
        assert!(result.replace);
        assert!(!result.rolling_update);
    }

    #[test]
    fn test_replica_change_is_plain_update() {
        let live = desired_statefulset(base());
        let desired = desired_statefulset(base().with_instances(3));

        let result = compared(&live, &desired);
        assert!(!result.matched);
        assert!(!result.replace);
        assert!(!result.rolling_update);
        assert_eq!(result.remediation(), Remediation::Update);
    }

    #[test]
    fn test_image_change_needs_rolling_update() {
        let live = desired_statefulset(base());
        let desired = desired_statefulset(base().with_image("registry.local/spilo:next"));

        let result = compared(&live, &desired);
        assert!(result.rolling_update);
        assert!(!result.replace);
        assert_eq!(result.remediation(), Remediation::UpdateAndRestart);
        assert!(result.reasons.iter().any(|r| r.contains("container image")));
    }

    #[test]
    fn test_env_change_needs_rolling_update() {
        let live = desired_statefulset(base());
        let desired = desired_statefulset(base().with_param("max_connections", "300"));

        let result = compared(&live, &desired);
        assert!(result.rolling_update);
        assert!(result.reasons.iter().any(|r| r.contains("environment")));
    }

    #[test]
    fn test_equivalent_resources_match() {
        let live = desired_statefulset(base().with_resources(("0.1", "1024Mi"), None));
        let desired = desired_statefulset(base());

        assert!(compared(&live, &desired).matched);
    }

    #[test]
    fn test_resource_change_needs_rolling_update() {
        let live = desired_statefulset(base());
        let desired = desired_statefulset(base().with_resources(("200m", "1Gi"), None));

        let result = compared(&live, &desired);
        assert!(result.rolling_update);
        assert!(!result.replace);
    }

    #[test]
    fn test_volume_template_change_needs_replace() {
        let live = desired_statefulset(base());
        let desired = desired_statefulset(base().with_volume("10Gi", Some("gp3")));

        let result = compared(&live, &desired);
        assert!(result.replace);
        assert!(!result.rolling_update);
        assert_eq!(result.remediation(), Remediation::Replace);
    }

    #[test]
    fn test_grace_period_change_needs_replace_and_restart() {
        let live = desired_statefulset(base());
        let mut desired = live.clone();
        desired
            .spec
            .as_mut()
            .unwrap()
            .template
            .spec
            .as_mut()
            .unwrap()
            .termination_grace_period_seconds = Some(30);

        let result = compared(&live, &desired);
        assert!(result.replace);
        assert!(result.rolling_update);
        assert_eq!(result.remediation(), Remediation::ReplaceAndRestart);
    }

    #[test]
    fn test_template_annotations_need_replace_and_restart() {
        let live = desired_statefulset(base());
        let mut desired = live.clone();
        desired
            .spec
            .as_mut()
            .unwrap()
            .template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations = Some(BTreeMap::from([(
            "checksum/config".to_string(),
            "abc".to_string(),
        )]));

        let result = compared(&live, &desired);
        assert!(result.replace);
        assert!(result.rolling_update);
        assert_eq!(result.reasons.len(), 1);
    }

    #[test]
    fn test_empty_annotations_equal_absent() {
        let live = desired_statefulset(base());
        let mut desired = live.clone();
        desired
            .spec
            .as_mut()
            .unwrap()
            .template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations = Some(BTreeMap::new());

        assert!(compared(&live, &desired).matched);
    }

    #[test]
    fn test_every_mismatch_is_reported() {
        let live = desired_statefulset(base());
        let desired = desired_statefulset(
            base()
                .with_instances(5)
                .with_image("registry.local/spilo:next")
                .with_volume("10Gi", Some("gp3")),
        );

        let result = compared(&live, &desired);
        assert!(result.replace);
        assert!(result.rolling_update);
        assert_eq!(result.reasons.len(), 3);
    }

    #[test]
    fn test_live_without_containers() {
        let desired = desired_statefulset(base());
        let mut live = desired.clone();
        live.spec
            .as_mut()
            .unwrap()
            .template
            .spec
            .as_mut()
            .unwrap()
            .containers
            .clear();

        let outcome = compare_statefulset(&live, &desired);
        assert_eq!(outcome, CompareOutcome::NoLiveContainers);
        let result = outcome.result();
        assert!(!result.matched);
        assert!(!result.replace);
        assert!(!result.rolling_update);
    }

    #[test]
    fn test_container_ports_change_needs_rolling_update() {
        let live = desired_statefulset(base());
        let mut desired = live.clone();
        first_container(&mut desired).ports = None;

        let result = compared(&live, &desired);
        assert!(result.rolling_update);
    }
}

mod service_tests {
    use super::*;

    #[test]
    fn test_same_source_ranges_match() {
        let cluster = base().build();
        let ranges = vec!["10.0.0.0/8".to_string()];
        let result = compare_service(
            &generate_service(&cluster, &ranges),
            &generate_service(&cluster, &ranges),
        );
        assert!(result.matched);
    }

    #[test]
    fn test_changed_source_ranges_mismatch() {
        let cluster = base().build();
        let result = compare_service(
            &generate_service(&cluster, &[]),
            &generate_service(&cluster, &["10.0.0.0/8".to_string()]),
        );
        assert!(!result.matched);
        assert!(!result.replace);
        assert_eq!(result.reasons.len(), 1);
    }
}

mod volume_tests {
    use super::*;

    fn volume(size: &str, storage_class: Option<&str>) -> VolumeSpec {
        VolumeSpec {
            size: size.to_string(),
            storage_class: storage_class.map(String::from),
        }
    }

    #[test]
    fn test_volume_comparison() {
        assert!(compare_volume(&volume("10Gi", None), &volume("10Gi", None)).matched);
        assert!(!compare_volume(&volume("10Gi", None), &volume("20Gi", None)).matched);
        assert!(!compare_volume(&volume("10Gi", None), &volume("10Gi", Some("gp3"))).matched);
    }
}

mod resources_tests {
    use super::*;

    fn requirements(
        requests: &[(&str, &str)],
        limits: &[(&str, &str)],
    ) -> ResourceRequirements {
        let to_map = |entries: &[(&str, &str)]| {
            Some(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
                    .collect::<BTreeMap<_, _>>(),
            )
        };
        ResourceRequirements {
            requests: to_map(requests),
            limits: to_map(limits),
            ..Default::default()
        }
    }

    #[test]
    fn test_equal_by_value() {
        let a = requirements(&[("cpu", "1"), ("memory", "1Gi")], &[]);
        let b = requirements(&[("cpu", "1000m"), ("memory", "1024Mi")], &[]);
        assert!(compare_resources(Some(&a), Some(&b)));
    }

    #[test]
    fn test_missing_key_counts_as_zero() {
        let a = requirements(&[("cpu", "1"), ("memory", "0")], &[]);
        let b = requirements(&[("cpu", "1")], &[]);
        assert!(compare_resources(Some(&a), Some(&b)));

        let c = requirements(&[("cpu", "1"), ("memory", "1Gi")], &[]);
        assert!(!compare_resources(Some(&c), Some(&b)));
    }

    #[test]
    fn test_absent_side() {
        assert!(compare_resources(None, None));

        let empty = requirements(&[], &[("cpu", "1")]);
        assert!(compare_resources(Some(&empty), None));

        let set = requirements(&[("cpu", "1")], &[]);
        assert!(!compare_resources(Some(&set), None));
        assert!(!compare_resources(None, Some(&set)));
    }

    #[test]
    fn test_limits_are_compared() {
        let a = requirements(&[("cpu", "1")], &[("memory", "2Gi")]);
        let b = requirements(&[("cpu", "1")], &[("memory", "4Gi")]);
        assert!(!compare_resources(Some(&a), Some(&b)));
    }
}
