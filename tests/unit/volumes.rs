//! Unit tests for volume resize helpers

use k8s_openapi::api::core::v1::{
    AWSElasticBlockStoreVolumeSource, CSIPersistentVolumeSource, ObjectReference,
    PersistentVolume, PersistentVolumeSpec,
};
use kube::api::ObjectMeta;
use spilo_operator::NamespacedName;
use spilo_operator::cluster::volumes::{check_resize_output, pod_name_from_volume, volume_id};

fn ebs_volume(claim: Option<&str>, volume_id: &str) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some("pv-1".to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            claim_ref: claim.map(|name| ObjectReference {
                name: Some(name.to_string()),
                namespace: Some("team-a".to_string()),
                ..Default::default()
            }),
            aws_elastic_block_store: Some(AWSElasticBlockStoreVolumeSource {
                volume_id: volume_id.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

mod resize_output_tests {
    use super::*;

    #[test]
    fn test_nothing_to_do() {
        assert!(check_resize_output("resize2fs 1.45.5 (07-Jan-2020)\nNothing to do!").is_ok());
    }

    #[test]
    fn test_online_resize_needs_both_lines() {
        let grown = "Filesystem at /dev/nvme1n1 is mounted on /home/postgres/pgdata; on-line resizing required\n\
            The filesystem on /dev/nvme1n1 is now 2621440 (4k) blocks long.\n";
        assert!(check_resize_output(grown).is_ok());

        let no_marker = "The filesystem on /dev/nvme1n1 is now 2621440 (4k) blocks long.\n";
        assert!(check_resize_output(no_marker).is_err());
    }

    #[test]
    fn test_errors_are_unrecognized() {
        let err = check_resize_output("resize2fs: Permission denied to resize filesystem")
            .unwrap_err();
        assert!(err.to_string().contains("Permission denied"));
    }
}

mod volume_id_tests {
    use super::*;

    #[test]
    fn test_ebs_uri() {
        let volume = ebs_volume(Some("pgdata-acid-test-0"), "aws://us-east-1a/vol-0abc");
        assert_eq!(volume_id(&volume).unwrap(), "vol-0abc");
    }

    #[test]
    fn test_csi_handle_must_be_an_ebs_id() {
        let mut volume = ebs_volume(Some("pgdata-acid-test-0"), "");
        let spec = volume.spec.as_mut().unwrap();
        spec.aws_elastic_block_store = None;
        spec.csi = Some(CSIPersistentVolumeSource {
            driver: "pd.csi.storage.gke.io".to_string(),
            volume_handle: "projects/p/zones/z/disks/d".to_string(),
            ..Default::default()
        });
        assert!(volume_id(&volume).is_err());
    }

    #[test]
    fn test_volume_without_spec() {
        assert!(volume_id(&PersistentVolume::default()).is_err());
    }
}

mod pod_name_tests {
    use super::*;

    #[test]
    fn test_pod_from_claim() {
        let volume = ebs_volume(Some("pgdata-acid-test-2"), "aws://us-east-1a/vol-0abc");
        assert_eq!(
            pod_name_from_volume(&volume).unwrap(),
            NamespacedName::new("team-a", "acid-test-2")
        );
    }

    #[test]
    fn test_claim_must_be_a_data_claim() {
        for claim in [None, Some("pgdata"), Some("pgdata-"), Some("wal-acid-test-0")] {
            let volume = ebs_volume(claim, "aws://us-east-1a/vol-0abc");
            assert!(
                pod_name_from_volume(&volume).is_err(),
                "claim {:?} should be rejected",
                claim
            );
        }
    }
}
