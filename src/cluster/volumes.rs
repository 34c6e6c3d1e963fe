//! Persistent volume resizing
//!
//! Growing a volume is a two step operation: the block device is enlarged
//! through the storage provider first, then the filesystem is grown online
//! by running `resize2fs` inside the pod that mounts it. The persistent
//! volume's recorded capacity is only updated after both succeeded.
//! Volumes are processed one at a time and the first failure stops the
//! run; volumes already resized stay resized.

use std::sync::LazyLock;

use k8s_openapi::api::core::v1::PersistentVolume;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use regex::Regex;
use tracing::{debug, info};

use super::NamespacedName;
use crate::clients::{BlockStorageProvider, KubeClient, PodExecutor};
use crate::controller::error::{Error, Result, ResultExt};
use crate::resources::common::DATA_VOLUME_NAME;
use crate::resources::quantity::{ParsedQuantity, quantity_to_gib};

static EXT_RESIZE_SUCCESS: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"The filesystem on [/a-z0-9]+ is now \d+ \(\d+\w+\) blocks long.")
        .expect("valid resize2fs pattern")
});

const STORAGE_CAPACITY: &str = "storage";

/// Resizes the volumes of one cluster
pub struct VolumeResizer<'a> {
    pub kube: &'a dyn KubeClient,
    pub storage: &'a dyn BlockStorageProvider,
    pub exec: &'a dyn PodExecutor,
    /// Data directory mount point inside the database container
    pub pgdata_path: &'a str,
}

impl VolumeResizer<'_> {
    /// Bring every volume to `desired_size`
    pub async fn resize_all(
        &self,
        volumes: Vec<PersistentVolume>,
        desired_size: &str,
    ) -> Result<()> {
        let desired_gib = quantity_to_gib(desired_size)?;

        for mut volume in volumes {
            let current_gib = current_capacity(&volume)?.as_gib()?;
            if current_gib == desired_gib {
                debug!(volume = %volume.name_any(), size_gib = current_gib, "volume already has the desired size");
                continue;
            }

            let volume_id = volume_id(&volume)?;
            let pod = pod_name_from_volume(&volume)?;

            debug!(volume = %volume.name_any(), from_gib = current_gib, to_gib = desired_gib, "resizing persistent volume");
            self.storage
                .resize_volume(&volume_id, desired_gib)
                .await
                .context(format!("could not resize block device {}", volume_id))?;

            debug!(volume = %volume.name_any(), pod = %pod, "resizing the filesystem");
            self.resize_filesystem(&pod)
                .await
                .context(format!("could not resize the filesystem on pod '{}'", pod))?;

            if let Some(spec) = volume.spec.as_mut() {
                spec.capacity
                    .get_or_insert_with(Default::default)
                    .insert(STORAGE_CAPACITY.to_string(), Quantity(desired_size.to_string()));
            }
            self.kube
                .update_persistent_volume(&volume)
                .await
                .context("could not update persistent volume")?;

            info!(volume = %volume.name_any(), size = %desired_size, "persistent volume resized");
        }

        Ok(())
    }

    async fn resize_filesystem(&self, pod: &NamespacedName) -> Result<()> {
        // resize2fs reports on stderr; fold it into stdout so the exec call does not fail on it
        let command = format!(
            "df -h {} --output=source|tail -1|xargs resize2fs 2>&1",
            self.pgdata_path
        );
        let output = self
            .exec
            .exec(pod, vec!["bash".to_string(), "-c".to_string(), command])
            .await?;

        if !output.is_empty() {
            debug!(pod = %pod, output = %output, "resize2fs output");
        }
        check_resize_output(&output)
    }
}

/// Accept only the two known successful `resize2fs` outputs
pub fn check_resize_output(output: &str) -> Result<()> {
    if output.contains("Nothing to do")
        || (output.contains("on-line resizing required") && EXT_RESIZE_SUCCESS.is_match(output))
    {
        return Ok(());
    }
    Err(Error::UnrecognizedResizeOutput(output.to_string()))
}

fn current_capacity(volume: &PersistentVolume) -> Result<ParsedQuantity> {
    match volume
        .spec
        .as_ref()
        .and_then(|s| s.capacity.as_ref())
        .and_then(|c| c.get(STORAGE_CAPACITY))
    {
        Some(quantity) => ParsedQuantity::parse(&quantity.0),
        None => Ok(ParsedQuantity::ZERO),
    }
}

/// The pod mounting a volume, derived from its `pgdata-<pod>` claim
pub fn pod_name_from_volume(volume: &PersistentVolume) -> Result<NamespacedName> {
    let invalid = |reason: &str| Error::InvalidVolume {
        volume: volume.name_any(),
        reason: reason.to_string(),
    };

    let claim = volume
        .spec
        .as_ref()
        .and_then(|s| s.claim_ref.as_ref())
        .ok_or_else(|| invalid("no claim reference"))?;
    let claim_name = claim.name.as_deref().unwrap_or_default();
    let pod = claim_name
        .strip_prefix(DATA_VOLUME_NAME)
        .and_then(|rest| rest.strip_prefix('-'))
        .filter(|pod| !pod.is_empty())
        .ok_or_else(|| invalid(&format!("claim '{}' is not a data volume claim", claim_name)))?;

    Ok(NamespacedName::new(
        claim.namespace.clone().unwrap_or_default(),
        pod,
    ))
}

/// Block device id of a volume
///
/// `aws://eu-central-1b/vol-00f93d4827217c629` becomes
/// `vol-00f93d4827217c629`. CSI volumes carry the bare id as their handle.
pub fn volume_id(volume: &PersistentVolume) -> Result<String> {
    let invalid = |reason: String| Error::InvalidVolume {
        volume: volume.name_any(),
        reason,
    };
    let spec = volume
        .spec
        .as_ref()
        .ok_or_else(|| invalid("no spec".to_string()))?;

    if let Some(ebs) = spec.aws_elastic_block_store.as_ref() {
        let id = ebs.volume_id.as_str();
        if id.is_empty() {
            return Err(invalid("volume id is empty".to_string()));
        }
        return match id.rfind("/vol-") {
            Some(index) => Ok(id[index + 1..].to_string()),
            None => Err(invalid(format!("malformed EBS volume id {}", id))),
        };
    }

    if let Some(csi) = spec.csi.as_ref()
        && csi.volume_handle.starts_with("vol-")
    {
        return Ok(csi.volume_handle.clone());
    }

    Err(invalid("volume is not backed by EBS".to_string()))
}
