//! Live vs desired object comparison
//!
//! The stateful set comparison separates two remediations: `replace`
//! (delete and recreate the object) and `rolling_update` (restart the pods).
//! Both flags only ever go from false to true while fields are scanned, so
//! every field that needs a remediation gets it regardless of scan order.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, ResourceRequirements, Service,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use tracing::warn;

use crate::crd::VolumeSpec;
use crate::resources::common::FILESYSTEM_VOLUME_MODE;
use crate::resources::quantity::{ParsedQuantity, quantities_equal};

/// Outcome of comparing a live object with the desired one
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompareResult {
    pub matched: bool,
    pub replace: bool,
    pub rolling_update: bool,
    /// Every mismatch found, in scan order
    pub reasons: Vec<String>,
}

impl CompareResult {
    fn matching() -> Self {
        Self {
            matched: true,
            ..Default::default()
        }
    }

    fn mismatch(&mut self, reason: impl Into<String>) {
        self.matched = false;
        self.reasons.push(reason.into());
    }

    fn needs_rolling_update(&mut self, reason: impl Into<String>) {
        self.rolling_update = true;
        self.mismatch(reason);
    }

    fn needs_replace(&mut self, reason: impl Into<String>) {
        self.replace = true;
        self.mismatch(reason);
    }

    fn needs_replace_and_rolling_update(&mut self, reason: impl Into<String>) {
        self.replace = true;
        self.needs_rolling_update(reason);
    }

    /// Most invasive action this result asks for
    pub fn remediation(&self) -> Remediation {
        match (self.matched, self.replace, self.rolling_update) {
            (true, _, _) => Remediation::None,
            (false, true, true) => Remediation::ReplaceAndRestart,
            (false, true, false) => Remediation::Replace,
            (false, false, true) => Remediation::UpdateAndRestart,
            (false, false, false) => Remediation::Update,
        }
    }
}

/// Remediation ordered from least to most invasive
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Remediation {
    None,
    Update,
    UpdateAndRestart,
    Replace,
    ReplaceAndRestart,
}

/// Result of a stateful set comparison
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompareOutcome {
    Compared(CompareResult),
    /// The live object has no containers to compare against; nothing is
    /// known about the remediation it needs
    NoLiveContainers,
}

impl CompareOutcome {
    /// Flattened result; `NoLiveContainers` reads as a mismatch without
    /// flags or reasons
    pub fn result(&self) -> CompareResult {
        match self {
            CompareOutcome::Compared(result) => result.clone(),
            CompareOutcome::NoLiveContainers => CompareResult::default(),
        }
    }
}

/// Compare services; only the allowed source ranges are considered
pub fn compare_service(live: &Service, desired: &Service) -> CompareResult {
    let ranges = |s: &Service| {
        s.spec
            .as_ref()
            .and_then(|spec| spec.load_balancer_source_ranges.clone())
            .unwrap_or_default()
    };

    let mut result = CompareResult::matching();
    if ranges(live) != ranges(desired) {
        result.mismatch("new service's LoadBalancerSourceRange doesn't match the current one");
    }
    result
}

/// Compare volume specifications field by field
pub fn compare_volume(current: &VolumeSpec, desired: &VolumeSpec) -> CompareResult {
    let mut result = CompareResult::matching();
    if current != desired {
        result.mismatch("new volume's specification doesn't match the current one");
    }
    result
}

/// Compare the live stateful set with the desired one
pub fn compare_statefulset(live: &StatefulSet, desired: &StatefulSet) -> CompareOutcome {
    let mut result = CompareResult::matching();

    let live_spec = live.spec.clone().unwrap_or_default();
    let desired_spec = desired.spec.clone().unwrap_or_default();
    let live_pod = live_spec.template.spec.clone().unwrap_or_default();
    let desired_pod = desired_spec.template.spec.clone().unwrap_or_default();

    if live_spec.replicas != desired_spec.replicas {
        result.mismatch("new statefulset's number of replicas doesn't match the current one");
    }
    if live_pod.containers.len() != desired_pod.containers.len() {
        result.needs_rolling_update(
            "new statefulset's container specification doesn't match the current one",
        );
    }
    if live_pod.containers.is_empty() {
        warn!(statefulset = %live.name_any(), "statefulset has no container");
        return CompareOutcome::NoLiveContainers;
    }

    compare_pod_template(
        &mut result,
        &live_spec.template,
        &desired_spec.template,
        &live_pod,
        &desired_pod,
    );

    let live_claims = live_spec.volume_claim_templates.unwrap_or_default();
    let desired_claims = desired_spec.volume_claim_templates.unwrap_or_default();
    if live_claims.len() != desired_claims.len() {
        result.needs_replace(
            "new statefulset's volumeClaimTemplates contains different number of volumes to the old one",
        );
    }
    for (i, (live_claim, desired_claim)) in live_claims.iter().zip(&desired_claims).enumerate() {
        let name = live_claim.name_any();
        if name != desired_claim.name_any() {
            result.needs_replace(format!(
                "new statefulset's name for volume {} doesn't match the current one",
                i
            ));
            continue;
        }
        if non_empty(live_claim.metadata.annotations.as_ref())
            != non_empty(desired_claim.metadata.annotations.as_ref())
        {
            result.needs_replace(format!(
                "new statefulset's annotations for volume {} doesn't match the current one",
                name
            ));
        }
        if !claim_specs_equal(live_claim.spec.as_ref(), desired_claim.spec.as_ref()) {
            result.needs_replace(format!(
                "new statefulset's volumeClaimTemplates specification for volume {} doesn't match the current one",
                name
            ));
        }
    }

    if let (Some(live_container), Some(desired_container)) =
        (live_pod.containers.first(), desired_pod.containers.first())
    {
        compare_container(&mut result, live_container, desired_container);
    }

    CompareOutcome::Compared(result)
}

fn compare_pod_template(
    result: &mut CompareResult,
    live: &PodTemplateSpec,
    desired: &PodTemplateSpec,
    live_pod: &PodSpec,
    desired_pod: &PodSpec,
) {
    if live_pod.service_account_name != desired_pod.service_account_name {
        result.needs_replace_and_rolling_update(
            "new statefulset's serviceAccountName service account name doesn't match the current one",
        );
    }
    if live_pod.termination_grace_period_seconds != desired_pod.termination_grace_period_seconds {
        result.needs_replace_and_rolling_update(
            "new statefulset's terminationGracePeriodSeconds doesn't match the current one",
        );
    }
    if template_labels(live) != template_labels(desired) {
        result.needs_replace_and_rolling_update(
            "new statefulset's metadata labels doesn't match the current one",
        );
    }
    if template_annotations(live) != template_annotations(desired) {
        result.needs_replace_and_rolling_update(
            "new statefulset's metadata annotations doesn't match the current one",
        );
    }
}

fn template_labels(template: &PodTemplateSpec) -> Option<&BTreeMap<String, String>> {
    non_empty(template.metadata.as_ref().and_then(|m| m.labels.as_ref()))
}

fn template_annotations(template: &PodTemplateSpec) -> Option<&BTreeMap<String, String>> {
    non_empty(template.metadata.as_ref().and_then(|m| m.annotations.as_ref()))
}

fn compare_container(result: &mut CompareResult, live: &Container, desired: &Container) {
    if live.image != desired.image {
        result.needs_rolling_update(
            "new statefulset's container image doesn't match the current one",
        );
    }
    if live.ports.clone().unwrap_or_default() != desired.ports.clone().unwrap_or_default() {
        result.needs_rolling_update(
            "new statefulset's container ports don't match the current one",
        );
    }
    if !compare_resources(live.resources.as_ref(), desired.resources.as_ref()) {
        result.needs_rolling_update(
            "new statefulset's container resources don't match the current ones",
        );
    }
    if live.env.clone().unwrap_or_default() != desired.env.clone().unwrap_or_default() {
        result.needs_rolling_update(
            "new statefulset's container environment doesn't match the current one",
        );
    }
}

/// Compare claim specs as the API server stores them
///
/// A missing volume mode is the server's default, and storage quantities
/// come back in canonical form, so those are compared by value.
fn claim_specs_equal(
    live: Option<&PersistentVolumeClaimSpec>,
    desired: Option<&PersistentVolumeClaimSpec>,
) -> bool {
    let normalize = |spec: Option<&PersistentVolumeClaimSpec>| {
        let mut spec = spec.cloned().unwrap_or_default();
        if spec.volume_mode.is_none() {
            spec.volume_mode = Some(FILESYSTEM_VOLUME_MODE.to_string());
        }
        let resources = spec.resources.take().unwrap_or_default();
        (spec, resources)
    };
    let (live, live_resources) = normalize(live);
    let (desired, desired_resources) = normalize(desired);

    live == desired
        && quantity_maps_equal(
            live_resources.requests.as_ref(),
            desired_resources.requests.as_ref(),
        )
        && quantity_maps_equal(
            live_resources.limits.as_ref(),
            desired_resources.limits.as_ref(),
        )
}

fn quantity_maps_equal(
    a: Option<&BTreeMap<String, Quantity>>,
    b: Option<&BTreeMap<String, Quantity>>,
) -> bool {
    let (a, b) = (a.cloned().unwrap_or_default(), b.cloned().unwrap_or_default());
    a.len() == b.len()
        && a.iter().all(|(key, quantity)| {
            b.get(key)
                .is_some_and(|other| quantities_equal(&quantity.0, &other.0))
        })
}

/// Treat an absent map and an empty one alike
fn non_empty(map: Option<&BTreeMap<String, String>>) -> Option<&BTreeMap<String, String>> {
    map.filter(|m| !m.is_empty())
}

/// Compare container resource requirements
///
/// Each side present is checked against the other: every request and
/// limit it sets must have an equal quantity on the other side, where a
/// missing key counts as zero. A side that is absent, or sets no
/// requests, only equals a side without requests.
pub fn compare_resources(
    a: Option<&ResourceRequirements>,
    b: Option<&ResourceRequirements>,
) -> bool {
    let mut equal = true;
    if let Some(a) = a {
        equal = compare_resources_assume_first(a, b);
    }
    if equal && let Some(b) = b {
        equal = compare_resources_assume_first(b, a);
    }
    equal
}

fn compare_resources_assume_first(
    a: &ResourceRequirements,
    b: Option<&ResourceRequirements>,
) -> bool {
    let requests_empty =
        |r: &ResourceRequirements| r.requests.as_ref().is_none_or(|m| m.is_empty());

    let b = match b {
        Some(b) if !requests_empty(b) => b,
        _ => return requests_empty(a),
    };

    let all_equal = |own: &Option<BTreeMap<String, Quantity>>,
                     other: &Option<BTreeMap<String, Quantity>>| {
        own.iter().flatten().all(|(key, quantity)| {
            quantity_equal(quantity, other.as_ref().and_then(|m| m.get(key)))
        })
    };

    all_equal(&a.requests, &b.requests) && all_equal(&a.limits, &b.limits)
}

fn quantity_equal(quantity: &Quantity, other: Option<&Quantity>) -> bool {
    match other {
        Some(other) => quantities_equal(&quantity.0, &other.0),
        None => ParsedQuantity::parse(&quantity.0).is_ok_and(|q| q == ParsedQuantity::ZERO),
    }
}
