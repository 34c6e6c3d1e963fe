//! Persisted cluster statuses as last seen by the controller
//!
//! The status itself is written by the lifecycle driver through the
//! control-plane client; this board only mirrors what watch events carry
//! back so the fleet gauges can be published without touching cluster
//! instances that are busy.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::cluster::NamespacedName;
use crate::crd::ClusterStatus;
use crate::health::Metrics;

/// Label for resources that were never given a status
pub const UNSET_STATUS: &str = "Unset";

const ALL_STATUSES: [ClusterStatus; 5] = [
    ClusterStatus::Creating,
    ClusterStatus::Running,
    ClusterStatus::Updating,
    ClusterStatus::AddFailed,
    ClusterStatus::UpdateFailed,
];

#[derive(Debug, Default)]
pub struct StatusBoard {
    statuses: Mutex<HashMap<NamespacedName, Option<ClusterStatus>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, name: &NamespacedName, status: Option<ClusterStatus>) {
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.insert(name.clone(), status);
        }
    }

    pub fn forget(&self, name: &NamespacedName) {
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.remove(name);
        }
    }

    /// Number of clusters per status; every status is present
    pub fn counts(&self) -> BTreeMap<String, i64> {
        let mut counts: BTreeMap<String, i64> = ALL_STATUSES
            .iter()
            .map(|s| (s.to_string(), 0))
            .chain([(UNSET_STATUS.to_string(), 0)])
            .collect();

        if let Ok(statuses) = self.statuses.lock() {
            for status in statuses.values() {
                let label = status.map_or_else(|| UNSET_STATUS.to_string(), |s| s.to_string());
                *counts.entry(label).or_default() += 1;
            }
        }
        counts
    }

    pub fn publish(&self, metrics: &Metrics) {
        for (status, count) in self.counts() {
            metrics.set_clusters_by_status(&status, count);
        }
    }
}
