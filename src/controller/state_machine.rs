//! Transition table for the persisted cluster status
//!
//! The lifecycle driver sets the status at fixed points of Create and
//! Update. Status is informational, so a transition missing from the table
//! is reported but not refused.

use std::fmt;

use crate::crd::ClusterStatus;

/// Lifecycle events that move the status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterEvent {
    /// Create started
    CreateStarted,
    /// Create finished every step
    CreateSucceeded,
    /// A Create step failed
    CreateFailed,
    /// Update started
    UpdateStarted,
    /// Update finished every step
    UpdateSucceeded,
    /// An Update step failed
    UpdateFailed,
}

impl fmt::Display for ClusterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterEvent::CreateStarted => write!(f, "CreateStarted"),
            ClusterEvent::CreateSucceeded => write!(f, "CreateSucceeded"),
            ClusterEvent::CreateFailed => write!(f, "CreateFailed"),
            ClusterEvent::UpdateStarted => write!(f, "UpdateStarted"),
            ClusterEvent::UpdateSucceeded => write!(f, "UpdateSucceeded"),
            ClusterEvent::UpdateFailed => write!(f, "UpdateFailed"),
        }
    }
}

/// A permitted status change
#[derive(Debug)]
pub struct Transition {
    /// Source status; `None` for a resource that never had one
    pub from: Option<ClusterStatus>,
    pub to: ClusterStatus,
    pub event: ClusterEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: Option<ClusterStatus>,
        to: ClusterStatus,
        event: ClusterEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

const TRANSITIONS: [Transition; 8] = [
    Transition::new(
        None,
        ClusterStatus::Creating,
        ClusterEvent::CreateStarted,
        "Starting cluster creation",
    ),
    Transition::new(
        Some(ClusterStatus::AddFailed),
        ClusterStatus::Creating,
        ClusterEvent::CreateStarted,
        "Retrying cluster creation",
    ),
    Transition::new(
        Some(ClusterStatus::Creating),
        ClusterStatus::Running,
        ClusterEvent::CreateSucceeded,
        "Cluster created, pods are ready",
    ),
    Transition::new(
        Some(ClusterStatus::Creating),
        ClusterStatus::AddFailed,
        ClusterEvent::CreateFailed,
        "Error during cluster creation",
    ),
    Transition::new(
        Some(ClusterStatus::Running),
        ClusterStatus::Updating,
        ClusterEvent::UpdateStarted,
        "Cluster spec changed, starting update",
    ),
    Transition::new(
        Some(ClusterStatus::UpdateFailed),
        ClusterStatus::Updating,
        ClusterEvent::UpdateStarted,
        "Retrying failed update",
    ),
    Transition::new(
        Some(ClusterStatus::Updating),
        ClusterStatus::Running,
        ClusterEvent::UpdateSucceeded,
        "Update completed, cluster is running",
    ),
    Transition::new(
        Some(ClusterStatus::Updating),
        ClusterStatus::UpdateFailed,
        ClusterEvent::UpdateFailed,
        "Error during update",
    ),
];

/// Look up the transition from `from` to `to`
pub fn find_transition(
    from: Option<ClusterStatus>,
    to: ClusterStatus,
) -> Option<&'static Transition> {
    TRANSITIONS.iter().find(|t| t.from == from && t.to == to)
}

/// Check whether a status change is in the table
pub fn is_valid_transition(from: Option<ClusterStatus>, to: ClusterStatus) -> bool {
    find_transition(from, to).is_some()
}

/// Statuses reachable from `from`
pub fn valid_targets(from: Option<ClusterStatus>) -> Vec<ClusterStatus> {
    TRANSITIONS
        .iter()
        .filter(|t| t.from == from)
        .map(|t| t.to)
        .collect()
}
