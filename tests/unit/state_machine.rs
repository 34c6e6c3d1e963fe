//! Unit tests for cluster status transitions

use spilo_operator::controller::state_machine::{
    ClusterEvent, find_transition, is_valid_transition, valid_targets,
};
use spilo_operator::crd::ClusterStatus;

const ALL_STATUSES: [ClusterStatus; 5] = [
    ClusterStatus::Creating,
    ClusterStatus::Running,
    ClusterStatus::Updating,
    ClusterStatus::AddFailed,
    ClusterStatus::UpdateFailed,
];

mod create_tests {
    use super::*;

    #[test]
    fn test_new_resource_can_only_start_creating() {
        assert_eq!(valid_targets(None), vec![ClusterStatus::Creating]);
        assert_eq!(
            find_transition(None, ClusterStatus::Creating).map(|t| t.event),
            Some(ClusterEvent::CreateStarted)
        );
    }

    #[test]
    fn test_creating_ends_running_or_failed() {
        let mut targets = valid_targets(Some(ClusterStatus::Creating));
        targets.sort_by_key(|s| s.to_string());
        assert_eq!(
            targets,
            vec![ClusterStatus::AddFailed, ClusterStatus::Running]
        );
    }

    #[test]
    fn test_failed_create_can_be_retried() {
        assert_eq!(
            valid_targets(Some(ClusterStatus::AddFailed)),
            vec![ClusterStatus::Creating]
        );
    }
}

mod update_tests {
    use super::*;

    #[test]
    fn test_running_can_only_start_updating() {
        assert_eq!(
            valid_targets(Some(ClusterStatus::Running)),
            vec![ClusterStatus::Updating]
        );
    }

    #[test]
    fn test_failed_update_can_be_retried() {
        let transition = find_transition(
            Some(ClusterStatus::UpdateFailed),
            ClusterStatus::Updating,
        )
        .unwrap();
        assert_eq!(transition.event, ClusterEvent::UpdateStarted);
        assert!(!transition.description.is_empty());
    }
}

mod table_tests {
    use super::*;

    #[test]
    fn test_no_self_transitions() {
        for status in ALL_STATUSES {
            assert!(
                !is_valid_transition(Some(status), status),
                "{} -> {} should not be in the table",
                status,
                status
            );
        }
    }

    #[test]
    fn test_every_status_is_reachable() {
        for status in ALL_STATUSES {
            let reachable = std::iter::once(None)
                .chain(ALL_STATUSES.into_iter().map(Some))
                .any(|from| is_valid_transition(from, status));
            assert!(reachable, "{} is unreachable", status);
        }
    }

    #[test]
    fn test_every_status_has_a_way_out() {
        for status in ALL_STATUSES {
            assert!(
                !valid_targets(Some(status)).is_empty(),
                "{} is a dead end",
                status
            );
        }
    }

    #[test]
    fn test_event_display() {
        assert_eq!(ClusterEvent::CreateSucceeded.to_string(), "CreateSucceeded");
        assert_eq!(ClusterEvent::UpdateFailed.to_string(), "UpdateFailed");
    }
}
