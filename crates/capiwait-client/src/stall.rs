//! Progress detection between two snapshots
//!
//! Conditions are compared by `lastTransitionTime`, not by status.
//!
//! Every detector answers `false` when it cannot compare: either snapshot
//! carries a retrieval error, or the previous one lacks the watched objects.

use capiwait_common::kube_utils::{CONDITION_CONTROL_PLANE_READY, CONDITION_READY};

use crate::capi::HasConditions;
use crate::status::ClusterStatusInfo;

fn comparable(prev: &ClusterStatusInfo, curr: &ClusterStatusInfo) -> bool {
    prev.retrieval_error.is_none() && curr.retrieval_error.is_none() && !prev.is_zero()
}

fn cluster_condition_moved(prev: &ClusterStatusInfo, curr: &ClusterStatusInfo, type_: &str) -> bool {
    if !comparable(prev, curr) {
        return false;
    }
    match (&prev.cluster, &curr.cluster) {
        (Some(p), Some(c)) => p.last_transition_time(type_) != c.last_transition_time(type_),
        _ => false,
    }
}

/// The cluster's Ready condition transitioned
pub fn cluster_state_changed(prev: &ClusterStatusInfo, curr: &ClusterStatusInfo) -> bool {
    cluster_condition_moved(prev, curr, CONDITION_READY)
}

/// The cluster's ControlPlaneReady condition transitioned
pub fn control_plane_state_changed(prev: &ClusterStatusInfo, curr: &ClusterStatusInfo) -> bool {
    cluster_condition_moved(prev, curr, CONDITION_CONTROL_PLANE_READY)
}

/// Worker pools or worker machines moved
///
/// True when a pool present in both snapshots changed replica counts, the
/// number of worker machines changed, or a `name-phase` key appeared.
pub fn workers_state_changed(prev: &ClusterStatusInfo, curr: &ClusterStatusInfo) -> bool {
    if !comparable(prev, curr)
        || prev.machine_deployments.is_empty()
        || curr.machine_deployments.is_empty()
        || prev.worker_machines.is_empty()
        || curr.worker_machines.is_empty()
    {
        return false;
    }

    if prev.worker_machines.len() != curr.worker_machines.len() {
        return true;
    }

    let pool_moved = curr.machine_deployments.iter().any(|c| {
        prev.machine_deployments
            .iter()
            .find(|p| p.name() == c.name())
            .is_some_and(|p| {
                let (p, c) = (p.replicas(), c.replicas());
                p.current != c.current || p.ready != c.ready || p.updated != c.updated
            })
    });
    if pool_moved {
        return true;
    }

    curr.worker_machines
        .keys()
        .any(|key| !prev.worker_machines.contains_key(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};
    use rstest::rstest;

    use capiwait_common::{AggregateError, Error};

    use crate::capi::{Machine, MachineDeployment};
    use crate::status::partition_machines;
    use crate::testing::{cluster_builder, machine_builder, machine_deployment_builder};

    fn snapshot_with_ready_at(minute: u32) -> ClusterStatusInfo {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap();
        ClusterStatusInfo {
            cluster: Some(
                cluster_builder("prod")
                    .ready_transition(false, at)
                    .control_plane_transition(false, at)
                    .build(),
            ),
            ..Default::default()
        }
    }

    fn failed_retrieval() -> Option<AggregateError> {
        AggregateError::from_iter([Error::not_ready("fake-error")]).into_option()
    }

    fn worker_snapshot(mds: Vec<MachineDeployment>, machines: Vec<Machine>) -> ClusterStatusInfo {
        let (control_plane_machines, worker_machines) = partition_machines(machines);
        ClusterStatusInfo {
            cluster: Some(cluster_builder("prod").build()),
            control_plane_machines,
            worker_machines,
            machine_deployments: mds,
            ..Default::default()
        }
    }

    fn pool(current: i32, ready: i32, updated: i32) -> MachineDeployment {
        machine_deployment_builder("prod", "prod-md-0")
            .replicas(2, current, ready, updated)
            .build()
    }

    fn worker(name: &str, phase: &str) -> Machine {
        machine_builder("prod", name).phase(phase).build()
    }

    #[test]
    fn equal_transition_times_are_unchanged() {
        assert!(!cluster_state_changed(&snapshot_with_ready_at(5), &snapshot_with_ready_at(5)));
        assert!(!control_plane_state_changed(&snapshot_with_ready_at(5), &snapshot_with_ready_at(5)));
    }

    #[test]
    fn different_transition_times_are_changed() {
        assert!(cluster_state_changed(&snapshot_with_ready_at(5), &snapshot_with_ready_at(6)));
        assert!(control_plane_state_changed(&snapshot_with_ready_at(5), &snapshot_with_ready_at(6)));
    }

    #[test]
    fn zero_previous_snapshot_is_unchanged() {
        let zero = ClusterStatusInfo::default();
        let curr = snapshot_with_ready_at(6);
        assert!(!cluster_state_changed(&zero, &curr));
        assert!(!control_plane_state_changed(&zero, &curr));
        assert!(!workers_state_changed(&zero, &curr));
    }

    #[rstest]
    #[case::previous_failed(true, false)]
    #[case::current_failed(false, true)]
    #[case::both_failed(true, true)]
    fn retrieval_errors_are_unchanged(#[case] prev_failed: bool, #[case] curr_failed: bool) {
        let mut prev = snapshot_with_ready_at(5);
        let mut curr = snapshot_with_ready_at(6);
        if prev_failed {
            prev.retrieval_error = failed_retrieval();
        }
        if curr_failed {
            curr.retrieval_error = failed_retrieval();
        }
        assert!(!cluster_state_changed(&prev, &curr));
        assert!(!control_plane_state_changed(&prev, &curr));

        let mut prev = worker_snapshot(vec![pool(1, 1, 1)], vec![worker("w0", "Running")]);
        let mut curr = worker_snapshot(vec![pool(2, 1, 1)], vec![worker("w1", "Provisioning")]);
        if prev_failed {
            prev.retrieval_error = failed_retrieval();
        }
        if curr_failed {
            curr.retrieval_error = failed_retrieval();
        }
        assert!(!workers_state_changed(&prev, &curr));
    }

    #[rstest]
    #[case::same((1, 1, 1), (1, 1, 1), false)]
    #[case::replicas((1, 1, 1), (2, 1, 1), true)]
    #[case::ready((2, 1, 1), (2, 2, 1), true)]
    #[case::updated((2, 2, 1), (2, 2, 2), true)]
    fn pool_counts_drive_worker_changes(
        #[case] before: (i32, i32, i32),
        #[case] after: (i32, i32, i32),
        #[case] expected: bool,
    ) {
        let machines = || vec![worker("w0", "Running")];
        let prev = worker_snapshot(vec![pool(before.0, before.1, before.2)], machines());
        let curr = worker_snapshot(vec![pool(after.0, after.1, after.2)], machines());
        assert_eq!(workers_state_changed(&prev, &curr), expected);
    }

    #[test]
    fn machine_phase_change_shows_up_as_new_key() {
        let prev = worker_snapshot(vec![pool(1, 1, 1)], vec![worker("w0", "Provisioning")]);
        let curr = worker_snapshot(vec![pool(1, 1, 1)], vec![worker("w0", "Running")]);
        assert!(workers_state_changed(&prev, &curr));
    }

    #[test]
    fn machine_count_change_is_detected() {
        let prev = worker_snapshot(vec![pool(1, 1, 1)], vec![worker("w0", "Running")]);
        let curr = worker_snapshot(
            vec![pool(1, 1, 1)],
            vec![worker("w0", "Running"), worker("w1", "Pending")],
        );
        assert!(workers_state_changed(&prev, &curr));
    }

    #[test]
    fn identical_worker_sets_are_unchanged() {
        let prev = worker_snapshot(
            vec![pool(1, 1, 1)],
            vec![worker("w0", "Running"), worker("w1", "Running")],
        );
        let curr = worker_snapshot(
            vec![pool(1, 1, 1)],
            vec![worker("w0", "Running"), worker("w1", "Running")],
        );
        assert!(!workers_state_changed(&prev, &curr));
    }

    #[test]
    fn pools_only_compared_by_name() {
        let prev = worker_snapshot(vec![pool(1, 1, 1)], vec![worker("w0", "Running")]);
        let other = machine_deployment_builder("prod", "prod-md-1")
            .replicas(2, 2, 0, 0)
            .build();
        let curr = worker_snapshot(vec![pool(1, 1, 1), other], vec![worker("w0", "Running")]);
        assert!(!workers_state_changed(&prev, &curr));
    }

    #[test]
    fn no_workers_means_unknown() {
        let prev = worker_snapshot(vec![pool(1, 1, 1)], vec![]);
        let curr = worker_snapshot(vec![pool(2, 2, 2)], vec![worker("w0", "Running")]);
        assert!(!workers_state_changed(&prev, &curr));
    }
}
