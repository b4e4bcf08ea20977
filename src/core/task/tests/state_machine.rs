use crate::core::task::model::SqlExecutions;
use crate::core::task::status::Status;
use crate::core::task::transition::{
    MatrixTracker, Observation, StatusTracker, can_observe, can_transition,
};

use super::{cell, sql};

#[test]
fn lifecycle_happy_path_transitions_are_allowed() {
    let path = [
        (Status::Pending, Status::Running),
        (Status::Running, Status::Completed),
        (Status::Running, Status::Failed),
    ];
    for (from, to) in path {
        assert!(
            can_transition(from, to),
            "expected transition {:?} -> {:?} to be allowed",
            from,
            to
        );
    }
}

#[test]
fn terminal_states_never_step_backwards() {
    for from in [Status::Completed, Status::Failed] {
        for to in [Status::Pending, Status::Running] {
            assert!(!can_transition(from, to), "{:?} -> {:?}", from, to);
            assert!(!can_observe(from, to), "{:?} -> {:?}", from, to);
        }
    }
    assert!(!can_transition(Status::Completed, Status::Failed));
}

#[test]
fn polling_may_skip_the_running_state() {
    assert!(!can_transition(Status::Pending, Status::Completed));
    assert!(can_observe(Status::Pending, Status::Completed));
    assert!(can_observe(Status::Pending, Status::Failed));
}

#[test]
fn tracker_rejects_regressions_without_rerun() {
    let mut tracker = StatusTracker::new();
    assert_eq!(tracker.observe(Status::Running), Observation::Accepted(Status::Running));
    assert_eq!(
        tracker.observe(Status::Completed),
        Observation::Accepted(Status::Completed)
    );
    assert_eq!(
        tracker.observe(Status::Running),
        Observation::Regression {
            from: Status::Completed,
            to: Status::Running
        }
    );
    assert_eq!(tracker.last(), Some(Status::Completed));
}

#[test]
fn rerun_allows_one_restart() {
    let mut tracker = StatusTracker::new();
    tracker.observe(Status::Failed);
    tracker.mark_rerun();
    // server still reports the previous run
    assert_eq!(tracker.observe(Status::Failed), Observation::Accepted(Status::Failed));
    assert_eq!(tracker.observe(Status::Running), Observation::Accepted(Status::Running));
    assert_eq!(
        tracker.observe(Status::Completed),
        Observation::Accepted(Status::Completed)
    );
    assert!(matches!(
        tracker.observe(Status::Pending),
        Observation::Regression { .. }
    ));
}

#[test]
fn matrix_tracker_reports_regressed_cells() {
    let first: Vec<SqlExecutions> = vec![sql(
        10,
        1,
        vec![
            cell(1, 10, "db1", Status::Completed),
            cell(2, 10, "db2", Status::Running),
        ],
    )];
    let second: Vec<SqlExecutions> = vec![sql(
        10,
        1,
        vec![
            cell(1, 10, "db1", Status::Pending),
            cell(2, 10, "db2", Status::Failed),
        ],
    )];

    let mut matrix = MatrixTracker::new();
    assert!(matrix.observe(&first).is_empty());
    let regressions = matrix.observe(&second);
    assert_eq!(regressions.len(), 1);
    assert_eq!(regressions[0].0, 1);
    assert_eq!(matrix.status_of(1), Some(Status::Completed));
    assert_eq!(matrix.status_of(2), Some(Status::Failed));
    assert_eq!(matrix.status_of(99), None);
}
