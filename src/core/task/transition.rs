use std::collections::HashMap;

use tracing::warn;

use super::model::SqlExecutions;
use super::status::Status;

/// Legal single-step transitions of a task or execution cell.
///
/// `Completed`/`Failed` only lead back to `Running` through an explicit
/// re-run, which is modelled separately by [`StatusTracker::mark_rerun`].
pub fn can_transition(from: Status, to: Status) -> bool {
    if from == to {
        return true;
    }
    match from {
        Status::Pending => matches!(to, Status::Running),
        Status::Running => matches!(to, Status::Completed | Status::Failed),
        Status::Completed | Status::Failed => false,
        Status::Unknown(_) => false,
    }
}

/// Whether a poller may observe `to` after having seen `from`. Polling can
/// miss short-lived states, so a jump straight from `Pending` to a terminal
/// state is accepted as long as the order is never reversed.
pub fn can_observe(from: Status, to: Status) -> bool {
    if can_transition(from, to) {
        return true;
    }
    matches!(
        (from, to),
        (Status::Pending, Status::Completed | Status::Failed)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Accepted(Status),
    /// The new status would move the lifecycle backwards; the previous one is
    /// kept.
    Regression { from: Status, to: Status },
}

/// Remembers the last accepted status of one task and refuses backwards
/// movement unless a re-run was issued since.
#[derive(Debug, Clone)]
pub struct StatusTracker {
    last: Option<Status>,
    rerun_pending: bool,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusTracker {
    pub fn new() -> Self {
        Self {
            last: None,
            rerun_pending: false,
        }
    }

    pub fn last(&self) -> Option<Status> {
        self.last
    }

    /// A re-run was requested: the next observation may restart the
    /// lifecycle at `Pending` or `Running`.
    pub fn mark_rerun(&mut self) {
        self.rerun_pending = true;
    }

    pub fn observe(&mut self, status: Status) -> Observation {
        let Some(previous) = self.last else {
            self.last = Some(status);
            self.rerun_pending = false;
            return Observation::Accepted(status);
        };

        if self.rerun_pending {
            self.rerun_pending = false;
            if previous.is_terminal() && status == previous {
                // the server has not picked the run up yet; stay armed
                self.rerun_pending = true;
            }
            self.last = Some(status);
            return Observation::Accepted(status);
        }

        if can_observe(previous, status) || matches!(previous, Status::Unknown(_)) {
            self.last = Some(status);
            Observation::Accepted(status)
        } else {
            warn!(from = %previous, to = %status, "ignoring status regression");
            Observation::Regression {
                from: previous,
                to: status,
            }
        }
    }
}

/// Per-cell trackers for an execution matrix, keyed by execution id.
#[derive(Debug, Clone, Default)]
pub struct MatrixTracker {
    cells: HashMap<u64, StatusTracker>,
}

impl MatrixTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds every cell of a poll result; returns the regressions found.
    /// Regressed cells keep their previously observed status in the tracker.
    pub fn observe(&mut self, sqls: &[SqlExecutions]) -> Vec<(u64, Observation)> {
        let mut regressions = Vec::new();
        for sql in sqls {
            for exec in &sql.executions {
                let tracker = self.cells.entry(exec.id).or_default();
                let observation = tracker.observe(exec.status);
                if matches!(observation, Observation::Regression { .. }) {
                    regressions.push((exec.id, observation));
                }
            }
        }
        regressions
    }

    pub fn status_of(&self, execution_id: u64) -> Option<Status> {
        self.cells.get(&execution_id).and_then(StatusTracker::last)
    }
}
