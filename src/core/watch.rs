//! Polling of a running task.
//!
//! A [`TaskWatcher`] owns one background loop per watched task. The loop
//! fetches the task (and optionally its execution matrix), reports the result
//! and sleeps; the next fetch only starts once the previous one was handled.
//! It ends by itself when the task leaves `Running`, and is stopped when the
//! watcher is cancelled or dropped.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::api::ApiClient;
use crate::core::task::aggregate::{self, TaskProgress};
use crate::core::task::model::{QueryTask, SqlExecutions};
use crate::core::task::status::Status;
use crate::core::task::transition::{MatrixTracker, Observation, StatusTracker};

/// Where task state is read from and runs are triggered.
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn fetch_task(&self, task_id: u64) -> Result<QueryTask>;
    async fn fetch_executions(&self, task_id: u64) -> Result<Vec<SqlExecutions>>;
    async fn trigger_run(&self, task_id: u64) -> Result<String>;
}

#[async_trait]
impl TaskSource for ApiClient {
    async fn fetch_task(&self, task_id: u64) -> Result<QueryTask> {
        Ok(self.get_task(task_id).await?)
    }

    async fn fetch_executions(&self, task_id: u64) -> Result<Vec<SqlExecutions>> {
        Ok(self.sql_executions(task_id).await?)
    }

    async fn trigger_run(&self, task_id: u64) -> Result<String> {
        Ok(self.run_task(task_id).await?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub task: QueryTask,
    /// Empty unless the watcher was asked to include executions.
    pub sqls: Vec<SqlExecutions>,
    pub progress: TaskProgress,
    pub poll: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Update(Box<TaskSnapshot>),
    PollFailed { attempt: u32, message: String },
    /// The server reported an older lifecycle state than already seen.
    Regression { from: Status, to: Status },
    CellRegression { execution_id: u64, from: Status, to: Status },
    /// The set of statements or cells differs from the first matrix seen.
    StructureChanged { cells_before: usize, cells_after: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The task reached `Completed` or `Failed` while being watched.
    Terminal(Status),
    /// The task was not running when the watch started.
    NotRunning(Status),
    Cancelled,
    TooManyErrors,
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub interval: Duration,
    pub max_consecutive_failures: u32,
    pub include_executions: bool,
    /// A run was just triggered; a still-pending or previously finished task
    /// is expected to (re)enter `Running`.
    pub after_rerun: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_consecutive_failures: 5,
            include_executions: true,
            after_rerun: false,
        }
    }
}

pub struct TaskWatcher {
    task_id: u64,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<StopReason>>,
}

impl TaskWatcher {
    pub fn spawn<S>(
        source: Arc<S>,
        task_id: u64,
        options: WatchOptions,
    ) -> (Self, mpsc::UnboundedReceiver<WatchEvent>)
    where
        S: TaskSource + ?Sized + 'static,
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(poll_loop(source, task_id, options, events_tx, stop_rx));
        info!(task_id, "watching task");
        (
            Self {
                task_id,
                stop_tx: Some(stop_tx),
                handle: Some(handle),
            },
            events_rx,
        )
    }

    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    pub fn cancel(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Waits for the loop to end on its own or after [`cancel`](Self::cancel).
    pub async fn finished(mut self) -> StopReason {
        let Some(handle) = self.handle.take() else {
            return StopReason::Cancelled;
        };
        match handle.await {
            Ok(reason) => reason,
            Err(e) => {
                warn!(task_id = self.task_id, "watch loop aborted: {}", e);
                StopReason::Cancelled
            }
        }
    }
}

impl Drop for TaskWatcher {
    fn drop(&mut self) {
        // dropping the sender wakes the loop with a closed channel
        self.stop_tx.take();
    }
}

struct PollState {
    tracker: StatusTracker,
    cells: MatrixTracker,
    baseline: Option<Vec<SqlExecutions>>,
    seen_running: bool,
}

async fn poll_loop<S>(
    source: Arc<S>,
    task_id: u64,
    options: WatchOptions,
    events: mpsc::UnboundedSender<WatchEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) -> StopReason
where
    S: TaskSource + ?Sized,
{
    let mut state = PollState {
        tracker: StatusTracker::new(),
        cells: MatrixTracker::new(),
        baseline: None,
        seen_running: options.after_rerun,
    };
    if options.after_rerun {
        state.tracker.mark_rerun();
    }

    let mut poll = 0u32;
    let mut failures = 0u32;

    loop {
        poll += 1;
        let fetched = tokio::select! {
            biased;
            _ = &mut stop_rx => return StopReason::Cancelled,
            fetched = fetch(&*source, task_id, options.include_executions) => fetched,
        };

        match fetched {
            Ok((task, sqls)) => {
                failures = 0;
                if let Some(reason) = handle_snapshot(&mut state, &options, &events, task, sqls, poll)
                {
                    info!(task_id, ?reason, polls = poll, "watch finished");
                    return reason;
                }
            }
            Err(e) => {
                failures += 1;
                warn!(task_id, attempt = failures, "poll failed: {:#}", e);
                let _ = events.send(WatchEvent::PollFailed {
                    attempt: failures,
                    message: format!("{:#}", e),
                });
                if failures >= options.max_consecutive_failures.max(1) {
                    return StopReason::TooManyErrors;
                }
            }
        }

        tokio::select! {
            biased;
            _ = &mut stop_rx => return StopReason::Cancelled,
            _ = tokio::time::sleep(options.interval) => {}
        }
    }
}

async fn fetch<S>(
    source: &S,
    task_id: u64,
    include_executions: bool,
) -> Result<(QueryTask, Vec<SqlExecutions>)>
where
    S: TaskSource + ?Sized,
{
    if include_executions {
        let (task, sqls) = tokio::join!(source.fetch_task(task_id), source.fetch_executions(task_id));
        Ok((task?, sqls?))
    } else {
        Ok((source.fetch_task(task_id).await?, Vec::new()))
    }
}

fn handle_snapshot(
    state: &mut PollState,
    options: &WatchOptions,
    events: &mpsc::UnboundedSender<WatchEvent>,
    mut task: QueryTask,
    mut sqls: Vec<SqlExecutions>,
    poll: u32,
) -> Option<StopReason> {
    if let Observation::Regression { from, to } = state.tracker.observe(task.status) {
        let _ = events.send(WatchEvent::Regression { from, to });
        task.status = from;
    }
    for (execution_id, observation) in state.cells.observe(&sqls) {
        if let Observation::Regression { from, to } = observation {
            let _ = events.send(WatchEvent::CellRegression {
                execution_id,
                from,
                to,
            });
        }
    }
    // regressed cells keep the status seen before
    for exec in sqls.iter_mut().flat_map(|sql| sql.executions.iter_mut()) {
        if let Some(status) = state.cells.status_of(exec.id) {
            exec.status = status;
        }
    }
    if !sqls.is_empty() {
        let changed = state
            .baseline
            .as_ref()
            .is_some_and(|before| !aggregate::same_structure(before, &sqls));
        if changed {
            let cells_before = state
                .baseline
                .as_deref()
                .map(|before| aggregate::cell_identities(before).len())
                .unwrap_or_default();
            let cells_after = aggregate::cell_identities(&sqls).len();
            warn!(task_id = task.id, cells_before, cells_after, "execution matrix changed shape");
            let _ = events.send(WatchEvent::StructureChanged {
                cells_before,
                cells_after,
            });
        }
        if changed || state.baseline.is_none() {
            state.baseline = Some(sqls.clone());
        }
    }
    for violation in task.counter_violations() {
        warn!(task_id = task.id, "{}", violation);
    }

    let status = task.status;
    debug!(task_id = task.id, %status, poll, "task polled");
    let progress = aggregate::summarize(&task, &sqls);
    let _ = events.send(WatchEvent::Update(Box::new(TaskSnapshot {
        task,
        sqls,
        progress,
        poll,
    })));

    match status {
        Status::Running => {
            state.seen_running = true;
            None
        }
        Status::Pending if options.after_rerun => None,
        Status::Completed | Status::Failed if state.seen_running => Some(StopReason::Terminal(status)),
        other => Some(StopReason::NotRunning(other)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::{StopReason, TaskSource, TaskWatcher, WatchEvent, WatchOptions};
    use crate::core::task::model::{QueryTask, SqlExecutions};
    use crate::core::task::status::Status;

    /// Replays a fixed sequence of task statuses; `None` entries fail.
    /// Matrices are served in order, empty once the list runs out.
    struct ScriptedSource {
        script: Mutex<VecDeque<Option<Status>>>,
        matrices: Mutex<VecDeque<Vec<SqlExecutions>>>,
        last: Mutex<Status>,
        fetches: AtomicU32,
        runs: AtomicU32,
    }

    impl ScriptedSource {
        fn new(script: Vec<Option<Status>>) -> Arc<Self> {
            Self::with_matrices(script, Vec::new())
        }

        fn with_matrices(
            script: Vec<Option<Status>>,
            matrices: Vec<Vec<SqlExecutions>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                matrices: Mutex::new(matrices.into()),
                last: Mutex::new(Status::Pending),
                fetches: AtomicU32::new(0),
                runs: AtomicU32::new(0),
            })
        }
    }

    fn task_with(status: Status) -> QueryTask {
        serde_json::from_value(serde_json::json!({
            "id": 5,
            "task_name": "watched",
            "status": status.code(),
            "total_dbs": 1,
            "total_sqls": 1
        }))
        .expect("task")
    }

    #[async_trait]
    impl TaskSource for ScriptedSource {
        async fn fetch_task(&self, _task_id: u64) -> Result<QueryTask> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().await.pop_front();
            let status = match next {
                Some(Some(status)) => status,
                Some(None) => return Err(anyhow!("connection reset")),
                None => *self.last.lock().await,
            };
            *self.last.lock().await = status;
            Ok(task_with(status))
        }

        async fn fetch_executions(&self, _task_id: u64) -> Result<Vec<SqlExecutions>> {
            Ok(self.matrices.lock().await.pop_front().unwrap_or_default())
        }

        async fn trigger_run(&self, _task_id: u64) -> Result<String> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok("started".to_string())
        }
    }

    fn fast() -> WatchOptions {
        WatchOptions {
            interval: Duration::from_millis(5),
            max_consecutive_failures: 3,
            include_executions: true,
            after_rerun: false,
        }
    }

    #[tokio::test]
    async fn stops_on_first_terminal_status() {
        let source = ScriptedSource::new(vec![
            Some(Status::Running),
            Some(Status::Running),
            Some(Status::Completed),
            Some(Status::Running),
        ]);
        let (watcher, mut events) = TaskWatcher::spawn(source.clone(), 5, fast());
        assert_eq!(watcher.finished().await, StopReason::Terminal(Status::Completed));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);

        let mut updates = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, WatchEvent::Update(_)) {
                updates += 1;
            }
        }
        assert_eq!(updates, 3);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_poll_a_task_that_is_not_running() {
        let source = ScriptedSource::new(vec![Some(Status::Failed)]);
        let (watcher, _events) = TaskWatcher::spawn(source.clone(), 5, fast());
        assert_eq!(watcher.finished().await, StopReason::NotRunning(Status::Failed));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        let source = ScriptedSource::new(vec![Some(Status::Unknown(9))]);
        let (watcher, _events) = TaskWatcher::spawn(source, 5, fast());
        assert_eq!(
            watcher.finished().await,
            StopReason::NotRunning(Status::Unknown(9))
        );
    }

    #[tokio::test]
    async fn rerun_waits_through_pending() {
        let source = ScriptedSource::new(vec![
            Some(Status::Pending),
            Some(Status::Running),
            Some(Status::Failed),
        ]);
        let options = WatchOptions {
            after_rerun: true,
            ..fast()
        };
        let (watcher, _events) = TaskWatcher::spawn(source.clone(), 5, options);
        assert_eq!(watcher.finished().await, StopReason::Terminal(Status::Failed));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transient_failures_keep_polling_until_the_limit() {
        let source = ScriptedSource::new(vec![
            Some(Status::Running),
            None,
            None,
            Some(Status::Completed),
        ]);
        let (watcher, mut events) = TaskWatcher::spawn(source.clone(), 5, fast());
        assert_eq!(watcher.finished().await, StopReason::Terminal(Status::Completed));
        let mut failures = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let WatchEvent::PollFailed { attempt, .. } = event {
                failures.push(attempt);
            }
        }
        assert_eq!(failures, vec![1, 2]);

        let source = ScriptedSource::new(vec![Some(Status::Running), None, None, None]);
        let (watcher, _events) = TaskWatcher::spawn(source, 5, fast());
        assert_eq!(watcher.finished().await, StopReason::TooManyErrors);
    }

    #[tokio::test]
    async fn regressions_are_reported_and_ignored() {
        let source = ScriptedSource::new(vec![
            Some(Status::Running),
            Some(Status::Pending),
            Some(Status::Completed),
        ]);
        let (watcher, mut events) = TaskWatcher::spawn(source, 5, fast());
        assert_eq!(watcher.finished().await, StopReason::Terminal(Status::Completed));
        let mut saw_regression = false;
        while let Ok(event) = events.try_recv() {
            if let WatchEvent::Regression { from, to } = event {
                assert_eq!((from, to), (Status::Running, Status::Pending));
                saw_regression = true;
            }
        }
        assert!(saw_regression);
    }

    fn matrix(cells: &[(u64, &str, Status)]) -> Vec<SqlExecutions> {
        let executions: Vec<serde_json::Value> = cells
            .iter()
            .map(|(id, db, status)| {
                serde_json::json!({
                    "id": id,
                    "instance_id": 1,
                    "database_name": db,
                    "status": status.code()
                })
            })
            .collect();
        serde_json::from_value(serde_json::json!([
            { "id": 1, "sql_order": 1, "executions": executions }
        ]))
        .expect("matrix")
    }

    #[tokio::test]
    async fn regressed_cells_keep_their_status_and_shape_changes_are_reported() {
        let source = ScriptedSource::with_matrices(
            vec![
                Some(Status::Running),
                Some(Status::Running),
                Some(Status::Completed),
            ],
            vec![
                matrix(&[(1, "db1", Status::Completed)]),
                matrix(&[(1, "db1", Status::Pending), (2, "db2", Status::Running)]),
                matrix(&[(1, "db1", Status::Completed), (2, "db2", Status::Completed)]),
            ],
        );
        let (watcher, mut events) = TaskWatcher::spawn(source, 5, fast());
        assert_eq!(watcher.finished().await, StopReason::Terminal(Status::Completed));

        let mut snapshots = Vec::new();
        let mut regressed = Vec::new();
        let mut reshaped = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                WatchEvent::Update(snapshot) => snapshots.push(*snapshot),
                WatchEvent::CellRegression { execution_id, .. } => regressed.push(execution_id),
                WatchEvent::StructureChanged {
                    cells_before,
                    cells_after,
                } => reshaped.push((cells_before, cells_after)),
                _ => {}
            }
        }
        assert_eq!(regressed, vec![1]);
        assert_eq!(reshaped, vec![(1, 2)]);
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[1].sqls[0].executions[0].status, Status::Completed);
        assert_eq!(snapshots[1].progress.cells.completed, 1);
        assert_eq!(snapshots[2].progress.cells.completed, 2);
    }

    #[tokio::test]
    async fn cancel_stops_the_timer() {
        let source = ScriptedSource::new(vec![Some(Status::Running)]);
        let options = WatchOptions {
            interval: Duration::from_millis(20),
            ..fast()
        };
        let (mut watcher, _events) = TaskWatcher::spawn(source.clone(), 5, options);
        tokio::time::sleep(Duration::from_millis(50)).await;
        watcher.cancel();
        assert_eq!(watcher.finished().await, StopReason::Cancelled);
        let seen = source.fetches.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(source.fetches.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn dropping_the_watcher_stops_polling() {
        let source = ScriptedSource::new(vec![Some(Status::Running)]);
        let (watcher, mut events) = TaskWatcher::spawn(source.clone(), 5, fast());
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(watcher);
        // the loop closes its event channel once it has stopped
        while events.recv().await.is_some() {}
        let seen = source.fetches.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(source.fetches.load(Ordering::SeqCst), seen);
    }
}
