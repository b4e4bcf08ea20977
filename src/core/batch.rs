use std::sync::Arc;

use anyhow::anyhow;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::core::watch::TaskSource;

/// Outcome of a batch run: every task settled, each on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: Vec<u64>,
    pub failed: Vec<(u64, String)>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Triggers a run for each task concurrently. A task that is already running
/// or cannot be fetched is recorded as failed without affecting the others.
/// Results keep the order of `task_ids`; duplicates are run once.
pub async fn run_tasks<S>(source: Arc<S>, task_ids: &[u64]) -> BatchReport
where
    S: TaskSource + ?Sized + 'static,
{
    let mut unique: Vec<u64> = Vec::with_capacity(task_ids.len());
    for id in task_ids {
        if !unique.contains(id) {
            unique.push(*id);
        }
    }

    let mut set = JoinSet::new();
    for (index, task_id) in unique.iter().copied().enumerate() {
        let source = Arc::clone(&source);
        set.spawn(async move {
            let outcome: anyhow::Result<String> = async {
                let task = source.fetch_task(task_id).await?;
                if !task.status.can_run() {
                    return Err(anyhow!("task is {}, cannot run", task.status));
                }
                source.trigger_run(task_id).await
            }
            .await;
            (index, task_id, outcome)
        });
    }

    let mut settled: Vec<(usize, u64, Result<(), String>)> = Vec::with_capacity(unique.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, task_id, Ok(_))) => settled.push((index, task_id, Ok(()))),
            Ok((index, task_id, Err(e))) => {
                warn!(task_id, "batch run failed: {:#}", e);
                settled.push((index, task_id, Err(format!("{:#}", e))));
            }
            Err(e) => warn!("batch run job panicked: {}", e),
        }
    }
    settled.sort_by_key(|(index, _, _)| *index);

    let mut report = BatchReport::default();
    for (_, task_id, result) in settled {
        match result {
            Ok(()) => report.succeeded.push(task_id),
            Err(message) => report.failed.push((task_id, message)),
        }
    }
    // a panicked job leaves no entry; record it so every id settles
    for task_id in unique {
        if !report.succeeded.contains(&task_id) && !report.failed.iter().any(|(id, _)| *id == task_id)
        {
            report.failed.push((task_id, "run job aborted".to_string()));
        }
    }
    info!(
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        "batch run settled"
    );
    report
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use anyhow::{Result, anyhow};
    use async_trait::async_trait;

    use super::run_tasks;
    use crate::core::task::model::{QueryTask, SqlExecutions};
    use crate::core::task::status::Status;
    use crate::core::watch::TaskSource;

    struct FakeSource {
        statuses: HashMap<u64, Status>,
        reject_run: u64,
        runs: AtomicU32,
    }

    #[async_trait]
    impl TaskSource for FakeSource {
        async fn fetch_task(&self, task_id: u64) -> Result<QueryTask> {
            let status = self
                .statuses
                .get(&task_id)
                .copied()
                .ok_or_else(|| anyhow!("task {} not found", task_id))?;
            Ok(serde_json::from_value(serde_json::json!({
                "id": task_id,
                "task_name": format!("t{}", task_id),
                "status": status.code()
            }))?)
        }

        async fn fetch_executions(&self, _task_id: u64) -> Result<Vec<SqlExecutions>> {
            Ok(Vec::new())
        }

        async fn trigger_run(&self, task_id: u64) -> Result<String> {
            if task_id == self.reject_run {
                return Err(anyhow!("server refused"));
            }
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok("started".to_string())
        }
    }

    #[tokio::test]
    async fn failures_are_isolated_and_every_task_settles() {
        let source = Arc::new(FakeSource {
            statuses: HashMap::from([
                (1, Status::Pending),
                (2, Status::Running),
                (3, Status::Completed),
                (4, Status::Failed),
            ]),
            reject_run: 4,
            runs: AtomicU32::new(0),
        });

        let report = run_tasks(source.clone(), &[1, 2, 3, 4, 9, 1]).await;
        assert_eq!(report.total(), 5);
        assert_eq!(report.succeeded, vec![1, 3]);
        let failed: Vec<u64> = report.failed.iter().map(|(id, _)| *id).collect();
        assert_eq!(failed, vec![2, 4, 9]);
        assert!(report.failed[0].1.contains("running"));
        assert_eq!(source.runs.load(Ordering::SeqCst), 2);
    }
}
