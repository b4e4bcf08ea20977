//! Progress aggregation over a task's execution matrix.
//!
//! Task-level counters served with the task are authoritative for the summary;
//! the functions here derive the drill-down numbers (per statement, per
//! database, per cell) from the `/sqls/executions` payload.

use std::collections::{BTreeSet, HashMap};

use super::model::{QueryTask, QueryTaskExecution, SqlExecutions, TaskDatabase};
use super::status::Status;

/// A completed/failed/pending partition of some set of cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
}

impl Progress {
    pub fn new(total: u32, completed: u32, failed: u32) -> Self {
        Self {
            total,
            completed,
            failed,
        }
    }

    pub fn pending(&self) -> u32 {
        self.total
            .saturating_sub(self.completed)
            .saturating_sub(self.failed)
    }

    pub fn record(&mut self, status: Status) {
        self.total += 1;
        match status {
            Status::Completed => self.completed += 1,
            Status::Failed => self.failed += 1,
            _ => {}
        }
    }

    pub fn merge(&mut self, other: Progress) {
        self.total += other.total;
        self.completed += other.completed;
        self.failed += other.failed;
    }

    /// Settled share in percent, rounded down.
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        let settled = (self.completed + self.failed).min(self.total) as u64;
        (settled * 100 / self.total as u64) as u32
    }
}

pub fn sql_progress(sql: &SqlExecutions) -> Progress {
    let mut progress = Progress::default();
    for exec in &sql.executions {
        progress.record(exec.status);
    }
    progress
}

/// Statements in ascending `sql_order`; ties keep server order.
pub fn ordered_sqls(sqls: &[SqlExecutions]) -> Vec<&SqlExecutions> {
    let mut ordered: Vec<&SqlExecutions> = sqls.iter().collect();
    ordered.sort_by_key(|sql| sql.sql_order);
    ordered
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseGroup<'a> {
    pub database_name: &'a str,
    pub cells: Vec<&'a QueryTaskExecution>,
}

/// Cells of one statement grouped by database name. Groups appear in the
/// order their first cell was served and cells are never re-sorted by status.
pub fn group_by_database(sql: &SqlExecutions) -> Vec<DatabaseGroup<'_>> {
    let mut groups: Vec<DatabaseGroup<'_>> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for exec in &sql.executions {
        let name = exec.database_name.as_str();
        match index.get(name) {
            Some(&i) => groups[i].cells.push(exec),
            None => {
                index.insert(name, groups.len());
                groups.push(DatabaseGroup {
                    database_name: name,
                    cells: vec![exec],
                });
            }
        }
    }
    groups
}

pub fn cell_totals(sqls: &[SqlExecutions]) -> Progress {
    let mut total = Progress::default();
    for sql in sqls {
        total.merge(sql_progress(sql));
    }
    total
}

/// Cells of one target database across every statement.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSummary {
    pub instance_id: u64,
    pub instance_name: String,
    pub database_name: String,
    pub cells: Progress,
}

impl DatabaseSummary {
    pub fn key(&self) -> (u64, &str) {
        (self.instance_id, self.database_name.as_str())
    }

    pub fn target(&self) -> TaskDatabase {
        TaskDatabase {
            instance_id: self.instance_id,
            database_name: self.database_name.clone(),
            instance_name: self.instance_name.clone(),
        }
    }

    /// Failed when any cell failed, completed when every cell completed.
    pub fn status(&self) -> Status {
        if self.cells.failed > 0 {
            Status::Failed
        } else if self.cells.total > 0 && self.cells.completed == self.cells.total {
            Status::Completed
        } else if self.cells.completed > 0 {
            Status::Running
        } else {
            Status::Pending
        }
    }
}

/// One entry per (instance, database) in the order first served.
pub fn per_database(sqls: &[SqlExecutions]) -> Vec<DatabaseSummary> {
    let mut out: Vec<DatabaseSummary> = Vec::new();
    let mut index: HashMap<(u64, &str), usize> = HashMap::new();
    for sql in sqls {
        for exec in &sql.executions {
            let key = (exec.instance_id, exec.database_name.as_str());
            let i = *index.entry(key).or_insert_with(|| {
                out.push(DatabaseSummary {
                    instance_id: exec.instance_id,
                    instance_name: exec.instance_name.clone(),
                    database_name: exec.database_name.clone(),
                    cells: Progress::default(),
                });
                out.len() - 1
            });
            out[i].cells.record(exec.status);
        }
    }
    out
}

/// Per-database partition: a database counts as completed when every one of
/// its cells completed, as failed when any cell failed, pending otherwise.
pub fn database_progress(sqls: &[SqlExecutions]) -> Progress {
    let mut progress = Progress::default();
    for db in per_database(sqls) {
        progress.total += 1;
        match db.status() {
            Status::Failed => progress.failed += 1,
            Status::Completed => progress.completed += 1,
            _ => {}
        }
    }
    progress
}

/// Per-statement partition: a statement counts as completed when all of its
/// cells completed and as failed when any of them failed.
pub fn sql_level_progress(sqls: &[SqlExecutions]) -> Progress {
    let mut progress = Progress::default();
    for sql in sqls {
        let cells = sql_progress(sql);
        progress.total += 1;
        if cells.failed > 0 {
            progress.failed += 1;
        } else if cells.total > 0 && cells.completed == cells.total {
            progress.completed += 1;
        }
    }
    progress
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedCell {
    pub sql_order: u32,
    pub execution_id: u64,
    pub instance_id: u64,
    pub instance_name: String,
    pub database_name: String,
    pub error_message: String,
}

/// Every failed cell with its retained error, statement order first.
pub fn failed_cells(sqls: &[SqlExecutions]) -> Vec<FailedCell> {
    ordered_sqls(sqls)
        .into_iter()
        .flat_map(|sql| {
            sql.executions.iter().filter_map(move |exec| {
                exec.failure().map(|message| FailedCell {
                    sql_order: sql.sql_order,
                    execution_id: exec.id,
                    instance_id: exec.instance_id,
                    instance_name: exec.instance_name.clone(),
                    database_name: exec.database_name.clone(),
                    error_message: message.to_string(),
                })
            })
        })
        .collect()
}

/// What the user should take away from a task's status and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    NotStarted,
    InProgress,
    Succeeded,
    /// The run finished but some cells failed.
    CompletedWithFailures,
    Failed,
    Unknown,
}

pub fn outcome(task: &QueryTask) -> TaskOutcome {
    match task.status {
        Status::Pending => TaskOutcome::NotStarted,
        Status::Running => TaskOutcome::InProgress,
        Status::Completed if task.failed_dbs > 0 || task.failed_sqls > 0 => {
            TaskOutcome::CompletedWithFailures
        }
        Status::Completed => TaskOutcome::Succeeded,
        Status::Failed => TaskOutcome::Failed,
        Status::Unknown(_) => TaskOutcome::Unknown,
    }
}

impl TaskOutcome {
    pub fn label(self) -> &'static str {
        match self {
            TaskOutcome::NotStarted => "not started",
            TaskOutcome::InProgress => "in progress",
            TaskOutcome::Succeeded => "succeeded",
            TaskOutcome::CompletedWithFailures => "completed with failures",
            TaskOutcome::Failed => "failed",
            TaskOutcome::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlSummary {
    pub sql_id: u64,
    pub sql_order: u32,
    pub cells: Progress,
}

/// The three display layers of a task in one value.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskProgress {
    /// Databases, from the task's own counters.
    pub dbs: Progress,
    /// Statements, from the task's own counters.
    pub sqls: Progress,
    /// Cells derived from the matrix; empty if the matrix was not fetched.
    pub cells: Progress,
    pub per_sql: Vec<SqlSummary>,
}

pub fn summarize(task: &QueryTask, sqls: &[SqlExecutions]) -> TaskProgress {
    TaskProgress {
        dbs: Progress::new(task.total_dbs, task.completed_dbs, task.failed_dbs),
        sqls: Progress::new(task.total_sqls, task.completed_sqls, task.failed_sqls),
        cells: cell_totals(sqls),
        per_sql: ordered_sqls(sqls)
            .into_iter()
            .map(|sql| SqlSummary {
                sql_id: sql.id,
                sql_order: sql.sql_order,
                cells: sql_progress(sql),
            })
            .collect(),
    }
}

/// Identity of every cell: (sql id, instance id, database name).
pub fn cell_identities(sqls: &[SqlExecutions]) -> BTreeSet<(u64, u64, String)> {
    sqls.iter()
        .flat_map(|sql| {
            sql.executions
                .iter()
                .map(move |exec| (sql.id, exec.instance_id, exec.database_name.clone()))
        })
        .collect()
}

/// Whether two observations of a task have the same statements and cells.
/// A re-run must keep both unchanged.
pub fn same_structure(before: &[SqlExecutions], after: &[SqlExecutions]) -> bool {
    let orders = |sqls: &[SqlExecutions]| -> Vec<(u64, u32)> {
        let mut v: Vec<(u64, u32)> = sqls.iter().map(|s| (s.id, s.sql_order)).collect();
        v.sort_unstable();
        v
    };
    orders(before) == orders(after) && cell_identities(before) == cell_identities(after)
}
