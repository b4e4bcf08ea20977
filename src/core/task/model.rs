use serde::{Deserialize, Deserializer, Serialize};

use super::schema::{self, ColumnDescriptor};
use super::status::Status;

/// One target database of a task, as stored in `QueryTask::databases`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskDatabase {
    pub instance_id: u64,
    pub database_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instance_name: String,
}

impl TaskDatabase {
    pub fn new(instance_id: u64, database_name: impl Into<String>) -> Self {
        Self {
            instance_id,
            database_name: database_name.into(),
            instance_name: String::new(),
        }
    }

    /// Identity of a target; the display name does not take part in it.
    pub fn key(&self) -> (u64, &str) {
        (self.instance_id, self.database_name.as_str())
    }

    pub fn label(&self) -> String {
        if self.instance_name.is_empty() {
            format!("#{}/{}", self.instance_id, self.database_name)
        } else {
            format!("{}/{}", self.instance_name, self.database_name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTask {
    pub id: u64,
    pub task_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub databases: String,
    pub status: Status,
    #[serde(default)]
    pub total_dbs: u32,
    #[serde(default)]
    pub completed_dbs: u32,
    #[serde(default)]
    pub failed_dbs: u32,
    #[serde(default)]
    pub total_sqls: u32,
    #[serde(default)]
    pub completed_sqls: u32,
    #[serde(default)]
    pub failed_sqls: u32,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub started_at: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub completed_at: Option<String>,
}

/// A counter set that breaks `completed + failed <= total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterViolation {
    Databases { total: u32, completed: u32, failed: u32 },
    Statements { total: u32, completed: u32, failed: u32 },
}

impl std::fmt::Display for CounterViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CounterViolation::Databases {
                total,
                completed,
                failed,
            } => write!(
                f,
                "database counters exceed total: {} completed + {} failed > {}",
                completed, failed, total
            ),
            CounterViolation::Statements {
                total,
                completed,
                failed,
            } => write!(
                f,
                "statement counters exceed total: {} completed + {} failed > {}",
                completed, failed, total
            ),
        }
    }
}

impl QueryTask {
    /// Targets decoded from the serialized `databases` column. A malformed
    /// value yields an empty list.
    pub fn target_databases(&self) -> Vec<TaskDatabase> {
        if self.databases.trim().is_empty() {
            return Vec::new();
        }
        serde_json::from_str(&self.databases).unwrap_or_default()
    }

    pub fn pending_dbs(&self) -> u32 {
        self.total_dbs
            .saturating_sub(self.completed_dbs)
            .saturating_sub(self.failed_dbs)
    }

    pub fn pending_sqls(&self) -> u32 {
        self.total_sqls
            .saturating_sub(self.completed_sqls)
            .saturating_sub(self.failed_sqls)
    }

    pub fn counter_violations(&self) -> Vec<CounterViolation> {
        let mut out = Vec::new();
        if self.completed_dbs as u64 + self.failed_dbs as u64 > self.total_dbs as u64 {
            out.push(CounterViolation::Databases {
                total: self.total_dbs,
                completed: self.completed_dbs,
                failed: self.failed_dbs,
            });
        }
        if self.completed_sqls as u64 + self.failed_sqls as u64 > self.total_sqls as u64 {
            out.push(CounterViolation::Statements {
                total: self.total_sqls,
                completed: self.completed_sqls,
                failed: self.failed_sqls,
            });
        }
        out
    }

    pub fn check_invariants(&self) -> Result<(), Vec<CounterViolation>> {
        let violations = self.counter_violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTaskSql {
    pub id: u64,
    #[serde(default)]
    pub task_id: u64,
    pub sql_order: u32,
    pub sql_content: String,
    #[serde(default)]
    pub result_table_name: String,
    #[serde(default)]
    pub result_table_schema: String,
    #[serde(default)]
    pub total_dbs: u32,
    #[serde(default)]
    pub completed_dbs: u32,
    #[serde(default)]
    pub failed_dbs: u32,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub started_at: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub completed_at: Option<String>,
}

impl QueryTaskSql {
    pub fn columns(&self) -> Vec<ColumnDescriptor> {
        schema::visible_columns(&self.result_table_schema)
    }
}

/// The finest unit of work: one statement run against one database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTaskExecution {
    pub id: u64,
    #[serde(default)]
    pub task_id: u64,
    #[serde(default)]
    pub sql_id: u64,
    pub instance_id: u64,
    #[serde(default)]
    pub instance_name: String,
    pub database_name: String,
    pub status: Status,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub result_count: Option<i64>,
    #[serde(default)]
    pub execution_time: Option<i64>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub started_at: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub completed_at: Option<String>,
}

impl QueryTaskExecution {
    /// The failure text of a failed cell. Non-failed cells report nothing even
    /// if a stale message is still attached.
    pub fn failure(&self) -> Option<&str> {
        if self.status != Status::Failed {
            return None;
        }
        Some(
            self.error_message
                .as_deref()
                .unwrap_or("no error message recorded"),
        )
    }

    pub fn target(&self) -> TaskDatabase {
        TaskDatabase {
            instance_id: self.instance_id,
            database_name: self.database_name.clone(),
            instance_name: self.instance_name.clone(),
        }
    }
}

/// One statement together with its execution cells, as served by
/// `/api/query-tasks/{id}/sqls/executions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlExecutions {
    pub id: u64,
    pub sql_order: u32,
    #[serde(default)]
    pub sql_content: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub executions: Vec<QueryTaskExecution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Page<T> {
    #[serde(default)]
    pub total: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<T>,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            total: 0,
            items: Vec::new(),
        }
    }
}

pub type ResultRow = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultPage {
    #[serde(default)]
    pub total: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<ResultRow>,
    #[serde(default)]
    pub schema: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatCounts {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub pending: u64,
}

/// Server-side aggregate served by `/execution-stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    #[serde(default)]
    pub db: StatCounts,
    #[serde(default)]
    pub sql: StatCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRef {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

/// A database discovered by a previous instance sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub id: u64,
    pub name: String,
    pub instance_id: u64,
    #[serde(default)]
    pub instance: Option<InstanceRef>,
}

impl DatabaseInfo {
    pub fn as_target(&self) -> TaskDatabase {
        TaskDatabase {
            instance_id: self.instance_id,
            database_name: self.name.clone(),
            instance_name: self
                .instance
                .as_ref()
                .map(|i| i.name.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlValidation {
    pub valid: bool,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub c_key: String,
    pub c_value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascend,
    Descend,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Ascend => "ascend",
            SortDirection::Descend => "descend",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "asc" | "ascend" => Some(SortDirection::Ascend),
            "desc" | "descend" => Some(SortDirection::Descend),
            _ => None,
        }
    }
}

/// Filters for the paged task list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskListQuery {
    pub task_name: Option<String>,
    pub status: Option<Status>,
    pub is_favorite: Option<bool>,
    pub page: u32,
    pub page_size: u32,
    pub sort: Option<(String, SortDirection)>,
}

impl Default for TaskListQuery {
    fn default() -> Self {
        Self {
            task_name: None,
            status: None,
            is_favorite: None,
            page: 1,
            page_size: 20,
            sort: None,
        }
    }
}

impl TaskListQuery {
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("page".to_string(), self.page.max(1).to_string()),
            ("pageSize".to_string(), self.page_size.max(1).to_string()),
        ];
        if let Some(name) = self.task_name.as_deref().map(str::trim)
            && !name.is_empty()
        {
            pairs.push(("task_name".to_string(), name.to_string()));
        }
        if let Some(status) = self.status {
            pairs.push(("status".to_string(), status.code().to_string()));
        }
        if let Some(favorite) = self.is_favorite {
            pairs.push(("is_favorite".to_string(), favorite.to_string()));
        }
        if let Some((field, direction)) = &self.sort {
            pairs.push(("sort_field".to_string(), field.clone()));
            pairs.push(("sort_order".to_string(), direction.as_str().to_string()));
        }
        pairs
    }
}

pub(crate) fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::{CounterViolation, QueryTask, SqlExecutions, TaskListQuery};
    use crate::core::task::status::Status;

    fn task_json() -> &'static str {
        r#"{
            "id": 7,
            "task_name": "orders audit",
            "databases": "[{\"instance_id\":1,\"database_name\":\"db1\",\"instance_name\":\"prod\"}]",
            "status": 1,
            "total_dbs": 2,
            "completed_dbs": 1,
            "failed_dbs": 0,
            "total_sqls": 2,
            "completed_sqls": 0,
            "failed_sqls": 0,
            "created_at": "2025-01-01T10:00:00+08:00",
            "updated_at": "2025-01-01T10:00:00+08:00",
            "started_at": "",
            "completed_at": null
        }"#
    }

    #[test]
    fn decodes_task_with_lenient_timestamps() {
        let task: QueryTask = serde_json::from_str(task_json()).expect("task");
        assert_eq!(task.status, Status::Running);
        assert_eq!(task.started_at, None);
        assert_eq!(task.completed_at, None);
        assert!(!task.is_favorite);
        assert_eq!(task.pending_dbs(), 1);
        assert_eq!(task.pending_sqls(), 2);
        let targets = task.target_databases();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].label(), "prod/db1");
    }

    #[test]
    fn malformed_databases_column_yields_no_targets() {
        let mut task: QueryTask = serde_json::from_str(task_json()).expect("task");
        task.databases = "{not json".to_string();
        assert!(task.target_databases().is_empty());
    }

    #[test]
    fn pending_never_goes_negative_and_violations_are_reported() {
        let mut task: QueryTask = serde_json::from_str(task_json()).expect("task");
        task.completed_dbs = 2;
        task.failed_dbs = 1;
        assert_eq!(task.pending_dbs(), 0);
        assert_eq!(
            task.counter_violations(),
            vec![CounterViolation::Databases {
                total: 2,
                completed: 2,
                failed: 1
            }]
        );
    }

    #[test]
    fn null_executions_decode_as_empty() {
        let sql: SqlExecutions =
            serde_json::from_str(r#"{"id":1,"sql_order":1,"sql_content":"SELECT 1","executions":null}"#)
                .expect("sql");
        assert!(sql.executions.is_empty());
    }

    #[test]
    fn list_query_skips_blank_filters() {
        let query = TaskListQuery {
            task_name: Some("  ".to_string()),
            status: Some(Status::Failed),
            is_favorite: Some(true),
            ..TaskListQuery::default()
        };
        let pairs = query.query_pairs();
        assert!(pairs.iter().all(|(k, _)| k != "task_name"));
        assert!(pairs.contains(&("status".to_string(), "3".to_string())));
        assert!(pairs.contains(&("is_favorite".to_string(), "true".to_string())));
    }
}
