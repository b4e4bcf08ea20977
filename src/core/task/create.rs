//! Task creation contract: request shape, local validation and target
//! resolution for the include/exclude database modes.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::model::{QueryTask, TaskDatabase};
use super::sql_split::split_statements;
use super::status::Status;

pub const MAX_TASK_NAME_CHARS: usize = 100;
pub const MAX_DESCRIPTION_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseMode {
    #[default]
    Include,
    Exclude,
}

impl DatabaseMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DatabaseMode::Include => "include",
            DatabaseMode::Exclude => "exclude",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "include" => Some(DatabaseMode::Include),
            "exclude" => Some(DatabaseMode::Exclude),
            _ => None,
        }
    }
}

/// Body of `POST /api/query-tasks`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub task_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub instance_ids: Vec<u64>,
    pub database_mode: DatabaseMode,
    pub selected_dbs: Vec<TaskDatabase>,
    pub sql_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", render_field_errors(.0))]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        Self(vec![FieldError::new(field, message)])
    }

    pub fn fields(&self) -> Vec<&'static str> {
        self.0.iter().map(|e| e.field).collect()
    }
}

fn render_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl CreateTaskRequest {
    /// Local checks run before anything is sent. Every failing field is
    /// reported, not just the first.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = Vec::new();

        let name = self.task_name.trim();
        if name.is_empty() {
            errors.push(FieldError::new("task_name", "task name is required"));
        } else if name.chars().count() > MAX_TASK_NAME_CHARS {
            errors.push(FieldError::new(
                "task_name",
                format!("task name must be at most {} characters", MAX_TASK_NAME_CHARS),
            ));
        }

        if self.description.chars().count() > MAX_DESCRIPTION_CHARS {
            errors.push(FieldError::new(
                "description",
                format!(
                    "description must be at most {} characters",
                    MAX_DESCRIPTION_CHARS
                ),
            ));
        }

        if self.instance_ids.is_empty() {
            errors.push(FieldError::new(
                "instance_ids",
                "select at least one instance",
            ));
        }

        if self.selected_dbs.is_empty() {
            errors.push(FieldError::new(
                "selected_dbs",
                "select at least one database",
            ));
        } else if self.database_mode == DatabaseMode::Include && !self.instance_ids.is_empty() {
            let chosen: HashSet<u64> = self.instance_ids.iter().copied().collect();
            let strays: Vec<String> = self
                .selected_dbs
                .iter()
                .filter(|db| !chosen.contains(&db.instance_id))
                .map(TaskDatabase::label)
                .collect();
            if !strays.is_empty() {
                errors.push(FieldError::new(
                    "selected_dbs",
                    format!("not on a chosen instance: {}", strays.join(", ")),
                ));
            }
        }

        if self.sql_content.trim().is_empty() {
            errors.push(FieldError::new("sql_content", "SQL content is required"));
        } else if split_statements(&self.sql_content).is_empty() {
            errors.push(FieldError::new(
                "sql_content",
                "SQL content contains no statements",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(errors))
        }
    }

    pub fn statements(&self) -> Vec<String> {
        split_statements(&self.sql_content)
    }

    /// Effective target set. `known` is the synced database inventory; it is
    /// required for exclude mode and used in include mode only to fill in
    /// instance names.
    pub fn resolve_targets(&self, known: &[TaskDatabase]) -> Vec<TaskDatabase> {
        let chosen: HashSet<u64> = self.instance_ids.iter().copied().collect();
        let names: HashMap<u64, &str> = known
            .iter()
            .filter(|db| !db.instance_name.is_empty())
            .map(|db| (db.instance_id, db.instance_name.as_str()))
            .collect();
        let mut seen: BTreeSet<(u64, String)> = BTreeSet::new();

        let candidates: Vec<&TaskDatabase> = match self.database_mode {
            DatabaseMode::Include => self
                .selected_dbs
                .iter()
                .filter(|db| chosen.contains(&db.instance_id))
                .collect(),
            DatabaseMode::Exclude => {
                let excluded: HashSet<(u64, &str)> =
                    self.selected_dbs.iter().map(TaskDatabase::key).collect();
                known
                    .iter()
                    .filter(|db| chosen.contains(&db.instance_id))
                    .filter(|db| !excluded.contains(&db.key()))
                    .collect()
            }
        };

        candidates
            .into_iter()
            .filter(|db| seen.insert((db.instance_id, db.database_name.clone())))
            .map(|db| {
                let mut target = db.clone();
                if target.instance_name.is_empty()
                    && let Some(name) = names.get(&target.instance_id)
                {
                    target.instance_name = (*name).to_string();
                }
                target
            })
            .collect()
    }

    pub fn plan(&self, known: &[TaskDatabase]) -> TaskPlan {
        TaskPlan {
            targets: self.resolve_targets(known),
            statements: self.statements(),
        }
    }
}

/// What a creation request would materialize on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPlan {
    pub targets: Vec<TaskDatabase>,
    pub statements: Vec<String>,
}

impl TaskPlan {
    pub fn total_dbs(&self) -> u32 {
        self.targets.len() as u32
    }

    pub fn total_sqls(&self) -> u32 {
        self.statements.len() as u32
    }

    pub fn cell_count(&self) -> usize {
        self.targets.len() * self.statements.len()
    }

    /// The task as it would look right after creation: pending with zeroed
    /// progress counters.
    pub fn draft(&self, request: &CreateTaskRequest) -> QueryTask {
        QueryTask {
            id: 0,
            task_name: request.task_name.trim().to_string(),
            description: request.description.clone(),
            databases: serde_json::to_string(&self.targets).unwrap_or_default(),
            status: Status::Pending,
            total_dbs: self.total_dbs(),
            completed_dbs: 0,
            failed_dbs: 0,
            total_sqls: self.total_sqls(),
            completed_sqls: 0,
            failed_sqls: 0,
            is_favorite: false,
            created_at: String::new(),
            updated_at: String::new(),
            started_at: None,
            completed_at: None,
        }
    }
}
