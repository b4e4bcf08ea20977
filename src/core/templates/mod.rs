//! Saved creation forms.
//!
//! A template is a named, partial set of task creation values. Stores list
//! templates most recent first and replace a template saved under an existing
//! name.

mod sqlite;

#[cfg(test)]
use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(test)]
use tokio::sync::Mutex;

use crate::core::task::create::{CreateTaskRequest, DatabaseMode};
use crate::core::task::model::TaskDatabase;

pub use sqlite::SqliteTemplateStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_ids: Option<Vec<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_mode: Option<DatabaseMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_dbs: Option<Vec<TaskDatabase>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_content: Option<String>,
}

impl TemplateValues {
    /// Captures every non-empty field of a request.
    pub fn from_request(request: &CreateTaskRequest) -> Self {
        fn non_empty(s: &str) -> Option<String> {
            (!s.trim().is_empty()).then(|| s.to_string())
        }
        Self {
            task_name: non_empty(&request.task_name),
            description: non_empty(&request.description),
            instance_ids: (!request.instance_ids.is_empty()).then(|| request.instance_ids.clone()),
            database_mode: Some(request.database_mode),
            selected_dbs: (!request.selected_dbs.is_empty()).then(|| request.selected_dbs.clone()),
            sql_content: non_empty(&request.sql_content),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(&self, request: &mut CreateTaskRequest) {
        if let Some(name) = &self.task_name {
            request.task_name = name.clone();
        }
        if let Some(description) = &self.description {
            request.description = description.clone();
        }
        if let Some(ids) = &self.instance_ids {
            request.instance_ids = ids.clone();
        }
        if let Some(mode) = self.database_mode {
            request.database_mode = mode;
        }
        if let Some(dbs) = &self.selected_dbs {
            request.selected_dbs = dbs.clone();
        }
        if let Some(sql) = &self.sql_content {
            request.sql_content = sql.clone();
        }
    }

    /// `other` wins wherever it carries a value.
    pub fn overlay(&mut self, other: TemplateValues) {
        if other.task_name.is_some() {
            self.task_name = other.task_name;
        }
        if other.description.is_some() {
            self.description = other.description;
        }
        if other.instance_ids.is_some() {
            self.instance_ids = other.instance_ids;
        }
        if other.database_mode.is_some() {
            self.database_mode = other.database_mode;
        }
        if other.selected_dbs.is_some() {
            self.selected_dbs = other.selected_dbs;
        }
        if other.sql_content.is_some() {
            self.sql_content = other.sql_content;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTaskTemplate {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub values: TemplateValues,
}

impl QueryTaskTemplate {
    pub fn new(name: impl Into<String>, values: TemplateValues) -> Self {
        Self {
            name: name.into(),
            created_at: Utc::now(),
            values,
        }
    }
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// All templates, most recently saved first.
    async fn list(&self) -> Result<Vec<QueryTaskTemplate>>;
    async fn get(&self, name: &str) -> Result<Option<QueryTaskTemplate>>;
    /// Saves the template, replacing any template with the same name.
    async fn upsert(&self, template: &QueryTaskTemplate) -> Result<()>;
    /// Returns whether a template was removed.
    async fn delete(&self, name: &str) -> Result<bool>;
}

#[cfg(test)]
fn sort_by_recency(templates: &mut [QueryTaskTemplate]) {
    templates.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Process-local store for tests of store consumers.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryTemplateStore {
    templates: Mutex<HashMap<String, QueryTaskTemplate>>,
}

#[cfg(test)]
impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
#[async_trait]
impl TemplateStore for MemoryTemplateStore {
    async fn list(&self) -> Result<Vec<QueryTaskTemplate>> {
        let mut out: Vec<QueryTaskTemplate> =
            self.templates.lock().await.values().cloned().collect();
        sort_by_recency(&mut out);
        Ok(out)
    }

    async fn get(&self, name: &str) -> Result<Option<QueryTaskTemplate>> {
        Ok(self.templates.lock().await.get(name).cloned())
    }

    async fn upsert(&self, template: &QueryTaskTemplate) -> Result<()> {
        self.templates
            .lock()
            .await
            .insert(template.name.clone(), template.clone());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.templates.lock().await.remove(name).is_some())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{MemoryTemplateStore, QueryTaskTemplate, TemplateStore, TemplateValues};
    use crate::core::task::create::{CreateTaskRequest, DatabaseMode};

    pub(super) fn template(name: &str, minutes_ago: i64, sql: &str) -> QueryTaskTemplate {
        QueryTaskTemplate {
            name: name.to_string(),
            created_at: Utc::now() - Duration::minutes(minutes_ago),
            values: TemplateValues {
                sql_content: Some(sql.to_string()),
                ..TemplateValues::default()
            },
        }
    }

    #[tokio::test]
    async fn memory_store_lists_by_recency_and_upserts_by_name() {
        let store = MemoryTemplateStore::new();
        store.upsert(&template("old", 30, "SELECT 1")).await.unwrap();
        store.upsert(&template("new", 1, "SELECT 2")).await.unwrap();
        store.upsert(&template("old", 0, "SELECT 3")).await.unwrap();

        let names: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["old", "new"]);
        let old = store.get("old").await.unwrap().expect("old");
        assert_eq!(old.values.sql_content.as_deref(), Some("SELECT 3"));

        assert!(store.delete("old").await.unwrap());
        assert!(!store.delete("old").await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[test]
    fn applying_a_template_only_touches_carried_fields() {
        let mut request = CreateTaskRequest {
            task_name: "keep me".to_string(),
            instance_ids: vec![4],
            ..CreateTaskRequest::default()
        };
        let tpl = QueryTaskTemplate::new(
            "exclude-prod",
            TemplateValues {
                database_mode: Some(DatabaseMode::Exclude),
                sql_content: Some("SELECT 1".to_string()),
                ..TemplateValues::default()
            },
        );
        tpl.values.apply_to(&mut request);
        assert_eq!(request.task_name, "keep me");
        assert_eq!(request.instance_ids, vec![4]);
        assert_eq!(request.database_mode, DatabaseMode::Exclude);
        assert_eq!(request.sql_content, "SELECT 1");
    }

    #[test]
    fn captured_values_skip_blank_fields() {
        let request = CreateTaskRequest {
            task_name: "  ".to_string(),
            sql_content: "SELECT 1".to_string(),
            ..CreateTaskRequest::default()
        };
        let values = TemplateValues::from_request(&request);
        assert_eq!(values.task_name, None);
        assert_eq!(values.instance_ids, None);
        assert_eq!(values.sql_content.as_deref(), Some("SELECT 1"));
        assert!(!values.is_empty());
    }

    #[test]
    fn overlay_prefers_the_newer_values() {
        let mut base = TemplateValues {
            task_name: Some("nightly".to_string()),
            sql_content: Some("SELECT 1".to_string()),
            ..TemplateValues::default()
        };
        base.overlay(TemplateValues {
            sql_content: Some("SELECT 2".to_string()),
            instance_ids: Some(vec![1]),
            ..TemplateValues::default()
        });
        assert_eq!(base.task_name.as_deref(), Some("nightly"));
        assert_eq!(base.sql_content.as_deref(), Some("SELECT 2"));
        assert_eq!(base.instance_ids, Some(vec![1]));
    }
}
