//! MySQL instance registry and dashboard payloads.
//!
//! Instances are the servers tasks run against; their databases become
//! selectable targets only after a sync.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::task::create::{FieldError, ValidationErrors};
use crate::core::task::model::{empty_as_none, null_as_default};
use crate::core::task::status::Status;

pub const MAX_NAME_CHARS: usize = 100;
pub const MAX_HOST_CHARS: usize = 255;
pub const MAX_USERNAME_CHARS: usize = 100;
pub const MAX_PASSWORD_CHARS: usize = 255;
pub const MAX_REMARK_CHARS: usize = 500;

/// Extra DSN parameters, one map per entry as the server stores them.
pub type InstanceParams = Vec<BTreeMap<String, String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: u64,
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub params: InstanceParams,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Instance {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The editable part, used as the base of an update.
    pub fn to_draft(&self) -> InstanceDraft {
        InstanceDraft {
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            params: self.params.clone(),
            remark: self.remark.clone(),
        }
    }
}

/// Body of instance create, update and connection test.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDraft {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub params: InstanceParams,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remark: String,
}

fn check_text(
    errors: &mut Vec<FieldError>,
    field: &'static str,
    value: &str,
    max: usize,
    required: bool,
) {
    if required && value.trim().is_empty() {
        errors.push(FieldError::new(field, format!("{} is required", field)));
    } else if value.chars().count() > max {
        errors.push(FieldError::new(
            field,
            format!("{} must be at most {} characters", field, max),
        ));
    }
}

impl InstanceDraft {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = Vec::new();
        check_text(&mut errors, "name", &self.name, MAX_NAME_CHARS, true);
        check_text(&mut errors, "host", &self.host, MAX_HOST_CHARS, true);
        if self.port == 0 {
            errors.push(FieldError::new("port", "port must be between 1 and 65535"));
        }
        check_text(
            &mut errors,
            "username",
            &self.username,
            MAX_USERNAME_CHARS,
            true,
        );
        check_text(
            &mut errors,
            "password",
            &self.password,
            MAX_PASSWORD_CHARS,
            true,
        );
        check_text(&mut errors, "remark", &self.remark, MAX_REMARK_CHARS, false);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(errors))
        }
    }

    /// Applies `key=value` pairs as DSN parameters, replacing earlier values
    /// of the same key.
    pub fn set_params(&mut self, pairs: &[(String, String)]) {
        for (key, value) in pairs {
            self.params.retain(|entry| !entry.contains_key(key));
            self.params
                .push(BTreeMap::from([(key.clone(), value.clone())]));
        }
    }
}

/// Filters for the paged instance list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceListQuery {
    pub name: Option<String>,
    pub host: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for InstanceListQuery {
    fn default() -> Self {
        Self {
            name: None,
            host: None,
            page: 1,
            page_size: 20,
        }
    }
}

impl InstanceListQuery {
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("page".to_string(), self.page.max(1).to_string()),
            ("pageSize".to_string(), self.page_size.max(1).to_string()),
        ];
        for (key, value) in [("name", &self.name), ("host", &self.host)] {
            if let Some(value) = value.as_deref().map(str::trim)
                && !value.is_empty()
            {
                pairs.push((key.to_string(), value.to_string()));
            }
        }
        pairs
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub pending: u64,
    #[serde(default)]
    pub running: u64,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentTask {
    pub id: u64,
    pub task_name: String,
    pub status: Status,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub created_at: Option<String>,
}

/// Served by `/api/dashboard/stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    #[serde(default)]
    pub total_instances: u64,
    #[serde(default)]
    pub task_summary: TaskCounts,
    #[serde(default, deserialize_with = "null_as_default")]
    pub recent_tasks: Vec<RecentTask>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub favorite_tasks: Vec<RecentTask>,
}
