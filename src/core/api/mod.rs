//! Typed client for the batch query-task REST backend.
//!
//! Every endpoint answers HTTP 200 with a `{code, message, data}` envelope;
//! a `code` other than 200 is a rejection carrying the server's message.

use std::time::Duration;

use reqwest::{Client, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_stream::StreamExt;
use tracing::{debug, info};
use url::Url;

use crate::core::instance::{DashboardStats, Instance, InstanceDraft, InstanceListQuery};
use crate::core::task::create::CreateTaskRequest;
use crate::core::task::model::{
    ConfigEntry, DatabaseInfo, ExecutionStats, Page, QueryTask, QueryTaskSql, ResultPage,
    SqlExecutions, SqlValidation, TaskListQuery,
};
use crate::core::task::results::{self, ResultQuery};

pub const SUCCESS_CODE: i64 = 200;
/// Largest page `/api/databases` serves.
const DATABASE_PAGE_SIZE: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{path} rejected the request ({code}): {message}")]
    Rejected {
        path: String,
        code: i64,
        message: String,
    },
    #[error("{path} returned no data")]
    MissingData { path: String },
    #[error("could not decode response from {path}: {message}")]
    Decode { path: String, message: String },
    #[error("invalid API url: {0}")]
    Url(#[from] url::ParseError),
    #[error("could not write download: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Rejected { code: 404, .. })
    }
}

#[derive(Debug, serde::Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base: Url,
}

impl ApiClient {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ApiError::Transport {
                path: api_url.to_string(),
                source,
            })?;
        Ok(Self {
            http,
            base: normalize_base(api_url)?,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base.join(path.trim_start_matches('/'))?)
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&B>,
    ) -> Result<String, ApiError> {
        let url = self.endpoint(path)?;
        debug!(%method, %url, "api request");
        let mut request = self.http.request(method, url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        let transport = |source| ApiError::Transport {
            path: path.to_string(),
            source,
        };
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        if !status.is_success() && text.trim().is_empty() {
            return Err(ApiError::Rejected {
                path: path.to_string(),
                code: status.as_u16() as i64,
                message: status.to_string(),
            });
        }
        Ok(text)
    }

    fn open<T: DeserializeOwned>(path: &str, text: &str) -> Result<Option<T>, ApiError> {
        let envelope: Envelope<T> =
            serde_json::from_str(text).map_err(|e| ApiError::Decode {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        if envelope.code != SUCCESS_CODE {
            return Err(ApiError::Rejected {
                path: path.to_string(),
                code: envelope.code,
                message: envelope.message,
            });
        }
        Ok(envelope.data)
    }

    async fn call<T, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&B>,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let text = self.send(method, path, query, body).await?;
        Self::open::<T>(path, &text)?.ok_or_else(|| ApiError::MissingData {
            path: path.to_string(),
        })
    }

    /// For endpoints that acknowledge with a message and no data.
    async fn call_ack<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<String, ApiError> {
        let text = self.send(method, path, &[], body).await?;
        let envelope: Envelope<serde_json::Value> =
            serde_json::from_str(&text).map_err(|e| ApiError::Decode {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        if envelope.code != SUCCESS_CODE {
            return Err(ApiError::Rejected {
                path: path.to_string(),
                code: envelope.code,
                message: envelope.message,
            });
        }
        Ok(envelope.message)
    }

    pub async fn list_tasks(&self, query: &TaskListQuery) -> Result<Page<QueryTask>, ApiError> {
        self.call::<_, ()>(Method::GET, "api/query-tasks", &query.query_pairs(), None)
            .await
    }

    pub async fn create_task(&self, request: &CreateTaskRequest) -> Result<QueryTask, ApiError> {
        let task: QueryTask = self
            .call(Method::POST, "api/query-tasks", &[], Some(request))
            .await?;
        info!(task_id = task.id, name = %task.task_name, "query task created");
        Ok(task)
    }

    pub async fn delete_tasks(&self, task_ids: &[u64]) -> Result<String, ApiError> {
        let body = serde_json::json!({ "task_ids": task_ids });
        let message = self
            .call_ack(Method::DELETE, "api/query-tasks", Some(&body))
            .await?;
        info!(count = task_ids.len(), "query tasks deleted");
        Ok(message)
    }

    pub async fn get_task(&self, task_id: u64) -> Result<QueryTask, ApiError> {
        self.call::<_, ()>(
            Method::GET,
            &format!("api/query-tasks/{}", task_id),
            &[],
            None,
        )
        .await
    }

    /// Starts (or restarts) a task. The server only acknowledges; progress is
    /// observed by polling.
    pub async fn run_task(&self, task_id: u64) -> Result<String, ApiError> {
        let message = self
            .call_ack::<()>(Method::POST, &format!("api/query-tasks/{}/run", task_id), None)
            .await?;
        info!(task_id, "query task run requested");
        Ok(message)
    }

    pub async fn toggle_favorite(&self, task_id: u64) -> Result<String, ApiError> {
        self.call_ack::<()>(
            Method::POST,
            &format!("api/query-tasks/{}/toggle-favorite", task_id),
            None,
        )
        .await
    }

    /// Statements of a task in ascending `sql_order`.
    pub async fn task_sqls(&self, task_id: u64) -> Result<Vec<QueryTaskSql>, ApiError> {
        let mut page: Page<QueryTaskSql> = self
            .call::<_, ()>(
                Method::GET,
                &format!("api/query-tasks/{}/sqls", task_id),
                &[],
                None,
            )
            .await?;
        page.items.sort_by_key(|sql| sql.sql_order);
        Ok(page.items)
    }

    pub async fn sql_executions(&self, task_id: u64) -> Result<Vec<SqlExecutions>, ApiError> {
        let path = format!("api/query-tasks/{}/sqls/executions", task_id);
        let text = self.send::<()>(Method::GET, &path, &[], None).await?;
        Ok(Self::open::<Vec<SqlExecutions>>(&path, &text)?.unwrap_or_default())
    }

    pub async fn execution_stats(&self, task_id: u64) -> Result<ExecutionStats, ApiError> {
        self.call::<_, ()>(
            Method::GET,
            &format!("api/query-tasks/{}/execution-stats", task_id),
            &[],
            None,
        )
        .await
    }

    pub async fn sql_results(
        &self,
        sql_id: u64,
        query: &ResultQuery,
    ) -> Result<ResultPage, ApiError> {
        self.call::<_, ()>(
            Method::GET,
            &format!("api/query-tasks/sqls/{}/results", sql_id),
            &query.query_pairs(),
            None,
        )
        .await
    }

    pub fn export_url(&self, sql_id: u64, query: &ResultQuery) -> Result<Url, ApiError> {
        Ok(results::export_url(&self.base, sql_id, query)?)
    }

    /// Streams the server-generated CSV into `out`; returns the bytes written.
    /// A JSON answer instead of CSV is the server refusing the export.
    pub async fn download_export<W>(
        &self,
        sql_id: u64,
        query: &ResultQuery,
        out: &mut W,
    ) -> Result<u64, ApiError>
    where
        W: AsyncWrite + Unpin,
    {
        let url = self.export_url(sql_id, query)?;
        let path = url.path().to_string();
        debug!(%url, "export download");
        let transport = |source| ApiError::Transport {
            path: path.clone(),
            source,
        };
        let response = self.http.get(url).send().await.map_err(transport)?;

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));
        if is_json {
            let text = response.text().await.map_err(transport)?;
            Self::open::<serde_json::Value>(&path, &text)?;
            return Err(ApiError::Decode {
                path,
                message: "expected CSV content, got JSON".to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(ApiError::Rejected {
                path,
                code: response.status().as_u16() as i64,
                message: response.status().to_string(),
            });
        }

        let stream = response.bytes_stream();
        let mut reader =
            tokio_util::io::StreamReader::new(stream.map(|r| r.map_err(std::io::Error::other)));
        let written = tokio::io::copy(&mut reader, out).await?;
        out.flush().await?;
        info!(sql_id, bytes = written, "export downloaded");
        Ok(written)
    }

    pub async fn validate_sql(&self, sql: &str) -> Result<SqlValidation, ApiError> {
        let body = serde_json::json!({ "sql": sql });
        self.call(Method::POST, "api/sql/validate", &[], Some(&body))
            .await
    }

    /// Every synced database of one instance, following pagination.
    pub async fn list_databases(&self, instance_id: u64) -> Result<Vec<DatabaseInfo>, ApiError> {
        let mut out = Vec::new();
        let mut page = 1u32;
        loop {
            let query = vec![
                ("instance_id".to_string(), instance_id.to_string()),
                ("page".to_string(), page.to_string()),
                ("pageSize".to_string(), DATABASE_PAGE_SIZE.to_string()),
            ];
            let chunk: Page<DatabaseInfo> = self
                .call::<_, ()>(Method::GET, "api/databases", &query, None)
                .await?;
            let received = chunk.items.len();
            out.extend(chunk.items);
            if received == 0 || out.len() as u64 >= chunk.total {
                break;
            }
            page += 1;
        }
        debug!(instance_id, count = out.len(), "databases listed");
        Ok(out)
    }

    pub async fn list_instances(
        &self,
        query: &InstanceListQuery,
    ) -> Result<Page<Instance>, ApiError> {
        self.call::<_, ()>(Method::GET, "api/instances", &query.query_pairs(), None)
            .await
    }

    pub async fn get_instance(&self, instance_id: u64) -> Result<Instance, ApiError> {
        self.call::<_, ()>(
            Method::GET,
            &format!("api/instances/{}", instance_id),
            &[],
            None,
        )
        .await
    }

    /// Registers an instance. The server connects once to read its version
    /// and starts a database sync in the background.
    pub async fn create_instance(&self, draft: &InstanceDraft) -> Result<Instance, ApiError> {
        let instance: Instance = self
            .call(Method::POST, "api/instances", &[], Some(draft))
            .await?;
        info!(instance_id = instance.id, name = %instance.name, "instance registered");
        Ok(instance)
    }

    pub async fn update_instance(
        &self,
        instance_id: u64,
        draft: &InstanceDraft,
    ) -> Result<Instance, ApiError> {
        let instance: Instance = self
            .call(
                Method::PUT,
                &format!("api/instances/{}", instance_id),
                &[],
                Some(draft),
            )
            .await?;
        info!(instance_id, "instance updated");
        Ok(instance)
    }

    pub async fn delete_instance(&self, instance_id: u64) -> Result<String, ApiError> {
        let message = self
            .call_ack::<()>(
                Method::DELETE,
                &format!("api/instances/{}", instance_id),
                None,
            )
            .await?;
        info!(instance_id, "instance deleted");
        Ok(message)
    }

    /// Asks the server to connect with the given settings. A refused
    /// connection comes back as `Rejected` with the driver's message.
    pub async fn test_connection(&self, draft: &InstanceDraft) -> Result<String, ApiError> {
        self.call_ack(Method::POST, "api/instances/test-connection", Some(draft))
            .await
    }

    /// Refreshes the synced database inventory of the given instances.
    pub async fn sync_databases(&self, instance_ids: &[u64]) -> Result<String, ApiError> {
        let body = serde_json::json!({ "instance_ids": instance_ids });
        let message = self
            .call_ack(Method::POST, "api/instances/sync-databases", Some(&body))
            .await?;
        info!(count = instance_ids.len(), "instance databases synced");
        Ok(message)
    }

    /// Full instance records, passwords included, for a backup file. An empty
    /// id list exports every instance.
    pub async fn export_instances(&self, instance_ids: &[u64]) -> Result<Vec<Instance>, ApiError> {
        let body = serde_json::json!({ "instance_ids": instance_ids });
        let path = "api/instances/export";
        let text = self.send(Method::POST, path, &[], Some(&body)).await?;
        Ok(Self::open::<Vec<Instance>>(path, &text)?.unwrap_or_default())
    }

    pub async fn dashboard_stats(&self) -> Result<DashboardStats, ApiError> {
        self.call::<_, ()>(Method::GET, "api/dashboard/stats", &[], None)
            .await
    }

    pub async fn get_config(&self, key: &str) -> Result<ConfigEntry, ApiError> {
        let query = vec![("key".to_string(), key.to_string())];
        self.call::<_, ()>(Method::GET, "api/configs/get", &query, None)
            .await
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<String, ApiError> {
        let body = ConfigEntry {
            c_key: key.to_string(),
            c_value: value.to_string(),
        };
        self.call_ack(Method::POST, "api/configs/set", Some(&body))
            .await
    }
}

/// Parses the configured base URL so relative endpoint paths join under it,
/// keeping any path prefix such as `/backend`.
pub fn normalize_base(api_url: &str) -> Result<Url, ApiError> {
    let trimmed = api_url.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };
    Ok(Url::parse(&with_slash)?)
}
