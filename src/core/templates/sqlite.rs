use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;
use tracing::info;

use super::{QueryTaskTemplate, TemplateStore, TemplateValues};
use crate::platform::{NativePlatform, Platform};

/// Template store backed by a SQLite file in the data directory.
pub struct SqliteTemplateStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteTemplateStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
            NativePlatform::restrict_dir_permissions(parent);
        }
        let db = Connection::open(path)
            .with_context(|| format!("opening template store {}", path.display()))?;
        NativePlatform::restrict_file_permissions(path);
        info!(path = %path.display(), "template store opened");
        Self::with_connection(db)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(db: Connection) -> Result<Self> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS query_task_templates (
                name TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL,
                values_json TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }
}

fn decode_row(name: String, created_at: i64, values_json: &str) -> Result<QueryTaskTemplate> {
    let created_at = DateTime::<Utc>::from_timestamp_millis(created_at).unwrap_or_default();
    let values: TemplateValues = serde_json::from_str(values_json)
        .with_context(|| format!("template '{}' has unreadable values", name))?;
    Ok(QueryTaskTemplate {
        name,
        created_at,
        values,
    })
}

#[async_trait]
impl TemplateStore for SqliteTemplateStore {
    async fn list(&self) -> Result<Vec<QueryTaskTemplate>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT name, created_at, values_json FROM query_task_templates
             ORDER BY created_at DESC, name ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (name, created_at, json) = row?;
            out.push(decode_row(name, created_at, &json)?);
        }
        Ok(out)
    }

    async fn get(&self, name: &str) -> Result<Option<QueryTaskTemplate>> {
        let db = self.db.lock().await;
        let row = db
            .query_row(
                "SELECT name, created_at, values_json FROM query_task_templates WHERE name = ?1",
                params![name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        match row {
            Some((name, created_at, json)) => Ok(Some(decode_row(name, created_at, &json)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, template: &QueryTaskTemplate) -> Result<()> {
        let db = self.db.lock().await;
        let json = serde_json::to_string(&template.values)?;
        db.execute(
            "INSERT OR REPLACE INTO query_task_templates (name, created_at, values_json) VALUES (?1, ?2, ?3)",
            params![template.name, template.created_at.timestamp_millis(), json],
        )?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "DELETE FROM query_task_templates WHERE name = ?1",
            params![name],
        )?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteTemplateStore;
    use crate::core::templates::TemplateStore;
    use crate::core::templates::tests::template;

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("templates.db");

        let store = SqliteTemplateStore::open(&path).unwrap();
        store.upsert(&template("a", 10, "SELECT 1")).await.unwrap();
        store.upsert(&template("b", 5, "SELECT 2")).await.unwrap();
        drop(store);

        let store = SqliteTemplateStore::open(&path).unwrap();
        let names: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn upsert_replaces_and_delete_reports_removal() {
        let store = SqliteTemplateStore::open_in_memory().unwrap();
        store.upsert(&template("a", 10, "SELECT 1")).await.unwrap();
        store.upsert(&template("a", 0, "SELECT 9")).await.unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].values.sql_content.as_deref(), Some("SELECT 9"));

        assert!(store.get("missing").await.unwrap().is_none());
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn store_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templates.db");
        let _store = SqliteTemplateStore::open(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
