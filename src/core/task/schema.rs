//! Result-table schema handling.
//!
//! Every statement stores its merged rows in a server-side table whose layout
//! is described by a JSON document (`{"fields":[{"name","type","comment"}]}`).
//! Columns carrying the `query_task_execution_` prefix are bookkeeping added by
//! the server: the source instance and database are shown under a friendly
//! title, the rest never reaches the grid.

use serde::{Deserialize, Serialize};

use super::model::ResultRow;

pub const METADATA_PREFIX: &str = "query_task_execution_";
pub const INSTANCE_NAME_COLUMN: &str = "query_task_execution_instance_name";
pub const DATABASE_NAME_COLUMN: &str = "query_task_execution_database_name";
/// Surrogate key of the result table's own rows.
pub const ROW_KEY_COLUMN: &str = "id";

pub const INSTANCE_TITLE: &str = "Instance";
pub const DATABASE_TITLE: &str = "Database";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    #[serde(default)]
    pub fields: Vec<TableField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableField {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: String,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    /// Key of the value inside a result row.
    pub key: String,
    pub title: String,
    pub field_type: String,
    pub metadata: bool,
}

impl ColumnDescriptor {
    pub fn cell(&self, row: &ResultRow) -> String {
        match row.get(&self.key) {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

pub fn parse_schema(schema_json: &str) -> Option<TableSchema> {
    if schema_json.trim().is_empty() {
        return None;
    }
    serde_json::from_str(schema_json).ok()
}

/// Columns to display for a schema document. Missing or malformed schemas
/// produce no columns.
pub fn visible_columns(schema_json: &str) -> Vec<ColumnDescriptor> {
    let Some(schema) = parse_schema(schema_json) else {
        return Vec::new();
    };
    schema
        .fields
        .into_iter()
        .filter_map(|field| {
            let title = match field.name.as_str() {
                INSTANCE_NAME_COLUMN => INSTANCE_TITLE.to_string(),
                DATABASE_NAME_COLUMN => DATABASE_TITLE.to_string(),
                ROW_KEY_COLUMN => return None,
                name if name.starts_with(METADATA_PREFIX) => return None,
                name => name.to_string(),
            };
            Some(ColumnDescriptor {
                metadata: field.name.starts_with(METADATA_PREFIX),
                key: field.name,
                title,
                field_type: field.field_type,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{DATABASE_TITLE, INSTANCE_TITLE, visible_columns};

    #[test]
    fn hides_metadata_and_relabels_source_columns() {
        let schema = r#"{"fields":[
            {"name":"id","type":"UINT","comment":""},
            {"name":"query_task_execution_id","type":"UINT","comment":""},
            {"name":"query_task_execution_instance_name","type":"TEXT","comment":""},
            {"name":"query_task_execution_database_name","type":"TEXT","comment":""},
            {"name":"name","type":"TEXT","comment":""}
        ]}"#;
        let columns = visible_columns(schema);
        let titles: Vec<&str> = columns.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec![INSTANCE_TITLE, DATABASE_TITLE, "name"]);
        assert!(columns[0].metadata);
        assert!(!columns[2].metadata);
    }

    #[test]
    fn hides_other_prefixed_columns() {
        let schema = r#"{"fields":[
            {"name":"query_task_execution_error_message","type":"TEXT"},
            {"name":"query_task_execution_instance_id","type":"UINT"},
            {"name":"total"}
        ]}"#;
        let columns = visible_columns(schema);
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].key, "total");
    }

    #[test]
    fn malformed_or_missing_schema_degrades_to_no_columns() {
        assert!(visible_columns("").is_empty());
        assert!(visible_columns("{oops").is_empty());
        assert!(visible_columns(r#"{"other":1}"#).is_empty());
    }

    #[test]
    fn renders_cells_by_key() {
        let schema = r#"{"fields":[{"name":"n"},{"name":"label"}]}"#;
        let columns = visible_columns(schema);
        let row: super::ResultRow =
            serde_json::from_str(r#"{"n":3,"label":"x","ignored":true}"#).expect("row");
        assert_eq!(columns[0].cell(&row), "3");
        assert_eq!(columns[1].cell(&row), "x");
    }
}
