use std::collections::BTreeMap;

use url::Url;

use super::model::SortDirection;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
/// Largest page the server honours.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Keys the results endpoint interprets itself; they cannot be column filters.
const RESERVED_KEYS: [&str; 4] = ["page", "page_size", "order_by", "order"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSort {
    pub column: String,
    pub direction: SortDirection,
}

/// Parameters of one result-page request. The same value drives the export
/// link so a download matches what was last viewed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultQuery {
    pub page: u32,
    pub page_size: u32,
    pub filters: BTreeMap<String, String>,
    pub sort: Option<ResultSort>,
    pub instance_id: Option<u64>,
    pub database_name: Option<String>,
}

impl Default for ResultQuery {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}

impl ResultQuery {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            filters: BTreeMap::new(),
            sort: None,
            instance_id: None,
            database_name: None,
        }
    }

    /// Adds a column filter. Blank values and reserved keys are ignored.
    pub fn with_filter(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        let column = column.into();
        let value = value.into();
        if column.trim().is_empty()
            || value.trim().is_empty()
            || RESERVED_KEYS.contains(&column.as_str())
        {
            return self;
        }
        self.filters.insert(column, value);
        self
    }

    pub fn sorted_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.sort = Some(ResultSort {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn scoped_to(mut self, instance_id: Option<u64>, database_name: Option<String>) -> Self {
        self.instance_id = instance_id;
        self.database_name = database_name.filter(|d| !d.trim().is_empty());
        self
    }

    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("page".to_string(), self.page.to_string()),
            ("page_size".to_string(), self.page_size.to_string()),
        ];
        pairs.extend(self.export_pairs());
        pairs
    }

    /// Filter, sort and scope parameters without paging.
    pub fn export_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(sort) = &self.sort {
            pairs.push(("order_by".to_string(), sort.column.clone()));
            pairs.push(("order".to_string(), sort.direction.as_str().to_string()));
        }
        if let Some(instance_id) = self.instance_id {
            pairs.push(("instance_id".to_string(), instance_id.to_string()));
        }
        if let Some(database_name) = &self.database_name {
            pairs.push(("database_name".to_string(), database_name.clone()));
        }
        for (column, value) in &self.filters {
            pairs.push((column.clone(), value.clone()));
        }
        pairs
    }
}

/// `GET /api/query-tasks/sqls/{sql_id}/export` with the query's filters.
pub fn export_url(base: &Url, sql_id: u64, query: &ResultQuery) -> Result<Url, url::ParseError> {
    let mut url = base.join(&format!("api/query-tasks/sqls/{}/export", sql_id))?;
    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in query.export_pairs() {
            pairs.append_pair(&key, &value);
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }
    Ok(url)
}

/// File name the server attaches to an export download.
pub fn export_file_name(task_id: u64, sql_id: u64) -> String {
    format!("task_{}_sql_{}_results.csv", task_id, sql_id)
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::{MAX_PAGE_SIZE, ResultQuery, export_file_name, export_url};
    use crate::core::task::model::SortDirection;

    #[test]
    fn clamps_paging() {
        let q = ResultQuery::new(0, 50_000);
        assert_eq!(q.page, 1);
        assert_eq!(q.page_size, MAX_PAGE_SIZE);
    }

    #[test]
    fn reserved_and_blank_filters_are_ignored() {
        let q = ResultQuery::default()
            .with_filter("page", "9")
            .with_filter("name", "  ")
            .with_filter("name", "alice");
        assert_eq!(q.filters.len(), 1);
        assert_eq!(q.filters.get("name").map(String::as_str), Some("alice"));
    }

    #[test]
    fn export_url_carries_filters_and_sort_but_not_paging() {
        let base = Url::parse("http://localhost:9092/").expect("base");
        let q = ResultQuery::new(3, 50)
            .with_filter("name", "a b")
            .sorted_by("total", SortDirection::Descend)
            .scoped_to(Some(2), Some("db1".to_string()));
        let url = export_url(&base, 11, &q).expect("url");
        assert_eq!(url.path(), "/api/query-tasks/sqls/11/export");
        let query = url.query().unwrap_or_default();
        assert!(query.contains("order_by=total"));
        assert!(query.contains("order=descend"));
        assert!(query.contains("instance_id=2"));
        assert!(query.contains("database_name=db1"));
        assert!(query.contains("name=a+b"));
        assert!(!query.contains("page"));
    }

    #[test]
    fn export_url_without_parameters_has_no_query() {
        let base = Url::parse("http://localhost:9092/").expect("base");
        let url = export_url(&base, 4, &ResultQuery::default()).expect("url");
        assert_eq!(url.as_str(), "http://localhost:9092/api/query-tasks/sqls/4/export");
        assert_eq!(export_file_name(1, 4), "task_1_sql_4_results.csv");
    }
}
