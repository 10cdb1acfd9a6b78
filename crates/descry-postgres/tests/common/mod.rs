//! Common test utilities and mocks

use async_trait::async_trait;
use descry_core::{CatalogConnection, DescryError, QueryResult, Result, Value};
use std::sync::{Arc, Mutex};

/// Mock catalog executor for testing introspection without a real
/// database.
///
/// Responses are matched by SQL substring, first registered match wins;
/// unmatched queries return an empty result ("no rows of this kind").
/// Every query is logged for assertion in tests.
pub struct MockCatalog {
    pub should_fail: bool,
    /// SQL-pattern-based responses: if a query contains the pattern
    /// string, the corresponding result is returned.
    pub query_responses: Vec<(String, QueryResult)>,
    /// Log of all SQL queries executed, for assertion in tests
    pub query_log: Arc<Mutex<Vec<String>>>,
}

impl MockCatalog {
    pub fn new() -> Self {
        // Every provider starts by detecting the server version; default
        // to a current release so all capabilities are on.
        Self {
            should_fail: false,
            query_responses: vec![(
                "server_version_num".to_string(),
                result(&["server_version_num"], vec![vec![Value::Int32(170_000)]]),
            )],
            query_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Register a response for queries containing the given SQL pattern.
    pub fn with_query_response(
        mut self,
        sql_contains: impl Into<String>,
        result: QueryResult,
    ) -> Self {
        self.query_responses.push((sql_contains.into(), result));
        self
    }

    pub fn query_log(&self) -> Vec<String> {
        self.query_log.lock().unwrap().clone()
    }

    /// Number of logged queries containing the given fragment.
    pub fn queries_containing(&self, fragment: &str) -> usize {
        self.query_log()
            .iter()
            .filter(|sql| sql.contains(fragment))
            .count()
    }
}

#[async_trait]
impl CatalogConnection for MockCatalog {
    async fn query(&self, sql: &str, _tag: &str) -> Result<QueryResult> {
        self.query_log.lock().unwrap().push(sql.to_string());

        if self.should_fail {
            return Err(DescryError::Query("Query failed".into()));
        }

        for (pattern, result) in &self.query_responses {
            if sql.contains(pattern.as_str()) {
                return Ok(result.clone());
            }
        }

        Ok(QueryResult::empty())
    }
}

/// Build a result from column names and per-row values.
pub fn result(columns: &[&str], rows: Vec<Vec<Value>>) -> QueryResult {
    QueryResult::new(columns.iter().map(|c| c.to_string()).collect(), rows)
}

/// Result for the session-init table list.
pub fn tables_result(names: &[&str]) -> QueryResult {
    result(
        &["relname"],
        names
            .iter()
            .map(|name| vec![Value::String(name.to_string())])
            .collect(),
    )
}

pub fn text(value: &str) -> Value {
    Value::String(value.to_string())
}

pub fn opt_text(value: Option<&str>) -> Value {
    value.map(text).unwrap_or(Value::Null)
}

pub fn text_array(values: &[&str]) -> Value {
    Value::Array(values.iter().map(|v| text(v)).collect())
}
