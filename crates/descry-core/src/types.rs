//! Core types for Descry

use serde::{Deserialize, Serialize};

/// A catalog value decoded from a query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,
    /// Boolean
    Bool(bool),
    /// 16-bit signed integer
    Int16(i16),
    /// 32-bit signed integer
    Int32(i32),
    /// 64-bit signed integer
    Int64(i64),
    /// Object identifier (`oid`)
    Oid(u32),
    /// 64-bit floating point
    Float64(f64),
    /// UTF-8 string
    String(String),
    /// JSON value
    Json(serde_json::Value),
    /// Array of values
    Array(Vec<Value>),
}

impl Value {
    /// Check if the value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int16(v) => Some(*v as i64),
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            Value::Oid(v) => Some(*v as i64),
            Value::String(s) => s.parse::<i64>().ok(),
            _ => None,
        }
    }

    /// Try to get as an object identifier
    pub fn as_oid(&self) -> Option<u32> {
        match self {
            Value::Oid(v) => Some(*v),
            _ => self.as_i64().and_then(|v| u32::try_from(v).ok()),
        }
    }

    /// Try to get as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get as a string array
    pub fn as_string_array(&self) -> Option<Vec<String>> {
        match self {
            Value::Array(arr) => Some(
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// A row from a catalog query result
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Column values
    pub values: Vec<Value>,
    /// Column names
    columns: Vec<String>,
}

impl Row {
    /// Create a new row
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    /// Get a value by column index
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get column names
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

/// Catalog query result
///
/// Row order is exactly the order the catalog returned; decoders that
/// need a secondary order re-sort explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Column names, shared by every row
    pub columns: Vec<String>,
    /// Result rows
    pub rows: Vec<Row>,
}

impl QueryResult {
    /// Create a new result from column names and per-row values
    pub fn new(columns: Vec<String>, values: Vec<Vec<Value>>) -> Self {
        let rows = values
            .into_iter()
            .map(|row| Row::new(columns.clone(), row))
            .collect();
        Self { columns, rows }
    }

    /// Create a new empty query result
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
