//! Two-level grouping of bulk-query rows
//!
//! Every bulk decoder partitions its result rows by quoted table name,
//! then by schema name, so that same-named tables in different schemas
//! stay apart. Lookup goes through [`ScopeMap::resolve`], which also
//! implements the wildcard-schema flattening.

use crate::scope::{SchemaScope, TableScope};
use std::collections::{BTreeMap, HashMap};

/// Grouped bulk-query rows: quoted table name -> schema name -> rows
///
/// Immutable once the owning preload cycle has built it. Bucket order
/// preserves insertion order (the catalog's row order) until the caller
/// applies an explicit secondary sort.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeMap<T> {
    tables: HashMap<String, BTreeMap<String, Vec<T>>>,
}

impl<T> Default for ScopeMap<T> {
    fn default() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }
}

impl<T> ScopeMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one row under `(table_key, schema)`; `table_key` must already
    /// be the quoted-literal form used at lookup time.
    pub fn insert(&mut self, table_key: String, schema: String, row: T) {
        self.tables
            .entry(table_key)
            .or_default()
            .entry(schema)
            .or_default()
            .push(row);
    }

    /// Sort every bucket by the given key (attribute number, constraint
    /// name, index name - whichever secondary order the kind documents).
    pub fn sort_buckets_by_key<K: Ord, F: FnMut(&T) -> K>(&mut self, mut key: F) {
        for schemas in self.tables.values_mut() {
            for bucket in schemas.values_mut() {
                bucket.sort_by_key(&mut key);
            }
        }
    }

    /// Resolve a scope to its rows.
    ///
    /// Exact schema bucket when present; under the wildcard scope the
    /// concatenation of all schema buckets for the table (schema
    /// iteration order, each bucket's internal order preserved);
    /// otherwise empty. An absent table is "no rows of this kind", not
    /// an error.
    pub fn resolve(&self, scope: &TableScope) -> Vec<&T> {
        let Some(schemas) = self.tables.get(&scope.name) else {
            return Vec::new();
        };
        match &scope.schema {
            SchemaScope::Named(schema) => schemas
                .get(schema)
                .map(|bucket| bucket.iter().collect())
                .unwrap_or_default(),
            SchemaScope::Any => schemas.values().flatten().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
