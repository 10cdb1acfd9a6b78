//! Preload cache and the cache-or-compute gate

use crate::bulk;
use crate::schema::DirectIntrospection;
use async_trait::async_trait;
use descry_core::{
    CatalogConnection, CheckConstraintDefinition, ColumnDefinition,
    ExclusionConstraintDefinition, ForeignKeyDefinition, IndexDefinition, Result,
    TableIntrospection, TableOptions, UniqueConstraintDefinition,
};
use std::collections::HashMap;
use std::sync::Arc;

/// The grouped output of one preload cycle: introspection kind ->
/// table name -> definitions.
///
/// Immutable once [`bulk::preload`] returns it; concurrent readers need
/// no locking. A table key being present - even with an empty list or a
/// `None` singleton - means "preloaded, zero facts of this kind", which
/// the gate serves without falling back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreloadCache {
    pub(crate) column_definitions: HashMap<String, Vec<ColumnDefinition>>,
    pub(crate) primary_keys: HashMap<String, Vec<String>>,
    pub(crate) indexes: HashMap<String, Vec<IndexDefinition>>,
    pub(crate) foreign_keys: HashMap<String, Vec<ForeignKeyDefinition>>,
    pub(crate) check_constraints: HashMap<String, Vec<CheckConstraintDefinition>>,
    pub(crate) exclusion_constraints: HashMap<String, Vec<ExclusionConstraintDefinition>>,
    pub(crate) unique_constraints: HashMap<String, Vec<UniqueConstraintDefinition>>,
    pub(crate) table_options: HashMap<String, TableOptions>,
    pub(crate) table_comments: HashMap<String, Option<String>>,
    pub(crate) inherited_table_names: HashMap<String, Vec<String>>,
    pub(crate) partition_definitions: HashMap<String, Option<String>>,
}

impl PreloadCache {
    /// True when no preload cycle has populated this cache
    pub fn is_empty(&self) -> bool {
        self.column_definitions.is_empty()
            && self.primary_keys.is_empty()
            && self.indexes.is_empty()
            && self.foreign_keys.is_empty()
            && self.check_constraints.is_empty()
            && self.exclusion_constraints.is_empty()
            && self.unique_constraints.is_empty()
            && self.table_options.is_empty()
            && self.table_comments.is_empty()
            && self.inherited_table_names.is_empty()
            && self.partition_definitions.is_empty()
    }
}

/// Cache-backed introspection provider
///
/// Every accessor checks the preload cache first and otherwise delegates
/// to the wrapped [`DirectIntrospection`]. Fallback results are
/// deliberately not written back: repeated misses repeat the direct
/// query, keeping the cache a pure snapshot of one preload cycle.
pub struct CachedIntrospection<C: CatalogConnection> {
    direct: DirectIntrospection<C>,
    cache: PreloadCache,
}

impl<C: CatalogConnection> CachedIntrospection<C> {
    /// Detect server capabilities, fetch the full table list and run one
    /// preload cycle over it. Call once per session, before handing the
    /// provider out.
    pub async fn initialize(conn: Arc<C>) -> Result<Self> {
        let direct = DirectIntrospection::detect(conn).await?;
        let tables = direct.tables().await?;
        let cache = bulk::preload(&direct, &tables).await?;
        Ok(Self { direct, cache })
    }

    /// Wrap an existing direct provider and cache; an empty cache makes
    /// every accessor fall through.
    pub fn new(direct: DirectIntrospection<C>, cache: PreloadCache) -> Self {
        Self { direct, cache }
    }

    pub fn cache(&self) -> &PreloadCache {
        &self.cache
    }

    pub fn direct(&self) -> &DirectIntrospection<C> {
        &self.direct
    }
}

#[async_trait]
impl<C: CatalogConnection> TableIntrospection for CachedIntrospection<C> {
    async fn column_definitions(&self, table: &str) -> Result<Vec<ColumnDefinition>> {
        if let Some(cached) = self.cache.column_definitions.get(table) {
            return Ok(cached.clone());
        }
        self.direct.column_definitions(table).await
    }

    async fn primary_keys(&self, table: &str) -> Result<Vec<String>> {
        if let Some(cached) = self.cache.primary_keys.get(table) {
            return Ok(cached.clone());
        }
        self.direct.primary_keys(table).await
    }

    async fn indexes(&self, table: &str) -> Result<Vec<IndexDefinition>> {
        if let Some(cached) = self.cache.indexes.get(table) {
            return Ok(cached.clone());
        }
        self.direct.indexes(table).await
    }

    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDefinition>> {
        if let Some(cached) = self.cache.foreign_keys.get(table) {
            return Ok(cached.clone());
        }
        self.direct.foreign_keys(table).await
    }

    async fn check_constraints(&self, table: &str) -> Result<Vec<CheckConstraintDefinition>> {
        if let Some(cached) = self.cache.check_constraints.get(table) {
            return Ok(cached.clone());
        }
        self.direct.check_constraints(table).await
    }

    async fn exclusion_constraints(
        &self,
        table: &str,
    ) -> Result<Vec<ExclusionConstraintDefinition>> {
        if let Some(cached) = self.cache.exclusion_constraints.get(table) {
            return Ok(cached.clone());
        }
        self.direct.exclusion_constraints(table).await
    }

    async fn unique_constraints(&self, table: &str) -> Result<Vec<UniqueConstraintDefinition>> {
        if let Some(cached) = self.cache.unique_constraints.get(table) {
            return Ok(cached.clone());
        }
        self.direct.unique_constraints(table).await
    }

    async fn table_options(&self, table: &str) -> Result<TableOptions> {
        if let Some(cached) = self.cache.table_options.get(table) {
            return Ok(cached.clone());
        }
        self.direct.table_options(table).await
    }

    async fn table_comment(&self, table: &str) -> Result<Option<String>> {
        if let Some(cached) = self.cache.table_comments.get(table) {
            return Ok(cached.clone());
        }
        self.direct.table_comment(table).await
    }

    async fn inherited_table_names(&self, table: &str) -> Result<Vec<String>> {
        if let Some(cached) = self.cache.inherited_table_names.get(table) {
            return Ok(cached.clone());
        }
        self.direct.inherited_table_names(table).await
    }

    async fn table_partition_definition(&self, table: &str) -> Result<Option<String>> {
        if let Some(cached) = self.cache.partition_definitions.get(table) {
            return Ok(cached.clone());
        }
        self.direct.table_partition_definition(table).await
    }
}
