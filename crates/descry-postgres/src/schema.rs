//! Direct (single-table) introspection provider

use crate::bulk;
use crate::scope::{RelationKind, quoted_scope};
use async_trait::async_trait;
use descry_core::{
    CatalogConnection, CheckConstraintDefinition, ColumnDefinition, DescryError,
    ExclusionConstraintDefinition, ForeignKeyDefinition, IndexDefinition, Result, SCHEMA_TAG,
    TableIntrospection, TableOptions, UniqueConstraintDefinition, Value,
};
use std::sync::Arc;

const SERVER_VERSION_SQL: &str =
    "SELECT current_setting('server_version_num')::integer AS server_version_num";

/// Server feature set relevant to introspection, derived from
/// `server_version_num` once at provider construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// `GENERATED ... AS IDENTITY` columns (PostgreSQL 10+)
    pub identity_columns: bool,
    /// Stored generated columns (PostgreSQL 12+)
    pub generated_columns: bool,
    /// Declarative partitioning (PostgreSQL 10+)
    pub native_partitioning: bool,
}

impl Capabilities {
    pub fn from_version_num(version: i64) -> Self {
        Self {
            identity_columns: version >= 100_000,
            generated_columns: version >= 120_000,
            native_partitioning: version >= 100_000,
        }
    }
}

/// Introspection provider issuing one catalog query per call.
///
/// This is the fallback path behind the cache gate and the reference
/// semantics for the bulk path: its queries share their row shape with
/// the bulk queries, scoped down to a single table, and decode through
/// the same materializers.
pub struct DirectIntrospection<C: CatalogConnection> {
    conn: Arc<C>,
    capabilities: Capabilities,
}

impl<C: CatalogConnection> DirectIntrospection<C> {
    /// Query the server version and build a provider with the matching
    /// capability set.
    pub async fn detect(conn: Arc<C>) -> Result<Self> {
        let result = conn.query(SERVER_VERSION_SQL, SCHEMA_TAG).await?;
        let version = result
            .rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                DescryError::Decode("server did not report server_version_num".to_string())
            })?;
        Ok(Self::with_capabilities(conn, Capabilities::from_version_num(version)))
    }

    pub fn with_capabilities(conn: Arc<C>, capabilities: Capabilities) -> Self {
        Self { conn, capabilities }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub(crate) fn conn(&self) -> &C {
        &self.conn
    }

    /// List the base tables in the current schema search path; the
    /// session-initialization input to the bulk preloader.
    #[tracing::instrument(skip(self))]
    pub async fn tables(&self) -> Result<Vec<String>> {
        let result = self
            .conn
            .query(
                "SELECT c.relname
                   FROM pg_class c
                   LEFT JOIN pg_namespace n ON n.oid = c.relnamespace
                  WHERE n.nspname = ANY (current_schemas(false))
                    AND c.relkind IN ('r', 'p')
                  ORDER BY c.relname",
                SCHEMA_TAG,
            )
            .await?;
        result
            .rows
            .iter()
            .map(|row| {
                row.get(0)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| DescryError::Decode("table row without relname".to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl<C: CatalogConnection> TableIntrospection for DirectIntrospection<C> {
    #[tracing::instrument(skip(self))]
    async fn column_definitions(&self, table: &str) -> Result<Vec<ColumnDefinition>> {
        let scope = quoted_scope(table, None);
        let sql = bulk::column_definitions_sql(&self.capabilities, Some(&scope));
        let map = bulk::column_definitions_map(self.conn.query(&sql, SCHEMA_TAG).await?)?;
        bulk::decode_column_definitions_for(&map, table)
    }

    #[tracing::instrument(skip(self))]
    async fn primary_keys(&self, table: &str) -> Result<Vec<String>> {
        let scope = quoted_scope(table, None);
        let sql = bulk::primary_keys_sql(Some(&scope));
        let map = bulk::primary_keys_map(self.conn.query(&sql, SCHEMA_TAG).await?)?;
        bulk::decode_primary_keys_for(&map, table)
    }

    #[tracing::instrument(skip(self))]
    async fn indexes(&self, table: &str) -> Result<Vec<IndexDefinition>> {
        let scope = quoted_scope(table, None);
        let sql = bulk::indexes_sql(Some(&scope));
        let map = bulk::indexes_map(self.conn.query(&sql, SCHEMA_TAG).await?)?;
        bulk::decode_indexes_for(&map, table)
    }

    #[tracing::instrument(skip(self))]
    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDefinition>> {
        let scope = quoted_scope(table, None);
        let sql = bulk::foreign_keys_sql(Some(&scope));
        let map = bulk::constraints_map(self.conn.query(&sql, SCHEMA_TAG).await?)?;
        bulk::decode_foreign_keys_for(&map, table)
    }

    #[tracing::instrument(skip(self))]
    async fn check_constraints(&self, table: &str) -> Result<Vec<CheckConstraintDefinition>> {
        let scope = quoted_scope(table, None);
        let sql = bulk::check_constraints_sql(Some(&scope));
        let map = bulk::constraints_map(self.conn.query(&sql, SCHEMA_TAG).await?)?;
        bulk::decode_check_constraints_for(&map, table)
    }

    #[tracing::instrument(skip(self))]
    async fn exclusion_constraints(
        &self,
        table: &str,
    ) -> Result<Vec<ExclusionConstraintDefinition>> {
        let scope = quoted_scope(table, None);
        let sql = bulk::exclusion_constraints_sql(Some(&scope));
        let map = bulk::unsorted_map(self.conn.query(&sql, SCHEMA_TAG).await?)?;
        bulk::decode_exclusion_constraints_for(&map, table)
    }

    #[tracing::instrument(skip(self))]
    async fn unique_constraints(&self, table: &str) -> Result<Vec<UniqueConstraintDefinition>> {
        let scope = quoted_scope(table, None);
        let sql = bulk::unique_constraints_sql(Some(&scope));
        let map = bulk::constraints_map(self.conn.query(&sql, SCHEMA_TAG).await?)?;
        bulk::decode_unique_constraints_for(&map, table)
    }

    #[tracing::instrument(skip(self))]
    async fn table_options(&self, table: &str) -> Result<TableOptions> {
        let comment = self.table_comment(table).await?;
        let inherited = self.inherited_table_names(table).await?;
        let options = if !inherited.is_empty() {
            Some(format!("INHERITS ({})", inherited.join(", ")))
        } else {
            self.table_partition_definition(table)
                .await?
                .map(|definition| format!("PARTITION BY {definition}"))
        };
        Ok(TableOptions { comment, options })
    }

    #[tracing::instrument(skip(self))]
    async fn table_comment(&self, table: &str) -> Result<Option<String>> {
        let scope = quoted_scope(table, Some(RelationKind::BaseTable));
        let sql = bulk::table_comment_sql(Some(&scope));
        let map = bulk::unsorted_map(self.conn.query(&sql, SCHEMA_TAG).await?)?;
        Ok(bulk::decode_table_comment_for(&map, table))
    }

    #[tracing::instrument(skip(self))]
    async fn inherited_table_names(&self, table: &str) -> Result<Vec<String>> {
        let scope = quoted_scope(table, Some(RelationKind::BaseTable));
        let sql = bulk::inherited_table_names_sql(Some(&scope));
        let map = bulk::unsorted_map(self.conn.query(&sql, SCHEMA_TAG).await?)?;
        bulk::decode_inherited_table_names_for(&map, table)
    }

    #[tracing::instrument(skip(self))]
    async fn table_partition_definition(&self, table: &str) -> Result<Option<String>> {
        if !self.capabilities.native_partitioning {
            return Ok(None);
        }
        let scope = quoted_scope(table, Some(RelationKind::BaseTable));
        let sql = bulk::table_partition_definition_sql(Some(&scope));
        let map = bulk::unsorted_map(self.conn.query(&sql, SCHEMA_TAG).await?)?;
        Ok(bulk::decode_partition_definition_for(&map, table))
    }
}
