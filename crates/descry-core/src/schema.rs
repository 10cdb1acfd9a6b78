//! Schema introspection traits and definition types

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-table schema introspection interface
///
/// Implemented by the direct (one query per call) provider and by the
/// cache-backed provider that serves preloaded results and falls back to
/// the direct provider on a miss. Table names may be schema-qualified
/// (`schema.table`, quoting allowed); an unqualified name matches across
/// the current schema search path.
#[async_trait]
pub trait TableIntrospection: Send + Sync {
    /// Get column definitions for a table, in attribute-number order
    async fn column_definitions(&self, table: &str) -> Result<Vec<ColumnDefinition>>;

    /// Get primary key column names for a table, in key order
    async fn primary_keys(&self, table: &str) -> Result<Vec<String>>;

    /// Get non-primary indexes for a table
    async fn indexes(&self, table: &str) -> Result<Vec<IndexDefinition>>;

    /// Get foreign keys for a table
    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDefinition>>;

    /// Get check constraints for a table
    async fn check_constraints(&self, table: &str) -> Result<Vec<CheckConstraintDefinition>>;

    /// Get exclusion constraints for a table
    async fn exclusion_constraints(&self, table: &str)
    -> Result<Vec<ExclusionConstraintDefinition>>;

    /// Get unique constraints for a table
    async fn unique_constraints(&self, table: &str) -> Result<Vec<UniqueConstraintDefinition>>;

    /// Get table comment and storage options (inheritance/partitioning)
    async fn table_options(&self, table: &str) -> Result<TableOptions>;

    /// Get the table comment
    async fn table_comment(&self, table: &str) -> Result<Option<String>>;

    /// Get parent table names for an inheritance child
    async fn inherited_table_names(&self, table: &str) -> Result<Vec<String>>;

    /// Get the partition key definition for a partitioned table
    async fn table_partition_definition(&self, table: &str) -> Result<Option<String>>;
}

/// Column definition
///
/// Decoded once from a joined `pg_attribute`/`pg_attrdef`/`pg_type`/
/// `pg_collation` row; immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    /// Rendered SQL type, e.g. `character varying(255)`
    pub sql_type: String,
    /// Default expression as rendered by the catalog
    pub default: Option<String>,
    pub nullable: bool,
    pub type_oid: u32,
    pub type_modifier: i32,
    /// Collation name, only when it differs from the type default
    pub collation: Option<String>,
    pub comment: Option<String>,
    pub identity: Option<ColumnIdentity>,
    /// True for stored generated columns
    pub generated: bool,
}

/// Identity column kind (`GENERATED ... AS IDENTITY`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnIdentity {
    /// `GENERATED ALWAYS` (catalog code `a`)
    Always,
    /// `GENERATED BY DEFAULT` (catalog code `d`)
    ByDefault,
}

/// Index definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub table: String,
    pub name: String,
    pub unique: bool,
    pub columns: IndexColumns,
    /// Per-column sort order, only non-default entries recorded
    pub orders: BTreeMap<String, IndexOrder>,
    /// Per-column operator class, only non-default entries recorded
    pub opclasses: BTreeMap<String, String>,
    /// Non-key `INCLUDE` columns
    pub include: Vec<String>,
    /// Partial index predicate, verbatim
    pub where_clause: Option<String>,
    /// Access method, e.g. `btree`, `gin`
    pub using: String,
    pub nulls_not_distinct: bool,
    pub comment: Option<String>,
    pub valid: bool,
}

/// Key columns of an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexColumns {
    /// Plain column names, in key order
    Names(Vec<String>),
    /// Rendered key expression list, kept verbatim when at least one key
    /// is an expression rather than a column
    Expressions(String),
}

impl IndexColumns {
    /// Plain column names, if this is a named-column index
    pub fn names(&self) -> Option<&[String]> {
        match self {
            IndexColumns::Names(names) => Some(names),
            IndexColumns::Expressions(_) => None,
        }
    }
}

/// Non-default per-column index ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexOrder {
    Desc,
    DescNullsFirst,
    DescNullsLast,
    NullsFirst,
    NullsLast,
}

/// Foreign key definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyDefinition {
    pub table: String,
    pub to_table: String,
    pub name: String,
    /// Source columns, in constraint key order
    pub columns: Vec<String>,
    /// Referenced columns, in constraint key order
    pub primary_keys: Vec<String>,
    pub on_delete: ForeignKeyAction,
    pub on_update: ForeignKeyAction,
    pub deferrable: Option<Deferrable>,
    pub valid: bool,
}

/// Foreign key referential action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForeignKeyAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

/// Constraint deferrability; `None` on the definition means not deferrable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Deferrable {
    /// `DEFERRABLE INITIALLY IMMEDIATE`
    Immediate,
    /// `DEFERRABLE INITIALLY DEFERRED`
    Deferred,
}

/// Check constraint definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConstraintDefinition {
    pub table: String,
    pub name: String,
    /// Boolean expression extracted from the rendered constraint
    pub expression: String,
    pub valid: bool,
}

/// Unique constraint definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniqueConstraintDefinition {
    pub table: String,
    pub name: String,
    pub columns: Vec<String>,
    pub nulls_not_distinct: bool,
    pub deferrable: Option<Deferrable>,
}

/// Exclusion constraint definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExclusionConstraintDefinition {
    pub table: String,
    pub name: String,
    /// Access method, e.g. `gist`
    pub using: String,
    /// Element expression list, verbatim
    pub expression: String,
    pub where_clause: Option<String>,
    pub deferrable: Option<Deferrable>,
}

/// Table comment and storage options
///
/// `options` encodes either `INHERITS (parents...)` or
/// `PARTITION BY <definition>`; inheritance takes precedence when both
/// would apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableOptions {
    pub comment: Option<String>,
    pub options: Option<String>,
}
