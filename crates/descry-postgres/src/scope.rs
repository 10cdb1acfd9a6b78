//! Table scope resolution
//!
//! A scope is the `(table name, schema name)` pair used to attribute
//! bulk-query rows to tables and to look them up again. Callers that do
//! not schema-qualify a table name get the wildcard scope, which matches
//! across the whole schema search path.

use crate::quoting::{quote_literal, unquote_identifier};

/// Schema half of a table scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaScope {
    /// A specific schema name
    Named(String),
    /// Wildcard: any schema in the current search path, flattened
    Any,
}

/// Relation kind filter for scope construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Ordinary and partitioned tables (`relkind IN ('r', 'p')`)
    BaseTable,
}

impl RelationKind {
    /// SQL fragment constraining `relkind` on the given relation alias
    pub fn condition(self, alias: &str) -> String {
        match self {
            RelationKind::BaseTable => format!("{alias}.relkind IN ('r', 'p')"),
        }
    }
}

/// Resolved scope key for one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableScope {
    /// Table name as a quoted SQL literal, the scope-map key
    pub name: String,
    pub schema: SchemaScope,
    pub kind: Option<RelationKind>,
}

impl TableScope {
    /// SQL fragment constraining `n.nspname` to this scope's schema
    pub fn schema_condition(&self) -> String {
        match &self.schema {
            SchemaScope::Named(schema) => format!("n.nspname = {}", quote_literal(schema)),
            SchemaScope::Any => "n.nspname = ANY (current_schemas(false))".to_string(),
        }
    }

}

/// Build the scope key for a table name.
///
/// The name may be schema-qualified (`public.users`) and either part may
/// be a quoted identifier (`"public"."us.ers"`). An unqualified name
/// resolves to the [`SchemaScope::Any`] wildcard.
pub fn quoted_scope(table_name: &str, kind: Option<RelationKind>) -> TableScope {
    let (schema, name) = extract_schema_qualified_name(table_name);
    TableScope {
        name: quote_literal(&name),
        schema: match schema {
            Some(schema) => SchemaScope::Named(schema),
            None => SchemaScope::Any,
        },
        kind,
    }
}

/// Split `schema.table` on the first dot outside double quotes and
/// unquote both parts.
fn extract_schema_qualified_name(name: &str) -> (Option<String>, String) {
    let mut in_quotes = false;
    for (idx, ch) in name.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '.' if !in_quotes => {
                let schema = unquote_identifier(&name[..idx]);
                let table = unquote_identifier(&name[idx + 1..]);
                return (Some(schema), table);
            }
            _ => {}
        }
    }
    (None, unquote_identifier(name))
}
