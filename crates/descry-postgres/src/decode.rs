//! Row-to-definition materializers
//!
//! Shared by the bulk decoders and the single-table fallback queries -
//! both paths produce rows of the same shape, so the equivalence of the
//! preloaded and direct results reduces to running the same code here.

use crate::parse;
use crate::quoting::unquote_identifier;
use descry_core::{
    CheckConstraintDefinition, ColumnDefinition, ColumnIdentity, Deferrable, DescryError,
    ExclusionConstraintDefinition, ForeignKeyAction, ForeignKeyDefinition, IndexColumns,
    IndexDefinition, Result, Row, UniqueConstraintDefinition, Value,
};
use std::collections::BTreeMap;

/// Columns query row:
/// `relname, nspname, attnum, attname, format_type, default, attnotnull,
///  atttypid, atttypmod, collname, comment, identity, generated`
pub(crate) fn column_definition(row: &Row) -> Result<ColumnDefinition> {
    let not_null = bool_at(row, 6, "attnotnull")?;
    Ok(ColumnDefinition {
        name: text_at(row, 3, "attname")?,
        sql_type: text_at(row, 4, "format_type")?,
        default: opt_text_at(row, 5),
        nullable: !not_null,
        type_oid: oid_at(row, 7, "atttypid")?,
        type_modifier: i32_at(row, 8, "atttypmod")?,
        collation: opt_text_at(row, 9),
        comment: opt_text_at(row, 10),
        identity: match opt_text_at(row, 11).as_deref() {
            Some("a") => Some(ColumnIdentity::Always),
            Some("d") => Some(ColumnIdentity::ByDefault),
            _ => None,
        },
        generated: matches!(opt_text_at(row, 12).as_deref(), Some("s")),
    })
}

/// Primary key query row: `relname, nspname, idx, attname`
pub(crate) fn primary_key_column(row: &Row) -> Result<String> {
    text_at(row, 3, "attname")
}

/// Indexes query row:
/// `relname, nspname, index_name, indisunique, indkey, inddef, comment,
///  indisvalid, key_expressions`
pub(crate) fn index_definition(table: &str, row: &Row) -> Result<IndexDefinition> {
    let name = text_at(row, 2, "index_name")?;
    let unique = bool_at(row, 3, "indisunique")?;
    let indkey = parse::parse_indkey(&text_at(row, 4, "indkey")?)?;
    let inddef = text_at(row, 5, "inddef")?;
    let comment = opt_text_at(row, 6);
    let valid = bool_at(row, 7, "indisvalid")?;
    let rendered_columns: Vec<String> = row
        .get(8)
        .and_then(Value::as_string_array)
        .ok_or_else(|| decode_error(row, "key_expressions"))?
        .iter()
        .map(|column| parse::clean_rendered_identifier(column))
        .collect();

    let parsed = parse::parse_index_definition(&inddef)?;
    let include: Vec<String> = parsed
        .include
        .as_deref()
        .map(|list| {
            list.split(',')
                .map(parse::clean_rendered_identifier)
                .collect()
        })
        .unwrap_or_default();

    // A zero position marks an expression key; order/opclass extraction
    // only applies to plain-column key lists.
    let (columns, orders, opclasses) = if indkey.contains(&0) {
        (
            IndexColumns::Expressions(parsed.expressions.clone()),
            BTreeMap::new(),
            BTreeMap::new(),
        )
    } else {
        // The catalog reports INCLUDE columns intermixed with the keys.
        let keys: Vec<String> = rendered_columns
            .into_iter()
            .filter(|column| !include.contains(column))
            .collect();
        let annotations = parse::scan_key_expressions(&parsed.expressions);
        (
            IndexColumns::Names(keys),
            annotations.orders,
            annotations.opclasses,
        )
    };

    Ok(IndexDefinition {
        table: table.to_string(),
        name,
        unique,
        columns,
        orders,
        opclasses,
        include,
        where_clause: parsed.where_clause,
        using: parsed.using,
        nulls_not_distinct: parsed.nulls_not_distinct,
        comment,
        valid,
    })
}

/// Foreign keys query row, by column name
pub(crate) fn foreign_key_definition(table: &str, row: &Row) -> Result<ForeignKeyDefinition> {
    Ok(ForeignKeyDefinition {
        table: table.to_string(),
        to_table: unquote_identifier(&text_named(row, "to_table")?),
        name: text_named(row, "name")?,
        columns: array_named(row, "conkey_names"),
        primary_keys: array_named(row, "confkey_names"),
        on_delete: foreign_key_action(&text_named(row, "on_delete")?),
        on_update: foreign_key_action(&text_named(row, "on_update")?),
        deferrable: constraint_deferrable(
            bool_named(row, "deferrable")?,
            bool_named(row, "deferred")?,
        ),
        valid: bool_named(row, "valid")?,
    })
}

/// Check constraints query row, by column name
pub(crate) fn check_constraint_definition(
    table: &str,
    row: &Row,
) -> Result<CheckConstraintDefinition> {
    Ok(CheckConstraintDefinition {
        table: table.to_string(),
        name: text_named(row, "conname")?,
        expression: parse::extract_check_expression(&text_named(row, "constraintdef")?)?,
        valid: bool_named(row, "valid")?,
    })
}

/// Exclusion constraints query row, by column name
pub(crate) fn exclusion_constraint_definition(
    table: &str,
    row: &Row,
) -> Result<ExclusionConstraintDefinition> {
    let parsed = parse::parse_exclusion_definition(&text_named(row, "constraintdef")?)?;
    Ok(ExclusionConstraintDefinition {
        table: table.to_string(),
        name: text_named(row, "conname")?,
        using: parsed.using,
        expression: parsed.expression,
        where_clause: parsed.predicate,
        deferrable: constraint_deferrable(
            bool_named(row, "condeferrable")?,
            bool_named(row, "condeferred")?,
        ),
    })
}

/// Unique constraints query row, by column name
pub(crate) fn unique_constraint_definition(
    table: &str,
    row: &Row,
) -> Result<UniqueConstraintDefinition> {
    let constraintdef = text_named(row, "constraintdef")?;
    Ok(UniqueConstraintDefinition {
        table: table.to_string(),
        name: text_named(row, "conname")?,
        columns: array_named(row, "conkey_names"),
        nulls_not_distinct: constraintdef.starts_with("UNIQUE NULLS NOT DISTINCT"),
        deferrable: constraint_deferrable(
            bool_named(row, "condeferrable")?,
            bool_named(row, "condeferred")?,
        ),
    })
}

/// Map a `confupdtype`/`confdeltype` catalog code to its action
pub(crate) fn foreign_key_action(code: &str) -> ForeignKeyAction {
    match code {
        "c" => ForeignKeyAction::Cascade,
        "n" => ForeignKeyAction::SetNull,
        "d" => ForeignKeyAction::SetDefault,
        "r" => ForeignKeyAction::Restrict,
        _ => ForeignKeyAction::NoAction,
    }
}

/// Combine `condeferrable`/`condeferred` into the deferrability option
pub(crate) fn constraint_deferrable(deferrable: bool, deferred: bool) -> Option<Deferrable> {
    match (deferrable, deferred) {
        (true, true) => Some(Deferrable::Deferred),
        (true, false) => Some(Deferrable::Immediate),
        (false, _) => None,
    }
}

fn decode_error(row: &Row, field: &str) -> DescryError {
    DescryError::Decode(format!(
        "missing or mistyped catalog field `{field}` (columns: {:?})",
        row.columns()
    ))
}

fn text_at(row: &Row, idx: usize, field: &str) -> Result<String> {
    row.get(idx)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| decode_error(row, field))
}

fn opt_text_at(row: &Row, idx: usize) -> Option<String> {
    row.get(idx)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn bool_at(row: &Row, idx: usize, field: &str) -> Result<bool> {
    row.get(idx)
        .and_then(Value::as_bool)
        .ok_or_else(|| decode_error(row, field))
}

fn oid_at(row: &Row, idx: usize, field: &str) -> Result<u32> {
    row.get(idx)
        .and_then(Value::as_oid)
        .ok_or_else(|| decode_error(row, field))
}

fn i32_at(row: &Row, idx: usize, field: &str) -> Result<i32> {
    row.get(idx)
        .and_then(Value::as_i64)
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| decode_error(row, field))
}

fn text_named(row: &Row, name: &str) -> Result<String> {
    row.get_by_name(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| decode_error(row, name))
}

fn bool_named(row: &Row, name: &str) -> Result<bool> {
    row.get_by_name(name)
        .and_then(Value::as_bool)
        .ok_or_else(|| decode_error(row, name))
}

fn array_named(row: &Row, name: &str) -> Vec<String> {
    row.get_by_name(name)
        .and_then(Value::as_string_array)
        .unwrap_or_default()
}
