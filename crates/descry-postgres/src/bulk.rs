//! Bulk catalog decoders and the preloader
//!
//! Each introspection kind has one bulk query covering every table in
//! the current schema search path - table filtering happens client-side
//! by grouping rows into a [`ScopeMap`]. [`preload`] runs all of them
//! once per session, so describing N tables costs a constant number of
//! catalog round trips instead of O(N).
//!
//! The same SQL builders also render the single-table fallback queries:
//! passing a [`TableScope`] swaps the search-path filter for a
//! `relname`/`nspname` condition and leaves the row shape untouched, so
//! bulk and fallback results decode through identical code.

use crate::cache::PreloadCache;
use crate::decode;
use crate::grouping::ScopeMap;
use crate::quoting::quote_literal;
use crate::schema::{Capabilities, DirectIntrospection};
use crate::scope::{RelationKind, TableScope, quoted_scope};
use descry_core::{
    CatalogConnection, CheckConstraintDefinition, ColumnDefinition, DescryError,
    ExclusionConstraintDefinition, ForeignKeyDefinition, IndexDefinition, QueryResult, Result, Row,
    SCHEMA_TAG, TableOptions, UniqueConstraintDefinition, Value,
};

/// Run every bulk decoder once over `table_names` and return the
/// resulting grouped cache.
///
/// Kinds run in a fixed order; the composite table-options kind is
/// assembled last from the already-preloaded comment, inheritance and
/// partition micro-kinds. Any catalog failure propagates and the
/// partially built cache is dropped - the gate stays safe because a
/// missing cache entry simply falls back to a direct query.
pub async fn preload<C: CatalogConnection>(
    direct: &DirectIntrospection<C>,
    table_names: &[String],
) -> Result<PreloadCache> {
    tracing::debug!(tables = table_names.len(), "preloading catalog introspection");
    let mut cache = PreloadCache::default();
    preload_column_definitions(direct, table_names, &mut cache).await?;
    preload_primary_keys(direct, table_names, &mut cache).await?;
    preload_indexes(direct, table_names, &mut cache).await?;
    preload_foreign_keys(direct, table_names, &mut cache).await?;
    preload_check_constraints(direct, table_names, &mut cache).await?;
    preload_exclusion_constraints(direct, table_names, &mut cache).await?;
    preload_unique_constraints(direct, table_names, &mut cache).await?;
    preload_table_comment(direct, table_names, &mut cache).await?;
    preload_inherited_table_names(direct, table_names, &mut cache).await?;
    preload_table_partition_definition(direct, table_names, &mut cache).await?;
    build_table_options(table_names, &mut cache);
    Ok(cache)
}

// ---------------------------------------------------------------------------
// SQL builders
//
// `scope: None` renders the bulk form (search-path filter only);
// `Some(scope)` renders the single-table fallback form.

fn scope_condition(alias: &str, scope: Option<&TableScope>) -> String {
    match scope {
        None => "n.nspname = ANY (current_schemas(false))".to_string(),
        Some(scope) => format!(
            "{alias}.relname = {} AND {}",
            scope.name,
            scope.schema_condition()
        ),
    }
}

/// Relation-kind filter for the base-table-scoped queries; the direct
/// path carries the kind on its scope, the bulk path defaults it.
fn relkind_filter(alias: &str, scope: Option<&TableScope>) -> String {
    scope
        .and_then(|scope| scope.kind)
        .unwrap_or(RelationKind::BaseTable)
        .condition(alias)
}

pub(crate) fn column_definitions_sql(
    capabilities: &Capabilities,
    scope: Option<&TableScope>,
) -> String {
    let identity = if capabilities.identity_columns {
        "a.attidentity"
    } else {
        "''"
    };
    let generated = if capabilities.generated_columns {
        "a.attgenerated"
    } else {
        "''"
    };
    format!(
        "SELECT t.relname, n.nspname, a.attnum, a.attname,
                format_type(a.atttypid, a.atttypmod),
                pg_get_expr(d.adbin, d.adrelid), a.attnotnull, a.atttypid, a.atttypmod,
                co.collname, col_description(a.attrelid, a.attnum) AS comment,
                {identity} AS identity, {generated} AS generated
           FROM pg_attribute a
           JOIN pg_class t ON a.attrelid = t.oid
           JOIN pg_namespace n ON n.oid = t.relnamespace
           LEFT JOIN pg_attrdef d ON a.attrelid = d.adrelid AND a.attnum = d.adnum
           LEFT JOIN pg_type ty ON a.atttypid = ty.oid
           LEFT JOIN pg_collation co ON a.attcollation = co.oid AND a.attcollation <> ty.typcollation
          WHERE a.attnum > 0
            AND NOT a.attisdropped
            AND {relkind}
            AND {scope}",
        relkind = relkind_filter("t", scope),
        scope = scope_condition("t", scope),
    )
}

pub(crate) fn primary_keys_sql(scope: Option<&TableScope>) -> String {
    format!(
        "SELECT t.relname, n.nspname, i.idx, a.attname
           FROM (
                  SELECT indrelid, indkey, generate_subscripts(indkey, 1) AS idx
                    FROM pg_index
                   WHERE indisprimary
                ) i
           JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = i.indkey[i.idx]
           JOIN pg_class t ON t.oid = i.indrelid
           JOIN pg_namespace n ON n.oid = t.relnamespace
          WHERE {scope}",
        scope = scope_condition("t", scope),
    )
}

pub(crate) fn indexes_sql(scope: Option<&TableScope>) -> String {
    format!(
        "SELECT DISTINCT t.relname, n.nspname, i.relname AS index_name, d.indisunique,
                d.indkey::text AS indkey, pg_get_indexdef(d.indexrelid) AS inddef,
                obj_description(i.oid, 'pg_class') AS comment, d.indisvalid,
                ARRAY(
                  SELECT pg_get_indexdef(d.indexrelid, k + 1, true)
                    FROM generate_subscripts(d.indkey, 1) AS k
                   ORDER BY k
                ) AS key_expressions
           FROM pg_class t
          INNER JOIN pg_index d ON t.oid = d.indrelid
          INNER JOIN pg_class i ON d.indexrelid = i.oid
           LEFT JOIN pg_namespace n ON n.oid = t.relnamespace
          WHERE i.relkind IN ('i', 'I')
            AND NOT d.indisprimary
            AND {scope}",
        scope = scope_condition("t", scope),
    )
}

pub(crate) fn foreign_keys_sql(scope: Option<&TableScope>) -> String {
    format!(
        "SELECT t1.relname AS relname, n.nspname AS nspname, c.conname AS name,
                t2.oid::regclass::text AS to_table,
                c.confupdtype AS on_update, c.confdeltype AS on_delete,
                c.convalidated AS valid, c.condeferrable AS deferrable, c.condeferred AS deferred,
                (
                  SELECT array_agg(a.attname ORDER BY idx)
                    FROM (
                           SELECT idx, c.conkey[idx] AS conkey_elem
                             FROM generate_subscripts(c.conkey, 1) AS idx
                         ) indexed_conkeys
                    JOIN pg_attribute a ON a.attrelid = t1.oid AND a.attnum = indexed_conkeys.conkey_elem
                ) AS conkey_names,
                (
                  SELECT array_agg(a.attname ORDER BY idx)
                    FROM (
                           SELECT idx, c.confkey[idx] AS confkey_elem
                             FROM generate_subscripts(c.confkey, 1) AS idx
                         ) indexed_confkeys
                    JOIN pg_attribute a ON a.attrelid = t2.oid AND a.attnum = indexed_confkeys.confkey_elem
                ) AS confkey_names
           FROM pg_constraint c
           JOIN pg_class t1 ON c.conrelid = t1.oid
           JOIN pg_class t2 ON c.confrelid = t2.oid
           JOIN pg_namespace n ON c.connamespace = n.oid
          WHERE c.contype = 'f'
            AND {scope}
          ORDER BY c.conname",
        scope = scope_condition("t1", scope),
    )
}

pub(crate) fn check_constraints_sql(scope: Option<&TableScope>) -> String {
    format!(
        "SELECT t.relname AS relname, n.nspname AS nspname, c.conname AS conname,
                pg_get_constraintdef(c.oid, true) AS constraintdef, c.convalidated AS valid
           FROM pg_constraint c
           JOIN pg_class t ON c.conrelid = t.oid
           JOIN pg_namespace n ON n.oid = c.connamespace
          WHERE c.contype = 'c'
            AND {scope}",
        scope = scope_condition("t", scope),
    )
}

pub(crate) fn exclusion_constraints_sql(scope: Option<&TableScope>) -> String {
    format!(
        "SELECT t.relname AS relname, n.nspname AS nspname, c.conname AS conname,
                pg_get_constraintdef(c.oid) AS constraintdef,
                c.condeferrable, c.condeferred
           FROM pg_constraint c
           JOIN pg_class t ON c.conrelid = t.oid
           JOIN pg_namespace n ON n.oid = c.connamespace
          WHERE c.contype = 'x'
            AND {scope}",
        scope = scope_condition("t", scope),
    )
}

pub(crate) fn unique_constraints_sql(scope: Option<&TableScope>) -> String {
    format!(
        "SELECT t.relname AS relname, n.nspname AS nspname, c.conname AS conname,
                c.condeferrable, c.condeferred,
                pg_get_constraintdef(c.oid) AS constraintdef,
                (
                  SELECT array_agg(a.attname ORDER BY idx)
                    FROM (
                           SELECT idx, c.conkey[idx] AS conkey_elem
                             FROM generate_subscripts(c.conkey, 1) AS idx
                         ) indexed_conkeys
                    JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = indexed_conkeys.conkey_elem
                ) AS conkey_names
           FROM pg_constraint c
           JOIN pg_class t ON c.conrelid = t.oid
           JOIN pg_namespace n ON n.oid = c.connamespace
          WHERE c.contype = 'u'
            AND {scope}",
        scope = scope_condition("t", scope),
    )
}

pub(crate) fn table_comment_sql(scope: Option<&TableScope>) -> String {
    format!(
        "SELECT c.relname AS relname, n.nspname AS nspname,
                obj_description(c.oid, 'pg_class') AS comment
           FROM pg_class c
           LEFT JOIN pg_namespace n ON n.oid = c.relnamespace
          WHERE {relkind}
            AND {scope}",
        relkind = relkind_filter("c", scope),
        scope = scope_condition("c", scope),
    )
}

pub(crate) fn inherited_table_names_sql(scope: Option<&TableScope>) -> String {
    format!(
        "SELECT child.relname AS relname, n.nspname AS nspname, parent.relname AS parent_relname
           FROM pg_inherits i
           JOIN pg_class child ON i.inhrelid = child.oid
           JOIN pg_class parent ON i.inhparent = parent.oid
           LEFT JOIN pg_namespace n ON n.oid = child.relnamespace
          WHERE {relkind}
            AND {scope}",
        relkind = relkind_filter("child", scope),
        scope = scope_condition("child", scope),
    )
}

pub(crate) fn table_partition_definition_sql(scope: Option<&TableScope>) -> String {
    format!(
        "SELECT c.relname AS relname, n.nspname AS nspname,
                pg_get_partkeydef(c.oid) AS partition_def
           FROM pg_class c
           LEFT JOIN pg_namespace n ON n.oid = c.relnamespace
          WHERE {relkind}
            AND {scope}",
        relkind = relkind_filter("c", scope),
        scope = scope_condition("c", scope),
    )
}

// ---------------------------------------------------------------------------
// Grouping

/// Partition result rows by `(quoted table name, schema name)`; every
/// bulk query selects `relname, nspname` as its first two columns.
fn group_by_scope(result: QueryResult) -> Result<ScopeMap<Row>> {
    let mut map = ScopeMap::new();
    for row in result.rows {
        let relname = row
            .get(0)
            .and_then(Value::as_str)
            .ok_or_else(|| DescryError::Decode("bulk row without relname".to_string()))?
            .to_string();
        let nspname = row
            .get(1)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        map.insert(quote_literal(&relname), nspname, row);
    }
    Ok(map)
}

fn sort_by_i64_at(map: &mut ScopeMap<Row>, idx: usize) {
    map.sort_buckets_by_key(|row| row.get(idx).and_then(Value::as_i64).unwrap_or_default());
}

fn sort_by_text_at(map: &mut ScopeMap<Row>, idx: usize) {
    map.sort_buckets_by_key(|row| {
        row.get(idx)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    });
}

pub(crate) fn column_definitions_map(result: QueryResult) -> Result<ScopeMap<Row>> {
    let mut map = group_by_scope(result)?;
    sort_by_i64_at(&mut map, 2); // attnum
    Ok(map)
}

pub(crate) fn primary_keys_map(result: QueryResult) -> Result<ScopeMap<Row>> {
    let mut map = group_by_scope(result)?;
    sort_by_i64_at(&mut map, 2); // generate_subscripts idx
    Ok(map)
}

pub(crate) fn indexes_map(result: QueryResult) -> Result<ScopeMap<Row>> {
    let mut map = group_by_scope(result)?;
    sort_by_text_at(&mut map, 2); // index name
    Ok(map)
}

pub(crate) fn constraints_map(result: QueryResult) -> Result<ScopeMap<Row>> {
    let mut map = group_by_scope(result)?;
    sort_by_text_at(&mut map, 2); // conname
    Ok(map)
}

/// Exclusion constraints and the micro-kinds keep the catalog's own
/// row order.
pub(crate) fn unsorted_map(result: QueryResult) -> Result<ScopeMap<Row>> {
    group_by_scope(result)
}

// ---------------------------------------------------------------------------
// Per-table decoding from a grouped map
//
// Materialization is lazy: only tables actually requested are decoded.

pub(crate) fn decode_column_definitions_for(
    map: &ScopeMap<Row>,
    table: &str,
) -> Result<Vec<ColumnDefinition>> {
    map.resolve(&quoted_scope(table, None))
        .into_iter()
        .map(decode::column_definition)
        .collect()
}

pub(crate) fn decode_primary_keys_for(map: &ScopeMap<Row>, table: &str) -> Result<Vec<String>> {
    map.resolve(&quoted_scope(table, None))
        .into_iter()
        .map(decode::primary_key_column)
        .collect()
}

pub(crate) fn decode_indexes_for(
    map: &ScopeMap<Row>,
    table: &str,
) -> Result<Vec<IndexDefinition>> {
    map.resolve(&quoted_scope(table, None))
        .into_iter()
        .map(|row| decode::index_definition(table, row))
        .collect()
}

pub(crate) fn decode_foreign_keys_for(
    map: &ScopeMap<Row>,
    table: &str,
) -> Result<Vec<ForeignKeyDefinition>> {
    map.resolve(&quoted_scope(table, None))
        .into_iter()
        .map(|row| decode::foreign_key_definition(table, row))
        .collect()
}

pub(crate) fn decode_check_constraints_for(
    map: &ScopeMap<Row>,
    table: &str,
) -> Result<Vec<CheckConstraintDefinition>> {
    map.resolve(&quoted_scope(table, None))
        .into_iter()
        .map(|row| decode::check_constraint_definition(table, row))
        .collect()
}

pub(crate) fn decode_exclusion_constraints_for(
    map: &ScopeMap<Row>,
    table: &str,
) -> Result<Vec<ExclusionConstraintDefinition>> {
    map.resolve(&quoted_scope(table, None))
        .into_iter()
        .map(|row| decode::exclusion_constraint_definition(table, row))
        .collect()
}

pub(crate) fn decode_unique_constraints_for(
    map: &ScopeMap<Row>,
    table: &str,
) -> Result<Vec<UniqueConstraintDefinition>> {
    map.resolve(&quoted_scope(table, None))
        .into_iter()
        .map(|row| decode::unique_constraint_definition(table, row))
        .collect()
}

pub(crate) fn decode_table_comment_for(map: &ScopeMap<Row>, table: &str) -> Option<String> {
    map.resolve(&quoted_scope(table, Some(RelationKind::BaseTable)))
        .first()
        .and_then(|row| row.get(2))
        .and_then(Value::as_str)
        .filter(|comment| !comment.is_empty())
        .map(str::to_string)
}

pub(crate) fn decode_inherited_table_names_for(
    map: &ScopeMap<Row>,
    table: &str,
) -> Result<Vec<String>> {
    map.resolve(&quoted_scope(table, Some(RelationKind::BaseTable)))
        .into_iter()
        .map(|row| {
            row.get(2)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| DescryError::Decode("inherits row without parent name".to_string()))
        })
        .collect()
}

pub(crate) fn decode_partition_definition_for(map: &ScopeMap<Row>, table: &str) -> Option<String> {
    map.resolve(&quoted_scope(table, Some(RelationKind::BaseTable)))
        .first()
        .and_then(|row| row.get(2))
        .and_then(Value::as_str)
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Preload steps, one bulk query each

async fn preload_column_definitions<C: CatalogConnection>(
    direct: &DirectIntrospection<C>,
    table_names: &[String],
    cache: &mut PreloadCache,
) -> Result<()> {
    let sql = column_definitions_sql(direct.capabilities(), None);
    let map = column_definitions_map(direct.conn().query(&sql, SCHEMA_TAG).await?)?;
    for table in table_names {
        cache
            .column_definitions
            .insert(table.clone(), decode_column_definitions_for(&map, table)?);
    }
    Ok(())
}

async fn preload_primary_keys<C: CatalogConnection>(
    direct: &DirectIntrospection<C>,
    table_names: &[String],
    cache: &mut PreloadCache,
) -> Result<()> {
    let map = primary_keys_map(
        direct
            .conn()
            .query(&primary_keys_sql(None), SCHEMA_TAG)
            .await?,
    )?;
    for table in table_names {
        cache
            .primary_keys
            .insert(table.clone(), decode_primary_keys_for(&map, table)?);
    }
    Ok(())
}

async fn preload_indexes<C: CatalogConnection>(
    direct: &DirectIntrospection<C>,
    table_names: &[String],
    cache: &mut PreloadCache,
) -> Result<()> {
    let map = indexes_map(direct.conn().query(&indexes_sql(None), SCHEMA_TAG).await?)?;
    for table in table_names {
        cache
            .indexes
            .insert(table.clone(), decode_indexes_for(&map, table)?);
    }
    Ok(())
}

async fn preload_foreign_keys<C: CatalogConnection>(
    direct: &DirectIntrospection<C>,
    table_names: &[String],
    cache: &mut PreloadCache,
) -> Result<()> {
    let map = constraints_map(
        direct
            .conn()
            .query(&foreign_keys_sql(None), SCHEMA_TAG)
            .await?,
    )?;
    for table in table_names {
        cache
            .foreign_keys
            .insert(table.clone(), decode_foreign_keys_for(&map, table)?);
    }
    Ok(())
}

async fn preload_check_constraints<C: CatalogConnection>(
    direct: &DirectIntrospection<C>,
    table_names: &[String],
    cache: &mut PreloadCache,
) -> Result<()> {
    let map = constraints_map(
        direct
            .conn()
            .query(&check_constraints_sql(None), SCHEMA_TAG)
            .await?,
    )?;
    for table in table_names {
        cache
            .check_constraints
            .insert(table.clone(), decode_check_constraints_for(&map, table)?);
    }
    Ok(())
}

async fn preload_exclusion_constraints<C: CatalogConnection>(
    direct: &DirectIntrospection<C>,
    table_names: &[String],
    cache: &mut PreloadCache,
) -> Result<()> {
    let map = unsorted_map(
        direct
            .conn()
            .query(&exclusion_constraints_sql(None), SCHEMA_TAG)
            .await?,
    )?;
    for table in table_names {
        cache
            .exclusion_constraints
            .insert(table.clone(), decode_exclusion_constraints_for(&map, table)?);
    }
    Ok(())
}

async fn preload_unique_constraints<C: CatalogConnection>(
    direct: &DirectIntrospection<C>,
    table_names: &[String],
    cache: &mut PreloadCache,
) -> Result<()> {
    let map = constraints_map(
        direct
            .conn()
            .query(&unique_constraints_sql(None), SCHEMA_TAG)
            .await?,
    )?;
    for table in table_names {
        cache
            .unique_constraints
            .insert(table.clone(), decode_unique_constraints_for(&map, table)?);
    }
    Ok(())
}

async fn preload_table_comment<C: CatalogConnection>(
    direct: &DirectIntrospection<C>,
    table_names: &[String],
    cache: &mut PreloadCache,
) -> Result<()> {
    let map = unsorted_map(
        direct
            .conn()
            .query(&table_comment_sql(None), SCHEMA_TAG)
            .await?,
    )?;
    for table in table_names {
        cache
            .table_comments
            .insert(table.clone(), decode_table_comment_for(&map, table));
    }
    Ok(())
}

async fn preload_inherited_table_names<C: CatalogConnection>(
    direct: &DirectIntrospection<C>,
    table_names: &[String],
    cache: &mut PreloadCache,
) -> Result<()> {
    let map = unsorted_map(
        direct
            .conn()
            .query(&inherited_table_names_sql(None), SCHEMA_TAG)
            .await?,
    )?;
    for table in table_names {
        cache
            .inherited_table_names
            .insert(table.clone(), decode_inherited_table_names_for(&map, table)?);
    }
    Ok(())
}

async fn preload_table_partition_definition<C: CatalogConnection>(
    direct: &DirectIntrospection<C>,
    table_names: &[String],
    cache: &mut PreloadCache,
) -> Result<()> {
    if !direct.capabilities().native_partitioning {
        for table in table_names {
            cache.partition_definitions.insert(table.clone(), None);
        }
        return Ok(());
    }
    let map = unsorted_map(
        direct
            .conn()
            .query(&table_partition_definition_sql(None), SCHEMA_TAG)
            .await?,
    )?;
    for table in table_names {
        cache
            .partition_definitions
            .insert(table.clone(), decode_partition_definition_for(&map, table));
    }
    Ok(())
}

/// Assemble the composite table-options kind from the micro-kinds
/// preloaded above. Inheritance wins over partitioning.
fn build_table_options(table_names: &[String], cache: &mut PreloadCache) {
    for table in table_names {
        let comment = cache.table_comments.get(table).cloned().flatten();
        let inherited = cache
            .inherited_table_names
            .get(table)
            .cloned()
            .unwrap_or_default();
        let options = if !inherited.is_empty() {
            Some(format!("INHERITS ({})", inherited.join(", ")))
        } else {
            cache
                .partition_definitions
                .get(table)
                .cloned()
                .flatten()
                .map(|definition| format!("PARTITION BY {definition}"))
        };
        cache
            .table_options
            .insert(table.clone(), TableOptions { comment, options });
    }
}
