//! Integration tests for the bulk preload / cache-or-compute pipeline
//!
//! The central property: for any table and introspection kind, the
//! preloaded path returns exactly what the direct single-table path
//! returns - the bulk queries are a performance optimization over the
//! same catalog facts, never a semantic change.

mod common;

use std::sync::Arc;

use common::{MockCatalog, opt_text, result, tables_result, text, text_array};
use descry_core::{
    DescryError, ForeignKeyAction, IndexColumns, IndexOrder, TableIntrospection, Value,
};
use descry_postgres::{
    Capabilities, CachedIntrospection, DirectIntrospection, PreloadCache, preload,
};

const INDEX_COLUMNS: &[&str] = &[
    "relname",
    "nspname",
    "index_name",
    "indisunique",
    "indkey",
    "inddef",
    "comment",
    "indisvalid",
    "key_expressions",
];

const COLUMN_COLUMNS: &[&str] = &[
    "relname",
    "nspname",
    "attnum",
    "attname",
    "format_type",
    "default_expr",
    "attnotnull",
    "atttypid",
    "atttypmod",
    "collname",
    "comment",
    "identity",
    "generated",
];

const FK_COLUMNS: &[&str] = &[
    "relname",
    "nspname",
    "name",
    "to_table",
    "on_update",
    "on_delete",
    "valid",
    "deferrable",
    "deferred",
    "conkey_names",
    "confkey_names",
];

fn index_row(
    relname: &str,
    nspname: &str,
    name: &str,
    unique: bool,
    indkey: &str,
    inddef: &str,
    key_expressions: &[&str],
) -> Vec<Value> {
    vec![
        text(relname),
        text(nspname),
        text(name),
        Value::Bool(unique),
        text(indkey),
        text(inddef),
        Value::Null,
        Value::Bool(true),
        text_array(key_expressions),
    ]
}

fn column_row(
    relname: &str,
    nspname: &str,
    attnum: i16,
    attname: &str,
    sql_type: &str,
) -> Vec<Value> {
    vec![
        text(relname),
        text(nspname),
        Value::Int16(attnum),
        text(attname),
        text(sql_type),
        Value::Null,
        Value::Bool(true),
        Value::Oid(23),
        Value::Int32(-1),
        Value::Null,
        Value::Null,
        Value::Null,
        Value::Null,
    ]
}

fn fk_row(
    relname: &str,
    nspname: &str,
    name: &str,
    to_table: &str,
    on_update: &str,
    on_delete: &str,
) -> Vec<Value> {
    vec![
        text(relname),
        text(nspname),
        text(name),
        text(to_table),
        text(on_update),
        text(on_delete),
        Value::Bool(true),
        Value::Bool(false),
        Value::Bool(false),
        text_array(&["author_id"]),
        text_array(&["id"]),
    ]
}

// ============ Equivalence ============

#[tokio::test]
async fn preloaded_indexes_match_the_direct_path() {
    let inddef = "CREATE UNIQUE INDEX index_users_on_email ON public.users USING btree (email)";
    let index_rows = result(
        INDEX_COLUMNS,
        vec![index_row(
            "users",
            "public",
            "index_users_on_email",
            true,
            "1",
            inddef,
            &["email"],
        )],
    );
    let conn = Arc::new(
        MockCatalog::new()
            .with_query_response("t.relname = 'users'", index_rows.clone())
            .with_query_response("INNER JOIN pg_index d", index_rows)
            .with_query_response("ORDER BY c.relname", tables_result(&["users"])),
    );

    let cached = CachedIntrospection::initialize(conn.clone()).await.unwrap();
    let preloaded = cached.indexes("users").await.unwrap();
    let direct = cached.direct().indexes("users").await.unwrap();

    assert_eq!(preloaded, direct);
    assert_eq!(preloaded.len(), 1);
    let index = &preloaded[0];
    assert!(index.unique);
    assert_eq!(index.using, "btree");
    assert_eq!(index.columns, IndexColumns::Names(vec!["email".to_string()]));
    assert!(index.orders.is_empty());
    assert!(index.opclasses.is_empty());
    assert_eq!(index.where_clause, None);
}

#[tokio::test]
async fn preloaded_columns_match_the_direct_path() {
    // One registration serves both paths: the scoped fallback query
    // contains the same FROM clause and returns the same rows.
    let column_rows = result(
        COLUMN_COLUMNS,
        vec![
            column_row("users", "public", 1, "id", "bigint"),
            column_row("users", "public", 2, "email", "character varying(255)"),
        ],
    );
    let conn = Arc::new(
        MockCatalog::new()
            .with_query_response("FROM pg_attribute a", column_rows)
            .with_query_response("ORDER BY c.relname", tables_result(&["users"])),
    );

    let cached = CachedIntrospection::initialize(conn.clone()).await.unwrap();
    let preloaded = cached.column_definitions("users").await.unwrap();
    let direct = cached.direct().column_definitions("users").await.unwrap();

    assert_eq!(preloaded, direct);
    assert_eq!(preloaded[1].sql_type, "character varying(255)");
    assert!(!preloaded[1].nullable, "attnotnull columns are not nullable");
}

// ============ Idempotence ============

#[tokio::test]
async fn preload_twice_yields_identical_caches() {
    let index_rows = result(
        INDEX_COLUMNS,
        vec![index_row(
            "users",
            "public",
            "idx_users_name",
            false,
            "1",
            "CREATE INDEX idx_users_name ON public.users USING btree (name)",
            &["name"],
        )],
    );
    let conn = Arc::new(
        MockCatalog::new().with_query_response("INNER JOIN pg_index d", index_rows),
    );
    let direct = DirectIntrospection::detect(conn).await.unwrap();
    let tables = vec!["users".to_string()];

    let first = preload(&direct, &tables).await.unwrap();
    let second = preload(&direct, &tables).await.unwrap();

    assert_eq!(first, second);
    assert!(!first.is_empty());
}

// ============ Ordinal invariants ============

#[tokio::test]
async fn column_order_follows_attribute_number() {
    // Catalog row order is deliberately shuffled; attnum decides.
    let column_rows = result(
        COLUMN_COLUMNS,
        vec![
            column_row("users", "public", 3, "email", "text"),
            column_row("users", "public", 1, "id", "bigint"),
            column_row("users", "public", 2, "name", "text"),
        ],
    );
    let conn = Arc::new(
        MockCatalog::new()
            .with_query_response("FROM pg_attribute a", column_rows)
            .with_query_response("ORDER BY c.relname", tables_result(&["users"])),
    );

    let cached = CachedIntrospection::initialize(conn).await.unwrap();
    let names: Vec<String> = cached
        .column_definitions("users")
        .await
        .unwrap()
        .into_iter()
        .map(|column| column.name)
        .collect();

    assert_eq!(names, vec!["id", "name", "email"]);
}

#[tokio::test]
async fn primary_key_order_follows_key_subscript() {
    let pk_rows = result(
        &["relname", "nspname", "idx", "attname"],
        vec![
            vec![text("users"), text("public"), Value::Int32(2), text("id")],
            vec![
                text("users"),
                text("public"),
                Value::Int32(1),
                text("tenant_id"),
            ],
        ],
    );
    let conn = Arc::new(
        MockCatalog::new()
            .with_query_response("WHERE indisprimary", pk_rows)
            .with_query_response("ORDER BY c.relname", tables_result(&["users"])),
    );

    let cached = CachedIntrospection::initialize(conn).await.unwrap();
    assert_eq!(
        cached.primary_keys("users").await.unwrap(),
        vec!["tenant_id", "id"]
    );
}

// ============ Index parsing through the pipeline ============

#[tokio::test]
async fn desc_and_include_columns_decode() {
    let index_rows = result(
        INDEX_COLUMNS,
        vec![index_row(
            "users",
            "public",
            "idx_users_name",
            false,
            "2 3",
            "CREATE INDEX idx_users_name ON public.users USING btree (name DESC) INCLUDE (age)",
            &["name", "age"],
        )],
    );
    let conn = Arc::new(
        MockCatalog::new()
            .with_query_response("INNER JOIN pg_index d", index_rows)
            .with_query_response("ORDER BY c.relname", tables_result(&["users"])),
    );

    let cached = CachedIntrospection::initialize(conn).await.unwrap();
    let indexes = cached.indexes("users").await.unwrap();

    let index = &indexes[0];
    assert_eq!(index.columns, IndexColumns::Names(vec!["name".to_string()]));
    assert_eq!(index.orders.get("name"), Some(&IndexOrder::Desc));
    assert_eq!(index.include, vec!["age"]);
}

#[tokio::test]
async fn expression_index_keeps_rendered_expressions() {
    let index_rows = result(
        INDEX_COLUMNS,
        vec![index_row(
            "users",
            "public",
            "idx_users_lower_name",
            false,
            "0",
            "CREATE INDEX idx_users_lower_name ON public.users USING btree (lower(name))",
            &["lower(name)"],
        )],
    );
    let conn = Arc::new(
        MockCatalog::new()
            .with_query_response("INNER JOIN pg_index d", index_rows)
            .with_query_response("ORDER BY c.relname", tables_result(&["users"])),
    );

    let cached = CachedIntrospection::initialize(conn).await.unwrap();
    let indexes = cached.indexes("users").await.unwrap();

    let index = &indexes[0];
    assert_eq!(
        index.columns,
        IndexColumns::Expressions("lower(name)".to_string())
    );
    assert!(index.orders.is_empty());
    assert!(index.opclasses.is_empty());
}

#[tokio::test]
async fn partial_index_predicate_is_preserved() {
    let index_rows = result(
        INDEX_COLUMNS,
        vec![index_row(
            "users",
            "public",
            "idx_users_active",
            false,
            "4",
            "CREATE INDEX idx_users_active ON public.users USING btree (col) WHERE (deleted IS FALSE)",
            &["col"],
        )],
    );
    let conn = Arc::new(
        MockCatalog::new()
            .with_query_response("INNER JOIN pg_index d", index_rows)
            .with_query_response("ORDER BY c.relname", tables_result(&["users"])),
    );

    let cached = CachedIntrospection::initialize(conn).await.unwrap();
    let indexes = cached.indexes("users").await.unwrap();

    assert_eq!(
        indexes[0].where_clause.as_deref(),
        Some("deleted IS FALSE")
    );
}

// ============ Foreign key action mapping ============

#[tokio::test]
async fn foreign_key_actions_map_from_catalog_codes() {
    let fk_rows = result(
        FK_COLUMNS,
        vec![
            fk_row("posts", "public", "fk_posts_author", "authors", "n", "c"),
            fk_row("posts", "public", "fk_posts_editor", "editors", "r", "a"),
        ],
    );
    let conn = Arc::new(
        MockCatalog::new()
            .with_query_response("contype = 'f'", fk_rows)
            .with_query_response("ORDER BY c.relname", tables_result(&["posts"])),
    );

    let cached = CachedIntrospection::initialize(conn).await.unwrap();
    let fks = cached.foreign_keys("posts").await.unwrap();

    assert_eq!(fks.len(), 2);
    assert_eq!(fks[0].name, "fk_posts_author");
    assert_eq!(fks[0].on_delete, ForeignKeyAction::Cascade);
    assert_eq!(fks[0].on_update, ForeignKeyAction::SetNull);
    assert_eq!(fks[0].columns, vec!["author_id"]);
    assert_eq!(fks[0].primary_keys, vec!["id"]);
    assert_eq!(fks[1].on_delete, ForeignKeyAction::NoAction);
    assert_eq!(fks[1].on_update, ForeignKeyAction::Restrict);
}

// ============ Constraint decoding ============

#[tokio::test]
async fn constraints_decode_from_rendered_definitions() {
    let check_rows = result(
        &["relname", "nspname", "conname", "constraintdef", "valid"],
        vec![vec![
            text("items"),
            text("public"),
            text("positive_price"),
            text("CHECK ((price > 0))"),
            Value::Bool(true),
        ]],
    );
    let unique_rows = result(
        &[
            "relname",
            "nspname",
            "conname",
            "condeferrable",
            "condeferred",
            "constraintdef",
            "conkey_names",
        ],
        vec![vec![
            text("items"),
            text("public"),
            text("items_sku_key"),
            Value::Bool(true),
            Value::Bool(false),
            text("UNIQUE NULLS NOT DISTINCT (sku)"),
            text_array(&["sku"]),
        ]],
    );
    let exclusion_rows = result(
        &[
            "relname",
            "nspname",
            "conname",
            "constraintdef",
            "condeferrable",
            "condeferred",
        ],
        vec![vec![
            text("items"),
            text("public"),
            text("items_no_overlap"),
            text("EXCLUDE USING gist (room WITH =, during WITH &&) WHERE ((active IS TRUE))"),
            Value::Bool(false),
            Value::Bool(false),
        ]],
    );
    let conn = Arc::new(
        MockCatalog::new()
            .with_query_response("contype = 'c'", check_rows)
            .with_query_response("contype = 'u'", unique_rows)
            .with_query_response("contype = 'x'", exclusion_rows)
            .with_query_response("ORDER BY c.relname", tables_result(&["items"])),
    );

    let cached = CachedIntrospection::initialize(conn).await.unwrap();

    let checks = cached.check_constraints("items").await.unwrap();
    assert_eq!(checks[0].expression, "(price > 0)");
    assert!(checks[0].valid);

    let uniques = cached.unique_constraints("items").await.unwrap();
    assert_eq!(uniques[0].columns, vec!["sku"]);
    assert!(uniques[0].nulls_not_distinct);
    assert_eq!(
        uniques[0].deferrable,
        Some(descry_core::Deferrable::Immediate)
    );

    let exclusions = cached.exclusion_constraints("items").await.unwrap();
    assert_eq!(exclusions[0].using, "gist");
    assert_eq!(exclusions[0].expression, "room WITH =, during WITH &&");
    assert_eq!(exclusions[0].where_clause.as_deref(), Some("active IS TRUE"));
    assert_eq!(exclusions[0].deferrable, None);
}

// ============ Table options ============

#[tokio::test]
async fn table_options_prefer_inheritance_over_partitioning() {
    let comment_rows = result(
        &["relname", "nspname", "comment"],
        vec![
            vec![text("events"), text("public"), text("audit table")],
            vec![text("measurements"), text("public"), opt_text(None)],
        ],
    );
    let inherits_rows = result(
        &["relname", "nspname", "parent_relname"],
        vec![
            vec![text("events"), text("public"), text("events_base")],
            vec![text("events"), text("public"), text("events_extra")],
        ],
    );
    let partition_rows = result(
        &["relname", "nspname", "partition_def"],
        vec![
            vec![text("events"), text("public"), text("LIST (source)")],
            vec![
                text("measurements"),
                text("public"),
                text("RANGE (logdate)"),
            ],
        ],
    );
    let conn = Arc::new(
        MockCatalog::new()
            .with_query_response("obj_description(c.oid", comment_rows)
            .with_query_response("FROM pg_inherits", inherits_rows)
            .with_query_response("pg_get_partkeydef", partition_rows)
            .with_query_response(
                "ORDER BY c.relname",
                tables_result(&["events", "measurements"]),
            ),
    );

    let cached = CachedIntrospection::initialize(conn).await.unwrap();

    let events = cached.table_options("events").await.unwrap();
    assert_eq!(events.comment.as_deref(), Some("audit table"));
    assert_eq!(
        events.options.as_deref(),
        Some("INHERITS (events_base, events_extra)")
    );

    let measurements = cached.table_options("measurements").await.unwrap();
    assert_eq!(measurements.comment, None);
    assert_eq!(
        measurements.options.as_deref(),
        Some("PARTITION BY RANGE (logdate)")
    );
}

// ============ Scope properties ============

#[tokio::test]
async fn wildcard_scope_concatenates_schemas() {
    let index_rows = result(
        INDEX_COLUMNS,
        vec![
            index_row(
                "t",
                "public",
                "idx_public",
                false,
                "1",
                "CREATE INDEX idx_public ON public.t USING btree (a)",
                &["a"],
            ),
            index_row(
                "t",
                "audit",
                "idx_audit",
                false,
                "1",
                "CREATE INDEX idx_audit ON audit.t USING btree (b)",
                &["b"],
            ),
        ],
    );
    let conn = Arc::new(
        MockCatalog::new()
            .with_query_response("INNER JOIN pg_index d", index_rows)
            .with_query_response("ORDER BY c.relname", tables_result(&["t", "public.t"])),
    );

    let cached = CachedIntrospection::initialize(conn).await.unwrap();

    // Unqualified name: both schemas, flattened in schema order.
    let all = cached.indexes("t").await.unwrap();
    let names: Vec<&str> = all.iter().map(|index| index.name.as_str()).collect();
    assert_eq!(names, vec!["idx_audit", "idx_public"]);

    // Qualified name: only the named schema's bucket.
    let scoped = cached.indexes("public.t").await.unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].name, "idx_public");
}

#[tokio::test]
async fn preloaded_table_without_rows_yields_empty_without_fallback() {
    let conn = Arc::new(
        MockCatalog::new().with_query_response("ORDER BY c.relname", tables_result(&["bare"])),
    );

    let cached = CachedIntrospection::initialize(conn.clone()).await.unwrap();

    assert!(cached.indexes("bare").await.unwrap().is_empty());
    assert!(cached.foreign_keys("bare").await.unwrap().is_empty());
    assert!(cached.check_constraints("bare").await.unwrap().is_empty());
    assert_eq!(cached.table_comment("bare").await.unwrap(), None);
    // Every answer came from the preload cycle, never a scoped query.
    assert_eq!(conn.queries_containing("'bare'"), 0);
}

// ============ Cache-or-compute gate ============

#[tokio::test]
async fn cache_miss_repeats_the_direct_query() {
    let conn = Arc::new(
        MockCatalog::new().with_query_response("ORDER BY c.relname", tables_result(&["users"])),
    );

    let cached = CachedIntrospection::initialize(conn.clone()).await.unwrap();

    // "adhoc" was created after the preload cycle; every call falls back,
    // and the fallback result is not written into the cache.
    assert!(cached.indexes("adhoc").await.unwrap().is_empty());
    assert!(cached.indexes("adhoc").await.unwrap().is_empty());
    assert_eq!(conn.queries_containing("'adhoc'"), 2);
}

#[tokio::test]
async fn gate_is_safe_with_an_empty_cache() {
    let index_rows = result(
        INDEX_COLUMNS,
        vec![index_row(
            "users",
            "public",
            "idx_users_name",
            false,
            "1",
            "CREATE INDEX idx_users_name ON public.users USING btree (name)",
            &["name"],
        )],
    );
    let conn = Arc::new(
        MockCatalog::new().with_query_response("t.relname = 'users'", index_rows),
    );
    let direct = DirectIntrospection::detect(conn.clone()).await.unwrap();

    // No preload at all: every accessor must fall through cleanly.
    let cached = CachedIntrospection::new(direct, PreloadCache::default());
    assert!(cached.cache().is_empty());

    let indexes = cached.indexes("users").await.unwrap();
    assert_eq!(indexes.len(), 1);
    assert_eq!(conn.queries_containing("'users'"), 1);
}

// ============ Failure propagation ============

#[tokio::test]
async fn preload_propagates_catalog_failures() {
    let conn = Arc::new(MockCatalog::new().with_failure());
    let direct = DirectIntrospection::with_capabilities(
        conn,
        Capabilities::from_version_num(170_000),
    );

    let error = preload(&direct, &["users".to_string()]).await.unwrap_err();
    assert!(matches!(error, DescryError::Query(_)));
}
