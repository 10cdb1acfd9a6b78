//! PostgreSQL catalog introspection implementation
//!
//! Describing N tables naively costs seven-plus catalog round trips per
//! table. This crate replaces that with a constant number of bulk
//! queries: [`preload`] runs every decoder once over the full
//! table list and partitions the results per `(table, schema)` scope;
//! [`CachedIntrospection`] then serves per-table lookups from the
//! precomputed map, falling back to [`DirectIntrospection`] for tables
//! the preload cycle did not cover.

mod bulk;
mod cache;
mod connection;
mod decode;
mod grouping;
mod parse;
pub mod quoting;
mod schema;
mod scope;

pub use bulk::preload;
pub use cache::{CachedIntrospection, PreloadCache};
pub use connection::PostgresCatalog;
pub use grouping::ScopeMap;
pub use schema::{Capabilities, DirectIntrospection};
pub use scope::{RelationKind, SchemaScope, TableScope, quoted_scope};
