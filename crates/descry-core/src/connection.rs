//! Catalog connection trait

use crate::{QueryResult, Result};
use async_trait::async_trait;

/// Log marker for catalog queries
pub const SCHEMA_TAG: &str = "SCHEMA";

/// Executor for queries against the database catalog
///
/// One implementation wraps a live database session; tests substitute a
/// canned-response mock. Row order must be preserved as returned by the
/// catalog - decoders re-sort explicitly where a secondary order matters.
///
/// A single connection is not safe for concurrent use: all queries share
/// one transport channel and callers must serialize access per session.
#[async_trait]
pub trait CatalogConnection: Send + Sync {
    /// Execute a catalog query and return its rows in server order.
    ///
    /// `tag` is a log marker (usually [`SCHEMA_TAG`]) so catalog traffic
    /// can be told apart from application queries in traces.
    async fn query(&self, sql: &str, tag: &str) -> Result<QueryResult>;
}
