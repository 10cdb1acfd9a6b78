//! PostgreSQL catalog connection

use async_trait::async_trait;
use descry_core::{CatalogConnection, DescryError, QueryResult, Result, Row, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls, Row as PgRow, types::FromSql};

fn format_postgres_error(error: &tokio_postgres::Error) -> String {
    let Some(db_error) = error.as_db_error() else {
        return error.to_string();
    };

    let code = db_error.code();
    let mut message = db_error.message().to_string();

    if let Some(detail) = db_error.detail() {
        if !detail.trim().is_empty() {
            message.push_str(&format!(" (detail: {})", detail));
        }
    }

    if let Some(hint) = db_error.hint() {
        if !hint.trim().is_empty() {
            message.push_str(&format!(" (hint: {})", hint));
        }
    }

    format!("{} (code: {:?})", message, code)
}

/// Catalog query executor over a live PostgreSQL session
///
/// The client is held behind a mutex: a session is one transport
/// channel, so queries on it must serialize. Transaction management,
/// pooling and TLS are the embedding application's concern.
pub struct PostgresCatalog {
    client: Arc<Mutex<Client>>,
}

impl PostgresCatalog {
    /// Connect with a libpq-style connection string
    /// (`host=localhost user=postgres dbname=app`).
    pub async fn connect(config: &str) -> Result<Self> {
        tracing::info!("connecting to PostgreSQL catalog");
        let (client, connection) = tokio_postgres::connect(config, NoTls)
            .await
            .map_err(|e| DescryError::Connection(format_postgres_error(&e)))?;

        // The connection task owns the socket; it ends when the client drops.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        Ok(Self::from_client(client))
    }

    /// Wrap an already-established client
    pub fn from_client(client: Client) -> Self {
        Self {
            client: Arc::new(Mutex::new(client)),
        }
    }
}

#[async_trait]
impl CatalogConnection for PostgresCatalog {
    async fn query(&self, sql: &str, tag: &str) -> Result<QueryResult> {
        tracing::debug!(tag = %tag, sql_preview = %sql.chars().take(100).collect::<String>(), "executing catalog query");

        let client = self.client.lock().await;
        let pg_rows = client
            .query(sql, &[])
            .await
            .map_err(|e| DescryError::Query(format_postgres_error(&e)))?;

        let columns: Vec<String> = pg_rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let rows = pg_rows
            .iter()
            .map(|pg_row| {
                let values = (0..pg_row.len())
                    .map(|idx| postgres_to_value(pg_row, idx))
                    .collect::<Result<Vec<Value>>>()?;
                Ok(Row::new(columns.clone(), values))
            })
            .collect::<Result<Vec<Row>>>()?;

        Ok(QueryResult { columns, rows })
    }
}

/// Raw UTF-8 fallback for types without a dedicated conversion
/// (e.g. regtype renderings, custom enums).
struct PgFallbackString(String);

impl<'a> FromSql<'a> for PgFallbackString {
    fn from_sql(
        _: &tokio_postgres::types::Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        let text = String::from_utf8(raw.to_vec())?;
        Ok(Self(text))
    }

    fn accepts(_: &tokio_postgres::types::Type) -> bool {
        true
    }
}

/// Convert a PostgreSQL row value to our Value type
fn postgres_to_value(row: &PgRow, idx: usize) -> Result<Value> {
    let col = &row.columns()[idx];
    let type_name = col.type_().name();

    let value = match type_name {
        "bool" => row
            .try_get::<_, Option<bool>>(idx)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        "int2" | "smallint" => row
            .try_get::<_, Option<i16>>(idx)
            .ok()
            .flatten()
            .map(Value::Int16)
            .unwrap_or(Value::Null),
        "int4" | "int" | "integer" => row
            .try_get::<_, Option<i32>>(idx)
            .ok()
            .flatten()
            .map(Value::Int32)
            .unwrap_or(Value::Null),
        "int8" | "bigint" => row
            .try_get::<_, Option<i64>>(idx)
            .ok()
            .flatten()
            .map(Value::Int64)
            .unwrap_or(Value::Null),
        "oid" => row
            .try_get::<_, Option<u32>>(idx)
            .ok()
            .flatten()
            .map(Value::Oid)
            .unwrap_or(Value::Null),
        "float8" | "double precision" => row
            .try_get::<_, Option<f64>>(idx)
            .ok()
            .flatten()
            .map(Value::Float64)
            .unwrap_or(Value::Null),
        "text" | "varchar" | "bpchar" | "name" => row
            .try_get::<_, Option<String>>(idx)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
        // The internal single-byte "char" type (attidentity, contype, ...);
        // a zero byte is the empty value, not a character.
        "char" => row
            .try_get::<_, Option<i8>>(idx)
            .ok()
            .flatten()
            .filter(|v| *v != 0)
            .map(|v| Value::String((v as u8 as char).to_string()))
            .unwrap_or(Value::Null),
        "json" | "jsonb" => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .ok()
            .flatten()
            .map(Value::Json)
            .unwrap_or(Value::Null),
        // Array types - PostgreSQL prefixes array type names with underscore
        "_text" | "_varchar" | "_bpchar" | "_name" => row
            .try_get::<_, Option<Vec<String>>>(idx)
            .ok()
            .flatten()
            .map(|arr| Value::Array(arr.into_iter().map(Value::String).collect()))
            .unwrap_or(Value::Null),
        "_int2" => row
            .try_get::<_, Option<Vec<i16>>>(idx)
            .ok()
            .flatten()
            .map(|arr| Value::Array(arr.into_iter().map(Value::Int16).collect()))
            .unwrap_or(Value::Null),
        "_int4" => row
            .try_get::<_, Option<Vec<i32>>>(idx)
            .ok()
            .flatten()
            .map(|arr| Value::Array(arr.into_iter().map(Value::Int32).collect()))
            .unwrap_or(Value::Null),
        _ => {
            // Fallback for types without a dedicated branch: decode the
            // raw UTF-8 payload.
            row.try_get::<_, Option<PgFallbackString>>(idx)
                .ok()
                .flatten()
                .map(|value| Value::String(value.0))
                .unwrap_or(Value::Null)
        }
    };

    Ok(value)
}
