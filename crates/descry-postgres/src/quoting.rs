//! PostgreSQL identifier and literal quoting
//!
//! Scope-map keys are built with [`quote_literal`] at decode time and at
//! lookup time; the two sides must agree or lookups silently miss and
//! every accessor falls back to a direct query.

/// Quote a string as a SQL literal (`users` becomes `'users'`)
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quote a string as a SQL identifier (`my table` becomes `"my table"`)
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Undo identifier quoting as applied by the catalog's rendering
/// functions: strip one enclosing layer of double quotes and collapse
/// doubled inner quotes. Unquoted input is returned as-is.
pub fn unquote_identifier(identifier: &str) -> String {
    if identifier.len() >= 2 && identifier.starts_with('"') && identifier.ends_with('"') {
        identifier[1..identifier.len() - 1].replace("\"\"", "\"")
    } else {
        identifier.to_string()
    }
}
