//! Structural parsing of catalog-rendered definition strings
//!
//! `pg_get_indexdef` / `pg_get_constraintdef` hand back SQL text, not
//! structured data. The decoders pull typed fields back out of that text
//! here. A string that does not match the expected structure is a
//! compatibility error and surfaces as [`DescryError::Decode`] - a
//! silently wrong definition is worse than a failed introspection call.

use crate::quoting::unquote_identifier;
use descry_core::{DescryError, IndexOrder, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static INDEX_DEF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s) USING (\w+?) \((.+?)\)(?: INCLUDE \((.+?)\))?( NULLS NOT DISTINCT)?(?: WHERE (.+))?$",
    )
    .expect("index definition pattern")
});

static KEY_EXPRESSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?P<column>\w+)"?\s?(?P<opclass>\w+_ops(?:_\w+)?)?\s?(?P<desc>DESC)?\s?(?P<nulls>NULLS (?:FIRST|LAST))?"#,
    )
    .expect("key expression pattern")
});

static CHECK_DEF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)CHECK \((.+)\)").expect("check definition pattern"));

static EXCLUDE_DEF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)EXCLUDE(?: USING (?P<using>\S+))? \((?P<expression>.+)\)")
        .expect("exclusion definition pattern")
});

static DEFERRABLE_CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r" DEFERRABLE(?: INITIALLY (?:IMMEDIATE|DEFERRED))?")
        .expect("deferrable clause pattern")
});

/// Structured form of a `pg_get_indexdef` string
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedIndexDefinition {
    pub using: String,
    /// Key expression list, verbatim text between the parentheses
    pub expressions: String,
    /// `INCLUDE (...)` column list, verbatim
    pub include: Option<String>,
    pub nulls_not_distinct: bool,
    /// Partial index predicate with the renderer's enclosing
    /// parentheses removed
    pub where_clause: Option<String>,
}

/// Extract `USING <method> (<keys>) [INCLUDE (...)] [NULLS NOT DISTINCT]
/// [WHERE <predicate>]` from a rendered index definition.
pub(crate) fn parse_index_definition(inddef: &str) -> Result<ParsedIndexDefinition> {
    let captures = INDEX_DEF_RE.captures(inddef).ok_or_else(|| {
        DescryError::Decode(format!("unrecognized index definition: {inddef}"))
    })?;
    Ok(ParsedIndexDefinition {
        using: captures[1].to_string(),
        expressions: captures[2].to_string(),
        include: captures.get(3).map(|m| m.as_str().to_string()),
        nulls_not_distinct: captures.get(4).is_some(),
        where_clause: captures
            .get(5)
            .map(|m| strip_enclosing_parens(m.as_str())),
    })
}

/// Non-default sort-order and operator-class annotations scanned from a
/// key expression list
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct KeyAnnotations {
    pub orders: BTreeMap<String, IndexOrder>,
    pub opclasses: BTreeMap<String, String>,
}

/// Scan a plain-column key list for trailing opclass / `DESC` /
/// `NULLS FIRST|LAST` tokens. Ascending order with the default opclass
/// and default nulls ordering records nothing.
pub(crate) fn scan_key_expressions(expressions: &str) -> KeyAnnotations {
    let mut annotations = KeyAnnotations::default();
    for captures in KEY_EXPRESSION_RE.captures_iter(expressions) {
        let Some(column) = captures.name("column") else {
            continue;
        };
        let column = column.as_str().to_string();
        if let Some(opclass) = captures.name("opclass") {
            annotations
                .opclasses
                .insert(column.clone(), opclass.as_str().to_string());
        }
        let desc = captures.name("desc").is_some();
        let order = match (desc, captures.name("nulls").map(|m| m.as_str())) {
            (true, Some("NULLS FIRST")) => Some(IndexOrder::DescNullsFirst),
            (true, Some("NULLS LAST")) => Some(IndexOrder::DescNullsLast),
            (false, Some("NULLS FIRST")) => Some(IndexOrder::NullsFirst),
            (false, Some("NULLS LAST")) => Some(IndexOrder::NullsLast),
            (true, _) => Some(IndexOrder::Desc),
            (false, _) => None,
        };
        if let Some(order) = order {
            annotations.orders.insert(column, order);
        }
    }
    annotations
}

/// Decode the `indkey` int2vector text rendering (`"1 2 0"`).
///
/// A zero entry marks an expression key, which switches the whole index
/// to expression decoding.
pub(crate) fn parse_indkey(indkey: &str) -> Result<Vec<i16>> {
    indkey
        .split_whitespace()
        .map(|part| {
            part.parse::<i16>()
                .map_err(|_| DescryError::Decode(format!("invalid indkey entry: {part}")))
        })
        .collect()
}

/// Extract the boolean expression from a rendered check constraint
/// (`CHECK ((price > 0))` yields `(price > 0)`).
pub(crate) fn extract_check_expression(constraintdef: &str) -> Result<String> {
    CHECK_DEF_RE
        .captures(constraintdef)
        .map(|captures| captures[1].to_string())
        .ok_or_else(|| {
            DescryError::Decode(format!("unrecognized check constraint: {constraintdef}"))
        })
}

/// Structured form of a `pg_get_constraintdef` exclusion constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedExclusionDefinition {
    pub using: String,
    /// Element expression list, verbatim
    pub expression: String,
    pub predicate: Option<String>,
}

/// Split a rendered exclusion constraint into access method, element
/// list and predicate. The predicate loses any trailing deferrability
/// clause and the two parenthesis layers the renderer wraps it in.
pub(crate) fn parse_exclusion_definition(constraintdef: &str) -> Result<ParsedExclusionDefinition> {
    let (head, raw_predicate) = match constraintdef.split_once(" WHERE ") {
        Some((head, predicate)) => (head, Some(predicate)),
        None => (constraintdef, None),
    };
    let captures = EXCLUDE_DEF_RE.captures(head).ok_or_else(|| {
        DescryError::Decode(format!("unrecognized exclusion constraint: {constraintdef}"))
    })?;
    let using = captures
        .name("using")
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            DescryError::Decode(format!(
                "exclusion constraint without USING clause: {constraintdef}"
            ))
        })?;
    let predicate = raw_predicate.map(|predicate| {
        let predicate = DEFERRABLE_CLAUSE_RE.replace_all(predicate, "");
        strip_predicate_parens(&predicate)
    });
    Ok(ParsedExclusionDefinition {
        using,
        expression: captures["expression"].to_string(),
        predicate,
    })
}

/// Normalize one entry of a rendered column list: trim, collapse doubled
/// quotes, drop the enclosing quote layer.
pub(crate) fn clean_rendered_identifier(raw: &str) -> String {
    unquote_identifier(&raw.trim().replace("\"\"", "\""))
}

/// Strip one layer of enclosing parentheses, the renderer's wrapping of
/// a partial-index predicate.
fn strip_enclosing_parens(text: &str) -> String {
    text.strip_prefix('(')
        .and_then(|inner| inner.strip_suffix(')'))
        .map(str::to_string)
        .unwrap_or_else(|| text.to_string())
}

/// The exclusion renderer wraps its predicate twice (`WHERE ((a <> b))`);
/// drop exactly two characters on each side, matching that rendering.
fn strip_predicate_parens(predicate: &str) -> String {
    let chars: Vec<char> = predicate.chars().collect();
    if chars.len() >= 4 {
        chars[2..chars.len() - 2].iter().collect()
    } else {
        String::new()
    }
}
