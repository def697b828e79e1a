//! Value encoding for parameter binding and inline interpolation.
//!
//! Every value headed for a SQL statement resolves to one of two positions:
//! bound through a driver placeholder, or inlined into the statement text.
//! Backtick-delimited strings (`` `CURRENT_TIMESTAMP` ``) are SQL keyword
//! literals and always inline; everything else binds unless the caller
//! explicitly asked for inlining.

use crate::types::DbValue;

/// A value's position in a statement: bound via placeholder or spliced into
/// the SQL text.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    /// Pass through the driver's bind API.
    Bind(DbValue),
    /// Splice the string into the statement verbatim.
    Inline(String),
}

/// Return the keyword inside `` `...` `` when the string is a backtick
/// keyword literal, e.g. `` `CURRENT_TIMESTAMP` `` -> `CURRENT_TIMESTAMP`.
#[must_use]
pub fn keyword_literal(s: &str) -> Option<&str> {
    let inner = s.strip_prefix('`')?.strip_suffix('`')?;
    if inner.is_empty() || inner.contains('`') {
        return None;
    }
    Some(inner)
}

/// Resolve a value to its bind-or-inline position, applying the encoding
/// rules for compound values:
///
/// - backtick keyword strings inline verbatim;
/// - JSON objects and arrays-of-objects serialize to JSON text;
/// - flat scalar sequences join with `|` into a single string;
/// - an empty sequence binds as the literal text `[]`;
/// - everything else binds natively.
#[must_use]
pub fn prepare(value: &DbValue) -> BoundValue {
    match value {
        DbValue::Text(s) => match keyword_literal(s) {
            Some(keyword) => BoundValue::Inline(keyword.to_string()),
            None => BoundValue::Bind(value.clone()),
        },
        DbValue::Json(json) => BoundValue::Bind(DbValue::Text(json.to_string())),
        DbValue::Array(items) => BoundValue::Bind(DbValue::Text(serialize_sequence(items))),
        other => BoundValue::Bind(other.clone()),
    }
}

fn serialize_sequence(items: &[DbValue]) -> String {
    if items.is_empty() {
        return "[]".to_string();
    }
    let compound = items
        .iter()
        .any(|item| matches!(item, DbValue::Json(_) | DbValue::Array(_)));
    if compound {
        let json: Vec<serde_json::Value> = items.iter().map(crate::record::value_to_json).collect();
        serde_json::Value::Array(json).to_string()
    } else {
        items
            .iter()
            .map(plain_text)
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Render a value as bare text, the form used for `|`-joined sequences and
/// CSV fields.
pub(crate) fn plain_text(value: &DbValue) -> String {
    match value {
        DbValue::Text(s) => s.clone(),
        DbValue::Int(i) => i.to_string(),
        DbValue::Float(f) => f.to_string(),
        DbValue::Bool(b) => b.to_string(),
        DbValue::Date(d) => d.to_string(),
        DbValue::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        DbValue::Null => String::new(),
        other => crate::record::value_to_json(other).to_string(),
    }
}

/// Render a value as a standalone SQL literal, for positions where binding
/// is unavailable (comprehensive conditions with `placeholder = N`, the
/// Spark inline path). Strings get their single quotes doubled; timestamps
/// render as quoted ISO-8601 text.
#[must_use]
pub fn sql_literal(value: &DbValue) -> String {
    match value {
        DbValue::Null => "NULL".to_string(),
        DbValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        DbValue::Int(i) => i.to_string(),
        DbValue::Float(f) => f.to_string(),
        DbValue::Text(s) => match keyword_literal(s) {
            Some(keyword) => keyword.to_string(),
            None => quote_str(s),
        },
        DbValue::Date(d) => quote_str(&d.to_string()),
        DbValue::Timestamp(ts) => quote_str(&ts.format("%Y-%m-%d %H:%M:%S").to_string()),
        DbValue::Json(json) => quote_str(&json.to_string()),
        DbValue::Array(items) => quote_str(&serialize_sequence(items)),
        DbValue::Blob(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
            format!("X'{hex}'")
        }
    }
}

fn quote_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn backtick_keyword_is_inlined() {
        assert_eq!(
            prepare(&DbValue::Text("`CURRENT_TIMESTAMP`".into())),
            BoundValue::Inline("CURRENT_TIMESTAMP".into())
        );
        // not a keyword: backticks only on one side
        assert!(matches!(
            prepare(&DbValue::Text("`oops".into())),
            BoundValue::Bind(_)
        ));
    }

    #[test]
    fn nested_mapping_binds_as_json_text() {
        let value = DbValue::Json(json!({"a": 1}));
        assert_eq!(
            prepare(&value),
            BoundValue::Bind(DbValue::Text("{\"a\":1}".into()))
        );
    }

    #[test]
    fn flat_sequence_joins_with_pipe() {
        let value = DbValue::Array(vec!["x".into(), "y".into(), DbValue::Int(3)]);
        assert_eq!(
            prepare(&value),
            BoundValue::Bind(DbValue::Text("x|y|3".into()))
        );
    }

    #[test]
    fn sequence_of_mappings_binds_as_json() {
        let value = DbValue::Array(vec![DbValue::Json(json!({"a": 1}))]);
        assert_eq!(
            prepare(&value),
            BoundValue::Bind(DbValue::Text("[{\"a\":1}]".into()))
        );
    }

    #[test]
    fn empty_sequence_is_bracket_pair() {
        assert_eq!(
            prepare(&DbValue::Array(vec![])),
            BoundValue::Bind(DbValue::Text("[]".into()))
        );
    }

    #[test]
    fn literals_escape_quotes() {
        assert_eq!(sql_literal(&DbValue::Text("o'brien".into())), "'o''brien'");
        assert_eq!(sql_literal(&DbValue::Null), "NULL");
        assert_eq!(sql_literal(&DbValue::Bool(true)), "TRUE");
        assert_eq!(
            sql_literal(&DbValue::Text("`CURRENT DATE`".into())),
            "CURRENT DATE"
        );
    }
}
