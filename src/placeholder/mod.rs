//! Placeholder normalization.
//!
//! Callers may write raw SQL in any of the common placeholder styles
//! (`%s`, `?`, `:name`, `%(name)s`, `$name`, plus the numbered `$1`/`?1`/`:1`
//! forms). [`bind`] rewrites the statement to the driver's native style and
//! rebuilds the value vector to match, splicing keyword literals inline.
//! Normalizing already-normal input returns the text unchanged.

mod scanner;

pub(crate) use scanner::split_statements;
use scanner::{Token, TokenKind, scan};

use crate::error::JrmError;
use crate::record::Record;
use crate::types::DbValue;
use crate::value_format::{BoundValue, prepare};

/// The placeholder style a driver expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// PostgreSQL-style `$1`
    Dollar,
    /// `?` (SQLite, MySQL, Db2, SQL Server, generic drivers)
    Question,
    /// Oracle-style `:1`
    ColonNumbered,
    /// DB-API format style `%s`
    Percent,
}

impl PlaceholderStyle {
    /// Render the placeholder for the 1-based bind position `index`.
    #[must_use]
    pub fn render(&self, index: usize) -> String {
        match self {
            PlaceholderStyle::Dollar => format!("${index}"),
            PlaceholderStyle::Question => "?".to_string(),
            PlaceholderStyle::ColonNumbered => format!(":{index}"),
            PlaceholderStyle::Percent => "%s".to_string(),
        }
    }
}

/// Parameters for a raw SQL statement: positional or named.
#[derive(Debug, Clone, Default)]
pub enum Params {
    #[default]
    None,
    Positional(Vec<DbValue>),
    Named(Vec<(String, DbValue)>),
}

impl Params {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Params::None => true,
            Params::Positional(values) => values.is_empty(),
            Params::Named(values) => values.is_empty(),
        }
    }
}

impl From<Vec<DbValue>> for Params {
    fn from(values: Vec<DbValue>) -> Self {
        Params::Positional(values)
    }
}

impl From<&[DbValue]> for Params {
    fn from(values: &[DbValue]) -> Self {
        Params::Positional(values.to_vec())
    }
}

impl<const N: usize> From<[DbValue; N]> for Params {
    fn from(values: [DbValue; N]) -> Self {
        Params::Positional(values.to_vec())
    }
}

impl From<Vec<(String, DbValue)>> for Params {
    fn from(values: Vec<(String, DbValue)>) -> Self {
        Params::Named(values)
    }
}

impl From<&Record> for Params {
    fn from(record: &Record) -> Self {
        Params::Named(
            record
                .iter()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect(),
        )
    }
}

impl From<()> for Params {
    fn from((): ()) -> Self {
        Params::None
    }
}

/// Rewrite `sql` so every placeholder matches `target`, resolving the value
/// for each placeholder in textual order. Values that turn out to be keyword
/// literals are spliced into the statement; everything else stays bound and
/// lands in the returned vector, whose length always equals the number of
/// placeholders left in the rewritten SQL.
///
/// # Errors
///
/// `MalformedBinding` when named and positional placeholders are mixed, a
/// named placeholder has no matching key, or a positional count mismatch
/// occurs.
pub fn bind(
    sql: &str,
    params: &Params,
    target: PlaceholderStyle,
) -> Result<(String, Vec<DbValue>), JrmError> {
    bind_with(sql, params, &mut |index| target.render(index))
}

/// Like [`bind`] but with a caller-supplied placeholder renderer, for
/// engines outside the four standard styles (Spark named parameters).
pub(crate) fn bind_with(
    sql: &str,
    params: &Params,
    render: &mut dyn FnMut(usize) -> String,
) -> Result<(String, Vec<DbValue>), JrmError> {
    let tokens = scan(sql);

    if tokens.is_empty() {
        return match params {
            Params::Positional(values) if !values.is_empty() => Err(JrmError::MalformedBinding(
                format!("statement has no placeholders but {} values given", values.len()),
            )),
            _ => Ok((sql.to_string(), Vec::new())),
        };
    }

    let named_count = tokens.iter().filter(|t| t.kind.is_named()).count();
    if named_count > 0 && named_count != tokens.len() {
        return Err(JrmError::MalformedBinding(
            "cannot mix named and positional placeholders in one statement".to_string(),
        ));
    }

    let resolved = if named_count > 0 {
        resolve_named(&tokens, params)?
    } else {
        resolve_positional(&tokens, params)?
    };

    // Rewrite: keyword literals splice in, bound values renumber from 1.
    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::with_capacity(resolved.len());
    let mut cursor = 0;
    let mut bind_index = 0;

    for (token, value) in tokens.iter().zip(resolved) {
        out.push_str(&sql[cursor..token.start]);
        match prepare(&value) {
            BoundValue::Inline(literal) => out.push_str(&literal),
            BoundValue::Bind(bound) => {
                bind_index += 1;
                out.push_str(&render(bind_index));
                values.push(bound);
            }
        }
        cursor = token.end;
    }
    out.push_str(&sql[cursor..]);

    Ok((out, values))
}

/// Resolve every placeholder and splice all values into the statement as
/// SQL literals, for engines that take no bind parameters at all.
pub(crate) fn bind_inline(sql: &str, params: &Params) -> Result<String, JrmError> {
    let tokens = scan(sql);
    if tokens.is_empty() {
        if let Params::Positional(values) = params
            && !values.is_empty()
        {
            return Err(JrmError::MalformedBinding(format!(
                "statement has no placeholders but {} values given",
                values.len()
            )));
        }
        return Ok(sql.to_string());
    }

    let named_count = tokens.iter().filter(|t| t.kind.is_named()).count();
    if named_count > 0 && named_count != tokens.len() {
        return Err(JrmError::MalformedBinding(
            "cannot mix named and positional placeholders in one statement".to_string(),
        ));
    }
    let resolved = if named_count > 0 {
        resolve_named(&tokens, params)?
    } else {
        resolve_positional(&tokens, params)?
    };

    let mut out = String::with_capacity(sql.len());
    let mut cursor = 0;
    for (token, value) in tokens.iter().zip(resolved) {
        out.push_str(&sql[cursor..token.start]);
        out.push_str(&crate::value_format::sql_literal(&value));
        cursor = token.end;
    }
    out.push_str(&sql[cursor..]);
    Ok(out)
}

fn resolve_positional(tokens: &[Token], params: &Params) -> Result<Vec<DbValue>, JrmError> {
    let values: Vec<DbValue> = match params {
        Params::Positional(values) => values.clone(),
        // Mapping values against positional placeholders: use declared order.
        Params::Named(values) => {
            tracing::warn!(
                "named parameters supplied for positional placeholders; using declared order"
            );
            values.iter().map(|(_, value)| value.clone()).collect()
        }
        Params::None => Vec::new(),
    };

    let mut resolved = Vec::with_capacity(tokens.len());
    let mut sequential = 0usize;
    for token in tokens {
        let index = match &token.kind {
            TokenKind::Dollar(n) | TokenKind::Question(Some(n)) | TokenKind::ColonNumbered(n) => {
                (*n as usize)
                    .checked_sub(1)
                    .ok_or_else(|| JrmError::MalformedBinding("placeholder index 0".into()))?
            }
            _ => {
                let index = sequential;
                sequential += 1;
                index
            }
        };
        let value = values.get(index).ok_or_else(|| {
            JrmError::MalformedBinding(format!(
                "statement references parameter {} but only {} values given",
                index + 1,
                values.len()
            ))
        })?;
        resolved.push(value.clone());
    }

    // Bare-style statements must consume exactly the supplied vector.
    if sequential > 0 && sequential != values.len() {
        return Err(JrmError::MalformedBinding(format!(
            "statement has {} placeholders but {} values given",
            sequential,
            values.len()
        )));
    }

    Ok(resolved)
}

fn resolve_named(tokens: &[Token], params: &Params) -> Result<Vec<DbValue>, JrmError> {
    let Params::Named(values) = params else {
        return Err(JrmError::MalformedBinding(
            "named placeholders require named parameters".to_string(),
        ));
    };

    let mut resolved = Vec::with_capacity(tokens.len());
    for token in tokens {
        let name = match &token.kind {
            TokenKind::ColonNamed(name)
            | TokenKind::DollarNamed(name)
            | TokenKind::PercentNamed(name) => name,
            other => {
                return Err(JrmError::MalformedBinding(format!(
                    "unexpected positional placeholder {other:?} in named statement"
                )));
            }
        };
        let value = values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| {
                JrmError::MalformedBinding(format!("missing parameter for placeholder :{name}"))
            })?;
        resolved.push(value);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positional(values: Vec<DbValue>) -> Params {
        Params::Positional(values)
    }

    #[test]
    fn named_to_positional_preserves_textual_order() {
        let params = Params::Named(vec![
            ("n".to_string(), DbValue::from("J")),
            ("a".to_string(), DbValue::Int(25)),
        ]);
        let (sql, values) = bind(
            "SELECT * FROM u WHERE n=:n AND a=:a",
            &params,
            PlaceholderStyle::Question,
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM u WHERE n=? AND a=?");
        assert_eq!(values, vec![DbValue::from("J"), DbValue::Int(25)]);
    }

    #[test]
    fn named_out_of_declared_order() {
        let params = Params::Named(vec![
            ("a".to_string(), DbValue::Int(25)),
            ("n".to_string(), DbValue::from("J")),
        ]);
        let (sql, values) = bind(
            "SELECT * FROM u WHERE n=%(n)s AND a=%(a)s",
            &params,
            PlaceholderStyle::Dollar,
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM u WHERE n=$1 AND a=$2");
        assert_eq!(values, vec![DbValue::from("J"), DbValue::Int(25)]);
    }

    #[test]
    fn normalization_is_a_fixed_point() {
        let sql = "select * from t where a = $1 and b = $2";
        let params = positional(vec![DbValue::Int(1), DbValue::Int(2)]);
        let (first, _) = bind(sql, &params, PlaceholderStyle::Dollar).unwrap();
        assert_eq!(first, sql);
        let (second, _) = bind(&first, &params, PlaceholderStyle::Dollar).unwrap();
        assert_eq!(second, first);
    }

    #[test]
    fn literals_and_comments_are_untouched() {
        let sql = "select ':fake' from t -- :also_fake\nwhere a = :real";
        let params = Params::Named(vec![("real".to_string(), DbValue::Int(5))]);
        let (out, values) = bind(sql, &params, PlaceholderStyle::Question).unwrap();
        assert_eq!(out, "select ':fake' from t -- :also_fake\nwhere a = ?");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn keyword_literal_splices_and_renumbers() {
        let params = positional(vec![
            DbValue::Int(1),
            DbValue::Text("`CURRENT_TIMESTAMP`".into()),
            DbValue::from("x"),
        ]);
        let (sql, values) = bind(
            "insert into t values (%s, %s, %s)",
            &params,
            PlaceholderStyle::Dollar,
        )
        .unwrap();
        assert_eq!(sql, "insert into t values ($1, CURRENT_TIMESTAMP, $2)");
        assert_eq!(values, vec![DbValue::Int(1), DbValue::from("x")]);
    }

    #[test]
    fn missing_named_key_is_rejected() {
        let params = Params::Named(vec![("a".to_string(), DbValue::Int(1))]);
        let err = bind("select :a, :b", &params, PlaceholderStyle::Question).unwrap_err();
        assert!(matches!(err, JrmError::MalformedBinding(_)));
    }

    #[test]
    fn positional_count_mismatch_is_rejected() {
        let params = positional(vec![DbValue::Int(1)]);
        let err = bind("select ?, ?", &params, PlaceholderStyle::Question).unwrap_err();
        assert!(matches!(err, JrmError::MalformedBinding(_)));

        let err = bind("select 1", &params, PlaceholderStyle::Question).unwrap_err();
        assert!(matches!(err, JrmError::MalformedBinding(_)));
    }

    #[test]
    fn mixing_styles_is_rejected() {
        let params = positional(vec![DbValue::Int(1), DbValue::Int(2)]);
        let err = bind("select ? from t where a = :a", &params, PlaceholderStyle::Question)
            .unwrap_err();
        assert!(matches!(err, JrmError::MalformedBinding(_)));
    }

    #[test]
    fn cast_operator_is_not_a_placeholder() {
        let (sql, values) = bind(
            "select a::text from t where b = ?",
            &positional(vec![DbValue::Int(9)]),
            PlaceholderStyle::Dollar,
        )
        .unwrap();
        assert_eq!(sql, "select a::text from t where b = $1");
        assert_eq!(values.len(), 1);
    }
}
