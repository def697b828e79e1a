//! Structured WHERE conditions and their compilation to SQL.
//!
//! A condition tree maps column names to one of three node shapes:
//!
//! - *simple*: a scalar value, meaning `column = value`;
//! - *regular*: operator -> value pairs, AND-conjoined on the column
//!   (`{"age": {">": 18, "<=": 65}}`);
//! - *comprehensive*: an explicit `operator`/`value`/`placeholder` triple
//!   controlling whether the value binds or inlines.
//!
//! Columns are AND-conjoined across the tree. A node that mixes operator
//! keys with a complete comprehensive triple is ambiguous and rejected.

use serde_json::Value as JsonValue;

use crate::dialect::Dialect;
use crate::error::JrmError;
use crate::types::DbValue;
use crate::value_format::{BoundValue, prepare, sql_literal};

/// One condition node attached to a column.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionNode {
    /// `column = value`
    Value(DbValue),
    /// `column op value` for each pair, AND-conjoined
    Ops(Vec<(String, DbValue)>),
    /// Explicit bind-vs-inline control
    Explicit {
        operator: String,
        value: DbValue,
        placeholder: bool,
    },
}

/// An ordered condition tree; iteration order is emission order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Condition {
    entries: Vec<(String, ConditionNode)>,
}

impl Condition {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `column = value`
    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<DbValue>) -> Self {
        self.entries
            .push((column.into(), ConditionNode::Value(value.into())));
        self
    }

    /// `column op value`; repeated calls for the same column accumulate into
    /// one AND-conjoined node.
    #[must_use]
    pub fn op(
        mut self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<DbValue>,
    ) -> Self {
        let column = column.into();
        let pair = (operator.into(), value.into());
        if let Some((_, ConditionNode::Ops(ops))) = self
            .entries
            .iter_mut()
            .find(|(name, node)| *name == column && matches!(node, ConditionNode::Ops(_)))
        {
            ops.push(pair);
        } else {
            self.entries.push((column, ConditionNode::Ops(vec![pair])));
        }
        self
    }

    /// Comprehensive condition with explicit placeholder control.
    #[must_use]
    pub fn explicit(
        mut self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<DbValue>,
        placeholder: bool,
    ) -> Self {
        self.entries.push((
            column.into(),
            ConditionNode::Explicit {
                operator: operator.into(),
                value: value.into(),
                placeholder,
            },
        ));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConditionNode)> {
        self.entries
            .iter()
            .map(|(name, node)| (name.as_str(), node))
    }

    /// Parse a condition tree from a JSON object, preserving key order.
    ///
    /// # Errors
    ///
    /// `MalformedCondition` when the input is not an object, or when a node
    /// mixes regular operator keys with a complete comprehensive triple.
    pub fn from_json(value: &JsonValue) -> Result<Self, JrmError> {
        let JsonValue::Object(map) = value else {
            return Err(JrmError::MalformedCondition(
                "condition tree must be a JSON object".to_string(),
            ));
        };

        let mut condition = Condition::new();
        for (column, node) in map {
            let parsed = match node {
                JsonValue::Object(inner) => parse_node(column, inner)?,
                scalar => ConditionNode::Value(DbValue::from(scalar.clone())),
            };
            condition.entries.push((column.clone(), parsed));
        }
        Ok(condition)
    }
}

fn parse_node(
    column: &str,
    inner: &serde_json::Map<String, JsonValue>,
) -> Result<ConditionNode, JrmError> {
    let has_triple =
        inner.contains_key("operator") && inner.contains_key("value") && inner.contains_key("placeholder");

    if has_triple {
        if inner.len() != 3 {
            return Err(JrmError::MalformedCondition(format!(
                "column {column} mixes operator keys with a comprehensive triple"
            )));
        }
        let operator = inner["operator"].as_str().ok_or_else(|| {
            JrmError::MalformedCondition(format!("column {column}: operator must be a string"))
        })?;
        let placeholder = match &inner["placeholder"] {
            JsonValue::String(s) => !s.eq_ignore_ascii_case("n"),
            JsonValue::Bool(b) => *b,
            other => {
                return Err(JrmError::MalformedCondition(format!(
                    "column {column}: placeholder must be Y/N, got {other}"
                )));
            }
        };
        return Ok(ConditionNode::Explicit {
            operator: operator.to_string(),
            value: DbValue::from(inner["value"].clone()),
            placeholder,
        });
    }

    // Anything else is a regular operator map, even when a single key
    // happens to be named "operator" or "value".
    let ops = inner
        .iter()
        .map(|(op, val)| (op.clone(), DbValue::from(val.clone())))
        .collect();
    Ok(ConditionNode::Ops(ops))
}

/// A compiled WHERE clause: the fragment (empty or starting with
/// `" WHERE "`), the bind vector, and the next placeholder index for
/// numbered styles.
#[derive(Debug, Default)]
pub(crate) struct CompiledWhere {
    pub clause: String,
    pub values: Vec<DbValue>,
    pub next_index: usize,
}

/// Compile a condition tree against a dialect. `start_index` is the 1-based
/// position of the first placeholder this clause may emit (data values of an
/// UPDATE come first and share the statement's bind vector).
pub(crate) fn compile(
    condition: Option<&Condition>,
    dialect: &Dialect,
    start_index: usize,
) -> Result<CompiledWhere, JrmError> {
    let Some(condition) = condition.filter(|c| !c.is_empty()) else {
        return Ok(CompiledWhere {
            clause: String::new(),
            values: Vec::new(),
            next_index: start_index,
        });
    };

    let mut conjuncts = Vec::new();
    let mut values = Vec::new();
    let mut index = start_index;

    for (column, node) in condition.iter() {
        match node {
            ConditionNode::Value(value) => {
                emit_operator(
                    column, "=", value, dialect, &mut conjuncts, &mut values, &mut index,
                );
            }
            ConditionNode::Ops(ops) => {
                for (operator, value) in ops {
                    let upper = operator.trim().to_ascii_uppercase();
                    if (upper == "IN" || upper == "NOT IN")
                        && let DbValue::Array(items) = value
                    {
                        emit_in_list(
                            column, &upper, items, dialect, &mut conjuncts, &mut values, &mut index,
                        )?;
                    } else {
                        emit_operator(
                            column, operator, value, dialect, &mut conjuncts, &mut values,
                            &mut index,
                        );
                    }
                }
            }
            ConditionNode::Explicit {
                operator,
                value,
                placeholder,
            } => {
                if *placeholder {
                    emit_operator(
                        column, operator, value, dialect, &mut conjuncts, &mut values, &mut index,
                    );
                } else {
                    conjuncts.push(format!("{column} {operator} {}", sql_literal(value)));
                }
            }
        }
    }

    Ok(CompiledWhere {
        clause: format!(" WHERE {}", conjuncts.join(" AND ")),
        values,
        next_index: index,
    })
}

fn emit_operator(
    column: &str,
    operator: &str,
    value: &DbValue,
    dialect: &Dialect,
    conjuncts: &mut Vec<String>,
    values: &mut Vec<DbValue>,
    index: &mut usize,
) {
    match prepare(value) {
        BoundValue::Inline(literal) => conjuncts.push(format!("{column} {operator} {literal}")),
        BoundValue::Bind(bound) => {
            let ph = dialect.placeholder(*index);
            *index += 1;
            values.push(bound);
            conjuncts.push(format!("{column} {operator} {ph}"));
        }
    }
}

fn emit_in_list(
    column: &str,
    operator: &str,
    items: &[DbValue],
    dialect: &Dialect,
    conjuncts: &mut Vec<String>,
    values: &mut Vec<DbValue>,
    index: &mut usize,
) -> Result<(), JrmError> {
    if items.is_empty() {
        return Err(JrmError::MalformedCondition(format!(
            "empty {operator} list for column {column}"
        )));
    }
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        match prepare(item) {
            BoundValue::Inline(literal) => parts.push(literal),
            BoundValue::Bind(bound) => {
                parts.push(dialect.placeholder(*index));
                *index += 1;
                values.push(bound);
            }
        }
    }
    conjuncts.push(format!("{column} {operator} ({})", parts.join(", ")));
    Ok(())
}

/// Compile a condition to a fully inlined predicate (no binds), for engines
/// that take condition strings rather than parameters (the Spark adapter).
pub(crate) fn compile_inline(condition: Option<&Condition>) -> Result<String, JrmError> {
    let Some(condition) = condition.filter(|c| !c.is_empty()) else {
        return Ok(String::new());
    };

    let mut conjuncts = Vec::new();
    for (column, node) in condition.iter() {
        match node {
            ConditionNode::Value(DbValue::Null) => conjuncts.push(format!("{column} IS NULL")),
            ConditionNode::Value(value) => {
                conjuncts.push(format!("{column} = {}", sql_literal(value)));
            }
            ConditionNode::Ops(ops) => {
                for (operator, value) in ops {
                    let upper = operator.trim().to_ascii_uppercase();
                    if (upper == "IN" || upper == "NOT IN")
                        && let DbValue::Array(items) = value
                    {
                        let list = items.iter().map(sql_literal).collect::<Vec<_>>().join(", ");
                        conjuncts.push(format!("{column} {upper} ({list})"));
                    } else {
                        conjuncts.push(format!("{column} {operator} {}", sql_literal(value)));
                    }
                }
            }
            ConditionNode::Explicit {
                operator, value, ..
            } => conjuncts.push(format!("{column} {operator} {}", sql_literal(value))),
        }
    }
    Ok(conjuncts.join(" AND "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::lookup;
    use crate::types::BackendType;
    use serde_json::json;

    fn compile_for(condition: &Condition, backend: BackendType) -> CompiledWhere {
        compile(Some(condition), lookup(backend), 1).unwrap()
    }

    #[test]
    fn simple_condition_binds() {
        let cond = Condition::new().eq("id", 1);
        let compiled = compile_for(&cond, BackendType::Sqlite);
        assert_eq!(compiled.clause, " WHERE id = ?");
        assert_eq!(compiled.values, vec![DbValue::Int(1)]);
    }

    #[test]
    fn like_operator_produces_one_bound_conjunct() {
        let cond = Condition::new().op("email", "LIKE", "%@x.com");
        let compiled = compile_for(&cond, BackendType::Postgres);
        assert_eq!(compiled.clause, " WHERE email LIKE $1");
        assert_eq!(compiled.values, vec![DbValue::from("%@x.com")]);
    }

    #[test]
    fn range_condition_keeps_declared_order() {
        let cond = Condition::new().op("age", ">", 18).op("age", "<=", 65);
        let compiled = compile_for(&cond, BackendType::Postgres);
        assert_eq!(compiled.clause, " WHERE age > $1 AND age <= $2");
        assert_eq!(compiled.values, vec![DbValue::Int(18), DbValue::Int(65)]);
        assert_eq!(compiled.next_index, 3);
    }

    #[test]
    fn in_list_expands_per_element() {
        let cond = Condition::new().op(
            "id",
            "IN",
            vec![DbValue::Int(1), DbValue::Int(2), DbValue::Int(3)],
        );
        let compiled = compile_for(&cond, BackendType::Oracle);
        assert_eq!(compiled.clause, " WHERE id IN (:1, :2, :3)");
        assert_eq!(compiled.values.len(), 3);
    }

    #[test]
    fn comprehensive_inline_skips_binding() {
        let cond = Condition::new().explicit("name", "=", "o'brien", false);
        let compiled = compile_for(&cond, BackendType::Sqlite);
        assert_eq!(compiled.clause, " WHERE name = 'o''brien'");
        assert!(compiled.values.is_empty());
    }

    #[test]
    fn keyword_literal_inlines_in_condition() {
        let cond = Condition::new().op("created", "<", "`CURRENT_TIMESTAMP`");
        let compiled = compile_for(&cond, BackendType::Postgres);
        assert_eq!(compiled.clause, " WHERE created < CURRENT_TIMESTAMP");
        assert!(compiled.values.is_empty());
    }

    #[test]
    fn json_parsing_handles_all_three_shapes() {
        let cond = Condition::from_json(&json!({
            "id": 1,
            "age": {">": 18, "<=": 65},
            "status": {"operator": "=", "value": "active", "placeholder": "N"}
        }))
        .unwrap();
        let compiled = compile_for(&cond, BackendType::Sqlite);
        assert_eq!(
            compiled.clause,
            " WHERE id = ? AND age > ? AND age <= ? AND status = 'active'"
        );
        assert_eq!(compiled.values.len(), 3);
    }

    #[test]
    fn single_operator_like_key_is_regular() {
        // Not a complete triple: treated as a regular operator named "operator".
        let cond = Condition::from_json(&json!({"c": {"operator": 5}})).unwrap();
        let compiled = compile_for(&cond, BackendType::Sqlite);
        assert_eq!(compiled.clause, " WHERE c operator ?");
    }

    #[test]
    fn ambiguous_mixture_is_rejected() {
        let err = Condition::from_json(&json!({
            "c": {"operator": "=", "value": 1, "placeholder": "Y", ">": 2}
        }))
        .unwrap_err();
        assert!(matches!(err, JrmError::MalformedCondition(_)));
    }

    #[test]
    fn empty_condition_compiles_to_nothing() {
        let compiled = compile(None, lookup(BackendType::Sqlite), 1).unwrap();
        assert!(compiled.clause.is_empty());
        let compiled = compile(Some(&Condition::new()), lookup(BackendType::Sqlite), 4).unwrap();
        assert_eq!(compiled.next_index, 4);
    }

    #[test]
    fn placeholder_count_matches_bind_vector_on_every_backend() {
        let cond = Condition::new()
            .eq("a", 1)
            .op("b", ">", 2)
            .op("c", "IN", vec![DbValue::Int(3), DbValue::Int(4)])
            .explicit("d", "=", "inline", false)
            .op("e", "<", "`CURRENT_DATE`");
        for backend in [
            BackendType::Postgres,
            BackendType::Mysql,
            BackendType::Sqlite,
            BackendType::Oracle,
            BackendType::Db2,
            BackendType::SqlServer,
            BackendType::Generic,
        ] {
            let dialect = lookup(backend);
            let compiled = compile(Some(&cond), dialect, 1).unwrap();
            let placeholders = match dialect.placeholder {
                crate::placeholder::PlaceholderStyle::Question => {
                    compiled.clause.matches('?').count()
                }
                crate::placeholder::PlaceholderStyle::Dollar => {
                    compiled.clause.matches('$').count()
                }
                crate::placeholder::PlaceholderStyle::ColonNumbered => {
                    compiled.clause.matches(':').count()
                }
                crate::placeholder::PlaceholderStyle::Percent => {
                    compiled.clause.matches("%s").count()
                }
            };
            assert_eq!(placeholders, compiled.values.len(), "backend {backend}");
            assert_eq!(compiled.values.len(), 4);
        }
    }

    #[test]
    fn inline_compilation_for_condition_strings() {
        let cond = Condition::new()
            .eq("name", "o'brien")
            .op("age", ">", 30)
            .eq("deleted", DbValue::Null);
        let text = compile_inline(Some(&cond)).unwrap();
        assert_eq!(text, "name = 'o''brien' AND age > 30 AND deleted IS NULL");
    }
}
