//! SQL script splitting and execution.

use crate::db::Db;
use crate::placeholder::split_statements;
use crate::result::DbResult;

/// Split a script into individual statements at top-level semicolons.
/// Semicolons inside string literals, quoted identifiers, comments and
/// dollar-quoted bodies do not split; empty statements are dropped.
#[must_use]
pub fn split_sql_script(script: &str) -> Vec<String> {
    split_statements(script)
}

impl Db<'_> {
    /// Run each statement of a script in order, returning one envelope per
    /// statement. With `stop_on_error`, execution ends at the first failed
    /// statement; its envelope is the last element.
    pub fn run_script(&mut self, script: &str, stop_on_error: bool) -> Vec<DbResult> {
        let statements = split_sql_script(script);
        let mut results = Vec::with_capacity(statements.len());
        for statement in &statements {
            let result = self.execute(statement, ());
            let failed = !result.is_ok();
            results.push(result);
            if failed && stop_on_error {
                tracing::warn!(
                    "script stopped after {} of {} statements",
                    results.len(),
                    statements.len()
                );
                break;
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_top_level_semicolons_only() {
        let script = "\
            CREATE TABLE t (id INT, note TEXT);\n\
            -- seed; data\n\
            INSERT INTO t VALUES (1, 'a;b');\n\
            /* block; comment */\n\
            SELECT * FROM t;\n";
        let statements = split_sql_script(script);
        assert_eq!(statements.len(), 3);
        assert!(statements[1].ends_with("'a;b')"));
    }

    #[test]
    fn trailing_statement_without_semicolon_is_kept() {
        let statements = split_sql_script("SELECT 1; SELECT 2");
        assert_eq!(statements, vec!["SELECT 1", "SELECT 2"]);
    }
}
