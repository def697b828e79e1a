use serde::Serialize;

use crate::error::JrmError;
use crate::record::Record;

/// The standardized envelope returned by every facade operation.
///
/// `status` is `0` on success and `-1` on a caught error; driver messages
/// are surfaced verbatim in `message`. Queries populate `data` and
/// `columns`; mutations leave them empty and report `count` rows affected.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DbResult {
    pub status: i32,
    pub message: String,
    pub data: Vec<Record>,
    pub columns: Vec<String>,
    pub count: i64,
}

impl DbResult {
    /// Successful mutation result with no rows.
    #[must_use]
    pub fn ok(message: impl Into<String>, count: i64) -> Self {
        Self {
            status: 0,
            message: message.into(),
            data: Vec::new(),
            columns: Vec::new(),
            count,
        }
    }

    /// Successful query result carrying rows and column names.
    #[must_use]
    pub fn rows(message: impl Into<String>, data: Vec<Record>, columns: Vec<String>) -> Self {
        let count = data.len() as i64;
        Self {
            status: 0,
            message: message.into(),
            data,
            columns,
            count,
        }
    }

    /// Failure envelope; the message is what callers inspect.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: -1,
            message: message.into(),
            data: Vec::new(),
            columns: Vec::new(),
            count: 0,
        }
    }

    /// Failure envelope built from an error, logging it first.
    #[must_use]
    pub fn from_error(operation: &str, err: &JrmError) -> Self {
        let message = format!("{operation} failed: {err}");
        tracing::error!("{message}");
        Self::failed(message)
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }

    /// Convert the envelope into a `Result`, for callers who prefer `?` over
    /// inspecting `status`.
    ///
    /// # Errors
    ///
    /// Returns `JrmError::SqlError` with the envelope message when
    /// `status != 0`.
    pub fn into_result(self) -> Result<DbResult, JrmError> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(JrmError::SqlError(self.message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shapes() {
        let ok = DbResult::ok("INSERT succeeded", 3);
        assert_eq!(ok.status, 0);
        assert_eq!(ok.count, 3);
        assert!(ok.is_ok());

        let failed = DbResult::failed("boom");
        assert_eq!(failed.status, -1);
        assert!(failed.into_result().is_err());
    }

    #[test]
    fn serializes_to_wire_format() {
        let result = DbResult::rows(
            "done",
            vec![Record::new().with("id", 1)],
            vec!["id".to_string()],
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], 0);
        assert_eq!(json["count"], 1);
        assert_eq!(json["data"][0]["id"], 1);
        assert_eq!(json["columns"][0], "id");
    }
}
