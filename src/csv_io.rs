//! Streaming CSV export.

use std::path::Path;

use crate::db::Db;
use crate::placeholder::Params;
use crate::result::DbResult;
use crate::stream::RowStatus;
use crate::types::DbValue;
use crate::value_format::plain_text;

/// Options for [`Db::stream_to_csv`]. RFC-4180 output; `quote_char` forces
/// quoting of every field; `null_value` is written literally for NULLs.
#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub header: bool,
    pub null_value: String,
    pub quote_char: Option<u8>,
    pub delimiter: u8,
    /// Rows between flushes.
    pub batch_size: usize,
    pub abort_on_error: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            header: true,
            null_value: String::new(),
            quote_char: None,
            delimiter: b',',
            batch_size: 1000,
            abort_on_error: true,
        }
    }
}

fn csv_field(value: &DbValue, null_value: &str) -> String {
    match value {
        DbValue::Null => null_value.to_string(),
        other => plain_text(other),
    }
}

impl Db<'_> {
    /// Stream a query straight into a CSV file. The header is written from
    /// the cursor description before the first row; output is flushed every
    /// `batch_size` rows.
    pub fn stream_to_csv(
        &mut self,
        sql: &str,
        params: impl Into<Params>,
        path: impl AsRef<Path>,
        options: &CsvOptions,
    ) -> DbResult {
        let path = path.as_ref();
        let max_errors = if options.abort_on_error { -1 } else { 0 };
        let stream = match self.stream_query(sql, params, max_errors) {
            Ok(stream) => stream,
            Err(e) => return DbResult::from_error("stream_to_csv", &e),
        };

        let mut builder = csv::WriterBuilder::new();
        builder.delimiter(options.delimiter);
        if let Some(quote) = options.quote_char {
            builder.quote(quote).quote_style(csv::QuoteStyle::Always);
        }
        let mut writer = match builder.from_path(path) {
            Ok(writer) => writer,
            Err(e) => return DbResult::from_error("stream_to_csv", &e.into()),
        };

        let columns: Vec<String> = stream.columns().to_vec();
        if options.header
            && let Err(e) = writer.write_record(&columns)
        {
            return DbResult::from_error("stream_to_csv", &e.into());
        }

        let mut written = 0u64;
        let mut errors = 0u64;
        for row in stream {
            match row.status {
                RowStatus::Ok => {
                    let fields: Vec<String> = columns
                        .iter()
                        .map(|column| {
                            row.record
                                .get(column)
                                .map_or_else(|| options.null_value.clone(), |v| {
                                    csv_field(v, &options.null_value)
                                })
                        })
                        .collect();
                    if let Err(e) = writer.write_record(&fields) {
                        return DbResult::from_error("stream_to_csv", &e.into());
                    }
                    written += 1;
                    if written % options.batch_size.max(1) as u64 == 0
                        && let Err(e) = writer.flush()
                    {
                        return DbResult::from_error("stream_to_csv", &e.into());
                    }
                }
                RowStatus::Error(message) => {
                    errors += 1;
                    tracing::warn!("skipping row {} in CSV export: {message}", row.index);
                }
                RowStatus::Aborted(message) => {
                    let _ = writer.flush();
                    return DbResult::failed(format!(
                        "CSV export to {} aborted after {written} rows: {message}",
                        path.display()
                    ));
                }
            }
        }

        if let Err(e) = writer.flush() {
            return DbResult::from_error("stream_to_csv", &e.into());
        }
        let message = format!(
            "CSV export to {} completed. {written} rows written, {errors} errors.",
            path.display()
        );
        tracing::info!("{message}");
        DbResult::ok(message, written as i64)
    }
}
