//! Exit status derived from error records.

use das_types::{ErrorCode, Record, error_code_of, error_message_of};
use serde::Serialize;

/// Outcome of scanning a result set for errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryStatus {
    /// Process exit code; zero when no error was found.
    pub code: i64,
    pub message: Option<String>,
}

impl QueryStatus {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    pub fn failed(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: Some(message.into()),
        }
    }
}

/// Finds the first error in `records`.
///
/// Top-level errors of every record are checked before any sub-record, so a
/// whole-service failure wins over a single malformed row. An error without a
/// numeric code maps to the generic server error.
pub fn scan_errors(records: &[Record]) -> QueryStatus {
    let top_level = records
        .iter()
        .find_map(|record| record.error_message().map(|message| (message, record.error_code())));
    let first = top_level.or_else(|| {
        records
            .iter()
            .flat_map(Record::sub_records)
            .find_map(|sub| error_message_of(sub).map(|message| (message, error_code_of(sub))))
    });

    match first {
        Some((message, code)) => QueryStatus {
            code: code.unwrap_or_else(|| ErrorCode::DasServerError.code()),
            message: Some(message),
        },
        None => QueryStatus::default(),
    }
}
