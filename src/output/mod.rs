//! Output formatters for delivered scan results.
//!
//! Each delivery becomes a [`ScanRecord`], printed as it arrives:
//! - [`text`]: one colored line per result for people
//! - [`json`]: one JSON object per line for scripts
//!
//! # Example
//!
//! ```
//! use codescan::cli::OutputFormat;
//! use codescan::output::{ResultPrinter, ScanRecord};
//!
//! let printer = ResultPrinter::new(OutputFormat::Json);
//! let record = ScanRecord::new(1, &Ok("4006381333931".to_string()));
//! let mut out = Vec::new();
//! printer.write_to(&record, &mut out).unwrap();
//! assert!(String::from_utf8(out).unwrap().contains("\"value\":\"4006381333931\""));
//! ```

pub mod json;
pub mod text;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::{self, Write};

use crate::cli::OutputFormat;
use crate::scanner::{ScanError, ScanResult};

pub use json::JsonOutput;
pub use text::TextOutput;

/// Kind of a delivered result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// A decoded code.
    Code,
    /// A scan failure.
    Failure,
}

/// One delivered result, numbered in delivery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanRecord {
    /// 1-based position among this session's deliveries
    pub index: usize,
    /// Whether this is a code or a failure
    pub status: RecordStatus,
    /// Decoded text, for codes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Failure kind, for failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ScanError>,
    /// When the result was received
    pub received_at: DateTime<Utc>,
}

impl ScanRecord {
    /// Record `result`, stamped with the current time.
    #[must_use]
    pub fn new(index: usize, result: &ScanResult) -> Self {
        Self::at(index, result, Utc::now())
    }

    /// Record `result` with an explicit timestamp.
    #[must_use]
    pub fn at(index: usize, result: &ScanResult, received_at: DateTime<Utc>) -> Self {
        match result {
            Ok(value) => Self {
                index,
                status: RecordStatus::Code,
                value: Some(value.clone()),
                error: None,
                received_at,
            },
            Err(e) => Self {
                index,
                status: RecordStatus::Failure,
                value: None,
                error: Some(*e),
                received_at,
            },
        }
    }
}

/// Errors that can occur while printing results.
#[derive(thiserror::Error, Debug)]
pub enum OutputError {
    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error during writing
    #[error("I/O error while printing results: {0}")]
    Io(#[from] io::Error),
}

/// Prints records in the configured format.
#[derive(Debug, Clone, Copy)]
pub struct ResultPrinter {
    format: OutputFormat,
}

impl ResultPrinter {
    /// Create a printer for `format`.
    #[must_use]
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Write one record followed by a newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_to<W: Write>(
        &self,
        record: &ScanRecord,
        writer: &mut W,
    ) -> Result<(), OutputError> {
        let line = match self.format {
            OutputFormat::Text => TextOutput::new(record).to_line(),
            OutputFormat::Json => JsonOutput::new(record).to_json()?,
        };
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Print a record to stdout.
    ///
    /// # Errors
    ///
    /// Returns an error if stdout is closed.
    pub fn print(&self, record: &ScanRecord) -> Result<(), OutputError> {
        self.write_to(record, &mut io::stdout().lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_from_code() {
        let record = ScanRecord::new(1, &Ok("A".to_string()));
        assert_eq!(record.status, RecordStatus::Code);
        assert_eq!(record.value.as_deref(), Some("A"));
        assert!(record.error.is_none());
    }

    #[test]
    fn test_record_from_failure() {
        let record = ScanRecord::new(2, &Err(ScanError::BadInput));
        assert_eq!(record.status, RecordStatus::Failure);
        assert_eq!(record.error, Some(ScanError::BadInput));
        assert!(record.value.is_none());
    }

    #[test]
    fn test_printer_writes_one_line_per_record() {
        yansi::disable();
        let printer = ResultPrinter::new(OutputFormat::Text);
        let mut out = Vec::new();
        printer
            .write_to(&ScanRecord::new(1, &Ok("A".to_string())), &mut out)
            .unwrap();
        printer
            .write_to(&ScanRecord::new(2, &Ok("B".to_string())), &mut out)
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with('\n'));
    }
}
