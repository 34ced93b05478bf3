//! Human-readable output for delivered results.
//!
//! Codes print as `✓ <value>` in green, failures as `✗ <reason>` in red.
//! Colors follow yansi's global switch, which the CLI turns off for
//! `--no-color` and `NO_COLOR`.

use yansi::Paint;

use super::ScanRecord;
use crate::scanner::ScanError;

/// Text rendering of a single record.
#[derive(Debug, Clone, Copy)]
pub struct TextOutput<'a> {
    record: &'a ScanRecord,
}

impl<'a> TextOutput<'a> {
    /// Wrap a record.
    #[must_use]
    pub fn new(record: &'a ScanRecord) -> Self {
        Self { record }
    }

    /// Render as one line, without the trailing newline.
    #[must_use]
    pub fn to_line(&self) -> String {
        match (&self.record.value, self.record.error) {
            (Some(value), _) => format!("{} {}", "✓".green().bold(), value),
            (None, Some(error)) => format!("{} {}", "✗".red().bold(), describe(error).red()),
            (None, None) => String::new(),
        }
    }
}

fn describe(error: ScanError) -> &'static str {
    match error {
        ScanError::BadInput => "Scan failed: no usable camera input",
        ScanError::BadOutput => "Scan failed: no code could be read",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_line() {
        yansi::disable();
        let record = ScanRecord::new(1, &Ok("HELLO".to_string()));
        assert_eq!(TextOutput::new(&record).to_line(), "✓ HELLO");
    }

    #[test]
    fn test_failure_lines() {
        yansi::disable();
        let record = ScanRecord::new(1, &Err(ScanError::BadInput));
        assert_eq!(
            TextOutput::new(&record).to_line(),
            "✗ Scan failed: no usable camera input"
        );
        let record = ScanRecord::new(1, &Err(ScanError::BadOutput));
        assert!(TextOutput::new(&record).to_line().contains("no code could be read"));
    }
}
