//! JSON lines output for delivered results.
//!
//! # Output Schema
//!
//! One object per delivery:
//!
//! ```json
//! {"index":1,"status":"code","value":"4006381333931","received_at":"2024-05-01T09:30:00Z"}
//! {"index":2,"status":"failure","error":"bad-output","received_at":"2024-05-01T09:30:02Z"}
//! ```

use super::ScanRecord;

/// JSON rendering of a single record.
#[derive(Debug, Clone, Copy)]
pub struct JsonOutput<'a> {
    record: &'a ScanRecord,
}

impl<'a> JsonOutput<'a> {
    /// Wrap a record.
    #[must_use]
    pub fn new(record: &'a ScanRecord) -> Self {
        Self { record }
    }

    /// Serialize to a compact single-line JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (unlikely for valid data).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self.record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::ScanError;
    use chrono::{TimeZone, Utc};

    fn timestamp() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_code_record_json() {
        let record = ScanRecord::at(1, &Ok("4006381333931".to_string()), timestamp());
        let json = JsonOutput::new(&record).to_json().unwrap();
        assert_eq!(
            json,
            r#"{"index":1,"status":"code","value":"4006381333931","received_at":"2024-05-01T09:30:00Z"}"#
        );
    }

    #[test]
    fn test_failure_record_json() {
        let record = ScanRecord::at(2, &Err(ScanError::BadOutput), timestamp());
        let value: serde_json::Value =
            serde_json::from_str(&JsonOutput::new(&record).to_json().unwrap()).unwrap();
        assert_eq!(value["status"], "failure");
        assert_eq!(value["error"], "bad-output");
        assert!(value.get("value").is_none());
    }

    #[test]
    fn test_json_is_single_line() {
        let record = ScanRecord::at(1, &Ok("line one\nline two".to_string()), timestamp());
        let json = JsonOutput::new(&record).to_json().unwrap();
        assert!(!json.contains('\n'));
        assert!(json.contains(r"line one\nline two"));
    }
}
