//! Structured error handling and exit codes.

use serde::Serialize;

/// Exit codes for the codescan binary.
///
/// - 0: Success (at least one code delivered)
/// - 1: General error (unexpected failure)
/// - 2: Scan failed (the session delivered a failure)
/// - 3: No code (the session ended without delivering anything)
/// - 130: Interrupted by user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// At least one code was delivered.
    Success = 0,
    /// An unexpected error occurred.
    GeneralError = 1,
    /// The session delivered a `BadInput` or `BadOutput` failure.
    ScanFailed = 2,
    /// The session ended without a delivery.
    NoCode = 3,
    /// The scan was interrupted by the user.
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "CS000",
            Self::GeneralError => "CS001",
            Self::ScanFailed => "CS002",
            Self::NoCode => "CS003",
            Self::Interrupted => "CS130",
        }
    }
}

/// Error raised when a scan is cut short by Ctrl+C.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Scan interrupted by user")]
pub struct Interrupted;

/// Structured error information for `--json-errors`.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "CS001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message, including its causes
    pub message: String,
    /// Whether the scan was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}

/// Pick the exit code for an error that escaped [`crate::run_app`].
#[must_use]
pub fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    if err.downcast_ref::<Interrupted>().is_some() {
        ExitCode::Interrupted
    } else {
        ExitCode::GeneralError
    }
}
