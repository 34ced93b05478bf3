//! Command-line interface definitions for codescan.
//!
//! This module defines all CLI arguments, subcommands, and options using the clap derive API.
//! Global options (verbosity, color, config file, profile) apply to every subcommand.
//!
//! # Example
//!
//! ```bash
//! # Scan a directory of recorded frames, stopping after the first code
//! codescan scan --frames ./frames
//!
//! # Deliver every distinct code as JSON lines
//! codescan scan --frames ./frames --mode once-per-code --output json
//!
//! # No camera: deliver a fixed payload through the fallback pipeline
//! codescan scan --simulate 4006381333931
//!
//! # Decode a single still image
//! codescan decode ticket.png
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::scanner::{ScanMode, Symbology};

/// Barcode and QR scanner driven by scan sessions.
///
/// codescan mounts a scan session over a capture pipeline (replayed camera
/// frames, still images, or a simulated payload) and prints each delivered
/// code according to the session's mode.
#[derive(Debug, Parser)]
#[command(name = "codescan")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except results and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Report errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Configuration file to use instead of the platform default
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Named profile from the configuration file
    #[arg(long, value_name = "NAME", global = true)]
    pub profile: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands for codescan.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a scan session and print delivered codes
    Scan(ScanArgs),
    /// Decode a single still image
    Decode(DecodeArgs),
    /// Inspect or create the configuration file
    Config(ConfigArgs),
}

/// Arguments for the scan subcommand.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Directory of frames to replay as the back camera
    #[arg(long, value_name = "DIR", group = "source")]
    pub frames: Option<PathBuf>,

    /// Directory of frames to replay as the front camera
    #[arg(long, value_name = "DIR", requires = "frames")]
    pub front_frames: Option<PathBuf>,

    /// Use the fallback pipeline and deliver DATA as if it were scanned
    #[arg(long, value_name = "DATA", group = "source")]
    pub simulate: Option<String>,

    /// Use the fallback pipeline and decode a still image
    #[arg(long, value_name = "PATH", group = "source")]
    pub image: Option<PathBuf>,

    /// Use the fallback pipeline and read one code per line from stdin
    #[arg(long, group = "source")]
    pub stdin: bool,

    /// Delivery mode
    #[arg(short, long, value_enum)]
    pub mode: Option<ScanMode>,

    /// Minimum time between continuous deliveries (e.g. 2, 1.5s, 500ms)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub interval: Option<Duration>,

    /// Symbologies to recognize (can be specified multiple times)
    #[arg(short, long = "symbology", value_enum, value_name = "SYMBOLOGY")]
    pub symbologies: Vec<Symbology>,

    /// Start on the front camera
    #[arg(long, conflicts_with = "back")]
    pub front: bool,

    /// Start on the back camera, overriding the configuration
    #[arg(long)]
    pub back: bool,

    /// Draw the viewfinder overlay in the preview
    #[arg(long, conflicts_with = "no_viewfinder")]
    pub viewfinder: bool,

    /// Hide the viewfinder overlay, overriding the configuration
    #[arg(long)]
    pub no_viewfinder: bool,

    /// Stop after this many deliveries
    #[arg(long, value_name = "N")]
    pub max_results: Option<usize>,

    /// Stop after this long without finishing (e.g. 30, 1m)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Spacing between replayed frames (e.g. 33ms)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub frame_interval: Option<Duration>,

    /// Loop replayed frames instead of ending after the last one
    #[arg(long, requires = "frames")]
    pub repeat: bool,

    /// Output format for delivered results
    #[arg(short, long, value_enum)]
    pub output: Option<OutputFormat>,
}

/// Arguments for the decode subcommand.
#[derive(Debug, Args)]
pub struct DecodeArgs {
    /// Image to decode
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,

    /// Output format for the result
    #[arg(short, long, value_enum)]
    pub output: Option<OutputFormat>,
}

/// Arguments for the config subcommand.
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Action to perform
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Configuration actions.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the default configuration file path
    Path,
    /// Write the default configuration to the configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Output format for delivered results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line for scripting
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Parse a human-readable duration.
///
/// A bare number is seconds. Supported suffixes: `ms`, `s`, `m`.
/// Case-insensitive, fractions allowed.
///
/// # Examples
///
/// ```
/// use codescan::cli::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
/// assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// ```
/// # Errors
///
/// Returns an error if the string is empty, contains an invalid or negative
/// number, or has an unknown suffix.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }
    if s.starts_with('-') {
        return Err("Duration cannot be negative".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], s[idx..].trim().to_lowercase()),
        None => (s, String::new()),
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: '{num_str}'"))?;

    let seconds = match suffix.as_str() {
        "" | "s" | "sec" => num,
        "ms" => num / 1_000.0,
        "m" | "min" => num * 60.0,
        _ => return Err(format!("Unknown duration suffix: '{suffix}'")),
    };

    Duration::try_from_secs_f64(seconds).map_err(|e| format!("Invalid duration: {e}"))
}
