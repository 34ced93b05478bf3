//! Logging setup for codescan.
//!
//! Uses the `log` facade with the `env_logger` backend, writing to stderr so
//! delivered results on stdout stay machine-readable. The level comes from,
//! in priority order:
//!
//! 1. The `RUST_LOG` environment variable (if set)
//! 2. CLI flags: `--quiet` (errors only) or `-v`/`-vv`/`-vvv`
//! 3. Default: warnings
//!
//! Debug builds prefix each record with a timestamp and module path. Records
//! from the session's worker threads carry the thread name
//! (`codescan-capture`, `codescan-dispatch`) in every build.
//!
//! # Example
//!
//! ```rust,no_run
//! use codescan::logging::init_logging;
//!
//! // -v: show session start/stop and pipeline selection
//! init_logging(1, false);
//! log::info!("Scanning");
//! ```

use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;

/// Initialize logging from the CLI verbosity flags.
///
/// Calling it again is harmless; only the first call installs a logger.
///
/// # Arguments
///
/// * `verbose` - Verbosity count from CLI (0=warn, 1=info, 2=debug, 3+=trace)
/// * `quiet` - Only show errors (overridden by `RUST_LOG`)
pub fn init_logging(verbose: u8, quiet: bool) {
    let from_env = env::var("RUST_LOG").is_ok();

    let mut builder = Builder::new();
    if from_env {
        builder.parse_default_env();
    } else {
        builder.filter_level(determine_level(verbose, quiet));
    }
    configure_format(&mut builder);

    if builder.try_init().is_err() {
        return;
    }
    if from_env {
        log::debug!("Logging configured from RUST_LOG");
    } else {
        log::debug!("Logging at level {:?}", determine_level(verbose, quiet));
    }
}

/// Map the CLI flags to a level filter.
#[must_use]
pub fn determine_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn configure_format(builder: &mut Builder) {
    builder.format(|buf, record| {
        let thread = std::thread::current();
        let worker = thread
            .name()
            .filter(|name| name.starts_with("codescan-"))
            .map(|name| format!(" [{name}]"))
            .unwrap_or_default();

        if cfg!(debug_assertions) {
            writeln!(
                buf,
                "[{} {:5} {}]{} {}",
                buf.timestamp_millis(),
                record.level(),
                record.module_path().unwrap_or("codescan"),
                worker,
                record.args()
            )
        } else {
            writeln!(buf, "[{:5}]{} {}", record.level(), worker, record.args())
        }
    });
}
