//! Progress reporting while the CLI waits for codes.
//!
//! [`ScanProgress`] shows an indicatif spinner on stderr with the session's
//! mode, the elapsed time, and the number of deliveries so far. Results are
//! printed through [`ScanProgress::suspend`] so they never interleave with
//! the spinner line.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::scanner::{ScanMode, ScanResult};

const TICK: Duration = Duration::from_millis(100);

/// Spinner counting deliveries of a running session.
#[derive(Debug)]
pub struct ScanProgress {
    bar: ProgressBar,
    codes: u64,
    failures: u64,
}

impl ScanProgress {
    /// Create a spinner for a session in `mode`.
    ///
    /// # Arguments
    ///
    /// * `mode` - Delivery mode, shown in the prefix
    /// * `hidden` - Draw nothing (quiet mode, or stderr is not a terminal)
    #[must_use]
    pub fn new(mode: ScanMode, hidden: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
            bar.set_style(
                ProgressStyle::with_template("{spinner:.green} {prefix} [{elapsed_precise}] {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner())
                    .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "),
            );
            bar.enable_steady_tick(TICK);
            bar
        };
        bar.set_prefix(format!("Scanning ({mode})"));

        let progress = Self {
            bar,
            codes: 0,
            failures: 0,
        };
        progress.refresh();
        progress
    }

    /// Count a delivered result.
    pub fn record(&mut self, result: &ScanResult) {
        match result {
            Ok(_) => self.codes += 1,
            Err(_) => self.failures += 1,
        }
        self.bar.inc(1);
        self.refresh();
    }

    /// Run `f` with the spinner cleared, e.g. to print a result.
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.bar.suspend(f)
    }

    /// Remove the spinner.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn refresh(&self) {
        let noun = if self.codes == 1 { "code" } else { "codes" };
        let message = match self.failures {
            0 => format!("{} {}", self.codes, noun),
            n => format!("{} {}, {} failed", self.codes, noun, n),
        };
        self.bar.set_message(message);
    }
}

impl Drop for ScanProgress {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}
