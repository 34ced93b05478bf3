//! Delivery rules for decoded codes.
//!
//! # Overview
//!
//! [`Dispatcher`] owns the mutable state of a scan session and decides, one
//! event at a time, whether a code is delivered to the completion sink:
//!
//! 1. While paused, every event is discarded without touching state.
//! 2. Once finished (`Once` mode after its first delivery), every event is discarded.
//! 3. Otherwise the scan mode decides:
//!    - `Once`: deliver, then latch finished.
//!    - `OncePerCode`: deliver codes not seen before in this session.
//!    - `Continuous`: deliver when at least the scan interval has passed
//!      since the previous delivery.
//!
//! Time is passed in by the caller, so the rules are deterministic under test.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use super::{PipelineEvent, ScanError, ScanMode, ScanResult};

/// Why an event did not reach the completion sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    /// The session was paused.
    Paused,
    /// A `Once` session already delivered its code.
    Finished,
    /// A `OncePerCode` session already delivered this code.
    AlreadySeen,
    /// A `Continuous` session delivered less than one interval ago.
    TooSoon,
    /// The pipeline already reported a failure.
    Failed,
}

/// Result of handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Hand this result to the completion sink.
    Deliver(ScanResult),
    /// Drop the event.
    Discard(Discard),
}

impl Outcome {
    /// Whether this outcome reaches the sink.
    #[must_use]
    pub fn is_delivery(&self) -> bool {
        matches!(self, Self::Deliver(_))
    }
}

/// Per-session delivery state machine.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    mode: ScanMode,
    scan_interval: Duration,
    seen_codes: HashSet<String>,
    finished: bool,
    failed: bool,
    last_delivery: Option<Instant>,
    deliveries: usize,
}

impl Dispatcher {
    /// Create a dispatcher for the given mode and continuous-mode interval.
    #[must_use]
    pub fn new(mode: ScanMode, scan_interval: Duration) -> Self {
        Self {
            mode,
            scan_interval,
            seen_codes: HashSet::new(),
            finished: false,
            failed: false,
            last_delivery: None,
            deliveries: 0,
        }
    }

    /// Decide what to do with one pipeline event.
    ///
    /// `paused` is read from the host's binding at the moment the event is
    /// processed. `now` is the time used for the continuous-mode interval.
    pub fn handle(&mut self, event: PipelineEvent, paused: bool, now: Instant) -> Outcome {
        if paused {
            return Outcome::Discard(Discard::Paused);
        }
        if self.finished {
            return Outcome::Discard(Discard::Finished);
        }
        if self.failed {
            return Outcome::Discard(Discard::Failed);
        }

        let code = match event {
            PipelineEvent::Code(code) => code.value,
            PipelineEvent::Failure(err) => return self.fail(err),
        };

        match self.mode {
            ScanMode::Once => {
                self.finished = true;
                self.deliver(code, now)
            }
            ScanMode::OncePerCode => {
                if self.seen_codes.contains(&code) {
                    return Outcome::Discard(Discard::AlreadySeen);
                }
                self.seen_codes.insert(code.clone());
                self.deliver(code, now)
            }
            ScanMode::Continuous => {
                let due = self
                    .last_delivery
                    .is_none_or(|last| now.saturating_duration_since(last) >= self.scan_interval);
                if !due {
                    return Outcome::Discard(Discard::TooSoon);
                }
                self.deliver(code, now)
            }
        }
    }

    /// Record a pipeline setup failure.
    ///
    /// Setup failures are not subject to the pause gate; they still latch so
    /// that at most one failure is ever delivered.
    pub fn setup_failed(&mut self, err: ScanError) -> Outcome {
        if self.failed {
            return Outcome::Discard(Discard::Failed);
        }
        self.fail(err)
    }

    fn fail(&mut self, err: ScanError) -> Outcome {
        self.failed = true;
        Outcome::Deliver(Err(err))
    }

    fn deliver(&mut self, code: String, now: Instant) -> Outcome {
        self.last_delivery = Some(now);
        self.deliveries += 1;
        Outcome::Deliver(Ok(code))
    }

    /// Scan mode of this session.
    #[must_use]
    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Whether a `Once` session has delivered its code.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether a failure has been delivered.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Codes delivered so far in `OncePerCode` mode.
    #[must_use]
    pub fn seen_codes(&self) -> &HashSet<String> {
        &self.seen_codes
    }

    /// Number of successful deliveries.
    #[must_use]
    pub fn deliveries(&self) -> usize {
        self.deliveries
    }
}
