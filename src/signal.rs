//! Ctrl+C handling for running scan sessions.
//!
//! The CLI installs one process-wide handler. Pressing Ctrl+C marks the scan
//! as interrupted and stops whichever session is being watched, so its
//! pipeline is torn down and no further result reaches the sink.
//!
//! # Usage
//!
//! ```rust,no_run
//! use codescan::scanner::{ScanMode, ScanResult, ScanSession, SessionConfig, SimulatedCapture};
//! use codescan::signal::install_handler;
//!
//! let handler = install_handler().expect("Failed to install signal handler");
//! let (pipeline, _trigger) = SimulatedCapture::new("");
//! let session = ScanSession::start(
//!     SessionConfig::new(ScanMode::Continuous),
//!     Box::new(pipeline),
//!     |_: ScanResult| {},
//! );
//! handler.watch(session.handle());
//!
//! while !session.is_stopped() {
//!     std::thread::sleep(std::time::Duration::from_millis(50));
//! }
//! assert!(handler.is_interrupted());
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::scanner::SessionHandle;

/// Shared interrupt state: a flag plus the session to stop.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandler {
    flag: Arc<AtomicBool>,
    session: Arc<Mutex<Option<SessionHandle>>>,
}

impl InterruptHandler {
    /// Create a handler that is not hooked to any signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an interrupt was received since the last [`reset`](Self::reset).
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Stop this session when an interrupt arrives.
    ///
    /// Replaces any previously watched session. If an interrupt already
    /// arrived, the session is stopped immediately.
    pub fn watch(&self, session: SessionHandle) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(session);
        if self.is_interrupted() {
            self.stop_watched();
        }
    }

    /// Forget the watched session.
    pub fn unwatch(&self) {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Behave as if Ctrl+C had been pressed.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.stop_watched();
    }

    /// Clear the interrupt flag and the watched session.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
        self.unwatch();
    }

    fn stop_watched(&self) {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(session) = session {
            session.stop();
        }
    }
}

/// Error type for signal handler installation.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Failed to install the Ctrl+C handler.
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static GLOBAL_HANDLER: OnceLock<InterruptHandler> = OnceLock::new();

/// Install the process-wide Ctrl+C handler, or reuse the installed one.
///
/// A reused handler is [`reset`](InterruptHandler::reset) first. When some
/// other code already owns the Ctrl+C hook, an unhooked handler is returned
/// so [`InterruptHandler::interrupt`] keeps working.
///
/// # Errors
///
/// Returns [`SignalError::InstallFailed`] if the system refuses the hook.
pub fn install_handler() -> Result<InterruptHandler, SignalError> {
    if let Some(handler) = GLOBAL_HANDLER.get() {
        handler.reset();
        return Ok(handler.clone());
    }

    let handler = InterruptHandler::new();
    let hooked = handler.clone();
    let registered = ctrlc::set_handler(move || {
        let _ = writeln!(std::io::stderr(), "\nInterrupted. Stopping scan...");
        let _ = std::io::stderr().flush();
        log::info!("Interrupt received");
        hooked.interrupt();
    });
    adopt(registered, handler)
}

fn adopt(
    registered: Result<(), ctrlc::Error>,
    handler: InterruptHandler,
) -> Result<InterruptHandler, SignalError> {
    match registered {
        Ok(()) => {
            let _ = GLOBAL_HANDLER.set(handler.clone());
            Ok(handler)
        }
        Err(ctrlc::Error::MultipleHandlers) => {
            // Another hook owns Ctrl+C, e.g. a parallel test in this process.
            log::debug!("Ctrl+C handler already registered, using unhooked handler");
            Ok(GLOBAL_HANDLER.get_or_init(InterruptHandler::new).clone())
        }
        Err(e) => Err(SignalError::InstallFailed(e)),
    }
}
