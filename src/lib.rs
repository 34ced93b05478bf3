//! codescan - barcode and QR scan sessions
//!
//! A scan session binds a capture pipeline (camera frames, still images, or a
//! simulated payload) to a completion callback, and decides which recognized
//! codes are delivered: once, once per distinct code, or continuously at a
//! fixed interval.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
pub mod progress;
pub mod scanner;
pub mod signal;

pub use app::run_app;
