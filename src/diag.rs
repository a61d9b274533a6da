//! Diagnostics reporting for IO workers
//!
//! Workers never log directly; they hand every diagnostic to an injected
//! [`Reporter`]. Production binds the reporter to structured logging,
//! tests bind it to an in-memory counter sink so diagnostic counts and
//! messages can be asserted.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Warning,
    Error,
}

/// Diagnostics sink used by the IO loops
pub trait Reporter: Send + Sync {
    fn report(&self, severity: Severity, message: &str);
}

/// Production sink forwarding to `tracing`
#[derive(Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Debug => tracing::debug!("{message}"),
            Severity::Warning => tracing::warn!("{message}"),
            Severity::Error => tracing::error!("{message}"),
        }
    }
}

/// In-memory sink with cumulative counters and a last-message slot
#[derive(Debug, Default)]
pub struct CountingReporter {
    warnings: AtomicUsize,
    errors: AtomicUsize,
    last_message: Mutex<String>,
}

impl CountingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cumulative warning count
    pub fn warnings(&self) -> usize {
        self.warnings.load(Ordering::SeqCst)
    }

    /// Cumulative error count
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    /// Text of the most recent warning or error
    pub fn last_message(&self) -> String {
        self.last_message.lock().clone()
    }

    /// Clear counters and the last-message slot
    pub fn reset(&self) {
        self.warnings.store(0, Ordering::SeqCst);
        self.errors.store(0, Ordering::SeqCst);
        self.last_message.lock().clear();
    }
}

impl Reporter for CountingReporter {
    fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Debug => return,
            Severity::Warning => self.warnings.fetch_add(1, Ordering::SeqCst),
            Severity::Error => self.errors.fetch_add(1, Ordering::SeqCst),
        };
        *self.last_message.lock() = message.to_string();
    }
}
