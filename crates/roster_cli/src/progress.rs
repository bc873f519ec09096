//! Progress reporting for sync runs.
//!
//! This module provides two modes of progress reporting:
//! - Interactive mode (TTY): Animated progress bars using indicatif
//! - Logging mode (non-TTY): Structured logging using tracing
//!
//! Interactive mode shows one bar per scope (`project/kind`); a run over
//! content and engagement therefore shows the authors bar plus one bar per
//! engagement kind.

mod interactive;
mod logging;

use std::sync::Arc;

use console::Term;
use roster::sync::{ProgressCallback, SyncProgress};

pub(crate) use interactive::InteractiveReporter;
pub(crate) use logging::LoggingReporter;

/// Progress reporter that handles both interactive and logging modes.
pub(crate) enum ProgressReporter {
    /// Interactive progress bars for TTY.
    Interactive(InteractiveReporter),
    /// Structured logging for non-TTY (CI, pipes).
    Logging(LoggingReporter),
}

impl ProgressReporter {
    /// Create a new progress reporter, auto-detecting TTY mode.
    pub(crate) fn new() -> Self {
        if Term::stdout().is_term() {
            Self::Interactive(InteractiveReporter::new())
        } else {
            Self::Logging(LoggingReporter)
        }
    }

    /// Handle a progress event.
    pub(crate) fn handle(&self, event: SyncProgress) {
        match self {
            Self::Interactive(r) => r.handle(event),
            Self::Logging(r) => r.handle(event),
        }
    }

    /// Convert to a ProgressCallback for the library.
    pub(crate) fn as_callback(self: &Arc<Self>) -> Arc<ProgressCallback> {
        let reporter = Arc::clone(self);
        Arc::new(move |event: SyncProgress| reporter.handle(event))
    }

    /// Finish all progress bars (interactive mode only).
    pub(crate) fn finish(&self) {
        if let Self::Interactive(r) = self {
            r.finish();
        }
    }
}
