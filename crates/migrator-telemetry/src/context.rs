//! Run-level span helpers.
//!
//! # Design
//! - One span per process run carries mode, build SHA and a run identifier.
//! - The span stays entered for the lifetime of the guard so every event inherits it.

use tracing::{Span, span::Entered};
use uuid::Uuid;

use crate::init::build_sha;

/// Guard that keeps the run-level span entered for the lifetime of the process.
pub struct GlobalContextGuard {
    trace_id: Uuid,
    _guard: Entered<'static>,
}

impl GlobalContextGuard {
    /// Enter the run-level tracing span for the lifetime of the guard.
    #[must_use]
    pub fn new(mode: impl Into<String>) -> Self {
        let mode = mode.into();
        let trace_id = Uuid::new_v4();
        let span: &'static Span = Box::leak(Box::new(tracing::info_span!(
            "run",
            mode = %mode,
            build_sha = %build_sha(),
            trace_id = %trace_id
        )));
        let guard = span.enter();
        Self {
            trace_id,
            _guard: guard,
        }
    }

    /// Identifier recorded on the run span.
    #[must_use]
    pub const fn trace_id(&self) -> Uuid {
        self.trace_id
    }
}

/// Record the current invocation mode on the active span.
pub fn record_mode(mode: &str) {
    Span::current().record("mode", tracing::field::display(mode));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_context_guard_assigns_trace_id() {
        let first = GlobalContextGuard::new("primary");
        record_mode("cluster-member");
        let id = first.trace_id();
        drop(first);
        let second = GlobalContextGuard::new("primary");
        assert_ne!(id, second.trace_id());
    }
}
