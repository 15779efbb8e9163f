//! Diagnostics sink for non-fatal warnings.
//!
//! Warnings are user-facing notices that never change the outcome of an
//! operation. The default sink routes them through `tracing` with a dedicated
//! target so an output layer can render them apart from debug logs.

use parking_lot::Mutex;

/// Emit a user-facing warning event.
///
/// # Example
/// ```rust,ignore
/// emit_warning!("docker", "credentials stored unencrypted");
/// ```
#[macro_export]
macro_rules! emit_warning {
    ($source:expr, $message:expr) => {
        ::tracing::warn!(
            target: "skyhook::diagnostics",
            event_type = "diagnostics.warning",
            source = %$source,
            message = %$message,
        )
    };
}

/// Receives warnings that must reach the user.
pub trait Diagnostics: Send + Sync {
    /// Report a warning
    fn warning(&self, message: &str);
}

/// Sink that emits warnings as tracing events.
#[derive(Debug, Clone, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn warning(&self, message: &str) {
        emit_warning!("skyhook", message);
    }
}

/// Sink that keeps warnings in memory.
#[derive(Debug, Default)]
pub struct MemoryDiagnostics {
    warnings: Mutex<Vec<String>>,
}

impl MemoryDiagnostics {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Warnings received so far, in order
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().clone()
    }
}

impl Diagnostics for MemoryDiagnostics {
    fn warning(&self, message: &str) {
        self.warnings.lock().push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_diagnostics_keeps_order() {
        let sink = MemoryDiagnostics::new();
        sink.warning("first");
        sink.warning("second");
        assert_eq!(sink.warnings(), vec!["first", "second"]);
    }

    #[test]
    fn test_tracing_diagnostics_does_not_panic_without_subscriber() {
        TracingDiagnostics.warning("nobody is listening");
    }
}
