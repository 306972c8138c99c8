//! Tracing and logging (shared setup).

/// Initialize process-wide logging with the default settings.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(&LogConfig::default());
}

/// Tracing configuration (filters, formats).
pub mod tracing;

pub use tracing::{LogConfig, LogFormat, init_for_tests};
