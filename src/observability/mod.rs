//! Request-scoped observability for user-api
//!
//! - **Trace context**: one UUID per inbound request, passed explicitly down the call chain
//! - **Structured logger**: JSON lines, level-gated, one rotating file sink
//! - **Tracing bridge**: ambient `tracing` events land in the same sink
//!
//! ## Architecture
//!
//! ```text
//! handler / service / repository / datastore
//!     ↓ ScopedLogger (trace_id bound)      tracing::info!(..) → SinkLayer
//!     ↓                                     ↓
//! StructuredLogger ── encode ──→ non-blocking queue ──→ RotatingFileWriter
//! ```

pub mod layer;
pub mod logger;
pub mod record;
pub mod rotation;
pub mod trace;

use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{prelude::*, util::TryInitError, EnvFilter};

// Re-export public types
pub use layer::SinkLayer;
pub use logger::{ScopedLogger, StructuredLogger};
pub use record::{Fields, Level, LogRecord};
pub use rotation::{RotatingFileWriter, RotationPolicy, SizeUnit};
pub use trace::{TraceContext, TraceId, REQUEST_ID_HEADER, UNKNOWN_TRACE_ID};

/// Logger initialization failures; all of them are fatal at startup
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open log file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid log filename pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid UTC offset: {0} hours")]
    InvalidUtcOffset(i32),
}

/// `EnvFilter` directives for the configured level
///
/// Noisy dependencies are held at warn; nothing else narrows the level.
pub fn default_filter(level: Level) -> String {
    format!(
        "{},sqlx=warn,hyper=warn,tower_http=warn",
        level.as_tracing_filter()
    )
}

/// Filter for bridged `tracing` events, derived from the logger's level only
///
/// `RUST_LOG` is not read; the level always agrees with
/// [`StructuredLogger::enabled`].
pub fn event_filter(level: Level) -> EnvFilter {
    EnvFilter::new(default_filter(level))
}

/// Install the global tracing subscriber that feeds `logger`
///
/// Can only succeed once per process.
pub fn install_global(logger: Arc<StructuredLogger>) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(event_filter(logger.level()))
        .with(SinkLayer::new(logger))
        .try_init()
}
