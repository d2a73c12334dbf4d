//! HTTP middleware chain, outermost first:
//!
//! 1. [`trace::trace_middleware`] installs a fresh [`TraceContext`](crate::observability::TraceContext)
//!    and echoes it in `X-Request-ID`
//! 2. `TraceLayer` opens the `request` span ([`trace::make_request_span`])
//! 3. [`capture::capture_middleware`] logs request/response payloads and latency
//! 4. [`recover::recover_middleware`] turns handler panics into 500 responses

pub mod capture;
pub mod mirror_body;
pub mod recover;
pub mod trace;

pub use capture::capture_middleware;
pub use mirror_body::MirrorBody;
pub use recover::recover_middleware;
pub use trace::{make_request_span, trace_middleware};

use crate::config::ServerConfig;
use crate::observability::StructuredLogger;
use axum::extract::MatchedPath;
use axum::http::Request;
use std::sync::Arc;

/// Appended to bodies cut short in log records
pub const TRUNCATED_MARKER: &str = "...(truncated)";

/// State shared by the capture and recovery middleware
#[derive(Debug, Clone)]
pub struct MiddlewareState {
    pub logger: Arc<StructuredLogger>,
    pub max_body_bytes: usize,
    pub log_body_max_bytes: usize,
}

impl MiddlewareState {
    pub fn new(logger: Arc<StructuredLogger>, config: &ServerConfig) -> Self {
        Self {
            logger,
            max_body_bytes: config.max_body_bytes,
            log_body_max_bytes: config.log_body_max_bytes,
        }
    }
}

/// Render a captured body for a log record
///
/// At most `max_bytes` are kept, cut on a character boundary; the marker is
/// appended when `total_len` says more was sent than is shown.
pub fn body_for_log(captured: &[u8], total_len: usize, max_bytes: usize) -> String {
    let cut = captured.len().min(max_bytes);
    let mut text = match std::str::from_utf8(&captured[..cut]) {
        Ok(text) => text.to_string(),
        // Cut inside a multi-byte character
        Err(err) if err.error_len().is_none() => {
            String::from_utf8_lossy(&captured[..err.valid_up_to()]).into_owned()
        }
        Err(_) => String::from_utf8_lossy(&captured[..cut]).into_owned(),
    };
    if total_len > cut {
        text.push_str(TRUNCATED_MARKER);
    }
    text
}

/// Route template for metrics labels (`/api/v1/users/:id`), falling back to the raw path
pub(crate) fn route_label<B>(request: &Request<B>) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string())
}
