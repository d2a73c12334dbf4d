//! Per-request trace context
//!
//! Every inbound request gets a fresh [`TraceId`] bound into a [`TraceContext`].
//! The context is passed explicitly down the call chain (handler → service →
//! repository → datastore) so every record can be correlated with the request.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Value reported when no trace has been installed
pub const UNKNOWN_TRACE_ID: &str = "unknown";

/// Response header echoing the trace id back to the client
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Opaque, globally unique request identifier (UUID v4)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TraceId(Arc<str>);

impl TraceId {
    pub fn generate() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request-scoped context carrying the trace id
///
/// Cloning is cheap; the id itself is shared and never mutated. A context
/// without a trace (see [`TraceContext::background`]) reports
/// [`UNKNOWN_TRACE_ID`].
#[derive(Clone, Debug, Default)]
pub struct TraceContext {
    trace_id: Option<TraceId>,
}

impl TraceContext {
    /// Context with no trace installed (startup, background jobs, tests)
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a child context bound to a freshly generated trace id
    ///
    /// The parent is left untouched; any trace it carried is replaced in the
    /// child, since requests never inherit an upstream id.
    pub fn new_trace(&self) -> Self {
        Self {
            trace_id: Some(TraceId::generate()),
        }
    }

    /// The bound trace id, or `"unknown"` when none is installed
    pub fn trace_id(&self) -> &str {
        self.trace_id
            .as_ref()
            .map(TraceId::as_str)
            .unwrap_or(UNKNOWN_TRACE_ID)
    }

    pub fn id(&self) -> Option<&TraceId> {
        self.trace_id.as_ref()
    }

    pub fn is_traced(&self) -> bool {
        self.trace_id.is_some()
    }
}

/// Handlers take `TraceContext` as an extractor; a request that bypassed the
/// trace middleware yields a background context instead of a rejection.
#[async_trait]
impl<S> FromRequestParts<S> for TraceContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<TraceContext>()
            .cloned()
            .unwrap_or_default())
    }
}
