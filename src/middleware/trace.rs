//! Trace context installation

use crate::observability::{TraceContext, REQUEST_ID_HEADER, UNKNOWN_TRACE_ID};
use axum::{
    extract::Request,
    http::{self, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Span;

/// Outermost middleware: derive a fresh trace for every request
///
/// Any inbound `X-Request-ID` is ignored; the response always carries the
/// id generated here.
pub async fn trace_middleware(mut req: Request, next: Next) -> Response {
    let parent = req
        .extensions()
        .get::<TraceContext>()
        .cloned()
        .unwrap_or_default();
    let ctx = parent.new_trace();
    let header_value = HeaderValue::from_str(ctx.trace_id()).ok();
    req.extensions_mut().insert(ctx);

    let mut response = next.run(req).await;
    if let Some(value) = header_value {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// `make_span_with` for `TraceLayer`: a `request` span carrying the trace id
pub fn make_request_span<B>(request: &http::Request<B>) -> Span {
    let trace_id = request
        .extensions()
        .get::<TraceContext>()
        .map(|ctx| ctx.trace_id().to_string())
        .unwrap_or_else(|| UNKNOWN_TRACE_ID.to_string());

    tracing::info_span!(
        "request",
        trace_id = %trace_id,
        method = %request.method(),
        path = %request.uri().path(),
    )
}
