//! Request/response capture and latency measurement

use super::{body_for_log, route_label, MiddlewareState, MirrorBody};
use crate::error::AppError;
use crate::metrics;
use crate::observability::TraceContext;
use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::time::Instant;

/// Log "Request started" / "Request completed" around the downstream handler
///
/// The request body is read up front (bounded by `max_body_bytes`) and put
/// back so the handler still sees it. The completion record is emitted by
/// the response body wrapper once the body has been sent or dropped.
pub async fn capture_middleware(
    State(state): State<MiddlewareState>,
    ctx: TraceContext,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let log = state.logger.logger_for(&ctx);
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or_default().to_string();
    let route = route_label(&req);

    let (parts, body) = req.into_parts();
    let response = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => {
            log.info(
                "Request started",
                json!({
                    "method": &method,
                    "path": &path,
                    "query": &query,
                    "request_body": body_for_log(&bytes, bytes.len(), state.log_body_max_bytes),
                }),
            );
            let req = Request::from_parts(parts, Body::from(bytes));
            next.run(req).await
        }
        Err(err) => {
            log.warn(
                "Failed to read request body",
                json!({
                    "method": &method,
                    "path": &path,
                    "limit": state.max_body_bytes,
                    "err": err.to_string(),
                }),
            );
            AppError::InvalidRequest("request body is too large or unreadable".to_string())
                .into_response()
        }
    };

    let duration = start.elapsed();
    let status = response.status();
    metrics::record_request(&method, &route, status.as_u16(), duration);

    let limit = state.log_body_max_bytes;
    let (parts, body) = response.into_parts();
    let body = MirrorBody::new(body, limit, move |captured, total_len| {
        log.info(
            "Request completed",
            json!({
                "method": method,
                "path": path,
                "status": status.as_u16(),
                "duration": duration.as_secs_f64(),
                "response_body": body_for_log(captured, total_len, limit),
            }),
        );
    });
    Response::from_parts(parts, Body::new(body))
}
