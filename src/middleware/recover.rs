//! Panic recovery for downstream handlers

use super::{route_label, MiddlewareState};
use crate::error::AppError;
use crate::metrics;
use crate::observability::TraceContext;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use serde_json::json;
use std::any::Any;
use std::panic::AssertUnwindSafe;

/// Innermost middleware: a panicking handler yields one error record and a 500
pub async fn recover_middleware(
    State(state): State<MiddlewareState>,
    ctx: TraceContext,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let route = route_label(&req);

    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => {
            state.logger.logger_for(&ctx).error(
                "Recovered from panic",
                json!({
                    "method": method,
                    "path": path,
                    "panic": panic_message(payload.as_ref()),
                }),
            );
            metrics::record_panic(&route);
            AppError::InternalError("internal server error".to_string()).into_response()
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
