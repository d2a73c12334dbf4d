use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::AppError;
use crate::models::{User, UserPage, UserQuery};
use crate::observability::{Fields, ScopedLogger, StructuredLogger, TraceContext};
use crate::service::UserService;

/// State shared by the user handlers
#[derive(Clone)]
pub struct AppState {
    pub service: UserService,
    pub logger: Arc<StructuredLogger>,
}

/// Raw query string parameters; numbers are parsed by the handler so a
/// malformed value becomes a JSON 400 instead of an extractor rejection
#[derive(Debug, Default, Deserialize)]
pub struct ListUsersParams {
    pub page: Option<String>,
    pub size: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Parse a pagination parameter
///
/// Missing or blank → `default`; non-integer → 400; zero or negative → `default`.
fn parse_pagination(
    log: &ScopedLogger,
    name: &str,
    raw: Option<&str>,
    default: i64,
) -> Result<i64, AppError> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(default),
        Some(raw) => raw,
    };

    match raw.parse::<i64>() {
        Ok(value) if value > 0 => Ok(value),
        Ok(_) => Ok(default),
        Err(err) => {
            log.error(
                &format!("Failed to parse {} parameter", name),
                json!({ "value": raw, "err": err.to_string() }),
            );
            Err(AppError::InvalidRequest(format!("Invalid {} parameter", name)))
        }
    }
}

/// GET /api/v1/users
pub async fn list_users(
    State(state): State<AppState>,
    ctx: TraceContext,
    Query(params): Query<ListUsersParams>,
) -> Result<Json<UserPage>, AppError> {
    let log = state.logger.logger_for(&ctx);
    log.info("GetUsers handler called", Fields::new());

    let page = parse_pagination(&log, "page", params.page.as_deref(), UserQuery::DEFAULT_PAGE)?;
    let size = parse_pagination(&log, "size", params.size.as_deref(), UserQuery::DEFAULT_SIZE)?;

    log.info("Fetching users", json!({ "page": page, "size": size }));

    let query = UserQuery {
        page,
        size,
        name: params.name.unwrap_or_default(),
        email: params.email.unwrap_or_default(),
    };

    match state.service.get_users(&ctx, query).await {
        Ok(result) => {
            log.info(
                "Users fetched successfully",
                json!({ "count": result.users.len(), "total": result.total }),
            );
            Ok(Json(result))
        }
        Err(err) => {
            log.error("Failed to fetch users from database", json!({ "err": err.to_string() }));
            Err(err)
        }
    }
}

/// GET /api/v1/users/:id
pub async fn get_user(
    State(state): State<AppState>,
    ctx: TraceContext,
    Path(id): Path<String>,
) -> Result<Json<User>, AppError> {
    let log = state.logger.logger_for(&ctx);
    log.info("GetUser handler called", json!({ "id": &id }));

    let id: i64 = id
        .parse()
        .map_err(|_| AppError::InvalidRequest(format!("Invalid user id: {}", id)))?;

    let user = state.service.get_user(&ctx, id).await?;
    log.info("User retrieved successfully", json!({ "user_id": user.id }));
    Ok(Json(user))
}
