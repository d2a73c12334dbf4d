//! User business logic

use crate::error::AppError;
use crate::models::{User, UserPage, UserQuery};
use crate::observability::{StructuredLogger, TraceContext};
use crate::repository::UserRepository;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct UserService {
    repository: UserRepository,
    logger: Arc<StructuredLogger>,
}

impl UserService {
    pub fn new(repository: UserRepository, logger: Arc<StructuredLogger>) -> Self {
        Self { repository, logger }
    }

    pub async fn get_users(&self, ctx: &TraceContext, query: UserQuery) -> Result<UserPage, AppError> {
        let log = self.logger.logger_for(ctx);
        log.info("Service: Getting users", json!({ "query": &query }));

        let (users, total) = self.repository.list(ctx, &query).await.map_err(|err| {
            log.error("Service: Failed to get users", json!({ "err": err.to_string() }));
            AppError::from(err)
        })?;

        log.info(
            "Service: Users retrieved successfully",
            json!({ "total": total, "retrieved": users.len() }),
        );
        Ok(UserPage {
            users,
            total,
            page: query.page,
            size: query.size,
        })
    }

    pub async fn get_user(&self, ctx: &TraceContext, id: i64) -> Result<User, AppError> {
        let log = self.logger.logger_for(ctx);
        log.info("Service: Getting user by ID", json!({ "id": id }));

        match self.repository.find_by_id(ctx, id).await {
            Ok(user) => {
                log.info("Service: User retrieved successfully", json!({ "id": id }));
                Ok(user)
            }
            Err(sqlx::Error::RowNotFound) => {
                log.warn("Service: User not found", json!({ "id": id }));
                Err(AppError::NotFound(format!("user {} not found", id)))
            }
            Err(err) => {
                log.error(
                    "Service: Failed to get user by ID",
                    json!({ "id": id, "err": err.to_string() }),
                );
                Err(AppError::from(err))
            }
        }
    }

    pub async fn create_user(&self, ctx: &TraceContext, name: &str, email: &str) -> Result<User, AppError> {
        let user = self.repository.create(ctx, name, email).await?;
        Ok(user)
    }
}
