//! SQL access for the `users` table

use crate::db::{Datastore, SqlArg};
use crate::models::{User, UserQuery};
use crate::observability::{Fields, StructuredLogger, TraceContext};
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use std::sync::Arc;

const USER_COLUMNS: &str = "id, name, email, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct UserRepository {
    datastore: Datastore,
    logger: Arc<StructuredLogger>,
}

impl UserRepository {
    pub fn new(datastore: Datastore, logger: Arc<StructuredLogger>) -> Self {
        Self { datastore, logger }
    }

    /// Count matching users, then load one page of them ordered by id
    pub async fn list(
        &self,
        ctx: &TraceContext,
        query: &UserQuery,
    ) -> Result<(Vec<User>, i64), sqlx::Error> {
        let log = self.logger.logger_for(ctx);
        let (filter, mut args) = filter_clause(query);

        log.info("Repository: Counting users", json!({ "query": query }));
        let total: i64 = match self
            .datastore
            .fetch_scalar(ctx, &format!("SELECT COUNT(*) FROM users{}", filter), &args)
            .await
        {
            Ok(total) => total,
            Err(err) => {
                log.error("Repository: Failed to count users", json!({ "err": err.to_string() }));
                return Err(err);
            }
        };

        let offset = query.offset();
        log.info(
            "Repository: Getting users",
            json!({ "offset": offset, "limit": query.size }),
        );
        args.push(SqlArg::Int(query.size));
        args.push(SqlArg::Int(offset));
        let sql = format!(
            "SELECT {} FROM users{} ORDER BY id LIMIT ? OFFSET ?",
            USER_COLUMNS, filter
        );
        let users: Vec<User> = match self.datastore.fetch_all(ctx, &sql, &args).await {
            Ok(users) => users,
            Err(err) => {
                log.error("Repository: Failed to get users", json!({ "err": err.to_string() }));
                return Err(err);
            }
        };

        log.info(
            "Repository: Users retrieved",
            json!({ "count": users.len(), "total": total }),
        );
        Ok((users, total))
    }

    /// `sqlx::Error::RowNotFound` when the user is missing or soft-deleted
    pub async fn find_by_id(&self, ctx: &TraceContext, id: i64) -> Result<User, sqlx::Error> {
        let log = self.logger.logger_for(ctx);
        log.debug("Repository: Getting user by ID", json!({ "id": id }));

        let sql = format!(
            "SELECT {} FROM users WHERE id = ? AND deleted_at IS NULL",
            USER_COLUMNS
        );
        let result = self.datastore.fetch_one(ctx, &sql, &[SqlArg::Int(id)]).await;
        if let Err(err) = &result {
            if !matches!(err, sqlx::Error::RowNotFound) {
                log.error(
                    "Repository: Failed to get user by ID",
                    json!({ "id": id, "err": err.to_string() }),
                );
            }
        }
        result
    }

    pub async fn create(
        &self,
        ctx: &TraceContext,
        name: &str,
        email: &str,
    ) -> Result<User, sqlx::Error> {
        let now = Utc::now();
        let stamp = now.to_rfc3339_opts(SecondsFormat::Micros, true);

        let done = self
            .datastore
            .execute(
                ctx,
                "INSERT INTO users (name, email, created_at, updated_at) VALUES (?, ?, ?, ?)",
                &[
                    SqlArg::from(name),
                    SqlArg::from(email),
                    SqlArg::from(stamp.clone()),
                    SqlArg::from(stamp),
                ],
            )
            .await?;

        let user = User {
            id: done.last_insert_rowid(),
            name: name.to_string(),
            email: email.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.logger
            .logger_for(ctx)
            .info("Repository: User created", Fields::new().with("id", user.id));
        Ok(user)
    }
}

/// `WHERE` clause shared by the count and page queries
fn filter_clause(query: &UserQuery) -> (String, Vec<SqlArg>) {
    let mut clause = String::from(" WHERE deleted_at IS NULL");
    let mut args = Vec::new();
    if !query.name.is_empty() {
        clause.push_str(" AND name LIKE ? ESCAPE '\\'");
        args.push(SqlArg::Text(contains_pattern(&query.name)));
    }
    if !query.email.is_empty() {
        clause.push_str(" AND email LIKE ? ESCAPE '\\'");
        args.push(SqlArg::Text(contains_pattern(&query.email)));
    }
    (clause, args)
}

/// `%value%` with LIKE wildcards in `value` matched literally
fn contains_pattern(value: &str) -> String {
    let mut pattern = String::with_capacity(value.len() + 2);
    pattern.push('%');
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
