//! SQLite datastore with a per-query tracing hook

pub mod query_logger;

pub use query_logger::{QueryLogLevel, QueryLogger, SqlTraceLogger};

use crate::config::DatabaseConfig;
use crate::observability::TraceContext;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteQueryResult,
    SqliteRow,
};
use sqlx::{ConnectOptions, FromRow};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

/// Positional bind argument
#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    Int(i64),
    Text(String),
}

impl From<i64> for SqlArg {
    fn from(value: i64) -> Self {
        SqlArg::Int(value)
    }
}

impl From<&str> for SqlArg {
    fn from(value: &str) -> Self {
        SqlArg::Text(value.to_string())
    }
}

impl From<String> for SqlArg {
    fn from(value: String) -> Self {
        SqlArg::Text(value)
    }
}

impl fmt::Display for SqlArg {
    /// SQL literal form: integers as-is, text single-quoted with quotes doubled
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlArg::Int(value) => write!(f, "{}", value),
            SqlArg::Text(value) => write!(f, "'{}'", value.replace('\'', "''")),
        }
    }
}

/// Render `sql` with its `?` placeholders replaced by the bound arguments
///
/// Placeholders inside quoted literals are left alone, as are placeholders
/// without a matching argument.
pub fn explain_sql(sql: &str, args: &[SqlArg]) -> String {
    let mut rendered = String::with_capacity(sql.len() + args.len() * 8);
    let mut args = args.iter();
    let mut quote: Option<char> = None;

    for ch in sql.chars() {
        match (quote, ch) {
            (None, '\'' | '"') => {
                quote = Some(ch);
                rendered.push(ch);
            }
            (Some(open), _) if ch == open => {
                quote = None;
                rendered.push(ch);
            }
            (None, '?') => match args.next() {
                Some(arg) => rendered.push_str(&arg.to_string()),
                None => rendered.push('?'),
            },
            _ => rendered.push(ch),
        }
    }
    rendered
}

macro_rules! bind_args {
    ($query:expr, $args:expr) => {{
        let mut query = $query;
        for arg in $args {
            query = match arg {
                SqlArg::Int(value) => query.bind(*value),
                SqlArg::Text(value) => query.bind(value.as_str()),
            };
        }
        query
    }};
}

/// Connection pool wrapper; every statement is reported to the query logger
#[derive(Clone)]
pub struct Datastore {
    pool: SqlitePool,
    query_logger: Option<Arc<dyn QueryLogger>>,
}

impl Datastore {
    /// Open (creating if missing) the database named by `config.url`
    pub async fn connect(
        config: &DatabaseConfig,
        query_logger: Option<Arc<dyn QueryLogger>>,
    ) -> Result<Self, sqlx::Error> {
        let mut options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .disable_statement_logging();

        let in_memory = config.url.contains(":memory:") || config.url.contains("mode=memory");
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
            if let Some(parent) = options
                .get_filename()
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
            {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        Ok(Self::from_pool(pool, query_logger))
    }

    pub fn from_pool(pool: SqlitePool, query_logger: Option<Arc<dyn QueryLogger>>) -> Self {
        Self { pool, query_logger }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn query_logger(&self) -> Option<&Arc<dyn QueryLogger>> {
        self.query_logger.as_ref()
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn fetch_all<T>(
        &self,
        ctx: &TraceContext,
        sql: &str,
        args: &[SqlArg],
    ) -> Result<Vec<T>, sqlx::Error>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let begin = Instant::now();
        let result = bind_args!(sqlx::query_as::<_, T>(sql), args)
            .fetch_all(&self.pool)
            .await;

        let rows = result.as_ref().map_or(0, |rows| rows.len() as i64);
        self.trace(ctx, begin, sql, args, rows, result.as_ref().err());
        result
    }

    /// Fails with `sqlx::Error::RowNotFound` when the query returns nothing
    pub async fn fetch_one<T>(
        &self,
        ctx: &TraceContext,
        sql: &str,
        args: &[SqlArg],
    ) -> Result<T, sqlx::Error>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let begin = Instant::now();
        let result = bind_args!(sqlx::query_as::<_, T>(sql), args)
            .fetch_one(&self.pool)
            .await;

        let rows = i64::from(result.is_ok());
        self.trace(ctx, begin, sql, args, rows, result.as_ref().err());
        result
    }

    pub async fn fetch_scalar<T>(
        &self,
        ctx: &TraceContext,
        sql: &str,
        args: &[SqlArg],
    ) -> Result<T, sqlx::Error>
    where
        T: Send + Unpin,
        (T,): for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let begin = Instant::now();
        let result = bind_args!(sqlx::query_scalar::<_, T>(sql), args)
            .fetch_one(&self.pool)
            .await;

        let rows = i64::from(result.is_ok());
        self.trace(ctx, begin, sql, args, rows, result.as_ref().err());
        result
    }

    pub async fn execute(
        &self,
        ctx: &TraceContext,
        sql: &str,
        args: &[SqlArg],
    ) -> Result<SqliteQueryResult, sqlx::Error> {
        let begin = Instant::now();
        let result = bind_args!(sqlx::query(sql), args)
            .execute(&self.pool)
            .await;

        let rows = result
            .as_ref()
            .map_or(0, |done| i64::try_from(done.rows_affected()).unwrap_or(i64::MAX));
        self.trace(ctx, begin, sql, args, rows, result.as_ref().err());
        result
    }

    fn trace(
        &self,
        ctx: &TraceContext,
        begin: Instant,
        sql: &str,
        args: &[SqlArg],
        rows: i64,
        err: Option<&sqlx::Error>,
    ) {
        crate::metrics::record_query(match err {
            None => "ok",
            Some(sqlx::Error::RowNotFound) => "not_found",
            Some(_) => "error",
        });

        if let Some(query_logger) = &self.query_logger {
            query_logger.trace(ctx, begin, &|| (explain_sql(sql, args), rows), err);
        }
    }
}

impl fmt::Debug for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datastore")
            .field("pool", &self.pool)
            .field("query_logger", &self.query_logger.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::logger::testing::memory_logger;
    use crate::observability::Level;
    use std::time::Duration;

    #[test]
    fn test_explain_sql_substitutes_arguments() {
        let sql = "SELECT * FROM users WHERE name LIKE ? AND id > ? LIMIT ?";
        let args = [SqlArg::from("%o'neil%"), SqlArg::from(3), SqlArg::from(10)];
        assert_eq!(
            explain_sql(sql, &args),
            "SELECT * FROM users WHERE name LIKE '%o''neil%' AND id > 3 LIMIT 10"
        );
    }

    #[test]
    fn test_explain_sql_skips_quoted_placeholders() {
        let sql = "SELECT '?' AS q, name FROM users WHERE id = ?";
        assert_eq!(
            explain_sql(sql, &[SqlArg::Int(7)]),
            "SELECT '?' AS q, name FROM users WHERE id = 7"
        );
    }

    #[test]
    fn test_explain_sql_leaves_unbound_placeholders() {
        assert_eq!(explain_sql("SELECT ?, ?", &[SqlArg::Int(1)]), "SELECT 1, ?");
    }

    async fn file_datastore(
        dir: &tempfile::TempDir,
        query_logger: Option<Arc<dyn QueryLogger>>,
    ) -> Datastore {
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("nested/test.db").display()),
            ..DatabaseConfig::default()
        };
        let datastore = Datastore::connect(&config, query_logger).await.unwrap();
        datastore.migrate().await.unwrap();
        datastore
    }

    #[tokio::test]
    async fn test_connect_creates_database_directory() {
        let dir = tempfile::tempdir().unwrap();
        let datastore = file_datastore(&dir, None).await;

        assert!(dir.path().join("nested/test.db").exists());
        let count: i64 = datastore
            .fetch_scalar(&TraceContext::background(), "SELECT COUNT(*) FROM users", &[])
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_queries_are_traced_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let (logger, sink) = memory_logger(Level::Debug);
        let adapter: Arc<dyn QueryLogger> = Arc::new(SqlTraceLogger::new(
            logger.clone(),
            QueryLogLevel::Info,
            Duration::from_secs(10),
            true,
        ));
        let datastore = file_datastore(&dir, Some(adapter)).await;
        let ctx = TraceContext::background().new_trace();

        let result = datastore
            .execute(
                &ctx,
                "INSERT INTO users (name, email, created_at, updated_at) VALUES (?, ?, ?, ?)",
                &[
                    SqlArg::from("alice"),
                    SqlArg::from("alice@example.com"),
                    SqlArg::from("2024-01-01T00:00:00Z"),
                    SqlArg::from("2024-01-01T00:00:00Z"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(result.rows_affected(), 1);

        let missing = datastore
            .fetch_scalar::<i64>(&ctx, "SELECT id FROM users WHERE id = ?", &[SqlArg::Int(999)])
            .await;
        assert!(matches!(missing, Err(sqlx::Error::RowNotFound)));
        logger.shutdown();

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r["trace_id"] == ctx.trace_id()));
        assert!(records.iter().all(|r| r["level"] == "info"));
        assert_eq!(
            records[0]["sql"],
            "INSERT INTO users (name, email, created_at, updated_at) VALUES ('alice', 'alice@example.com', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')"
        );
        assert_eq!(records[0]["rows"], 1);
        assert_eq!(records[1]["sql"], "SELECT id FROM users WHERE id = 999");
        assert_eq!(records[1]["rows"], 0);
    }

    #[tokio::test]
    async fn test_query_errors_are_returned_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let (logger, sink) = memory_logger(Level::Debug);
        let adapter: Arc<dyn QueryLogger> = Arc::new(SqlTraceLogger::new(
            logger.clone(),
            QueryLogLevel::Error,
            Duration::ZERO,
            true,
        ));
        let datastore = file_datastore(&dir, Some(adapter)).await;

        let result = datastore
            .execute(&TraceContext::background(), "SELECT * FROM no_such_table", &[])
            .await;
        assert!(matches!(result, Err(sqlx::Error::Database(_))));
        logger.shutdown();

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["msg"], "SQL execution failed");
        assert!(records[0]["err"].as_str().unwrap().contains("no_such_table"));
    }
}
