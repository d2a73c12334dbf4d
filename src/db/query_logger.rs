//! Query tracing hook consumed by [`Datastore`](super::Datastore)
//!
//! The datastore knows nothing about trace ids or log files; it hands every
//! executed statement to a [`QueryLogger`] together with the caller's
//! [`TraceContext`]. [`SqlTraceLogger`] turns those events into structured
//! records on the shared sink.

use crate::config::DatabaseConfig;
use crate::observability::{Fields, StructuredLogger, TraceContext};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Verbosity of query logging; `Silent` disables it entirely
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueryLogLevel {
    Silent = 1,
    Error,
    Warn,
    Info,
}

impl QueryLogLevel {
    /// Anything other than `silent`, `error` or `warn` means `Info`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "silent" => QueryLogLevel::Silent,
            "error" => QueryLogLevel::Error,
            "warn" | "warning" => QueryLogLevel::Warn,
            _ => QueryLogLevel::Info,
        }
    }
}

/// Logging capability set a datastore calls into
pub trait QueryLogger: Send + Sync {
    /// A logger identical to this one but at `level`; `self` is unchanged
    fn log_mode(&self, level: QueryLogLevel) -> Arc<dyn QueryLogger>;

    fn info(&self, ctx: &TraceContext, message: &str, args: &[&dyn fmt::Display]);

    fn warn(&self, ctx: &TraceContext, message: &str, args: &[&dyn fmt::Display]);

    fn error(&self, ctx: &TraceContext, message: &str, args: &[&dyn fmt::Display]);

    /// Called once per executed statement
    ///
    /// `result` yields the rendered SQL and affected/returned row count and is
    /// only evaluated when the record may be emitted.
    fn trace(
        &self,
        ctx: &TraceContext,
        begin: Instant,
        result: &dyn Fn() -> (String, i64),
        err: Option<&sqlx::Error>,
    );
}

/// [`QueryLogger`] writing through the structured logger
#[derive(Debug, Clone)]
pub struct SqlTraceLogger {
    logger: Arc<StructuredLogger>,
    level: QueryLogLevel,
    slow_threshold: Duration,
    ignore_record_not_found: bool,
}

impl SqlTraceLogger {
    pub fn new(
        logger: Arc<StructuredLogger>,
        level: QueryLogLevel,
        slow_threshold: Duration,
        ignore_record_not_found: bool,
    ) -> Self {
        Self {
            logger,
            level,
            slow_threshold,
            ignore_record_not_found,
        }
    }

    pub fn from_config(logger: Arc<StructuredLogger>, config: &DatabaseConfig) -> Self {
        Self::new(
            logger,
            QueryLogLevel::parse(&config.log_level),
            Duration::from_millis(config.slow_threshold_ms),
            config.ignore_record_not_found,
        )
    }

    pub fn level(&self) -> QueryLogLevel {
        self.level
    }

    fn message_fields(args: &[&dyn fmt::Display]) -> Fields {
        if args.is_empty() {
            return Fields::new();
        }
        let data: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        Fields::new().with("data", data)
    }
}

fn is_not_found(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::RowNotFound)
}

impl QueryLogger for SqlTraceLogger {
    fn log_mode(&self, level: QueryLogLevel) -> Arc<dyn QueryLogger> {
        Arc::new(Self {
            level,
            ..self.clone()
        })
    }

    fn info(&self, ctx: &TraceContext, message: &str, args: &[&dyn fmt::Display]) {
        if self.level >= QueryLogLevel::Info {
            self.logger
                .logger_for(ctx)
                .info(message, Self::message_fields(args));
        }
    }

    fn warn(&self, ctx: &TraceContext, message: &str, args: &[&dyn fmt::Display]) {
        if self.level >= QueryLogLevel::Warn {
            self.logger
                .logger_for(ctx)
                .warn(message, Self::message_fields(args));
        }
    }

    fn error(&self, ctx: &TraceContext, message: &str, args: &[&dyn fmt::Display]) {
        if self.level >= QueryLogLevel::Error {
            self.logger
                .logger_for(ctx)
                .error(message, Self::message_fields(args));
        }
    }

    fn trace(
        &self,
        ctx: &TraceContext,
        begin: Instant,
        result: &dyn Fn() -> (String, i64),
        err: Option<&sqlx::Error>,
    ) {
        if self.level <= QueryLogLevel::Silent {
            return;
        }

        let elapsed = begin.elapsed();
        let (sql, rows) = result();
        let fields = Fields::new()
            .with("sql", sql)
            .with("rows", rows)
            .with("elapsed", elapsed.as_secs_f64());
        let log = self.logger.logger_for(ctx);

        match err {
            Some(err)
                if self.level >= QueryLogLevel::Error
                    && !(is_not_found(err) && self.ignore_record_not_found) =>
            {
                log.error("SQL execution failed", fields.with("err", err.to_string()));
            }
            _ if !self.slow_threshold.is_zero()
                && elapsed > self.slow_threshold
                && self.level >= QueryLogLevel::Warn =>
            {
                log.warn(
                    "Slow SQL query",
                    fields.with("slow_threshold", self.slow_threshold.as_secs_f64()),
                );
            }
            _ if self.level == QueryLogLevel::Info => {
                log.info("SQL query executed", fields);
            }
            _ => {}
        }
    }
}
