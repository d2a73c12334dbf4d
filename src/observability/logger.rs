//! Structured JSON logger and its request-scoped children
//!
//! Records are encoded in the calling task and handed whole to a single
//! background writer thread (`tracing_appender::non_blocking`), which owns the
//! rotating file. Lines therefore never interleave and rotation never races a
//! concurrent write.

use super::record::{Fields, Level, LogRecord};
use super::rotation::{RotatingFileWriter, RotationPolicy};
use super::trace::TraceContext;
use super::InitError;
use crate::config::LogConfig;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing_appender::non_blocking::{NonBlocking, NonBlockingBuilder, WorkerGuard};

const WRITER_THREAD_NAME: &str = "user-api-log-writer";

/// Process-wide structured logger
///
/// Constructed once at bootstrap and shared as `Arc<StructuredLogger>`.
pub struct StructuredLogger {
    level: Level,
    utc_offset: FixedOffset,
    writer: NonBlocking,
    guard: Mutex<Option<WorkerGuard>>,
    closed: AtomicBool,
}

impl StructuredLogger {
    /// Open the rotating sink described by `config`
    pub fn init(config: &LogConfig) -> Result<Self, InitError> {
        let policy = RotationPolicy::from_config(config)?;
        let utc_offset = policy.utc_offset;
        let writer = RotatingFileWriter::open(policy)?;
        Ok(Self::with_writer(
            Level::parse_or_default(&config.level),
            utc_offset,
            writer,
        ))
    }

    /// Build a logger on top of an arbitrary writer
    pub fn with_writer<W>(level: Level, utc_offset: FixedOffset, writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        let (writer, guard) = NonBlockingBuilder::default()
            .lossy(true)
            .thread_name(WRITER_THREAD_NAME)
            .finish(writer);

        Self {
            level,
            utc_offset,
            writer,
            guard: Mutex::new(Some(guard)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    /// `fatal` is never filtered
    pub fn enabled(&self, level: Level) -> bool {
        level == Level::Fatal || level >= self.level
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.utc_offset)
    }

    /// Child logger bound to the context's trace id (`"unknown"` when untraced)
    pub fn logger_for(self: &Arc<Self>, ctx: &TraceContext) -> ScopedLogger {
        ScopedLogger {
            logger: Arc::clone(self),
            trace_id: Some(Arc::from(ctx.trace_id())),
            bound: Fields::new(),
        }
    }

    /// Logger for process lifecycle records; they carry no `trace_id`
    pub fn root(self: &Arc<Self>) -> ScopedLogger {
        ScopedLogger {
            logger: Arc::clone(self),
            trace_id: None,
            bound: Fields::new(),
        }
    }

    /// Level-gated append of one record
    pub fn emit(&self, level: Level, message: &str, trace_id: Option<&str>, fields: Fields) {
        if !self.enabled(level) {
            return;
        }
        self.write_record(&LogRecord {
            timestamp: self.now(),
            level,
            message: message.to_string(),
            trace_id: trace_id.map(str::to_string),
            fields,
        });
    }

    /// Queue an already built record, bypassing the level gate
    pub fn write_record(&self, record: &LogRecord) {
        let line = record.to_json_line();
        if self.closed.load(Ordering::Acquire) {
            eprint!("{}", String::from_utf8_lossy(&line));
            return;
        }
        let mut writer = self.writer.clone();
        if let Err(err) = writer.write_all(&line) {
            eprintln!("log sink unavailable ({}): {}", err, String::from_utf8_lossy(&line).trim_end());
        }
    }

    /// Flush queued records and stop the writer thread
    ///
    /// Records emitted afterwards go to stderr. Records the lossy queue had to
    /// drop are counted by the writer, not retried.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let guard = match self.guard.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(guard);
    }
}

impl fmt::Debug for StructuredLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructuredLogger")
            .field("level", &self.level)
            .field("utc_offset", &self.utc_offset)
            .finish_non_exhaustive()
    }
}

/// Logger with a pre-bound trace id and optional extra fields
#[derive(Clone)]
pub struct ScopedLogger {
    logger: Arc<StructuredLogger>,
    trace_id: Option<Arc<str>>,
    bound: Fields,
}

impl ScopedLogger {
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    /// Derive a logger that adds `key` to every record
    pub fn with(&self, key: impl Into<String>, value: impl Serialize) -> Self {
        Self {
            logger: Arc::clone(&self.logger),
            trace_id: self.trace_id.clone(),
            bound: self.bound.clone().with(key, value),
        }
    }

    pub fn enabled(&self, level: Level) -> bool {
        self.logger.enabled(level)
    }

    pub fn log(&self, level: Level, message: &str, fields: impl Into<Fields>) {
        if !self.logger.enabled(level) {
            return;
        }
        let fields = fields.into();
        let fields = if self.bound.is_empty() {
            fields
        } else {
            self.bound.merged(fields)
        };
        self.logger.emit(level, message, self.trace_id.as_deref(), fields);
    }

    pub fn debug(&self, message: &str, fields: impl Into<Fields>) {
        self.log(Level::Debug, message, fields);
    }

    pub fn info(&self, message: &str, fields: impl Into<Fields>) {
        self.log(Level::Info, message, fields);
    }

    pub fn warn(&self, message: &str, fields: impl Into<Fields>) {
        self.log(Level::Warn, message, fields);
    }

    pub fn error(&self, message: &str, fields: impl Into<Fields>) {
        self.log(Level::Error, message, fields);
    }

    /// Emit, flush the sink and exit with status 1
    pub fn fatal(&self, message: &str, fields: impl Into<Fields>) -> ! {
        self.log(Level::Fatal, message, fields);
        self.logger.shutdown();
        std::process::exit(1);
    }
}

impl fmt::Debug for ScopedLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedLogger")
            .field("trace_id", &self.trace_id)
            .field("bound", &self.bound)
            .finish()
    }
}
