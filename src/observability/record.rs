//! Log record model and JSON line encoding

use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Record severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    /// Parse a configured level; anything unrecognized falls back to `info`
    pub fn parse_or_default(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" => Level::Debug,
            "info" => Level::Info,
            "warn" | "warning" => Level::Warn,
            "error" => Level::Error,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }

    /// Equivalent filter for `tracing` events bridged into the sink
    pub fn as_tracing_filter(&self) -> tracing::level_filters::LevelFilter {
        use tracing::level_filters::LevelFilter;
        match self {
            Level::Debug => LevelFilter::DEBUG,
            Level::Info => LevelFilter::INFO,
            Level::Warn => LevelFilter::WARN,
            Level::Error | Level::Fatal => LevelFilter::ERROR,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&tracing::Level> for Level {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE | tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Structured key/value fields attached to a record
///
/// ```
/// use user_api::observability::Fields;
///
/// let fields = Fields::new().with("page", 2).with("size", 5);
/// assert_eq!(fields.get("page"), Some(&serde_json::json!(2)));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(Map<String, Value>);

impl Fields {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert; values that fail to serialize are recorded as null
    pub fn with(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Merge `other` on top of `self` (later keys win)
    pub fn merged(&self, other: Fields) -> Fields {
        let mut merged = self.0.clone();
        merged.extend(other.0);
        Fields(merged)
    }
}

impl From<Value> for Fields {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Fields(map),
            Value::Null => Fields::new(),
            other => Fields::new().with("data", other),
        }
    }
}

impl From<Map<String, Value>> for Fields {
    fn from(map: Map<String, Value>) -> Self {
        Fields(map)
    }
}

/// Keys owned by the encoder; user fields cannot overwrite them
const RESERVED_KEYS: [&str; 4] = ["ts", "level", "msg", "trace_id"];

/// One structured log line
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<FixedOffset>,
    pub level: Level,
    pub message: String,
    pub trace_id: Option<String>,
    pub fields: Fields,
}

impl LogRecord {
    /// Encode as a single JSON object terminated by a newline
    pub fn to_json_line(&self) -> Vec<u8> {
        let mut object = Map::with_capacity(self.fields.len() + RESERVED_KEYS.len());
        for (key, value) in self.fields.iter() {
            if RESERVED_KEYS.contains(&key.as_str()) {
                object.insert(format!("field.{}", key), value.clone());
            } else {
                object.insert(key.clone(), value.clone());
            }
        }
        object.insert(
            "ts".to_string(),
            Value::String(self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, false)),
        );
        object.insert("level".to_string(), Value::String(self.level.as_str().to_string()));
        object.insert("msg".to_string(), Value::String(self.message.clone()));
        if let Some(trace_id) = &self.trace_id {
            object.insert("trace_id".to_string(), Value::String(trace_id.clone()));
        }

        let mut line = serde_json::to_vec(&Value::Object(object)).unwrap_or_else(|_| b"{}".to_vec());
        line.push(b'\n');
        line
    }
}
