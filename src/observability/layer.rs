//! Tracing layer bridging ambient `tracing` events into the structured sink
//!
//! Startup, shutdown and third-party events use the `tracing` macros. This
//! layer turns each event into a [`LogRecord`](super::LogRecord) on the same
//! rotating file as the request-scoped loggers. An event inside a `request`
//! span inherits that span's `trace_id`.

use super::logger::StructuredLogger;
use super::record::{Fields, Level};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

const TRACE_ID_FIELD: &str = "trace_id";
const MESSAGE_FIELD: &str = "message";

/// Trace id stored in the extensions of spans that declare one
#[derive(Debug, Clone)]
struct SpanTraceId(String);

/// Custom tracing layer that writes events through a [`StructuredLogger`]
pub struct SinkLayer {
    logger: Arc<StructuredLogger>,
}

impl SinkLayer {
    pub fn new(logger: Arc<StructuredLogger>) -> Self {
        Self { logger }
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    trace_id: Option<String>,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn record_value(&mut self, field: &Field, value: Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            MESSAGE_FIELD => self.message = Some(value.to_string()),
            TRACE_ID_FIELD => self.trace_id = Some(value.to_string()),
            _ => self.record_value(field, Value::String(value.to_string())),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let value_str = format!("{:?}", value);
        match field.name() {
            MESSAGE_FIELD => self.message = Some(value_str),
            TRACE_ID_FIELD => self.trace_id = Some(value_str.trim_matches('"').to_string()),
            _ => self.record_value(field, Value::String(value_str)),
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_value(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_value(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.record_value(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_value(field, Value::Bool(value));
    }
}

impl<S> Layer<S> for SinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        if let (Some(trace_id), Some(span)) = (visitor.trace_id, ctx.span(id)) {
            span.extensions_mut().insert(SpanTraceId(trace_id));
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        values.record(&mut visitor);
        if let (Some(trace_id), Some(span)) = (visitor.trace_id, ctx.span(id)) {
            span.extensions_mut().replace(SpanTraceId(trace_id));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = Level::from(metadata.level());
        if !self.logger.enabled(level) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        // Innermost span carrying a trace id wins
        let trace_id = visitor.trace_id.or_else(|| {
            ctx.event_scope(event).and_then(|scope| {
                scope
                    .into_iter()
                    .find_map(|span| span.extensions().get::<SpanTraceId>().map(|id| id.0.clone()))
            })
        });

        let mut fields = visitor.fields;
        fields.insert("target".to_string(), Value::String(metadata.target().to_string()));

        self.logger.emit(
            level,
            visitor.message.as_deref().unwrap_or_default(),
            trace_id.as_deref(),
            Fields::from(fields),
        );
    }
}
