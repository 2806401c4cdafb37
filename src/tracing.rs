use std::convert::Infallible;
use std::fmt::{self};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use axum::response::sse::{Event, KeepAlive};
use axum::response::Sse;
use axum::Extension;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio_stream::{Stream, StreamExt};
use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt as subscriber_fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Targets that are too chatty for the public log stream
const MUTED_TARGETS: [&str; 4] = ["hyper", "mio", "h2", "symphonia"];

/// Log line as it is written to the log file and sent to the log stream
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct JsonTracingEvent {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    #[schema(value_type = Object)]
    pub fields: Map<String, Value>,
}

#[derive(Debug)]
struct PublicTracerLayer {
    channel: broadcast::Sender<String>,
}

#[derive(Debug, Clone)]
pub struct LogChannel(pub broadcast::Sender<String>);

impl LogChannel {
    pub async fn into_sse_stream(
        Extension(channel): Extension<LogChannel>,
    ) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        let receiver = channel.0.subscribe();
        let stream = tokio_stream::wrappers::BroadcastStream::new(receiver).map(|item| {
            if let Ok(item) = item {
                Ok(Event::default().data(item))
            } else {
                Ok(Event::default())
            }
        });

        Sse::new(stream).keep_alive(KeepAlive::default())
    }
}

impl PublicTracerLayer {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { channel: tx }
    }
}

struct JsonVisitor {
    value: Map<String, Value>,
}

impl JsonVisitor {
    fn new() -> Self {
        Self { value: Map::new() }
    }
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.value.insert(
            field.name().to_string(),
            Value::String(format!("{:?}", value)),
        );
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.value
            .insert(field.name().to_string(), Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.value.insert(field.name().to_string(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.value.insert(field.name().to_string(), value.into());
    }
}

impl<S: Subscriber> Layer<S> for PublicTracerLayer {
    fn enabled(
        &self,
        metadata: &tracing::Metadata<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) -> bool {
        let target = metadata.target();
        !MUTED_TARGETS.iter().any(|pattern| target.starts_with(pattern))
    }

    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // nobody is listening
        if self.channel.receiver_count() == 0 {
            return;
        }
        let metadata = event.metadata();
        let mut visitor = JsonVisitor::new();
        event.record(&mut visitor);
        let event = JsonTracingEvent {
            timestamp: time::OffsetDateTime::now_utc().to_string(),
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            fields: visitor.value,
        };
        if let Ok(json) = serde_json::to_string(&event) {
            let _ = self.channel.send(json);
        }
    }
}

/// Stdout, json log file and the public log stream.
pub fn init_tracer(max_level: Level, log_path: &Path) -> Result<LogChannel, anyhow::Error> {
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let level_filter = LevelFilter::from_level(max_level);

    let pub_tracer = PublicTracerLayer::new();
    let log_channel = LogChannel(pub_tracer.channel.clone());

    tracing_subscriber::registry()
        .with(
            subscriber_fmt::layer()
                .pretty()
                .with_filter(level_filter),
        )
        .with(
            subscriber_fmt::layer()
                .json()
                .with_writer(Mutex::new(log_file))
                .with_filter(level_filter),
        )
        .with(pub_tracer.with_filter(level_filter))
        .try_init()?;
    Ok(log_channel)
}
