//! Forwarding of `tracing` events to a host-supplied log sink
//!
//! Embedders that own their own logging (a mobile shell, a daemon with
//! syslog) install a [`HostLogger`]; everyone else can use
//! `tracing_subscriber::fmt` directly.

use std::fmt::Write;
use std::sync::{Arc, OnceLock};

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

/// Receives one formatted line per event
pub trait HostLogger: Send + Sync {
    fn log(&self, level: String, message: String);
}

static LOGGER_INSTALLED: OnceLock<()> = OnceLock::new();

/// Layer that renders each event and hands it to a [`HostLogger`]
pub struct HostLogLayer {
    sink: Arc<dyn HostLogger>,
}

impl HostLogLayer {
    pub fn new(sink: Arc<dyn HostLogger>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for HostLogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let mut line = format!("{}: {}", metadata.target(), visitor.message);
        if !visitor.fields.is_empty() {
            let _ = write!(line, " {}", visitor.fields);
        }
        self.sink.log(metadata.level().to_string(), line);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            if !self.fields.is_empty() {
                self.fields.push(' ');
            }
            let _ = write!(self.fields, "{}={:?}", field.name(), value);
        }
    }
}

/// Install `callback` as the process-wide log sink
///
/// Only the first call takes effect. Returns whether this call installed it.
pub fn init_logger(callback: Box<dyn HostLogger>, level: LevelFilter) -> bool {
    if LOGGER_INSTALLED.set(()).is_err() {
        return false;
    }

    let subscriber = tracing_subscriber::registry()
        .with(HostLogLayer::new(Arc::from(callback)))
        .with(level);
    tracing::subscriber::set_global_default(subscriber).is_ok()
}
