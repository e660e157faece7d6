//! Operator-facing error and notice history.
//!
//! [`DiagnosticsLayer`] plugs into the `tracing` subscriber and copies every
//! WARN/ERROR event into the errors ring and every INFO event into the notices
//! ring, so the diagnostics page sees exactly what the logs saw.

use std::fmt::{self, Write as _};
use std::num::NonZeroUsize;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::ring_log::{LogMessage, RingLog};

pub struct Diagnostics {
    errors: RingLog,
    notices: RingLog,
}

impl Diagnostics {
    pub fn new(errors_kept: NonZeroUsize, notices_kept: NonZeroUsize) -> Self {
        Self {
            errors: RingLog::new(errors_kept),
            notices: RingLog::new(notices_kept),
        }
    }

    pub fn error(&self, text: impl Into<String>) {
        self.errors.add(text);
    }

    pub fn notice(&self, text: impl Into<String>) {
        self.notices.add(text);
    }

    pub fn errors(&self) -> Vec<LogMessage> {
        self.errors.snapshot()
    }

    pub fn notices(&self) -> Vec<LogMessage> {
        self.notices.snapshot()
    }

    pub fn layer(self: &Arc<Self>) -> DiagnosticsLayer {
        DiagnosticsLayer {
            sink: Arc::clone(self),
        }
    }
}

pub struct DiagnosticsLayer {
    sink: Arc<Diagnostics>,
}

impl<S: Subscriber> Layer<S> for DiagnosticsLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::INFO {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let text = visitor.finish(event.metadata().target());
        if level == Level::INFO {
            self.sink.notice(text);
        } else {
            self.sink.error(text);
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self, target: &str) -> String {
        format!("{target}: {}{}", self.message, self.fields)
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}
