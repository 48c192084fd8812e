//! Utilities for testing tracing
use std::{collections::BTreeMap, fmt, sync::Arc};

use observability_deps::tracing::{
    self, Event, Level,
    field::Field,
    span::{Attributes, Id, Record},
    subscriber::{DefaultGuard, Subscriber},
};
use parking_lot::Mutex;

/// A log value.
#[derive(Debug, Clone, PartialEq)]
#[expect(missing_docs)]
pub enum LogValue {
    Bool(bool),
    Float(f64),
    SignedInt(i128),
    String(String),
    UnsignedInt(u128),
}

impl fmt::Display for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::SignedInt(i) => write!(f, "{i}"),
            Self::String(s) => write!(f, "{s}"),
            Self::UnsignedInt(u) => write!(f, "{u}"),
        }
    }
}

/// A single log line.
///
/// This is represented as a key-value pairing. The first pair is always the level.
pub type LogLine = Vec<(String, LogValue)>;

type SharedLogLines = Arc<Mutex<Vec<LogLine>>>;

/// This struct captures tracing `Event`s as strings, and can be used
/// to verify that messages are making it to logs correctly
///
/// Upon creation it registers itself as the default subscriber of the
/// current thread, and upon drop the previous subscriber is restored.
/// Tasks spawned on a current-thread runtime are captured as well.
#[derive(Debug)]
pub struct TracingCapture {
    /// The raw logs are captured.
    lines: SharedLogLines,

    /// Registered default handler.
    _guard: DefaultGuard,

    /// See <https://github.com/tokio-rs/tracing/issues/2874>.
    _dont_drop_me: tracing::Dispatch,
}

impl TracingCapture {
    /// Create a new TracingCapture object and register it as a subscriber
    #[expect(clippy::new_without_default)]
    #[must_use]
    pub fn new() -> Self {
        let _dont_drop_me = tracing::Dispatch::new(tracing::subscriber::NoSubscriber::new());

        let lines = SharedLogLines::default();
        let subscriber = TracingCaptureSubscriber {
            lines: Arc::clone(&lines),
        };

        // install the subscriber (is uninstalled when the guard is dropped)
        let _guard = tracing::subscriber::set_default(subscriber);

        Self {
            lines,
            _guard,
            _dont_drop_me,
        }
    }

    /// Logged lines.
    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().clone()
    }

    /// Logged lines as map for easier assertion.
    pub fn lines_as_maps(&self) -> Vec<BTreeMap<String, LogValue>> {
        self.lines()
            .into_iter()
            .map(|line| line.into_iter().collect())
            .collect()
    }

    /// Messages logged at `level`, in order.
    pub fn messages(&self, level: Level) -> Vec<String> {
        let level = LogValue::String(level.to_string());
        self.lines_as_maps()
            .into_iter()
            .filter(|line| line.get("level") == Some(&level))
            .filter_map(|line| line.get("message").map(ToString::to_string))
            .collect()
    }
}

impl fmt::Display for TracingCapture {
    /// Retrieves the contents of all captured traces as a string
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.lines().into_iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }

            for (k, v) in line {
                write!(f, "{k} = {v}; ")?;
            }
        }

        Ok(())
    }
}

/// Captures span events to verify
struct TracingCaptureSubscriber {
    lines: SharedLogLines,
}

impl Subscriber for TracingCaptureSubscriber {
    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn enabled(&self, _metadata: &tracing::Metadata<'_>) -> bool {
        true
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let mut v = LineVisitor::default();
        v.record_string("level", event.metadata().level().to_string());
        event.record(&mut v);

        self.lines.lock().push(v.line);
    }

    fn enter(&self, _span: &Id) {}
    fn exit(&self, _span: &Id) {}
}

#[derive(Debug, Default)]
struct LineVisitor {
    line: LogLine,
}

impl LineVisitor {
    fn record_string(&mut self, key: &str, value: String) {
        self.line.push((key.to_owned(), LogValue::String(value)));
    }
}

impl tracing::field::Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_string(field.name(), format!("{value:?}"))
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_string(field.name(), value.to_owned())
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.line
            .push((field.name().to_owned(), LogValue::Bool(value)));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.line
            .push((field.name().to_owned(), LogValue::Float(value)));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_i128(field, value as i128);
    }

    fn record_i128(&mut self, field: &Field, value: i128) {
        self.line
            .push((field.name().to_owned(), LogValue::SignedInt(value)));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_u128(field, value as u128);
    }

    fn record_u128(&mut self, field: &Field, value: u128) {
        self.line
            .push((field.name().to_owned(), LogValue::UnsignedInt(value)));
    }
}
