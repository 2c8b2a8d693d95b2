//! Diagnostic output for tree visitors.
//!
//! Visitors log through a [`DiagnosticSink`] they own instead of a global
//! logger, so a caller can capture exactly what one traversal reported.
//! [`TracingSink`] forwards to `tracing` and is what the pipeline uses;
//! [`MemorySink`] keeps records in memory.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Debug,
    Info,
    Warn,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
        };
        f.write_str(s)
    }
}

/// One recorded diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl Diagnostic {
    /// Value of a structured field, if present.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Destination for visitor diagnostics.
pub trait DiagnosticSink: Send {
    /// Record a message with structured key/value fields.
    fn log(&self, level: Level, message: &str, fields: &[(&str, &str)]);
}

/// Field keys recorded as individual `tracing` fields.
const TRACED_KEYS: [&str; 10] = [
    "node",
    "key",
    "repository",
    "arn",
    "role",
    "timing",
    "new",
    "pending",
    "suffix",
    "repositories",
];

/// Key/value view over one diagnostic's fields.
struct Fields<'a>(&'a [(&'a str, &'a str)]);

impl Fields<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    /// Fields outside [`TRACED_KEYS`], as `k=v` pairs.
    fn extra(&self) -> Option<String> {
        let extra: Vec<String> = self
            .0
            .iter()
            .filter(|(k, _)| !TRACED_KEYS.iter().any(|t| t == k))
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        (!extra.is_empty()).then(|| extra.join(" "))
    }
}

macro_rules! traced {
    ($level:ident, $message:expr, $fields:expr) => {{
        let fields = $fields;
        let extra = fields.extra();
        tracing::$level!(
            node = fields.get("node"),
            key = fields.get("key"),
            repository = fields.get("repository"),
            arn = fields.get("arn"),
            role = fields.get("role"),
            timing = fields.get("timing"),
            new = fields.get("new"),
            pending = fields.get("pending"),
            suffix = fields.get("suffix"),
            repositories = fields.get("repositories"),
            extra = extra.as_deref(),
            "{}",
            $message
        )
    }};
}

/// Forwards diagnostics to `tracing`, one event field per key.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn log(&self, level: Level, message: &str, fields: &[(&str, &str)]) {
        let fields = Fields(fields);
        match level {
            Level::Debug => traced!(debug, message, &fields),
            Level::Info => traced!(info, message, &fields),
            Level::Warn => traced!(warn, message, &fields),
        }
    }
}

/// Keeps diagnostics in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<Diagnostic>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn records(&self) -> Vec<Diagnostic> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records at exactly `level`.
    pub fn at(&self, level: Level) -> Vec<Diagnostic> {
        self.records()
            .into_iter()
            .filter(|d| d.level == level)
            .collect()
    }
}

impl DiagnosticSink for MemorySink {
    fn log(&self, level: Level, message: &str, fields: &[(&str, &str)]) {
        let record = Diagnostic {
            level,
            message: message.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        };
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}
