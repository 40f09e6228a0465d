//! Per-method context shared by the pipeline stages.

use crate::{
    bytecode::ClassOracle,
    compiler::{DecompilerConfig, EventKind, EventLog},
};

/// Read-only inputs and the event log for decompiling one method.
///
/// Stages receive the context by shared reference. The oracle and configuration
/// are never mutated; events are appended through the log's shared-reference API.
pub struct MethodContext<'a> {
    /// Class hierarchy queries
    pub oracle: &'a dyn ClassOracle,
    /// Pipeline limits
    pub config: &'a DecompilerConfig,
    /// `Class.name(desc)` of the method, attached to every event
    pub method: String,
    /// Events recorded so far
    pub events: EventLog,
}

impl<'a> MethodContext<'a> {
    /// Creates a context with an empty event log.
    pub fn new(
        oracle: &'a dyn ClassOracle,
        config: &'a DecompilerConfig,
        method: impl Into<String>,
    ) -> Self {
        Self {
            oracle,
            config,
            method: method.into(),
            events: EventLog::new(),
        }
    }

    /// Records a transformation at `location`, attributed to this method and `stage`.
    pub fn record(&self, kind: EventKind, stage: &str, location: usize, message: impl Into<String>) {
        self.events
            .record(kind)
            .at(self.method.clone(), location)
            .stage(stage)
            .message(message);
    }

    /// Records a warning attributed to this method.
    pub fn warn(&self, stage: &str, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}: {}", self.method, message);
        self.events
            .record(EventKind::Warning)
            .method(self.method.clone())
            .stage(stage)
            .message(message);
    }
}
