//! Event logging for the decompilation pipeline.
//!
//! Every stage records what it did to a method: constants folded, branches removed,
//! subroutines duplicated, handlers merged, and the warnings for constructs that
//! needed expensive normalization. Events can be inspected for debugging or
//! ignored.
//!
//! # Architecture
//!
//! - [`Event`] - A single recorded event
//! - [`EventLog`] - Append-only collection with query and summary helpers
//! - [`EventBuilder`] - Fluent API for creating events, recorded on drop
//!
//! # Example
//!
//! ```rust
//! use classflow::compiler::{EventKind, EventLog};
//!
//! let log = EventLog::new();
//! log.record(EventKind::ConstantFolded)
//!     .at("Demo.f()I", 3)
//!     .message("v7 = 5");
//! log.warn("loop at 12 has 2 entries");
//!
//! assert!(log.has(EventKind::ConstantFolded));
//! assert_eq!(log.warnings().count(), 1);
//! assert_eq!(log.summary(), "1 constant folded");
//! ```

use std::{collections::HashMap, fmt};

use strum::{EnumCount, EnumIter, IntoEnumIterator};

/// Categories of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount)]
pub enum EventKind {
    /// A subroutine was copied for one of its call sites.
    SubroutineDuplicated,
    /// A subroutine call was replaced by the subroutine body.
    SubroutineInlined,
    /// Nodes of a multi-entry loop were duplicated.
    LoopDuplicated,
    /// A variable was replaced by a literal.
    ConstantFolded,
    /// A conditional branch was simplified to unconditional.
    BranchSimplified,
    /// A basic block was removed.
    BlockRemoved,
    /// A phi was replaced by its single input.
    PhiSimplified,
    /// A handler edge was split by exception type.
    HandlerSplit,
    /// Two try constructs sharing a handler were merged.
    HandlerMerged,
    /// A handler was duplicated for a try construct that could not be merged.
    HandlerDuplicated,
    /// A jump target was routed through a forwarding block.
    Indirected,
    /// A pipeline stage started.
    StageStarted,
    /// A pipeline stage completed.
    StageCompleted,

    /// Informational message.
    Info,
    /// Warning (something expensive or unusual but handled).
    Warning,
    /// Error (something failed).
    Error,
}

impl EventKind {
    /// Returns a human-readable description of this event kind.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            // Transformations
            Self::SubroutineDuplicated => "subroutine duplicated",
            Self::SubroutineInlined => "subroutine inlined",
            Self::LoopDuplicated => "loop duplicated",
            Self::ConstantFolded => "constant folded",
            Self::BranchSimplified => "branch simplified",
            Self::BlockRemoved => "block removed",
            Self::PhiSimplified => "phi simplified",
            Self::HandlerSplit => "handler split",
            Self::HandlerMerged => "handler merged",
            Self::HandlerDuplicated => "handler duplicated",
            Self::Indirected => "indirected",
            // Pipeline
            Self::StageStarted => "stage started",
            Self::StageCompleted => "stage completed",
            // Diagnostic
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Returns true if this event represents a graph transformation.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        matches!(
            self,
            Self::SubroutineDuplicated
                | Self::SubroutineInlined
                | Self::LoopDuplicated
                | Self::ConstantFolded
                | Self::BranchSimplified
                | Self::BlockRemoved
                | Self::PhiSimplified
                | Self::HandlerSplit
                | Self::HandlerMerged
                | Self::HandlerDuplicated
                | Self::Indirected
        )
    }

    /// Returns true if this is a diagnostic event.
    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Self::Info | Self::Warning | Self::Error)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct Event {
    /// The type of event.
    pub kind: EventKind,
    /// The method where the event occurred (if applicable).
    pub method: Option<String>,
    /// Location within the method (bytecode address or block index).
    pub location: Option<usize>,
    /// Human-readable description.
    pub message: String,
    /// Pipeline stage that recorded the event.
    pub stage: Option<String>,
}

impl Event {
    fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            method: None,
            location: None,
            message: message.into(),
            stage: None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Builder for creating events with a fluent API.
///
/// Created by [`EventLog::record`]. The event is added to the log when the builder
/// is dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    method: Option<String>,
    location: Option<usize>,
    message: Option<String>,
    stage: Option<String>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            method: None,
            location: None,
            message: None,
            stage: None,
        }
    }

    /// Sets the method and location where the event occurred.
    pub fn at(mut self, method: impl Into<String>, location: usize) -> Self {
        self.method = Some(method.into());
        self.location = Some(location);
        self
    }

    /// Sets only the method.
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Sets the location.
    pub fn location(mut self, location: usize) -> Self {
        self.location = Some(location);
        self
    }

    /// Sets a custom message describing the event.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Associates this event with a pipeline stage.
    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        let event = Event {
            kind: self.kind,
            method: self.method.take(),
            location: self.location.take(),
            message,
            stage: self.stage.take(),
        };

        self.log.events.push(event);
    }
}

/// Collection of events from decompiling one method.
///
/// Appending only needs a shared reference, so stages can record events while
/// other parts of the context are borrowed.
#[derive(Debug)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        let new_log = Self::new();
        for (_, event) in &self.events {
            new_log.events.push(event.clone());
        }
        new_log
    }
}

impl EventLog {
    /// Creates an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no events have been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns the total number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts building a new event of the given kind.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Records an informational message.
    pub fn info(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Info, message));
    }

    /// Records a warning message. Warnings also go to the `log` facade.
    pub fn warn(&self, message: impl Into<String>) {
        let event = Event::new(EventKind::Warning, message);
        log::warn!("{}", event.message);
        self.events.push(event);
    }

    /// Records an error message.
    pub fn error(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Error, message));
    }

    /// Appends every event of `other`.
    pub fn merge(&self, other: &EventLog) {
        for (_, event) in &other.events {
            self.events.push(event.clone());
        }
    }

    /// Returns true if any event of the given kind exists.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.events.iter().any(|(_, e)| e.kind == kind)
    }

    /// Counts events of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|(_, e)| e.kind == kind).count()
    }

    /// Returns an iterator over all events.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Returns an iterator over events of a specific kind.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.events
            .iter()
            .filter_map(move |(_, e)| if e.kind == kind { Some(e) } else { None })
    }

    /// Returns an iterator over transformation events only.
    pub fn transformations(&self) -> impl Iterator<Item = &Event> + '_ {
        self.events
            .iter()
            .filter_map(|(_, e)| if e.kind.is_transformation() { Some(e) } else { None })
    }

    /// Returns an iterator over warning events.
    pub fn warnings(&self) -> impl Iterator<Item = &Event> + '_ {
        self.filter_kind(EventKind::Warning)
    }

    /// Counts events grouped by kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for (_, event) in &self.events {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Generates a human-readable summary of the transformations, in the order
    /// the kinds are declared.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let mut counts = vec![0usize; EventKind::COUNT];
        for (_, event) in &self.events {
            counts[event.kind as usize] += 1;
        }
        let parts: Vec<String> = EventKind::iter()
            .filter(|kind| kind.is_transformation() && counts[*kind as usize] > 0)
            .map(|kind| format!("{} {}", counts[kind as usize], kind.description()))
            .collect();

        if parts.is_empty() {
            return format!("{} events", self.len());
        }
        parts.join(", ")
    }
}

/// Iterator wrapper for EventLog that yields &Event
pub struct EventLogIter<'a> {
    inner: boxcar::Iter<'a, Event>,
}

impl<'a> Iterator for EventLogIter<'a> {
    type Item = &'a Event;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, e)| e)
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a Event;
    type IntoIter = EventLogIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        EventLogIter {
            inner: self.events.iter(),
        }
    }
}

impl FromIterator<Event> for EventLog {
    fn from_iter<T: IntoIterator<Item = Event>>(iter: T) -> Self {
        let log = Self::new();
        for event in iter {
            log.events.push(event);
        }
        log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_records_on_drop() {
        let log = EventLog::new();
        log.record(EventKind::HandlerMerged)
            .at("T.m()V", 4)
            .stage("structuring");
        let event = log.iter().next().unwrap();
        assert_eq!(event.message, "handler merged");
        assert_eq!(event.location, Some(4));
        assert_eq!(event.stage.as_deref(), Some("structuring"));
    }

    #[test]
    fn test_summary_counts_transformations_only() {
        let log = EventLog::new();
        log.info("starting");
        assert_eq!(log.summary(), "1 events");
        log.record(EventKind::BlockRemoved);
        log.record(EventKind::BlockRemoved);
        log.record(EventKind::ConstantFolded);
        assert_eq!(log.summary(), "1 constant folded, 2 block removed");
        assert_eq!(log.transformations().count(), 3);

        let copy: EventLog = log.iter().cloned().collect();
        assert_eq!(copy.len(), 4);
        assert_eq!(copy.count_by_kind()[&EventKind::BlockRemoved], 2);
    }

    #[test]
    fn test_summary_follows_pipeline_order() {
        let log = EventLog::new();
        log.record(EventKind::Indirected);
        log.record(EventKind::SubroutineInlined);
        log.warn("two entries");
        assert_eq!(log.summary(), "1 subroutine inlined, 1 indirected");
    }
}
