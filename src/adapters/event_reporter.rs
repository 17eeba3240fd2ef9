//! Error Reporter Adapters
//!
//! Implements the `ErrorReporter` port with various backends.

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::events::{CacheEvent, CacheEventKind};
use crate::domain::ports::ErrorReporter;

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingReporter {
    /// Log at debug instead of warn
    quiet: bool,
}

impl TracingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reporter that logs at debug level.
    pub fn quiet() -> Self {
        Self { quiet: true }
    }
}

impl ErrorReporter for TracingReporter {
    fn report(&self, event: CacheEvent) {
        let key = event.key.as_deref().unwrap_or("-");
        if self.quiet {
            debug!(event_type = %event.kind, key = %key, error = %event.message, "Cache error");
        } else {
            warn!(event_type = %event.kind, key = %key, error = %event.message, "Cache error");
        }
    }
}

/// In-memory event collector for testing.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: RwLock<Vec<CacheEvent>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CacheEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    pub fn events_of_kind(&self, kind: CacheEventKind) -> Vec<CacheEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, event: CacheEvent) {
        self.events.write().push(event);
    }
}

/// Forwards events to an unbounded channel.
///
/// Events are dropped silently once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<CacheEvent>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CacheEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ErrorReporter for ChannelReporter {
    fn report(&self, event: CacheEvent) {
        let _ = self.tx.send(event);
    }
}

/// Fans each event out to several reporters.
#[derive(Default)]
pub struct CompositeReporter {
    reporters: Vec<Box<dyn ErrorReporter>>,
}

impl CompositeReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reporter<R: ErrorReporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

impl std::fmt::Debug for CompositeReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeReporter")
            .field("reporter_count", &self.reporters.len())
            .finish()
    }
}

impl ErrorReporter for CompositeReporter {
    fn report(&self, event: CacheEvent) {
        for reporter in &self.reporters {
            reporter.report(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Arc;

    fn store_event(key: &str) -> CacheEvent {
        CacheEvent::store_read(key, &Error::Store("connection refused".into()))
    }

    #[test]
    fn test_tracing_reporter() {
        // Should not panic
        TracingReporter::new().report(store_event("ns-a"));
        TracingReporter::quiet().report(store_event("ns-a"));
    }

    #[test]
    fn test_collecting_reporter() {
        let collector = CollectingReporter::new();
        assert!(collector.is_empty());

        collector.report(store_event("ns-a"));
        collector.report(CacheEvent::high_water_mark(
            "ns-b",
            &Error::HighWaterMark { pending: 0, limit: 0 },
        ));

        assert_eq!(collector.len(), 2);
        assert_eq!(collector.events_of_kind(CacheEventKind::StoreRead).len(), 1);
        assert_eq!(collector.events_of_kind(CacheEventKind::HighWaterMark).len(), 1);

        collector.clear();
        assert!(collector.is_empty());
    }

    #[tokio::test]
    async fn test_channel_reporter() {
        let (reporter, mut rx) = ChannelReporter::new();
        reporter.report(store_event("ns-a"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.key.as_deref(), Some("ns-a"));

        drop(rx);
        reporter.report(store_event("ns-b"));
    }

    #[test]
    fn test_composite_reporter() {
        let collector = Arc::new(CollectingReporter::new());
        let composite = CompositeReporter::new()
            .with_reporter(TracingReporter::quiet())
            .with_reporter(collector.clone());

        composite.report(store_event("ns-a"));
        assert_eq!(collector.len(), 1);
    }
}
