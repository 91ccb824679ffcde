use std::future::Future;
use std::pin::Pin;

use machine_monitor_types::{FetchError, Interval, ObservabilitySink, RawEvent, SubjectId};
use serde::Serialize;

use crate::{OrphanEvent, reconcile_observed};

pub type EventSourceFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<RawEvent>, FetchError>> + Send + 'a>>;

/// Supplies every recorded event for one subject, in any order.
pub trait EventSource: Send + Sync {
    fn fetch_events<'a>(&'a self, subject_id: &'a str) -> EventSourceFuture<'a>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportHistory {
    pub subject_id: SubjectId,
    pub intervals: Vec<Interval>,
    pub currently_open: bool,
    pub orphan_events: Vec<OrphanEvent>,
}

impl ReportHistory {
    fn empty(subject_id: &str) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            intervals: Vec::new(),
            currently_open: false,
            orphan_events: Vec::new(),
        }
    }
}

/// Fetches and reconciles one subject's history. A blank subject yields an
/// empty history without touching the source.
pub async fn load_report_history(
    source: &dyn EventSource,
    subject_id: &str,
    sink: &dyn ObservabilitySink,
) -> Result<ReportHistory, FetchError> {
    let subject_id = subject_id.trim();
    if subject_id.is_empty() {
        return Ok(ReportHistory::empty(subject_id));
    }

    let events = source.fetch_events(subject_id).await?;
    let reconciliation = reconcile_observed(&events, sink);
    Ok(ReportHistory {
        subject_id: subject_id.to_string(),
        currently_open: reconciliation.is_currently_open(),
        intervals: reconciliation.intervals,
        orphan_events: reconciliation.anomalies,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use machine_monitor_observe::{MetricsSink, NoopSink};
    use machine_monitor_types::{EventKind, IntervalStatus};

    use super::*;

    struct StaticEventSource {
        events: Vec<RawEvent>,
        calls: AtomicUsize,
    }

    impl StaticEventSource {
        fn new(events: Vec<RawEvent>) -> Self {
            Self {
                events,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl EventSource for StaticEventSource {
        fn fetch_events<'a>(&'a self, subject_id: &'a str) -> EventSourceFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                Ok(self
                    .events
                    .iter()
                    .filter(|event| event.subject_id == subject_id)
                    .cloned()
                    .collect())
            })
        }
    }

    struct FailingEventSource;

    impl EventSource for FailingEventSource {
        fn fetch_events<'a>(&'a self, _subject_id: &'a str) -> EventSourceFuture<'a> {
            Box::pin(async { Err(FetchError::Transport("connection refused".to_string())) })
        }
    }

    #[tokio::test]
    async fn loads_and_reconciles_one_subject() {
        let source = StaticEventSource::new(vec![
            RawEvent::new("m-1", 300, EventKind::Open, "0xc"),
            RawEvent::new("m-1", 100, EventKind::Open, "0xa"),
            RawEvent::new("m-1", 200, EventKind::CloseByRecovery, "0xb"),
            RawEvent::new("m-2", 150, EventKind::Open, "0xz"),
        ]);
        let history = load_report_history(&source, " m-1 ", &NoopSink)
            .await
            .expect("history");
        assert_eq!(history.subject_id, "m-1");
        assert_eq!(history.intervals.len(), 2);
        assert_eq!(history.intervals[0].status, IntervalStatus::Open);
        assert_eq!(history.intervals[1].duration_seconds, Some(100));
        assert!(history.currently_open);
        assert!(history.orphan_events.is_empty());
    }

    #[tokio::test]
    async fn blank_subject_skips_the_source() {
        let source = StaticEventSource::new(Vec::new());
        let history = load_report_history(&source, "   ", &NoopSink)
            .await
            .expect("history");
        assert!(history.intervals.is_empty());
        assert!(!history.currently_open);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn orphans_reach_the_sink() {
        let source = StaticEventSource::new(vec![RawEvent::new(
            "m-1",
            10,
            EventKind::CloseByTermination,
            "0xa",
        )]);
        let sink = MetricsSink::new();
        let history = load_report_history(&source, "m-1", &sink)
            .await
            .expect("history");
        assert_eq!(history.orphan_events.len(), 1);
        assert_eq!(sink.snapshot().expect("snapshot").orphan_events_total, 1);
    }

    #[tokio::test]
    async fn source_failure_is_returned() {
        let err = load_report_history(&FailingEventSource, "m-1", &NoopSink)
            .await
            .expect_err("transport failure");
        assert_eq!(err.to_string(), "transport error: connection refused");
    }
}
