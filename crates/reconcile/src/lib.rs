#![forbid(unsafe_code)]

pub mod adapters;
pub mod source;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use machine_monitor_types::{
    EventKind, Interval, IntervalStatus, Observation, ObservabilitySink, RawEvent, SubjectId,
    UnixSeconds,
};
use serde::Serialize;

pub use adapters::{events_from_joined_reports, events_from_report_streams};
pub use source::{EventSource, EventSourceFuture, ReportHistory, load_report_history};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanEvent {
    pub event: RawEvent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// Ordered by `start` descending.
    pub intervals: Vec<Interval>,
    pub anomalies: Vec<OrphanEvent>,
}

impl Reconciliation {
    pub fn is_currently_open(&self) -> bool {
        is_currently_open(&self.intervals)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingInterval {
    start: UnixSeconds,
    start_reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStep {
    Opened,
    DuplicateOpen { pending_start: UnixSeconds },
    Closed { duration_seconds: u64 },
    Orphan,
}

/// Pairs OPEN and CLOSE events for any number of subjects. Events must be
/// applied in [`event_order`]; [`reconcile`] takes care of that.
#[derive(Debug, Clone, Default)]
pub struct IntervalScanner {
    pending: BTreeMap<SubjectId, PendingInterval>,
    closed: Vec<Interval>,
    anomalies: Vec<OrphanEvent>,
}

impl IntervalScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &RawEvent) -> ScanStep {
        match event.kind {
            EventKind::Open => {
                if let Some(pending) = self.pending.get(&event.subject_id) {
                    return ScanStep::DuplicateOpen {
                        pending_start: pending.start,
                    };
                }
                self.pending.insert(
                    event.subject_id.clone(),
                    PendingInterval {
                        start: event.timestamp,
                        start_reference: event.reference.clone(),
                    },
                );
                ScanStep::Opened
            }
            EventKind::CloseByRecovery | EventKind::CloseByTermination => {
                let Some(pending) = self.pending.remove(&event.subject_id) else {
                    self.anomalies.push(OrphanEvent {
                        event: event.clone(),
                    });
                    return ScanStep::Orphan;
                };
                let duration_seconds = event.timestamp.saturating_sub(pending.start);
                self.closed.push(Interval {
                    subject_id: event.subject_id.clone(),
                    start: pending.start,
                    end: Some(event.timestamp),
                    duration_seconds: Some(duration_seconds),
                    status: close_status(event.kind),
                    start_reference: pending.start_reference,
                    end_reference: Some(event.reference.clone()),
                });
                ScanStep::Closed { duration_seconds }
            }
        }
    }

    pub fn has_pending(&self, subject_id: &str) -> bool {
        self.pending.contains_key(subject_id)
    }

    pub fn finish(self) -> Reconciliation {
        let mut intervals = self.closed;
        intervals.extend(
            self.pending
                .into_iter()
                .map(|(subject_id, pending)| Interval {
                    subject_id,
                    start: pending.start,
                    end: None,
                    duration_seconds: None,
                    status: IntervalStatus::Open,
                    start_reference: pending.start_reference,
                    end_reference: None,
                }),
        );
        intervals.sort_by(|a, b| {
            b.start
                .cmp(&a.start)
                .then_with(|| a.subject_id.cmp(&b.subject_id))
        });
        Reconciliation {
            intervals,
            anomalies: self.anomalies,
        }
    }
}

fn close_status(kind: EventKind) -> IntervalStatus {
    match kind {
        EventKind::CloseByTermination => IntervalStatus::ClosedByTermination,
        EventKind::CloseByRecovery | EventKind::Open => IntervalStatus::ClosedByRecovery,
    }
}

fn kind_rank(kind: EventKind) -> u8 {
    match kind {
        EventKind::Open => 0,
        EventKind::CloseByRecovery => 1,
        EventKind::CloseByTermination => 2,
    }
}

/// Total order used for scanning: time, then OPEN before CLOSE, then subject
/// and reference so equal timestamps never depend on input order.
pub fn event_order(a: &RawEvent, b: &RawEvent) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| kind_rank(a.kind).cmp(&kind_rank(b.kind)))
        .then_with(|| a.subject_id.cmp(&b.subject_id))
        .then_with(|| a.reference.cmp(&b.reference))
}

pub fn reconcile(events: &[RawEvent]) -> Reconciliation {
    scan(events, |_| {})
}

/// Same as [`reconcile`], reporting every orphan CLOSE to `sink`.
pub fn reconcile_observed(events: &[RawEvent], sink: &dyn ObservabilitySink) -> Reconciliation {
    scan(events, |event| {
        sink.observe(&Observation::OrphanEvent { event });
    })
}

fn scan(events: &[RawEvent], mut on_orphan: impl FnMut(&RawEvent)) -> Reconciliation {
    let mut sorted: Vec<&RawEvent> = events.iter().collect();
    sorted.sort_by(|a, b| event_order(a, b));

    let mut scanner = IntervalScanner::new();
    for event in sorted {
        if scanner.apply(event) == ScanStep::Orphan {
            on_orphan(event);
        }
    }
    scanner.finish()
}

/// True iff the most recently started interval is still open. When several
/// subjects share the latest start, any open one among them counts.
pub fn is_currently_open(intervals: &[Interval]) -> bool {
    let Some(latest_start) = intervals.iter().map(|interval| interval.start).max() else {
        return false;
    };
    intervals
        .iter()
        .filter(|interval| interval.start == latest_start)
        .any(Interval::is_open)
}
