use std::fs;
use std::path::PathBuf;

use machine_monitor_reconcile::{Reconciliation, reconcile};
use machine_monitor_types::{EventKind, Interval, RawEvent};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ReconcileFixture {
    events: Vec<RawEvent>,
    expected: ReconcileFixtureExpected,
}

#[derive(Debug, Deserialize)]
struct ReconcileFixtureExpected {
    intervals: Vec<Interval>,
    orphan_references: Vec<String>,
    currently_open: bool,
}

fn load_fixture(name: &str) -> ReconcileFixture {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("reconcile")
        .join(name);
    let raw = fs::read_to_string(&path).unwrap_or_else(|error| {
        panic!("failed to read reconcile fixture {}: {error}", path.display());
    });
    serde_json::from_str(&raw).unwrap_or_else(|error| {
        panic!(
            "failed to decode reconcile fixture {}: {error}",
            path.display()
        );
    })
}

fn assert_matches_expected(
    name: &str,
    label: &str,
    result: &Reconciliation,
    fixture: &ReconcileFixture,
) {
    assert_eq!(
        result.intervals, fixture.expected.intervals,
        "interval mismatch in fixture {name} ({label})"
    );
    let orphan_references: Vec<&str> = result
        .anomalies
        .iter()
        .map(|orphan| orphan.event.reference.as_str())
        .collect();
    assert_eq!(
        orphan_references, fixture.expected.orphan_references,
        "orphan mismatch in fixture {name} ({label})"
    );
    assert_eq!(
        result.is_currently_open(),
        fixture.expected.currently_open,
        "currently-open mismatch in fixture {name} ({label})"
    );
}

fn assert_fixture(name: &str) {
    let fixture = load_fixture(name);

    let result = reconcile(&fixture.events);
    assert_matches_expected(name, "as recorded", &result, &fixture);

    let mut reversed = fixture.events.clone();
    reversed.reverse();
    assert_matches_expected(name, "reversed", &reconcile(&reversed), &fixture);

    for shift in 1..fixture.events.len() {
        let mut rotated = fixture.events.clone();
        rotated.rotate_left(shift);
        assert_matches_expected(
            name,
            &format!("rotated by {shift}"),
            &reconcile(&rotated),
            &fixture,
        );
    }

    let opens = fixture
        .events
        .iter()
        .filter(|event| event.kind == EventKind::Open)
        .count();
    let closed = result
        .intervals
        .iter()
        .filter(|interval| !interval.is_open())
        .count();
    assert!(closed <= opens, "fixture {name} closed more intervals than it opened");
    for interval in &result.intervals {
        if let (Some(end), Some(duration)) = (interval.end, interval.duration_seconds) {
            assert!(end >= interval.start, "fixture {name} produced a negative interval");
            assert_eq!(duration, end - interval.start);
        }
    }
}

#[test]
fn reconcile_fixture_basic_recovery() {
    assert_fixture("basic_recovery.json");
}

#[test]
fn reconcile_fixture_duplicate_open() {
    assert_fixture("duplicate_open.json");
}

#[test]
fn reconcile_fixture_mixed_history() {
    assert_fixture("mixed_history.json");
}

#[test]
fn reconcile_fixture_orphans() {
    assert_fixture("orphans.json");
}
