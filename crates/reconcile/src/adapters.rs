//! Conversions from the indexer's report shapes into [`RawEvent`]s.

use machine_monitor_types::{
    EventKind, RawEvent, ValidationError, WireJoinedReport, WireReportEvent, parse_unix_seconds,
};

/// Flattens the offline, re-online and unstake streams of one subject. Entries
/// belonging to another machine are rejected rather than silently mixed in.
pub fn events_from_report_streams(
    subject_id: &str,
    offline: &[WireReportEvent],
    reonline: &[WireReportEvent],
    unstake: &[WireReportEvent],
) -> Result<Vec<RawEvent>, ValidationError> {
    let mut events = Vec::with_capacity(offline.len() + reonline.len() + unstake.len());
    for (stream, kind) in [
        (offline, EventKind::Open),
        (reonline, EventKind::CloseByRecovery),
        (unstake, EventKind::CloseByTermination),
    ] {
        for entry in stream {
            events.push(stream_event(subject_id, entry, kind)?);
        }
    }
    Ok(events)
}

fn stream_event(
    subject_id: &str,
    entry: &WireReportEvent,
    kind: EventKind,
) -> Result<RawEvent, ValidationError> {
    if entry.machine_id != subject_id {
        return Err(ValidationError::InconsistentRecord {
            record: "report event",
            id: entry.machine_id.clone(),
            reason: "machine id does not match the requested subject",
        });
    }
    let timestamp = parse_unix_seconds("blockTimestamp", &entry.block_timestamp)?;
    Ok(RawEvent::new(
        subject_id,
        timestamp,
        kind,
        entry.transaction_hash.clone().unwrap_or_default(),
    ))
}

/// Each joined report yields its OPEN plus at most one CLOSE. When both finish
/// flags are set the unstake wins, since the machine left the pool for good.
/// Reports of another machine are rejected, as in the stream shape.
pub fn events_from_joined_reports(
    subject_id: &str,
    records: &[WireJoinedReport],
) -> Result<Vec<RawEvent>, ValidationError> {
    let mut events = Vec::with_capacity(records.len() * 2);
    for record in records {
        if record.machine_id != subject_id {
            return Err(ValidationError::InconsistentRecord {
                record: "joined report",
                id: record.id.clone(),
                reason: "machine id does not match the requested subject",
            });
        }
        let offline_at = parse_unix_seconds("offlineTime", &record.offline_time)?;
        events.push(RawEvent::new(
            subject_id,
            offline_at,
            EventKind::Open,
            record.offline_transaction_hash.clone().unwrap_or_default(),
        ));

        let close = if record.finished_by_end_stake {
            Some((
                EventKind::CloseByTermination,
                "unStakeTime",
                record.un_stake_time.as_deref(),
                &record.un_stake_transaction_hash,
            ))
        } else if record.finished_by_re_online {
            Some((
                EventKind::CloseByRecovery,
                "reOnlineTime",
                record.re_online_time.as_deref(),
                &record.re_online_transaction_hash,
            ))
        } else {
            None
        };
        let Some((kind, field, raw_time, hash)) = close else {
            continue;
        };

        let Some(raw_time) = raw_time.filter(|raw| !raw.trim().is_empty()) else {
            return Err(ValidationError::InconsistentRecord {
                record: "joined report",
                id: record.id.clone(),
                reason: "finish flag set without a finish time",
            });
        };
        let closed_at = parse_unix_seconds(field, raw_time)?;
        if closed_at < offline_at {
            return Err(ValidationError::InconsistentRecord {
                record: "joined report",
                id: record.id.clone(),
                reason: "finish time precedes offline time",
            });
        }
        events.push(RawEvent::new(
            subject_id,
            closed_at,
            kind,
            hash.clone().unwrap_or_default(),
        ));
    }
    Ok(events)
}
