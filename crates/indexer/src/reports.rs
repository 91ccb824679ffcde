use std::fmt;
use std::str::FromStr;

use machine_monitor_reconcile::{
    EventSource, EventSourceFuture, events_from_joined_reports, events_from_report_streams,
};
use machine_monitor_types::{
    FetchError, RawEvent, ValidationError, WireJoinedReport, WireReportEvent,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{IndexerClient, decode_data};

const STREAMS_OPERATION: &str = "machineReports";
const JOINED_OPERATION: &str = "machineReportRecords";

const STREAMS_QUERY: &str = "query GetMachineReports($machineId: String!) {
  machineOfflineRecords(orderBy: blockTimestamp, orderDirection: desc, where: { machineId: $machineId }) {
    machineId blockTimestamp transactionHash
  }
  machineReOnlineRecords(orderBy: blockTimestamp, orderDirection: desc, where: { machineId: $machineId }) {
    machineId blockTimestamp transactionHash
  }
}";

const JOINED_QUERY: &str = "query GetMachineReportRecords($machineId: String!) {
  machineReportRecords(orderBy: offlineTime, orderDirection: desc, where: { machineId: $machineId }) {
    id machineId offlineTime reOnlineTime unStakeTime finishedByReOnline finishedByEndStake
    offlineTransactionHash reOnlineTransactionHash unStakeTransactionHash
  }
}";

/// Which upstream shape the report history is read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportSourceMode {
    /// Separate offline and re-online streams, paired locally.
    #[default]
    Streams,
    /// Reports already joined upstream with finish-reason flags.
    Joined,
}

impl FromStr for ReportSourceMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "streams" => Ok(Self::Streams),
            "joined" => Ok(Self::Joined),
            other => Err(format!(
                "unknown report source '{other}', expected 'streams' or 'joined'"
            )),
        }
    }
}

impl fmt::Display for ReportSourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Streams => f.write_str("streams"),
            Self::Joined => f.write_str("joined"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamsData {
    machine_offline_records: Option<Vec<WireReportEvent>>,
    machine_re_online_records: Option<Vec<WireReportEvent>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinedData {
    machine_report_records: Option<Vec<WireJoinedReport>>,
}

/// The streams query carries no unstake entity, so terminations only come
/// through the joined shape.
pub fn decode_stream_events(subject_id: &str, data: Value) -> Result<Vec<RawEvent>, FetchError> {
    let data: StreamsData = decode_data(STREAMS_OPERATION, data)?;
    let offline = data
        .machine_offline_records
        .ok_or(ValidationError::MissingData {
            entity: "machineOfflineRecords",
        })?;
    let reonline = data
        .machine_re_online_records
        .ok_or(ValidationError::MissingData {
            entity: "machineReOnlineRecords",
        })?;
    Ok(events_from_report_streams(
        subject_id, &offline, &reonline, &[],
    )?)
}

pub fn decode_joined_events(subject_id: &str, data: Value) -> Result<Vec<RawEvent>, FetchError> {
    let data: JoinedData = decode_data(JOINED_OPERATION, data)?;
    let records = data
        .machine_report_records
        .ok_or(ValidationError::MissingData {
            entity: JOINED_OPERATION,
        })?;
    Ok(events_from_joined_reports(subject_id, &records)?)
}

#[derive(Clone)]
pub struct ReportEventSource {
    client: IndexerClient,
    mode: ReportSourceMode,
}

impl ReportEventSource {
    pub fn new(client: IndexerClient, mode: ReportSourceMode) -> Self {
        Self { client, mode }
    }

    pub fn mode(&self) -> ReportSourceMode {
        self.mode
    }

    pub async fn fetch_report_events(&self, subject_id: &str) -> Result<Vec<RawEvent>, FetchError> {
        let variables = json!({ "machineId": subject_id });
        match self.mode {
            ReportSourceMode::Streams => {
                let data = self
                    .client
                    .query(STREAMS_OPERATION, STREAMS_QUERY, variables)
                    .await?;
                decode_stream_events(subject_id, data)
            }
            ReportSourceMode::Joined => {
                let data = self
                    .client
                    .query(JOINED_OPERATION, JOINED_QUERY, variables)
                    .await?;
                decode_joined_events(subject_id, data)
            }
        }
    }
}

impl EventSource for ReportEventSource {
    fn fetch_events<'a>(&'a self, subject_id: &'a str) -> EventSourceFuture<'a> {
        Box::pin(self.fetch_report_events(subject_id))
    }
}

#[cfg(test)]
mod tests {
    use axum::routing::post;
    use axum::{Json, Router};
    use machine_monitor_observe::NoopSink;
    use machine_monitor_reconcile::load_report_history;
    use machine_monitor_types::{EventKind, IntervalStatus};

    use super::*;
    use crate::DEFAULT_REQUEST_TIMEOUT;
    use crate::test_support::serve;

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!(" Joined ".parse::<ReportSourceMode>(), Ok(ReportSourceMode::Joined));
        assert_eq!("streams".parse::<ReportSourceMode>(), Ok(ReportSourceMode::Streams));
        assert!("both".parse::<ReportSourceMode>().is_err());
        assert_eq!(ReportSourceMode::Joined.to_string(), "joined");
    }

    #[test]
    fn stream_events_cover_both_streams() {
        let events = decode_stream_events(
            "m-1",
            json!({
                "machineOfflineRecords": [
                    {"machineId": "m-1", "blockTimestamp": "300", "transactionHash": "0xc"},
                    {"machineId": "m-1", "blockTimestamp": "100", "transactionHash": "0xa"}
                ],
                "machineReOnlineRecords": [
                    {"machineId": "m-1", "blockTimestamp": "200", "transactionHash": "0xb"}
                ]
            }),
        )
        .expect("events");
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], RawEvent::new("m-1", 200, EventKind::CloseByRecovery, "0xb"));
    }

    #[test]
    fn missing_stream_is_reported_by_name() {
        let err = decode_stream_events("m-1", json!({"machineOfflineRecords": []}))
            .expect_err("missing re-online stream");
        assert_eq!(
            err,
            FetchError::Validation(ValidationError::MissingData {
                entity: "machineReOnlineRecords"
            })
        );
    }

    #[test]
    fn joined_events_decode_finish_flags() {
        let events = decode_joined_events(
            "m-1",
            json!({
                "machineReportRecords": [{
                    "id": "r1",
                    "machineId": "m-1",
                    "offlineTime": "100",
                    "unStakeTime": "400",
                    "finishedByReOnline": false,
                    "finishedByEndStake": true,
                    "offlineTransactionHash": "0xa",
                    "unStakeTransactionHash": "0xd"
                }]
            }),
        )
        .expect("events");
        assert_eq!(
            events,
            vec![
                RawEvent::new("m-1", 100, EventKind::Open, "0xa"),
                RawEvent::new("m-1", 400, EventKind::CloseByTermination, "0xd"),
            ]
        );
    }

    #[test]
    fn joined_events_of_another_machine_are_rejected() {
        let err = decode_joined_events(
            "m-1",
            json!({
                "machineReportRecords": [{
                    "id": "r9",
                    "machineId": "m-9",
                    "offlineTime": "100"
                }]
            }),
        )
        .expect_err("foreign machine");
        assert!(matches!(
            err,
            FetchError::Validation(ValidationError::InconsistentRecord { record: "joined report", .. })
        ));
    }

    #[tokio::test]
    async fn streams_source_feeds_report_history() {
        let app = Router::new().route(
            "/graphql",
            post(|Json(body): Json<Value>| async move {
                let machine_id = body["variables"]["machineId"].clone();
                Json(json!({"data": {
                    "machineOfflineRecords": [
                        {"machineId": machine_id, "blockTimestamp": "1700000000", "transactionHash": "0x1"},
                        {"machineId": machine_id, "blockTimestamp": "1700007200", "transactionHash": "0x3"}
                    ],
                    "machineReOnlineRecords": [
                        {"machineId": machine_id, "blockTimestamp": "1700003661", "transactionHash": "0x2"}
                    ]
                }}))
            }),
        );
        let addr = serve(app).await;
        let client = IndexerClient::new(format!("http://{addr}/graphql"), DEFAULT_REQUEST_TIMEOUT)
            .expect("client");
        let source = ReportEventSource::new(client, ReportSourceMode::Streams);

        let history = load_report_history(&source, "m-7", &NoopSink)
            .await
            .expect("history");
        assert_eq!(history.intervals.len(), 2);
        assert!(history.currently_open);
        assert_eq!(history.intervals[1].status, IntervalStatus::ClosedByRecovery);
        assert_eq!(history.intervals[1].duration_seconds, Some(3661));
    }
}
