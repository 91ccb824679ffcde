use machine_monitor_types::{
    FetchError, SlashedRecord, UnregisterRecord, ValidationError, WireSlashedRecord,
    WireUnregisterRecord,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{IndexerClient, decode_data, decode_rows};

const SLASHED_OPERATION: &str = "machineSlashedRecords";
const UNREGISTER_OPERATION: &str = "machineUnregisterRecords";

// `rentStatTime` is the subgraph's spelling.
const SLASHED_QUERY: &str = "query GetMachineSlashedRecords($machineId: String!) {
  machineSlashedRecords(where: { machineId: $machineId }, orderBy: blockTimestamp, orderDirection: desc) {
    id machineId holder renter slashAmount slashType rentStatTime rentEndTime
    blockNumber blockTimestamp transactionHash
  }
}";

const UNREGISTER_QUERY: &str = "query GetMachineUnregisterRecords($machineId: String!) {
  machineUnregisterRecords(where: { machineId: $machineId }, orderBy: blockTimestamp, orderDirection: desc) {
    id machineId blockNumber blockTimestamp transactionHash
  }
}";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SlashedData {
    machine_slashed_records: Option<Vec<WireSlashedRecord>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnregisterData {
    #[serde(default)]
    machine_unregister_records: Option<Vec<WireUnregisterRecord>>,
}

pub fn decode_slashed_records(data: Value) -> Result<Vec<SlashedRecord>, FetchError> {
    let data: SlashedData = decode_data(SLASHED_OPERATION, data)?;
    let rows = data
        .machine_slashed_records
        .ok_or(ValidationError::MissingData {
            entity: SLASHED_OPERATION,
        })?;
    decode_rows(rows)
}

/// A machine that never unregistered may have no entity at all; that reads
/// as an empty history.
pub fn decode_unregister_records(data: Value) -> Result<Vec<UnregisterRecord>, FetchError> {
    let data: UnregisterData = decode_data(UNREGISTER_OPERATION, data)?;
    decode_rows(data.machine_unregister_records.unwrap_or_default())
}

impl IndexerClient {
    /// Slashing history of one machine, newest first.
    pub async fn fetch_slashed_records(
        &self,
        machine_id: &str,
    ) -> Result<Vec<SlashedRecord>, FetchError> {
        let machine_id = machine_id.trim();
        if machine_id.is_empty() {
            return Ok(Vec::new());
        }
        let data = self
            .query(
                SLASHED_OPERATION,
                SLASHED_QUERY,
                json!({ "machineId": machine_id }),
            )
            .await?;
        decode_slashed_records(data)
    }

    /// Unregister history of one machine, newest first.
    pub async fn fetch_unregister_records(
        &self,
        machine_id: &str,
    ) -> Result<Vec<UnregisterRecord>, FetchError> {
        let machine_id = machine_id.trim();
        if machine_id.is_empty() {
            return Ok(Vec::new());
        }
        let data = self
            .query(
                UNREGISTER_OPERATION,
                UNREGISTER_QUERY,
                json!({ "machineId": machine_id }),
            )
            .await?;
        decode_unregister_records(data)
    }
}

#[cfg(test)]
mod tests {
    use machine_monitor_types::{BASE_UNITS_PER_TOKEN, SlashType};

    use super::*;
    use crate::DEFAULT_REQUEST_TIMEOUT;

    #[test]
    fn decodes_slashed_rows() {
        let records = decode_slashed_records(json!({
            "machineSlashedRecords": [{
                "id": "s1",
                "machineId": "m-1",
                "holder": "0x00000000000000000000000000000000000000aa",
                "renter": "0x00000000000000000000000000000000000000bb",
                "slashAmount": "2500000000000000000000",
                "slashType": "2",
                "rentStatTime": "1700000000",
                "rentEndTime": "1700086400",
                "blockNumber": "77",
                "blockTimestamp": "1700050000",
                "transactionHash": "0xfeed"
            }]
        }))
        .expect("records");
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.slash_type, SlashType::Performance);
        assert_eq!(record.slash_amount, 2_500 * BASE_UNITS_PER_TOKEN);
        assert_eq!(record.rent_start, 1_700_000_000);
        assert_eq!(record.slashed_at, 1_700_050_000);
    }

    #[test]
    fn missing_slashed_entity_is_an_error() {
        let err = decode_slashed_records(json!({})).expect_err("missing");
        assert_eq!(
            err,
            FetchError::Validation(ValidationError::MissingData {
                entity: "machineSlashedRecords"
            })
        );
    }

    #[test]
    fn missing_unregister_entity_is_empty() {
        let records = decode_unregister_records(json!({})).expect("empty");
        assert!(records.is_empty());

        let records = decode_unregister_records(json!({
            "machineUnregisterRecords": [{
                "id": "u1",
                "machineId": "m-1",
                "blockNumber": "10",
                "blockTimestamp": "1700000000",
                "transactionHash": "0x0"
            }]
        }))
        .expect("records");
        assert_eq!(records[0].unregistered_at, 1_700_000_000);
        assert_eq!(records[0].block_number, 10);
    }

    #[tokio::test]
    async fn blank_machine_id_skips_the_request() {
        let client = IndexerClient::new("http://127.0.0.1:9/graphql", DEFAULT_REQUEST_TIMEOUT)
            .expect("client");
        assert!(client
            .fetch_slashed_records("  ")
            .await
            .expect("no request")
            .is_empty());
        assert!(client
            .fetch_unregister_records("")
            .await
            .expect("no request")
            .is_empty());
    }
}
