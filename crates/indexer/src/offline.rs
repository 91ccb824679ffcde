use machine_monitor_query::{FetchFuture, Fetcher};
use machine_monitor_types::{
    FetchError, OfflineMachineRecord, Page, QueryRequest, ValidationError, WireOfflineRecord,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::{CountedRow, IndexerClient, TOTAL_COUNT_CAP, count_total, decode_data, decode_rows};

const OPERATION: &str = "machineOfflineRecords";
const OFFLINE_FIELDS: &str = "id machineId holder blockNumber blockTimestamp transactionHash";

/// Active offline records, newest first. Sorting is fixed by the subgraph
/// view, so the request's sort field is not forwarded.
pub fn build_offline_query(request: &QueryRequest) -> (String, Value) {
    let mut declarations = vec!["$limit: Int!", "$offset: Int!"];
    let mut clauses = vec!["isActive: true"];
    let mut variables = Map::new();
    variables.insert("limit".to_string(), json!(request.page_size));
    variables.insert("offset".to_string(), json!(request.offset()));

    if let Some(machine_id) = request.text_filter("machineId") {
        declarations.push("$machineId: String!");
        clauses.push("machineId_contains: $machineId");
        variables.insert("machineId".to_string(), json!(machine_id));
    }
    if let Some(holder) = request.text_filter("holder") {
        declarations.push("$holder: String!");
        clauses.push("holder_contains: $holder");
        variables.insert("holder".to_string(), json!(holder));
    }

    let where_clause = clauses.join(", ");
    let query = format!(
        "query GetOfflineMachines({declarations}) {{\n  \
         machineOfflineRecords(first: $limit, skip: $offset, where: {{ {where_clause} }}, \
         orderBy: blockTimestamp, orderDirection: desc) {{ {OFFLINE_FIELDS} }}\n  \
         totalCount: machineOfflineRecords(first: {TOTAL_COUNT_CAP}, where: {{ {where_clause} }}) {{ id }}\n}}",
        declarations = declarations.join(", "),
    );
    (query, Value::Object(variables))
}

#[derive(Debug, Deserialize)]
struct OfflineData {
    #[serde(rename = "machineOfflineRecords")]
    records: Option<Vec<WireOfflineRecord>>,
    #[serde(rename = "totalCount", default)]
    total_count: Vec<CountedRow>,
}

pub fn decode_offline_page(data: Value) -> Result<Page<OfflineMachineRecord>, FetchError> {
    let data: OfflineData = decode_data(OPERATION, data)?;
    let rows = data
        .records
        .ok_or(ValidationError::MissingData { entity: OPERATION })?;
    Ok(Page {
        items: decode_rows(rows)?,
        total: count_total(&data.total_count),
    })
}

#[derive(Clone)]
pub struct OfflineMachineFetcher {
    client: IndexerClient,
}

impl OfflineMachineFetcher {
    pub fn new(client: IndexerClient) -> Self {
        Self { client }
    }

    pub async fn fetch_page(
        &self,
        request: &QueryRequest,
    ) -> Result<Page<OfflineMachineRecord>, FetchError> {
        let (query, variables) = build_offline_query(request);
        let data = self.client.query(OPERATION, &query, variables).await?;
        decode_offline_page(data)
    }
}

impl Fetcher for OfflineMachineFetcher {
    type Item = OfflineMachineRecord;

    fn fetch(&self, request: QueryRequest) -> FetchFuture<'_, Page<OfflineMachineRecord>> {
        Box::pin(async move { self.fetch_page(&request).await })
    }
}

#[cfg(test)]
mod tests {
    use machine_monitor_types::{FilterValue, Filters, SortDirection};

    use super::*;

    fn request(filters: Filters, page: u64) -> QueryRequest {
        QueryRequest {
            filters,
            page,
            page_size: 20,
            sort_field: "holder".to_string(),
            sort_direction: SortDirection::Asc,
        }
    }

    #[test]
    fn ordering_is_fixed_to_newest_first() {
        let (query, variables) = build_offline_query(&request(Filters::new(), 2));
        assert!(query.contains("orderBy: blockTimestamp, orderDirection: desc"));
        assert!(query.contains("where: { isActive: true }"));
        assert!(!query.contains("holder_contains"));
        assert_eq!(variables, json!({"limit": 20, "offset": 20}));
    }

    #[test]
    fn filters_are_trimmed_and_combined() {
        let mut filters = Filters::new();
        filters.insert("machineId".to_string(), FilterValue::from(" m-9 "));
        filters.insert("holder".to_string(), FilterValue::from(" 0xab "));
        let (query, variables) = build_offline_query(&request(filters, 1));
        assert!(query.contains(
            "where: { isActive: true, machineId_contains: $machineId, holder_contains: $holder }"
        ));
        assert_eq!(variables["machineId"], json!("m-9"));
        assert_eq!(variables["holder"], json!("0xab"));
        assert_eq!(variables["offset"], json!(0));
    }

    #[test]
    fn decodes_offline_rows() {
        let page = decode_offline_page(json!({
            "machineOfflineRecords": [{
                "id": "r1",
                "machineId": "m-1",
                "holder": "0x00000000000000000000000000000000000000AA",
                "blockNumber": "123",
                "blockTimestamp": "1700000000",
                "transactionHash": "0xabc"
            }],
            "totalCount": [{"id": "r1"}]
        }))
        .expect("page");
        assert_eq!(page.total, 1);
        let record = &page.items[0];
        assert_eq!(record.block_number, 123);
        assert_eq!(record.offline_at, 1_700_000_000);
        assert_eq!(
            record.holder.as_ref(),
            "0x00000000000000000000000000000000000000aa"
        );
    }

    #[test]
    fn bad_timestamp_is_a_validation_error() {
        let err = decode_offline_page(json!({
            "machineOfflineRecords": [{
                "id": "r1",
                "machineId": "m-1",
                "holder": "0x00000000000000000000000000000000000000aa",
                "blockNumber": "123",
                "blockTimestamp": "yesterday",
                "transactionHash": "0xabc"
            }]
        }))
        .expect_err("bad timestamp");
        assert!(matches!(
            err,
            FetchError::Validation(ValidationError::InvalidInteger {
                field: "blockTimestamp",
                ..
            })
        ));
    }
}
