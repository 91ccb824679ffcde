use machine_monitor_query::{FetchFuture, Fetcher};
use machine_monitor_types::{
    FetchError, Page, QueryRequest, StakingMachine, ValidationError, WireStakingMachine,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::{CountedRow, IndexerClient, TOTAL_COUNT_CAP, count_total, decode_data, decode_rows};

const OPERATION: &str = "machineInfos";
const STAKING_FIELDS: &str = "machineId holder extraRentFee totalClaimedRewardAmount \
burnedRentFee totalReservedAmount isRented online registered";

enum FilterKind {
    Contains,
    Flag,
}

/// Filter key, GraphQL `where` clause and variable declaration.
const STAKING_FILTERS: [(&str, &str, &str, FilterKind); 5] = [
    (
        "machineId",
        "machineId_contains: $machineId",
        "$machineId: String!",
        FilterKind::Contains,
    ),
    (
        "holder",
        "holder_contains: $holder",
        "$holder: String!",
        FilterKind::Contains,
    ),
    (
        "isRented",
        "isRented: $isRented",
        "$isRented: Boolean!",
        FilterKind::Flag,
    ),
    ("online", "online: $online", "$online: Boolean!", FilterKind::Flag),
    (
        "registered",
        "registered: $registered",
        "$registered: Boolean!",
        FilterKind::Flag,
    ),
];

/// Builds the query text and variables for one page of staking machines. Only
/// filters present in the request appear in the `where` clause.
pub fn build_staking_query(request: &QueryRequest) -> (String, Value) {
    let mut declarations = vec![
        "$limit: Int!",
        "$offset: Int!",
        "$orderBy: String!",
        "$sort: String!",
    ];
    let mut clauses = vec!["isStaking: true"];
    let mut variables = Map::new();
    variables.insert("limit".to_string(), json!(request.page_size));
    variables.insert("offset".to_string(), json!(request.offset()));
    variables.insert("orderBy".to_string(), json!(request.sort_field));
    variables.insert("sort".to_string(), json!(request.sort_direction.as_str()));

    for (key, clause, declaration, kind) in &STAKING_FILTERS {
        let value = match kind {
            FilterKind::Contains => request.text_filter(key).map(|text| json!(text)),
            FilterKind::Flag => request.flag_filter(key).map(|flag| json!(flag)),
        };
        if let Some(value) = value {
            declarations.push(*declaration);
            clauses.push(*clause);
            variables.insert((*key).to_string(), value);
        }
    }

    let where_clause = clauses.join(", ");
    let query = format!(
        "query GetStakingMachines({declarations}) {{\n  \
         machineInfos(first: $limit, skip: $offset, where: {{ {where_clause} }}, \
         orderBy: $orderBy, orderDirection: $sort) {{ {STAKING_FIELDS} }}\n  \
         totalCount: machineInfos(first: {TOTAL_COUNT_CAP}, where: {{ {where_clause} }}) {{ id }}\n}}",
        declarations = declarations.join(", "),
    );
    (query, Value::Object(variables))
}

#[derive(Debug, Deserialize)]
struct StakingData {
    #[serde(rename = "machineInfos")]
    machine_infos: Option<Vec<WireStakingMachine>>,
    #[serde(rename = "totalCount", default)]
    total_count: Vec<CountedRow>,
}

pub fn decode_staking_page(data: Value) -> Result<Page<StakingMachine>, FetchError> {
    let data: StakingData = decode_data(OPERATION, data)?;
    let rows = data
        .machine_infos
        .ok_or(ValidationError::MissingData { entity: OPERATION })?;
    Ok(Page {
        items: decode_rows(rows)?,
        total: count_total(&data.total_count),
    })
}

#[derive(Clone)]
pub struct StakingMachineFetcher {
    client: IndexerClient,
}

impl StakingMachineFetcher {
    pub fn new(client: IndexerClient) -> Self {
        Self { client }
    }

    pub async fn fetch_page(
        &self,
        request: &QueryRequest,
    ) -> Result<Page<StakingMachine>, FetchError> {
        let (query, variables) = build_staking_query(request);
        let data = self.client.query(OPERATION, &query, variables).await?;
        decode_staking_page(data)
    }
}

impl Fetcher for StakingMachineFetcher {
    type Item = StakingMachine;

    fn fetch(&self, request: QueryRequest) -> FetchFuture<'_, Page<StakingMachine>> {
        Box::pin(async move { self.fetch_page(&request).await })
    }
}
