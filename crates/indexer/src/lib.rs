#![forbid(unsafe_code)]

//! GraphQL client for the machine subgraph, plus the Fetcher and Event Source
//! implementations the dashboard drives. The node API lookup and the contract
//! reads share its bounded body reader.

pub mod contract;
pub mod history;
pub mod lookup;
pub mod offline;
pub mod reports;
pub mod staking;

use std::time::Duration;

use machine_monitor_types::{FetchError, ValidationError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub use contract::{ContractReader, DEFAULT_CHAIN_RPC_URL, DEFAULT_RENT_CONTRACT};
pub use lookup::{DEFAULT_NODE_API_URL, MachineIdLookup};
pub use offline::OfflineMachineFetcher;
pub use reports::{ReportEventSource, ReportSourceMode};
pub use staking::StakingMachineFetcher;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_INDEXER_RESPONSE_BYTES: usize = 8 * 1024 * 1024;
/// The subgraph caps any single collection at this many rows, so totals
/// derived from the `totalCount` alias never exceed it.
pub const TOTAL_COUNT_CAP: u64 = 1000;

/// Row placeholder for the `totalCount` alias, which selects only `id`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CountedRow {
    #[serde(rename = "id")]
    _id: String,
}

#[derive(Clone)]
pub struct IndexerClient {
    http: reqwest::Client,
    endpoint: String,
}

impl IndexerClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| FetchError::Transport(format!("failed to build HTTP client: {error}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Runs one GraphQL operation and returns its `data` object.
    pub async fn query(
        &self,
        operation: &'static str,
        query: &str,
        variables: Value,
    ) -> Result<Value, FetchError> {
        tracing::debug!(operation, %variables, "indexer query");
        let request = json!({
            "query": query,
            "variables": variables,
        });

        let mut response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|error| {
                FetchError::Transport(format!("GraphQL {operation} request failed: {error}"))
            })?;
        let http_status = response.status();
        // Gateways often answer errors with HTML, so the body is only parsed
        // on success.
        if !http_status.is_success() {
            return Err(FetchError::Protocol(format!(
                "GraphQL {operation} returned HTTP {http_status}"
            )));
        }
        let content_length = response.content_length();
        let body = read_json_body_with_limit(
            &mut response,
            content_length,
            MAX_INDEXER_RESPONSE_BYTES,
            operation,
        )
        .await?;
        extract_data(operation, body)
    }

    pub async fn query_as<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        query: &str,
        variables: Value,
    ) -> Result<T, FetchError> {
        let data = self.query(operation, query, variables).await?;
        decode_data(operation, data)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphqlError {
    message: String,
}

/// Splits a GraphQL response into its `data` payload, turning an `errors`
/// array into a protocol error.
pub fn extract_data(operation: &'static str, mut body: Value) -> Result<Value, FetchError> {
    if let Some(errors) = body.get("errors")
        && !errors.is_null()
    {
        return Err(FetchError::Protocol(format!(
            "GraphQL {operation} errors: {}",
            graphql_error_messages(errors)
        )));
    }
    match body.get_mut("data").map(Value::take) {
        Some(Value::Null) | None => Err(ValidationError::MissingData { entity: operation }.into()),
        Some(data) => Ok(data),
    }
}

fn graphql_error_messages(errors: &Value) -> String {
    match serde_json::from_value::<Vec<GraphqlError>>(errors.clone()) {
        Ok(errors) if !errors.is_empty() => errors
            .into_iter()
            .map(|error| error.message)
            .collect::<Vec<_>>()
            .join(", "),
        _ => errors.to_string(),
    }
}

pub fn decode_data<T: DeserializeOwned>(
    operation: &'static str,
    data: Value,
) -> Result<T, FetchError> {
    serde_json::from_value(data).map_err(|error| {
        ValidationError::Shape {
            entity: operation,
            error: error.to_string(),
        }
        .into()
    })
}

pub(crate) fn decode_rows<W, T>(rows: Vec<W>) -> Result<Vec<T>, FetchError>
where
    T: TryFrom<W, Error = ValidationError>,
{
    rows.into_iter()
        .map(|row| T::try_from(row).map_err(FetchError::from))
        .collect()
}

pub(crate) fn count_total(rows: &[CountedRow]) -> u64 {
    (rows.len() as u64).min(TOTAL_COUNT_CAP)
}

pub(crate) async fn read_json_body_with_limit(
    response: &mut reqwest::Response,
    content_length: Option<u64>,
    max_bytes: usize,
    operation: &str,
) -> Result<Value, FetchError> {
    if let Some(length) = content_length
        && length > max_bytes as u64
    {
        return Err(FetchError::Protocol(format!(
            "{operation} response too large: content-length={length} exceeds {max_bytes} bytes"
        )));
    }
    let mut buffer = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|error| {
        FetchError::Transport(format!("{operation} failed reading response chunk: {error}"))
    })? {
        append_limited_chunk(&mut buffer, &chunk, max_bytes, operation)?;
    }
    serde_json::from_slice(&buffer).map_err(|error| {
        FetchError::Protocol(format!("{operation} invalid JSON response: {error}"))
    })
}

fn append_limited_chunk(
    buffer: &mut Vec<u8>,
    chunk: &[u8],
    max_bytes: usize,
    operation: &str,
) -> Result<(), FetchError> {
    let new_len = buffer
        .len()
        .checked_add(chunk.len())
        .ok_or_else(|| FetchError::Protocol(format!("{operation} response size overflow")))?;
    if new_len > max_bytes {
        return Err(FetchError::Protocol(format!(
            "{operation} response too large: {new_len} exceeds {max_bytes} bytes"
        )));
    }
    buffer.extend_from_slice(chunk);
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::net::SocketAddr;

    use axum::Router;
    use tokio::net::TcpListener;

    /// Serves `app` on an ephemeral local port for the duration of the test.
    pub(crate) async fn serve(app: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve test app");
        });
        addr
    }
}
