use std::time::Duration;

use machine_monitor_types::{FetchError, ValidationError};
use serde::Deserialize;
use serde_json::Value;

use crate::read_json_body_with_limit;

pub const DEFAULT_NODE_API_URL: &str = "https://nodeapi.deeplink.cloud";
const LOOKUP_PATH: &str = "/api/cyc/getMachineID";
const MAX_LOOKUP_RESPONSE_BYTES: usize = 64 * 1024;
const LOOKUP_SUCCESS_CODE: i64 = 1;

#[derive(Debug, Clone, Default, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    content: Option<LookupContent>,
}

#[derive(Debug, Clone, Deserialize)]
struct LookupContent {
    machine_id: String,
}

/// Resolves device ids to machine ids through the node API.
#[derive(Clone)]
pub struct MachineIdLookup {
    http: reqwest::Client,
    base_url: String,
}

impl MachineIdLookup {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| FetchError::Transport(format!("failed to build HTTP client: {error}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn lookup_url(&self) -> String {
        format!("{}{LOOKUP_PATH}", self.base_url)
    }

    pub async fn lookup(&self, device_id: &str) -> Result<String, FetchError> {
        let device_id = device_id.trim();
        if device_id.is_empty() {
            return Err(ValidationError::Blank { field: "device_id" }.into());
        }

        let mut response = self
            .http
            .get(self.lookup_url())
            .query(&[("device_id", device_id)])
            .send()
            .await
            .map_err(|error| FetchError::Transport(format!("machine id lookup failed: {error}")))?;
        let content_length = response.content_length();
        let body = read_json_body_with_limit(
            &mut response,
            content_length,
            MAX_LOOKUP_RESPONSE_BYTES,
            "getMachineID",
        )
        .await?;
        interpret_lookup_response(body)
    }
}

/// Only `success && code == 1` with a non-empty id counts; anything else
/// surfaces the API's own message.
pub fn interpret_lookup_response(body: Value) -> Result<String, FetchError> {
    let response: LookupResponse = serde_json::from_value(body).map_err(|error| {
        FetchError::from(ValidationError::Shape {
            entity: "getMachineID",
            error: error.to_string(),
        })
    })?;
    if response.success
        && response.code == LOOKUP_SUCCESS_CODE
        && let Some(content) = response.content
        && !content.machine_id.trim().is_empty()
    {
        return Ok(content.machine_id);
    }
    let message = response
        .msg
        .filter(|msg| !msg.trim().is_empty())
        .unwrap_or_else(|| "machine id lookup failed".to_string());
    Err(FetchError::Protocol(format!(
        "{message} (code {})",
        response.code
    )))
}

#[cfg(test)]
mod tests {
    use axum::extract::Query;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    use super::*;
    use crate::DEFAULT_REQUEST_TIMEOUT;
    use crate::test_support::serve;

    #[test]
    fn success_requires_flag_and_code() {
        let id = interpret_lookup_response(json!({
            "success": true,
            "code": 1,
            "content": {"machine_id": "abc123"}
        }))
        .expect("machine id");
        assert_eq!(id, "abc123");

        let err = interpret_lookup_response(json!({
            "success": true,
            "code": 0,
            "msg": "device not found",
            "content": {"machine_id": "abc123"}
        }))
        .expect_err("wrong code");
        assert_eq!(
            err,
            FetchError::Protocol("device not found (code 0)".to_string())
        );
    }

    #[test]
    fn missing_message_gets_a_default() {
        let err = interpret_lookup_response(json!({"success": false, "code": -1}))
            .expect_err("failure");
        assert_eq!(
            err,
            FetchError::Protocol("machine id lookup failed (code -1)".to_string())
        );
    }

    #[tokio::test]
    async fn blank_device_id_is_rejected_without_a_request() {
        let lookup = MachineIdLookup::new("http://127.0.0.1:9/", DEFAULT_REQUEST_TIMEOUT)
            .expect("lookup");
        assert_eq!(lookup.lookup_url(), "http://127.0.0.1:9/api/cyc/getMachineID");
        let err = lookup.lookup("   ").await.expect_err("blank");
        assert_eq!(
            err,
            FetchError::Validation(ValidationError::Blank { field: "device_id" })
        );
    }

    #[tokio::test]
    async fn lookup_sends_trimmed_device_id() {
        let app = Router::new().route(
            "/api/cyc/getMachineID",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let device_id = params.get("device_id").cloned().unwrap_or_default();
                Json(json!({
                    "success": true,
                    "code": 1,
                    "content": {"machine_id": format!("machine-for-{device_id}")}
                }))
            }),
        );
        let addr = serve(app).await;
        let lookup = MachineIdLookup::new(format!("http://{addr}"), DEFAULT_REQUEST_TIMEOUT)
            .expect("lookup");
        let machine_id = lookup.lookup(" dev-1 ").await.expect("machine id");
        assert_eq!(machine_id, "machine-for-dev-1");
    }
}
