use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use machine_monitor_observe::MetricsSnapshot;
use machine_monitor_query::{CoordinatorError, FetchOutcome, QueryCoordinator};
use machine_monitor_types::{
    FetchError, Filters, OfflineMachineRecord, StakingMachine, ValidationError,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::view::{ListPayload, OfflineRow, StakingRow};
use crate::{Dashboard, MachineDetail};

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(error: CoordinatorError) -> Self {
        Self::internal(error.to_string())
    }
}

impl From<FetchError> for ApiError {
    fn from(error: FetchError) -> Self {
        // Only caller input is a client error; malformed upstream payloads
        // are the upstream's fault.
        let status = match error {
            FetchError::Validation(ValidationError::Blank { .. }) => StatusCode::BAD_REQUEST,
            FetchError::Validation(_) | FetchError::Transport(_) | FetchError::Protocol(_) => {
                StatusCode::BAD_GATEWAY
            }
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// A list screen served from one of the dashboard's coordinators.
trait ListResource: Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;
    type Row: Serialize + Send + 'static;

    fn coordinator(dashboard: &Dashboard) -> &QueryCoordinator<Self::Item>;
    fn row(item: &Self::Item) -> Self::Row;
}

struct StakingList;

impl ListResource for StakingList {
    type Item = StakingMachine;
    type Row = StakingRow;

    fn coordinator(dashboard: &Dashboard) -> &QueryCoordinator<StakingMachine> {
        dashboard.staking()
    }

    fn row(item: &StakingMachine) -> StakingRow {
        StakingRow::from(item)
    }
}

struct OfflineList;

impl ListResource for OfflineList {
    type Item = OfflineMachineRecord;
    type Row = OfflineRow;

    fn coordinator(dashboard: &Dashboard) -> &QueryCoordinator<OfflineMachineRecord> {
        dashboard.offline()
    }

    fn row(item: &OfflineMachineRecord) -> OfflineRow {
        OfflineRow::from(item)
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse<R> {
    pub outcome: Option<FetchOutcome>,
    #[serde(flatten)]
    pub list: ListPayload<R>,
}

#[derive(Debug, Deserialize)]
pub struct PageChange {
    pub page: u64,
    pub page_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct SortChange {
    pub field: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub report_source: String,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct LookupResponse {
    pub device_id: String,
    pub machine_id: String,
}

pub fn router(dashboard: Arc<Dashboard>) -> Router {
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/machines/{machine_id}", get(machine_detail))
        .route("/lookup/{device_id}", get(lookup));
    let router = with_list_routes::<StakingList>(router, "/staking");
    let router = with_list_routes::<OfflineList>(router, "/offline");
    router.with_state(dashboard)
}

fn with_list_routes<L: ListResource>(
    router: Router<Arc<Dashboard>>,
    prefix: &str,
) -> Router<Arc<Dashboard>> {
    router
        .route(prefix, get(list_state::<L>))
        .route(&format!("{prefix}/refresh"), post(list_refresh::<L>))
        .route(&format!("{prefix}/search"), post(list_search::<L>))
        .route(&format!("{prefix}/clear"), post(list_clear::<L>))
        .route(&format!("{prefix}/page"), post(list_page::<L>))
        .route(&format!("{prefix}/sort"), post(list_sort::<L>))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(dashboard): State<Arc<Dashboard>>) -> ApiResult<StatusResponse> {
    let metrics = dashboard.metrics().map_err(ApiError::internal)?;
    Ok(Json(StatusResponse {
        report_source: dashboard.report_source_mode().to_string(),
        metrics,
    }))
}

fn list_response<L: ListResource>(
    dashboard: &Dashboard,
    outcome: Option<FetchOutcome>,
) -> ApiResult<ListResponse<L::Row>> {
    let state = L::coordinator(dashboard).snapshot()?;
    Ok(Json(ListResponse {
        outcome,
        list: ListPayload::from_state(&state, L::row),
    }))
}

async fn list_state<L: ListResource>(
    State(dashboard): State<Arc<Dashboard>>,
) -> ApiResult<ListResponse<L::Row>> {
    list_response::<L>(&dashboard, None)
}

async fn list_refresh<L: ListResource>(
    State(dashboard): State<Arc<Dashboard>>,
) -> ApiResult<ListResponse<L::Row>> {
    let outcome = L::coordinator(&dashboard).fetch().await?;
    list_response::<L>(&dashboard, Some(outcome))
}

async fn list_search<L: ListResource>(
    State(dashboard): State<Arc<Dashboard>>,
    Json(filters): Json<Filters>,
) -> ApiResult<ListResponse<L::Row>> {
    let outcome = L::coordinator(&dashboard).submit_search(filters).await?;
    list_response::<L>(&dashboard, Some(outcome))
}

async fn list_clear<L: ListResource>(
    State(dashboard): State<Arc<Dashboard>>,
) -> ApiResult<ListResponse<L::Row>> {
    let outcome = L::coordinator(&dashboard).clear_search().await?;
    list_response::<L>(&dashboard, Some(outcome))
}

async fn list_page<L: ListResource>(
    State(dashboard): State<Arc<Dashboard>>,
    Json(change): Json<PageChange>,
) -> ApiResult<ListResponse<L::Row>> {
    let coordinator = L::coordinator(&dashboard);
    let page_size = match change.page_size {
        Some(page_size) => page_size,
        None => coordinator.snapshot()?.page_size,
    };
    let outcome = coordinator.change_page(change.page, page_size).await?;
    list_response::<L>(&dashboard, Some(outcome))
}

async fn list_sort<L: ListResource>(
    State(dashboard): State<Arc<Dashboard>>,
    Json(change): Json<SortChange>,
) -> ApiResult<ListResponse<L::Row>> {
    let outcome = L::coordinator(&dashboard).change_sort(&change.field).await?;
    list_response::<L>(&dashboard, Some(outcome))
}

async fn machine_detail(
    State(dashboard): State<Arc<Dashboard>>,
    Path(machine_id): Path<String>,
) -> Json<MachineDetail> {
    Json(dashboard.machine_detail(&machine_id).await)
}

async fn lookup(
    State(dashboard): State<Arc<Dashboard>>,
    Path(device_id): Path<String>,
) -> ApiResult<LookupResponse> {
    let machine_id = dashboard.lookup_machine_id(&device_id).await?;
    Ok(Json(LookupResponse {
        device_id: device_id.trim().to_string(),
        machine_id,
    }))
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use machine_monitor_types::SortDirection;
    use serde_json::Value;

    use super::*;
    use crate::test_support::dashboard;

    async fn serve_dashboard() -> (SocketAddr, Arc<Dashboard>) {
        let (dashboard, _) = dashboard();
        let dashboard = Arc::new(dashboard);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let app = router(Arc::clone(&dashboard));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (addr, dashboard)
    }

    #[tokio::test]
    async fn healthz_and_status() {
        let (addr, _) = serve_dashboard().await;
        let client = reqwest::Client::new();
        let body = client
            .get(format!("http://{addr}/healthz"))
            .send()
            .await
            .expect("healthz")
            .text()
            .await
            .expect("body");
        assert_eq!(body, "ok");

        let status: Value = client
            .get(format!("http://{addr}/status"))
            .send()
            .await
            .expect("status")
            .json()
            .await
            .expect("json");
        assert_eq!(status["report_source"], "streams");
        assert_eq!(status["metrics"]["fetch_failures_total"], 0);
    }

    #[tokio::test]
    async fn staking_list_pages_and_sorts() {
        let (addr, dashboard) = serve_dashboard().await;
        let client = reqwest::Client::new();

        let listing: Value = client
            .post(format!("http://{addr}/staking/page"))
            .json(&json!({"page": 3}))
            .send()
            .await
            .expect("page")
            .json()
            .await
            .expect("json");
        assert_eq!(listing["outcome"], "applied");
        assert_eq!(listing["page"], 3);
        assert_eq!(listing["page_size"], 10);
        assert_eq!(listing["total"], 42);
        assert_eq!(listing["rows"][0]["machine_id"], "m-page-3");

        let listing: Value = client
            .post(format!("http://{addr}/staking/sort"))
            .json(&json!({"field": "totalClaimedRewardAmount"}))
            .send()
            .await
            .expect("sort")
            .json()
            .await
            .expect("json");
        assert_eq!(listing["sort_direction"], "asc");
        assert_eq!(listing["page"], 3);

        client
            .post(format!("http://{addr}/staking/sort"))
            .json(&json!({"field": "totalReservedAmount"}))
            .send()
            .await
            .expect("sort");
        let state = dashboard.staking().snapshot().expect("state");
        assert_eq!(state.sort_field, "totalReservedAmount");
        assert_eq!(state.sort_direction, SortDirection::Desc);
        assert_eq!(state.page, 1);
    }

    #[tokio::test]
    async fn failed_refresh_reports_error_state() {
        let (addr, _) = serve_dashboard().await;
        let listing: Value = reqwest::Client::new()
            .post(format!("http://{addr}/offline/refresh"))
            .send()
            .await
            .expect("refresh")
            .json()
            .await
            .expect("json");
        assert_eq!(listing["outcome"], "failed");
        assert_eq!(listing["status"], "error");
        assert_eq!(listing["error"], "transport error: indexer unreachable");
        assert_eq!(listing["rows"], json!([]));
    }

    #[tokio::test]
    async fn machine_detail_route_returns_each_part() {
        let (addr, _) = serve_dashboard().await;
        let detail: Value = reqwest::Client::new()
            .get(format!("http://{addr}/machines/m-1"))
            .send()
            .await
            .expect("detail")
            .json()
            .await
            .expect("json");
        assert_eq!(detail["machine_id"], "m-1");
        assert_eq!(detail["reports"]["status"], "loaded");
        assert_eq!(detail["slashed"]["status"], "loaded");
        assert_eq!(detail["unregister"]["status"], "failed");
        assert_eq!(detail["rent"]["status"], "loaded");
        assert_eq!(detail["rent"]["data"]["can_rent"], false);
        assert_eq!(detail["machine_info"]["status"], "disabled");
    }

    #[tokio::test]
    async fn lookup_maps_errors_to_status_codes() {
        let (addr, _) = serve_dashboard().await;
        let client = reqwest::Client::new();

        let found: Value = client
            .get(format!("http://{addr}/lookup/dev-1"))
            .send()
            .await
            .expect("lookup")
            .json()
            .await
            .expect("json");
        assert_eq!(found["machine_id"], "machine-dev-1");

        let missing = client
            .get(format!("http://{addr}/lookup/unknown"))
            .send()
            .await
            .expect("lookup");
        assert_eq!(missing.status(), reqwest::StatusCode::BAD_GATEWAY);

        let blank = client
            .get(format!("http://{addr}/lookup/%20"))
            .send()
            .await
            .expect("lookup");
        assert_eq!(blank.status(), reqwest::StatusCode::BAD_REQUEST);

        let garbled = client
            .get(format!("http://{addr}/lookup/garbled"))
            .send()
            .await
            .expect("lookup");
        assert_eq!(garbled.status(), reqwest::StatusCode::BAD_GATEWAY);
    }
}
