use std::future::IntoFuture;
use std::sync::Arc;

use machine_monitor::{Dashboard, MonitorConfig, redact_url, router};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), String> {
    let config = MonitorConfig::from_args(std::env::args().skip(1), |name| {
        std::env::var(name).ok()
    })?;
    init_tracing()?;

    let dashboard = Arc::new(Dashboard::from_config(&config).map_err(|error| error.to_string())?);

    // Prime both lists so the first page is ready before a client asks.
    let primer = Arc::clone(&dashboard);
    tokio::spawn(async move {
        let (staking, offline) = tokio::join!(primer.staking().fetch(), primer.offline().fetch());
        for (resource, result) in [("staking", staking), ("offline", offline)] {
            if let Err(error) = result {
                tracing::error!(resource, %error, "initial fetch failed");
            }
        }
    });

    let app = router(Arc::clone(&dashboard));
    let listener = TcpListener::bind(&config.bind)
        .await
        .map_err(|error| format!("failed to bind dashboard endpoint {}: {error}", config.bind))?;

    tracing::info!(
        bind = %config.bind,
        indexer_url = %redact_url(&config.indexer_url),
        node_api_url = %redact_url(&config.node_api_url),
        chain_rpc_url = %redact_url(&config.chain_rpc_url),
        machine_info = config.machine_info_contract.is_some(),
        report_source = %config.report_source_mode,
        timeout_secs = config.request_timeout.as_secs(),
        "monitor-dashboard starting"
    );

    let server = axum::serve(listener, app).into_future();
    tokio::select! {
        result = server => {
            result.map_err(|error| format!("dashboard server failed: {error}"))?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|error| format!("failed to listen for ctrl-c: {error}"))?;
            tracing::info!("shutdown signal received");
        }
    }

    if let Ok(metrics) = dashboard.metrics() {
        tracing::info!(
            fetch_failures = metrics.fetch_failures_total,
            orphan_events = metrics.orphan_events_total,
            stale_responses = metrics.stale_responses_total,
            "monitor-dashboard stopped"
        );
    }
    Ok(())
}

fn init_tracing() -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .map_err(|error| format!("failed to install tracing subscriber: {error}"))
}
