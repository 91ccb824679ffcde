#![forbid(unsafe_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use machine_monitor_indexer::{
    ContractReader, IndexerClient, MachineIdLookup, OfflineMachineFetcher, ReportEventSource,
    ReportSourceMode, StakingMachineFetcher,
};
use machine_monitor_observe::{MetricsSink, MetricsSnapshot};
use machine_monitor_query::{Fetcher, QueryCoordinator, QueryDefaults};
use machine_monitor_reconcile::{EventSource, load_report_history};
use machine_monitor_types::{
    FetchError, MachineInfo, ObservabilitySink, Observation, OfflineMachineRecord, RentStatus,
    SlashedRecord, StakingMachine, UnregisterRecord,
};
use serde::Serialize;

pub mod config;
pub mod http;
pub mod view;

pub use config::{ConfigError, MonitorConfig, help_text, redact_url};
pub use http::router;

pub const STAKING_RESOURCE: &str = "staking";
pub const OFFLINE_RESOURCE: &str = "offline";
pub const STAKING_DEFAULT_SORT: &str = "totalClaimedRewardAmount";
pub const OFFLINE_DEFAULT_SORT: &str = "blockTimestamp";
pub const MACHINE_INFO_DISABLED: &str = "machine info contract is not configured";

pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, FetchError>> + Send + 'a>>;

/// Per-machine penalty and lifecycle history.
pub trait MachineHistorySource: Send + Sync {
    fn slashed_records<'a>(&'a self, machine_id: &'a str) -> SourceFuture<'a, Vec<SlashedRecord>>;

    fn unregister_records<'a>(
        &'a self,
        machine_id: &'a str,
    ) -> SourceFuture<'a, Vec<UnregisterRecord>>;
}

impl MachineHistorySource for IndexerClient {
    fn slashed_records<'a>(&'a self, machine_id: &'a str) -> SourceFuture<'a, Vec<SlashedRecord>> {
        Box::pin(self.fetch_slashed_records(machine_id))
    }

    fn unregister_records<'a>(
        &'a self,
        machine_id: &'a str,
    ) -> SourceFuture<'a, Vec<UnregisterRecord>> {
        Box::pin(self.fetch_unregister_records(machine_id))
    }
}

pub trait DeviceLookup: Send + Sync {
    fn machine_id_for<'a>(&'a self, device_id: &'a str) -> SourceFuture<'a, String>;
}

impl DeviceLookup for MachineIdLookup {
    fn machine_id_for<'a>(&'a self, device_id: &'a str) -> SourceFuture<'a, String> {
        Box::pin(self.lookup(device_id))
    }
}

/// Contract state of one machine.
pub trait ChainStateSource: Send + Sync {
    fn rent_status<'a>(&'a self, machine_id: &'a str) -> SourceFuture<'a, RentStatus>;

    /// `None` when this source has no machine-info contract to read.
    fn machine_info<'a>(&'a self, machine_id: &'a str) -> SourceFuture<'a, Option<MachineInfo>>;
}

impl ChainStateSource for ContractReader {
    fn rent_status<'a>(&'a self, machine_id: &'a str) -> SourceFuture<'a, RentStatus> {
        Box::pin(ContractReader::rent_status(self, machine_id))
    }

    fn machine_info<'a>(&'a self, machine_id: &'a str) -> SourceFuture<'a, Option<MachineInfo>> {
        Box::pin(ContractReader::machine_info(self, machine_id))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build upstream client: {0}")]
    Client(#[from] FetchError),
}

/// Upstream capabilities the dashboard reads from.
#[derive(Clone)]
pub struct DashboardSources {
    pub staking: Arc<dyn Fetcher<Item = StakingMachine>>,
    pub offline: Arc<dyn Fetcher<Item = OfflineMachineRecord>>,
    pub reports: Arc<dyn EventSource>,
    pub history: Arc<dyn MachineHistorySource>,
    pub lookup: Arc<dyn DeviceLookup>,
    pub chain: Arc<dyn ChainStateSource>,
}

impl DashboardSources {
    pub fn from_config(config: &MonitorConfig) -> Result<Self, MonitorError> {
        let client = IndexerClient::new(config.indexer_url.clone(), config.request_timeout)?;
        let lookup = MachineIdLookup::new(config.node_api_url.clone(), config.request_timeout)?;
        let (rent_contract, machine_info_contract) = config.contract_addresses()?;
        let chain = ContractReader::new(
            config.chain_rpc_url.clone(),
            config.request_timeout,
            rent_contract,
            machine_info_contract,
        )?;
        Ok(Self {
            staking: Arc::new(StakingMachineFetcher::new(client.clone())),
            offline: Arc::new(OfflineMachineFetcher::new(client.clone())),
            reports: Arc::new(ReportEventSource::new(
                client.clone(),
                config.report_source_mode,
            )),
            history: Arc::new(client),
            lookup: Arc::new(lookup),
            chain: Arc::new(chain),
        })
    }
}

/// One part of a machine detail view; a failing part never hides the others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DetailPart<T> {
    Loaded { data: T },
    Failed { error: String },
    Disabled { reason: &'static str },
}

impl<T> DetailPart<T> {
    pub fn loaded(&self) -> Option<&T> {
        match self {
            DetailPart::Loaded { data } => Some(data),
            DetailPart::Failed { .. } | DetailPart::Disabled { .. } => None,
        }
    }

    fn map<U>(self, f: impl FnOnce(T) -> U) -> DetailPart<U> {
        match self {
            DetailPart::Loaded { data } => DetailPart::Loaded { data: f(data) },
            DetailPart::Failed { error } => DetailPart::Failed { error },
            DetailPart::Disabled { reason } => DetailPart::Disabled { reason },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineDetail {
    pub machine_id: String,
    pub reports: DetailPart<view::ReportView>,
    pub slashed: DetailPart<Vec<view::SlashedRow>>,
    pub unregister: DetailPart<Vec<view::UnregisterRow>>,
    pub rent: DetailPart<view::RentStatusView>,
    pub machine_info: DetailPart<view::MachineInfoView>,
}

pub struct Dashboard {
    staking: QueryCoordinator<StakingMachine>,
    offline: QueryCoordinator<OfflineMachineRecord>,
    reports: Arc<dyn EventSource>,
    history: Arc<dyn MachineHistorySource>,
    lookup: Arc<dyn DeviceLookup>,
    chain: Arc<dyn ChainStateSource>,
    metrics: MetricsSink,
    report_source_mode: ReportSourceMode,
}

impl Dashboard {
    pub fn new(
        sources: DashboardSources,
        config: &MonitorConfig,
        metrics: MetricsSink,
    ) -> Self {
        let sink: Arc<dyn ObservabilitySink> = Arc::new(metrics.clone());
        let staking = QueryCoordinator::new(
            sources.staking,
            QueryDefaults::new(STAKING_DEFAULT_SORT, config.staking_page_size),
        )
        .with_resource(STAKING_RESOURCE)
        .with_sink(Arc::clone(&sink));
        let offline = QueryCoordinator::new(
            sources.offline,
            QueryDefaults::new(OFFLINE_DEFAULT_SORT, config.offline_page_size),
        )
        .with_resource(OFFLINE_RESOURCE)
        .with_sink(sink);
        Self {
            staking,
            offline,
            reports: sources.reports,
            history: sources.history,
            lookup: sources.lookup,
            chain: sources.chain,
            metrics,
            report_source_mode: config.report_source_mode,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Result<Self, MonitorError> {
        config.validate()?;
        let sources = DashboardSources::from_config(config)?;
        Ok(Self::new(sources, config, MetricsSink::new().with_tracing()))
    }

    pub fn staking(&self) -> &QueryCoordinator<StakingMachine> {
        &self.staking
    }

    pub fn offline(&self) -> &QueryCoordinator<OfflineMachineRecord> {
        &self.offline
    }

    pub fn report_source_mode(&self) -> ReportSourceMode {
        self.report_source_mode
    }

    pub fn metrics(&self) -> Result<MetricsSnapshot, String> {
        self.metrics.snapshot()
    }

    /// Loads report history, slashing and unregister records and the
    /// contract state concurrently.
    pub async fn machine_detail(&self, machine_id: &str) -> MachineDetail {
        let machine_id = machine_id.trim();
        let (reports, slashed, unregister, rent, machine_info) = tokio::join!(
            load_report_history(self.reports.as_ref(), machine_id, &self.metrics),
            self.history.slashed_records(machine_id),
            self.history.unregister_records(machine_id),
            self.chain.rent_status(machine_id),
            self.chain.machine_info(machine_id),
        );

        MachineDetail {
            machine_id: machine_id.to_string(),
            reports: self
                .detail_part("reports", reports)
                .map(|history| view::ReportView::from(&history)),
            slashed: self
                .detail_part("slashed", slashed)
                .map(|records| records.iter().map(view::SlashedRow::from).collect()),
            unregister: self
                .detail_part("unregister", unregister)
                .map(|records| records.iter().map(view::UnregisterRow::from).collect()),
            rent: self
                .detail_part("rent", rent)
                .map(|status| view::RentStatusView::from(&status)),
            machine_info: match machine_info {
                Ok(Some(info)) => DetailPart::Loaded {
                    data: view::MachineInfoView::from(&info),
                },
                Ok(None) => DetailPart::Disabled {
                    reason: MACHINE_INFO_DISABLED,
                },
                Err(error) => self.detail_part("machine_info", Err(error)),
            },
        }
    }

    pub async fn lookup_machine_id(&self, device_id: &str) -> Result<String, FetchError> {
        let result = self.lookup.machine_id_for(device_id).await;
        if let Err(error) = &result {
            let error = error.to_string();
            self.metrics.observe(&Observation::FetchFailed {
                resource: "lookup",
                token: 0,
                error: &error,
            });
        }
        result
    }

    fn detail_part<T>(&self, resource: &str, result: Result<T, FetchError>) -> DetailPart<T> {
        match result {
            Ok(data) => DetailPart::Loaded { data },
            Err(error) => {
                let error = error.to_string();
                self.metrics.observe(&Observation::FetchFailed {
                    resource,
                    token: 0,
                    error: &error,
                });
                DetailPart::Failed { error }
            }
        }
    }
}
