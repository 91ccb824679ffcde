use std::net::SocketAddr;
use std::time::Duration;

use machine_monitor_indexer::{
    DEFAULT_CHAIN_RPC_URL, DEFAULT_NODE_API_URL, DEFAULT_RENT_CONTRACT, ReportSourceMode,
};
use machine_monitor_types::{Address, ValidationError};

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_STAKING_PAGE_SIZE: u64 = 10;
pub const DEFAULT_OFFLINE_PAGE_SIZE: u64 = 20;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing indexer URL; pass --indexer-url or set MONITOR_INDEXER_URL")]
    MissingIndexerUrl,
    #[error("invalid {field} `{value}`: {reason}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid bind address `{value}`: {reason}")]
    InvalidBind { value: String, reason: String },
    #[error("{field} must be > 0")]
    Zero { field: &'static str },
    #[error("invalid {field} `{value}`: {reason}")]
    InvalidAddress {
        field: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub indexer_url: String,
    pub node_api_url: String,
    pub bind: String,
    pub request_timeout: Duration,
    pub report_source_mode: ReportSourceMode,
    pub staking_page_size: u64,
    pub offline_page_size: u64,
    pub chain_rpc_url: String,
    pub rent_contract: String,
    /// Unset disables the machine-info part of the detail view.
    pub machine_info_contract: Option<String>,
}

impl MonitorConfig {
    pub fn new(indexer_url: impl Into<String>) -> Self {
        Self {
            indexer_url: indexer_url.into(),
            node_api_url: DEFAULT_NODE_API_URL.to_string(),
            bind: DEFAULT_BIND.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            report_source_mode: ReportSourceMode::default(),
            staking_page_size: DEFAULT_STAKING_PAGE_SIZE,
            offline_page_size: DEFAULT_OFFLINE_PAGE_SIZE,
            chain_rpc_url: DEFAULT_CHAIN_RPC_URL.to_string(),
            rent_contract: DEFAULT_RENT_CONTRACT.to_string(),
            machine_info_contract: None,
        }
    }

    /// Rent contract plus the optional machine-info contract.
    pub fn contract_addresses(&self) -> Result<(Address, Option<Address>), ConfigError> {
        let rent = parse_contract("rent contract", &self.rent_contract)?;
        let machine_info = self
            .machine_info_contract
            .as_deref()
            .map(|raw| parse_contract("machine info contract", raw))
            .transpose()?;
        Ok((rent, machine_info))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.indexer_url.trim().is_empty() {
            return Err(ConfigError::MissingIndexerUrl);
        }
        validate_http_url("indexer URL", &self.indexer_url)?;
        validate_http_url("node API URL", &self.node_api_url)?;
        validate_http_url("chain RPC URL", &self.chain_rpc_url)?;
        self.contract_addresses()?;
        self.bind
            .parse::<SocketAddr>()
            .map_err(|error| ConfigError::InvalidBind {
                value: self.bind.clone(),
                reason: error.to_string(),
            })?;
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "request timeout",
            });
        }
        if self.staking_page_size == 0 {
            return Err(ConfigError::Zero {
                field: "staking page size",
            });
        }
        if self.offline_page_size == 0 {
            return Err(ConfigError::Zero {
                field: "offline page size",
            });
        }
        Ok(())
    }

    /// Reads flags first, then `MONITOR_*` variables through `env`, then
    /// defaults. `--help` comes back as an error carrying the usage text.
    pub fn from_args<I, E>(args: I, env: E) -> Result<Self, String>
    where
        I: IntoIterator<Item = String>,
        E: Fn(&str) -> Option<String>,
    {
        let mut cli_indexer_url: Option<String> = None;
        let mut cli_node_api_url: Option<String> = None;
        let mut cli_bind: Option<String> = None;
        let mut cli_timeout_secs: Option<u64> = None;
        let mut cli_report_source: Option<ReportSourceMode> = None;
        let mut cli_staking_page_size: Option<u64> = None;
        let mut cli_offline_page_size: Option<u64> = None;
        let mut cli_chain_rpc_url: Option<String> = None;
        let mut cli_rent_contract: Option<String> = None;
        let mut cli_machine_info_contract: Option<String> = None;

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--indexer-url" => {
                    cli_indexer_url = Some(
                        args.next()
                            .ok_or_else(|| "--indexer-url requires a value".to_string())?,
                    );
                }
                "--node-api-url" => {
                    cli_node_api_url = Some(
                        args.next()
                            .ok_or_else(|| "--node-api-url requires a value".to_string())?,
                    );
                }
                "--bind" => {
                    cli_bind = Some(
                        args.next()
                            .ok_or_else(|| "--bind requires a value".to_string())?,
                    );
                }
                "--timeout-secs" => {
                    let raw = args
                        .next()
                        .ok_or_else(|| "--timeout-secs requires a value".to_string())?;
                    cli_timeout_secs = Some(parse_positive_u64(&raw, "--timeout-secs")?);
                }
                "--report-source" => {
                    let raw = args
                        .next()
                        .ok_or_else(|| "--report-source requires a value".to_string())?;
                    cli_report_source = Some(
                        raw.parse()
                            .map_err(|error| format!("invalid --report-source value: {error}"))?,
                    );
                }
                "--staking-page-size" => {
                    let raw = args
                        .next()
                        .ok_or_else(|| "--staking-page-size requires a value".to_string())?;
                    cli_staking_page_size = Some(parse_positive_u64(&raw, "--staking-page-size")?);
                }
                "--offline-page-size" => {
                    let raw = args
                        .next()
                        .ok_or_else(|| "--offline-page-size requires a value".to_string())?;
                    cli_offline_page_size = Some(parse_positive_u64(&raw, "--offline-page-size")?);
                }
                "--chain-rpc-url" => {
                    cli_chain_rpc_url = Some(
                        args.next()
                            .ok_or_else(|| "--chain-rpc-url requires a value".to_string())?,
                    );
                }
                "--rent-contract" => {
                    cli_rent_contract = Some(
                        args.next()
                            .ok_or_else(|| "--rent-contract requires a value".to_string())?,
                    );
                }
                "--machine-info-contract" => {
                    cli_machine_info_contract = Some(args.next().ok_or_else(|| {
                        "--machine-info-contract requires a value".to_string()
                    })?);
                }
                "--help" | "-h" => {
                    return Err(help_text());
                }
                unknown => {
                    return Err(format!("unknown flag `{unknown}`\n\n{}", help_text()));
                }
            }
        }

        let indexer_url = cli_indexer_url
            .or_else(|| env("MONITOR_INDEXER_URL"))
            .ok_or_else(|| ConfigError::MissingIndexerUrl.to_string())?;

        let request_timeout_secs = match cli_timeout_secs {
            Some(value) => value,
            None => parse_env_u64(&env, "MONITOR_TIMEOUT_SECS")?.unwrap_or(DEFAULT_TIMEOUT_SECS),
        };
        let report_source_mode = match cli_report_source {
            Some(mode) => mode,
            None => match env("MONITOR_REPORT_SOURCE") {
                Some(raw) => raw
                    .parse()
                    .map_err(|error| format!("invalid MONITOR_REPORT_SOURCE: {error}"))?,
                None => ReportSourceMode::default(),
            },
        };
        let staking_page_size = match cli_staking_page_size {
            Some(value) => value,
            None => parse_env_u64(&env, "MONITOR_STAKING_PAGE_SIZE")?
                .unwrap_or(DEFAULT_STAKING_PAGE_SIZE),
        };
        let offline_page_size = match cli_offline_page_size {
            Some(value) => value,
            None => parse_env_u64(&env, "MONITOR_OFFLINE_PAGE_SIZE")?
                .unwrap_or(DEFAULT_OFFLINE_PAGE_SIZE),
        };

        let config = Self {
            indexer_url,
            node_api_url: cli_node_api_url
                .or_else(|| env("MONITOR_NODE_API_URL"))
                .unwrap_or_else(|| DEFAULT_NODE_API_URL.to_string()),
            bind: cli_bind
                .or_else(|| env("MONITOR_BIND"))
                .unwrap_or_else(|| DEFAULT_BIND.to_string()),
            request_timeout: Duration::from_secs(request_timeout_secs),
            report_source_mode,
            staking_page_size,
            offline_page_size,
            chain_rpc_url: cli_chain_rpc_url
                .or_else(|| env("MONITOR_CHAIN_RPC_URL"))
                .unwrap_or_else(|| DEFAULT_CHAIN_RPC_URL.to_string()),
            rent_contract: cli_rent_contract
                .or_else(|| env("MONITOR_RENT_CONTRACT"))
                .unwrap_or_else(|| DEFAULT_RENT_CONTRACT.to_string()),
            machine_info_contract: cli_machine_info_contract
                .or_else(|| env("MONITOR_MACHINE_INFO_CONTRACT"))
                .filter(|raw| !raw.trim().is_empty()),
        };
        config.validate().map_err(|error| error.to_string())?;
        Ok(config)
    }
}

fn validate_http_url(field: &'static str, raw: &str) -> Result<(), ConfigError> {
    let url = reqwest::Url::parse(raw).map_err(|error| ConfigError::InvalidUrl {
        field,
        value: raw.to_string(),
        reason: error.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            field,
            value: raw.to_string(),
            reason: "scheme must be http or https".to_string(),
        });
    }
    Ok(())
}

fn parse_contract(field: &'static str, raw: &str) -> Result<Address, ConfigError> {
    Address::parse(field, raw).map_err(|error| ConfigError::InvalidAddress {
        field,
        value: raw.to_string(),
        reason: match error {
            ValidationError::InvalidHex { reason, .. } => reason.to_string(),
            other => other.to_string(),
        },
    })
}

fn parse_env_u64(
    env: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<u64>, String> {
    match env(name) {
        Some(raw) => Ok(Some(parse_positive_u64(&raw, name)?)),
        None => Ok(None),
    }
}

fn parse_positive_u64(raw: &str, field: &str) -> Result<u64, String> {
    let parsed = raw
        .trim()
        .parse::<u64>()
        .map_err(|error| format!("invalid {field} value `{raw}`: {error}"))?;
    if parsed == 0 {
        return Err(format!("invalid {field} value `{raw}`: must be > 0"));
    }
    Ok(parsed)
}

/// Scheme, host and port only, so credentials or API keys embedded in the
/// URL never reach the logs.
pub fn redact_url(raw: &str) -> String {
    match reqwest::Url::parse(raw) {
        Ok(url) => {
            let host = url.host_str().unwrap_or("unknown-host");
            let port = url
                .port()
                .map(|value| format!(":{value}"))
                .unwrap_or_default();
            format!("{}://{}{port}", url.scheme(), host)
        }
        Err(_) => "<invalid-url>".to_string(),
    }
}

pub fn help_text() -> String {
    format!(
        "usage: monitor-dashboard --indexer-url <url> [options]\n\
options:\n\
  --indexer-url <url>              GraphQL endpoint of the machine subgraph\n\
  --node-api-url <url>             Node API base for device lookups (default: {DEFAULT_NODE_API_URL})\n\
  --bind <addr>                    HTTP bind address (default: {DEFAULT_BIND})\n\
  --timeout-secs <secs>            Upstream request timeout (default: {DEFAULT_TIMEOUT_SECS})\n\
  --report-source <streams|joined> Report history shape (default: streams)\n\
  --staking-page-size <n>          Staking list page size (default: {DEFAULT_STAKING_PAGE_SIZE})\n\
  --offline-page-size <n>          Offline list page size (default: {DEFAULT_OFFLINE_PAGE_SIZE})\n\
  --chain-rpc-url <url>            JSON-RPC endpoint for contract reads (default: {DEFAULT_CHAIN_RPC_URL})\n\
  --rent-contract <address>        Rent contract (default: {DEFAULT_RENT_CONTRACT})\n\
  --machine-info-contract <addr>   Machine info contract; machine info is skipped when unset\n\
environment:\n\
  MONITOR_INDEXER_URL              GraphQL endpoint\n\
  MONITOR_NODE_API_URL             Node API base\n\
  MONITOR_BIND                     HTTP bind address\n\
  MONITOR_TIMEOUT_SECS             Upstream request timeout\n\
  MONITOR_REPORT_SOURCE            streams or joined\n\
  MONITOR_STAKING_PAGE_SIZE        Staking list page size\n\
  MONITOR_OFFLINE_PAGE_SIZE        Offline list page size\n\
  MONITOR_CHAIN_RPC_URL            Contract read endpoint\n\
  MONITOR_RENT_CONTRACT            Rent contract address\n\
  MONITOR_MACHINE_INFO_CONTRACT    Machine info contract address\n\
  RUST_LOG                         Log filter (default: info)"
    )
}
