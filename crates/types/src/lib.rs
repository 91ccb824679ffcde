#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

pub type SubjectId = String;
pub type UnixSeconds = u64;
pub type BlockNumber = u64;
pub type Filters = BTreeMap<String, FilterValue>;

pub const BASE_UNITS_PER_TOKEN: u128 = 1_000_000_000_000_000_000;
pub const MAX_REASONABLE_TIMESTAMP: u64 = 4_000_000_000;
const ADDRESS_HEX_LEN: usize = 40;

macro_rules! hex_identifier {
    ($name:ident, $hex_len:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn parse(
                field: &'static str,
                raw: impl AsRef<str>,
            ) -> Result<Self, ValidationError> {
                let canonical = canonicalize_hex(field, raw.as_ref(), $hex_len)?;
                Ok(Self(canonical))
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(stringify!($name), value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

hex_identifier!(Address, ADDRESS_HEX_LEN);

/// Malformed data crossing the decoding boundary between the indexer's wire
/// shapes and the domain records.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} must not be blank")]
    Blank { field: &'static str },
    #[error("response is missing `{entity}` data")]
    MissingData { entity: &'static str },
    #[error("invalid {field} '{value}': {reason}")]
    InvalidHex {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("invalid {field} '{value}': {error}")]
    InvalidInteger {
        field: &'static str,
        value: String,
        error: String,
    },
    #[error("invalid {field} timestamp {value}: {reason}")]
    InvalidTimestamp {
        field: &'static str,
        value: u64,
        reason: &'static str,
    },
    #[error("inconsistent {record} record '{id}': {reason}")]
    InconsistentRecord {
        record: &'static str,
        id: String,
        reason: &'static str,
    },
    #[error("malformed {entity} payload: {error}")]
    Shape { entity: &'static str, error: String },
    #[error("{entity} returned {actual} values, expected {expected}")]
    Arity {
        entity: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Failure of a Fetcher or Event Source call. Never fatal: coordinators store
/// its description and keep the previously loaded data.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

fn canonicalize_hex(
    field: &'static str,
    raw: &str,
    hex_len: usize,
) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    let Some(digits) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    else {
        return Err(ValidationError::InvalidHex {
            field,
            value: raw.to_string(),
            reason: "missing 0x prefix",
        });
    };
    if digits.len() != hex_len {
        return Err(ValidationError::InvalidHex {
            field,
            value: raw.to_string(),
            reason: "unexpected length",
        });
    }
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::InvalidHex {
            field,
            value: raw.to_string(),
            reason: "non-hex digit",
        });
    }
    Ok(format!("0x{}", digits.to_ascii_lowercase()))
}

pub fn parse_unix_seconds(field: &'static str, raw: &str) -> Result<UnixSeconds, ValidationError> {
    let value = parse_u64(field, raw)?;
    if value > MAX_REASONABLE_TIMESTAMP {
        return Err(ValidationError::InvalidTimestamp {
            field,
            value,
            reason: "too far in the future",
        });
    }
    Ok(value)
}

pub fn parse_block_number(field: &'static str, raw: &str) -> Result<BlockNumber, ValidationError> {
    parse_u64(field, raw)
}

pub fn parse_base_units(field: &'static str, raw: &str) -> Result<u128, ValidationError> {
    raw.trim()
        .parse::<u128>()
        .map_err(|error| ValidationError::InvalidInteger {
            field,
            value: raw.to_string(),
            error: error.to_string(),
        })
}

fn parse_u64(field: &'static str, raw: &str) -> Result<u64, ValidationError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|error| ValidationError::InvalidInteger {
            field,
            value: raw.to_string(),
            error: error.to_string(),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Open,
    CloseByRecovery,
    CloseByTermination,
}

impl EventKind {
    pub fn is_close(self) -> bool {
        !matches!(self, EventKind::Open)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub subject_id: SubjectId,
    pub timestamp: UnixSeconds,
    pub kind: EventKind,
    pub reference: String,
}

impl RawEvent {
    pub fn new(
        subject_id: impl Into<SubjectId>,
        timestamp: UnixSeconds,
        kind: EventKind,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            timestamp,
            kind,
            reference: reference.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalStatus {
    Open,
    ClosedByRecovery,
    ClosedByTermination,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub subject_id: SubjectId,
    pub start: UnixSeconds,
    pub end: Option<UnixSeconds>,
    pub duration_seconds: Option<u64>,
    pub status: IntervalStatus,
    pub start_reference: String,
    pub end_reference: Option<String>,
}

impl Interval {
    pub fn is_open(&self) -> bool {
        self.status == IntervalStatus::Open
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn toggled(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Flag(bool),
    Number(i64),
    Text(String),
}

impl FilterValue {
    /// Only text can be blank; flags and numbers always carry a value.
    pub fn is_blank(&self) -> bool {
        match self {
            FilterValue::Text(text) => text.trim().is_empty(),
            FilterValue::Flag(_) | FilterValue::Number(_) => false,
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Flag(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Number(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryRequest {
    pub filters: Filters,
    pub page: u64,
    pub page_size: u64,
    pub sort_field: String,
    pub sort_direction: SortDirection,
}

impl QueryRequest {
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.page_size)
    }

    pub fn text_filter(&self, field: &str) -> Option<&str> {
        match self.filters.get(field) {
            Some(FilterValue::Text(text)) if !text.trim().is_empty() => Some(text.trim()),
            _ => None,
        }
    }

    pub fn flag_filter(&self, field: &str) -> Option<bool> {
        match self.filters.get(field) {
            Some(FilterValue::Flag(flag)) => Some(*flag),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation<'a> {
    OrphanEvent {
        event: &'a RawEvent,
    },
    FetchFailed {
        resource: &'a str,
        token: u64,
        error: &'a str,
    },
    StaleResponseDropped {
        resource: &'a str,
        token: u64,
        current_token: u64,
    },
}

/// Receives anomalies and failures from the reconciler and coordinators.
pub trait ObservabilitySink: Send + Sync {
    fn observe(&self, observation: &Observation<'_>);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StakingMachine {
    pub machine_id: String,
    pub holder: Address,
    pub extra_rent_fee: u128,
    pub total_claimed_reward_amount: u128,
    pub burned_rent_fee: u128,
    pub total_reserved_amount: u128,
    pub is_rented: bool,
    pub online: bool,
    pub registered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireStakingMachine {
    pub machine_id: String,
    pub holder: String,
    pub extra_rent_fee: String,
    pub total_claimed_reward_amount: String,
    pub burned_rent_fee: String,
    pub total_reserved_amount: String,
    pub is_rented: bool,
    pub online: bool,
    pub registered: bool,
}

impl TryFrom<WireStakingMachine> for StakingMachine {
    type Error = ValidationError;

    fn try_from(wire: WireStakingMachine) -> Result<Self, Self::Error> {
        Ok(Self {
            holder: Address::parse("holder", &wire.holder)?,
            extra_rent_fee: parse_base_units("extraRentFee", &wire.extra_rent_fee)?,
            total_claimed_reward_amount: parse_base_units(
                "totalClaimedRewardAmount",
                &wire.total_claimed_reward_amount,
            )?,
            burned_rent_fee: parse_base_units("burnedRentFee", &wire.burned_rent_fee)?,
            total_reserved_amount: parse_base_units(
                "totalReservedAmount",
                &wire.total_reserved_amount,
            )?,
            machine_id: wire.machine_id,
            is_rented: wire.is_rented,
            online: wire.online,
            registered: wire.registered,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfflineMachineRecord {
    pub id: String,
    pub machine_id: String,
    pub holder: Address,
    pub block_number: BlockNumber,
    pub offline_at: UnixSeconds,
    pub transaction_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOfflineRecord {
    pub id: String,
    pub machine_id: String,
    pub holder: String,
    pub block_number: String,
    pub block_timestamp: String,
    pub transaction_hash: String,
}

impl TryFrom<WireOfflineRecord> for OfflineMachineRecord {
    type Error = ValidationError;

    fn try_from(wire: WireOfflineRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            holder: Address::parse("holder", &wire.holder)?,
            block_number: parse_block_number("blockNumber", &wire.block_number)?,
            offline_at: parse_unix_seconds("blockTimestamp", &wire.block_timestamp)?,
            id: wire.id,
            machine_id: wire.machine_id,
            transaction_hash: wire.transaction_hash,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlashType {
    Offline,
    Performance,
    Malicious,
    Unknown(u32),
}

impl From<u32> for SlashType {
    fn from(value: u32) -> Self {
        match value {
            1 => SlashType::Offline,
            2 => SlashType::Performance,
            3 => SlashType::Malicious,
            other => SlashType::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlashedRecord {
    pub id: String,
    pub machine_id: String,
    pub holder: Address,
    pub renter: Address,
    pub slash_amount: u128,
    pub slash_type: SlashType,
    pub rent_start: UnixSeconds,
    pub rent_end: UnixSeconds,
    pub slashed_at: UnixSeconds,
    pub transaction_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSlashedRecord {
    pub id: String,
    pub machine_id: String,
    pub holder: String,
    pub renter: String,
    pub slash_amount: String,
    pub slash_type: String,
    pub rent_stat_time: String,
    pub rent_end_time: String,
    pub block_number: String,
    pub block_timestamp: String,
    pub transaction_hash: String,
}

impl TryFrom<WireSlashedRecord> for SlashedRecord {
    type Error = ValidationError;

    fn try_from(wire: WireSlashedRecord) -> Result<Self, Self::Error> {
        let slash_type = wire.slash_type.trim().parse::<u32>().map_err(|error| {
            ValidationError::InvalidInteger {
                field: "slashType",
                value: wire.slash_type.clone(),
                error: error.to_string(),
            }
        })?;
        Ok(Self {
            holder: Address::parse("holder", &wire.holder)?,
            renter: Address::parse("renter", &wire.renter)?,
            slash_amount: parse_base_units("slashAmount", &wire.slash_amount)?,
            slash_type: SlashType::from(slash_type),
            rent_start: parse_unix_seconds("rentStatTime", &wire.rent_stat_time)?,
            rent_end: parse_unix_seconds("rentEndTime", &wire.rent_end_time)?,
            slashed_at: parse_unix_seconds("blockTimestamp", &wire.block_timestamp)?,
            id: wire.id,
            machine_id: wire.machine_id,
            transaction_hash: wire.transaction_hash,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnregisterRecord {
    pub id: String,
    pub machine_id: String,
    pub block_number: BlockNumber,
    pub unregistered_at: UnixSeconds,
    pub transaction_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireUnregisterRecord {
    pub id: String,
    pub machine_id: String,
    pub block_number: String,
    pub block_timestamp: String,
    pub transaction_hash: String,
}

impl TryFrom<WireUnregisterRecord> for UnregisterRecord {
    type Error = ValidationError;

    fn try_from(wire: WireUnregisterRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            block_number: parse_block_number("blockNumber", &wire.block_number)?,
            unregistered_at: parse_unix_seconds("blockTimestamp", &wire.block_timestamp)?,
            id: wire.id,
            machine_id: wire.machine_id,
            transaction_hash: wire.transaction_hash,
        })
    }
}

/// Contract-side view of a machine, as returned by `getMachineInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineInfo {
    pub holder: Address,
    pub calc_point: u128,
    pub start_at: UnixSeconds,
    pub end_at: UnixSeconds,
    pub next_renter_can_rent_at: UnixSeconds,
    pub reserved_amount: u128,
    pub is_online: bool,
    pub is_registered: bool,
}

/// Rentability flags read from the rent contract. `reason` is the contract's
/// raw English explanation and is empty when the machine can be rented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RentStatus {
    pub can_rent: bool,
    pub reason: String,
    pub in_rent_whitelist: bool,
}

/// One entry of an offline, re-online or unstake stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireReportEvent {
    pub machine_id: String,
    pub block_timestamp: String,
    #[serde(default)]
    pub transaction_hash: Option<String>,
}

/// A report already paired upstream, carrying explicit finish-reason flags.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireJoinedReport {
    pub id: String,
    pub machine_id: String,
    pub offline_time: String,
    #[serde(default)]
    pub re_online_time: Option<String>,
    #[serde(default)]
    pub un_stake_time: Option<String>,
    #[serde(default)]
    pub finished_by_re_online: bool,
    #[serde(default)]
    pub finished_by_end_stake: bool,
    #[serde(default)]
    pub offline_transaction_hash: Option<String>,
    #[serde(default)]
    pub re_online_transaction_hash: Option<String>,
    #[serde(default)]
    pub un_stake_transaction_hash: Option<String>,
}
