//! Display rows for the dashboard. Raw values stay alongside their rendered
//! form so clients can sort or link without re-parsing.

use machine_monitor_format::{
    format_address, format_amount, format_duration, format_interval_status, format_rent_label,
    format_slash_type, format_timestamp, format_tx_hash, translate_rent_reason, tx_explorer_url,
};
use machine_monitor_query::{QueryState, QueryStatus};
use machine_monitor_reconcile::ReportHistory;
use machine_monitor_types::{
    Filters, Interval, IntervalStatus, MachineInfo, OfflineMachineRecord, RentStatus,
    SlashedRecord, SortDirection, StakingMachine, UnixSeconds, UnregisterRecord,
};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxLink {
    pub hash: String,
    pub short: String,
    pub url: Option<String>,
}

impl TxLink {
    pub fn new(hash: &str) -> Self {
        let short = format_tx_hash(hash);
        // Placeholder hashes have nothing to link to.
        let url = (short != "-").then(|| tx_explorer_url(hash));
        Self {
            hash: hash.trim().to_string(),
            short,
            url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StakingRow {
    pub machine_id: String,
    pub holder: String,
    pub holder_short: String,
    pub total_claimed_reward: String,
    pub total_reserved: String,
    pub extra_rent_fee: String,
    pub burned_rent_fee: String,
    pub is_rented: bool,
    pub online: bool,
    pub registered: bool,
}

impl From<&StakingMachine> for StakingRow {
    fn from(machine: &StakingMachine) -> Self {
        Self {
            machine_id: machine.machine_id.clone(),
            holder: machine.holder.to_string(),
            holder_short: format_address(&machine.holder),
            total_claimed_reward: format_amount(machine.total_claimed_reward_amount),
            total_reserved: format_amount(machine.total_reserved_amount),
            extra_rent_fee: format_amount(machine.extra_rent_fee),
            burned_rent_fee: format_amount(machine.burned_rent_fee),
            is_rented: machine.is_rented,
            online: machine.online,
            registered: machine.registered,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfflineRow {
    pub id: String,
    pub machine_id: String,
    pub holder: String,
    pub holder_short: String,
    pub block_number: u64,
    pub offline_at: u64,
    pub offline_at_display: String,
    pub transaction: TxLink,
}

impl From<&OfflineMachineRecord> for OfflineRow {
    fn from(record: &OfflineMachineRecord) -> Self {
        Self {
            id: record.id.clone(),
            machine_id: record.machine_id.clone(),
            holder: record.holder.to_string(),
            holder_short: format_address(&record.holder),
            block_number: record.block_number,
            offline_at: record.offline_at,
            offline_at_display: format_timestamp(record.offline_at),
            transaction: TxLink::new(&record.transaction_hash),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub status: IntervalStatus,
    pub status_label: &'static str,
    pub start: u64,
    pub start_display: String,
    pub end_display: String,
    pub duration_display: String,
    pub start_transaction: TxLink,
    pub end_transaction: Option<TxLink>,
}

impl From<&Interval> for ReportRow {
    fn from(interval: &Interval) -> Self {
        Self {
            status: interval.status,
            status_label: format_interval_status(interval.status),
            start: interval.start,
            start_display: format_timestamp(interval.start),
            end_display: interval
                .end
                .map(format_timestamp)
                .unwrap_or_else(|| "-".to_string()),
            duration_display: interval
                .duration_seconds
                .map(format_duration)
                .unwrap_or_else(|| "-".to_string()),
            start_transaction: TxLink::new(&interval.start_reference),
            end_transaction: interval.end_reference.as_deref().map(TxLink::new),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportView {
    pub machine_id: String,
    pub currently_open: bool,
    pub orphan_events: usize,
    pub rows: Vec<ReportRow>,
}

impl From<&ReportHistory> for ReportView {
    fn from(history: &ReportHistory) -> Self {
        Self {
            machine_id: history.subject_id.clone(),
            currently_open: history.currently_open,
            orphan_events: history.orphan_events.len(),
            rows: history.intervals.iter().map(ReportRow::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlashedRow {
    pub id: String,
    pub holder_short: String,
    pub renter_short: String,
    pub amount: String,
    pub slash_type: String,
    pub rent_start: String,
    pub rent_end: String,
    pub slashed_at: String,
    pub transaction: TxLink,
}

impl From<&SlashedRecord> for SlashedRow {
    fn from(record: &SlashedRecord) -> Self {
        Self {
            id: record.id.clone(),
            holder_short: format_address(&record.holder),
            renter_short: format_address(&record.renter),
            amount: format_amount(record.slash_amount),
            slash_type: format_slash_type(record.slash_type),
            rent_start: format_timestamp(record.rent_start),
            rent_end: format_timestamp(record.rent_end),
            slashed_at: format_timestamp(record.slashed_at),
            transaction: TxLink::new(&record.transaction_hash),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnregisterRow {
    pub id: String,
    pub block_number: u64,
    pub unregistered_at: String,
    pub transaction: TxLink,
}

impl From<&UnregisterRecord> for UnregisterRow {
    fn from(record: &UnregisterRecord) -> Self {
        Self {
            id: record.id.clone(),
            block_number: record.block_number,
            unregistered_at: format_timestamp(record.unregistered_at),
            transaction: TxLink::new(&record.transaction_hash),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineInfoView {
    pub holder: String,
    pub holder_short: String,
    pub calc_point: String,
    pub reserved_amount: String,
    pub start_at: String,
    pub end_at: String,
    pub next_renter_can_rent_at: String,
    pub is_online: bool,
    pub is_registered: bool,
}

impl From<&MachineInfo> for MachineInfoView {
    fn from(info: &MachineInfo) -> Self {
        Self {
            holder: info.holder.to_string(),
            holder_short: format_address(&info.holder),
            calc_point: info.calc_point.to_string(),
            reserved_amount: format_amount(info.reserved_amount),
            start_at: contract_timestamp(info.start_at),
            end_at: contract_timestamp(info.end_at),
            next_renter_can_rent_at: contract_timestamp(info.next_renter_can_rent_at),
            is_online: info.is_online,
            is_registered: info.is_registered,
        }
    }
}

/// Contracts report unset times as zero.
fn contract_timestamp(seconds: UnixSeconds) -> String {
    if seconds == 0 {
        "-".to_string()
    } else {
        format_timestamp(seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RentStatusView {
    pub can_rent: bool,
    pub label: &'static str,
    pub reason: Option<String>,
    pub in_rent_whitelist: bool,
}

impl From<&RentStatus> for RentStatusView {
    fn from(status: &RentStatus) -> Self {
        let reason = (!status.can_rent && !status.reason.trim().is_empty())
            .then(|| translate_rent_reason(&status.reason));
        Self {
            can_rent: status.can_rent,
            label: format_rent_label(status.can_rent),
            reason,
            in_rent_whitelist: status.in_rent_whitelist,
        }
    }
}

/// One list screen: the coordinator's request parameters plus rendered rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListPayload<R> {
    pub status: QueryStatus,
    pub filters: Filters,
    pub sort_field: String,
    pub sort_direction: SortDirection,
    pub page: u64,
    pub page_size: u64,
    pub total: u64,
    pub error: Option<String>,
    pub rows: Vec<R>,
}

impl<R> ListPayload<R> {
    pub fn from_state<T>(state: &QueryState<T>, row: impl Fn(&T) -> R) -> Self {
        Self {
            status: state.status(),
            filters: state.filters.clone(),
            sort_field: state.sort_field.clone(),
            sort_direction: state.sort_direction,
            page: state.page,
            page_size: state.page_size,
            total: state.total,
            error: state.error.clone(),
            rows: state.items.iter().map(row).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use machine_monitor_types::{Address, BASE_UNITS_PER_TOKEN, SlashType};

    use super::*;

    fn holder() -> Address {
        Address::parse("holder", "0x00000000000000000000000000000000000000aa").expect("address")
    }

    #[test]
    fn placeholder_hash_has_no_link() {
        let link = TxLink::new("0x0");
        assert_eq!(link.short, "-");
        assert_eq!(link.url, None);

        let link = TxLink::new("0x1234567890abcdef");
        assert_eq!(link.short, "0x1234...cdef");
        assert_eq!(
            link.url.as_deref(),
            Some("https://dbcscan.io/zh/tx/0x1234567890abcdef")
        );
    }

    #[test]
    fn staking_row_renders_amounts() {
        let row = StakingRow::from(&StakingMachine {
            machine_id: "m-1".to_string(),
            holder: holder(),
            extra_rent_fee: 0,
            total_claimed_reward_amount: 1_234 * BASE_UNITS_PER_TOKEN + 5,
            burned_rent_fee: 3 * BASE_UNITS_PER_TOKEN,
            total_reserved_amount: 100_000 * BASE_UNITS_PER_TOKEN,
            is_rented: true,
            online: true,
            registered: true,
        });
        assert_eq!(row.total_claimed_reward, "1234 DLC");
        assert_eq!(row.total_reserved, "100000 DLC");
        assert_eq!(row.extra_rent_fee, "0 DLC");
        assert_eq!(row.holder_short, "0x0000...00aa");
    }

    #[test]
    fn open_interval_renders_dashes() {
        let row = ReportRow::from(&Interval {
            subject_id: "m-1".to_string(),
            start: 1_700_000_000,
            end: None,
            duration_seconds: None,
            status: IntervalStatus::Open,
            start_reference: "0xabcdef0123456789".to_string(),
            end_reference: None,
        });
        assert_eq!(row.status_label, "离线中");
        assert_eq!(row.start_display, "2023/11/15 06:13:20");
        assert_eq!(row.end_display, "-");
        assert_eq!(row.duration_display, "-");
        assert_eq!(row.end_transaction, None);
    }

    #[test]
    fn closed_interval_renders_duration() {
        let row = ReportRow::from(&Interval {
            subject_id: "m-1".to_string(),
            start: 1_700_000_000,
            end: Some(1_700_003_661),
            duration_seconds: Some(3661),
            status: IntervalStatus::ClosedByRecovery,
            start_reference: "0xa".to_string(),
            end_reference: Some("0xb".to_string()),
        });
        assert_eq!(row.duration_display, "1小时1分钟1秒");
        assert_eq!(row.status_label, "已上线");
    }

    #[test]
    fn slashed_row_labels_type() {
        let row = SlashedRow::from(&SlashedRecord {
            id: "s1".to_string(),
            machine_id: "m-1".to_string(),
            holder: holder(),
            renter: holder(),
            slash_amount: 2_500 * BASE_UNITS_PER_TOKEN,
            slash_type: SlashType::Unknown(9),
            rent_start: 0,
            rent_end: 0,
            slashed_at: 0,
            transaction_hash: String::new(),
        });
        assert_eq!(row.amount, "2500 DLC");
        assert_eq!(row.slash_type, "未知类型(9)");
        assert_eq!(row.transaction.short, "-");
    }

    #[test]
    fn machine_info_renders_unset_times_as_dashes() {
        let view = MachineInfoView::from(&MachineInfo {
            holder: holder(),
            calc_point: 1_500,
            start_at: 1_700_000_000,
            end_at: 0,
            next_renter_can_rent_at: 0,
            reserved_amount: 100_000 * BASE_UNITS_PER_TOKEN,
            is_online: true,
            is_registered: true,
        });
        assert_eq!(view.start_at, "2023/11/15 06:13:20");
        assert_eq!(view.end_at, "-");
        assert_eq!(view.reserved_amount, "100000 DLC");
        assert_eq!(view.holder_short, "0x0000...00aa");
    }

    #[test]
    fn rent_reason_only_shown_when_not_rentable() {
        let blocked = RentStatusView::from(&RentStatus {
            can_rent: false,
            reason: "is rented".to_string(),
            in_rent_whitelist: true,
        });
        assert_eq!(blocked.label, "不可租赁");
        assert_eq!(blocked.reason.as_deref(), Some("已被租赁"));

        let open = RentStatusView::from(&RentStatus {
            can_rent: true,
            reason: "stale text".to_string(),
            in_rent_whitelist: false,
        });
        assert_eq!(open.label, "可租赁");
        assert_eq!(open.reason, None);
    }
}
