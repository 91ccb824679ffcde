#![forbid(unsafe_code)]

//! Display helpers shared by every presentation layer. None of them fail:
//! inputs outside the expected shape fall back to a defined rendering.

use chrono::{DateTime, FixedOffset};
use machine_monitor_types::{BASE_UNITS_PER_TOKEN, IntervalStatus, SlashType, UnixSeconds};

pub const AMOUNT_SUFFIX: &str = "DLC";
pub const TX_EXPLORER_BASE_URL: &str = "https://dbcscan.io/zh/tx/";
const DISPLAY_UTC_OFFSET_SECS: i32 = 8 * 3600;
const SHORT_PREFIX_CHARS: usize = 6;
const SHORT_SUFFIX_CHARS: usize = 4;
const MIN_SHORTENED_CHARS: usize = 10;

pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let remaining = seconds % 60;

    if hours > 0 {
        format!("{hours}小时{minutes}分钟{remaining}秒")
    } else if minutes > 0 {
        format!("{minutes}分钟{remaining}秒")
    } else {
        format!("{remaining}秒")
    }
}

pub fn format_address(address: &str) -> String {
    shorten(address).unwrap_or_else(|| address.to_string())
}

pub fn format_amount(base_units: u128) -> String {
    format!("{} {AMOUNT_SUFFIX}", base_units / BASE_UNITS_PER_TOKEN)
}

/// Placeholder hashes (`""`, `0x`, `0x0`) render as "-".
pub fn format_tx_hash(hash: &str) -> String {
    let trimmed = hash.trim();
    if matches!(trimmed, "" | "0x" | "0x0") {
        return "-".to_string();
    }
    shorten(trimmed).unwrap_or_else(|| trimmed.to_string())
}

pub fn tx_explorer_url(hash: &str) -> String {
    format!("{TX_EXPLORER_BASE_URL}{}", hash.trim())
}

pub fn format_slash_type(slash_type: SlashType) -> String {
    match slash_type {
        SlashType::Offline => "离线惩罚".to_string(),
        SlashType::Performance => "性能惩罚".to_string(),
        SlashType::Malicious => "恶意行为惩罚".to_string(),
        SlashType::Unknown(code) => format!("未知类型({code})"),
    }
}

pub fn format_interval_status(status: IntervalStatus) -> &'static str {
    match status {
        IntervalStatus::Open => "离线中",
        IntervalStatus::ClosedByRecovery => "已上线",
        IntervalStatus::ClosedByTermination => "已解质押",
    }
}

pub fn format_rent_label(can_rent: bool) -> &'static str {
    if can_rent { "可租赁" } else { "不可租赁" }
}

/// Known rent-contract reasons get a Chinese label; anything else passes
/// through unchanged.
pub fn translate_rent_reason(reason: &str) -> String {
    let label = match reason.trim() {
        "not in rent whitelist" => "不在租赁白名单中",
        "is rented" => "已被租赁",
        "not in staking" => "未参与质押",
        "is blocked(in blacklist)" => "已被拉黑",
        "is staking but offline" => "质押中但离线",
        "not enough staking duration" => "质押时长不足",
        "is offline" => "设备离线",
        "not registered" => "未注册",
        "can not rent before next renter can rent time" => "尚未到达可租赁时间",
        "machine staking time less than 1 hours" => "机器质押时间少于1小时",
        other => other,
    };
    label.to_string()
}

/// Renders unix seconds as `YYYY/M/D HH:MM:SS` in UTC+8. Values chrono cannot
/// represent fall back to the raw number.
pub fn format_timestamp(seconds: UnixSeconds) -> String {
    let Ok(secs) = i64::try_from(seconds) else {
        return seconds.to_string();
    };
    let (Some(utc), Some(offset)) = (
        DateTime::from_timestamp(secs, 0),
        FixedOffset::east_opt(DISPLAY_UTC_OFFSET_SECS),
    ) else {
        return seconds.to_string();
    };
    utc.with_timezone(&offset)
        .format("%Y/%-m/%-d %H:%M:%S")
        .to_string()
}

fn shorten(value: &str) -> Option<String> {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() < MIN_SHORTENED_CHARS {
        return None;
    }
    let head: String = chars[..SHORT_PREFIX_CHARS].iter().collect();
    let tail: String = chars[chars.len() - SHORT_SUFFIX_CHARS..].iter().collect();
    Some(format!("{head}...{tail}"))
}
