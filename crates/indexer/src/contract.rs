//! Read-only `eth_call` access to the rent and machine-info contracts.
//!
//! Calls are encoded by hand from fixed function signatures: each takes one
//! `string` argument and returns either a single static word, a single
//! dynamic string, or the eight static words of `getMachineInfo`.

use std::time::Duration;

use alloy_primitives::{hex, keccak256};
use machine_monitor_types::{Address, FetchError, MachineInfo, RentStatus, ValidationError};
use serde_json::{Value, json};

use crate::read_json_body_with_limit;

pub const DEFAULT_CHAIN_RPC_URL: &str = "https://rpc.dbcwallet.io";
pub const DEFAULT_RENT_CONTRACT: &str = "0xDA9EfdfF9CA7B7065b7706406a1a79C0e483815A";
pub const MAX_RPC_RESPONSE_BYTES: usize = 256 * 1024;

pub const CAN_RENT: &str = "canRent(string)";
pub const CAN_NOT_RENT_REASON: &str = "resonFoCanNotRent(string)";
pub const IN_RENT_WHITELIST: &str = "inRentWhiteList(string)";
pub const GET_MACHINE_INFO: &str = "getMachineInfo(string)";

const WORD: usize = 32;
const MACHINE_INFO_WORDS: usize = 8;

type Word = [u8; WORD];

#[derive(Clone)]
pub struct ContractReader {
    http: reqwest::Client,
    rpc_url: String,
    rent_contract: Address,
    machine_info_contract: Option<Address>,
}

impl ContractReader {
    pub fn new(
        rpc_url: impl Into<String>,
        timeout: Duration,
        rent_contract: Address,
        machine_info_contract: Option<Address>,
    ) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| FetchError::Transport(format!("failed to build HTTP client: {error}")))?;
        Ok(Self {
            http,
            rpc_url: rpc_url.into(),
            rent_contract,
            machine_info_contract,
        })
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    pub fn machine_info_enabled(&self) -> bool {
        self.machine_info_contract.is_some()
    }

    /// Rentability flags, read with three concurrent calls.
    pub async fn rent_status(&self, machine_id: &str) -> Result<RentStatus, FetchError> {
        let machine_id = non_blank_machine_id(machine_id)?;
        let (can_rent, reason, in_rent_whitelist) = tokio::try_join!(
            self.call_with_machine_id(&self.rent_contract, CAN_RENT, machine_id),
            self.call_with_machine_id(&self.rent_contract, CAN_NOT_RENT_REASON, machine_id),
            self.call_with_machine_id(&self.rent_contract, IN_RENT_WHITELIST, machine_id),
        )?;
        Ok(RentStatus {
            can_rent: decode_bool("canRent", &can_rent)?,
            reason: decode_string("resonFoCanNotRent", &reason)?,
            in_rent_whitelist: decode_bool("inRentWhiteList", &in_rent_whitelist)?,
        })
    }

    /// `None` when no machine-info contract is configured.
    pub async fn machine_info(&self, machine_id: &str) -> Result<Option<MachineInfo>, FetchError> {
        let Some(contract) = &self.machine_info_contract else {
            return Ok(None);
        };
        let machine_id = non_blank_machine_id(machine_id)?;
        let output = self
            .call_with_machine_id(contract, GET_MACHINE_INFO, machine_id)
            .await?;
        decode_machine_info(&output).map(Some).map_err(FetchError::from)
    }

    async fn call_with_machine_id(
        &self,
        contract: &Address,
        signature: &'static str,
        machine_id: &str,
    ) -> Result<Vec<u8>, FetchError> {
        self.eth_call(contract, signature, &encode_string_call(signature, machine_id))
            .await
    }

    /// Runs `eth_call` against the latest block and returns the raw output.
    pub async fn eth_call(
        &self,
        to: &Address,
        signature: &'static str,
        calldata: &[u8],
    ) -> Result<Vec<u8>, FetchError> {
        tracing::debug!(%to, signature, "eth_call");
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [
                {"to": to.as_ref(), "data": format!("0x{}", hex::encode(calldata))},
                "latest",
            ],
        });

        let mut response = self
            .http
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|error| {
                FetchError::Transport(format!("eth_call {signature} request failed: {error}"))
            })?;
        let http_status = response.status();
        if !http_status.is_success() {
            return Err(FetchError::Protocol(format!(
                "eth_call {signature} returned HTTP {http_status}"
            )));
        }
        let content_length = response.content_length();
        let body = read_json_body_with_limit(
            &mut response,
            content_length,
            MAX_RPC_RESPONSE_BYTES,
            signature,
        )
        .await?;
        extract_call_output(signature, body)
    }
}

fn non_blank_machine_id(machine_id: &str) -> Result<&str, FetchError> {
    let machine_id = machine_id.trim();
    if machine_id.is_empty() {
        return Err(ValidationError::Blank {
            field: "machine_id",
        }
        .into());
    }
    Ok(machine_id)
}

pub fn extract_call_output(signature: &'static str, body: Value) -> Result<Vec<u8>, FetchError> {
    if let Some(error) = body.get("error")
        && !error.is_null()
    {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(FetchError::Protocol(format!(
            "eth_call {signature} error: {message}"
        )));
    }
    let Some(result) = body.get("result").and_then(Value::as_str) else {
        return Err(ValidationError::MissingData { entity: signature }.into());
    };
    let digits = result.strip_prefix("0x").unwrap_or(result);
    hex::decode(digits).map_err(|error| {
        ValidationError::Shape {
            entity: signature,
            error: format!("result is not hex: {error}"),
        }
        .into()
    })
}

pub fn function_selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&hash.0[..4]);
    selector
}

/// Selector followed by the head offset, length and right-padded bytes of a
/// single `string` argument.
pub fn encode_string_call(signature: &str, argument: &str) -> Vec<u8> {
    let bytes = argument.as_bytes();
    let padded = bytes.len().div_ceil(WORD) * WORD;
    let mut calldata = Vec::with_capacity(4 + 2 * WORD + padded);
    calldata.extend_from_slice(&function_selector(signature));
    calldata.extend_from_slice(&usize_word(WORD));
    calldata.extend_from_slice(&usize_word(bytes.len()));
    calldata.extend_from_slice(bytes);
    calldata.resize(4 + 2 * WORD + padded, 0);
    calldata
}

fn usize_word(value: usize) -> Word {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&(value as u64).to_be_bytes());
    word
}

fn split_words(entity: &'static str, output: &[u8]) -> Result<Vec<Word>, ValidationError> {
    if output.len() % WORD != 0 {
        return Err(ValidationError::Shape {
            entity,
            error: format!("output length {} is not a multiple of {WORD}", output.len()),
        });
    }
    Ok(output
        .chunks_exact(WORD)
        .map(|chunk| {
            let mut word = [0u8; WORD];
            word.copy_from_slice(chunk);
            word
        })
        .collect())
}

fn word_to_u128(field: &'static str, word: &Word) -> Result<u128, ValidationError> {
    if word[..16].iter().any(|byte| *byte != 0) {
        return Err(ValidationError::InvalidInteger {
            field,
            value: format!("0x{}", hex::encode(word)),
            error: "exceeds 128 bits".to_string(),
        });
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}

fn word_to_u64(field: &'static str, word: &Word) -> Result<u64, ValidationError> {
    let value = word_to_u128(field, word)?;
    u64::try_from(value).map_err(|error| ValidationError::InvalidInteger {
        field,
        value: value.to_string(),
        error: error.to_string(),
    })
}

fn word_to_usize(field: &'static str, word: &Word) -> Result<usize, ValidationError> {
    let value = word_to_u64(field, word)?;
    usize::try_from(value).map_err(|error| ValidationError::InvalidInteger {
        field,
        value: value.to_string(),
        error: error.to_string(),
    })
}

fn word_to_bool(field: &'static str, word: &Word) -> Result<bool, ValidationError> {
    match word_to_u128(field, word)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ValidationError::InvalidInteger {
            field,
            value: other.to_string(),
            error: "not a boolean".to_string(),
        }),
    }
}

fn word_to_address(field: &'static str, word: &Word) -> Result<Address, ValidationError> {
    if word[..12].iter().any(|byte| *byte != 0) {
        return Err(ValidationError::InvalidHex {
            field,
            value: format!("0x{}", hex::encode(word)),
            reason: "address word has non-zero padding",
        });
    }
    Address::parse(field, format!("0x{}", hex::encode(&word[12..])))
}

pub fn decode_bool(entity: &'static str, output: &[u8]) -> Result<bool, ValidationError> {
    let words = split_words(entity, output)?;
    match words.as_slice() {
        [word] => word_to_bool(entity, word),
        _ => Err(ValidationError::Arity {
            entity,
            expected: 1,
            actual: words.len(),
        }),
    }
}

pub fn decode_string(entity: &'static str, output: &[u8]) -> Result<String, ValidationError> {
    let words = split_words(entity, output)?;
    let Some(head) = words.first() else {
        return Err(ValidationError::Arity {
            entity,
            expected: 1,
            actual: 0,
        });
    };
    let out_of_bounds = || ValidationError::Shape {
        entity,
        error: "string offset or length out of bounds".to_string(),
    };
    let offset = word_to_usize(entity, head)?;
    if offset % WORD != 0 {
        return Err(out_of_bounds());
    }
    let length_word = words.get(offset / WORD).ok_or_else(out_of_bounds)?;
    let length = word_to_usize(entity, length_word)?;
    let start = offset.checked_add(WORD).ok_or_else(out_of_bounds)?;
    let end = start.checked_add(length).ok_or_else(out_of_bounds)?;
    let bytes = output.get(start..end).ok_or_else(out_of_bounds)?;
    String::from_utf8(bytes.to_vec()).map_err(|error| ValidationError::Shape {
        entity,
        error: error.to_string(),
    })
}

/// Decodes `(address, uint256, uint256, uint256, uint256, uint256, bool, bool)`.
pub fn decode_machine_info(output: &[u8]) -> Result<MachineInfo, ValidationError> {
    const ENTITY: &str = "getMachineInfo";
    let words = split_words(ENTITY, output)?;
    let [
        holder,
        calc_point,
        start_at,
        end_at,
        next_renter_can_rent_at,
        reserved_amount,
        is_online,
        is_registered,
    ] = words.as_slice()
    else {
        return Err(ValidationError::Arity {
            entity: ENTITY,
            expected: MACHINE_INFO_WORDS,
            actual: words.len(),
        });
    };
    Ok(MachineInfo {
        holder: word_to_address("holder", holder)?,
        calc_point: word_to_u128("calcPoint", calc_point)?,
        start_at: word_to_u64("startAtTimestamp", start_at)?,
        end_at: word_to_u64("endAtTimestamp", end_at)?,
        next_renter_can_rent_at: word_to_u64("nextRenterCanRentAt", next_renter_can_rent_at)?,
        reserved_amount: word_to_u128("reservedAmount", reserved_amount)?,
        is_online: word_to_bool("isOnline", is_online)?,
        is_registered: word_to_bool("isRegistered", is_registered)?,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub(crate) fn uint_word(value: u128) -> Vec<u8> {
        let mut word = vec![0u8; WORD];
        word[16..].copy_from_slice(&value.to_be_bytes());
        word
    }

    pub(crate) fn string_output(value: &str) -> Vec<u8> {
        let mut output = uint_word(WORD as u128);
        output.extend(uint_word(value.len() as u128));
        output.extend_from_slice(value.as_bytes());
        output.resize(2 * WORD + value.len().div_ceil(WORD) * WORD, 0);
        output
    }

    pub(crate) fn machine_info_output(holder_low_byte: u8) -> Vec<u8> {
        let mut holder = vec![0u8; WORD];
        holder[WORD - 1] = holder_low_byte;
        let mut output = holder;
        for value in [1_500, 1_700_000_000, 1_800_000_000, 1_700_003_600] {
            output.extend(uint_word(value));
        }
        output.extend(uint_word(100_000 * machine_monitor_types::BASE_UNITS_PER_TOKEN));
        output.extend(uint_word(1));
        output.extend(uint_word(0));
        output
    }
}
