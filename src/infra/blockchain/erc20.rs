//! ERC-20 Transfer event encoding and JSON-RPC quantity helpers.

use crate::domain::{AppError, BlockchainError, LogEntry, LogFilter};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Decoded ERC-20 Transfer log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub from: String,
    pub to: String,
    pub value: u128,
    pub tx_hash: String,
    pub block_number: Option<u64>,
}

/// Left-pad a 20-byte address into a 32-byte indexed topic
pub fn address_topic(address: &str) -> String {
    let bare = address.trim().trim_start_matches("0x").to_ascii_lowercase();
    format!("0x{:0>64}", bare)
}

/// Last 20 bytes of an indexed topic as a lowercase address
pub fn topic_address(topic: &str) -> Result<String, AppError> {
    let bare = topic.trim_start_matches("0x");
    if bare.len() != 64 {
        return Err(invalid(format!("topic is not 32 bytes: {}", topic)));
    }
    Ok(format!("0x{}", bare[24..].to_ascii_lowercase()))
}

/// Filter for Transfer logs of `contract` whose recipient is `recipient`
pub fn transfer_filter(contract: &str, recipient: &str) -> LogFilter {
    LogFilter {
        address: contract.to_ascii_lowercase(),
        topics: vec![
            Some(TRANSFER_TOPIC.to_string()),
            None,
            Some(address_topic(recipient)),
        ],
        from_block: None,
        to_block: None,
    }
}

/// Decode a Transfer log. Fails on non-Transfer logs and on values wider than 128 bits.
pub fn decode_transfer(log: &LogEntry) -> Result<TransferEvent, AppError> {
    if log.topics.len() != 3 || !log.topics[0].eq_ignore_ascii_case(TRANSFER_TOPIC) {
        return Err(invalid(format!(
            "log {} is not an ERC-20 Transfer",
            log.transaction_hash
        )));
    }

    Ok(TransferEvent {
        from: topic_address(&log.topics[1])?,
        to: topic_address(&log.topics[2])?,
        value: parse_word(&log.data)?,
        tx_hash: log.transaction_hash.clone(),
        block_number: log.block_number,
    })
}

/// Parse a 32-byte ABI word as u128
pub fn parse_word(data: &str) -> Result<u128, AppError> {
    let bytes = hex::decode(data.trim_start_matches("0x"))
        .map_err(|e| invalid(format!("bad hex data: {}", e)))?;
    if bytes.len() != 32 {
        return Err(invalid(format!("expected 32-byte word, got {}", bytes.len())));
    }
    if bytes[..16].iter().any(|b| *b != 0) {
        return Err(invalid("value exceeds 128 bits".to_string()));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&bytes[16..]);
    Ok(u128::from_be_bytes(low))
}

/// Parse a JSON-RPC hex quantity such as `0x1b4`
pub fn parse_quantity(value: &str) -> Result<u64, AppError> {
    let bare = value.trim_start_matches("0x");
    if bare.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(bare, 16).map_err(|e| invalid(format!("bad quantity {}: {}", value, e)))
}

/// Parse a JSON-RPC hex quantity that may exceed 64 bits
pub fn parse_quantity_u128(value: &str) -> Result<u128, AppError> {
    let bare = value.trim_start_matches("0x");
    if bare.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(bare, 16).map_err(|e| invalid(format!("bad quantity {}: {}", value, e)))
}

pub fn to_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

fn invalid(message: String) -> AppError {
    AppError::Blockchain(BlockchainError::InvalidResponse(message))
}
