//! Chain adapters
//!
//! A uniform read interface over one chain's RPC: head/block lookups,
//! paginated transfer-event scans, creation-block discovery, decimals/supply
//! reads and receipt-based fee lookups. One adapter variant per chain family
//! behind the `ChainAdapter` trait; every RPC a variant issues first awaits
//! a token from the shared endpoint rate limiter, so callers never deal
//! with limits themselves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy::primitives::U256;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::services::rate_limiter::{RateLimitError, RateLimiterRegistry};

pub mod evm;
pub mod jsonrpc;
pub mod solana;
pub mod tron;

/// Hard per-RPC-call timeout in seconds
pub const RPC_CALL_TIMEOUT_SECS: u64 = 60;

/// Decimals fallback when the token refuses the decimals call
pub const DEFAULT_EVM_DECIMALS: u32 = 18;
pub const DEFAULT_TRON_DECIMALS: u32 = 6;
pub const DEFAULT_SOLANA_DECIMALS: u32 = 6;

/// 20-byte all-zero address on EVM chains
pub const EVM_ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";
/// Tron's null address, base58 and 41-prefixed hex renderings
pub const TRON_ZERO_ADDRESS_BASE58: &str = "T9yD14Nj9j7xAB4dbGeiX9h8unkKHxuWwb";
pub const TRON_ZERO_ADDRESS_HEX: &str = "410000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainType {
    Evm,
    Tron,
    Solana,
}

impl ChainType {
    pub fn parse(s: &str) -> Result<Self, AdapterError> {
        match s {
            "evm" => Ok(ChainType::Evm),
            "tron" => Ok(ChainType::Tron),
            "solana" => Ok(ChainType::Solana),
            other => Err(AdapterError::ChainUnsupported(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainType::Evm => "evm",
            ChainType::Tron => "tron",
            ChainType::Solana => "solana",
        }
    }
}

/// One transfer-family event, ordered by (block, intra-block index) within
/// any scan result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub block_number: u64,
    pub tx_hash: String,
    pub from: String,
    pub to: String,
    pub value: U256,
    /// Block timestamp, seconds since epoch
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default)]
pub struct MintBurnEvents {
    pub mints: Vec<TransferEvent>,
    pub burns: Vec<TransferEvent>,
}

#[derive(Debug, Clone)]
pub struct TxFee {
    /// Native-chain base units (wei-equivalent)
    pub fee_native: U256,
    /// Reserved for a future price oracle; always None in this core
    pub fee_usd: Option<Decimal>,
}

impl TxFee {
    pub fn zero() -> Self {
        Self {
            fee_native: U256::ZERO,
            fee_usd: None,
        }
    }
}

#[derive(Debug)]
pub enum AdapterError {
    NotConnected,
    /// The provider refused the requested log span; callers may halve and retry
    RangeTooLarge { from: u64, to: u64 },
    RpcTimeout(String),
    RpcTransient(String),
    RpcPermanent(String),
    ReceiptMissing(String),
    RateLimitStalled,
    ChainUnsupported(String),
    Cancelled,
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterError::NotConnected => write!(f, "Adapter is not connected"),
            AdapterError::RangeTooLarge { from, to } => {
                write!(f, "Block range {}-{} too large for provider", from, to)
            }
            AdapterError::RpcTimeout(msg) => write!(f, "RPC timeout: {}", msg),
            AdapterError::RpcTransient(msg) => write!(f, "Transient RPC error: {}", msg),
            AdapterError::RpcPermanent(msg) => write!(f, "Permanent RPC error: {}", msg),
            AdapterError::ReceiptMissing(tx) => write!(f, "Receipt not found for {}", tx),
            AdapterError::RateLimitStalled => write!(f, "Rate limiter stalled"),
            AdapterError::ChainUnsupported(chain) => {
                write!(f, "Unsupported chain type: {}", chain)
            }
            AdapterError::Cancelled => write!(f, "Operation cancelled by shutdown"),
        }
    }
}

impl std::error::Error for AdapterError {}

impl AdapterError {
    /// Transient errors are retried by the adapter and, past its budget, by
    /// the job queue; permanent ones put the contract into error state.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AdapterError::RpcTimeout(_)
                | AdapterError::RpcTransient(_)
                | AdapterError::ReceiptMissing(_)
                | AdapterError::RateLimitStalled
        )
    }
}

impl From<RateLimitError> for AdapterError {
    fn from(e: RateLimitError) -> Self {
        match e {
            RateLimitError::Stalled => AdapterError::RateLimitStalled,
            RateLimitError::Redis(msg) => AdapterError::RpcTransient(msg),
        }
    }
}

/// Endpoint-scoped settings every adapter carries.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub endpoint_id: i32,
    pub rate_per_second: f64,
    pub max_blocks_per_query: u64,
}

#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain_type(&self) -> ChainType;

    /// Probe the endpoint and mark the adapter connected. The probe itself
    /// counts against the endpoint budget.
    async fn connect(&self) -> Result<(), AdapterError>;
    async fn disconnect(&self);
    fn is_connected(&self) -> bool;

    async fn current_block(&self) -> Result<u64, AdapterError>;
    async fn block_timestamp(&self, number: u64) -> Result<i64, AdapterError>;

    /// Smallest block with the contract's code present, or None when the
    /// chain cannot reveal it.
    async fn creation_block(&self, address: &str) -> Result<Option<u64>, AdapterError>;

    async fn token_decimals(&self, address: &str) -> Result<u32, AdapterError>;
    async fn total_supply(&self, address: &str) -> Result<U256, AdapterError>;

    async fn transfer_events(
        &self,
        address: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferEvent>, AdapterError>;

    async fn mint_burn_events(
        &self,
        address: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<MintBurnEvents, AdapterError>;

    async fn transaction_fee(&self, tx_hash: &str) -> Result<TxFee, AdapterError>;

    /// Bulk fee lookup. Hashes whose receipts stay missing after retries map
    /// to a zero fee; the call never fails the whole batch over one receipt.
    async fn transaction_fees(
        &self,
        tx_hashes: &[String],
    ) -> Result<HashMap<String, TxFee>, AdapterError>;
}

/// Build the adapter variant for a chain type.
pub fn new_adapter(
    chain_type: ChainType,
    url: &str,
    config: AdapterConfig,
    limiter: Arc<RateLimiterRegistry>,
    shutdown: Arc<AtomicBool>,
) -> Result<Box<dyn ChainAdapter>, AdapterError> {
    match chain_type {
        ChainType::Evm => Ok(Box::new(evm::EvmAdapter::new(
            url, config, limiter, shutdown,
        )?)),
        ChainType::Tron => Ok(Box::new(tron::TronAdapter::new(
            url, config, limiter, shutdown,
        ))),
        ChainType::Solana => Ok(Box::new(solana::SolanaAdapter::new(
            url, config, limiter, shutdown,
        ))),
    }
}

/// Whether `address` is the chain's zero/null address. Solana has no
/// zero-address convention; mints and burns are explicit instructions.
pub fn is_zero_address(chain_type: ChainType, address: &str) -> bool {
    match chain_type {
        ChainType::Evm => {
            let hex = address.strip_prefix("0x").unwrap_or(address);
            hex.len() == 40 && hex.bytes().all(|b| b == b'0')
        }
        ChainType::Tron => {
            address == TRON_ZERO_ADDRESS_BASE58
                || address.eq_ignore_ascii_case(TRON_ZERO_ADDRESS_HEX)
                || is_zero_address(ChainType::Evm, address)
        }
        ChainType::Solana => false,
    }
}

/// Split a transfer stream into mints and burns by the zero-address rule.
pub fn split_mint_burn(chain_type: ChainType, events: &[TransferEvent]) -> MintBurnEvents {
    let mut out = MintBurnEvents::default();
    for event in events {
        if is_zero_address(chain_type, &event.from) {
            out.mints.push(event.clone());
        } else if is_zero_address(chain_type, &event.to) {
            out.burns.push(event.clone());
        }
    }
    out
}

/// Chunk an inclusive block range into spans of at most `max_span` blocks.
pub fn chunk_block_range(from: u64, to: u64, max_span: u64) -> Vec<(u64, u64)> {
    let mut spans = Vec::new();
    if to < from || max_span == 0 {
        return spans;
    }
    let mut start = from;
    while start <= to {
        let end = to.min(start + max_span - 1);
        spans.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    spans
}

/// Shared shutdown check for long-running adapter loops.
pub(crate) fn check_cancelled(shutdown: &AtomicBool) -> Result<(), AdapterError> {
    if shutdown.load(Ordering::Relaxed) {
        Err(AdapterError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(from: &str, to: &str, value: u64) -> TransferEvent {
        TransferEvent {
            block_number: 1,
            tx_hash: "0xabc".into(),
            from: from.into(),
            to: to.into(),
            value: U256::from(value),
            timestamp: 0,
        }
    }

    #[test]
    fn test_zero_address_per_chain() {
        assert!(is_zero_address(ChainType::Evm, EVM_ZERO_ADDRESS));
        assert!(is_zero_address(
            ChainType::Evm,
            "0x0000000000000000000000000000000000000000"
        ));
        assert!(!is_zero_address(
            ChainType::Evm,
            "0x00000000000000000000000000000000000000aa"
        ));
        assert!(is_zero_address(ChainType::Tron, TRON_ZERO_ADDRESS_BASE58));
        assert!(is_zero_address(ChainType::Tron, TRON_ZERO_ADDRESS_HEX));
        assert!(!is_zero_address(ChainType::Solana, EVM_ZERO_ADDRESS));
    }

    #[test]
    fn test_split_mint_burn_classification() {
        let events = vec![
            event(EVM_ZERO_ADDRESS, "0xaa", 100),
            event("0xaa", "0xbb", 50),
            event("0xbb", EVM_ZERO_ADDRESS, 25),
        ];
        let split = split_mint_burn(ChainType::Evm, &events);
        assert_eq!(split.mints.len(), 1);
        assert_eq!(split.mints[0].to, "0xaa");
        assert_eq!(split.mints[0].value, U256::from(100u64));
        assert_eq!(split.burns.len(), 1);
        assert_eq!(split.burns[0].from, "0xbb");
    }

    #[test]
    fn test_chunk_block_range_bounds() {
        assert_eq!(
            chunk_block_range(0, 25_000, 10_000),
            vec![(0, 9_999), (10_000, 19_999), (20_000, 25_000)]
        );
        assert_eq!(chunk_block_range(5, 5, 10_000), vec![(5, 5)]);
        assert!(chunk_block_range(10, 5, 10_000).is_empty());
    }

    #[test]
    fn test_chain_type_parse() {
        assert_eq!(ChainType::parse("evm").unwrap(), ChainType::Evm);
        assert_eq!(ChainType::parse("tron").unwrap(), ChainType::Tron);
        assert_eq!(ChainType::parse("solana").unwrap(), ChainType::Solana);
        assert!(matches!(
            ChainType::parse("bitcoin"),
            Err(AdapterError::ChainUnsupported(_))
        ));
    }

    #[test]
    fn test_transient_classification() {
        assert!(AdapterError::RpcTimeout("t".into()).is_transient());
        assert!(AdapterError::RateLimitStalled.is_transient());
        assert!(!AdapterError::RpcPermanent("p".into()).is_transient());
        assert!(!AdapterError::ChainUnsupported("x".into()).is_transient());
    }
}
