//! EVM chain adapter
//!
//! Scans ERC-20 Transfer logs over an alloy HTTP provider, discovers
//! contract creation blocks by binary search over `eth_getCode` (with a
//! linear event-scan fallback for providers without historical state), and
//! derives fees from transaction receipts.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::{
    primitives::{Address, FixedBytes, B256, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::{BlockId, BlockNumberOrTag, BlockTransactionsKind, Filter},
    sol,
    transports::http::{Client, Http},
};
use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, warn};

use super::{
    check_cancelled, chunk_block_range, split_mint_burn, AdapterConfig, AdapterError,
    ChainAdapter, ChainType, MintBurnEvents, TransferEvent, TxFee, DEFAULT_EVM_DECIMALS,
    RPC_CALL_TIMEOUT_SECS,
};
use crate::services::rate_limiter::RateLimiterRegistry;

/// Transfer(address,address,uint256) event signature (keccak256)
const TRANSFER_EVENT_SIGNATURE: [u8; 32] = [
    0xdd, 0xf2, 0x52, 0xad, 0x1b, 0xe2, 0xc8, 0x9b,
    0x69, 0xc2, 0xb0, 0x68, 0xfc, 0x37, 0x8d, 0xaa,
    0x95, 0x2b, 0xa7, 0xf1, 0x63, 0xc4, 0xa1, 0x16,
    0x28, 0xf5, 0x5a, 0x4d, 0xf5, 0x23, 0xb3, 0xef,
];

/// Hard provider-side ceiling on one log query's block span
const MAX_LOG_SPAN: u64 = 10_000;

/// Window width for the linear creation-scan fallback
const CREATION_SCAN_WINDOW: u64 = 10_000;

/// Probe depth used to decide whether the endpoint serves historical state
const HISTORICAL_PROBE_DEPTH: u64 = 1_000;

/// Receipt lookups transiently 404 on some providers
const RECEIPT_MAX_RETRIES: u32 = 5;
const RECEIPT_RETRY_BASE_DELAY_MS: u64 = 500;

/// Bulk receipt fetches run in small parallel slices bounded by the limiter
const FEE_BATCH_SIZE: usize = 5;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function decimals() external view returns (uint8);
        function totalSupply() external view returns (uint256);
    }
}

/// Sort errors into the retryable and the hopeless by provider message.
fn classify_rpc_error(what: &str, message: &str) -> AdapterError {
    let lower = message.to_lowercase();
    if lower.contains("method not found")
        || lower.contains("not supported")
        || lower.contains("unsupported")
        || lower.contains("unauthorized")
        || lower.contains("forbidden")
    {
        AdapterError::RpcPermanent(format!("{}: {}", what, message))
    } else if lower.contains("timed out") || lower.contains("timeout") {
        AdapterError::RpcTimeout(format!("{}: {}", what, message))
    } else {
        AdapterError::RpcTransient(format!("{}: {}", what, message))
    }
}

/// Log-query failures that mean "narrow the span" rather than "retry".
fn classify_log_error(from: u64, to: u64, message: &str) -> AdapterError {
    let lower = message.to_lowercase();
    if lower.contains("more than")
        || lower.contains("too large")
        || lower.contains("block range")
        || lower.contains("response size")
        || lower.contains("limit exceeded")
    {
        AdapterError::RangeTooLarge { from, to }
    } else {
        classify_rpc_error("eth_getLogs", message)
    }
}

pub struct EvmAdapter {
    provider: RootProvider<Http<Client>>,
    config: AdapterConfig,
    limiter: Arc<RateLimiterRegistry>,
    shutdown: Arc<AtomicBool>,
    connected: AtomicBool,
}

impl EvmAdapter {
    pub fn new(
        url: &str,
        config: AdapterConfig,
        limiter: Arc<RateLimiterRegistry>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, AdapterError> {
        let parsed = url
            .parse()
            .map_err(|e| AdapterError::RpcPermanent(format!("Invalid RPC URL {}: {}", url, e)))?;
        let provider = ProviderBuilder::new().on_http(parsed);
        Ok(Self {
            provider,
            config,
            limiter,
            shutdown,
            connected: AtomicBool::new(false),
        })
    }

    /// Every RPC waits for an endpoint token first; no exemptions.
    async fn guard(&self) -> Result<(), AdapterError> {
        check_cancelled(&self.shutdown)?;
        self.limiter
            .acquire(self.config.endpoint_id, self.config.rate_per_second)
            .await?;
        Ok(())
    }

    fn ensure_connected(&self) -> Result<(), AdapterError> {
        if self.connected.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(AdapterError::NotConnected)
        }
    }

    fn parse_address(address: &str) -> Result<Address, AdapterError> {
        Address::from_str(address)
            .map_err(|e| AdapterError::RpcPermanent(format!("Invalid address {}: {}", address, e)))
    }

    async fn head_block(&self) -> Result<u64, AdapterError> {
        self.guard().await?;
        tokio::time::timeout(
            Duration::from_secs(RPC_CALL_TIMEOUT_SECS),
            self.provider.get_block_number(),
        )
        .await
        .map_err(|_| AdapterError::RpcTimeout("eth_blockNumber".into()))?
        .map_err(|e| classify_rpc_error("eth_blockNumber", &e.to_string()))
    }

    /// Whether the contract has code at the given block.
    async fn code_present_at(&self, address: Address, block: u64) -> Result<bool, AdapterError> {
        self.guard().await?;
        let code = tokio::time::timeout(
            Duration::from_secs(RPC_CALL_TIMEOUT_SECS),
            self.provider
                .get_code_at(address)
                .block_id(BlockId::Number(BlockNumberOrTag::Number(block))),
        )
        .await
        .map_err(|_| AdapterError::RpcTimeout("eth_getCode".into()))?
        .map_err(|e| classify_rpc_error("eth_getCode", &e.to_string()))?;
        Ok(!code.is_empty())
    }

    async fn fetch_logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<alloy::rpc::types::Log>, AdapterError> {
        self.guard().await?;
        let event_sig = FixedBytes::from(TRANSFER_EVENT_SIGNATURE);
        let filter = Filter::new()
            .address(address)
            .event_signature(event_sig)
            .from_block(BlockNumberOrTag::Number(from_block))
            .to_block(BlockNumberOrTag::Number(to_block));
        tokio::time::timeout(
            Duration::from_secs(RPC_CALL_TIMEOUT_SECS),
            self.provider.get_logs(&filter),
        )
        .await
        .map_err(|_| AdapterError::RpcTimeout("eth_getLogs".into()))?
        .map_err(|e| classify_log_error(from_block, to_block, &e.to_string()))
    }

    /// Binary search for the first block with code, given code is present at
    /// `head`. Probes cooperate with cancellation.
    async fn binary_search_creation(
        &self,
        address: Address,
        head: u64,
    ) -> Result<u64, AdapterError> {
        let mut low = 0u64;
        let mut high = head;
        while low < high {
            check_cancelled(&self.shutdown)?;
            let mid = low + (high - low) / 2;
            if self.code_present_at(address, mid).await? {
                high = mid;
            } else {
                low = mid + 1;
            }
        }
        Ok(low)
    }

    /// Forward scan of the Transfer filter in fixed windows for endpoints
    /// that refuse historical state; returns the block of the first event.
    async fn linear_scan_creation(
        &self,
        address: Address,
        head: u64,
    ) -> Result<Option<u64>, AdapterError> {
        for (start, end) in chunk_block_range(0, head, CREATION_SCAN_WINDOW) {
            check_cancelled(&self.shutdown)?;
            let logs = self.fetch_logs(address, start, end).await?;
            if let Some(block) = logs.iter().filter_map(|l| l.block_number).min() {
                return Ok(Some(block));
            }
        }
        Ok(None)
    }

    async fn receipt_fee(&self, tx_hash: B256) -> Result<U256, AdapterError> {
        let mut delay = Duration::from_millis(RECEIPT_RETRY_BASE_DELAY_MS);
        let mut last_err = AdapterError::ReceiptMissing(format!("{:?}", tx_hash));

        for attempt in 0..RECEIPT_MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            self.guard().await?;
            let lookup = tokio::time::timeout(
                Duration::from_secs(RPC_CALL_TIMEOUT_SECS),
                self.provider.get_transaction_receipt(tx_hash),
            )
            .await;

            match lookup {
                Err(_) => {
                    last_err = AdapterError::RpcTimeout("eth_getTransactionReceipt".into());
                }
                Ok(Err(e)) => {
                    let classified =
                        classify_rpc_error("eth_getTransactionReceipt", &e.to_string());
                    if !classified.is_transient() {
                        return Err(classified);
                    }
                    last_err = classified;
                }
                Ok(Ok(None)) => {
                    last_err = AdapterError::ReceiptMissing(format!("{:?}", tx_hash));
                }
                Ok(Ok(Some(receipt))) => {
                    let fee = U256::from(receipt.gas_used)
                        * U256::from(receipt.effective_gas_price);
                    return Ok(fee);
                }
            }
        }
        Err(last_err)
    }
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    fn chain_type(&self) -> ChainType {
        ChainType::Evm
    }

    async fn connect(&self) -> Result<(), AdapterError> {
        self.guard().await?;
        let chain_id = tokio::time::timeout(
            Duration::from_secs(RPC_CALL_TIMEOUT_SECS),
            self.provider.get_chain_id(),
        )
        .await
        .map_err(|_| AdapterError::RpcTimeout("eth_chainId".into()))?
        .map_err(|e| classify_rpc_error("eth_chainId", &e.to_string()))?;
        debug!(chain_id, "EVM adapter connected");
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn current_block(&self) -> Result<u64, AdapterError> {
        self.ensure_connected()?;
        self.head_block().await
    }

    async fn block_timestamp(&self, number: u64) -> Result<i64, AdapterError> {
        self.ensure_connected()?;
        self.guard().await?;
        let block = tokio::time::timeout(
            Duration::from_secs(RPC_CALL_TIMEOUT_SECS),
            self.provider.get_block_by_number(
                BlockNumberOrTag::Number(number),
                BlockTransactionsKind::Hashes.into(),
            ),
        )
        .await
        .map_err(|_| AdapterError::RpcTimeout("eth_getBlockByNumber".into()))?
        .map_err(|e| classify_rpc_error("eth_getBlockByNumber", &e.to_string()))?;

        match block {
            Some(block) => Ok(block.header.timestamp as i64),
            None => Err(AdapterError::RpcTransient(format!(
                "Block {} not found",
                number
            ))),
        }
    }

    async fn creation_block(&self, address: &str) -> Result<Option<u64>, AdapterError> {
        self.ensure_connected()?;
        let address = Self::parse_address(address)?;
        let head = self.head_block().await?;

        if !self.code_present_at(address, head).await? {
            return Ok(None);
        }

        // Endpoints without archive state error on deep getCode probes;
        // detect that up front and scan the event filter instead.
        if head > HISTORICAL_PROBE_DEPTH {
            let probe = self
                .code_present_at(address, head - HISTORICAL_PROBE_DEPTH)
                .await;
            if probe.is_err() {
                warn!(
                    endpoint_id = self.config.endpoint_id,
                    "Historical state unavailable, falling back to linear creation scan"
                );
                return self.linear_scan_creation(address, head).await;
            }
        }

        match self.binary_search_creation(address, head).await {
            Ok(block) => Ok(Some(block)),
            Err(AdapterError::Cancelled) => Err(AdapterError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Creation binary search failed, trying linear scan");
                self.linear_scan_creation(address, head).await
            }
        }
    }

    async fn token_decimals(&self, address: &str) -> Result<u32, AdapterError> {
        self.ensure_connected()?;
        let address = Self::parse_address(address)?;
        self.guard().await?;
        let token = IERC20::new(address, &self.provider);
        let call = tokio::time::timeout(
            Duration::from_secs(RPC_CALL_TIMEOUT_SECS),
            token.decimals().call(),
        )
        .await;
        match call {
            Ok(Ok(result)) => Ok(result._0 as u32),
            Ok(Err(e)) => {
                warn!(error = %e, "decimals() call failed, using default");
                Ok(DEFAULT_EVM_DECIMALS)
            }
            Err(_) => Ok(DEFAULT_EVM_DECIMALS),
        }
    }

    async fn total_supply(&self, address: &str) -> Result<U256, AdapterError> {
        self.ensure_connected()?;
        let address = Self::parse_address(address)?;
        self.guard().await?;
        let token = IERC20::new(address, &self.provider);
        let result = tokio::time::timeout(
            Duration::from_secs(RPC_CALL_TIMEOUT_SECS),
            token.totalSupply().call(),
        )
        .await
        .map_err(|_| AdapterError::RpcTimeout("totalSupply".into()))?
        .map_err(|e| classify_rpc_error("totalSupply", &e.to_string()))?;
        Ok(result._0)
    }

    async fn transfer_events(
        &self,
        address: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferEvent>, AdapterError> {
        self.ensure_connected()?;
        let address = Self::parse_address(address)?;
        let span = self.config.max_blocks_per_query.clamp(1, MAX_LOG_SPAN);

        // (block, log index, event) triples, timestamps filled per block
        let mut raw: Vec<(u64, u64, TransferEvent)> = Vec::new();
        let mut timestamps: HashMap<u64, i64> = HashMap::new();

        for (start, end) in chunk_block_range(from_block, to_block, span) {
            check_cancelled(&self.shutdown)?;
            let logs = self.fetch_logs(address, start, end).await?;

            for log in logs {
                let topics = log.inner.topics();
                // ERC-20 Transfer carries exactly 3 topics; 4 is ERC-721
                if topics.len() != 3 {
                    continue;
                }
                let (Some(block_number), Some(tx_hash)) =
                    (log.block_number, log.transaction_hash)
                else {
                    continue;
                };
                let from = Address::from_slice(&topics[1][12..32]);
                let to = Address::from_slice(&topics[2][12..32]);
                let data = &log.inner.data.data;
                let value = if data.len() >= 32 {
                    U256::from_be_slice(&data[..32])
                } else {
                    U256::from_be_slice(data)
                };
                raw.push((
                    block_number,
                    log.log_index.unwrap_or(0),
                    TransferEvent {
                        block_number,
                        tx_hash: format!("{:?}", tx_hash),
                        from: format!("{:?}", from),
                        to: format!("{:?}", to),
                        value,
                        timestamp: 0,
                    },
                ));
            }
        }

        // One timestamp lookup per distinct block
        let mut blocks: Vec<u64> = raw.iter().map(|(b, _, _)| *b).collect();
        blocks.sort_unstable();
        blocks.dedup();
        for block in blocks {
            check_cancelled(&self.shutdown)?;
            let ts = self.block_timestamp(block).await?;
            timestamps.insert(block, ts);
        }

        raw.sort_by_key(|(block, index, _)| (*block, *index));
        Ok(raw
            .into_iter()
            .map(|(block, _, mut event)| {
                event.timestamp = timestamps.get(&block).copied().unwrap_or(0);
                event
            })
            .collect())
    }

    async fn mint_burn_events(
        &self,
        address: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<MintBurnEvents, AdapterError> {
        let transfers = self.transfer_events(address, from_block, to_block).await?;
        Ok(split_mint_burn(ChainType::Evm, &transfers))
    }

    async fn transaction_fee(&self, tx_hash: &str) -> Result<TxFee, AdapterError> {
        self.ensure_connected()?;
        let hash = B256::from_str(tx_hash)
            .map_err(|e| AdapterError::RpcPermanent(format!("Invalid tx hash {}: {}", tx_hash, e)))?;
        let fee_native = self.receipt_fee(hash).await?;
        Ok(TxFee {
            fee_native,
            fee_usd: None,
        })
    }

    async fn transaction_fees(
        &self,
        tx_hashes: &[String],
    ) -> Result<HashMap<String, TxFee>, AdapterError> {
        self.ensure_connected()?;
        let mut fees = HashMap::with_capacity(tx_hashes.len());

        for slice in tx_hashes.chunks(FEE_BATCH_SIZE) {
            check_cancelled(&self.shutdown)?;
            let lookups = slice.iter().map(|tx| async move {
                let fee = self.transaction_fee(tx).await;
                (tx.clone(), fee)
            });
            for (tx, result) in join_all(lookups).await {
                match result {
                    Ok(fee) => {
                        fees.insert(tx, fee);
                    }
                    Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
                    Err(e) => {
                        // A lost receipt degrades that one fee to zero
                        warn!(tx = %tx, error = %e, "Fee lookup failed, recording zero");
                        fees.insert(tx, TxFee::zero());
                    }
                }
            }
        }
        Ok(fees)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::keccak256;

    #[test]
    fn test_transfer_signature_matches_keccak() {
        let computed = keccak256("Transfer(address,address,uint256)".as_bytes());
        assert_eq!(computed.as_slice(), &TRANSFER_EVENT_SIGNATURE);
    }

    #[test]
    fn test_classify_rpc_error() {
        assert!(matches!(
            classify_rpc_error("eth_call", "the method eth_call method not found"),
            AdapterError::RpcPermanent(_)
        ));
        assert!(matches!(
            classify_rpc_error("eth_call", "connection reset by peer"),
            AdapterError::RpcTransient(_)
        ));
        assert!(matches!(
            classify_rpc_error("eth_call", "request timed out"),
            AdapterError::RpcTimeout(_)
        ));
    }

    #[test]
    fn test_classify_log_error_detects_range() {
        assert!(matches!(
            classify_log_error(0, 50_000, "query returned more than 10000 results"),
            AdapterError::RangeTooLarge {
                from: 0,
                to: 50_000
            }
        ));
        assert!(matches!(
            classify_log_error(0, 100, "internal error"),
            AdapterError::RpcTransient(_)
        ));
    }
}
