//! Tron chain adapter
//!
//! Talks to the `eth_`-compatible JSON-RPC surface TronGrid-style endpoints
//! expose. TRC-20 transfers reuse the ERC-20 Transfer topic; addresses are
//! carried in Tron's 41-prefixed hex rendering. Tron cannot reveal a
//! contract's creation block over this surface, so discovery reports
//! unknown and operators may supply it manually.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy::primitives::U256;
use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::jsonrpc::{parse_hex_u64, JsonRpcClient};
use super::{
    check_cancelled, chunk_block_range, split_mint_burn, AdapterConfig, AdapterError,
    ChainAdapter, ChainType, MintBurnEvents, TransferEvent, TxFee, DEFAULT_TRON_DECIMALS,
    TRON_ZERO_ADDRESS_BASE58,
};
use crate::services::rate_limiter::RateLimiterRegistry;

/// Transfer(address,address,uint256) topic, shared with EVM chains
const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// selector decimals()
const SELECTOR_DECIMALS: &str = "0x313ce567";
/// selector totalSupply()
const SELECTOR_TOTAL_SUPPLY: &str = "0x18160ddd";

const MAX_LOG_SPAN: u64 = 10_000;
const RECEIPT_MAX_RETRIES: u32 = 5;
const RECEIPT_RETRY_BASE_DELAY_MS: u64 = 500;
const FEE_BATCH_SIZE: usize = 5;

/// Convert a configured Tron address (41-hex or 0x-hex) into the 0x form
/// the JSON-RPC surface expects. Base58 addresses are only recognized for
/// the null-address constant; operators configure contracts in hex.
fn to_rpc_address(address: &str) -> Result<String, AdapterError> {
    if address == TRON_ZERO_ADDRESS_BASE58 {
        return Ok("0x0000000000000000000000000000000000000000".to_string());
    }
    let lower = address.to_lowercase();
    if let Some(hex) = lower.strip_prefix("0x") {
        if hex.len() == 40 && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Ok(lower);
        }
    }
    if let Some(hex) = lower.strip_prefix("41") {
        if hex.len() == 40 && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Ok(format!("0x{}", hex));
        }
    }
    Err(AdapterError::RpcPermanent(format!(
        "Invalid Tron address: {}",
        address
    )))
}

/// Tron-native hex rendering (41-prefixed) of a 32-byte topic's address.
fn topic_to_tron_address(topic: &str) -> Option<String> {
    let hex = topic.strip_prefix("0x")?;
    if hex.len() != 64 {
        return None;
    }
    Some(format!("41{}", &hex[24..]))
}

fn parse_hex_u256(value: &Value) -> Result<U256, AdapterError> {
    let s = value
        .as_str()
        .ok_or_else(|| AdapterError::RpcTransient("expected hex string".into()))?;
    U256::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| AdapterError::RpcTransient(format!("bad hex value {}: {}", s, e)))
}

pub struct TronAdapter {
    rpc: JsonRpcClient,
    config: AdapterConfig,
    limiter: Arc<RateLimiterRegistry>,
    shutdown: Arc<AtomicBool>,
    connected: AtomicBool,
}

impl TronAdapter {
    pub fn new(
        url: &str,
        config: AdapterConfig,
        limiter: Arc<RateLimiterRegistry>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            rpc: JsonRpcClient::new(url),
            config,
            limiter,
            shutdown,
            connected: AtomicBool::new(false),
        }
    }

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

    async fn call(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.guard().await?;
        self.rpc.call(method, params).await
    }

    async fn eth_call(&self, to: &str, data: &str) -> Result<Value, AdapterError> {
        self.call(
            "eth_call",
            json!([{ "to": to, "data": data }, "latest"]),
        )
        .await
    }

    async fn block_timestamp_inner(&self, number: u64) -> Result<i64, AdapterError> {
        let block = self
            .call(
                "eth_getBlockByNumber",
                json!([format!("0x{:x}", number), false]),
            )
            .await?;
        if block.is_null() {
            return Err(AdapterError::RpcTransient(format!(
                "Block {} not found",
                number
            )));
        }
        let ts = block
            .get("timestamp")
            .ok_or_else(|| AdapterError::RpcTransient("block without timestamp".into()))?;
        Ok(parse_hex_u64(ts)? as i64)
    }

    async fn receipt_fee(&self, tx_hash: &str) -> Result<U256, AdapterError> {
        let mut delay = std::time::Duration::from_millis(RECEIPT_RETRY_BASE_DELAY_MS);
        let mut last_err = AdapterError::ReceiptMissing(tx_hash.to_string());

        for attempt in 0..RECEIPT_MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            match self
                .call("eth_getTransactionReceipt", json!([tx_hash]))
                .await
            {
                Ok(Value::Null) => {
                    last_err = AdapterError::ReceiptMissing(tx_hash.to_string());
                }
                Ok(receipt) => {
                    let gas_used = receipt
                        .get("gasUsed")
                        .map(parse_hex_u256)
                        .transpose()?
                        .unwrap_or(U256::ZERO);
                    let gas_price = receipt
                        .get("effectiveGasPrice")
                        .or_else(|| receipt.get("gasPrice"))
                        .map(parse_hex_u256)
                        .transpose()?
                        .unwrap_or(U256::ZERO);
                    return Ok(gas_used * gas_price);
                }
                Err(e) if e.is_transient() => last_err = e,
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }
}

#[async_trait]
impl ChainAdapter for TronAdapter {
    fn chain_type(&self) -> ChainType {
        ChainType::Tron
    }

    async fn connect(&self) -> Result<(), AdapterError> {
        let chain_id = self.call("eth_chainId", json!([])).await?;
        debug!(chain_id = %chain_id, url = self.rpc.url(), "Tron adapter connected");
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
        let result = self.call("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&result)
    }

    async fn block_timestamp(&self, number: u64) -> Result<i64, AdapterError> {
        self.ensure_connected()?;
        self.block_timestamp_inner(number).await
    }

    async fn creation_block(&self, _address: &str) -> Result<Option<u64>, AdapterError> {
        self.ensure_connected()?;
        // Not discoverable over the eth-compat surface
        Ok(None)
    }

    async fn token_decimals(&self, address: &str) -> Result<u32, AdapterError> {
        self.ensure_connected()?;
        let to = to_rpc_address(address)?;
        match self.eth_call(&to, SELECTOR_DECIMALS).await {
            Ok(result) => match parse_hex_u256(&result) {
                Ok(value) => Ok(value.try_into().unwrap_or(DEFAULT_TRON_DECIMALS)),
                Err(_) => Ok(DEFAULT_TRON_DECIMALS),
            },
            Err(e) => {
                warn!(error = %e, "decimals() call failed, using default");
                Ok(DEFAULT_TRON_DECIMALS)
            }
        }
    }

    async fn total_supply(&self, address: &str) -> Result<U256, AdapterError> {
        self.ensure_connected()?;
        let to = to_rpc_address(address)?;
        let result = self.eth_call(&to, SELECTOR_TOTAL_SUPPLY).await?;
        parse_hex_u256(&result)
    }

    async fn transfer_events(
        &self,
        address: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferEvent>, AdapterError> {
        self.ensure_connected()?;
        let rpc_address = to_rpc_address(address)?;
        let span = self.config.max_blocks_per_query.clamp(1, MAX_LOG_SPAN);

        let mut raw: Vec<(u64, u64, TransferEvent)> = Vec::new();

        for (start, end) in chunk_block_range(from_block, to_block, span) {
            check_cancelled(&self.shutdown)?;
            let logs = self
                .call(
                    "eth_getLogs",
                    json!([{
                        "address": rpc_address,
                        "topics": [TRANSFER_TOPIC],
                        "fromBlock": format!("0x{:x}", start),
                        "toBlock": format!("0x{:x}", end),
                    }]),
                )
                .await?;

            let Some(entries) = logs.as_array() else {
                continue;
            };
            for log in entries {
                let topics: Vec<&str> = log
                    .get("topics")
                    .and_then(|t| t.as_array())
                    .map(|t| t.iter().filter_map(|v| v.as_str()).collect())
                    .unwrap_or_default();
                if topics.len() != 3 {
                    continue;
                }
                let (Some(from), Some(to)) = (
                    topic_to_tron_address(topics[1]),
                    topic_to_tron_address(topics[2]),
                ) else {
                    continue;
                };
                let Some(block_number) = log.get("blockNumber").and_then(|v| parse_hex_u64(v).ok())
                else {
                    continue;
                };
                let Some(tx_hash) = log.get("transactionHash").and_then(|v| v.as_str()) else {
                    continue;
                };
                let value = log
                    .get("data")
                    .and_then(|d| parse_hex_u256(d).ok())
                    .unwrap_or(U256::ZERO);
                let log_index = log
                    .get("logIndex")
                    .and_then(|v| parse_hex_u64(v).ok())
                    .unwrap_or(0);

                raw.push((
                    block_number,
                    log_index,
                    TransferEvent {
                        block_number,
                        tx_hash: tx_hash.to_string(),
                        from,
                        to,
                        value,
                        timestamp: 0,
                    },
                ));
            }
        }

        let mut blocks: Vec<u64> = raw.iter().map(|(b, _, _)| *b).collect();
        blocks.sort_unstable();
        blocks.dedup();
        let mut timestamps: HashMap<u64, i64> = HashMap::new();
        for block in blocks {
            check_cancelled(&self.shutdown)?;
            timestamps.insert(block, self.block_timestamp_inner(block).await?);
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
        Ok(split_mint_burn(ChainType::Tron, &transfers))
    }

    async fn transaction_fee(&self, tx_hash: &str) -> Result<TxFee, AdapterError> {
        self.ensure_connected()?;
        let fee_native = self.receipt_fee(tx_hash).await?;
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
    use crate::adapters::TRON_ZERO_ADDRESS_HEX;

    #[test]
    fn test_to_rpc_address_accepts_hex_forms() {
        assert_eq!(
            to_rpc_address("41a614f803b6fd780986a42c78ec9c7f77e6ded13c").unwrap(),
            "0xa614f803b6fd780986a42c78ec9c7f77e6ded13c"
        );
        assert_eq!(
            to_rpc_address("0xA614F803B6FD780986A42C78EC9C7F77E6DED13C").unwrap(),
            "0xa614f803b6fd780986a42c78ec9c7f77e6ded13c"
        );
        assert!(to_rpc_address("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t").is_err());
    }

    #[test]
    fn test_zero_address_round_trips() {
        let rpc = to_rpc_address(TRON_ZERO_ADDRESS_BASE58).unwrap();
        assert_eq!(rpc, "0x0000000000000000000000000000000000000000");
        let topic = "0x0000000000000000000000000000000000000000000000000000000000000000";
        assert_eq!(
            topic_to_tron_address(topic).unwrap(),
            TRON_ZERO_ADDRESS_HEX
        );
    }

    #[test]
    fn test_topic_to_tron_address() {
        let topic = "0x000000000000000000000000a614f803b6fd780986a42c78ec9c7f77e6ded13c";
        assert_eq!(
            topic_to_tron_address(topic).unwrap(),
            "41a614f803b6fd780986a42c78ec9c7f77e6ded13c"
        );
        assert!(topic_to_tron_address("0x1234").is_none());
    }
}
