//! Solana chain adapter
//!
//! SPL token activity has no zero-address convention: mints and burns are
//! explicit `mintTo`/`burn` (and checked variants) instructions. The scan
//! walks signatures touching the mint account, fetches each transaction
//! with `jsonParsed` encoding and decodes spl-token instructions, resolving
//! token accounts to owners through the pre/post token balances.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy::primitives::U256;
use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::jsonrpc::JsonRpcClient;
use super::{
    check_cancelled, AdapterConfig, AdapterError, ChainAdapter, ChainType, MintBurnEvents,
    TransferEvent, TxFee, DEFAULT_SOLANA_DECIMALS,
};
use crate::services::rate_limiter::RateLimiterRegistry;

/// Signature pagination width for getSignaturesForAddress
const SIGNATURE_PAGE_LIMIT: u64 = 1_000;

const TX_MAX_RETRIES: u32 = 5;
const TX_RETRY_BASE_DELAY_MS: u64 = 500;
const FEE_BATCH_SIZE: usize = 5;

/// Decoded spl-token events of one transaction
#[derive(Debug, Default)]
struct TokenEvents {
    transfers: Vec<TransferEvent>,
    mints: Vec<TransferEvent>,
    burns: Vec<TransferEvent>,
}

/// Decode the spl-token instructions of a `jsonParsed` transaction that
/// concern `mint`. Owners are preferred over raw token accounts where the
/// balance metadata reveals them.
fn decode_token_events(tx: &Value, mint: &str, slot: u64, signature: &str) -> TokenEvents {
    let mut out = TokenEvents::default();
    let timestamp = tx.get("blockTime").and_then(|t| t.as_i64()).unwrap_or(0);
    let meta = match tx.get("meta") {
        Some(meta) if meta.get("err").map(Value::is_null).unwrap_or(false) => meta,
        _ => return out,
    };

    // token account -> owner for accounts of our mint
    let mut owners: HashMap<String, String> = HashMap::new();
    let mut mint_accounts: Vec<String> = Vec::new();
    let account_keys: Vec<String> = tx
        .pointer("/transaction/message/accountKeys")
        .and_then(|k| k.as_array())
        .map(|keys| {
            keys.iter()
                .filter_map(|k| {
                    k.as_str()
                        .map(str::to_string)
                        .or_else(|| k.get("pubkey").and_then(|p| p.as_str()).map(str::to_string))
                })
                .collect()
        })
        .unwrap_or_default();
    for side in ["preTokenBalances", "postTokenBalances"] {
        if let Some(balances) = meta.get(side).and_then(|b| b.as_array()) {
            for balance in balances {
                if balance.get("mint").and_then(|m| m.as_str()) != Some(mint) {
                    continue;
                }
                let Some(index) = balance.get("accountIndex").and_then(|i| i.as_u64()) else {
                    continue;
                };
                let Some(account) = account_keys.get(index as usize) else {
                    continue;
                };
                if !mint_accounts.contains(account) {
                    mint_accounts.push(account.clone());
                }
                if let Some(owner) = balance.get("owner").and_then(|o| o.as_str()) {
                    owners.insert(account.clone(), owner.to_string());
                }
            }
        }
    }
    let resolve = |account: &str| -> String {
        owners
            .get(account)
            .cloned()
            .unwrap_or_else(|| account.to_string())
    };

    // Outer instructions plus every inner instruction set
    let mut instructions: Vec<&Value> = Vec::new();
    if let Some(outer) = tx
        .pointer("/transaction/message/instructions")
        .and_then(|i| i.as_array())
    {
        instructions.extend(outer.iter());
    }
    if let Some(inner_sets) = meta.get("innerInstructions").and_then(|i| i.as_array()) {
        for set in inner_sets {
            if let Some(inner) = set.get("instructions").and_then(|i| i.as_array()) {
                instructions.extend(inner.iter());
            }
        }
    }

    for instruction in instructions {
        if instruction.get("program").and_then(|p| p.as_str()) != Some("spl-token") {
            continue;
        }
        let Some(parsed) = instruction.get("parsed") else {
            continue;
        };
        let Some(kind) = parsed.get("type").and_then(|t| t.as_str()) else {
            continue;
        };
        let Some(info) = parsed.get("info") else {
            continue;
        };

        let amount = info
            .get("amount")
            .and_then(|a| a.as_str())
            .or_else(|| {
                info.get("tokenAmount")
                    .and_then(|t| t.get("amount"))
                    .and_then(|a| a.as_str())
            })
            .and_then(|a| U256::from_str_radix(a, 10).ok())
            .unwrap_or(U256::ZERO);

        match kind {
            "transfer" | "transferChecked" => {
                // Checked transfers name the mint; plain ones are matched
                // through the balance-derived token-account set
                if kind == "transferChecked" {
                    if info.get("mint").and_then(|m| m.as_str()) != Some(mint) {
                        continue;
                    }
                } else {
                    let touches_mint = [info.get("source"), info.get("destination")]
                        .iter()
                        .filter_map(|a| a.and_then(|v| v.as_str()))
                        .any(|account| mint_accounts.iter().any(|m| m == account));
                    if !touches_mint {
                        continue;
                    }
                }
                let (Some(source), Some(destination)) = (
                    info.get("source").and_then(|s| s.as_str()),
                    info.get("destination").and_then(|d| d.as_str()),
                ) else {
                    continue;
                };
                out.transfers.push(TransferEvent {
                    block_number: slot,
                    tx_hash: signature.to_string(),
                    from: resolve(source),
                    to: resolve(destination),
                    value: amount,
                    timestamp,
                });
            }
            "mintTo" | "mintToChecked" => {
                if info.get("mint").and_then(|m| m.as_str()) != Some(mint) {
                    continue;
                }
                let Some(account) = info.get("account").and_then(|a| a.as_str()) else {
                    continue;
                };
                out.mints.push(TransferEvent {
                    block_number: slot,
                    tx_hash: signature.to_string(),
                    from: String::new(),
                    to: resolve(account),
                    value: amount,
                    timestamp,
                });
            }
            "burn" | "burnChecked" => {
                if info.get("mint").and_then(|m| m.as_str()) != Some(mint) {
                    continue;
                }
                let Some(account) = info.get("account").and_then(|a| a.as_str()) else {
                    continue;
                };
                out.burns.push(TransferEvent {
                    block_number: slot,
                    tx_hash: signature.to_string(),
                    from: resolve(account),
                    to: String::new(),
                    value: amount,
                    timestamp,
                });
            }
            _ => {}
        }
    }

    out
}

pub struct SolanaAdapter {
    rpc: JsonRpcClient,
    config: AdapterConfig,
    limiter: Arc<RateLimiterRegistry>,
    shutdown: Arc<AtomicBool>,
    connected: AtomicBool,
}

impl SolanaAdapter {
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

    async fn token_supply(&self, mint: &str) -> Result<Value, AdapterError> {
        self.call("getTokenSupply", json!([mint])).await
    }

    /// Signatures touching the mint within `[from_slot, to_slot]`, oldest
    /// first. Pages newest-to-oldest until the window is passed.
    async fn signatures_in_range(
        &self,
        mint: &str,
        from_slot: u64,
        to_slot: u64,
    ) -> Result<Vec<(u64, String)>, AdapterError> {
        let mut collected: Vec<(u64, String)> = Vec::new();
        let mut before: Option<String> = None;

        loop {
            check_cancelled(&self.shutdown)?;
            let mut options = json!({ "limit": SIGNATURE_PAGE_LIMIT });
            if let Some(cursor) = &before {
                options["before"] = json!(cursor);
            }
            let page = self
                .call("getSignaturesForAddress", json!([mint, options]))
                .await?;
            let Some(entries) = page.as_array() else {
                break;
            };
            if entries.is_empty() {
                break;
            }

            let mut oldest_slot = u64::MAX;
            for entry in entries {
                let Some(slot) = entry.get("slot").and_then(|s| s.as_u64()) else {
                    continue;
                };
                oldest_slot = oldest_slot.min(slot);
                let failed = entry
                    .get("err")
                    .map(|e| !e.is_null())
                    .unwrap_or(false);
                if failed || slot < from_slot || slot > to_slot {
                    continue;
                }
                if let Some(signature) = entry.get("signature").and_then(|s| s.as_str()) {
                    collected.push((slot, signature.to_string()));
                }
            }

            before = entries
                .last()
                .and_then(|e| e.get("signature"))
                .and_then(|s| s.as_str())
                .map(str::to_string);

            if oldest_slot < from_slot || entries.len() < SIGNATURE_PAGE_LIMIT as usize {
                break;
            }
        }

        collected.sort();
        collected.dedup();
        Ok(collected)
    }

    async fn fetch_transaction(&self, signature: &str) -> Result<Value, AdapterError> {
        let mut delay = std::time::Duration::from_millis(TX_RETRY_BASE_DELAY_MS);
        let mut last_err = AdapterError::ReceiptMissing(signature.to_string());

        for attempt in 0..TX_MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            match self
                .call(
                    "getTransaction",
                    json!([signature, {
                        "encoding": "jsonParsed",
                        "maxSupportedTransactionVersion": 0,
                    }]),
                )
                .await
            {
                Ok(Value::Null) => {
                    last_err = AdapterError::ReceiptMissing(signature.to_string());
                }
                Ok(tx) => return Ok(tx),
                Err(e) if e.is_transient() => last_err = e,
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    /// Shared scan backing both `transfer_events` and `mint_burn_events`.
    async fn scan_token_events(
        &self,
        mint: &str,
        from_slot: u64,
        to_slot: u64,
    ) -> Result<TokenEvents, AdapterError> {
        let signatures = self.signatures_in_range(mint, from_slot, to_slot).await?;
        debug!(
            mint,
            from_slot,
            to_slot,
            signatures = signatures.len(),
            "Scanning Solana token activity"
        );

        let mut all = TokenEvents::default();
        for (slot, signature) in signatures {
            check_cancelled(&self.shutdown)?;
            let tx = match self.fetch_transaction(&signature).await {
                Ok(tx) => tx,
                Err(e) if e.is_transient() => {
                    warn!(signature = %signature, error = %e, "Skipping unfetchable transaction");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let events = decode_token_events(&tx, mint, slot, &signature);
            all.transfers.extend(events.transfers);
            all.mints.extend(events.mints);
            all.burns.extend(events.burns);
        }
        Ok(all)
    }
}

#[async_trait]
impl ChainAdapter for SolanaAdapter {
    fn chain_type(&self) -> ChainType {
        ChainType::Solana
    }

    async fn connect(&self) -> Result<(), AdapterError> {
        let version = self.call("getVersion", json!([])).await?;
        debug!(version = %version, url = self.rpc.url(), "Solana adapter connected");
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
        let slot = self.call("getSlot", json!([])).await?;
        slot.as_u64()
            .ok_or_else(|| AdapterError::RpcTransient("getSlot returned non-integer".into()))
    }

    async fn block_timestamp(&self, number: u64) -> Result<i64, AdapterError> {
        self.ensure_connected()?;
        let time = self.call("getBlockTime", json!([number])).await?;
        time.as_i64().ok_or_else(|| {
            AdapterError::RpcTransient(format!("No block time for slot {}", number))
        })
    }

    async fn creation_block(&self, _address: &str) -> Result<Option<u64>, AdapterError> {
        self.ensure_connected()?;
        // Mint creation slots are not discoverable over plain RPC
        Ok(None)
    }

    async fn token_decimals(&self, address: &str) -> Result<u32, AdapterError> {
        self.ensure_connected()?;
        match self.token_supply(address).await {
            Ok(result) => Ok(result
                .pointer("/value/decimals")
                .and_then(|d| d.as_u64())
                .map(|d| d as u32)
                .unwrap_or(DEFAULT_SOLANA_DECIMALS)),
            Err(e) => {
                warn!(error = %e, "getTokenSupply failed, using default decimals");
                Ok(DEFAULT_SOLANA_DECIMALS)
            }
        }
    }

    async fn total_supply(&self, address: &str) -> Result<U256, AdapterError> {
        self.ensure_connected()?;
        let result = self.token_supply(address).await?;
        let amount = result
            .pointer("/value/amount")
            .and_then(|a| a.as_str())
            .ok_or_else(|| AdapterError::RpcTransient("getTokenSupply without amount".into()))?;
        U256::from_str_radix(amount, 10)
            .map_err(|e| AdapterError::RpcTransient(format!("bad supply amount {}: {}", amount, e)))
    }

    async fn transfer_events(
        &self,
        address: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferEvent>, AdapterError> {
        self.ensure_connected()?;
        Ok(self
            .scan_token_events(address, from_block, to_block)
            .await?
            .transfers)
    }

    async fn mint_burn_events(
        &self,
        address: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<MintBurnEvents, AdapterError> {
        self.ensure_connected()?;
        let events = self.scan_token_events(address, from_block, to_block).await?;
        Ok(MintBurnEvents {
            mints: events.mints,
            burns: events.burns,
        })
    }

    async fn transaction_fee(&self, tx_hash: &str) -> Result<TxFee, AdapterError> {
        self.ensure_connected()?;
        let tx = self.fetch_transaction(tx_hash).await?;
        let fee = tx
            .pointer("/meta/fee")
            .and_then(|f| f.as_u64())
            .unwrap_or(0);
        Ok(TxFee {
            fee_native: U256::from(fee),
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

    const MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

    fn sample_tx() -> Value {
        json!({
            "blockTime": 1_700_000_000,
            "slot": 250_000_000,
            "transaction": {
                "message": {
                    "accountKeys": [
                        {"pubkey": "AuthorityKey111"},
                        {"pubkey": "TokenAcctA"},
                        {"pubkey": "TokenAcctB"},
                    ],
                    "instructions": [
                        {
                            "program": "spl-token",
                            "parsed": {
                                "type": "transferChecked",
                                "info": {
                                    "source": "TokenAcctA",
                                    "destination": "TokenAcctB",
                                    "mint": MINT,
                                    "tokenAmount": {"amount": "500000"},
                                }
                            }
                        },
                        {
                            "program": "spl-token",
                            "parsed": {
                                "type": "mintTo",
                                "info": {
                                    "account": "TokenAcctB",
                                    "mint": MINT,
                                    "amount": "1000000",
                                }
                            }
                        },
                        {
                            "program": "spl-token",
                            "parsed": {
                                "type": "mintTo",
                                "info": {
                                    "account": "OtherAcct",
                                    "mint": "SomeOtherMint1111",
                                    "amount": "42",
                                }
                            }
                        }
                    ]
                }
            },
            "meta": {
                "err": null,
                "fee": 5000,
                "innerInstructions": [],
                "preTokenBalances": [
                    {"accountIndex": 1, "mint": MINT, "owner": "OwnerA",
                     "uiTokenAmount": {"amount": "500000"}},
                    {"accountIndex": 2, "mint": MINT, "owner": "OwnerB",
                     "uiTokenAmount": {"amount": "0"}}
                ],
                "postTokenBalances": []
            }
        })
    }

    #[test]
    fn test_decode_transfer_and_mint() {
        let events = decode_token_events(&sample_tx(), MINT, 250_000_000, "sig1");
        assert_eq!(events.transfers.len(), 1);
        let transfer = &events.transfers[0];
        assert_eq!(transfer.from, "OwnerA");
        assert_eq!(transfer.to, "OwnerB");
        assert_eq!(transfer.value, U256::from(500_000u64));
        assert_eq!(transfer.timestamp, 1_700_000_000);

        // The foreign-mint mintTo is ignored
        assert_eq!(events.mints.len(), 1);
        assert_eq!(events.mints[0].to, "OwnerB");
        assert_eq!(events.mints[0].value, U256::from(1_000_000u64));
        assert!(events.burns.is_empty());
    }

    #[test]
    fn test_decode_skips_failed_transactions() {
        let mut tx = sample_tx();
        tx["meta"]["err"] = json!({"InstructionError": [0, "Custom"]});
        let events = decode_token_events(&tx, MINT, 250_000_000, "sig1");
        assert!(events.transfers.is_empty());
        assert!(events.mints.is_empty());
    }
}
