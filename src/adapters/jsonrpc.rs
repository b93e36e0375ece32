//! Minimal JSON-RPC 2.0 client
//!
//! Shared HTTP plumbing for the Tron and Solana adapters. Transport and 5xx
//! failures are transient; JSON-RPC error objects for unknown methods are
//! permanent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};

use super::{AdapterError, RPC_CALL_TIMEOUT_SECS};

pub struct JsonRpcClient {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue one JSON-RPC call and return the `result` value.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .timeout(Duration::from_secs(RPC_CALL_TIMEOUT_SECS))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdapterError::RpcTimeout(format!("{}: {}", method, e))
                } else {
                    AdapterError::RpcTransient(format!("{}: {}", method, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let msg = format!("{} returned {}: {}", method, status, text);
            return if status.is_client_error() {
                Err(AdapterError::RpcPermanent(msg))
            } else {
                Err(AdapterError::RpcTransient(msg))
            };
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| AdapterError::RpcTransient(format!("{}: bad JSON: {}", method, e)))?;

        if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
            let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown RPC error");
            let msg = format!("{} error {}: {}", method, code, message);
            // -32601 method not found; -32600 invalid request
            return if code == -32601 || code == -32600 {
                Err(AdapterError::RpcPermanent(msg))
            } else {
                Err(AdapterError::RpcTransient(msg))
            };
        }

        Ok(payload.get("result").cloned().unwrap_or(Value::Null))
    }
}

/// Parse a 0x-prefixed hex quantity (e.g. eth_blockNumber results).
pub fn parse_hex_u64(value: &Value) -> Result<u64, AdapterError> {
    let s = value
        .as_str()
        .ok_or_else(|| AdapterError::RpcTransient("expected hex string".into()))?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| AdapterError::RpcTransient(format!("bad hex quantity {}: {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_u64() {
        assert_eq!(parse_hex_u64(&json!("0x0")).unwrap(), 0);
        assert_eq!(parse_hex_u64(&json!("0x64")).unwrap(), 100);
        assert_eq!(parse_hex_u64(&json!("0xde0b6b3")).unwrap(), 232_783_539);
        assert!(parse_hex_u64(&json!(12)).is_err());
        assert!(parse_hex_u64(&json!("0xzz")).is_err());
    }
}
