//! Endpoint-scoped RPC rate limiting
//!
//! One token bucket per RPC endpoint id, shared by every contract bound to
//! that endpoint. Bucket state lives in Redis so multiple worker processes
//! inherit the same budget and newly queued jobs observe limits from
//! previous runs. Waiters are served FIFO per endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redis::aio::ConnectionManager;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Hard per-acquire timeout; expiry is surfaced as `RateLimitError::Stalled`
const ACQUIRE_TIMEOUT_SECS: u64 = 120;

/// Bucket state TTL; idle endpoints age out of Redis
const BUCKET_TTL_MS: u64 = 3_600_000;

/// Redis key for an endpoint's bucket state
fn bucket_key(endpoint_id: i32) -> String {
    format!("rate_limit:{}", endpoint_id)
}

/// Burst headroom: a bucket never holds more than one token for sub-1/s
/// rates, and at most one second's worth otherwise.
fn burst_capacity(rate_per_second: f64) -> f64 {
    rate_per_second.max(1.0)
}

/// Refill-and-take executed atomically in Redis. Returns 0 when a token was
/// granted, otherwise the number of milliseconds until the next token.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local rate = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local now_ms = tonumber(ARGV[3])
local ttl_ms = tonumber(ARGV[4])
local state = redis.call('HMGET', key, 'tokens', 'last_refill_ms')
local tokens = tonumber(state[1])
local last = tonumber(state[2])
if tokens == nil or last == nil then
  tokens = capacity
  last = now_ms
end
local elapsed = now_ms - last
if elapsed < 0 then
  elapsed = 0
end
tokens = math.min(capacity, tokens + elapsed / 1000.0 * rate)
local wait_ms = 0
if tokens >= 1.0 then
  tokens = tokens - 1.0
else
  wait_ms = math.ceil((1.0 - tokens) / rate * 1000.0)
end
redis.call('HSET', key, 'tokens', tokens, 'last_refill_ms', now_ms)
redis.call('PEXPIRE', key, ttl_ms)
return wait_ms
"#;

#[derive(Debug)]
pub enum RateLimitError {
    /// Acquire exceeded the hard timeout; callers treat this as transient
    Stalled,
    Redis(String),
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateLimitError::Stalled => {
                write!(f, "Rate limit acquire stalled after {}s", ACQUIRE_TIMEOUT_SECS)
            }
            RateLimitError::Redis(msg) => write!(f, "Rate limiter Redis error: {}", msg),
        }
    }
}

impl std::error::Error for RateLimitError {}

/// A single endpoint's bucket handle. The fair tokio mutex makes token
/// grants FIFO across waiters on this worker; the Redis script keeps the
/// budget consistent across workers.
struct EndpointBucket {
    endpoint_id: i32,
    rate_per_second: f64,
    gate: Mutex<()>,
}

/// Process-wide registry of endpoint buckets.
pub struct RateLimiterRegistry {
    redis: ConnectionManager,
    buckets: Mutex<HashMap<i32, Arc<EndpointBucket>>>,
}

impl RateLimiterRegistry {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Block until the endpoint grants a token, at most `rate_per_second`
    /// within any rolling one-second window. A changed rate replaces the
    /// bucket atomically; acquisitions already waiting on the old bucket
    /// complete at the old rate.
    pub async fn acquire(
        &self,
        endpoint_id: i32,
        rate_per_second: f64,
    ) -> Result<(), RateLimitError> {
        let bucket = self.bucket_for(endpoint_id, rate_per_second).await;

        let acquired = tokio::time::timeout(
            Duration::from_secs(ACQUIRE_TIMEOUT_SECS),
            self.wait_for_token(bucket),
        )
        .await;

        match acquired {
            Ok(result) => result,
            Err(_) => {
                warn!(endpoint_id, "Rate limit acquire timed out");
                Err(RateLimitError::Stalled)
            }
        }
    }

    /// Drop all buckets. Pending acquisitions on already-cloned handles may
    /// still complete; their results are discarded by shutdown.
    pub async fn close(&self) {
        let mut buckets = self.buckets.lock().await;
        let count = buckets.len();
        buckets.clear();
        info!(buckets = count, "Rate limiter registry closed");
    }

    async fn bucket_for(&self, endpoint_id: i32, rate_per_second: f64) -> Arc<EndpointBucket> {
        let mut buckets = self.buckets.lock().await;
        match buckets.get(&endpoint_id) {
            Some(bucket) if bucket.rate_per_second == rate_per_second => bucket.clone(),
            existing => {
                if existing.is_some() {
                    info!(
                        endpoint_id,
                        rate_per_second, "Endpoint rate changed, replacing bucket"
                    );
                }
                let bucket = Arc::new(EndpointBucket {
                    endpoint_id,
                    rate_per_second,
                    gate: Mutex::new(()),
                });
                buckets.insert(endpoint_id, bucket.clone());
                bucket
            }
        }
    }

    async fn wait_for_token(&self, bucket: Arc<EndpointBucket>) -> Result<(), RateLimitError> {
        // FIFO: only the head-of-line waiter talks to Redis
        let _gate = bucket.gate.lock().await;
        let script = redis::Script::new(TOKEN_BUCKET_SCRIPT);
        let key = bucket_key(bucket.endpoint_id);
        let capacity = burst_capacity(bucket.rate_per_second);
        let mut conn = self.redis.clone();

        loop {
            let now_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);

            let wait_ms: u64 = script
                .key(&key)
                .arg(bucket.rate_per_second)
                .arg(capacity)
                .arg(now_ms)
                .arg(BUCKET_TTL_MS)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| RateLimitError::Redis(e.to_string()))?;

            if wait_ms == 0 {
                return Ok(());
            }

            debug!(
                endpoint_id = bucket.endpoint_id,
                wait_ms, "Waiting for rate limit token"
            );
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_capacity_floors_at_one() {
        assert_eq!(burst_capacity(0.5), 1.0);
        assert_eq!(burst_capacity(0.167), 1.0);
        assert_eq!(burst_capacity(1.0), 1.0);
        assert_eq!(burst_capacity(25.0), 25.0);
    }

    #[test]
    fn test_bucket_key_scoped_by_endpoint() {
        assert_eq!(bucket_key(7), "rate_limit:7");
        assert_ne!(bucket_key(1), bucket_key(2));
    }

    #[test]
    fn test_stalled_error_display() {
        let err = RateLimitError::Stalled;
        assert!(err.to_string().contains("stalled"));
    }
}
