//! Shared helpers for router-level tests: an in-process RESP responder so
//! the Redis connection manager can complete its handshake, and an
//! `AppState` builder over a mock database connection.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use moka::future::Cache;
use redis::aio::ConnectionManager;
use sea_orm::DatabaseConnection;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use stablewatch_backend::services::processor::ContractProcessor;
use stablewatch_backend::services::queue::JobQueue;
use stablewatch_backend::services::rate_limiter::RateLimiterRegistry;
use stablewatch_backend::AppState;

/// Parse one complete RESP command from `buf`; returns the argument list
/// and the bytes consumed, or None while the command is still partial.
fn parse_command(buf: &[u8]) -> Option<(Vec<Vec<u8>>, usize)> {
    fn crlf(buf: &[u8]) -> Option<usize> {
        buf.windows(2).position(|w| w == b"\r\n")
    }

    if buf.first()? != &b'*' {
        // Inline command; consume through the newline
        let end = buf.iter().position(|b| *b == b'\n')?;
        return Some((Vec::new(), end + 1));
    }
    let header_end = crlf(buf)?;
    let count: usize = std::str::from_utf8(&buf[1..header_end]).ok()?.parse().ok()?;
    let mut pos = header_end + 2;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        if buf.get(pos)? != &b'$' {
            return None;
        }
        let rel = crlf(&buf[pos..])?;
        let len: usize = std::str::from_utf8(&buf[pos + 1..pos + rel]).ok()?.parse().ok()?;
        let start = pos + rel + 2;
        if buf.len() < start + len + 2 {
            return None;
        }
        args.push(buf[start..start + len].to_vec());
        pos = start + len + 2;
    }
    Some((args, pos))
}

/// Reply for one command: just enough of the queue's vocabulary for
/// handler tests (fresh-queue semantics — lookups miss, writes succeed).
fn reply_for(args: &[Vec<u8>]) -> &'static [u8] {
    let command = args
        .first()
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or_default();
    match command.as_slice() {
        b"HGET" => b"$-1\r\n",
        b"HSET" | b"LPUSH" => b":1\r\n",
        b"LREM" | b"ZREM" | b"ZADD" | b"DEL" | b"EXISTS" => b":0\r\n",
        _ => b"+OK\r\n",
    }
}

/// Spawn the responder on an ephemeral port and connect a manager to it.
pub async fn fake_redis() -> ConnectionManager {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut pending: Vec<u8> = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            pending.extend_from_slice(&buf[..n]);
                            while let Some((args, consumed)) = parse_command(&pending) {
                                pending.drain(..consumed);
                                if socket.write_all(reply_for(&args)).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
            });
        }
    });

    let client = redis::Client::open(format!("redis://{}/", addr)).unwrap();
    ConnectionManager::new(client).await.unwrap()
}

/// Full application state over a (mock) database connection.
pub async fn test_state(db: DatabaseConnection) -> AppState {
    let redis = fake_redis().await;
    let limiter = Arc::new(RateLimiterRegistry::new(redis.clone()));
    let queue = Arc::new(JobQueue::new(redis));
    let processor = Arc::new(ContractProcessor::new(
        db.clone(),
        limiter.clone(),
        Arc::new(AtomicBool::new(false)),
    ));
    AppState {
        db,
        queue,
        limiter,
        processor,
        stablecoin_cache: Cache::builder().max_capacity(16).build(),
    }
}
