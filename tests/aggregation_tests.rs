//! End-to-end aggregation behavior that runs without live Postgres/Redis/RPC:
//! batch accumulation, replay dedup, fee attribution and rollup bucketing.

use std::collections::{HashMap, HashSet};

use alloy::primitives::U256;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;

use stablewatch_backend::adapters::{
    is_zero_address, split_mint_burn, ChainType, TransferEvent, TxFee, EVM_ZERO_ADDRESS,
};
use stablewatch_backend::entities::metrics::resolution;
use stablewatch_backend::services::processor::{day_of_timestamp, BatchAggregates};
use stablewatch_backend::services::rollup::{align_period_start, bucket_ready};

const BLOCK_TS: i64 = 1_700_000_000; // 2023-11-14 UTC

fn event(block: u64, tx: &str, from: &str, to: &str, value: u64) -> TransferEvent {
    TransferEvent {
        block_number: block,
        tx_hash: tx.into(),
        from: from.into(),
        to: to.into(),
        value: U256::from(value),
        timestamp: BLOCK_TS,
    }
}

fn fee(value: u64) -> TxFee {
    TxFee {
        fee_native: U256::from(value),
        fee_usd: None,
    }
}

/// Cold-start scenario: one mint plus one transfer inside an 11-block
/// window produces a single daily accumulator and eleven block rows.
#[test]
fn test_cold_start_small_token() {
    let mint = event(103, "0xt1", EVM_ZERO_ADDRESS, "0xaa", 1_000_000);
    let transfer = event(103, "0xt2", "0xaa", "0xbb", 500_000);

    // The processor splits the raw stream exactly like the adapter does
    let raw = vec![mint.clone(), transfer.clone()];
    let split = split_mint_burn(ChainType::Evm, &raw);
    assert_eq!(split.mints.len(), 1);
    assert!(split.burns.is_empty());

    let pure: Vec<TransferEvent> = raw
        .into_iter()
        .filter(|t| {
            !is_zero_address(ChainType::Evm, &t.from) && !is_zero_address(ChainType::Evm, &t.to)
        })
        .collect();
    assert_eq!(pure.len(), 1);

    let mut aggregates =
        BatchAggregates::build(100, 110, &HashSet::new(), &pure, &split.mints, &[]);

    let mut fees = HashMap::new();
    fees.insert("0xt1".to_string(), fee(21_000));
    fees.insert("0xt2".to_string(), fee(21_000));
    let all: Vec<TransferEvent> = pure.iter().chain(split.mints.iter()).cloned().collect();
    aggregates.apply_fees(all.iter(), &fees);

    assert_eq!(aggregates.daily.len(), 1);
    let day = aggregates.daily.values().next().unwrap();
    assert_eq!(day.minted, U256::from(1_000_000u64));
    assert_eq!(day.tx_count, 1);
    assert_eq!(day.senders.len(), 1);
    assert_eq!(day.receivers.len(), 1);
    assert_eq!(day.total_transferred, U256::from(500_000u64));
    assert_eq!(day.total_fees, U256::from(42_000u64));

    assert_eq!(aggregates.blocks.len(), 11);
    let with_events = aggregates
        .blocks
        .values()
        .filter(|b| b.timestamp.is_some())
        .count();
    assert_eq!(with_events, 1);
}

/// Replaying a window whose blocks were already committed contributes
/// nothing: the committed-block set drops every event and every block row.
#[test]
fn test_idempotent_replay_after_reset() {
    let mint = event(103, "0xt1", EVM_ZERO_ADDRESS, "0xaa", 1_000_000);
    let transfer = event(103, "0xt2", "0xaa", "0xbb", 500_000);
    let committed: HashSet<u64> = (100..=110).collect();

    let aggregates = BatchAggregates::build(
        100,
        110,
        &committed,
        std::slice::from_ref(&transfer),
        std::slice::from_ref(&mint),
        &[],
    );
    assert!(aggregates.daily.is_empty());
    assert!(aggregates.blocks.is_empty());
}

/// A failed fee lookup contributes zero while everything else stands.
#[test]
fn test_zero_fee_tolerance() {
    let t1 = event(103, "0xgood", "0xaa", "0xbb", 100);
    let t2 = event(104, "0xlost", "0xbb", "0xcc", 200);
    let mut aggregates = BatchAggregates::build(
        100,
        110,
        &HashSet::new(),
        &[t1.clone(), t2.clone()],
        &[],
        &[],
    );

    let mut fees = HashMap::new();
    fees.insert("0xgood".to_string(), fee(21_000));
    // the lost receipt degraded to a zero fee
    fees.insert("0xlost".to_string(), TxFee::zero());
    let events = [t1, t2];
    aggregates.apply_fees(events.iter(), &fees);

    let day = aggregates.daily.values().next().unwrap();
    assert_eq!(day.total_fees, U256::from(21_000u64));
    assert_eq!(day.tx_count, 2);
    assert_eq!(day.total_transferred, U256::from(300u64));
}

/// Ten consecutive daily values roll into one aligned 10-day bucket whose
/// minted total is the sum of the sources.
#[test]
fn test_ten_day_bucket_sums_sources() {
    // Pick a period start aligned to the 10-day grid
    let base = align_period_start(1_700_000_000, resolution::TEN_DAYS);
    let minted: Vec<i64> = (1..=10).collect();

    let mut buckets: HashMap<i64, Vec<Decimal>> = HashMap::new();
    for (i, value) in minted.iter().enumerate() {
        let day_ts = base + (i as i64) * 86_400;
        let bucket = align_period_start(day_ts, resolution::TEN_DAYS);
        buckets.entry(bucket).or_default().push(Decimal::from(*value));
    }

    assert_eq!(buckets.len(), 1);
    let (bucket_start, values) = buckets.into_iter().next().unwrap();
    assert_eq!(bucket_start, base);
    assert_eq!(bucket_start % 864_000, 0);
    // A full bucket emits even while the contract is still back-filling
    assert!(bucket_ready(
        values.len(),
        bucket_start,
        resolution::TEN_DAYS,
        None
    ));
    // A partial one waits for the contract's own cursor to pass the window
    assert!(!bucket_ready(3, bucket_start, resolution::TEN_DAYS, None));
    assert!(bucket_ready(
        3,
        bucket_start,
        resolution::TEN_DAYS,
        Some(bucket_start + 864_000)
    ));
    let total: Decimal = values.into_iter().sum();
    assert_eq!(total, Decimal::from(55));
}

/// Daily keys follow the UTC calendar regardless of the local offset.
#[test]
fn test_daily_key_alignment() {
    let late_evening = Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 59).unwrap();
    let next_midnight = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
    assert_ne!(
        day_of_timestamp(late_evening.timestamp()),
        day_of_timestamp(next_midnight.timestamp())
    );
}

/// Mint/burn classification is symmetric: every zero-from transfer becomes
/// a mint with identical coordinates, every zero-to transfer a burn.
#[test]
fn test_mint_burn_symmetry() {
    let events = vec![
        event(7, "0xm", EVM_ZERO_ADDRESS, "0xaa", 11),
        event(8, "0xb", "0xbb", EVM_ZERO_ADDRESS, 13),
        event(9, "0xp", "0xaa", "0xbb", 17),
    ];
    let split = split_mint_burn(ChainType::Evm, &events);

    assert_eq!(split.mints.len(), 1);
    assert_eq!(split.mints[0].block_number, 7);
    assert_eq!(split.mints[0].tx_hash, "0xm");
    assert_eq!(split.mints[0].to, "0xaa");
    assert_eq!(split.mints[0].value, U256::from(11u64));

    assert_eq!(split.burns.len(), 1);
    assert_eq!(split.burns[0].block_number, 8);
    assert_eq!(split.burns[0].from, "0xbb");
    assert_eq!(split.burns[0].value, U256::from(13u64));
}
