//! Metrics rollup engine
//!
//! Derives the coarser resolutions from daily rows: 1d→10d, 10d→100d and
//! 100d→1000d, each bucketing 10 adjacent source periods on epoch-aligned
//! boundaries. Counters are summed; `total_supply` is a snapshot (the most
//! recent source observation at or before the window end). Windows are
//! closed against the contract's own synced chain time, not wall-clock
//! time: a back-filling contract has not finished a ten-day window just
//! because that window is old. Buckets whose source rows changed after the
//! target was written are re-aggregated, so a window emitted before the
//! cursor finished walking it is corrected on a later sweep. Running the
//! engine twice in a row produces no row changes.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, NotSet, Order,
    QueryFilter, QueryOrder, Set,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::{
    blocks, contracts,
    metrics::{self, resolution},
    prelude::*,
};

/// Each level groups this many source periods into one target period
const PERIODS_PER_BUCKET: usize = 10;

/// (source, target) resolution pairs, finest first
const LEVELS: [(i32, i32); 3] = [
    (resolution::DAY, resolution::TEN_DAYS),
    (resolution::TEN_DAYS, resolution::HUNDRED_DAYS),
    (resolution::HUNDRED_DAYS, resolution::THOUSAND_DAYS),
];

#[derive(Debug)]
pub enum RollupError {
    Database(String),
}

impl std::fmt::Display for RollupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollupError::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for RollupError {}

impl From<DbErr> for RollupError {
    fn from(e: DbErr) -> Self {
        RollupError::Database(e.to_string())
    }
}

#[derive(Debug, Default)]
pub struct RollupStats {
    pub buckets_inserted: usize,
    pub buckets_updated: usize,
    pub contracts_processed: usize,
}

/// Epoch-aligned start of the target period containing `timestamp`.
pub fn align_period_start(timestamp: i64, resolution_secs: i32) -> i64 {
    let res = resolution_secs as i64;
    (timestamp.max(0) / res) * res
}

/// Whether a bucket may be emitted: either all source periods are present
/// or the contract's sync horizon (the chain time its cursor has walked
/// past) lies at or beyond the window end.
pub fn bucket_ready(
    source_rows: usize,
    bucket_start: i64,
    resolution_secs: i32,
    sync_horizon: Option<i64>,
) -> bool {
    source_rows >= PERIODS_PER_BUCKET
        || sync_horizon.is_some_and(|h| bucket_start + resolution_secs as i64 <= h)
}

pub struct RollupEngine {
    db: DatabaseConnection,
}

impl RollupEngine {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Full sweep over every contract and level.
    pub async fn run(&self) -> Result<RollupStats, RollupError> {
        let contracts = Contracts::find()
            .filter(contracts::Column::Active.eq(true))
            .all(&self.db)
            .await?;

        let mut stats = RollupStats::default();
        for contract in &contracts {
            let horizon = match self.sync_horizon(contract.id).await {
                Ok(horizon) => horizon,
                Err(e) => {
                    warn!(contract = %contract.id, error = %e, "Horizon lookup failed, skipping");
                    continue;
                }
            };
            for (source, target) in LEVELS {
                match self.rollup_level(contract.id, source, target, horizon).await {
                    Ok((inserted, updated)) => {
                        stats.buckets_inserted += inserted;
                        stats.buckets_updated += updated;
                    }
                    Err(e) => {
                        warn!(
                            contract = %contract.id,
                            source,
                            target,
                            error = %e,
                            "Rollup level failed, continuing"
                        );
                    }
                }
            }
            stats.contracts_processed += 1;
        }

        info!(
            contracts = stats.contracts_processed,
            inserted = stats.buckets_inserted,
            updated = stats.buckets_updated,
            "Rollup sweep complete"
        );
        Ok(stats)
    }

    /// Chain-time horizon of a contract: the timestamp of the latest synced
    /// block that carried events. Wall-clock time would close every
    /// historical window while the cursor is still back-filling it.
    async fn sync_horizon(&self, contract_id: Uuid) -> Result<Option<i64>, RollupError> {
        let latest = Blocks::find()
            .filter(blocks::Column::ContractId.eq(contract_id))
            .filter(blocks::Column::Timestamp.is_not_null())
            .order_by(blocks::Column::BlockNumber, Order::Desc)
            .one(&self.db)
            .await?;
        Ok(latest.and_then(|b| b.timestamp).map(|t| t.timestamp()))
    }

    /// Returns (buckets inserted, buckets updated).
    async fn rollup_level(
        &self,
        contract_id: Uuid,
        source_res: i32,
        target_res: i32,
        sync_horizon: Option<i64>,
    ) -> Result<(usize, usize), RollupError> {
        let source_rows = Metrics::find()
            .filter(metrics::Column::ContractId.eq(contract_id))
            .filter(metrics::Column::Resolution.eq(source_res))
            .order_by_asc(metrics::Column::PeriodStart)
            .all(&self.db)
            .await?;
        if source_rows.is_empty() {
            return Ok((0, 0));
        }

        let existing_targets: HashMap<i64, metrics::Model> = Metrics::find()
            .filter(metrics::Column::ContractId.eq(contract_id))
            .filter(metrics::Column::Resolution.eq(target_res))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|row| (row.period_start.timestamp(), row))
            .collect();

        let mut buckets: BTreeMap<i64, Vec<&metrics::Model>> = BTreeMap::new();
        for row in &source_rows {
            let bucket = align_period_start(row.period_start.timestamp(), target_res);
            buckets.entry(bucket).or_default().push(row);
        }

        let mut inserted = 0usize;
        let mut updated = 0usize;

        for (bucket_start, rows) in buckets {
            let existing = existing_targets.get(&bucket_start);
            if let Some(target) = existing {
                // Re-aggregate only when a source row landed or changed
                // after the target was written
                let source_changed = rows.iter().any(|row| row.updated_at > target.updated_at);
                if !source_changed {
                    continue;
                }
            }
            if !bucket_ready(rows.len(), bucket_start, target_res, sync_horizon) {
                debug!(
                    contract = %contract_id,
                    bucket_start,
                    rows = rows.len(),
                    "Bucket still open, skipping"
                );
                continue;
            }

            let window_end = bucket_start + target_res as i64;
            let total_supply = source_rows
                .iter()
                .rev()
                .filter(|row| row.period_start.timestamp() < window_end)
                .find_map(|row| row.total_supply);

            let mut minted = Decimal::ZERO;
            let mut burned = Decimal::ZERO;
            let mut tx_count = 0i64;
            let mut unique_senders = 0i64;
            let mut unique_receivers = 0i64;
            let mut total_transferred = Decimal::ZERO;
            let mut total_fees_native = Decimal::ZERO;
            let mut total_fees_usd = Decimal::ZERO;
            let mut start_block: Option<i64> = None;
            let mut end_block: Option<i64> = None;

            for row in &rows {
                minted += row.minted;
                burned += row.burned;
                tx_count += row.tx_count;
                unique_senders += row.unique_senders;
                unique_receivers += row.unique_receivers;
                total_transferred += row.total_transferred;
                total_fees_native += row.total_fees_native;
                total_fees_usd += row.total_fees_usd;
                start_block = match (start_block, row.start_block) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
                end_block = match (end_block, row.end_block) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
            }

            match existing {
                Some(target) => {
                    // Overwrite every aggregated field of the stale bucket
                    let mut model: metrics::ActiveModel = target.clone().into();
                    model.total_supply = Set(total_supply);
                    model.minted = Set(minted);
                    model.burned = Set(burned);
                    model.tx_count = Set(tx_count);
                    model.unique_senders = Set(unique_senders);
                    model.unique_receivers = Set(unique_receivers);
                    model.total_transferred = Set(total_transferred);
                    model.total_fees_native = Set(total_fees_native);
                    model.total_fees_usd = Set(total_fees_usd);
                    model.start_block = Set(start_block);
                    model.end_block = Set(end_block);
                    model.updated_at = Set(Some(Utc::now().fixed_offset()));
                    model.update(&self.db).await?;
                    updated += 1;
                }
                None => {
                    let period_start = chrono::DateTime::from_timestamp(bucket_start, 0)
                        .expect("aligned bucket start")
                        .fixed_offset();
                    metrics::ActiveModel {
                        id: NotSet,
                        contract_id: Set(contract_id),
                        period_start: Set(period_start),
                        resolution: Set(target_res),
                        total_supply: Set(total_supply),
                        minted: Set(minted),
                        burned: Set(burned),
                        tx_count: Set(tx_count),
                        unique_senders: Set(unique_senders),
                        unique_receivers: Set(unique_receivers),
                        total_transferred: Set(total_transferred),
                        total_fees_native: Set(total_fees_native),
                        total_fees_usd: Set(total_fees_usd),
                        start_block: Set(start_block),
                        end_block: Set(end_block),
                        created_at: Set(Some(Utc::now().fixed_offset())),
                        updated_at: Set(Some(Utc::now().fixed_offset())),
                    }
                    .insert(&self.db)
                    .await?;
                    inserted += 1;
                }
            }
        }

        Ok((inserted, updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_period_start() {
        // 2023-11-15T02:00Z aligns to its UTC day
        assert_eq!(align_period_start(1_700_013_600, resolution::DAY), 1_700_006_400);
        // Ten-day buckets align on multiples of 864000
        let aligned = align_period_start(1_700_013_600, resolution::TEN_DAYS);
        assert_eq!(aligned % 864_000, 0);
        assert!(aligned <= 1_700_013_600);
        assert!(aligned + 864_000 > 1_700_013_600);
    }

    #[test]
    fn test_bucket_ready_full_or_closed() {
        let bucket_start = 1_700_000_000 / 864_000 * 864_000;
        // Full bucket emits even before the horizon reaches the window end
        assert!(bucket_ready(10, bucket_start, resolution::TEN_DAYS, None));
        assert!(bucket_ready(
            10,
            bucket_start,
            resolution::TEN_DAYS,
            Some(bucket_start + 1)
        ));
        // Partial bucket waits for the contract's cursor, not wall-clock
        // time: no horizon means nothing is closed
        assert!(!bucket_ready(3, bucket_start, resolution::TEN_DAYS, None));
        assert!(!bucket_ready(
            3,
            bucket_start,
            resolution::TEN_DAYS,
            Some(bucket_start + 1)
        ));
        assert!(bucket_ready(
            3,
            bucket_start,
            resolution::TEN_DAYS,
            Some(bucket_start + 864_000)
        ));
    }
}
