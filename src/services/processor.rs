//! Contract sync processor
//!
//! The per-contract state machine: `discover` finds the creation block and
//! seeds the cursor, `sync` walks block ranges forward, aggregates transfer
//! activity into daily metrics and per-block summaries, and commits each
//! range atomically together with the cursor advance. At most one execution
//! runs per contract (enforced by the job queue's idempotency keys).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy::primitives::U256;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    NotSet, Order, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::{
    is_zero_address, new_adapter, AdapterConfig, AdapterError, ChainAdapter, ChainType,
    TransferEvent, TxFee,
};
use crate::entities::{
    block_addresses::{self, address_type},
    blocks, contracts,
    metrics::{self, resolution},
    prelude::*,
    sync_state::{self, status},
};
use crate::services::rate_limiter::RateLimiterRegistry;

#[derive(Debug)]
pub enum ProcessorError {
    /// Bad endpoint or chain configuration; fatal at job start
    Config(String),
    Adapter(AdapterError),
    Database(String),
    /// Value out of storable range or constraint violation; aborts the batch
    DataIntegrity(String),
    Cancelled,
}

impl std::fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessorError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ProcessorError::Adapter(e) => write!(f, "Adapter error: {}", e),
            ProcessorError::Database(msg) => write!(f, "Database error: {}", msg),
            ProcessorError::DataIntegrity(msg) => write!(f, "Data integrity error: {}", msg),
            ProcessorError::Cancelled => write!(f, "Sync cancelled by shutdown"),
        }
    }
}

impl std::error::Error for ProcessorError {}

impl From<AdapterError> for ProcessorError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::Cancelled => ProcessorError::Cancelled,
            other => ProcessorError::Adapter(other),
        }
    }
}

impl From<DbErr> for ProcessorError {
    fn from(e: DbErr) -> Self {
        ProcessorError::Database(e.to_string())
    }
}

/// Exact integer conversion into the Decimal(78,0) storage type.
pub fn u256_to_decimal(value: U256) -> Result<Decimal, ProcessorError> {
    Decimal::from_str(&value.to_string())
        .map_err(|e| ProcessorError::DataIntegrity(format!("Value {} unstorable: {}", value, e)))
}

/// UTC calendar day of a block timestamp.
pub fn day_of_timestamp(timestamp: i64) -> NaiveDate {
    DateTime::from_timestamp(timestamp, 0)
        .unwrap_or_else(|| DateTime::from_timestamp(0, 0).expect("epoch"))
        .date_naive()
}

/// UTC midnight for a calendar day.
pub fn day_start(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).expect("midnight"))
}

/// Per-day accumulator for one batch. Address sets hold pure-transfer
/// parties only; the stored counters are incremental sums across batches.
#[derive(Debug, Default)]
pub struct DayAggregate {
    pub minted: U256,
    pub burned: U256,
    pub tx_count: u64,
    pub senders: HashSet<String>,
    pub receivers: HashSet<String>,
    pub total_transferred: U256,
    pub total_fees: U256,
    fee_txs: HashSet<String>,
    pub start_block: Option<u64>,
    pub end_block: Option<u64>,
}

impl DayAggregate {
    fn observe_block(&mut self, block: u64) {
        self.start_block = Some(self.start_block.map_or(block, |b| b.min(block)));
        self.end_block = Some(self.end_block.map_or(block, |b| b.max(block)));
    }
}

/// Per-block accumulator; `tx_count` counts transfer + mint + burn events.
#[derive(Debug, Default)]
pub struct BlockAggregate {
    pub timestamp: Option<i64>,
    pub minted: U256,
    pub burned: U256,
    pub tx_count: u32,
    pub total_transferred: U256,
    pub total_fees: U256,
    fee_txs: HashSet<String>,
    pub addresses: BTreeMap<String, &'static str>,
}

impl BlockAggregate {
    fn record_address(&mut self, address: &str, role: &'static str) {
        if address.is_empty() {
            return;
        }
        self.addresses
            .entry(address.to_string())
            .and_modify(|existing| {
                if *existing != role {
                    *existing = address_type::BOTH;
                }
            })
            .or_insert(role);
    }
}

/// All accumulators for one `[from, to]` window.
#[derive(Debug)]
pub struct BatchAggregates {
    pub daily: BTreeMap<NaiveDate, DayAggregate>,
    pub blocks: BTreeMap<u64, BlockAggregate>,
}

impl BatchAggregates {
    /// Materialize every block in `[from, to]` (minus `skip`) and fold the
    /// classified events in. `skip` carries block numbers that were already
    /// committed by an earlier pass; their events must not count again.
    pub fn build(
        from: u64,
        to: u64,
        skip: &HashSet<u64>,
        pure_transfers: &[TransferEvent],
        mints: &[TransferEvent],
        burns: &[TransferEvent],
    ) -> Self {
        let mut blocks: BTreeMap<u64, BlockAggregate> = BTreeMap::new();
        for number in from..=to {
            if !skip.contains(&number) {
                blocks.insert(number, BlockAggregate::default());
            }
        }
        let mut daily: BTreeMap<NaiveDate, DayAggregate> = BTreeMap::new();

        for event in pure_transfers {
            if skip.contains(&event.block_number) {
                continue;
            }
            let day = daily.entry(day_of_timestamp(event.timestamp)).or_default();
            day.tx_count += 1;
            day.total_transferred += event.value;
            day.senders.insert(event.from.clone());
            day.receivers.insert(event.to.clone());
            day.observe_block(event.block_number);

            if let Some(block) = blocks.get_mut(&event.block_number) {
                block.timestamp = Some(event.timestamp);
                block.tx_count += 1;
                block.total_transferred += event.value;
                block.record_address(&event.from, address_type::SENDER);
                block.record_address(&event.to, address_type::RECEIVER);
            }
        }

        for event in mints {
            if skip.contains(&event.block_number) {
                continue;
            }
            let day = daily.entry(day_of_timestamp(event.timestamp)).or_default();
            day.minted += event.value;
            day.observe_block(event.block_number);

            if let Some(block) = blocks.get_mut(&event.block_number) {
                block.timestamp = Some(event.timestamp);
                block.tx_count += 1;
                block.minted += event.value;
                block.record_address(&event.to, address_type::RECEIVER);
            }
        }

        for event in burns {
            if skip.contains(&event.block_number) {
                continue;
            }
            let day = daily.entry(day_of_timestamp(event.timestamp)).or_default();
            day.burned += event.value;
            day.observe_block(event.block_number);

            if let Some(block) = blocks.get_mut(&event.block_number) {
                block.timestamp = Some(event.timestamp);
                block.tx_count += 1;
                block.burned += event.value;
                block.record_address(&event.from, address_type::SENDER);
            }
        }

        Self { daily, blocks }
    }

    /// Attribute each transaction's fee once per day and once per block,
    /// regardless of how many events share the hash.
    pub fn apply_fees<'a, I>(&mut self, events: I, fees: &HashMap<String, TxFee>)
    where
        I: IntoIterator<Item = &'a TransferEvent>,
    {
        for event in events {
            let Some(fee) = fees.get(&event.tx_hash) else {
                continue;
            };
            let day_key = day_of_timestamp(event.timestamp);
            if let Some(day) = self.daily.get_mut(&day_key) {
                if day.fee_txs.insert(event.tx_hash.clone()) {
                    day.total_fees += fee.fee_native;
                }
            }
            if let Some(block) = self.blocks.get_mut(&event.block_number) {
                if block.fee_txs.insert(event.tx_hash.clone()) {
                    block.total_fees += fee.fee_native;
                }
            }
        }
    }
}

/// Resolved configuration for one contract's sync run.
struct SyncContext {
    contract: contracts::Model,
    chain_type: ChainType,
    batch_size: u64,
    adapter: Box<dyn ChainAdapter>,
}

pub struct ContractProcessor {
    db: DatabaseConnection,
    limiter: Arc<RateLimiterRegistry>,
    shutdown: Arc<AtomicBool>,
}

impl ContractProcessor {
    pub fn new(
        db: DatabaseConnection,
        limiter: Arc<RateLimiterRegistry>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            db,
            limiter,
            shutdown,
        }
    }

    /// Discover the contract's creation block, seed the cursor just before
    /// it, then fall through into sync.
    pub async fn discover(&self, contract_id: Uuid) -> Result<(), ProcessorError> {
        match self.discover_inner(contract_id).await {
            Ok(()) => Ok(()),
            Err(ProcessorError::Cancelled) => {
                info!(contract = %contract_id, "Discovery interrupted by shutdown");
                Ok(())
            }
            Err(e) => {
                self.mark_error(contract_id, &e.to_string()).await;
                Err(e)
            }
        }
    }

    pub async fn sync(&self, contract_id: Uuid) -> Result<(), ProcessorError> {
        match self.sync_inner(contract_id).await {
            Ok(()) => Ok(()),
            Err(ProcessorError::Cancelled) => {
                // The cursor is already persisted up to the last committed
                // batch; a clean return lets the next run resume there.
                info!(contract = %contract_id, "Sync interrupted by shutdown");
                Ok(())
            }
            Err(e) => {
                self.mark_error(contract_id, &e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Wipe the contract's derived data and rewind the cursor to zero.
    /// Returns (metrics rows deleted, blocks rows deleted).
    pub async fn reset(&self, contract_id: Uuid) -> Result<(u64, u64), ProcessorError> {
        let txn = self.db.begin().await?;
        let metrics_deleted = Metrics::delete_many()
            .filter(metrics::Column::ContractId.eq(contract_id))
            .exec(&txn)
            .await?
            .rows_affected;
        // block_addresses cascade with their blocks
        let blocks_deleted = Blocks::delete_many()
            .filter(blocks::Column::ContractId.eq(contract_id))
            .exec(&txn)
            .await?
            .rows_affected;

        let state = ensure_sync_state(&txn, contract_id).await?;
        let mut state: sync_state::ActiveModel = state.into();
        state.last_synced_block = Set(0);
        state.last_synced_at = Set(None);
        state.status = Set(status::PENDING.to_string());
        state.error_message = Set(None);
        state.updated_at = Set(Utc::now().fixed_offset());
        state.update(&txn).await?;

        txn.commit().await?;
        info!(
            contract = %contract_id,
            metrics_deleted,
            blocks_deleted,
            "Contract reset"
        );
        Ok((metrics_deleted, blocks_deleted))
    }

    async fn discover_inner(&self, contract_id: Uuid) -> Result<(), ProcessorError> {
        let mut ctx = self.load_context(contract_id).await?;

        if ctx.contract.creation_block.is_none() {
            let creation = ctx.adapter.creation_block(&ctx.contract.address).await?;
            match creation {
                Some(block) => {
                    let timestamp = match ctx.adapter.block_timestamp(block).await {
                        Ok(ts) => DateTime::from_timestamp(ts, 0),
                        Err(e) => {
                            warn!(error = %e, "Creation timestamp lookup failed");
                            None
                        }
                    };
                    info!(
                        contract = %contract_id,
                        creation_block = block,
                        "Creation block discovered"
                    );
                    let mut model: contracts::ActiveModel = ctx.contract.clone().into();
                    model.creation_block = Set(Some(block as i64));
                    model.creation_time = Set(timestamp.map(|t| t.fixed_offset()));
                    model.updated_at = Set(Some(Utc::now().fixed_offset()));
                    ctx.contract = model.update(&self.db).await?;
                }
                None => {
                    // Chains that cannot reveal creation start from genesis;
                    // operators may set the block manually
                    info!(contract = %contract_id, "Creation block unknown, starting at 0");
                }
            }
        }

        let start = ctx
            .contract
            .creation_block
            .map(|b| (b as u64).saturating_sub(1))
            .unwrap_or(0);

        let state = ensure_sync_state(&self.db, contract_id).await?;
        let mut state: sync_state::ActiveModel = state.into();
        state.last_synced_block = Set(start as i64);
        state.status = Set(status::SYNCING.to_string());
        state.error_message = Set(None);
        state.updated_at = Set(Utc::now().fixed_offset());
        state.update(&self.db).await?;

        self.run_sync(&ctx).await
    }

    async fn sync_inner(&self, contract_id: Uuid) -> Result<(), ProcessorError> {
        let ctx = self.load_context(contract_id).await?;

        let state = ensure_sync_state(&self.db, contract_id).await?;
        let mut active: sync_state::ActiveModel = state.into();
        active.status = Set(status::SYNCING.to_string());
        active.error_message = Set(None);
        active.updated_at = Set(Utc::now().fixed_offset());
        active.update(&self.db).await?;

        self.run_sync(&ctx).await
    }

    async fn run_sync(&self, ctx: &SyncContext) -> Result<(), ProcessorError> {
        let contract_id = ctx.contract.id;
        let head = ctx.adapter.current_block().await?;
        let state = ensure_sync_state(&self.db, contract_id).await?;
        let mut from = (state.last_synced_block.max(0) as u64) + 1;

        if from > head {
            debug!(contract = %contract_id, head, "Already at head");
            self.mark_synced(contract_id).await?;
            return Ok(());
        }

        info!(
            contract = %contract_id,
            from,
            head,
            batch_size = ctx.batch_size,
            "Syncing block ranges"
        );

        while from <= head {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(ProcessorError::Cancelled);
            }
            let to = head.min(from + ctx.batch_size - 1);
            let committed_to = self.process_batch_shrinking(ctx, from, to).await?;
            from = committed_to + 1;
        }

        self.finalize_supply(ctx).await?;
        self.mark_synced(contract_id).await?;
        Ok(())
    }

    /// Process `[from, to]`, halving the window whenever the provider
    /// refuses the span. Returns the upper bound actually committed.
    async fn process_batch_shrinking(
        &self,
        ctx: &SyncContext,
        from: u64,
        to: u64,
    ) -> Result<u64, ProcessorError> {
        let mut window = to - from + 1;
        loop {
            let attempt_to = from + window - 1;
            match self.process_batch(ctx, from, attempt_to).await {
                Ok(()) => return Ok(attempt_to),
                Err(ProcessorError::Adapter(AdapterError::RangeTooLarge { .. })) if window > 1 => {
                    window = (window / 2).max(1);
                    warn!(
                        contract = %ctx.contract.id,
                        from,
                        window,
                        "Provider refused range, halving"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn process_batch(
        &self,
        ctx: &SyncContext,
        from: u64,
        to: u64,
    ) -> Result<(), ProcessorError> {
        let contract_id = ctx.contract.id;
        let address = &ctx.contract.address;

        // Blocks committed by an earlier pass (every processed block has a
        // row, empty ones included) are dropped up front so a rewound
        // cursor cannot double-count.
        let already_committed: HashSet<u64> = Blocks::find()
            .filter(blocks::Column::ContractId.eq(contract_id))
            .filter(blocks::Column::BlockNumber.between(from as i64, to as i64))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|b| b.block_number as u64)
            .collect();

        let transfers = ctx.adapter.transfer_events(address, from, to).await?;
        let mint_burn = ctx.adapter.mint_burn_events(address, from, to).await?;

        let pure_transfers: Vec<TransferEvent> = transfers
            .into_iter()
            .filter(|t| {
                !is_zero_address(ctx.chain_type, &t.from)
                    && !is_zero_address(ctx.chain_type, &t.to)
            })
            .collect();

        let mut aggregates = BatchAggregates::build(
            from,
            to,
            &already_committed,
            &pure_transfers,
            &mint_burn.mints,
            &mint_burn.burns,
        );

        // Events in already-committed blocks are excluded from fee work too
        let all_events = || {
            pure_transfers
                .iter()
                .chain(mint_burn.mints.iter())
                .chain(mint_burn.burns.iter())
                .filter(|e| !already_committed.contains(&e.block_number))
        };

        let tx_hashes: Vec<String> = {
            let mut seen = HashSet::new();
            all_events()
                .filter(|e| seen.insert(e.tx_hash.clone()))
                .map(|e| e.tx_hash.clone())
                .collect()
        };

        if !tx_hashes.is_empty() {
            let fees = ctx.adapter.transaction_fees(&tx_hashes).await?;
            aggregates.apply_fees(all_events(), &fees);
        }

        self.commit_batch(contract_id, to, &aggregates).await?;

        debug!(
            contract = %contract_id,
            from,
            to,
            days = aggregates.daily.len(),
            events = pure_transfers.len() + mint_burn.mints.len() + mint_burn.burns.len(),
            "Batch committed"
        );
        Ok(())
    }

    /// One transaction per batch: daily upserts, block rows, block-address
    /// rows and the cursor advance commit or roll back together.
    async fn commit_batch(
        &self,
        contract_id: Uuid,
        to: u64,
        aggregates: &BatchAggregates,
    ) -> Result<(), ProcessorError> {
        let txn = self.db.begin().await?;

        for (day, aggregate) in &aggregates.daily {
            upsert_daily(&txn, contract_id, *day, aggregate).await?;
        }

        for (number, aggregate) in &aggregates.blocks {
            let block = blocks::ActiveModel {
                id: NotSet,
                contract_id: Set(contract_id),
                block_number: Set(*number as i64),
                timestamp: Set(aggregate
                    .timestamp
                    .and_then(|ts| DateTime::from_timestamp(ts, 0))
                    .map(|t| t.fixed_offset())),
                minted: Set(u256_to_decimal(aggregate.minted)?),
                burned: Set(u256_to_decimal(aggregate.burned)?),
                tx_count: Set(aggregate.tx_count as i32),
                total_transferred: Set(u256_to_decimal(aggregate.total_transferred)?),
                total_fees_native: Set(u256_to_decimal(aggregate.total_fees)?),
                total_supply: Set(None),
            }
            .insert(&txn)
            .await?;

            for (address, role) in &aggregate.addresses {
                block_addresses::ActiveModel {
                    id: NotSet,
                    contract_id: Set(contract_id),
                    block_id: Set(block.id),
                    address: Set(address.clone()),
                    address_type: Set((*role).to_string()),
                }
                .insert(&txn)
                .await?;
            }
        }

        let state = ensure_sync_state(&txn, contract_id).await?;
        let mut state: sync_state::ActiveModel = state.into();
        state.last_synced_block = Set(to as i64);
        state.last_synced_at = Set(Some(Utc::now().fixed_offset()));
        state.status = Set(status::SYNCING.to_string());
        state.updated_at = Set(Utc::now().fixed_offset());
        state.update(&txn).await?;

        txn.commit().await?;
        Ok(())
    }

    /// Snapshot the live supply into the most recent daily row.
    async fn finalize_supply(&self, ctx: &SyncContext) -> Result<(), ProcessorError> {
        let supply = ctx.adapter.total_supply(&ctx.contract.address).await?;
        let latest = Metrics::find()
            .filter(metrics::Column::ContractId.eq(ctx.contract.id))
            .filter(metrics::Column::Resolution.eq(resolution::DAY))
            .order_by(metrics::Column::PeriodStart, Order::Desc)
            .one(&self.db)
            .await?;

        if let Some(row) = latest {
            let mut model: metrics::ActiveModel = row.into();
            model.total_supply = Set(Some(u256_to_decimal(supply)?));
            model.updated_at = Set(Some(Utc::now().fixed_offset()));
            model.update(&self.db).await?;
        }
        Ok(())
    }

    async fn load_context(&self, contract_id: Uuid) -> Result<SyncContext, ProcessorError> {
        let contract = Contracts::find_by_id(contract_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| ProcessorError::Config(format!("Contract {} not found", contract_id)))?;
        if !contract.active {
            return Err(ProcessorError::Config(format!(
                "Contract {} is inactive",
                contract_id
            )));
        }

        let network = Networks::find_by_id(contract.network_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                ProcessorError::Config(format!("Network {} not found", contract.network_id))
            })?;
        let chain_type = ChainType::parse(&network.chain_type)
            .map_err(|e| ProcessorError::Config(e.to_string()))?;

        let endpoint = RpcEndpoints::find_by_id(contract.rpc_endpoint_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                ProcessorError::Config(format!(
                    "RPC endpoint {} not found",
                    contract.rpc_endpoint_id
                ))
            })?;
        if !endpoint.active {
            return Err(ProcessorError::Config(format!(
                "RPC endpoint {} is inactive",
                endpoint.id
            )));
        }
        if endpoint.max_requests_per_second <= 0.0 || endpoint.max_blocks_per_query <= 0 {
            return Err(ProcessorError::Config(format!(
                "RPC endpoint {} has invalid limits",
                endpoint.id
            )));
        }

        let adapter = new_adapter(
            chain_type,
            &endpoint.url,
            AdapterConfig {
                endpoint_id: endpoint.id,
                rate_per_second: endpoint.max_requests_per_second,
                max_blocks_per_query: endpoint.max_blocks_per_query as u64,
            },
            self.limiter.clone(),
            self.shutdown.clone(),
        )?;
        adapter.connect().await?;

        Ok(SyncContext {
            contract,
            chain_type,
            batch_size: endpoint.max_blocks_per_query as u64,
            adapter,
        })
    }

    async fn mark_synced(&self, contract_id: Uuid) -> Result<(), ProcessorError> {
        let state = ensure_sync_state(&self.db, contract_id).await?;
        let mut state: sync_state::ActiveModel = state.into();
        state.status = Set(status::SYNCED.to_string());
        state.error_message = Set(None);
        state.last_synced_at = Set(Some(Utc::now().fixed_offset()));
        state.updated_at = Set(Utc::now().fixed_offset());
        state.update(&self.db).await?;
        Ok(())
    }

    async fn mark_error(&self, contract_id: Uuid, message: &str) {
        let result: Result<(), ProcessorError> = async {
            let state = ensure_sync_state(&self.db, contract_id).await?;
            let mut state: sync_state::ActiveModel = state.into();
            state.status = Set(status::ERROR.to_string());
            state.error_message = Set(Some(message.to_string()));
            state.updated_at = Set(Utc::now().fixed_offset());
            state.update(&self.db).await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            warn!(contract = %contract_id, error = %e, "Failed to persist error state");
        }
    }
}

async fn upsert_daily(
    txn: &DatabaseTransaction,
    contract_id: Uuid,
    day: NaiveDate,
    aggregate: &DayAggregate,
) -> Result<(), ProcessorError> {
    let period_start = day_start(day).fixed_offset();
    let existing = Metrics::find()
        .filter(metrics::Column::ContractId.eq(contract_id))
        .filter(metrics::Column::PeriodStart.eq(period_start))
        .filter(metrics::Column::Resolution.eq(resolution::DAY))
        .one(txn)
        .await?;

    match existing {
        Some(row) => {
            let start_block = match (row.start_block, aggregate.start_block) {
                (Some(a), Some(b)) => Some(a.min(b as i64)),
                (a, b) => a.or(b.map(|v| v as i64)),
            };
            let end_block = match (row.end_block, aggregate.end_block) {
                (Some(a), Some(b)) => Some(a.max(b as i64)),
                (a, b) => a.or(b.map(|v| v as i64)),
            };
            let minted = row.minted + u256_to_decimal(aggregate.minted)?;
            let burned = row.burned + u256_to_decimal(aggregate.burned)?;
            let transferred =
                row.total_transferred + u256_to_decimal(aggregate.total_transferred)?;
            let fees = row.total_fees_native + u256_to_decimal(aggregate.total_fees)?;
            let tx_count = row.tx_count + aggregate.tx_count as i64;
            let unique_senders = row.unique_senders + aggregate.senders.len() as i64;
            let unique_receivers = row.unique_receivers + aggregate.receivers.len() as i64;

            let mut model: metrics::ActiveModel = row.into();
            model.minted = Set(minted);
            model.burned = Set(burned);
            model.tx_count = Set(tx_count);
            model.unique_senders = Set(unique_senders);
            model.unique_receivers = Set(unique_receivers);
            model.total_transferred = Set(transferred);
            model.total_fees_native = Set(fees);
            model.start_block = Set(start_block);
            model.end_block = Set(end_block);
            model.updated_at = Set(Some(Utc::now().fixed_offset()));
            model.update(txn).await?;
        }
        None => {
            metrics::ActiveModel {
                id: NotSet,
                contract_id: Set(contract_id),
                period_start: Set(period_start),
                resolution: Set(resolution::DAY),
                total_supply: Set(None),
                minted: Set(u256_to_decimal(aggregate.minted)?),
                burned: Set(u256_to_decimal(aggregate.burned)?),
                tx_count: Set(aggregate.tx_count as i64),
                unique_senders: Set(aggregate.senders.len() as i64),
                unique_receivers: Set(aggregate.receivers.len() as i64),
                total_transferred: Set(u256_to_decimal(aggregate.total_transferred)?),
                total_fees_native: Set(u256_to_decimal(aggregate.total_fees)?),
                total_fees_usd: Set(Decimal::ZERO),
                start_block: Set(aggregate.start_block.map(|b| b as i64)),
                end_block: Set(aggregate.end_block.map(|b| b as i64)),
                created_at: Set(Some(Utc::now().fixed_offset())),
                updated_at: Set(Some(Utc::now().fixed_offset())),
            }
            .insert(txn)
            .await?;
        }
    }
    Ok(())
}

/// Fetch the contract's sync-state row, creating a pending one if missing.
/// Works inside and outside batch transactions.
pub async fn ensure_sync_state<C>(conn: &C, contract_id: Uuid) -> Result<sync_state::Model, DbErr>
where
    C: sea_orm::ConnectionTrait,
{
    let existing = SyncState::find()
        .filter(sync_state::Column::ContractId.eq(contract_id))
        .one(conn)
        .await?;
    match existing {
        Some(state) => Ok(state),
        None => {
            sync_state::ActiveModel {
                id: NotSet,
                contract_id: Set(contract_id),
                last_synced_block: Set(0),
                last_synced_at: Set(None),
                status: Set(status::PENDING.to_string()),
                error_message: Set(None),
                updated_at: Set(Utc::now().fixed_offset()),
            }
            .insert(conn)
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_TS: i64 = 1_700_006_400; // 2023-11-15 00:00 UTC + 2h

    fn transfer(block: u64, tx: &str, from: &str, to: &str, value: u64) -> TransferEvent {
        TransferEvent {
            block_number: block,
            tx_hash: tx.into(),
            from: from.into(),
            to: to.into(),
            value: U256::from(value),
            timestamp: DAY_TS,
        }
    }

    fn fee(value: u64) -> TxFee {
        TxFee {
            fee_native: U256::from(value),
            fee_usd: None,
        }
    }

    #[test]
    fn test_day_bucketing_is_utc() {
        // 2023-11-14T23:59:59Z and 2023-11-15T00:00:00Z land on different days
        let before = day_of_timestamp(1_699_999_199);
        let after = day_of_timestamp(1_699_999_200);
        assert_ne!(before, after);
        assert_eq!(day_start(after).timestamp() % 86_400, 0);
    }

    #[test]
    fn test_build_aggregates_small_batch() {
        let mint = transfer(103, "0xtx1", "", "0xaa", 1_000_000);
        let pure = transfer(103, "0xtx2", "0xaa", "0xbb", 500_000);
        let aggregates = BatchAggregates::build(
            100,
            110,
            &HashSet::new(),
            &[pure],
            &[mint],
            &[],
        );

        assert_eq!(aggregates.blocks.len(), 11);
        let day = aggregates.daily.values().next().unwrap();
        assert_eq!(aggregates.daily.len(), 1);
        assert_eq!(day.minted, U256::from(1_000_000u64));
        assert_eq!(day.tx_count, 1);
        assert_eq!(day.senders.len(), 1);
        assert_eq!(day.receivers.len(), 1);
        assert_eq!(day.total_transferred, U256::from(500_000u64));
        assert_eq!(day.start_block, Some(103));
        assert_eq!(day.end_block, Some(103));

        let block = &aggregates.blocks[&103];
        assert_eq!(block.tx_count, 2);
        assert_eq!(block.timestamp, Some(DAY_TS));
        // 0xaa received the mint and sent the transfer
        assert_eq!(block.addresses["0xaa"], address_type::BOTH);
        assert_eq!(block.addresses["0xbb"], address_type::RECEIVER);

        let empty = &aggregates.blocks[&100];
        assert_eq!(empty.tx_count, 0);
        assert!(empty.timestamp.is_none());
    }

    #[test]
    fn test_fee_deduped_per_scope() {
        // Mint and transfer share one transaction hash
        let mint = transfer(103, "0xshared", "", "0xaa", 100);
        let pure = transfer(103, "0xshared", "0xaa", "0xbb", 50);
        let other = transfer(104, "0xother", "0xbb", "0xcc", 10);
        let mut aggregates = BatchAggregates::build(
            100,
            110,
            &HashSet::new(),
            &[pure.clone(), other.clone()],
            &[mint.clone()],
            &[],
        );

        let mut fees = HashMap::new();
        fees.insert("0xshared".to_string(), fee(21_000));
        fees.insert("0xother".to_string(), fee(21_000));
        let events = [pure, other, mint];
        aggregates.apply_fees(events.iter(), &fees);

        let day = aggregates.daily.values().next().unwrap();
        assert_eq!(day.total_fees, U256::from(42_000u64));
        assert_eq!(aggregates.blocks[&103].total_fees, U256::from(21_000u64));
        assert_eq!(aggregates.blocks[&104].total_fees, U256::from(21_000u64));
    }

    #[test]
    fn test_skip_blocks_already_committed() {
        let pure = transfer(103, "0xtx2", "0xaa", "0xbb", 500_000);
        let skip: HashSet<u64> = (100..=110).collect();
        let aggregates =
            BatchAggregates::build(100, 110, &skip, &[pure], &[], &[]);
        assert!(aggregates.blocks.is_empty());
        assert!(aggregates.daily.is_empty());
    }

    #[test]
    fn test_u256_to_decimal_exact() {
        let value = U256::from(123_456_789_012_345_678u64);
        assert_eq!(
            u256_to_decimal(value).unwrap(),
            Decimal::from_str("123456789012345678").unwrap()
        );
        // Values beyond Decimal's mantissa abort the batch
        let huge = U256::MAX;
        assert!(u256_to_decimal(huge).is_err());
    }
}
