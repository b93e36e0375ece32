//! Catch-up sync job
//!
//! Every 30 seconds, enqueue a sync for every active contract whose state is
//! `synced` (new blocks to chase) or `error` (periodic recovery attempt) and
//! that has no job in flight.

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tokio::time::{interval, Duration as TokioDuration};
use tracing::{debug, error, info};

use crate::entities::{contracts, prelude::*, sync_state, sync_state::status};
use crate::services::queue::{job_id, JobQueue, KIND_SYNC};

/// Default catch-up cadence in seconds
const DEFAULT_CATCH_UP_INTERVAL_SECS: u64 = 30;

const ENV_CATCH_UP_INTERVAL: &str = "CATCH_UP_INTERVAL_SECS";

pub async fn start_catch_up_sync_job(
    db: DatabaseConnection,
    queue: Arc<JobQueue>,
    shutdown: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        let interval_secs: u64 = env::var(ENV_CATCH_UP_INTERVAL)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CATCH_UP_INTERVAL_SECS);

        info!(interval_secs, "Catch-up sync job started");
        let mut interval = interval(TokioDuration::from_secs(interval_secs));

        loop {
            interval.tick().await;
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            if let Err(e) = enqueue_catch_up_syncs(&db, &queue).await {
                error!(error = %e, "Catch-up pass failed");
            }
        }
        info!("Catch-up sync job stopped");
    });
}

async fn enqueue_catch_up_syncs(
    db: &DatabaseConnection,
    queue: &JobQueue,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let active_contracts = Contracts::find()
        .filter(contracts::Column::Active.eq(true))
        .all(db)
        .await?;

    let mut enqueued = 0usize;
    for contract in active_contracts {
        let state = SyncState::find()
            .filter(sync_state::Column::ContractId.eq(contract.id))
            .one(db)
            .await?;
        let Some(state) = state else {
            continue;
        };
        if state.status != status::SYNCED && state.status != status::ERROR {
            continue;
        }
        if queue.is_in_flight(&job_id(KIND_SYNC, Some(contract.id))).await? {
            continue;
        }
        if queue.enqueue(KIND_SYNC, Some(contract.id)).await? {
            enqueued += 1;
        }
    }

    if enqueued > 0 {
        debug!(enqueued, "Catch-up syncs enqueued");
    }
    Ok(())
}
