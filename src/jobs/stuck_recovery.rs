//! Stuck-contract recovery job
//!
//! A contract can be left in `syncing` forever if its worker died without
//! failing the job. Every 30 seconds, contracts whose state has not moved
//! for over two hours and that have no queue job are flipped to `error`; the
//! catch-up timer then retries them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tokio::time::{interval, Duration as TokioDuration};
use tracing::{error, info, warn};

use crate::entities::{prelude::*, sync_state, sync_state::status};
use crate::services::queue::{job_id, JobQueue, KIND_DISCOVER, KIND_SYNC};

const RECOVERY_INTERVAL_SECS: u64 = 30;

/// A syncing contract untouched for this long is considered stuck
const STUCK_THRESHOLD_HOURS: i64 = 2;

pub async fn start_stuck_recovery_job(
    db: DatabaseConnection,
    queue: Arc<JobQueue>,
    shutdown: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        info!(
            interval_secs = RECOVERY_INTERVAL_SECS,
            threshold_hours = STUCK_THRESHOLD_HOURS,
            "Stuck-contract recovery job started"
        );
        let mut interval = interval(TokioDuration::from_secs(RECOVERY_INTERVAL_SECS));

        loop {
            interval.tick().await;
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            if let Err(e) = recover_stuck_contracts(&db, &queue).await {
                error!(error = %e, "Stuck-contract recovery pass failed");
            }
        }
        info!("Stuck-contract recovery job stopped");
    });
}

async fn recover_stuck_contracts(
    db: &DatabaseConnection,
    queue: &JobQueue,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cutoff = Utc::now() - Duration::hours(STUCK_THRESHOLD_HOURS);

    let stuck = SyncState::find()
        .filter(sync_state::Column::Status.eq(status::SYNCING))
        .filter(sync_state::Column::UpdatedAt.lt(cutoff.fixed_offset()))
        .all(db)
        .await?;

    for state in stuck {
        let contract_id = state.contract_id;
        let sync_running = queue
            .is_in_flight(&job_id(KIND_SYNC, Some(contract_id)))
            .await?;
        let discover_running = queue
            .is_in_flight(&job_id(KIND_DISCOVER, Some(contract_id)))
            .await?;
        if sync_running || discover_running {
            continue;
        }

        warn!(
            contract = %contract_id,
            updated_at = %state.updated_at,
            "Recovering contract from stuck syncing state"
        );
        let mut model: sync_state::ActiveModel = state.into();
        model.status = Set(status::ERROR.to_string());
        model.error_message = Set(Some(format!(
            "stuck syncing state: no progress for over {} hours and no active job",
            STUCK_THRESHOLD_HOURS
        )));
        model.updated_at = Set(Utc::now().fixed_offset());
        model.update(db).await?;
    }
    Ok(())
}
