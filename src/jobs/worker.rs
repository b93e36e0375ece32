//! Queue worker
//!
//! Consumes jobs from the durable queue and dispatches them to the contract
//! processor / rollup engine. On startup the queue is reconciled: jobs left
//! active by a crashed run are failed, waiting and delayed jobs survive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::time::{interval, Duration as TokioDuration};
use tracing::{error, info, warn};

use crate::services::processor::ContractProcessor;
use crate::services::queue::{Job, JobQueue, KIND_AGGREGATE, KIND_DISCOVER, KIND_SYNC};
use crate::services::rollup::RollupEngine;

/// Queue poll cadence while idle
const POLL_INTERVAL_SECS: u64 = 1;

pub async fn start_queue_worker(
    queue: Arc<JobQueue>,
    processor: Arc<ContractProcessor>,
    rollup: Arc<RollupEngine>,
    shutdown: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        if let Err(e) = queue.reconcile_on_start().await {
            error!(error = %e, "Queue reconciliation failed");
        }
        info!("Queue worker started");

        let mut interval = interval(TokioDuration::from_secs(POLL_INTERVAL_SECS));
        loop {
            interval.tick().await;
            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            // Drain everything runnable before sleeping again
            loop {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                match queue.next_job().await {
                    Ok(Some(job)) => {
                        handle_job(&queue, &processor, &rollup, job).await;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "Failed to poll queue");
                        break;
                    }
                }
            }
        }
        info!("Queue worker stopped");
    });
}

async fn handle_job(
    queue: &JobQueue,
    processor: &ContractProcessor,
    rollup: &RollupEngine,
    job: Job,
) {
    info!(job_id = %job.id, kind = %job.kind, attempt = job.attempts, "Running job");

    let run = async {
        match job.kind.as_str() {
            KIND_DISCOVER => {
                let contract_id = job
                    .payload
                    .contract_id
                    .ok_or_else(|| "discover job without contractId".to_string())?;
                processor
                    .discover(contract_id)
                    .await
                    .map_err(|e| e.to_string())
            }
            KIND_SYNC => {
                let contract_id = job
                    .payload
                    .contract_id
                    .ok_or_else(|| "sync job without contractId".to_string())?;
                processor.sync(contract_id).await.map_err(|e| e.to_string())
            }
            KIND_AGGREGATE => rollup.run().await.map(|_| ()).map_err(|e| e.to_string()),
            other => Err(format!("unknown job kind: {}", other)),
        }
    };

    let outcome = tokio::time::timeout(job.timeout(), run).await;
    let result = match outcome {
        Ok(result) => result,
        Err(_) => Err(format!(
            "job exceeded its {}s deadline",
            job.timeout().as_secs()
        )),
    };

    match result {
        Ok(()) => {
            if let Err(e) = queue.complete(&job).await {
                error!(job_id = %job.id, error = %e, "Failed to mark job completed");
            }
        }
        Err(message) => {
            warn!(job_id = %job.id, error = %message, "Job failed");
            if let Err(e) = queue.fail(&job, &message).await {
                error!(job_id = %job.id, error = %e, "Failed to record job failure");
            }
        }
    }
}
