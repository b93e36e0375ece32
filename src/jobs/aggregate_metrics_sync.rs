//! Aggregation timer
//!
//! Enqueues one `aggregate-metrics` job per hour. The job id is the fixed
//! key `aggregate`, so a sweep already queued or running is never doubled.

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::time::{interval, Duration as TokioDuration};
use tracing::{debug, error, info};

use crate::services::queue::{JobQueue, KIND_AGGREGATE};

const DEFAULT_AGGREGATE_INTERVAL_SECS: u64 = 3600;

const ENV_AGGREGATE_INTERVAL: &str = "AGGREGATE_INTERVAL_SECS";

pub async fn start_aggregate_metrics_job(queue: Arc<JobQueue>, shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let interval_secs: u64 = env::var(ENV_AGGREGATE_INTERVAL)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_AGGREGATE_INTERVAL_SECS);

        info!(interval_secs, "Aggregation timer started");
        let mut interval = interval(TokioDuration::from_secs(interval_secs));

        loop {
            interval.tick().await;
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            match queue.enqueue(KIND_AGGREGATE, None).await {
                Ok(true) => debug!("Aggregation sweep enqueued"),
                Ok(false) => debug!("Aggregation sweep already in flight"),
                Err(e) => error!(error = %e, "Failed to enqueue aggregation sweep"),
            }
        }
        info!("Aggregation timer stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_interval() {
        assert_eq!(DEFAULT_AGGREGATE_INTERVAL_SECS, 3600);
    }
}
