pub mod aggregate_metrics_sync;
pub mod catch_up_sync;
pub mod stuck_recovery;
pub mod worker;
