pub mod common;
pub mod contract;
pub mod metrics;
pub mod sync;
