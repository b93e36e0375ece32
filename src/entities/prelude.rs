//! Re-exports of all entity types

pub use super::block_addresses::Entity as BlockAddresses;
pub use super::blocks::Entity as Blocks;
pub use super::companies::Entity as Companies;
pub use super::contracts::Entity as Contracts;
pub use super::metrics::Entity as Metrics;
pub use super::networks::Entity as Networks;
pub use super::rpc_endpoints::Entity as RpcEndpoints;
pub use super::stablecoins::Entity as Stablecoins;
pub use super::sync_state::Entity as SyncState;
