pub use sea_orm_migration::prelude::*;

mod m20260115_000001_create_companies;
mod m20260115_000002_create_stablecoins;
mod m20260115_000003_create_networks;
mod m20260115_000004_create_rpc_endpoints;
mod m20260115_000005_create_contracts;
mod m20260115_000006_create_sync_state;
mod m20260115_000007_create_metrics;
mod m20260115_000008_create_blocks;
mod m20260115_000009_create_block_addresses;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260115_000001_create_companies::Migration),
            Box::new(m20260115_000002_create_stablecoins::Migration),
            Box::new(m20260115_000003_create_networks::Migration),
            Box::new(m20260115_000004_create_rpc_endpoints::Migration),
            Box::new(m20260115_000005_create_contracts::Migration),
            Box::new(m20260115_000006_create_sync_state::Migration),
            Box::new(m20260115_000007_create_metrics::Migration),
            Box::new(m20260115_000008_create_blocks::Migration),
            Box::new(m20260115_000009_create_block_addresses::Migration),
        ]
    }
}
