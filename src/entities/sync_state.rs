//! SeaORM Entity for per-contract sync state
//!
//! Exactly one row per contract; `last_synced_block` is the sole cursor and
//! is monotonically non-decreasing except for explicit operator resets.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_state")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub contract_id: Uuid,
    pub last_synced_block: i64,
    pub last_synced_at: Option<DateTimeWithTimeZone>,
    /// 'pending' | 'syncing' | 'synced' | 'error'
    pub status: String,
    pub error_message: Option<String>,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Status values for `sync_state.status`
pub mod status {
    pub const PENDING: &str = "pending";
    pub const SYNCING: &str = "syncing";
    pub const SYNCED: &str = "synced";
    pub const ERROR: &str = "error";
}
