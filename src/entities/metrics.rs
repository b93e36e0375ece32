//! SeaORM Entity for metrics time-series rollups
//!
//! Rows are unique on (contract_id, period_start, resolution). Supply,
//! volume and fee columns hold integer token/native base units at full
//! precision; `total_fees_usd` is reserved and always zero.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "metrics")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub contract_id: Uuid,
    /// UTC boundary aligned to `resolution` seconds
    pub period_start: DateTimeWithTimeZone,
    /// 86400 | 864000 | 8640000 | 86400000 (seconds)
    pub resolution: i32,
    #[sea_orm(column_type = "Decimal(Some((78, 0)))", nullable)]
    pub total_supply: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((78, 0)))")]
    pub minted: Decimal,
    #[sea_orm(column_type = "Decimal(Some((78, 0)))")]
    pub burned: Decimal,
    pub tx_count: i64,
    /// Incremental sum across batches, not an exact distinct count
    pub unique_senders: i64,
    pub unique_receivers: i64,
    #[sea_orm(column_type = "Decimal(Some((78, 0)))")]
    pub total_transferred: Decimal,
    #[sea_orm(column_type = "Decimal(Some((78, 0)))")]
    pub total_fees_native: Decimal,
    #[sea_orm(column_type = "Decimal(Some((78, 0)))")]
    pub total_fees_usd: Decimal,
    pub start_block: Option<i64>,
    pub end_block: Option<i64>,
    pub created_at: Option<DateTimeWithTimeZone>,
    pub updated_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Supported resolutions in seconds
pub mod resolution {
    pub const DAY: i32 = 86_400;
    pub const TEN_DAYS: i32 = 864_000;
    pub const HUNDRED_DAYS: i32 = 8_640_000;
    pub const THOUSAND_DAYS: i32 = 86_400_000;
}
