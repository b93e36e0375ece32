//! SeaORM Entity for per-block summaries
//!
//! Every block in a synced range gets a row; blocks without events carry a
//! NULL timestamp. Unique on (contract_id, block_number).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "blocks")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub contract_id: Uuid,
    pub block_number: i64,
    pub timestamp: Option<DateTimeWithTimeZone>,
    #[sea_orm(column_type = "Decimal(Some((78, 0)))")]
    pub minted: Decimal,
    #[sea_orm(column_type = "Decimal(Some((78, 0)))")]
    pub burned: Decimal,
    /// Transfer + mint + burn events in this block
    pub tx_count: i32,
    #[sea_orm(column_type = "Decimal(Some((78, 0)))")]
    pub total_transferred: Decimal,
    #[sea_orm(column_type = "Decimal(Some((78, 0)))")]
    pub total_fees_native: Decimal,
    #[sea_orm(column_type = "Decimal(Some((78, 0)))", nullable)]
    pub total_supply: Option<Decimal>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
