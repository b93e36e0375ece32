//! SeaORM Entity for blockchain networks

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "networks")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Network name (e.g. "ethereum", "tron", "solana-mainnet")
    #[sea_orm(unique)]
    pub name: String,
    /// Chain family: 'evm', 'tron', 'solana'
    pub chain_type: String,
    pub created_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
