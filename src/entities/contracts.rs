//! SeaORM Entity for token contract deployments
//!
//! One row per (token, chain) deployment. Immutable after creation except
//! for discovered creation info and the active flag.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "contracts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub stablecoin_id: i32,
    pub network_id: i32,
    /// Token address in the chain's native format
    pub address: String,
    pub decimals: i32,
    pub rpc_endpoint_id: i32,
    /// Smallest block at which the contract code is present, once discovered
    pub creation_block: Option<i64>,
    pub creation_time: Option<DateTimeWithTimeZone>,
    pub active: bool,
    pub created_at: Option<DateTimeWithTimeZone>,
    pub updated_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
