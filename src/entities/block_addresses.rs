//! SeaORM Entity for per-block address roles
//!
//! `address_type` reflects the role observed within that block only; an
//! address seen as both sender and receiver in one block is stored as 'both'.
//! Rows cascade-delete with their block.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "block_addresses")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub contract_id: Uuid,
    pub block_id: i64,
    pub address: String,
    /// 'sender' | 'receiver' | 'both'
    pub address_type: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Role values for `block_addresses.address_type`
pub mod address_type {
    pub const SENDER: &str = "sender";
    pub const RECEIVER: &str = "receiver";
    pub const BOTH: &str = "both";
}
