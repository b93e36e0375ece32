//! SeaORM Entity for RPC endpoints
//!
//! Rate-limit scope is the endpoint id: every contract bound to the same
//! endpoint shares its request budget.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rpc_endpoints")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub url: String,
    /// Fractional rates allowed (0.167/s = 10/min)
    pub max_requests_per_second: f64,
    /// Upper bound on the block span of a single log query
    pub max_blocks_per_query: i32,
    pub active: bool,
    pub created_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
