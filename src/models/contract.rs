use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContractRequest {
    pub stablecoin_id: i32,
    pub network_id: i32,
    pub address: String,
    pub decimals: Option<i32>,
    pub rpc_endpoint_id: i32,
    /// Operators may supply the creation block for chains that cannot
    /// reveal it (Tron, Solana)
    pub creation_block: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractResponse {
    pub id: Uuid,
    pub stablecoin_id: i32,
    pub network_id: i32,
    pub address: String,
    pub decimals: i32,
    pub rpc_endpoint_id: i32,
    pub creation_block: Option<i64>,
    pub creation_time: Option<DateTime<Utc>>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEndpointRequest {
    pub url: String,
    pub max_requests_per_second: f64,
    pub max_blocks_per_query: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointResponse {
    pub id: i32,
    pub url: String,
    pub max_requests_per_second: f64,
    pub max_blocks_per_query: i32,
    pub active: bool,
}
