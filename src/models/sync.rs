use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusResponse {
    pub contract_id: Uuid,
    pub status: String,
    pub last_synced_block: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSyncResponse {
    pub contract_id: Uuid,
    pub job_id: String,
    /// false when a job for this contract is already in flight
    pub enqueued: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetContractResponse {
    pub contract_id: Uuid,
    pub metrics_deleted: u64,
    pub blocks_deleted: u64,
    pub job_id: String,
}
