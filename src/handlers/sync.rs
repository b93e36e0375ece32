use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use uuid::Uuid;

use crate::entities::{prelude::*, sync_state, sync_state::status};
use crate::models::common::ErrorResponse;
use crate::models::sync::{ResetContractResponse, SyncStatusResponse, TriggerSyncResponse};
use crate::services::queue::{job_id, KIND_DISCOVER, KIND_SYNC};
use crate::AppState;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

fn internal_error(message: String) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: message }),
    )
}

async fn find_contract(
    state: &AppState,
    contract_id: Uuid,
) -> Result<crate::entities::contracts::Model, (StatusCode, Json<ErrorResponse>)> {
    Contracts::find_by_id(contract_id)
        .one(&state.db)
        .await
        .map_err(|e| internal_error(format!("Failed to load contract: {}", e)))?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: format!("Contract {} not found", contract_id),
                }),
            )
        })
}

/// POST /api/contracts/{id}/sync — enqueue a sync run. 409 while a job for
/// this contract is already in flight.
pub async fn trigger_sync(
    State(state): State<AppState>,
    Path(contract_id): Path<Uuid>,
) -> Result<(StatusCode, Json<TriggerSyncResponse>), (StatusCode, Json<ErrorResponse>)> {
    find_contract(&state, contract_id).await?;

    let enqueued = state
        .queue
        .enqueue(KIND_SYNC, Some(contract_id))
        .await
        .map_err(|e| internal_error(format!("Failed to enqueue sync: {}", e)))?;

    let response = TriggerSyncResponse {
        contract_id,
        job_id: job_id(KIND_SYNC, Some(contract_id)),
        enqueued,
    };
    let code = if enqueued {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CONFLICT
    };
    Ok((code, Json(response)))
}

/// POST /api/contracts/{id}/reset — wipe derived rows, rewind the cursor to
/// zero and re-enqueue discovery.
pub async fn reset_contract(
    State(state): State<AppState>,
    Path(contract_id): Path<Uuid>,
) -> Result<Json<ResetContractResponse>, (StatusCode, Json<ErrorResponse>)> {
    find_contract(&state, contract_id).await?;

    let (metrics_deleted, blocks_deleted) = state
        .processor
        .reset(contract_id)
        .await
        .map_err(|e| internal_error(format!("Reset failed: {}", e)))?;

    state
        .queue
        .enqueue(KIND_DISCOVER, Some(contract_id))
        .await
        .map_err(|e| internal_error(format!("Failed to enqueue discovery: {}", e)))?;

    Ok(Json(ResetContractResponse {
        contract_id,
        metrics_deleted,
        blocks_deleted,
        job_id: job_id(KIND_DISCOVER, Some(contract_id)),
    }))
}

/// GET /api/contracts/{id}/sync-status
pub async fn get_sync_status(
    State(state): State<AppState>,
    Path(contract_id): Path<Uuid>,
) -> Result<Json<SyncStatusResponse>, (StatusCode, Json<ErrorResponse>)> {
    find_contract(&state, contract_id).await?;

    let record = SyncState::find()
        .filter(sync_state::Column::ContractId.eq(contract_id))
        .one(&state.db)
        .await
        .map_err(|e| internal_error(format!("Failed to load sync state: {}", e)))?;

    let response = match record {
        Some(record) => SyncStatusResponse {
            contract_id,
            status: record.status,
            last_synced_block: record.last_synced_block,
            last_synced_at: record.last_synced_at.map(|t| t.with_timezone(&Utc)),
            error_message: record.error_message,
            updated_at: record.updated_at.with_timezone(&Utc),
        },
        // Discovery has not touched the contract yet
        None => SyncStatusResponse {
            contract_id,
            status: status::PENDING.to_string(),
            last_synced_block: 0,
            last_synced_at: None,
            error_message: None,
            updated_at: Utc::now(),
        },
    };
    Ok(Json(response))
}
