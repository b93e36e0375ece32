use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use uuid::Uuid;

use crate::entities::{contracts, prelude::*};
use crate::models::common::ErrorResponse;
use crate::models::contract::{ContractResponse, CreateContractRequest};
use crate::services::processor::ensure_sync_state;
use crate::services::queue::KIND_DISCOVER;
use crate::AppState;

fn internal_error(message: String) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: message }),
    )
}

fn to_response(model: contracts::Model) -> ContractResponse {
    ContractResponse {
        id: model.id,
        stablecoin_id: model.stablecoin_id,
        network_id: model.network_id,
        address: model.address,
        decimals: model.decimals,
        rpc_endpoint_id: model.rpc_endpoint_id,
        creation_block: model.creation_block,
        creation_time: model.creation_time.map(|t| t.with_timezone(&Utc)),
        active: model.active,
    }
}

/// GET /api/contracts
pub async fn list_contracts(
    State(state): State<AppState>,
) -> Result<Json<Vec<ContractResponse>>, (StatusCode, Json<ErrorResponse>)> {
    let contracts = Contracts::find()
        .all(&state.db)
        .await
        .map_err(|e| internal_error(format!("Failed to list contracts: {}", e)))?;
    Ok(Json(contracts.into_iter().map(to_response).collect()))
}

/// POST /api/contracts — register a deployment and enqueue its discovery.
pub async fn create_contract(
    State(state): State<AppState>,
    Json(request): Json<CreateContractRequest>,
) -> Result<(StatusCode, Json<ContractResponse>), (StatusCode, Json<ErrorResponse>)> {
    let stablecoin = Stablecoins::find_by_id(request.stablecoin_id)
        .one(&state.db)
        .await
        .map_err(|e| internal_error(format!("Failed to load stablecoin: {}", e)))?;
    if stablecoin.is_none() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("Stablecoin {} not found", request.stablecoin_id),
            }),
        ));
    }
    let network = Networks::find_by_id(request.network_id)
        .one(&state.db)
        .await
        .map_err(|e| internal_error(format!("Failed to load network: {}", e)))?;
    if network.is_none() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("Network {} not found", request.network_id),
            }),
        ));
    }
    let endpoint = RpcEndpoints::find_by_id(request.rpc_endpoint_id)
        .one(&state.db)
        .await
        .map_err(|e| internal_error(format!("Failed to load endpoint: {}", e)))?;
    if endpoint.is_none() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("RPC endpoint {} not found", request.rpc_endpoint_id),
            }),
        ));
    }

    let contract = contracts::ActiveModel {
        id: Set(Uuid::new_v4()),
        stablecoin_id: Set(request.stablecoin_id),
        network_id: Set(request.network_id),
        address: Set(request.address),
        decimals: Set(request.decimals.unwrap_or(18)),
        rpc_endpoint_id: Set(request.rpc_endpoint_id),
        creation_block: Set(request.creation_block),
        creation_time: Set(None),
        active: Set(true),
        created_at: Set(Some(Utc::now().fixed_offset())),
        updated_at: Set(Some(Utc::now().fixed_offset())),
    }
    .insert(&state.db)
    .await
    .map_err(|e| internal_error(format!("Failed to create contract: {}", e)))?;

    ensure_sync_state(&state.db, contract.id)
        .await
        .map_err(|e| internal_error(format!("Failed to create sync state: {}", e)))?;

    state
        .queue
        .enqueue(KIND_DISCOVER, Some(contract.id))
        .await
        .map_err(|e| internal_error(format!("Failed to enqueue discovery: {}", e)))?;

    Ok((StatusCode::CREATED, Json(to_response(contract))))
}
