use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, NotSet, Set};

use crate::entities::{prelude::*, rpc_endpoints};
use crate::models::common::ErrorResponse;
use crate::models::contract::{CreateEndpointRequest, EndpointResponse};
use crate::AppState;

fn internal_error(message: String) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: message }),
    )
}

fn to_response(model: rpc_endpoints::Model) -> EndpointResponse {
    EndpointResponse {
        id: model.id,
        url: model.url,
        max_requests_per_second: model.max_requests_per_second,
        max_blocks_per_query: model.max_blocks_per_query,
        active: model.active,
    }
}

/// GET /api/endpoints
pub async fn list_endpoints(
    State(state): State<AppState>,
) -> Result<Json<Vec<EndpointResponse>>, (StatusCode, Json<ErrorResponse>)> {
    let endpoints = RpcEndpoints::find()
        .all(&state.db)
        .await
        .map_err(|e| internal_error(format!("Failed to list endpoints: {}", e)))?;
    Ok(Json(endpoints.into_iter().map(to_response).collect()))
}

/// POST /api/endpoints
pub async fn create_endpoint(
    State(state): State<AppState>,
    Json(request): Json<CreateEndpointRequest>,
) -> Result<(StatusCode, Json<EndpointResponse>), (StatusCode, Json<ErrorResponse>)> {
    if request.max_requests_per_second <= 0.0 {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "max_requests_per_second must be positive".to_string(),
            }),
        ));
    }
    if request.max_blocks_per_query <= 0 {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "max_blocks_per_query must be positive".to_string(),
            }),
        ));
    }

    let endpoint = rpc_endpoints::ActiveModel {
        id: NotSet,
        url: Set(request.url),
        max_requests_per_second: Set(request.max_requests_per_second),
        max_blocks_per_query: Set(request.max_blocks_per_query),
        active: Set(true),
        created_at: Set(Some(Utc::now().fixed_offset())),
    }
    .insert(&state.db)
    .await
    .map_err(|e| internal_error(format!("Failed to create endpoint: {}", e)))?;

    Ok((StatusCode::CREATED, Json(to_response(endpoint))))
}
