use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};

use crate::entities::{contracts, metrics, prelude::*, stablecoins};
use crate::models::common::ErrorResponse;
use crate::models::metrics::{MetricsEntry, MetricsQuery, MetricsResponse};
use crate::services::resolution::resolve_resolution;
use crate::AppState;

fn bad_request(message: String) -> (StatusCode, Json<ErrorResponse>) {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: message }))
}

fn internal_error(message: String) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: message }),
    )
}

/// GET /api/metrics/{ticker}?from=&to=&resolution=
///
/// Rows from every deployment of the ticker are merged per period; supply
/// and counters sum across chains.
pub async fn get_metrics(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(params): Query<MetricsQuery>,
) -> Result<Json<MetricsResponse>, (StatusCode, Json<ErrorResponse>)> {
    if params.to <= params.from {
        return Err(bad_request("'to' must be after 'from'".to_string()));
    }
    let resolution = resolve_resolution(params.resolution.as_deref(), params.from, params.to)
        .map_err(bad_request)?;

    let ticker = ticker.to_uppercase();
    let stablecoin_id = match state.stablecoin_cache.get(&ticker).await {
        Some(id) => id,
        None => {
            let stablecoin = Stablecoins::find()
                .filter(stablecoins::Column::Ticker.eq(&ticker))
                .one(&state.db)
                .await
                .map_err(|e| internal_error(format!("Failed to load stablecoin: {}", e)))?
                .ok_or_else(|| {
                    (
                        StatusCode::NOT_FOUND,
                        Json(ErrorResponse {
                            error: format!("Unknown ticker {}", ticker),
                        }),
                    )
                })?;
            state
                .stablecoin_cache
                .insert(ticker.clone(), stablecoin.id)
                .await;
            stablecoin.id
        }
    };

    let contract_ids: Vec<uuid::Uuid> = Contracts::find()
        .filter(contracts::Column::StablecoinId.eq(stablecoin_id))
        .all(&state.db)
        .await
        .map_err(|e| internal_error(format!("Failed to load contracts: {}", e)))?
        .into_iter()
        .map(|c| c.id)
        .collect();

    if contract_ids.is_empty() {
        return Ok(Json(MetricsResponse {
            ticker,
            resolution,
            data: Vec::new(),
        }));
    }

    let from = DateTime::from_timestamp(params.from, 0)
        .ok_or_else(|| bad_request("Invalid 'from' timestamp".to_string()))?;
    let to = DateTime::from_timestamp(params.to, 0)
        .ok_or_else(|| bad_request("Invalid 'to' timestamp".to_string()))?;

    let rows = Metrics::find()
        .filter(metrics::Column::ContractId.is_in(contract_ids))
        .filter(metrics::Column::Resolution.eq(resolution))
        .filter(metrics::Column::PeriodStart.gte(from.fixed_offset()))
        .filter(metrics::Column::PeriodStart.lt(to.fixed_offset()))
        .order_by_asc(metrics::Column::PeriodStart)
        .all(&state.db)
        .await
        .map_err(|e| internal_error(format!("Failed to load metrics: {}", e)))?;

    let mut merged: BTreeMap<i64, MetricsEntry> = BTreeMap::new();
    for row in rows {
        let key = row.period_start.timestamp();
        let entry = merged.entry(key).or_insert_with(|| MetricsEntry {
            period_start: row.period_start.with_timezone(&Utc),
            resolution,
            total_supply: None,
            minted: Default::default(),
            burned: Default::default(),
            tx_count: 0,
            unique_senders: 0,
            unique_receivers: 0,
            total_transferred: Default::default(),
            total_fees_native: Default::default(),
            total_fees_usd: Default::default(),
            start_block: None,
            end_block: None,
        });
        entry.minted += row.minted;
        entry.burned += row.burned;
        entry.tx_count += row.tx_count;
        entry.unique_senders += row.unique_senders;
        entry.unique_receivers += row.unique_receivers;
        entry.total_transferred += row.total_transferred;
        entry.total_fees_native += row.total_fees_native;
        entry.total_fees_usd += row.total_fees_usd;
        entry.total_supply = match (entry.total_supply, row.total_supply) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };
        entry.start_block = match (entry.start_block, row.start_block) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        entry.end_block = match (entry.end_block, row.end_block) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    Ok(Json(MetricsResponse {
        ticker,
        resolution,
        data: merged.into_values().collect(),
    }))
}
