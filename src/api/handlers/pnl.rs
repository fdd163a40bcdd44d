use axum::Json;
use axum::extract::{Path, Query, State};

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::api::types::{PnlSeriesQuery, PnlSeriesResponse};

pub async fn total_pnl_series(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Query(query): Query<PnlSeriesQuery>,
) -> Result<Json<PnlSeriesResponse>, ApiError> {
    let apply = query.apply_account_cagr_start_date.unwrap_or(true);
    let result = state
        .aggregator
        .pnl_series(&account_id, apply)
        .await
        .map_err(|e| ApiError::Internal(format!("{e:#}")))?;

    match result {
        Some((series, summary)) => Ok(Json(PnlSeriesResponse { series, summary })),
        None => Err(ApiError::NotFound(format!(
            "no account matching '{account_id}'"
        ))),
    }
}
