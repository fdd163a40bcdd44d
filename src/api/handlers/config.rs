use std::collections::HashMap;

use axum::Json;
use axum::extract::{Path, State};
use chrono::Utc;

use crate::api::error::{ApiError, INVALID_ACCOUNT, INVALID_PROPORTIONS, INVALID_SYMBOL};
use crate::api::state::AppState;
use crate::api::types::{
    MarkRebalancedRequest, MarkRebalancedResponse, PlanningContextRequest,
    PlanningContextResponse, SymbolNotesRequest, SymbolNotesResponse,
    TargetProportionsResponse,
};

fn validate_account_id(id: &str) -> Result<(), ApiError> {
    if id.trim().is_empty() {
        return Err(ApiError::bad_request(INVALID_ACCOUNT, "empty account id"));
    }
    Ok(())
}

pub async fn mark_rebalanced(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(body): Json<MarkRebalancedRequest>,
) -> Result<Json<MarkRebalancedResponse>, ApiError> {
    validate_account_id(&account_id)?;
    let today = Utc::now().date_naive();
    state
        .config
        .mark_rebalanced(&account_id, body.model.as_deref(), today)
        .await?;
    Ok(Json(MarkRebalancedResponse {
        last_rebalance: today.format("%Y-%m-%d").to_string(),
    }))
}

pub async fn set_target_proportions(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(proportions): Json<HashMap<String, f64>>,
) -> Result<Json<TargetProportionsResponse>, ApiError> {
    validate_account_id(&account_id)?;
    if proportions.is_empty() {
        return Err(ApiError::bad_request(
            INVALID_PROPORTIONS,
            "at least one symbol is required",
        ));
    }
    let mut sum = 0.0;
    for (symbol, pct) in &proportions {
        if symbol.trim().is_empty() {
            return Err(ApiError::bad_request(INVALID_PROPORTIONS, "empty symbol key"));
        }
        if !pct.is_finite() || *pct < 0.0 || *pct > 100.0 {
            return Err(ApiError::bad_request(
                INVALID_PROPORTIONS,
                format!("'{symbol}' must be a percentage in [0, 100], got {pct}"),
            ));
        }
        sum += pct;
    }
    if sum <= 0.0 || sum > 100.01 {
        return Err(ApiError::bad_request(
            INVALID_PROPORTIONS,
            format!("proportions sum to {sum:.2}, expected (0, 100]"),
        ));
    }

    state
        .config
        .set_target_proportions(&account_id, &proportions)
        .await?;
    Ok(Json(TargetProportionsResponse {
        symbols: proportions,
    }))
}

pub async fn set_symbol_notes(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(body): Json<SymbolNotesRequest>,
) -> Result<Json<SymbolNotesResponse>, ApiError> {
    validate_account_id(&account_id)?;
    let symbol = body.symbol.trim();
    if symbol.is_empty() {
        return Err(ApiError::bad_request(INVALID_SYMBOL, "empty symbol"));
    }

    state
        .config
        .set_symbol_notes(&account_id, symbol, &body.note)
        .await?;
    Ok(Json(SymbolNotesResponse {
        symbol: symbol.to_string(),
        note: body.note,
        updated: Utc::now(),
    }))
}

pub async fn set_planning_context(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(body): Json<PlanningContextRequest>,
) -> Result<Json<PlanningContextResponse>, ApiError> {
    validate_account_id(&account_id)?;
    state
        .config
        .set_planning_context(&account_id, &body.planning_context)
        .await?;
    Ok(Json(PlanningContextResponse {
        planning_context: body.planning_context,
        updated: Utc::now(),
    }))
}
