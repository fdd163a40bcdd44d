use std::collections::HashSet;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{Duration, NaiveDate, Utc};

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::api::types::{DeploymentBody, InvestEvenlyBody, PlanResponse};
use crate::model::account::AccountSettings;
use crate::model::balance::Position;
use crate::model::plan::{DeploymentPlan, InvestEvenlyPlan};
use crate::model::{Currency, symbol_currency};
use crate::planner::{
    CashPools, DLR_CAD, DLR_USD, DeploymentRequest, DlrPrices, FallbackReserve,
    InvestEvenlyRequest, PlannerPosition, deployment_adjustment, invest_evenly,
};

/// Most recent close of a symbol: the trailing week of dailies, falling
/// back to whatever older close the cache still holds.
async fn latest_close(state: &AppState, symbol: &str, today: NaiveDate) -> Option<f64> {
    let recent = state
        .prices
        .daily_closes(symbol, today - Duration::days(7), today, today)
        .await
        .ok()
        .and_then(|points| points.last().map(|p| p.close));
    match recent {
        Some(close) => Some(close),
        None => state
            .prices
            .latest_on_or_before(symbol, today)
            .await
            .map(|p| p.close),
    }
}

async fn dlr_prices(state: &AppState, today: NaiveDate) -> Option<DlrPrices> {
    let cad = latest_close(state, DLR_CAD, today).await?;
    let usd = latest_close(state, DLR_USD, today).await?;
    Some(DlrPrices { cad, usd })
}

fn planner_positions(
    positions: &[Position],
    settings: &AccountSettings,
    usd_to_cad: f64,
) -> Vec<PlannerPosition> {
    positions
        .iter()
        .map(|p| {
            let symbol_settings = settings.symbols.get(&p.symbol);
            PlannerPosition {
                symbol: p.symbol.clone(),
                currency: p.currency,
                quantity: p.open_quantity,
                price: p.current_price,
                market_value: p.current_market_value,
                market_value_cad: p.market_value_cad(usd_to_cad),
                target_proportion: symbol_settings.and_then(|s| s.target_proportion),
                note: symbol_settings.and_then(|s| s.notes.clone()),
            }
        })
        .collect()
}

pub async fn plan_invest_evenly(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(body): Json<InvestEvenlyBody>,
) -> Result<Json<PlanResponse<InvestEvenlyPlan>>, ApiError> {
    let context = state
        .aggregator
        .account_context(&account_id)
        .await
        .map_err(|e| ApiError::Internal(format!("{e:#}")))?;
    let Some((_, settings, balances, positions)) = context else {
        return Err(ApiError::NotFound(format!(
            "no account matching '{account_id}'"
        )));
    };

    let today = Utc::now().date_naive();
    let fx = state.aggregator.fx_table(today).await;
    let usd_to_cad = fx.latest().unwrap_or(1.0);

    let request = InvestEvenlyRequest {
        positions: planner_positions(&positions, &settings, usd_to_cad),
        cash: CashPools {
            cad: body
                .cad_cash_override
                .unwrap_or_else(|| balances.cash(Currency::Cad)),
            usd: body
                .usd_cash_override
                .unwrap_or_else(|| balances.cash(Currency::Usd)),
        },
        usd_to_cad,
        use_target_proportions: body.use_target_proportions.unwrap_or(true),
        skip_cad: body.skip_cad,
        skip_usd: body.skip_usd,
        dlr: dlr_prices(&state, today).await,
    };

    Ok(Json(match invest_evenly(&request) {
        Ok(plan) => PlanResponse {
            plan: Some(plan),
            message: None,
        },
        Err(e) => PlanResponse {
            plan: None,
            message: Some(e.to_string()),
        },
    }))
}

pub async fn plan_deployment_adjustment(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(body): Json<DeploymentBody>,
) -> Result<Json<PlanResponse<DeploymentPlan>>, ApiError> {
    let context = state
        .aggregator
        .account_context(&account_id)
        .await
        .map_err(|e| ApiError::Internal(format!("{e:#}")))?;
    let Some((_, settings, balances, positions)) = context else {
        return Err(ApiError::NotFound(format!(
            "no account matching '{account_id}'"
        )));
    };

    let today = Utc::now().date_naive();
    let fx = state.aggregator.fx_table(today).await;
    let usd_to_cad = fx.latest().unwrap_or(1.0);

    // Reserve membership comes from the request, falling back to the
    // account's configured model reserve symbols.
    let reserve_symbols: HashSet<String> = match &body.reserve_symbols {
        Some(symbols) => symbols.iter().cloned().collect(),
        None => settings
            .investment_models
            .iter()
            .filter_map(|m| m.reserve_symbol.clone())
            .collect(),
    };

    let fallback_reserve = match &body.fallback_reserve_symbol {
        Some(symbol) => latest_close(&state, symbol, today)
            .await
            .map(|price| FallbackReserve {
                symbol: symbol.clone(),
                currency: symbol_currency(symbol),
                price,
            }),
        None => None,
    };

    let request = DeploymentRequest {
        positions: planner_positions(&positions, &settings, usd_to_cad),
        cash: CashPools {
            cad: balances.cash(Currency::Cad),
            usd: balances.cash(Currency::Usd),
        },
        usd_to_cad,
        reserve_symbols,
        fallback_reserve,
        target_deployed_percent: body.target_deployed_percent,
        dlr: dlr_prices(&state, today).await,
    };

    Ok(Json(match deployment_adjustment(&request) {
        Ok(plan) => PlanResponse {
            plan: Some(plan),
            message: None,
        },
        Err(e) => PlanResponse {
            plan: None,
            message: Some(e.to_string()),
        },
    }))
}
