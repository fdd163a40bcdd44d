use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Query, State};
use chrono::{Duration, Utc};

use crate::api::error::{ApiError, PARSE_ERROR};
use crate::api::state::AppState;
use crate::api::types::{
    BenchmarkReturn, BenchmarkReturnsQuery, TemperatureAllocation, TemperatureQuery,
    TemperatureResponse,
};
use crate::models::temperature::{allocation_for, temperature_series};

/// Enough history for the 200-day average to be warm across a two-year
/// display range.
const LOOKBACK_DAYS: i64 = 3 * 365;

/// Benchmarks reported by /api/benchmark-returns.
const BENCHMARKS: [&str; 3] = ["QQQ", "SPY", "XIU.TO"];

async fn temperature_payload(
    state: &AppState,
    symbol: &str,
) -> Result<TemperatureResponse, ApiError> {
    let today = Utc::now().date_naive();
    let history = state
        .prices
        .daily_closes(symbol, today - Duration::days(LOOKBACK_DAYS), today, today)
        .await
        .map_err(|e| ApiError::Internal(format!("{e:#}")))?;

    let series = temperature_series(&history);
    let latest = series.last().map(|p| p.temperature);
    let allocation = latest.map(|t| {
        let split = allocation_for(t);
        TemperatureAllocation {
            tqqq: split[0],
            qqq: split[1],
            t_bills: split[2],
        }
    });

    Ok(TemperatureResponse {
        range_start: series.first().map(|p| p.date),
        range_end: series.last().map(|p| p.date),
        latest,
        allocation,
        series,
        updated: Utc::now(),
    })
}

pub async fn qqq_temperature(
    State(state): State<AppState>,
) -> Result<Json<TemperatureResponse>, ApiError> {
    Ok(Json(temperature_payload(&state, "QQQ").await?))
}

pub async fn model_temperature(
    State(state): State<AppState>,
    Query(query): Query<TemperatureQuery>,
) -> Result<Json<TemperatureResponse>, ApiError> {
    let symbol = query.symbol.unwrap_or_else(|| "QQQ".to_string());
    Ok(Json(temperature_payload(&state, &symbol).await?))
}

pub async fn benchmark_returns(
    State(state): State<AppState>,
    Query(query): Query<BenchmarkReturnsQuery>,
) -> Result<Json<BTreeMap<String, BenchmarkReturn>>, ApiError> {
    let today = Utc::now().date_naive();
    let end = query.end_date.unwrap_or(today);
    if end <= query.start_date {
        return Err(ApiError::bad_request(
            PARSE_ERROR,
            "endDate must be after startDate",
        ));
    }

    let mut out = BTreeMap::new();
    for symbol in BENCHMARKS {
        let closes = state
            .prices
            .daily_closes(symbol, query.start_date, end, today)
            .await
            .unwrap_or_default();
        let (Some(first), Some(last)) = (closes.first(), closes.last()) else {
            continue;
        };
        let days = (last.date - first.date).num_days();
        if days < 1 || first.close <= 0.0 {
            continue;
        }
        let annualized_rate = (last.close / first.close).powf(365.0 / days as f64) - 1.0;
        out.insert(
            symbol.to_string(),
            BenchmarkReturn {
                start_date: first.date,
                end_date: last.date,
                start_close: first.close,
                end_close: last.close,
                annualized_rate,
            },
        );
    }
    Ok(Json(out))
}
