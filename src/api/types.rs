use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::model::series::{FundingSummary, PnlSeries};
use crate::models::temperature::TemperaturePoint;

// ── Request types ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryQuery {
    pub account_id: Option<String>,
    /// Opaque client token; present so refreshes bust intermediary
    /// caches, unused server-side.
    #[allow(dead_code)]
    pub refresh_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PnlSeriesQuery {
    pub apply_account_cagr_start_date: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct MarkRebalancedRequest {
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SymbolNotesRequest {
    pub symbol: String,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningContextRequest {
    #[serde(default)]
    pub planning_context: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvestEvenlyBody {
    pub cad_cash_override: Option<f64>,
    pub usd_cash_override: Option<f64>,
    pub use_target_proportions: Option<bool>,
    pub skip_cad: bool,
    pub skip_usd: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentBody {
    pub target_deployed_percent: f64,
    #[serde(default)]
    pub reserve_symbols: Option<Vec<String>>,
    #[serde(default)]
    pub fallback_reserve_symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TemperatureQuery {
    pub symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkReturnsQuery {
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

// ── Response types ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PnlSeriesResponse {
    #[serde(flatten)]
    pub series: PnlSeries,
    pub summary: FundingSummary,
}

#[derive(Debug, Serialize)]
pub struct TemperatureAllocation {
    pub tqqq: f64,
    pub qqq: f64,
    #[serde(rename = "tBills")]
    pub t_bills: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureResponse {
    pub series: Vec<TemperaturePoint>,
    pub latest: Option<f64>,
    pub allocation: Option<TemperatureAllocation>,
    pub updated: DateTime<Utc>,
    pub range_start: Option<NaiveDate>,
    pub range_end: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkReturn {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_close: f64,
    pub end_close: f64,
    pub annualized_rate: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRebalancedResponse {
    pub last_rebalance: String,
}

#[derive(Debug, Serialize)]
pub struct TargetProportionsResponse {
    pub symbols: HashMap<String, f64>,
}

#[derive(Debug, Serialize)]
pub struct SymbolNotesResponse {
    pub symbol: String,
    pub note: String,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningContextResponse {
    pub planning_context: String,
    pub updated: DateTime<Utc>,
}

/// Planner endpoints degrade to a user-facing message instead of a 4xx
/// when the inputs cannot produce a plan.
#[derive(Debug, Serialize)]
pub struct PlanResponse<T: Serialize> {
    pub plan: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
