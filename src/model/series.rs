use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ── Prices ──────────────────────────────────────────────────────────

/// A daily closing price in the symbol's native currency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

// ── Total-P&L series ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PnlPoint {
    pub date: NaiveDate,
    pub cumulative_net_deposits_cad: f64,
    pub equity_cad: f64,
    pub total_pnl_cad: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PnlSeries {
    pub points: Vec<PnlPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_end_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub issues: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub missing_price_symbols: Vec<String>,
}

// ── Funding summary ─────────────────────────────────────────────────

/// All-time and since-display-start variants of a CAD figure.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoneyPair {
    pub all_time_cad: f64,
    pub combined_cad: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnualizedReturn {
    pub rate: Option<f64>,
    pub as_of: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    pub incomplete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnBreakdownEntry {
    /// Canonical period label: 1m, 6m, 12m, 5y, 10y.
    pub period: String,
    pub start_date: NaiveDate,
    pub total_return_cad: f64,
    pub annualized_rate: Option<f64>,
    pub incomplete: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingSummary {
    pub net_deposits: MoneyPair,
    pub total_pnl: MoneyPair,
    pub total_equity_cad: f64,
    pub annualized_return: AnnualizedReturn,
    pub annualized_return_all_time: AnnualizedReturn,
    pub return_breakdown: Vec<ReturnBreakdownEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cagr_start_date: Option<NaiveDate>,
    /// Set when a funding flow had no usable FX rate and was counted 1:1.
    pub conversion_incomplete: bool,
}

// ── Dividends ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DividendSummary {
    pub total_cad: f64,
    pub by_symbol: std::collections::BTreeMap<String, SymbolDividends>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolDividends {
    pub total_cad: f64,
    pub count: u32,
    pub last_date: Option<NaiveDate>,
}
