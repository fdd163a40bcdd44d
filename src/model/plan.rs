use serde::{Deserialize, Serialize};

use super::Currency;

// ── Conversions (Norbert's gambit) ──────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversionKind {
    #[serde(rename = "CAD→USD")]
    CadToUsd,
    #[serde(rename = "USD→CAD")]
    UsdToCad,
}

/// A planned whole-share DLR.TO / DLR.U.TO journal converting one
/// currency into the other without an FX spread.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversion {
    #[serde(rename = "type")]
    pub kind: ConversionKind,
    /// The instrument bought on the spend side.
    pub symbol: String,
    pub shares: f64,
    pub spend_amount: f64,
    pub receive_amount: f64,
}

// ── Invest-evenly plan ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    pub symbol: String,
    pub currency: Currency,
    /// Cost in the purchase's native currency (shares × price).
    pub amount: f64,
    pub shares: f64,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_percent: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanTotals {
    pub cad_needed: f64,
    pub usd_needed: f64,
    pub cad_remaining: f64,
    pub usd_remaining: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestEvenlyPlan {
    pub purchases: Vec<Purchase>,
    pub conversions: Vec<Conversion>,
    pub totals: PlanTotals,
    pub summary_text: String,
}

// ── Deployment-adjustment plan ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeScope {
    Deployed,
    Reserve,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustmentTransaction {
    pub side: TradeSide,
    pub scope: TradeScope,
    pub symbol: String,
    pub currency: Currency,
    /// Absolute cost/proceeds in native currency.
    pub amount: f64,
    pub shares: f64,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentPlan {
    pub transactions: Vec<AdjustmentTransaction>,
    pub conversions: Vec<Conversion>,
    pub totals: PlanTotals,
    pub target_deployed_percent: f64,
    pub summary_text: String,
}
