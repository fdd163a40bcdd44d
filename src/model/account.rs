use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ── Login ───────────────────────────────────────────────────────────

/// An OAuth authorization principal. One live refresh token at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Login {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

// ── Account ─────────────────────────────────────────────────────────

/// A (login, account number) pair: the unit every broker call is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRef {
    pub login_id: String,
    pub number: String,
}

impl AccountRef {
    /// Stable composite id used in API responses and config matching.
    pub fn id(&self) -> String {
        format!("{}:{}", self.login_id, self.number)
    }
}

impl std::fmt::Display for AccountRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.login_id, self.number)
    }
}

/// An account as presented in the composite document: broker listing
/// enriched with config overrides.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub id: String,
    pub login_id: String,
    pub number: String,
    #[serde(rename = "type")]
    pub account_type: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beneficiary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_group: Option<String>,
}

// ── Per-account settings (from the accounts config file) ────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountSettings {
    pub display_name: Option<String>,
    pub beneficiary: Option<String>,
    pub account_group: Option<String>,
    pub cagr_start_date: Option<NaiveDate>,
    /// Manual CAD correction added to computed net deposits.
    pub net_deposit_adjustment: Option<f64>,
    pub ignore_sitting_cash: Option<f64>,
    /// Minimum days between rebalances.
    pub rebalance_period: Option<u32>,
    pub investment_models: Vec<InvestmentModelConfig>,
    pub symbols: HashMap<String, SymbolSettings>,
    pub planning_context: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SymbolSettings {
    pub target_proportion: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvestmentModelConfig {
    pub model: String,
    pub symbol: Option<String>,
    pub leveraged_symbol: Option<String>,
    pub reserve_symbol: Option<String>,
    pub last_rebalance: Option<NaiveDate>,
    pub rebalance_period: Option<u32>,
}

// ── Account groups ──────────────────────────────────────────────────

/// A named collection of accounts. Groups form a tree via `parent`;
/// cycles are broken at load time by dropping the offending edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountGroup {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub account_ids: Vec<String>,
}
