use serde::{Deserialize, Serialize};

use super::Currency;

// ── Balances ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyBalance {
    pub currency: Currency,
    pub cash: f64,
    pub market_value: f64,
    pub total_equity: f64,
}

/// One account's balance snapshot: native per-currency rows plus the
/// broker's combined (all-in-one-currency) rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalances {
    pub per_currency: Vec<CurrencyBalance>,
    pub combined: Vec<CurrencyBalance>,
}

impl AccountBalances {
    pub fn cash(&self, currency: Currency) -> f64 {
        self.per_currency
            .iter()
            .find(|b| b.currency == currency)
            .map(|b| b.cash)
            .unwrap_or(0.0)
    }

    /// The account's total equity expressed in CAD, per the broker's own
    /// combined-balance conversion.
    pub fn combined_equity_cad(&self) -> f64 {
        self.combined
            .iter()
            .find(|b| b.currency == Currency::Cad)
            .map(|b| b.total_equity)
            .unwrap_or(0.0)
    }
}

// ── Positions ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    pub symbol_id: u64,
    pub open_quantity: f64,
    pub current_price: f64,
    pub current_market_value: f64,
    pub average_entry_price: f64,
    pub open_pnl: f64,
    pub total_cost: f64,
    /// Inferred from the exchange suffix; the upstream positions payload
    /// does not carry a currency field.
    pub currency: Currency,
}

impl Position {
    pub fn market_value_cad(&self, usd_to_cad: f64) -> f64 {
        match self.currency {
            Currency::Cad => self.current_market_value,
            Currency::Usd => self.current_market_value * usd_to_cad,
        }
    }
}

// ── Orders ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: u64,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub state: String,
    pub total_quantity: f64,
    pub open_quantity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    pub creation_time: String,
}
