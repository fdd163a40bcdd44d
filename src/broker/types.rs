use chrono::NaiveDate;
use serde::Deserialize;

use crate::model::activity::{Activity, ActivityType};
use crate::model::balance::{AccountBalances, CurrencyBalance, Order, Position};
use crate::model::{Currency, symbol_currency};

// ── /v1/accounts ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AccountsResponse {
    pub accounts: Vec<RawAccount>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct RawAccount {
    #[serde(rename = "type")]
    pub account_type: String,
    pub number: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(rename = "isPrimary", default)]
    pub is_primary: bool,
}

// ── /v1/accounts/:n/balances ────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct BalancesResponse {
    #[serde(rename = "perCurrencyBalances")]
    pub per_currency_balances: Vec<RawBalance>,
    #[serde(rename = "combinedBalances")]
    pub combined_balances: Vec<RawBalance>,
}

#[derive(Debug, Deserialize)]
pub struct RawBalance {
    pub currency: String,
    pub cash: f64,
    #[serde(rename = "marketValue")]
    pub market_value: f64,
    #[serde(rename = "totalEquity")]
    pub total_equity: f64,
}

impl BalancesResponse {
    pub fn into_model(self) -> AccountBalances {
        let convert = |rows: Vec<RawBalance>| {
            rows.into_iter()
                .filter_map(|r| {
                    Currency::parse(&r.currency).map(|currency| CurrencyBalance {
                        currency,
                        cash: r.cash,
                        market_value: r.market_value,
                        total_equity: r.total_equity,
                    })
                })
                .collect()
        };
        AccountBalances {
            per_currency: convert(self.per_currency_balances),
            combined: convert(self.combined_balances),
        }
    }
}

// ── /v1/accounts/:n/positions ───────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PositionsResponse {
    pub positions: Vec<RawPosition>,
}

#[derive(Debug, Deserialize)]
pub struct RawPosition {
    pub symbol: String,
    #[serde(rename = "symbolId")]
    pub symbol_id: u64,
    #[serde(rename = "openQuantity")]
    pub open_quantity: f64,
    #[serde(rename = "currentMarketValue", default)]
    pub current_market_value: Option<f64>,
    #[serde(rename = "currentPrice", default)]
    pub current_price: Option<f64>,
    #[serde(rename = "averageEntryPrice", default)]
    pub average_entry_price: Option<f64>,
    #[serde(rename = "openPnl", default)]
    pub open_pnl: Option<f64>,
    #[serde(rename = "totalCost", default)]
    pub total_cost: Option<f64>,
}

impl RawPosition {
    pub fn into_model(self) -> Position {
        let currency = symbol_currency(&self.symbol);
        Position {
            currency,
            symbol: self.symbol,
            symbol_id: self.symbol_id,
            open_quantity: self.open_quantity,
            current_price: self.current_price.unwrap_or(0.0),
            current_market_value: self.current_market_value.unwrap_or(0.0),
            average_entry_price: self.average_entry_price.unwrap_or(0.0),
            open_pnl: self.open_pnl.unwrap_or(0.0),
            total_cost: self.total_cost.unwrap_or(0.0),
        }
    }
}

// ── /v1/accounts/:n/orders ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct OrdersResponse {
    pub orders: Vec<RawOrder>,
}

#[derive(Debug, Deserialize)]
pub struct RawOrder {
    pub id: u64,
    pub symbol: String,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(rename = "orderType", default)]
    pub order_type: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(rename = "totalQuantity", default)]
    pub total_quantity: f64,
    #[serde(rename = "openQuantity", default)]
    pub open_quantity: f64,
    #[serde(rename = "limitPrice", default)]
    pub limit_price: Option<f64>,
    #[serde(rename = "creationTime", default)]
    pub creation_time: String,
}

impl RawOrder {
    pub fn into_model(self) -> Order {
        Order {
            id: self.id,
            symbol: self.symbol,
            side: self.side.unwrap_or_default(),
            order_type: self.order_type.unwrap_or_default(),
            state: self.state.unwrap_or_default(),
            total_quantity: self.total_quantity,
            open_quantity: self.open_quantity,
            limit_price: self.limit_price,
            creation_time: self.creation_time,
        }
    }
}

// ── /v1/accounts/:n/activities ──────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ActivitiesResponse {
    pub activities: Vec<RawActivity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawActivity {
    #[serde(rename = "tradeDate", default)]
    pub trade_date: Option<String>,
    #[serde(rename = "transactionDate", default)]
    pub transaction_date: Option<String>,
    #[serde(rename = "settlementDate", default)]
    pub settlement_date: Option<String>,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub price: f64,
    #[serde(rename = "grossAmount", default)]
    pub gross_amount: f64,
    #[serde(default)]
    pub commission: f64,
    #[serde(rename = "netAmount", default)]
    pub net_amount: f64,
    #[serde(rename = "type", default)]
    pub activity_type: String,
    #[serde(default)]
    pub description: String,
}

impl RawActivity {
    /// Normalize into the internal record. Dates fall back onto each other
    /// (settlement ≥ transaction ≥ trade, best effort); an activity with no
    /// parseable date at all is dropped. Unrecognized currencies are
    /// carried as CAD, which downstream conversion treats as 1:1.
    pub fn into_model(self) -> Option<Activity> {
        let trade = parse_activity_date(self.trade_date.as_deref());
        let transaction = parse_activity_date(self.transaction_date.as_deref());
        let settlement = parse_activity_date(self.settlement_date.as_deref());

        let transaction_date = transaction.or(trade).or(settlement)?;
        let trade_date = trade.unwrap_or(transaction_date);
        let settlement_date = settlement.unwrap_or(transaction_date);

        let symbol = {
            let s = self.symbol.trim();
            if s.is_empty() { None } else { Some(s.to_string()) }
        };

        Some(Activity {
            trade_date,
            transaction_date,
            settlement_date,
            kind: ActivityType::parse(&self.activity_type),
            action: self.action,
            symbol,
            currency: Currency::parse(&self.currency).unwrap_or(Currency::Cad),
            quantity: self.quantity,
            price: self.price,
            gross_amount: self.gross_amount,
            commission: self.commission,
            net_amount: self.net_amount,
            description: self.description,
        })
    }
}

/// Upstream timestamps look like `2025-02-18T00:00:00.000000-05:00`;
/// tolerate a bare date as well.
pub fn parse_activity_date(raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    NaiveDate::parse_from_str(&raw[..raw.len().min(10)], "%Y-%m-%d").ok()
}

// ── /v1/markets/candles/:symbolId ───────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CandlesResponse {
    pub candles: Vec<RawCandle>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct RawCandle {
    pub start: String,
    #[serde(default)]
    pub end: String,
    pub close: f64,
}

// ── /v1/symbols/search ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SymbolSearchResponse {
    pub symbols: Vec<RawSymbol>,
}

#[derive(Debug, Deserialize)]
pub struct RawSymbol {
    pub symbol: String,
    #[serde(rename = "symbolId")]
    pub symbol_id: u64,
    #[serde(rename = "isTradable", default)]
    pub is_tradable: bool,
}
