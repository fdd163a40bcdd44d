use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::Currency;

// ── Activity type ───────────────────────────────────────────────────

/// Broker transaction category, normalized from the upstream `type` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityType {
    Deposits,
    Withdrawals,
    Trades,
    Dividends,
    Interest,
    Transfers,
    #[serde(rename = "FX")]
    Fx,
    Other,
}

impl ActivityType {
    /// Map an upstream `type` string onto a variant. Unknown strings fall
    /// through to `Other` (a P&L event) rather than guessing at funding.
    pub fn parse(s: &str) -> ActivityType {
        let trimmed = s.trim();
        match trimmed {
            "Deposits" => ActivityType::Deposits,
            "Withdrawals" => ActivityType::Withdrawals,
            "Trades" => ActivityType::Trades,
            "Dividends" => ActivityType::Dividends,
            "Interest" => ActivityType::Interest,
            "Transfers" => ActivityType::Transfers,
            _ if trimmed.to_uppercase().starts_with("FX") => ActivityType::Fx,
            _ => ActivityType::Other,
        }
    }
}

/// Actions that mark an activity as a funding flow regardless of its type:
/// contributions, withdrawals, and transfers in/out.
const FUNDING_ACTIONS: [&str; 4] = ["CON", "WDR", "TFI", "TFO"];

// ── Activity record ─────────────────────────────────────────────────

/// A normalized broker transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub trade_date: NaiveDate,
    pub transaction_date: NaiveDate,
    pub settlement_date: NaiveDate,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub currency: Currency,
    pub quantity: f64,
    pub price: f64,
    pub gross_amount: f64,
    pub commission: f64,
    pub net_amount: f64,
    pub description: String,
}

impl Activity {
    /// Funding flows move money in or out of the account; everything else
    /// (trades, dividends, interest, unclassified FX legs) is a P&L event.
    pub fn is_funding_flow(&self) -> bool {
        matches!(
            self.kind,
            ActivityType::Deposits | ActivityType::Withdrawals | ActivityType::Transfers
        ) || FUNDING_ACTIONS.contains(&self.action.to_uppercase().as_str())
    }

    /// Content-address for de-duplication across overlapping crawls.
    pub fn dedup_key(&self) -> ActivityKey {
        ActivityKey {
            transaction_date: self.transaction_date,
            action: self.action.clone(),
            net_cents: (self.net_amount * 100.0).round() as i64,
            symbol: self.symbol.clone(),
            currency: self.currency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActivityKey {
    pub transaction_date: NaiveDate,
    pub action: String,
    pub net_cents: i64,
    pub symbol: Option<String>,
    pub currency: Currency,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity(kind: ActivityType, action: &str) -> Activity {
        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        Activity {
            trade_date: date,
            transaction_date: date,
            settlement_date: date,
            kind,
            action: action.to_string(),
            symbol: None,
            currency: Currency::Cad,
            quantity: 0.0,
            price: 0.0,
            gross_amount: 100.0,
            commission: 0.0,
            net_amount: 100.0,
            description: String::new(),
        }
    }

    #[test]
    fn funding_classification() {
        assert!(activity(ActivityType::Deposits, "DEP").is_funding_flow());
        assert!(activity(ActivityType::Withdrawals, "").is_funding_flow());
        assert!(activity(ActivityType::Transfers, "").is_funding_flow());
        // Funding actions promote non-funding types
        assert!(activity(ActivityType::Other, "CON").is_funding_flow());
        assert!(activity(ActivityType::Fx, "TFO").is_funding_flow());
        // Trades and income are never funding
        assert!(!activity(ActivityType::Trades, "Buy").is_funding_flow());
        assert!(!activity(ActivityType::Dividends, "").is_funding_flow());
        assert!(!activity(ActivityType::Interest, "").is_funding_flow());
        assert!(!activity(ActivityType::Fx, "FXT").is_funding_flow());
    }

    #[test]
    fn type_parse_maps_unknown_to_other() {
        assert_eq!(ActivityType::parse("Deposits"), ActivityType::Deposits);
        assert_eq!(ActivityType::parse("FX conversion"), ActivityType::Fx);
        assert_eq!(ActivityType::parse("Corporate actions"), ActivityType::Other);
    }

    #[test]
    fn dedup_key_rounds_to_cents() {
        let mut a = activity(ActivityType::Dividends, "DIV");
        let mut b = activity(ActivityType::Dividends, "DIV");
        a.net_amount = 10.004;
        b.net_amount = 10.0;
        assert_eq!(a.dedup_key(), b.dedup_key());
    }
}
