pub mod account;
pub mod activity;
pub mod balance;
pub mod plan;
pub mod series;

use serde::{Deserialize, Serialize};

// ── Currency ────────────────────────────────────────────────────────

/// Settlement currency of a balance, position, or activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Cad,
    Usd,
}

impl Currency {
    pub fn parse(s: &str) -> Option<Currency> {
        match s.to_uppercase().as_str() {
            "CAD" => Some(Currency::Cad),
            "USD" => Some(Currency::Usd),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Cad => "CAD",
            Currency::Usd => "USD",
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

// ── Symbol helpers ──────────────────────────────────────────────────

/// Infer the trading currency of a symbol from its exchange suffix.
/// Canadian listings carry `.TO`, `.V`, `.CN`, or `.NE`; everything else
/// is treated as USD.
pub fn symbol_currency(symbol: &str) -> Currency {
    for suffix in [".TO", ".V", ".CN", ".NE"] {
        if symbol.ends_with(suffix) {
            return Currency::Cad;
        }
    }
    Currency::Usd
}

/// Round to whole cents.
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_parse_is_case_insensitive() {
        assert_eq!(Currency::parse("cad"), Some(Currency::Cad));
        assert_eq!(Currency::parse("USD"), Some(Currency::Usd));
        assert_eq!(Currency::parse("EUR"), None);
    }

    #[test]
    fn symbol_currency_uses_exchange_suffix() {
        assert_eq!(symbol_currency("DLR.TO"), Currency::Cad);
        assert_eq!(symbol_currency("XIU.NE"), Currency::Cad);
        assert_eq!(symbol_currency("QQQ"), Currency::Usd);
    }
}
