pub mod conversion;
pub mod deployment;
pub mod invest_evenly;

use thiserror::Error;

use crate::model::Currency;

pub use conversion::{DLR_CAD, DLR_USD, DlrPrices, plan_conversion};
pub use deployment::{DeploymentRequest, FallbackReserve, deployment_adjustment};
pub use invest_evenly::{InvestEvenlyRequest, invest_evenly};

/// Trades and conversions smaller than half a cent are noise.
pub const DUST_EPSILON: f64 = 0.005;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("no price available for {0}; cannot plan a currency conversion")]
    MissingConversionPrice(&'static str),

    #[error("nothing investable: {0}")]
    NothingInvestable(String),
}

// ── Inputs ──────────────────────────────────────────────────────────

/// A position as the planner sees it: already normalized to CAD alongside
/// its native figures, with config annotations attached.
#[derive(Debug, Clone)]
pub struct PlannerPosition {
    pub symbol: String,
    pub currency: Currency,
    pub quantity: f64,
    pub price: f64,
    pub market_value: f64,
    pub market_value_cad: f64,
    pub target_proportion: Option<f64>,
    pub note: Option<String>,
}

impl PlannerPosition {
    pub fn is_investable(&self) -> bool {
        self.market_value_cad > 0.0 && self.price > 0.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CashPools {
    pub cad: f64,
    pub usd: f64,
}

// ── Cent distribution ───────────────────────────────────────────────

/// Split `total_cents` across weights so the parts sum exactly to the
/// total: floor every ideal share, then hand the leftover cents to the
/// largest remainders (reverse order for a negative total).
pub fn distribute_cents(total_cents: i64, weights: &[f64]) -> Vec<i64> {
    let weight_sum: f64 = weights.iter().sum();
    if weights.is_empty() || weight_sum <= 0.0 {
        return vec![0; weights.len()];
    }
    let negative = total_cents < 0;
    let magnitude = total_cents.abs();

    let ideals: Vec<f64> = weights
        .iter()
        .map(|w| magnitude as f64 * w / weight_sum)
        .collect();
    let mut parts: Vec<i64> = ideals.iter().map(|v| v.floor() as i64).collect();
    let mut leftover = magnitude - parts.iter().sum::<i64>();

    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| {
        let fa = ideals[a] - ideals[a].floor();
        let fb = ideals[b] - ideals[b].floor();
        fb.partial_cmp(&fa).unwrap_or(std::cmp::Ordering::Equal)
    });
    for &i in order.iter().cycle() {
        if leftover == 0 {
            break;
        }
        parts[i] += 1;
        leftover -= 1;
    }

    if negative {
        parts.iter_mut().for_each(|p| *p = -*p);
    }
    parts
}

/// USD share counts keep four decimals; CAD purchases use whole shares.
pub fn floor_shares(amount: f64, price: f64, currency: Currency) -> f64 {
    if price <= 0.0 {
        return 0.0;
    }
    let raw = amount / price;
    match currency {
        Currency::Cad => raw.floor(),
        Currency::Usd => (raw * 10_000.0).floor() / 10_000.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distribution_is_exact() {
        let parts = distribute_cents(1_000_000, &[50.0, 30.0, 20.0]);
        assert_eq!(parts, vec![500_000, 300_000, 200_000]);
    }

    #[test]
    fn remainder_cents_go_to_largest_fractions() {
        // 100 cents over thirds: 34/33/33.
        let parts = distribute_cents(100, &[1.0, 1.0, 1.0]);
        assert_eq!(parts.iter().sum::<i64>(), 100);
        assert!(parts.iter().all(|&p| p == 33 || p == 34));
    }

    #[test]
    fn negative_totals_mirror() {
        let parts = distribute_cents(-100, &[1.0, 1.0, 1.0]);
        assert_eq!(parts.iter().sum::<i64>(), -100);
        assert!(parts.iter().all(|&p| p == -33 || p == -34));
    }

    #[test]
    fn zero_weights_distribute_nothing() {
        assert_eq!(distribute_cents(100, &[0.0, 0.0]), vec![0, 0]);
    }

    #[test]
    fn usd_shares_keep_four_decimals() {
        let shares = floor_shares(100.0, 3.0, Currency::Usd);
        assert!((shares - 33.3333).abs() < 1e-9);
        assert_eq!(floor_shares(100.0, 3.0, Currency::Cad), 33.0);
    }
}
