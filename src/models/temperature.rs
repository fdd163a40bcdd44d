use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::model::account::InvestmentModelConfig;
use crate::model::series::PricePoint;

use super::{Evaluation, InvestmentModel, ModelAction, ModelInput};

/// Moving-average window for the temperature, in trading days.
pub const MA_DAYS: usize = 200;

/// Fewest closes we will average before calling the temperature real.
const MIN_WINDOW: usize = 30;

/// Rebalance when any component drifts this far from target (5 pp).
pub const DRIFT_BAND: f64 = 0.05;

/// Base-proportion curve: temperature → (leveraged, base, reserve).
/// Cold benchmarks lean into leverage, hot ones into reserves; points
/// between anchors interpolate linearly and the ends clamp.
const CURVE: &[(f64, [f64; 3])] = &[
    (0.80, [0.80, 0.20, 0.00]),
    (0.90, [0.60, 0.35, 0.05]),
    (1.00, [0.40, 0.40, 0.20]),
    (1.10, [0.20, 0.40, 0.40]),
    (1.20, [0.00, 0.30, 0.70]),
];

// ── Temperature math ────────────────────────────────────────────────

/// Current price over its trailing moving average. `None` until enough
/// history has accumulated.
pub fn temperature(history: &[PricePoint]) -> Option<f64> {
    if history.len() < MIN_WINDOW {
        return None;
    }
    let window = &history[history.len().saturating_sub(MA_DAYS)..];
    let mean: f64 = window.iter().map(|p| p.close).sum::<f64>() / window.len() as f64;
    if mean <= 0.0 {
        return None;
    }
    Some(history.last()?.close / mean)
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperaturePoint {
    pub date: NaiveDate,
    pub temperature: f64,
}

/// Rolling temperature, one point per day once the window is warm.
pub fn temperature_series(history: &[PricePoint]) -> Vec<TemperaturePoint> {
    let mut out = Vec::new();
    for i in MIN_WINDOW..=history.len() {
        if let Some(t) = temperature(&history[..i]) {
            out.push(TemperaturePoint {
                date: history[i - 1].date,
                temperature: t,
            });
        }
    }
    out
}

/// Interpolate the allocation curve and normalize so the weights sum to
/// exactly one.
pub fn allocation_for(temp: f64) -> [f64; 3] {
    let raw = interpolate(temp);
    let sum: f64 = raw.iter().sum();
    [raw[0] / sum, raw[1] / sum, raw[2] / sum]
}

fn interpolate(temp: f64) -> [f64; 3] {
    let (first, last) = (CURVE[0], CURVE[CURVE.len() - 1]);
    if temp <= first.0 {
        return first.1;
    }
    if temp >= last.0 {
        return last.1;
    }
    for pair in CURVE.windows(2) {
        let (t0, a0) = pair[0];
        let (t1, a1) = pair[1];
        if temp >= t0 && temp <= t1 {
            let f = (temp - t0) / (t1 - t0);
            return [
                a0[0] + f * (a1[0] - a0[0]),
                a0[1] + f * (a1[1] - a0[1]),
                a0[2] + f * (a1[2] - a0[2]),
            ];
        }
    }
    last.1
}

// ── Model ───────────────────────────────────────────────────────────

/// The benchmark-temperature model: three-way split across a leveraged
/// proxy, the benchmark itself, and a cash-like reserve.
pub struct TemperatureModel;

pub struct RoleSymbols {
    pub base: String,
    pub leveraged: String,
    pub reserve: String,
}

impl RoleSymbols {
    pub fn from_config(config: &InvestmentModelConfig) -> Self {
        Self {
            base: config.symbol.clone().unwrap_or_else(|| "QQQ".to_string()),
            leveraged: config
                .leveraged_symbol
                .clone()
                .unwrap_or_else(|| "TQQQ".to_string()),
            reserve: config
                .reserve_symbol
                .clone()
                .unwrap_or_else(|| "BIL".to_string()),
        }
    }
}

impl InvestmentModel for TemperatureModel {
    fn name(&self) -> &'static str {
        "qqq-temperature"
    }

    fn benchmark_symbol(&self, config: &InvestmentModelConfig) -> String {
        config.symbol.clone().unwrap_or_else(|| "QQQ".to_string())
    }

    fn evaluate(&self, input: &ModelInput) -> Evaluation {
        let roles = RoleSymbols::from_config(input.config);

        let Some(temp) = temperature(input.benchmark_history) else {
            return Evaluation::error(format!(
                "insufficient price history for {} (have {} closes, need {})",
                roles.base,
                input.benchmark_history.len(),
                MIN_WINDOW,
            ));
        };

        let split = allocation_for(temp);
        let mut target_allocation = BTreeMap::new();
        target_allocation.insert(roles.leveraged.clone(), split[0]);
        target_allocation.insert(roles.base.clone(), split[1]);
        target_allocation.insert(roles.reserve.clone(), split[2]);

        // Observed weights over the three role symbols; free cash counts
        // toward the reserve leg.
        let role_value = |symbol: &str| -> f64 {
            input
                .positions
                .iter()
                .filter(|p| p.symbol == symbol)
                .map(|p| p.market_value_cad(input.usd_to_cad))
                .sum()
        };
        let cash_cad = input.balances.cash(crate::model::Currency::Cad)
            + input.balances.cash(crate::model::Currency::Usd) * input.usd_to_cad;
        let observed = [
            role_value(&roles.leveraged),
            role_value(&roles.base),
            role_value(&roles.reserve) + cash_cad.max(0.0),
        ];
        let total: f64 = observed.iter().sum();

        let drift = if total > 0.0 {
            observed
                .iter()
                .zip(split.iter())
                .map(|(o, t)| (o / total - t).abs())
                .fold(0.0, f64::max)
        } else {
            0.0
        };

        let period = input
            .config
            .rebalance_period
            .or(input.default_rebalance_period);
        let period_elapsed = match (input.config.last_rebalance, period) {
            (Some(last), Some(days)) => (input.today - last).num_days() >= days as i64,
            _ => false,
        };

        let action = if drift > DRIFT_BAND || period_elapsed {
            ModelAction::Rebalance
        } else {
            ModelAction::Hold
        };

        Evaluation {
            action,
            target_allocation,
            status: format!(
                "temperature {:.3}; target {:.0}/{:.0}/{:.0}; drift {:.1}%",
                temp,
                split[0] * 100.0,
                split[1] * 100.0,
                split[2] * 100.0,
                drift * 100.0,
            ),
        }
    }
}
