pub mod temperature;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::account::InvestmentModelConfig;
use crate::model::balance::{AccountBalances, Position};
use crate::model::series::PricePoint;

pub use temperature::TemperatureModel;

// ── Evaluation ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelAction {
    Hold,
    Rebalance,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub action: ModelAction,
    /// Fraction per role symbol; sums to 1 within 1e-6 unless `action`
    /// is `Error`.
    pub target_allocation: BTreeMap<String, f64>,
    pub status: String,
}

impl Evaluation {
    pub fn error(status: impl Into<String>) -> Self {
        Self {
            action: ModelAction::Error,
            target_allocation: BTreeMap::new(),
            status: status.into(),
        }
    }
}

// ── Model interface ─────────────────────────────────────────────────

/// Everything a model may look at. Models are pure: same inputs, same
/// outputs, no I/O and no ambient clock.
pub struct ModelInput<'a> {
    pub config: &'a InvestmentModelConfig,
    pub positions: &'a [Position],
    pub balances: &'a AccountBalances,
    /// Daily closes of the model's benchmark, oldest first.
    pub benchmark_history: &'a [PricePoint],
    pub usd_to_cad: f64,
    pub today: NaiveDate,
    /// Account-level rebalance period, used when the model config has none.
    pub default_rebalance_period: Option<u32>,
}

pub trait InvestmentModel: Send + Sync {
    fn name(&self) -> &'static str;
    /// Benchmark whose price history the evaluator should prefetch.
    fn benchmark_symbol(&self, config: &InvestmentModelConfig) -> String;
    fn evaluate(&self, input: &ModelInput) -> Evaluation;
}

/// Look up a model implementation by its configured name.
pub fn model_for(name: &str) -> Option<Box<dyn InvestmentModel>> {
    match name {
        "qqq-temperature" => Some(Box::new(TemperatureModel)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_known_models_only() {
        assert!(model_for("qqq-temperature").is_some());
        assert!(model_for("momentum-unknown").is_none());
    }
}
