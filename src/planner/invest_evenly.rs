use crate::model::plan::{Conversion, ConversionKind, InvestEvenlyPlan, PlanTotals, Purchase};
use crate::model::{Currency, round_cents};

use super::conversion::{DLR_CAD, DLR_USD, DlrPrices, plan_conversion};
use super::{CashPools, PlannerError, PlannerPosition, distribute_cents, floor_shares};

pub struct InvestEvenlyRequest {
    pub positions: Vec<PlannerPosition>,
    pub cash: CashPools,
    pub usd_to_cad: f64,
    /// Weight by the configured target proportions instead of current
    /// market values (when any are present).
    pub use_target_proportions: bool,
    pub skip_cad: bool,
    pub skip_usd: bool,
    pub dlr: Option<DlrPrices>,
}

struct Draft<'a> {
    position: &'a PlannerPosition,
    weight_fraction: f64,
    shares: f64,
    cost: f64,
}

impl Draft<'_> {
    fn set_amount(&mut self, native_amount: f64) {
        self.shares = floor_shares(native_amount, self.position.price, self.position.currency);
        self.cost = round_cents(self.shares * self.position.price);
    }
}

/// Spread the available cash across investable positions, weighted by
/// target proportions or current value, resolving cross-currency
/// shortfalls with DLR conversions and rescaling whatever the converted
/// pools still cannot cover.
pub fn invest_evenly(req: &InvestEvenlyRequest) -> Result<InvestEvenlyPlan, PlannerError> {
    let investable: Vec<&PlannerPosition> = req
        .positions
        .iter()
        .filter(|p| p.is_investable())
        .filter(|p| !(req.skip_cad && p.currency == Currency::Cad))
        .filter(|p| !(req.skip_usd && p.currency == Currency::Usd))
        .collect();
    if investable.is_empty() {
        return Err(PlannerError::NothingInvestable(
            "no investable positions after currency filters".to_string(),
        ));
    }

    let use_targets = req.use_target_proportions
        && investable
            .iter()
            .any(|p| p.target_proportion.unwrap_or(0.0) > 0.0);
    let weights: Vec<f64> = investable
        .iter()
        .map(|p| {
            if use_targets {
                p.target_proportion.unwrap_or(0.0).max(0.0)
            } else {
                p.market_value_cad
            }
        })
        .collect();
    let weight_sum: f64 = weights.iter().sum();
    if weight_sum <= 0.0 {
        return Err(PlannerError::NothingInvestable(
            "allocation weights sum to zero".to_string(),
        ));
    }

    let mut cad_avail = if req.skip_cad { 0.0 } else { req.cash.cad.max(0.0) };
    let mut usd_avail = if req.skip_usd { 0.0 } else { req.cash.usd.max(0.0) };

    // Split the total investable base in cents so the per-position CAD
    // amounts sum exactly to it.
    let total_cents = ((cad_avail + usd_avail * req.usd_to_cad) * 100.0).floor() as i64;
    let amounts = distribute_cents(total_cents, &weights);

    let mut drafts: Vec<Draft> = investable
        .iter()
        .zip(weights.iter().zip(amounts.iter()))
        .map(|(&position, (&weight, &cents))| {
            let amount_cad = cents as f64 / 100.0;
            let native = match position.currency {
                Currency::Cad => amount_cad,
                Currency::Usd => amount_cad / req.usd_to_cad,
            };
            let mut draft = Draft {
                position,
                weight_fraction: weight / weight_sum,
                shares: 0.0,
                cost: 0.0,
            };
            draft.set_amount(native);
            draft
        })
        .collect();

    let needed = |drafts: &[Draft], currency: Currency| -> f64 {
        drafts
            .iter()
            .filter(|d| d.position.currency == currency)
            .map(|d| d.cost)
            .sum()
    };

    // One conversion resolves the cross-currency shortfall, spending only
    // what the other pool can spare.
    let mut conversions: Vec<Conversion> = Vec::new();
    let usd_needed = needed(&drafts, Currency::Usd);
    let cad_needed = needed(&drafts, Currency::Cad);
    if usd_needed > usd_avail + 0.01 {
        let spendable = cad_avail - cad_needed;
        if spendable > 0.0 {
            let dlr = req
                .dlr
                .ok_or(PlannerError::MissingConversionPrice(DLR_CAD))?;
            if let Some(c) =
                plan_conversion(ConversionKind::CadToUsd, spendable, usd_needed - usd_avail, &dlr)
            {
                cad_avail = round_cents(cad_avail - c.spend_amount);
                usd_avail = round_cents(usd_avail + c.receive_amount);
                conversions.push(c);
            }
        }
    } else if cad_needed > cad_avail + 0.01 {
        let spendable = usd_avail - usd_needed;
        if spendable > 0.0 {
            let dlr = req
                .dlr
                .ok_or(PlannerError::MissingConversionPrice(DLR_USD))?;
            if let Some(c) =
                plan_conversion(ConversionKind::UsdToCad, spendable, cad_needed - cad_avail, &dlr)
            {
                usd_avail = round_cents(usd_avail - c.spend_amount);
                cad_avail = round_cents(cad_avail + c.receive_amount);
                conversions.push(c);
            }
        }
    }

    // Whatever the converted pools still cannot cover gets scaled down
    // proportionally, then re-floored.
    for currency in [Currency::Cad, Currency::Usd] {
        let avail = match currency {
            Currency::Cad => cad_avail,
            Currency::Usd => usd_avail,
        };
        let total = needed(&drafts, currency);
        if total > avail + 0.01 && total > 0.0 {
            let scale = (avail / total).max(0.0);
            for draft in drafts.iter_mut().filter(|d| d.position.currency == currency) {
                let shrunk = draft.cost * scale;
                draft.set_amount(shrunk);
            }
        }
    }

    let cad_needed = round_cents(needed(&drafts, Currency::Cad));
    let usd_needed = round_cents(needed(&drafts, Currency::Usd));

    let purchases: Vec<Purchase> = drafts
        .iter()
        .filter(|d| d.shares > 0.0)
        .map(|d| Purchase {
            symbol: d.position.symbol.clone(),
            currency: d.position.currency,
            amount: d.cost,
            shares: d.shares,
            price: d.position.price,
            note: d.position.note.clone(),
            target_percent: Some(round_cents(d.weight_fraction * 100.0)),
        })
        .collect();

    let totals = PlanTotals {
        cad_needed,
        usd_needed,
        cad_remaining: round_cents(cad_avail - cad_needed),
        usd_remaining: round_cents(usd_avail - usd_needed),
    };

    let summary_text = render_summary(&purchases, &conversions, &totals);

    Ok(InvestEvenlyPlan {
        purchases,
        conversions,
        totals,
        summary_text,
    })
}

fn render_summary(
    purchases: &[Purchase],
    conversions: &[Conversion],
    totals: &PlanTotals,
) -> String {
    let mut lines = Vec::new();
    for c in conversions {
        let (from, to) = match c.kind {
            ConversionKind::CadToUsd => ("CAD", "USD"),
            ConversionKind::UsdToCad => ("USD", "CAD"),
        };
        lines.push(format!(
            "Convert {:.2} {from} → {:.2} {to} via {} ({} shares)",
            c.spend_amount, c.receive_amount, c.symbol, c.shares,
        ));
    }
    for p in purchases {
        lines.push(format!(
            "Buy {} {} @ {:.2} {} = {:.2}",
            p.shares, p.symbol, p.price, p.currency, p.amount,
        ));
    }
    lines.push(format!(
        "Leftover: {:.2} CAD, {:.2} USD",
        totals.cad_remaining, totals.usd_remaining,
    ));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(symbol: &str, currency: Currency, price: f64, target: Option<f64>) -> PlannerPosition {
        PlannerPosition {
            symbol: symbol.to_string(),
            currency,
            quantity: 10.0,
            price,
            market_value: price * 10.0,
            market_value_cad: price * 10.0,
            target_proportion: target,
            note: None,
        }
    }

    #[test]
    fn target_weighted_whole_share_purchases() {
        // 50/30/20 on $10,000 at prices 100/50/25 → 50, 60, 80 shares.
        let req = InvestEvenlyRequest {
            positions: vec![
                pos("A.TO", Currency::Cad, 100.0, Some(50.0)),
                pos("B.TO", Currency::Cad, 50.0, Some(30.0)),
                pos("C.TO", Currency::Cad, 25.0, Some(20.0)),
            ],
            cash: CashPools { cad: 10_000.0, usd: 0.0 },
            usd_to_cad: 1.35,
            use_target_proportions: true,
            skip_cad: false,
            skip_usd: false,
            dlr: None,
        };
        let plan = invest_evenly(&req).unwrap();

        let shares: Vec<f64> = plan.purchases.iter().map(|p| p.shares).collect();
        assert_eq!(shares, vec![50.0, 60.0, 80.0]);
        // Residual below the costliest share.
        assert!(plan.totals.cad_remaining < 100.0);
        assert!(plan.totals.cad_remaining >= -0.01);
    }

    #[test]
    fn without_targets_weights_follow_market_value() {
        let req = InvestEvenlyRequest {
            positions: vec![
                pos("A.TO", Currency::Cad, 300.0, None), // mv 3000
                pos("B.TO", Currency::Cad, 100.0, None), // mv 1000
            ],
            cash: CashPools { cad: 4_000.0, usd: 0.0 },
            usd_to_cad: 1.35,
            use_target_proportions: false,
            skip_cad: false,
            skip_usd: false,
            dlr: None,
        };
        let plan = invest_evenly(&req).unwrap();
        assert_eq!(plan.purchases[0].shares, 10.0); // 3000 / 300
        assert_eq!(plan.purchases[1].shares, 10.0); // 1000 / 100
    }

    #[test]
    fn usd_shortfall_plans_a_dlr_conversion() {
        let req = InvestEvenlyRequest {
            positions: vec![pos("SPY", Currency::Usd, 100.0, None)],
            cash: CashPools { cad: 1_370.0, usd: 0.0 },
            usd_to_cad: 1.37,
            use_target_proportions: false,
            skip_cad: false,
            skip_usd: false,
            dlr: Some(DlrPrices { cad: 13.70, usd: 10.00 }),
        };
        let plan = invest_evenly(&req).unwrap();

        assert_eq!(plan.conversions.len(), 1);
        let c = &plan.conversions[0];
        assert_eq!(c.kind, ConversionKind::CadToUsd);
        assert_eq!(c.symbol, DLR_CAD);
        // All thousand-ish CAD converts; purchases are then rescaled to
        // the USD actually received.
        let usd_spent: f64 = plan
            .purchases
            .iter()
            .filter(|p| p.currency == Currency::Usd)
            .map(|p| p.amount)
            .sum();
        assert!(usd_spent <= c.receive_amount + 0.01);
    }

    #[test]
    fn conversion_needed_without_dlr_prices_is_an_error() {
        let req = InvestEvenlyRequest {
            positions: vec![pos("SPY", Currency::Usd, 100.0, None)],
            cash: CashPools { cad: 1_000.0, usd: 0.0 },
            usd_to_cad: 1.37,
            use_target_proportions: false,
            skip_cad: false,
            skip_usd: false,
            dlr: None,
        };
        assert!(matches!(
            invest_evenly(&req).unwrap_err(),
            PlannerError::MissingConversionPrice(_)
        ));
    }

    #[test]
    fn purchases_never_exceed_cash_plus_conversions() {
        let req = InvestEvenlyRequest {
            positions: vec![
                pos("A.TO", Currency::Cad, 73.0, Some(40.0)),
                pos("SPY", Currency::Usd, 411.0, Some(35.0)),
                pos("QQQ", Currency::Usd, 529.0, Some(25.0)),
            ],
            cash: CashPools { cad: 12_345.67, usd: 89.01 },
            usd_to_cad: 1.3642,
            use_target_proportions: true,
            skip_cad: false,
            skip_usd: false,
            dlr: Some(DlrPrices { cad: 13.69, usd: 10.03 }),
        };
        let plan = invest_evenly(&req).unwrap();

        let cad_from_conversions: f64 = plan
            .conversions
            .iter()
            .filter(|c| c.kind == ConversionKind::UsdToCad)
            .map(|c| c.receive_amount)
            .sum();
        let cad_to_conversions: f64 = plan
            .conversions
            .iter()
            .filter(|c| c.kind == ConversionKind::CadToUsd)
            .map(|c| c.spend_amount)
            .sum();
        let usd_from_conversions: f64 = plan
            .conversions
            .iter()
            .filter(|c| c.kind == ConversionKind::CadToUsd)
            .map(|c| c.receive_amount)
            .sum();

        assert!(
            plan.totals.cad_needed
                <= 12_345.67 + cad_from_conversions - cad_to_conversions + 0.01
        );
        assert!(plan.totals.usd_needed <= 89.01 + usd_from_conversions + 0.01);
        assert!(plan.totals.cad_remaining >= -0.01);
        assert!(plan.totals.usd_remaining >= -0.01);
    }

    #[test]
    fn skip_flags_exclude_a_currency() {
        let req = InvestEvenlyRequest {
            positions: vec![
                pos("A.TO", Currency::Cad, 100.0, None),
                pos("SPY", Currency::Usd, 100.0, None),
            ],
            cash: CashPools { cad: 1_000.0, usd: 1_000.0 },
            usd_to_cad: 1.35,
            use_target_proportions: false,
            skip_cad: false,
            skip_usd: true,
            dlr: None,
        };
        let plan = invest_evenly(&req).unwrap();
        assert!(plan.purchases.iter().all(|p| p.currency == Currency::Cad));
        assert_eq!(plan.totals.usd_needed, 0.0);
    }

    #[test]
    fn no_investable_positions_is_an_error() {
        let req = InvestEvenlyRequest {
            positions: vec![],
            cash: CashPools { cad: 1_000.0, usd: 0.0 },
            usd_to_cad: 1.35,
            use_target_proportions: false,
            skip_cad: false,
            skip_usd: false,
            dlr: None,
        };
        assert!(matches!(
            invest_evenly(&req).unwrap_err(),
            PlannerError::NothingInvestable(_)
        ));
    }
}
