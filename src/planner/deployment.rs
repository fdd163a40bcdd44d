use std::collections::HashSet;

use crate::model::plan::{
    AdjustmentTransaction, Conversion, ConversionKind, DeploymentPlan, PlanTotals, TradeScope,
    TradeSide,
};
use crate::model::{Currency, round_cents};

use super::conversion::{DLR_CAD, DLR_USD, DlrPrices, plan_conversion};
use super::{CashPools, DUST_EPSILON, PlannerError, PlannerPosition, floor_shares};

/// Instrument used to park a growing reserve when no reserve position
/// exists yet.
#[derive(Debug, Clone)]
pub struct FallbackReserve {
    pub symbol: String,
    pub currency: Currency,
    pub price: f64,
}

pub struct DeploymentRequest {
    pub positions: Vec<PlannerPosition>,
    pub cash: CashPools,
    pub usd_to_cad: f64,
    /// Symbols that count as reserve rather than deployed capital.
    pub reserve_symbols: HashSet<String>,
    pub fallback_reserve: Option<FallbackReserve>,
    /// Desired deployed share of the total base, 0–100.
    pub target_deployed_percent: f64,
    pub dlr: Option<DlrPrices>,
}

/// Scale deployed and reserve legs toward a target deployed-percent.
/// Reserve = cash plus positions in the reserve set; cash itself stays
/// cash, so the reserve-security leg absorbs the difference. Sale
/// proceeds fund the other side, with DLR conversions bridging any
/// per-currency shortfall.
pub fn deployment_adjustment(req: &DeploymentRequest) -> Result<DeploymentPlan, PlannerError> {
    let target_pct = req.target_deployed_percent.clamp(0.0, 100.0);

    let (reserve_positions, deployed_positions): (Vec<&PlannerPosition>, Vec<&PlannerPosition>) =
        req.positions
            .iter()
            .filter(|p| p.is_investable())
            .partition(|p| req.reserve_symbols.contains(&p.symbol));

    let cash_cad_total = req.cash.cad.max(0.0) + req.cash.usd.max(0.0) * req.usd_to_cad;
    let deployed_cad: f64 = deployed_positions.iter().map(|p| p.market_value_cad).sum();
    let reserve_securities_cad: f64 =
        reserve_positions.iter().map(|p| p.market_value_cad).sum();
    let total_base = deployed_cad + reserve_securities_cad + cash_cad_total;
    if total_base <= 0.0 {
        return Err(PlannerError::NothingInvestable(
            "account has no positions or cash to adjust".to_string(),
        ));
    }

    let target_deployed_cad = total_base * target_pct / 100.0;
    let target_reserve_cad = total_base - target_deployed_cad;

    let mut transactions: Vec<AdjustmentTransaction> = Vec::new();

    // Deployed leg: scale every holding by the same factor.
    if deployed_cad > 0.0 {
        let factor = target_deployed_cad / deployed_cad;
        for p in &deployed_positions {
            push_delta(
                &mut transactions,
                p,
                p.market_value_cad * (factor - 1.0),
                TradeScope::Deployed,
                req.usd_to_cad,
            );
        }
    }

    // Reserve leg: cash is already reserve, so securities cover the rest.
    let target_reserve_securities = (target_reserve_cad - cash_cad_total).max(0.0);
    if reserve_securities_cad > 0.0 {
        let factor = target_reserve_securities / reserve_securities_cad;
        for p in &reserve_positions {
            push_delta(
                &mut transactions,
                p,
                p.market_value_cad * (factor - 1.0),
                TradeScope::Reserve,
                req.usd_to_cad,
            );
        }
    } else if target_reserve_securities > DUST_EPSILON {
        if let Some(fallback) = &req.fallback_reserve {
            let native = match fallback.currency {
                Currency::Cad => target_reserve_securities,
                Currency::Usd => target_reserve_securities / req.usd_to_cad,
            };
            let shares = floor_shares(native, fallback.price, fallback.currency);
            let amount = round_cents(shares * fallback.price);
            if amount > DUST_EPSILON {
                transactions.push(AdjustmentTransaction {
                    side: TradeSide::Buy,
                    scope: TradeScope::Reserve,
                    symbol: fallback.symbol.clone(),
                    currency: fallback.currency,
                    amount,
                    shares,
                    price: fallback.price,
                });
            }
        }
    }

    transactions.retain(|t| t.amount > DUST_EPSILON);

    // Net cash flow per currency: starting cash plus sales minus buys.
    let flow = |currency: Currency| -> f64 {
        let start = match currency {
            Currency::Cad => req.cash.cad.max(0.0),
            Currency::Usd => req.cash.usd.max(0.0),
        };
        transactions
            .iter()
            .filter(|t| t.currency == currency)
            .fold(start, |acc, t| match t.side {
                TradeSide::Sell => acc + t.amount,
                TradeSide::Buy => acc - t.amount,
            })
    };

    // A conversion only makes sense when the other currency has surplus
    // to spend; a pure rounding shortfall with nothing to convert from is
    // left visible in the totals instead.
    let mut conversions: Vec<Conversion> = Vec::new();
    let cad_flow = flow(Currency::Cad);
    let usd_flow = flow(Currency::Usd);
    if usd_flow < -DUST_EPSILON && cad_flow > 0.0 {
        let dlr = req
            .dlr
            .ok_or(PlannerError::MissingConversionPrice(DLR_CAD))?;
        if let Some(c) = plan_conversion(ConversionKind::CadToUsd, cad_flow, -usd_flow, &dlr) {
            conversions.push(c);
        }
    } else if cad_flow < -DUST_EPSILON && usd_flow > 0.0 {
        let dlr = req
            .dlr
            .ok_or(PlannerError::MissingConversionPrice(DLR_USD))?;
        if let Some(c) = plan_conversion(ConversionKind::UsdToCad, usd_flow, -cad_flow, &dlr) {
            conversions.push(c);
        }
    }

    let sum_by = |side: TradeSide, currency: Currency| -> f64 {
        transactions
            .iter()
            .filter(|t| t.side == side && t.currency == currency)
            .map(|t| t.amount)
            .sum()
    };
    let conv_delta = |currency: Currency| -> f64 {
        conversions
            .iter()
            .map(|c| match (c.kind, currency) {
                (ConversionKind::CadToUsd, Currency::Cad) => -c.spend_amount,
                (ConversionKind::CadToUsd, Currency::Usd) => c.receive_amount,
                (ConversionKind::UsdToCad, Currency::Usd) => -c.spend_amount,
                (ConversionKind::UsdToCad, Currency::Cad) => c.receive_amount,
            })
            .sum()
    };

    let totals = PlanTotals {
        cad_needed: round_cents(sum_by(TradeSide::Buy, Currency::Cad)),
        usd_needed: round_cents(sum_by(TradeSide::Buy, Currency::Usd)),
        cad_remaining: round_cents(cad_flow + conv_delta(Currency::Cad)),
        usd_remaining: round_cents(usd_flow + conv_delta(Currency::Usd)),
    };

    let summary_text = render_summary(&transactions, &conversions, target_pct);

    Ok(DeploymentPlan {
        transactions,
        conversions,
        totals,
        target_deployed_percent: target_pct,
        summary_text,
    })
}

fn push_delta(
    transactions: &mut Vec<AdjustmentTransaction>,
    position: &PlannerPosition,
    delta_cad: f64,
    scope: TradeScope,
    usd_to_cad: f64,
) {
    let native = match position.currency {
        Currency::Cad => delta_cad,
        Currency::Usd => delta_cad / usd_to_cad,
    };
    let side = if native >= 0.0 {
        TradeSide::Buy
    } else {
        TradeSide::Sell
    };
    let shares = floor_shares(native.abs(), position.price, position.currency);
    let amount = round_cents(shares * position.price);
    transactions.push(AdjustmentTransaction {
        side,
        scope,
        symbol: position.symbol.clone(),
        currency: position.currency,
        amount,
        shares,
        price: position.price,
    });
}

fn render_summary(
    transactions: &[AdjustmentTransaction],
    conversions: &[Conversion],
    target_pct: f64,
) -> String {
    let mut lines = vec![format!("Adjust to {target_pct:.1}% deployed")];
    for t in transactions {
        let side = match t.side {
            TradeSide::Buy => "Buy",
            TradeSide::Sell => "Sell",
        };
        let scope = match t.scope {
            TradeScope::Deployed => "deployed",
            TradeScope::Reserve => "reserve",
        };
        lines.push(format!(
            "{side} {} {} @ {:.2} {} = {:.2} ({scope})",
            t.shares, t.symbol, t.price, t.currency, t.amount,
        ));
    }
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
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(symbol: &str, currency: Currency, price: f64, quantity: f64, usd_to_cad: f64) -> PlannerPosition {
        let market_value = price * quantity;
        let market_value_cad = match currency {
            Currency::Cad => market_value,
            Currency::Usd => market_value * usd_to_cad,
        };
        PlannerPosition {
            symbol: symbol.to_string(),
            currency,
            quantity,
            price,
            market_value,
            market_value_cad,
            target_proportion: None,
            note: None,
        }
    }

    #[test]
    fn full_deployment_sells_reserve_and_converts_via_dlr() {
        // $137 USD deployed, $137 CAD in a reserve fund, no cash. Going to
        // 100% deployed requires a $137 USD buy funded by the $137 CAD
        // sale: ten DLR.TO shares, $137.00 CAD in, $100.00 USD out.
        let req = DeploymentRequest {
            positions: vec![
                pos("QQQ", Currency::Usd, 137.0, 1.0, 1.0),
                pos("PSA.TO", Currency::Cad, 13.70, 10.0, 1.0),
            ],
            cash: CashPools { cad: 0.0, usd: 0.0 },
            usd_to_cad: 1.0,
            reserve_symbols: HashSet::from(["PSA.TO".to_string()]),
            fallback_reserve: None,
            target_deployed_percent: 100.0,
            dlr: Some(DlrPrices { cad: 13.70, usd: 10.00 }),
        };
        let plan = deployment_adjustment(&req).unwrap();

        let sell = plan
            .transactions
            .iter()
            .find(|t| t.side == TradeSide::Sell)
            .unwrap();
        assert_eq!(sell.symbol, "PSA.TO");
        assert_eq!(sell.scope, TradeScope::Reserve);
        assert!((sell.amount - 137.0).abs() < 0.005);

        let buy = plan
            .transactions
            .iter()
            .find(|t| t.side == TradeSide::Buy)
            .unwrap();
        assert_eq!(buy.symbol, "QQQ");
        assert_eq!(buy.scope, TradeScope::Deployed);
        assert!((buy.amount - 137.0).abs() < 0.005);

        assert_eq!(plan.conversions.len(), 1);
        let c = &plan.conversions[0];
        assert_eq!(c.kind, ConversionKind::CadToUsd);
        assert_eq!(c.shares, 10.0);
        assert!((c.spend_amount - 137.00).abs() < 0.005);
        assert!((c.receive_amount - 100.00).abs() < 0.005);
    }

    #[test]
    fn reducing_deployment_grows_the_reserve_leg() {
        let req = DeploymentRequest {
            positions: vec![
                pos("XIU.TO", Currency::Cad, 40.0, 100.0, 1.35), // 4000 deployed
                pos("PSA.TO", Currency::Cad, 50.0, 20.0, 1.35),  // 1000 reserve
            ],
            cash: CashPools { cad: 0.0, usd: 0.0 },
            usd_to_cad: 1.35,
            reserve_symbols: HashSet::from(["PSA.TO".to_string()]),
            fallback_reserve: None,
            target_deployed_percent: 50.0,
            dlr: None,
        };
        let plan = deployment_adjustment(&req).unwrap();

        // 5000 total → 2500 deployed target: sell 1500 of XIU, buy 1500 of PSA.
        let sell = plan.transactions.iter().find(|t| t.symbol == "XIU.TO").unwrap();
        assert_eq!(sell.side, TradeSide::Sell);
        assert!((sell.amount - 1480.0).abs() < 40.1); // whole shares of 40

        let buy = plan.transactions.iter().find(|t| t.symbol == "PSA.TO").unwrap();
        assert_eq!(buy.side, TradeSide::Buy);
        assert_eq!(buy.scope, TradeScope::Reserve);
    }

    #[test]
    fn missing_reserve_positions_use_the_fallback_symbol() {
        let req = DeploymentRequest {
            positions: vec![pos("XIU.TO", Currency::Cad, 40.0, 100.0, 1.35)],
            cash: CashPools { cad: 0.0, usd: 0.0 },
            usd_to_cad: 1.35,
            reserve_symbols: HashSet::new(),
            fallback_reserve: Some(FallbackReserve {
                symbol: "CBIL.TO".to_string(),
                currency: Currency::Cad,
                price: 50.0,
            }),
            target_deployed_percent: 75.0,
            dlr: None,
        };
        let plan = deployment_adjustment(&req).unwrap();

        let fallback = plan
            .transactions
            .iter()
            .find(|t| t.symbol == "CBIL.TO")
            .unwrap();
        assert_eq!(fallback.side, TradeSide::Buy);
        assert_eq!(fallback.scope, TradeScope::Reserve);
        // 25% of 4000 = 1000 → 20 shares at 50.
        assert_eq!(fallback.shares, 20.0);
    }

    #[test]
    fn dust_trades_are_dropped() {
        // Already at target: deltas round to zero-share trades.
        let req = DeploymentRequest {
            positions: vec![
                pos("XIU.TO", Currency::Cad, 40.0, 75.0, 1.35),  // 3000
                pos("PSA.TO", Currency::Cad, 50.0, 20.0, 1.35),  // 1000
            ],
            cash: CashPools { cad: 0.0, usd: 0.0 },
            usd_to_cad: 1.35,
            reserve_symbols: HashSet::from(["PSA.TO".to_string()]),
            fallback_reserve: None,
            target_deployed_percent: 75.0,
            dlr: None,
        };
        let plan = deployment_adjustment(&req).unwrap();
        assert!(plan.transactions.is_empty());
        assert!(plan.conversions.is_empty());
    }

    #[test]
    fn cash_counts_as_reserve() {
        let req = DeploymentRequest {
            positions: vec![pos("XIU.TO", Currency::Cad, 40.0, 75.0, 1.35)], // 3000 deployed
            cash: CashPools { cad: 1000.0, usd: 0.0 },
            usd_to_cad: 1.35,
            reserve_symbols: HashSet::new(),
            fallback_reserve: None,
            target_deployed_percent: 75.0,
            dlr: None,
        };
        // 4000 total, 75% = 3000 deployed: already there, nothing to do.
        let plan = deployment_adjustment(&req).unwrap();
        assert!(plan.transactions.is_empty());
    }

    #[test]
    fn empty_account_is_an_error() {
        let req = DeploymentRequest {
            positions: vec![],
            cash: CashPools { cad: 0.0, usd: 0.0 },
            usd_to_cad: 1.35,
            reserve_symbols: HashSet::new(),
            fallback_reserve: None,
            target_deployed_percent: 50.0,
            dlr: None,
        };
        assert!(matches!(
            deployment_adjustment(&req).unwrap_err(),
            PlannerError::NothingInvestable(_)
        ));
    }
}
