use crate::model::plan::{Conversion, ConversionKind};
use crate::model::round_cents;

/// The CAD-denominated leg of the gambit pair.
pub const DLR_CAD: &str = "DLR.TO";
/// The USD-denominated leg.
pub const DLR_USD: &str = "DLR.U.TO";

/// Live prices of the two legs: DLR.TO in CAD, DLR.U.TO in USD.
#[derive(Debug, Clone, Copy)]
pub struct DlrPrices {
    pub cad: f64,
    pub usd: f64,
}

/// Plan a whole-share conversion covering up to `needed` units of the
/// receive currency, spending no more than `spendable` of the spend
/// currency. The share count floors (spend ≤ budget); a shortfall left
/// by flooring is the caller's to rescale around. Returns `None` when
/// nothing (or less than one share) can be converted.
pub fn plan_conversion(
    kind: ConversionKind,
    spendable: f64,
    needed: f64,
    prices: &DlrPrices,
) -> Option<Conversion> {
    if needed <= 0.0 || spendable <= 0.0 || prices.cad <= 0.0 || prices.usd <= 0.0 {
        return None;
    }

    let (spend_price, receive_price, symbol) = match kind {
        ConversionKind::CadToUsd => (prices.cad, prices.usd, DLR_CAD),
        ConversionKind::UsdToCad => (prices.usd, prices.cad, DLR_USD),
    };

    // The need expressed in the spend currency, at the pair's implied rate.
    let needed_in_spend = needed / receive_price * spend_price;
    let budget = spendable.min(needed_in_spend);
    let shares = (budget / spend_price).floor();
    if shares < 1.0 {
        return None;
    }

    Some(Conversion {
        kind,
        symbol: symbol.to_string(),
        shares,
        spend_amount: round_cents(shares * spend_price),
        receive_amount: round_cents(shares * receive_price),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRICES: DlrPrices = DlrPrices { cad: 13.70, usd: 10.00 };

    #[test]
    fn cad_to_usd_floors_to_whole_shares_within_budget() {
        // $137 CAD available against a $137 USD need: ten shares, spending
        // exactly $137.00 and yielding $100.00 USD.
        let c = plan_conversion(ConversionKind::CadToUsd, 137.0, 137.0, &PRICES).unwrap();
        assert_eq!(c.symbol, DLR_CAD);
        assert_eq!(c.shares, 10.0);
        assert!((c.spend_amount - 137.0).abs() < 0.005);
        assert!((c.receive_amount - 100.0).abs() < 0.005);
    }

    #[test]
    fn ample_cash_converts_only_what_is_needed() {
        let c = plan_conversion(ConversionKind::CadToUsd, 10_000.0, 100.0, &PRICES).unwrap();
        // 100 USD ≈ 137 CAD at the implied rate → 10 shares.
        assert_eq!(c.shares, 10.0);
        assert!(c.spend_amount <= 10_000.0);
    }

    #[test]
    fn usd_to_cad_uses_the_usd_leg() {
        let c = plan_conversion(ConversionKind::UsdToCad, 100.0, 137.0, &PRICES).unwrap();
        assert_eq!(c.symbol, DLR_USD);
        assert_eq!(c.shares, 10.0);
        assert!((c.spend_amount - 100.0).abs() < 0.005);
        assert!((c.receive_amount - 137.0).abs() < 0.005);
    }

    #[test]
    fn sub_share_budgets_yield_no_conversion() {
        assert!(plan_conversion(ConversionKind::CadToUsd, 10.0, 100.0, &PRICES).is_none());
        assert!(plan_conversion(ConversionKind::CadToUsd, 0.0, 100.0, &PRICES).is_none());
        assert!(plan_conversion(ConversionKind::CadToUsd, 100.0, 0.0, &PRICES).is_none());
    }
}
