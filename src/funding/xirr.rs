use chrono::NaiveDate;

/// A dated cash flow from the investor's perspective: deposits into the
/// account are negative, the terminal equity is positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CashFlow {
    pub date: NaiveDate,
    pub amount: f64,
}

const YEAR_DAYS: f64 = 365.0;
const LOW: f64 = -0.999;
const HIGH: f64 = 10.0;
const TOLERANCE: f64 = 1e-7;
const MAX_ITERATIONS: u32 = 200;

/// Annualized internal rate of return over irregular cash flows, using a
/// 365-day year. Bisection on `[-0.999, 10.0]`; `None` when the flows
/// carry no sign change in that interval.
pub fn xirr(flows: &[CashFlow]) -> Option<f64> {
    if flows.len() < 2 {
        return None;
    }
    let anchor = flows.iter().map(|f| f.date).min()?;

    let npv = |rate: f64| -> f64 {
        flows
            .iter()
            .map(|f| {
                let years = (f.date - anchor).num_days() as f64 / YEAR_DAYS;
                f.amount / (1.0 + rate).powf(years)
            })
            .sum()
    };

    let mut lo = LOW;
    let mut hi = HIGH;
    let mut f_lo = npv(lo);
    let f_hi = npv(hi);
    if !f_lo.is_finite() || !f_hi.is_finite() || f_lo.signum() == f_hi.signum() {
        return None;
    }

    for _ in 0..MAX_ITERATIONS {
        let mid = (lo + hi) / 2.0;
        let f_mid = npv(mid);
        if f_mid.abs() < TOLERANCE || (hi - lo) / 2.0 < TOLERANCE {
            return Some(mid);
        }
        if f_mid.signum() == f_lo.signum() {
            lo = mid;
            f_lo = f_mid;
        } else {
            hi = mid;
        }
    }
    Some((lo + hi) / 2.0)
}
