pub mod breakdown;
pub mod xirr;

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::activity::earliest_funding_date;
use crate::model::Currency;
use crate::model::activity::{Activity, ActivityType};
use crate::model::round_cents;
use crate::model::series::{
    AnnualizedReturn, DividendSummary, FundingSummary, MoneyPair, PnlPoint, PnlSeries,
    PricePoint, SymbolDividends,
};

use xirr::{CashFlow, xirr};

// ── FX table ────────────────────────────────────────────────────────

/// Daily USD→CAD closes, looked up by flow settlement date.
#[derive(Debug, Default, Clone)]
pub struct FxTable {
    rates: BTreeMap<NaiveDate, f64>,
}

impl FxTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_points(points: &[PricePoint]) -> Self {
        Self {
            rates: points.iter().map(|p| (p.date, p.close)).collect(),
        }
    }

    pub fn latest(&self) -> Option<f64> {
        self.rates.values().next_back().copied()
    }

    fn exact(&self, date: NaiveDate) -> Option<f64> {
        self.rates.get(&date).copied()
    }

    fn on_or_before(&self, date: NaiveDate) -> Option<f64> {
        self.rates.range(..=date).next_back().map(|(_, &r)| r)
    }
}

/// Convert a flow to CAD at the rate applicable on its settlement date.
/// A missing exact rate falls back to the latest earlier close and marks
/// the result incomplete; no rate at all counts the flow 1:1.
pub fn flow_to_cad(amount: f64, currency: Currency, date: NaiveDate, fx: &FxTable) -> (f64, bool) {
    match currency {
        Currency::Cad => (amount, false),
        Currency::Usd => match fx.exact(date) {
            Some(rate) => (amount * rate, false),
            None => match fx.on_or_before(date) {
                Some(rate) => (amount * rate, true),
                None => (amount, true),
            },
        },
    }
}

// ── Daily effects ───────────────────────────────────────────────────

/// Net CAD effect of one calendar day's activities on the account.
/// Funding moves both equity and net deposits; P&L events move equity
/// only; trades are an asset swap and move neither.
#[derive(Debug, Default, Clone, Copy)]
pub struct DayEffect {
    pub funding_cad: f64,
    pub pnl_cad: f64,
}

pub fn daily_effects(
    activities: &[Activity],
    fx: &FxTable,
    today: NaiveDate,
) -> (BTreeMap<NaiveDate, DayEffect>, bool) {
    let mut effects: BTreeMap<NaiveDate, DayEffect> = BTreeMap::new();
    let mut incomplete = false;

    for activity in activities {
        if activity.kind == ActivityType::Trades {
            continue;
        }
        let date = activity.settlement_date.min(today);
        let (cad, flagged) = flow_to_cad(activity.net_amount, activity.currency, date, fx);
        incomplete |= flagged;

        let entry = effects.entry(date).or_default();
        if activity.is_funding_flow() {
            entry.funding_cad += cad;
        } else {
            entry.pnl_cad += cad;
        }
    }
    (effects, incomplete)
}

// ── Series reconstruction ───────────────────────────────────────────

/// Walk the activity log backward from today's observed equity, reversing
/// each day's effect. One point per calendar day; days without activity
/// (weekends included) carry the prior value.
pub fn equity_series(
    effects: &BTreeMap<NaiveDate, DayEffect>,
    current_equity_cad: f64,
    start: NaiveDate,
    today: NaiveDate,
) -> BTreeMap<NaiveDate, f64> {
    let mut series = BTreeMap::new();
    let mut value = current_equity_cad;
    let mut date = today;
    loop {
        series.insert(date, value);
        if date <= start {
            break;
        }
        if let Some(e) = effects.get(&date) {
            value -= e.funding_cad + e.pnl_cad;
        }
        date -= chrono::Duration::days(1);
    }
    series
}

/// All-time cumulative net deposits evaluated on each day of
/// `[start, today]`; flows before `start` are folded into the first value.
pub fn cumulative_net_deposits(
    effects: &BTreeMap<NaiveDate, DayEffect>,
    start: NaiveDate,
    today: NaiveDate,
) -> BTreeMap<NaiveDate, f64> {
    let mut series = BTreeMap::new();
    let mut running: f64 = effects
        .range(..start)
        .map(|(_, e)| e.funding_cad)
        .sum();
    let mut date = start;
    while date <= today {
        if let Some(e) = effects.get(&date) {
            running += e.funding_cad;
        }
        series.insert(date, running);
        date += chrono::Duration::days(1);
    }
    series
}

// ── Engine inputs ───────────────────────────────────────────────────

pub struct EngineInputs<'a> {
    pub activities: &'a [Activity],
    pub current_equity_cad: f64,
    pub fx: &'a FxTable,
    pub today: NaiveDate,
    pub cagr_start_date: Option<NaiveDate>,
    /// Manual CAD correction for broker history the crawl cannot see.
    pub net_deposit_adjustment: f64,
}

// ── Total-P&L series ────────────────────────────────────────────────

/// Build the total-P&L time series. With `apply_cagr_start` the series
/// starts at the display start date and the P&L accrued before it is
/// subtracted out, so the first emitted point is exactly zero.
pub fn total_pnl_series(inputs: &EngineInputs, apply_cagr_start: bool) -> PnlSeries {
    let mut issues = Vec::new();
    let (effects, fx_incomplete) = daily_effects(inputs.activities, inputs.fx, inputs.today);
    if fx_incomplete {
        issues.push("some flows were converted with stale or missing FX rates".to_string());
    }

    let Some(earliest) = earliest_funding_date(inputs.activities) else {
        issues.push("no funding history".to_string());
        return PnlSeries {
            issues,
            ..Default::default()
        };
    };
    // A first flow settling in the future would invert the series range.
    let earliest = earliest.min(inputs.today);

    let start = if apply_cagr_start {
        inputs
            .cagr_start_date
            .map(|c| c.max(earliest))
            .unwrap_or(earliest)
            .min(inputs.today)
    } else {
        earliest
    };

    let equity = equity_series(&effects, inputs.current_equity_cad, earliest, inputs.today);
    let deposits = cumulative_net_deposits(&effects, earliest, inputs.today);
    let adjustment = inputs.net_deposit_adjustment;

    // Since-start mode re-bases net deposits at the starting equity so the
    // identity pnl = equity − netDeposits keeps holding point-wise.
    let baseline = if apply_cagr_start {
        equity[&start] - (deposits[&start] + adjustment)
    } else {
        0.0
    };

    let points = equity
        .range(start..=inputs.today)
        .map(|(&date, &eq)| {
            let nd = deposits[&date] + adjustment + baseline;
            PnlPoint {
                date,
                cumulative_net_deposits_cad: round_cents(nd),
                equity_cad: round_cents(eq),
                total_pnl_cad: round_cents(eq - nd),
            }
        })
        .collect();

    PnlSeries {
        points,
        period_start_date: Some(start),
        period_end_date: Some(inputs.today),
        issues,
        missing_price_symbols: Vec::new(),
    }
}

// ── Funding summary ─────────────────────────────────────────────────

pub fn funding_summary(inputs: &EngineInputs) -> FundingSummary {
    let (effects, fx_incomplete) = daily_effects(inputs.activities, inputs.fx, inputs.today);
    let equity_now = inputs.current_equity_cad;

    let Some(earliest) = earliest_funding_date(inputs.activities) else {
        return FundingSummary {
            total_equity_cad: round_cents(equity_now),
            cagr_start_date: inputs.cagr_start_date,
            conversion_incomplete: fx_incomplete,
            ..Default::default()
        };
    };
    let earliest = earliest.min(inputs.today);

    let equity = equity_series(&effects, equity_now, earliest, inputs.today);
    let deposits = cumulative_net_deposits(&effects, earliest, inputs.today);
    let adjustment = inputs.net_deposit_adjustment;

    let nd_raw_today = deposits[&inputs.today];
    let nd_all_time = nd_raw_today + adjustment;
    let pnl_all_time = equity_now - nd_all_time;

    let start = inputs
        .cagr_start_date
        .map(|c| c.clamp(earliest, inputs.today))
        .unwrap_or(earliest);

    // Since-start: the account behaves as if opened at `start` with its
    // then-equity as the deposit base.
    let nd_combined = equity[&start] + (nd_raw_today - deposits[&start]);
    let pnl_combined = equity_now - nd_combined;

    // All-time XIRR: every funding flow is an investor outflow; the
    // terminal equity comes back at today.
    let mut all_time_flows: Vec<CashFlow> = effects
        .iter()
        .filter(|(_, e)| e.funding_cad != 0.0)
        .map(|(&date, e)| CashFlow {
            date,
            amount: -e.funding_cad,
        })
        .collect();
    all_time_flows.push(CashFlow {
        date: inputs.today,
        amount: equity_now,
    });
    let rate_all_time = xirr(&all_time_flows);

    // Since-start XIRR: starting equity is a synthetic outflow at `start`.
    let mut start_flows = vec![CashFlow {
        date: start,
        amount: -equity[&start],
    }];
    if start < inputs.today {
        start_flows.extend(
            effects
                .range(start.succ_opt().unwrap_or(start)..=inputs.today)
                .filter(|(_, e)| e.funding_cad != 0.0)
                .map(|(&date, e)| CashFlow {
                    date,
                    amount: -e.funding_cad,
                }),
        );
    }
    start_flows.push(CashFlow {
        date: inputs.today,
        amount: equity_now,
    });
    let rate_since_start = xirr(&start_flows);

    // A display start predating the known window leaves part of the
    // requested period uncovered.
    let desired_start = inputs.cagr_start_date.unwrap_or(earliest);
    let coverage = {
        let wanted = (inputs.today - desired_start).num_days();
        let have = (inputs.today - start).num_days();
        if wanted <= 0 { 1.0 } else { have as f64 / wanted as f64 }
    };

    FundingSummary {
        net_deposits: MoneyPair {
            all_time_cad: round_cents(nd_all_time),
            combined_cad: round_cents(nd_combined),
        },
        total_pnl: MoneyPair {
            all_time_cad: round_cents(pnl_all_time),
            combined_cad: round_cents(pnl_combined),
        },
        total_equity_cad: round_cents(equity_now),
        annualized_return: AnnualizedReturn {
            rate: rate_since_start,
            as_of: Some(inputs.today),
            start_date: Some(start),
            incomplete: rate_since_start.is_none() || coverage < 0.95,
        },
        annualized_return_all_time: AnnualizedReturn {
            rate: rate_all_time,
            as_of: Some(inputs.today),
            start_date: Some(earliest),
            incomplete: rate_all_time.is_none(),
        },
        return_breakdown: breakdown::return_breakdown(
            &equity,
            &effects,
            &deposits,
            earliest,
            inputs.today,
        ),
        cagr_start_date: inputs.cagr_start_date,
        conversion_incomplete: fx_incomplete,
    }
}

// ── Dividends ───────────────────────────────────────────────────────

pub fn dividend_summary(activities: &[Activity], fx: &FxTable) -> DividendSummary {
    let mut summary = DividendSummary::default();
    for activity in activities {
        if activity.kind != ActivityType::Dividends {
            continue;
        }
        let (cad, _) = flow_to_cad(
            activity.net_amount,
            activity.currency,
            activity.settlement_date,
            fx,
        );
        let symbol = activity
            .symbol
            .clone()
            .unwrap_or_else(|| "(unattributed)".to_string());
        let entry = summary
            .by_symbol
            .entry(symbol)
            .or_insert_with(SymbolDividends::default);
        entry.total_cad = round_cents(entry.total_cad + cad);
        entry.count += 1;
        entry.last_date = entry.last_date.max(Some(activity.settlement_date));
        summary.total_cad = round_cents(summary.total_cad + cad);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn flow(
        date: NaiveDate,
        kind: ActivityType,
        action: &str,
        amount: f64,
        currency: Currency,
    ) -> Activity {
        Activity {
            trade_date: date,
            transaction_date: date,
            settlement_date: date,
            kind,
            action: action.to_string(),
            symbol: None,
            currency,
            quantity: 0.0,
            price: 0.0,
            gross_amount: amount,
            commission: 0.0,
            net_amount: amount,
            description: String::new(),
        }
    }

    /// Deposit +$1000 on Aug 1, a −$200 non-funding loss on Aug 15, a
    /// +$50 gain on Sep 10, display start Sep 1, final equity $850.
    fn scenario() -> Vec<Activity> {
        vec![
            flow(d(2025, 8, 1), ActivityType::Deposits, "CON", 1000.0, Currency::Cad),
            flow(d(2025, 8, 15), ActivityType::Other, "ADJ", -200.0, Currency::Cad),
            flow(d(2025, 9, 10), ActivityType::Dividends, "DIV", 50.0, Currency::Cad),
        ]
    }

    fn scenario_inputs<'a>(activities: &'a [Activity], fx: &'a FxTable) -> EngineInputs<'a> {
        EngineInputs {
            activities,
            current_equity_cad: 850.0,
            fx,
            today: d(2025, 10, 1),
            cagr_start_date: Some(d(2025, 9, 1)),
            net_deposit_adjustment: 0.0,
        }
    }

    #[test]
    fn all_time_pnl_includes_the_prestart_loss() {
        let activities = scenario();
        let fx = FxTable::empty();
        let summary = funding_summary(&scenario_inputs(&activities, &fx));

        assert!((summary.net_deposits.all_time_cad - 1000.0).abs() < 0.05);
        assert!((summary.total_pnl.all_time_cad - (-150.0)).abs() < 0.05);
        assert!((summary.total_pnl.combined_cad - 50.0).abs() < 0.05);
        assert!((summary.net_deposits.combined_cad - 800.0).abs() < 0.05);
    }

    #[test]
    fn since_start_series_excludes_prestart_pnl() {
        let activities = scenario();
        let fx = FxTable::empty();
        let series = total_pnl_series(&scenario_inputs(&activities, &fx), true);

        let first = series.points.first().unwrap();
        assert_eq!(first.date, d(2025, 9, 1));
        assert!(first.total_pnl_cad.abs() < 0.005, "first = {}", first.total_pnl_cad);

        let last = series.points.last().unwrap();
        assert!((last.total_pnl_cad - 50.0).abs() < 0.05, "last = {}", last.total_pnl_cad);
    }

    #[test]
    fn all_time_series_carries_the_loss_through() {
        let activities = scenario();
        let fx = FxTable::empty();
        let series = total_pnl_series(&scenario_inputs(&activities, &fx), false);

        let first = series.points.first().unwrap();
        assert_eq!(first.date, d(2025, 8, 1));
        let last = series.points.last().unwrap();
        assert!((last.total_pnl_cad - (-150.0)).abs() < 0.05);
    }

    #[test]
    fn pnl_identity_holds_at_every_point() {
        let activities = scenario();
        let fx = FxTable::empty();
        for apply in [false, true] {
            let series = total_pnl_series(&scenario_inputs(&activities, &fx), apply);
            for p in &series.points {
                let identity = p.equity_cad - p.cumulative_net_deposits_cad;
                assert!(
                    (p.total_pnl_cad - identity).abs() <= 0.05,
                    "{}: {} vs {}",
                    p.date,
                    p.total_pnl_cad,
                    identity
                );
            }
        }
    }

    #[test]
    fn series_emits_one_point_per_calendar_day() {
        let activities = scenario();
        let fx = FxTable::empty();
        let series = total_pnl_series(&scenario_inputs(&activities, &fx), false);
        assert_eq!(series.points.len(), 62); // Aug 1 ..= Oct 1
        for pair in series.points.windows(2) {
            assert_eq!(pair[1].date, pair[0].date + chrono::Duration::days(1));
        }
        // Quiet days (weekends included) inherit the prior equity.
        let aug2 = &series.points[1];
        let aug3 = &series.points[2];
        assert_eq!(aug2.equity_cad, aug3.equity_cad);
    }

    #[test]
    fn usd_flows_convert_at_settlement_date_rate() {
        let fx = FxTable::from_points(&[
            PricePoint { date: d(2025, 8, 1), close: 1.30 },
            PricePoint { date: d(2025, 9, 1), close: 1.40 },
        ]);
        let activities = vec![flow(
            d(2025, 8, 1),
            ActivityType::Deposits,
            "CON",
            100.0,
            Currency::Usd,
        )];
        let inputs = EngineInputs {
            activities: &activities,
            current_equity_cad: 130.0,
            fx: &fx,
            today: d(2025, 9, 15),
            cagr_start_date: None,
            net_deposit_adjustment: 0.0,
        };
        let summary = funding_summary(&inputs);
        // Converted at 1.30 (the Aug 1 rate), not the later 1.40.
        assert!((summary.net_deposits.all_time_cad - 130.0).abs() < 0.05);
        assert!(!summary.conversion_incomplete);
    }

    #[test]
    fn missing_exact_rate_falls_back_and_flags() {
        let fx = FxTable::from_points(&[PricePoint { date: d(2025, 7, 30), close: 1.25 }]);
        let (cad, flagged) = flow_to_cad(100.0, Currency::Usd, d(2025, 8, 2), &fx);
        assert!((cad - 125.0).abs() < 1e-9);
        assert!(flagged);

        let (one_to_one, flagged_again) =
            flow_to_cad(100.0, Currency::Usd, d(2025, 7, 1), &fx);
        assert!((one_to_one - 100.0).abs() < 1e-9);
        assert!(flagged_again);
    }

    #[test]
    fn adjustment_applies_to_all_time_only() {
        let activities = scenario();
        let fx = FxTable::empty();
        let mut inputs = scenario_inputs(&activities, &fx);
        inputs.net_deposit_adjustment = 100.0;
        let summary = funding_summary(&inputs);

        assert!((summary.net_deposits.all_time_cad - 1100.0).abs() < 0.05);
        assert!((summary.total_pnl.all_time_cad - (-250.0)).abs() < 0.05);
        // The combined view re-bases at starting equity; the correction
        // cancels out of it.
        assert!((summary.total_pnl.combined_cad - 50.0).abs() < 0.05);
    }

    #[test]
    fn annualized_breakdown_omits_periods_before_history() {
        let activities = scenario();
        let fx = FxTable::empty();
        let summary = funding_summary(&scenario_inputs(&activities, &fx));
        // Two months of history: only the 1m entry qualifies.
        assert_eq!(summary.return_breakdown.len(), 1);
        assert_eq!(summary.return_breakdown[0].period, "1m");
    }

    #[test]
    fn dividends_accumulate_by_symbol() {
        let mut div = flow(d(2025, 5, 5), ActivityType::Dividends, "DIV", 12.5, Currency::Cad);
        div.symbol = Some("XIU.TO".to_string());
        let mut div2 = div.clone();
        div2.settlement_date = d(2025, 8, 5);
        let fx = FxTable::empty();
        let summary = dividend_summary(&[div, div2], &fx);
        assert!((summary.total_cad - 25.0).abs() < 0.005);
        let entry = &summary.by_symbol["XIU.TO"];
        assert_eq!(entry.count, 2);
        assert_eq!(entry.last_date, Some(d(2025, 8, 5)));
    }
}
