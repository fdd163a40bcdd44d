use std::collections::BTreeMap;

use chrono::{Months, NaiveDate};

use crate::model::round_cents;
use crate::model::series::ReturnBreakdownEntry;

use super::DayEffect;
use super::xirr::{CashFlow, xirr};

/// Canonical trailing periods, in calendar months.
const PERIODS: [(&str, u32); 5] = [("1m", 1), ("6m", 6), ("12m", 12), ("5y", 60), ("10y", 120)];

/// How much of a period must lie inside the known window before its rate
/// is trusted.
const COVERAGE_FLOOR: f64 = 0.95;

/// Trailing-period return breakdown. Periods starting before the known
/// window are omitted; a period whose XIRR has no root, or whose coverage
/// falls under the floor, is flagged incomplete.
pub fn return_breakdown(
    equity: &BTreeMap<NaiveDate, f64>,
    effects: &BTreeMap<NaiveDate, DayEffect>,
    deposits: &BTreeMap<NaiveDate, f64>,
    earliest: NaiveDate,
    today: NaiveDate,
) -> Vec<ReturnBreakdownEntry> {
    let mut out = Vec::new();

    for (label, months) in PERIODS {
        let Some(start) = today.checked_sub_months(Months::new(months)) else {
            continue;
        };
        if start < earliest {
            continue;
        }
        let (Some(&eq_start), Some(&eq_today)) = (equity.get(&start), equity.get(&today))
        else {
            continue;
        };
        let (Some(&nd_start), Some(&nd_today)) = (deposits.get(&start), deposits.get(&today))
        else {
            continue;
        };

        let total_return = eq_today - eq_start - (nd_today - nd_start);

        // Starting equity goes in as a synthetic outflow at period start.
        let mut flows = vec![CashFlow {
            date: start,
            amount: -eq_start,
        }];
        flows.extend(
            effects
                .range(start.succ_opt().unwrap_or(start)..=today)
                .filter(|(_, e)| e.funding_cad != 0.0)
                .map(|(&date, e)| CashFlow {
                    date,
                    amount: -e.funding_cad,
                }),
        );
        flows.push(CashFlow {
            date: today,
            amount: eq_today,
        });
        let rate = xirr(&flows);

        let wanted = (today - start).num_days().max(1) as f64;
        let have = (today - start.max(earliest)).num_days() as f64;
        let coverage = have / wanted;

        out.push(ReturnBreakdownEntry {
            period: label.to_string(),
            start_date: start,
            total_return_cad: round_cents(total_return),
            annualized_rate: rate,
            incomplete: rate.is_none() || coverage < COVERAGE_FLOOR,
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    /// Two years of flat history with one mid-period deposit: the trailing
    /// 12m total return must net the deposit out.
    #[test]
    fn deposits_do_not_count_as_return() {
        let earliest = d(2023, 6, 1);
        let today = d(2025, 6, 1);

        let mut effects: BTreeMap<NaiveDate, DayEffect> = BTreeMap::new();
        effects.insert(
            earliest,
            DayEffect {
                funding_cad: 1000.0,
                pnl_cad: 0.0,
            },
        );
        effects.insert(
            d(2025, 1, 15),
            DayEffect {
                funding_cad: 500.0,
                pnl_cad: 0.0,
            },
        );

        let equity = crate::funding::equity_series(&effects, 1500.0, earliest, today);
        let deposits = crate::funding::cumulative_net_deposits(&effects, earliest, today);

        let breakdown = return_breakdown(&equity, &effects, &deposits, earliest, today);
        let entry_12m = breakdown.iter().find(|e| e.period == "12m").unwrap();
        assert!(entry_12m.total_return_cad.abs() < 0.05);
        // Flat value: annualized rate ~ 0.
        assert!(entry_12m.annualized_rate.unwrap().abs() < 1e-4);
    }

    #[test]
    fn periods_longer_than_history_are_omitted() {
        let earliest = d(2024, 1, 1);
        let today = d(2025, 1, 1);
        let effects: BTreeMap<NaiveDate, DayEffect> = BTreeMap::new();
        let equity = crate::funding::equity_series(&effects, 100.0, earliest, today);
        let deposits = crate::funding::cumulative_net_deposits(&effects, earliest, today);

        let breakdown = return_breakdown(&equity, &effects, &deposits, earliest, today);
        let labels: Vec<&str> = breakdown.iter().map(|e| e.period.as_str()).collect();
        assert_eq!(labels, vec!["1m", "6m", "12m"]);
    }

    #[test]
    fn gain_over_one_month_annualizes_above_the_raw_return() {
        let earliest = d(2024, 1, 1);
        let today = d(2025, 6, 1);
        let mut effects: BTreeMap<NaiveDate, DayEffect> = BTreeMap::new();
        effects.insert(
            earliest,
            DayEffect {
                funding_cad: 1000.0,
                pnl_cad: 0.0,
            },
        );
        // 2% gain inside the trailing month.
        effects.insert(
            d(2025, 5, 20),
            DayEffect {
                funding_cad: 0.0,
                pnl_cad: 20.0,
            },
        );

        let equity = crate::funding::equity_series(&effects, 1020.0, earliest, today);
        let deposits = crate::funding::cumulative_net_deposits(&effects, earliest, today);
        let breakdown = return_breakdown(&equity, &effects, &deposits, earliest, today);

        let entry_1m = breakdown.iter().find(|e| e.period == "1m").unwrap();
        assert!((entry_1m.total_return_cad - 20.0).abs() < 0.05);
        let rate = entry_1m.annualized_rate.unwrap();
        assert!(rate > 0.2, "one month of 2% should annualize well past 20%, got {rate}");
    }
}
