use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::broker::{BrokerApi, BrokerError, MAX_WINDOW_DAYS};
use crate::model::activity::Activity;

// ── Window slicing ──────────────────────────────────────────────────

/// Split `[from, to]` into consecutive windows of at most the broker's
/// cap. Windows abut exactly; their union equals the request.
pub fn slice_windows(
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut windows = Vec::new();
    let mut cursor = from;
    while cursor < to {
        let end = (cursor + Duration::days(MAX_WINDOW_DAYS)).min(to);
        windows.push((cursor, end));
        cursor = end;
    }
    windows
}

// ── Crawl ───────────────────────────────────────────────────────────

/// Fetch the full activity history for one (login, account) pair by
/// slicing around the broker's window cap, then de-duplicate on the
/// content key and sort by date. Boundary items returned by two adjacent
/// windows collapse to one.
pub async fn crawl(
    broker: &dyn BrokerApi,
    login_id: &str,
    number: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<Activity>, BrokerError> {
    let mut seen = HashSet::new();
    let mut out: Vec<Activity> = Vec::new();

    for (start, end) in slice_windows(from, to) {
        let batch = broker.activities(login_id, number, start, end).await?;
        for activity in batch {
            if seen.insert(activity.dedup_key()) {
                out.push(activity);
            }
        }
    }

    out.sort_by(|a, b| {
        (a.transaction_date, a.settlement_date).cmp(&(b.transaction_date, b.settlement_date))
    });
    Ok(out)
}

/// Settlement date of the first funding flow; the default start of an
/// account's total-P&L series when no display start is configured.
pub fn earliest_funding_date(activities: &[Activity]) -> Option<NaiveDate> {
    activities
        .iter()
        .filter(|a| a.is_funding_flow())
        .map(|a| a.settlement_date)
        .min()
}
