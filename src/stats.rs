use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::clock::BusinessClock;
use crate::models::email_log::SendStatus;
use crate::store::Store;

pub const DEFAULT_DAILY_SENDS_DAYS: u32 = 7;
pub const MAX_DAILY_SENDS_DAYS: u32 = 366;

/// Recipient totals per status for the business day containing `now`.
/// Every status is present, zero when nothing was logged.
pub fn status_distribution(
    store: &dyn Store,
    clock: &BusinessClock,
    now: DateTime<Utc>,
) -> Result<BTreeMap<String, i64>, String> {
    let (start, end) = clock.day_bounds(clock.day_of(now));
    let mut out: BTreeMap<String, i64> = SendStatus::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    for (status, total) in store.email_log_totals_by_status(start, end)? {
        out.insert(status.as_str().to_string(), total);
    }
    Ok(out)
}

/// Recipient totals for each of the last `days` business days, today included, keyed by
/// `YYYY-MM-DD`. Days without activity are zero.
pub fn daily_sends(
    store: &dyn Store,
    clock: &BusinessClock,
    now: DateTime<Utc>,
    days: u32,
) -> Result<BTreeMap<String, i64>, String> {
    let days = days.min(MAX_DAILY_SENDS_DAYS);
    let dates = clock.trailing_days(clock.day_of(now), days);
    let windows: Vec<_> = dates.iter().map(|d| clock.day_bounds(*d)).collect();
    let totals = store.email_log_totals_for_windows(&windows)?;

    Ok(dates
        .iter()
        .zip(totals)
        .map(|(date, total)| (date.format("%Y-%m-%d").to_string(), total))
        .collect())
}
