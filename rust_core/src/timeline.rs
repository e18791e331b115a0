//! Current-window selection over timed feed rows.

use crate::models::TimedEntry;

/// Rotation window of the hourly arbitration feed.
pub const HOURLY_WINDOW_SECS: i64 = 3600;
/// Rotation window of the daily incursion feed.
pub const DAILY_WINDOW_SECS: i64 = 86_400;

/// Pick the row to publish for a rotation feed with windows of
/// `window_secs`, given the wall clock `now` in epoch seconds.
///
/// Preference order: the active row (latest `start_ts` satisfying
/// `start_ts <= now < start_ts + window_secs`), then the earliest upcoming
/// row, then the latest row at all (stale data beats none). Returns `None`
/// only for an empty row set. Feeds deliver rows in arbitrary order.
pub fn select_current<T: TimedEntry>(rows: &[T], window_secs: i64, now: i64) -> Option<&T> {
    let mut ordered: Vec<&T> = rows.iter().collect();
    ordered.sort_by_key(|r| r.start_ts());

    for row in ordered.iter().rev() {
        if row.start_ts() <= now && now < row.start_ts() + window_secs {
            return Some(row);
        }
    }
    ordered
        .iter()
        .find(|r| r.start_ts() > now)
        .copied()
        .or_else(|| ordered.last().copied())
}
