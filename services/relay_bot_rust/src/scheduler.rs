//! Timing helpers for the polling loops.

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use std::time::Duration;

/// Time until wall-clock minute `minute` of the current hour, rolling to
/// the next hour when that mark has already passed. `minute` is validated
/// to 0..=59 at configuration time.
pub fn next_hour_minute_delay(now: DateTime<Utc>, minute: u32) -> Duration {
    let mut target = now
        .with_minute(minute)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    if target <= now {
        target += ChronoDuration::hours(1);
    }
    (target - now).to_std().unwrap_or(Duration::ZERO)
}

/// Sleep until the next wall-clock hour anchor.
pub async fn sleep_until_next_hour_minute(minute: u32) {
    tokio::time::sleep(next_hour_minute_delay(Utc::now(), minute)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 5, hour, minute, second).unwrap()
    }

    #[test]
    fn waits_within_the_current_hour_when_the_mark_is_ahead() {
        let delay = next_hour_minute_delay(at(12, 30, 15), 45);
        assert_eq!(delay.as_secs(), 14 * 60 + 45);
    }

    #[test]
    fn rolls_to_the_next_hour_when_the_mark_has_passed() {
        let delay = next_hour_minute_delay(at(12, 30, 15), 30);
        assert_eq!(delay.as_secs(), 59 * 60 + 45);

        let delay = next_hour_minute_delay(at(12, 30, 15), 1);
        assert_eq!(delay.as_secs(), 30 * 60 + 45);
    }

    #[test]
    fn an_exact_hit_waits_a_full_hour() {
        let delay = next_hour_minute_delay(at(12, 1, 0), 1);
        assert_eq!(delay.as_secs(), 3600);
    }
}
