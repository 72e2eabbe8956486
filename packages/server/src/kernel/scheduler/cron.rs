//! Next-fire computation for cron schedules.
//!
//! Expressions are standard 5-field cron (minute precision); they are
//! normalized to the 6-field form the parser expects. Fires are computed
//! in the schedule's IANA zone, so DST transitions follow standard
//! cron-in-zone semantics, then converted back to UTC.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;

/// Accept 5-field cron by prepending a seconds field; 6- and 7-field
/// expressions pass through.
pub fn normalize_cron(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {}", expr.trim())
    } else {
        expr.trim().to_string()
    }
}

pub fn validate_cron(expr: &str) -> Result<()> {
    Schedule::from_str(&normalize_cron(expr))
        .with_context(|| format!("invalid cron expression '{}'", expr))?;
    Ok(())
}

pub fn validate_timezone(tz: &str) -> Result<Tz> {
    Tz::from_str(tz).map_err(|_| anyhow::anyhow!("unknown timezone '{}'", tz))
}

/// The smallest cron-matching instant strictly after `after`, in the given
/// zone. `None` when the schedule has no future fire.
pub fn next_fire(expr: &str, tz: &str, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    let schedule = Schedule::from_str(&normalize_cron(expr))
        .with_context(|| format!("invalid cron expression '{}'", expr))?;
    let zone = validate_timezone(tz)?;

    let next = schedule
        .after(&after.with_timezone(&zone))
        .next()
        .map(|instant| instant.with_timezone(&Utc));
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn five_field_expressions_gain_a_seconds_field() {
        assert_eq!(normalize_cron("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(normalize_cron("0 0 * * * *"), "0 0 * * * *");
    }

    #[test]
    fn valid_expressions_pass_validation() {
        assert!(validate_cron("*/5 * * * *").is_ok());
        assert!(validate_cron("0 9 * * MON").is_ok());
        assert!(validate_cron("not a cron").is_err());
    }

    #[test]
    fn unknown_timezones_are_rejected() {
        assert!(validate_timezone("UTC").is_ok());
        assert!(validate_timezone("America/Chicago").is_ok());
        assert!(validate_timezone("Mars/Olympus").is_err());
    }

    #[test]
    fn next_fire_rounds_up_to_the_cron_grid() {
        // Created at 12:00:10, every five minutes: first fire 12:05:00.
        let after = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 10).unwrap();
        let next = next_fire("*/5 * * * *", "UTC", after).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 1, 12, 5, 0).unwrap());
    }

    #[test]
    fn next_fire_is_strictly_after_the_reference() {
        let exactly_on_grid = Utc.with_ymd_and_hms(2026, 8, 1, 12, 5, 0).unwrap();
        let next = next_fire("*/5 * * * *", "UTC", exactly_on_grid)
            .unwrap()
            .unwrap();
        assert!(next > exactly_on_grid);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 1, 12, 10, 0).unwrap());
    }

    #[test]
    fn successive_fires_are_monotonic() {
        let mut after = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        for _ in 0..5 {
            let next = next_fire("*/5 * * * *", "UTC", after).unwrap().unwrap();
            assert!(next > after);
            after = next;
        }
    }

    #[test]
    fn zone_offsets_are_honored() {
        // 09:00 in Chicago is 14:00 UTC during CDT (summer).
        let after = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        let next = next_fire("0 9 * * *", "America/Chicago", after)
            .unwrap()
            .unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 1, 14, 0, 0).unwrap());
    }
}
