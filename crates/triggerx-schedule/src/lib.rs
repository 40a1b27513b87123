//! Pure computation of next-fire instants from schedule descriptors
//! (spec.md §4.1). No I/O, no shared state — a leaf the schedulers call
//! synchronously on every poll.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expr}': {message}")]
    InvalidCron { expr: String, message: String },
    #[error("invalid timezone '{0}'")]
    InvalidTimezone(String),
    #[error("interval must be greater than zero")]
    NonPositiveInterval,
}

#[derive(Debug, Clone)]
pub enum ScheduleKind {
    Interval { seconds: u64 },
    Cron { expr: String },
    Specific { instants: Vec<DateTime<Utc>> },
}

/// `next(after, kind, tz) -> instant | END`. `END` is represented as
/// `Ok(None)`; callers then mark the job completed (spec.md §4.1).
///
/// Ties are broken by strict inequality: a candidate equal to `after`
/// is never returned.
pub fn next(
    after: DateTime<Utc>,
    kind: &ScheduleKind,
    tz: &str,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    match kind {
        ScheduleKind::Interval { seconds } => {
            if *seconds == 0 {
                return Err(ScheduleError::NonPositiveInterval);
            }
            Ok(Some(after + chrono::Duration::seconds(*seconds as i64)))
        }
        ScheduleKind::Cron { expr } => next_cron(after, expr, tz),
        ScheduleKind::Specific { instants } => {
            Ok(instants.iter().filter(|&&t| t > after).min().copied())
        }
    }
}

fn next_cron(
    after: DateTime<Utc>,
    expr: &str,
    tz: &str,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    let zone: Tz = tz
        .parse()
        .map_err(|_| ScheduleError::InvalidTimezone(tz.to_string()))?;
    let normalized = normalize_cron_expr(expr);
    let schedule = CronSchedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCron {
        expr: expr.to_string(),
        message: e.to_string(),
    })?;

    let after_in_tz = after.with_timezone(&zone);
    let candidate = schedule
        .after(&after_in_tz)
        .find(|c| *c > after_in_tz);

    Ok(candidate.map(|c| c.with_timezone(&Utc)))
}

/// The `cron` crate expects a leading seconds field; spec.md's
/// 5-field POSIX expressions (minute hour day-of-month month
/// day-of-week) are widened by prepending a fixed `0` seconds slot.
fn normalize_cron_expr(expr: &str) -> String {
    let field_count = expr.split_whitespace().count();
    if field_count == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn interval_adds_seconds() {
        let after = dt(2026, 1, 1, 10, 0, 0);
        let got = next(after, &ScheduleKind::Interval { seconds: 60 }, "UTC")
            .unwrap()
            .unwrap();
        assert_eq!(got, dt(2026, 1, 1, 10, 1, 0));
    }

    #[test]
    fn interval_zero_is_rejected() {
        let after = dt(2026, 1, 1, 10, 0, 0);
        assert!(next(after, &ScheduleKind::Interval { seconds: 0 }, "UTC").is_err());
    }

    #[test]
    fn specific_returns_smallest_strictly_greater() {
        let after = dt(2026, 1, 1, 10, 0, 0);
        let instants = vec![
            dt(2026, 1, 1, 11, 0, 0),
            dt(2026, 1, 1, 10, 0, 0),
            dt(2026, 1, 1, 12, 0, 0),
        ];
        let got = next(
            after,
            &ScheduleKind::Specific {
                instants: instants.clone(),
            },
            "UTC",
        )
        .unwrap()
        .unwrap();
        assert_eq!(got, dt(2026, 1, 1, 11, 0, 0));
    }

    #[test]
    fn specific_returns_end_when_exhausted() {
        let after = dt(2026, 1, 1, 12, 0, 0);
        let instants = vec![dt(2026, 1, 1, 10, 0, 0), dt(2026, 1, 1, 12, 0, 0)];
        let got = next(after, &ScheduleKind::Specific { instants }, "UTC").unwrap();
        assert_eq!(got, None);
    }

    #[test]
    fn specific_skips_exact_tie() {
        let after = dt(2026, 1, 1, 12, 0, 0);
        let instants = vec![dt(2026, 1, 1, 12, 0, 0)];
        let got = next(after, &ScheduleKind::Specific { instants }, "UTC").unwrap();
        assert_eq!(got, None);
    }

    #[test]
    fn cron_every_minute_widens_five_field_expression() {
        let after = dt(2026, 1, 1, 10, 0, 30);
        let got = next(
            after,
            &ScheduleKind::Cron {
                expr: "* * * * *".to_string(),
            },
            "UTC",
        )
        .unwrap()
        .unwrap();
        assert_eq!(got, dt(2026, 1, 1, 10, 1, 0));
    }

    #[test]
    fn cron_result_is_always_strictly_after() {
        let after = dt(2026, 1, 1, 9, 0, 0);
        let got = next(
            after,
            &ScheduleKind::Cron {
                expr: "0 * * * *".to_string(),
            },
            "UTC",
        )
        .unwrap()
        .unwrap();
        assert!(got > after);
    }

    #[test]
    fn invalid_timezone_is_rejected() {
        let after = dt(2026, 1, 1, 9, 0, 0);
        let err = next(
            after,
            &ScheduleKind::Cron {
                expr: "0 * * * *".to_string(),
            },
            "Not/AZone",
        );
        assert!(err.is_err());
    }
}
