//! Resolution of schedule expressions into refresh policies
//!
//! A schedule expression is either `@every <duration>` or a cron expression.
//! Short intervals get a dedicated timer, since cron fields only have minute
//! granularity; everything else goes through the shared cron evaluator.
//! Calendar expressions are evaluated in local time, with standard weekday
//! numbering (0-7, Sunday being 0 or 7).

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Local};
use cron::Schedule;

use super::error::ScheduleError;

/// Intervals shorter than this use a fixed-interval timer
pub const MIN_CRON_PERIOD: Duration = Duration::from_secs(60);

const EVERY_PREFIX: &str = "@every ";

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Resolved form of a schedule expression
#[derive(Debug, Clone)]
pub enum SchedulePolicy {
    /// Run every `Duration` on a dedicated timer
    FixedPeriod(Duration),
    /// Run at the instants produced by the shared cron evaluator
    Cron(CronRules),
}

/// Trigger rules understood by the cron evaluator
#[derive(Debug, Clone)]
pub enum CronRules {
    /// Constant delay between runs (`@every` of a minute or more)
    Every(Duration),
    /// Calendar based cron schedule
    Calendar(Box<Schedule>),
}

impl SchedulePolicy {
    /// Resolves a textual schedule expression.
    ///
    /// # Examples
    /// * `@every 50ms` resolves to `FixedPeriod(50ms)`
    /// * `@every 5m` resolves to `Cron(Every(5m))`
    /// * `*/5 * * * *` and `@hourly` resolve to `Cron(Calendar(..))`
    pub fn resolve(expr: &str) -> Result<Self, ScheduleError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(ScheduleError::Empty);
        }

        if let Some(interval) = expr.strip_prefix(EVERY_PREFIX) {
            let period = humantime::parse_duration(interval.trim()).map_err(|source| {
                ScheduleError::InvalidInterval {
                    expr: expr.to_string(),
                    source,
                }
            })?;
            if period.is_zero() {
                return Err(ScheduleError::ZeroInterval(expr.to_string()));
            }
            if period < MIN_CRON_PERIOD {
                return Ok(SchedulePolicy::FixedPeriod(period));
            }
            return Self::cron(expr, CronRules::Every(period));
        }

        let schedule =
            Schedule::from_str(&normalize_cron(expr)?).map_err(|source| ScheduleError::InvalidCron {
                expr: expr.to_string(),
                source,
            })?;
        Self::cron(expr, CronRules::Calendar(Box::new(schedule)))
    }

    fn cron(expr: &str, rules: CronRules) -> Result<Self, ScheduleError> {
        if rules.next_after(Local::now()).is_none() {
            return Err(ScheduleError::NoUpcomingRun(expr.to_string()));
        }
        Ok(SchedulePolicy::Cron(rules))
    }
}

impl CronRules {
    /// Returns the first trigger instant strictly after `after`
    pub fn next_after(&self, after: DateTime<Local>) -> Option<DateTime<Local>> {
        match self {
            CronRules::Every(period) => {
                let period = chrono::Duration::from_std(*period).ok()?;
                after.checked_add_signed(period)
            }
            CronRules::Calendar(schedule) => schedule.after(&after).next(),
        }
    }
}

/// Adapts a standard five-field expression for the `cron` crate.
///
/// A seconds column of zero is prepended and numeric weekdays are spelled out
/// as names, since the crate counts weekdays from Sunday = 1. Descriptors and
/// six or seven field expressions pass through unchanged.
fn normalize_cron(expr: &str) -> Result<String, ScheduleError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if expr.starts_with('@') || fields.len() != 5 {
        return Ok(expr.to_string());
    }
    let weekdays = normalize_weekdays(fields[4]).ok_or_else(|| ScheduleError::InvalidWeekday {
        expr: expr.to_string(),
        field: fields[4].to_string(),
    })?;
    Ok(format!("0 {} {}", fields[..4].join(" "), weekdays))
}

/// Rewrites numeric items of a day-of-week field as weekday names.
///
/// Named items (`MON-FRI`) are kept as they are. Returns `None` for a
/// malformed numeric item.
fn normalize_weekdays(field: &str) -> Option<String> {
    if field == "*" || field == "?" {
        return Some(field.to_string());
    }

    let mut items = Vec::new();
    let mut days = [false; 7];
    for item in field.split(',') {
        if item.chars().any(|c| c.is_ascii_alphabetic()) {
            items.push(item.to_string());
            continue;
        }
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, step.parse::<usize>().ok().filter(|step| *step > 0)?),
            None => (item, 1),
        };
        let (start, end) = match base.split_once('-') {
            _ if base == "*" || base == "?" => (0, 6),
            Some((start, end)) => (weekday(start)?, weekday(end)?),
            // `N/step` runs from N to the end of the week
            None if item.contains('/') => (weekday(base)?, 6),
            None => (weekday(base)?, weekday(base)?),
        };
        if start > end {
            return None;
        }
        for day in (start..=end).step_by(step) {
            days[day % 7] = true;
        }
    }

    items.extend(
        days.iter()
            .zip(WEEKDAYS)
            .filter(|(set, _)| **set)
            .map(|(_, name)| name.to_string()),
    );
    Some(items.join(","))
}

fn weekday(s: &str) -> Option<usize> {
    s.parse::<usize>().ok().filter(|day| *day <= 7)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    #[test]
    fn test_short_every_uses_fixed_period() {
        let policy = SchedulePolicy::resolve("@every 50ms").unwrap();
        assert!(matches!(policy, SchedulePolicy::FixedPeriod(p) if p == Duration::from_millis(50)));

        let policy = SchedulePolicy::resolve("@every 59s").unwrap();
        assert!(matches!(policy, SchedulePolicy::FixedPeriod(p) if p == Duration::from_secs(59)));
    }

    #[test]
    fn test_minute_or_longer_every_uses_cron() {
        let policy = SchedulePolicy::resolve("@every 1m").unwrap();
        assert!(matches!(
            policy,
            SchedulePolicy::Cron(CronRules::Every(p)) if p == MIN_CRON_PERIOD
        ));

        let policy = SchedulePolicy::resolve("@every 1h30m").unwrap();
        assert!(matches!(
            policy,
            SchedulePolicy::Cron(CronRules::Every(p)) if p == Duration::from_secs(90 * 60)
        ));
    }

    #[test]
    fn test_five_field_cron() {
        let policy = SchedulePolicy::resolve("*/5 * * * *").unwrap();
        assert!(matches!(policy, SchedulePolicy::Cron(CronRules::Calendar(_))));
    }

    #[test]
    fn test_descriptor_cron() {
        let policy = SchedulePolicy::resolve("@daily").unwrap();
        assert!(matches!(policy, SchedulePolicy::Cron(CronRules::Calendar(_))));
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(matches!(SchedulePolicy::resolve(""), Err(ScheduleError::Empty)));
        assert!(matches!(SchedulePolicy::resolve("   "), Err(ScheduleError::Empty)));
        assert!(matches!(
            SchedulePolicy::resolve("invalid"),
            Err(ScheduleError::InvalidCron { .. })
        ));
        assert!(matches!(
            SchedulePolicy::resolve("@every soon"),
            Err(ScheduleError::InvalidInterval { .. })
        ));
        assert!(matches!(
            SchedulePolicy::resolve("@every 0s"),
            Err(ScheduleError::ZeroInterval(_))
        ));
    }

    #[test]
    fn test_every_next_after_adds_period() {
        let rules = CronRules::Every(Duration::from_secs(300));
        let start = Local.with_ymd_and_hms(2024, 7, 15, 12, 0, 0).unwrap();
        let next = rules.next_after(start).unwrap();
        assert_eq!(next, Local.with_ymd_and_hms(2024, 7, 15, 12, 5, 0).unwrap());
    }

    #[test]
    fn test_calendar_next_after_lands_on_schedule() {
        let SchedulePolicy::Cron(rules) = SchedulePolicy::resolve("0 * * * *").unwrap() else {
            panic!("expected cron rules");
        };
        let start = Local.with_ymd_and_hms(2024, 7, 15, 12, 20, 13).unwrap();
        let next = rules.next_after(start).unwrap();
        assert_eq!(next.hour(), 13);
        assert_eq!(next.minute(), 0);
        assert_eq!(next.second(), 0);
    }

    fn next_run(expr: &str, after: DateTime<Local>) -> DateTime<Local> {
        let SchedulePolicy::Cron(rules) = SchedulePolicy::resolve(expr).unwrap() else {
            panic!("expected cron rules for {}", expr);
        };
        rules.next_after(after).unwrap()
    }

    #[test]
    fn test_weekday_range_uses_standard_numbering() {
        // Saturday morning; weekdays resume on Monday
        let saturday = Local.with_ymd_and_hms(2024, 7, 13, 10, 0, 0).unwrap();
        let next = next_run("0 9 * * 1-5", saturday);
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!(next.day(), 15);
        assert_eq!(next.hour(), 9);
    }

    #[test]
    fn test_sunday_is_zero_or_seven() {
        let saturday = Local.with_ymd_and_hms(2024, 7, 13, 10, 0, 0).unwrap();
        assert_eq!(next_run("0 9 * * 0", saturday).weekday(), Weekday::Sun);
        assert_eq!(next_run("0 9 * * 7", saturday).weekday(), Weekday::Sun);
        assert_eq!(next_run("0 9 * * 6,0", saturday).weekday(), Weekday::Sun);
    }

    #[test]
    fn test_weekday_names_and_steps() {
        let saturday = Local.with_ymd_and_hms(2024, 7, 13, 10, 0, 0).unwrap();
        assert_eq!(next_run("0 9 * * MON-FRI", saturday).weekday(), Weekday::Mon);
        assert_eq!(normalize_cron("0 9 * * */2").unwrap(), "0 0 9 * * Sun,Tue,Thu,Sat");
        assert_eq!(normalize_cron("0 9 * * 1/2").unwrap(), "0 0 9 * * Mon,Wed,Fri");
        assert_eq!(normalize_cron("*/5 * * * *").unwrap(), "0 */5 * * * *");
    }

    #[test]
    fn test_invalid_weekday_is_rejected() {
        for expr in ["0 9 * * 8", "0 9 * * 5-1", "0 9 * * 1/0", "0 9 * * -1"] {
            assert!(
                matches!(SchedulePolicy::resolve(expr), Err(ScheduleError::InvalidWeekday { .. })),
                "expected {} to be rejected",
                expr
            );
        }
    }

    #[test]
    fn test_schedule_without_upcoming_run_is_rejected() {
        assert!(matches!(
            SchedulePolicy::resolve("@every 1000000y"),
            Err(ScheduleError::NoUpcomingRun(_))
        ));
        assert!(matches!(
            SchedulePolicy::resolve("0 0 0 1 1 * 2000"),
            Err(ScheduleError::NoUpcomingRun(_))
        ));
    }
}
