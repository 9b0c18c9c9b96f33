//! Parsing and evaluation for standard 5-field cron expressions. Pure:
//! "now" is always passed in by the caller so tests can inject time instead
//! of reading the wall clock here.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::error::CronError;

/// Result of `validate`: the expression parses and its first two firings
/// after `now`, or a structured error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub first_firing: DateTime<Utc>,
    pub second_firing: DateTime<Utc>,
}

/// `cron` expects a 6-field expression (seconds first); jobs are stored in
/// the standard 5-field form, so a `0` seconds field is prefixed before
/// handing it to the parser.
fn to_six_field(expression: &str) -> String {
    format!("0 {}", expression.trim())
}

fn parse_schedule(expression: &str) -> Result<Schedule, CronError> {
    Schedule::from_str(&to_six_field(expression))
        .map_err(|e| CronError::MalformedExpression(format!("{}: {}", expression, e)))
}

fn parse_timezone(timezone: &str) -> Result<Tz, CronError> {
    Tz::from_str(timezone).map_err(|_| CronError::UnknownTimezone(timezone.to_string()))
}

/// Validate a 5-field cron expression, returning its first two firings after
/// the current instant (UTC) so callers get immediate feedback that the
/// schedule actually produces events.
pub fn validate(expression: &str) -> Result<ValidationOutcome, CronError> {
    let schedule = parse_schedule(expression)?;
    let now = Utc::now();
    let mut upcoming = schedule.after(&now);
    let first_firing = upcoming
        .next()
        .ok_or_else(|| CronError::MalformedExpression(format!("{} never fires", expression)))?;
    let second_firing = upcoming
        .next()
        .ok_or_else(|| CronError::MalformedExpression(format!("{} fires only once", expression)))?;
    Ok(ValidationOutcome { first_firing, second_firing })
}

/// Given `(expression, timezone, afterInstant)`, produce the next firing
/// instant strictly after `after_instant`, interpreted in `timezone`.
pub fn next(expression: &str, timezone: &str, after_instant: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
    let schedule = parse_schedule(expression)?;
    let tz = parse_timezone(timezone)?;
    let after_in_tz = after_instant.with_timezone(&tz);
    let next_in_tz = schedule
        .after(&after_in_tz)
        .next()
        .ok_or_else(|| CronError::MalformedExpression(format!("{} never fires", expression)))?;
    Ok(next_in_tz.with_timezone(&Utc))
}
