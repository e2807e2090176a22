//! Cron schedule validation and next-fire computation.
//!
//! Expressions use the `cron` crate dialect (seconds field first). An
//! absent schedule means "fire once immediately, do not recur" and is
//! handled by the dispatcher, not here.

use crate::core::error::DripError;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

pub fn parse(expr: &str) -> Result<Schedule, DripError> {
    Schedule::from_str(expr).map_err(|e| DripError::InvalidSchedule {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Fail-fast validation used at spec load and instance construction.
pub fn validate(expr: &str) -> Result<(), DripError> {
    parse(expr).map(|_| ())
}

pub fn next_fire(expr: &str, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, DripError> {
    Ok(parse(expr)?.after(&after).next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_valid_expression_parses() {
        assert!(validate("0 0 9 * * *").is_ok());
        assert!(validate("0 */10 * * * *").is_ok());
    }

    #[test]
    fn test_invalid_expression_rejected() {
        assert!(matches!(
            validate("not a cron"),
            Err(DripError::InvalidSchedule { .. })
        ));
        assert!(validate("99 99 99 * * *").is_err());
    }

    #[test]
    fn test_next_fire_advances() {
        let after = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        let next = next_fire("0 0 9 * * *", after).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
    }
}
