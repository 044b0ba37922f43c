// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Weekend-excluding elapsed time.
//!
//! All math happens in UTC with a fixed Saturday/Sunday weekend; there is no
//! holiday or per-team timezone table. The rules are deliberately simple and
//! their quirks (the same-weekend short-circuit bound in particular) are part
//! of the observable contract that downstream dashboards rely on.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};

const SECONDS_PER_DAY: i64 = 86_400;

/// Failure cases of the business-time calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, masterror::Error)]
pub enum BusinessTimeError {
    /// The end instant precedes the start instant.
    #[error("end instant precedes start instant")]
    EndBeforeStart
}

/// Returns the number of seconds between `start` and `end` with weekend days
/// excluded.
///
/// The calculation follows five steps:
///
/// 1. `end < start` is an error.
/// 2. When both endpoints fall on weekend days no more than two epoch days
///    apart, the whole span is weekend and the result is zero.
/// 3. A weekend start moves forward to the following Monday 00:00.
/// 4. A Sunday end moves back to the preceding Saturday 00:00; a Saturday end
///    moves back to that Saturday 00:00.
/// 5. The result is the raw span between the adjusted endpoints minus one day
///    per weekend day between them, clamped to zero.
///
/// # Errors
///
/// Returns [`BusinessTimeError::EndBeforeStart`] when `end` precedes `start`.
///
/// # Example
///
/// ```
/// use chrono::{DateTime, Utc};
/// use emic::business_time::elapsed_business_seconds;
///
/// let friday: DateTime<Utc> = "2023-05-19T14:00:00Z".parse().expect("valid instant");
/// let monday: DateTime<Utc> = "2023-05-22T10:00:00Z".parse().expect("valid instant");
/// assert_eq!(elapsed_business_seconds(friday, monday), Ok(72_000));
/// ```
pub fn elapsed_business_seconds(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<u64, BusinessTimeError> {
    if end < start {
        return Err(BusinessTimeError::EndBeforeStart);
    }

    if is_weekend(start.weekday())
        && is_weekend(end.weekday())
        && epoch_day(end) - epoch_day(start) <= 2
    {
        return Ok(0);
    }

    let adjusted_start = match start.weekday() {
        Weekday::Sun => start_of_day(start + Duration::days(1)),
        Weekday::Sat => start_of_day(start + Duration::days(2)),
        _ => start
    };
    let adjusted_end = match end.weekday() {
        Weekday::Sun => start_of_day(end - Duration::days(1)),
        Weekday::Sat => start_of_day(end),
        _ => end
    };

    let weekend_days = weekend_days_between(adjusted_start, adjusted_end);
    let elapsed = (adjusted_end - adjusted_start).num_seconds() - weekend_days * SECONDS_PER_DAY;

    Ok(elapsed.max(0) as u64)
}

/// Counts the weekend days between two instants.
///
/// Endpoints are swapped when reversed and normalized off the weekend first
/// (start forward, end backward, keeping the time of day), so only interior
/// weekend days are counted. The walk advances in exact 24 hour steps and
/// includes the end instant.
pub fn weekend_days_between(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    let (mut start, mut end) = if start > end { (end, start) } else { (start, end) };

    match start.weekday() {
        Weekday::Sun => start += Duration::days(1),
        Weekday::Sat => start += Duration::days(2),
        _ => {}
    }
    match end.weekday() {
        Weekday::Sun => end -= Duration::days(2),
        Weekday::Sat => end -= Duration::days(1),
        _ => {}
    }

    let mut count = 0;
    let mut current = start;
    while current <= end {
        if is_weekend(current.weekday()) {
            count += 1;
        }
        current += Duration::days(1);
    }

    count
}

fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}

fn epoch_day(instant: DateTime<Utc>) -> i64 {
    instant.timestamp().div_euclid(SECONDS_PER_DAY)
}

fn start_of_day(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant.date_naive().and_time(NaiveTime::MIN).and_utc()
}
