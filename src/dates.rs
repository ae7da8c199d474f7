use crate::error::{CoreError, CoreResult};
use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::fmt::Write;

pub const DATE_FMT: &str = "%Y-%m-%d";
pub const DATETIME_FMT: &str = "%Y-%m-%dT%H:%M:%S";
pub const TIME_FMT: &str = "%H:%M";

pub fn now_local() -> NaiveDateTime {
    let now = Local::now().naive_local();
    // Stored precision is whole seconds.
    now.with_nanosecond(0).unwrap_or(now)
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn fmt_date(d: NaiveDate) -> String {
    d.format(DATE_FMT).to_string()
}

pub fn fmt_datetime(dt: NaiveDateTime) -> String {
    dt.format(DATETIME_FMT).to_string()
}

/// Renders `d` with a user-supplied strftime pattern. `None` when the pattern
/// is malformed or asks for fields a bare date lacks (`%H`, `%z`, ...).
pub fn format_date_with(d: NaiveDate, fmt: &str) -> Option<String> {
    let mut out = String::new();
    write!(out, "{}", d.format(fmt)).ok()?;
    Some(out)
}

pub fn parse_date(raw: &str) -> CoreResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FMT)
        .map_err(|_| CoreError::bad_params(format!("date must be YYYY-MM-DD: {}", raw)))
}

pub fn parse_time(raw: &str) -> CoreResult<NaiveTime> {
    let t = raw.trim();
    NaiveTime::parse_from_str(t, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(t, TIME_FMT))
        .map_err(|_| CoreError::bad_params(format!("time must be HH:MM: {}", raw)))
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM[:SS]` and `YYYY-MM-DD HH:MM[:SS]`.
/// A bare date is placed at `default_time`.
pub fn parse_occurred_at(raw: &str, default_time: NaiveTime) -> CoreResult<NaiveDateTime> {
    let t = raw.trim();
    for fmt in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(t, fmt) {
            return Ok(dt);
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(t, DATE_FMT) {
        return Ok(d.and_time(default_time));
    }
    Err(CoreError::bad_params(format!(
        "occurredAt must be YYYY-MM-DD or YYYY-MM-DDTHH:MM[:SS]: {}",
        raw
    )))
}

/// Stored timestamps are written by us, but older rows may carry fractional
/// seconds or a space separator.
pub fn parse_stored_datetime(raw: &str) -> Option<NaiveDateTime> {
    let t = raw.trim();
    NaiveDateTime::parse_from_str(t, DATETIME_FMT)
        .or_else(|_| NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(t, DATE_FMT)
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// Moves `date` to `weekday` (0 = Monday) inside the same Monday-based week.
pub fn snap_to_weekday(date: NaiveDate, weekday: u32) -> CoreResult<NaiveDate> {
    if weekday > 6 {
        return Err(CoreError::bad_params("weekday must be 0 (Monday) to 6 (Sunday)"));
    }
    let actual = date.weekday().num_days_from_monday() as i64;
    Ok(date + Duration::days(weekday as i64 - actual))
}
