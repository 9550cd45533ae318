//! Duration parsing and timezone-aware absolute-time resolution
//!
//! Durations are a numeric magnitude followed by one of `ms|s|m|h|d`
//! (case-insensitive, optional whitespace before the suffix). Absolute
//! times with no explicit offset are treated as UTC, never as the host's
//! local zone.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::error::{Result, RunnerError};

/// Accepted naive date-time layouts, tried in order
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// An absolute time resolved to UTC plus the effective zone name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTime {
    /// The instant, UTC-normalized
    pub utc: DateTime<Utc>,
    /// Zone used for downstream cron evaluation ("UTC" when none given)
    pub timezone: String,
}

/// Parse a duration string into milliseconds
///
/// Accepts `<number><ms|s|m|h|d>`, e.g. `"500ms"`, `"30s"`, `"1.5h"`.
pub fn parse_duration(input: &str) -> Result<i64> {
    let s = input.trim();
    let unit_start = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .ok_or_else(|| RunnerError::InvalidDuration(format!("{input:?} is missing a unit suffix")))?;

    let (number, unit) = s.split_at(unit_start);
    let magnitude: f64 = number
        .parse()
        .map_err(|_| RunnerError::InvalidDuration(format!("{input:?} has no numeric magnitude")))?;

    let multiplier: i64 = match unit.trim_start().to_ascii_lowercase().as_str() {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => {
            return Err(RunnerError::InvalidDuration(format!(
                "{input:?} has unknown unit (expected ms, s, m, h, or d)"
            )));
        }
    };

    Ok((magnitude * multiplier as f64).round() as i64)
}

/// Add a duration string to an instant
pub fn add_duration(instant: DateTime<Utc>, duration: &str) -> Result<DateTime<Utc>> {
    let ms = parse_duration(duration)?;
    Ok(instant + Duration::milliseconds(ms))
}

/// Resolve a relative delay to an absolute UTC instant
///
/// Evaluated once, at task-creation time — never re-evaluated on a tick.
pub fn convert_after_to_at(duration: &str) -> Result<DateTime<Utc>> {
    add_duration(Utc::now(), duration)
}

/// Whether a name resolves to an IANA timezone
pub fn validate_timezone(name: &str) -> bool {
    name.parse::<Tz>().is_ok()
}

/// Resolve a raw date-time string to UTC
///
/// A given timezone is validated first (it scopes downstream cron
/// evaluation); the date-time itself is taken at face value — an input
/// carrying an offset is honored, a naive input is read as UTC.
pub fn resolve_absolute_time(raw: &str, timezone: Option<&str>) -> Result<ResolvedTime> {
    debug!(%raw, ?timezone, "resolve_absolute_time");
    if let Some(tz) = timezone {
        if !validate_timezone(tz) {
            return Err(RunnerError::InvalidTimezone(tz.to_string()));
        }
    }

    let utc = parse_datetime_utc(raw)?;
    Ok(ResolvedTime {
        utc,
        timezone: timezone.unwrap_or("UTC").to_string(),
    })
}

fn parse_datetime_utc(raw: &str) -> Result<DateTime<Utc>> {
    let s = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    // Bare dates resolve to midnight UTC
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    Err(RunnerError::InvalidDateTime(raw.to_string()))
}
