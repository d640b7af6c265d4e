//! Timezone utilities for EPG normalization
//!
//! Guide providers serialize program times in local wall clock more often
//! than they admit. Everything stored by this crate is UTC; these helpers
//! parse and format the offsets seen on the wire and compute the automatic
//! shift that realigns local-as-UTC timestamps.

use chrono::{DateTime, Duration, FixedOffset, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

use crate::errors::{AppResult, SourceError};

fn offset_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([+-])(\d{2}):?(\d{2})$").expect("static regex"))
}

/// Parse a UTC offset string into a signed duration.
///
/// Accepted grammar: `""`, `"Z"`, `"z"`, `[+-]HH[:]MM` with `HH <= 14` and
/// `MM <= 59`. Everything else is `InvalidOffset`.
pub fn parse_timezone_offset(offset: &str) -> AppResult<Duration> {
    let trimmed = offset.trim();
    if trimmed.is_empty() || trimmed == "Z" || trimmed == "z" {
        return Ok(Duration::zero());
    }

    let caps = offset_regex()
        .captures(trimmed)
        .ok_or_else(|| SourceError::InvalidOffset {
            value: offset.to_string(),
        })?;

    let sign = if &caps[1] == "-" { -1 } else { 1 };
    let hours: i64 = caps[2].parse().map_err(|_| SourceError::InvalidOffset {
        value: offset.to_string(),
    })?;
    let minutes: i64 = caps[3].parse().map_err(|_| SourceError::InvalidOffset {
        value: offset.to_string(),
    })?;

    if hours > 14 || minutes > 59 {
        return Err(SourceError::InvalidOffset {
            value: offset.to_string(),
        }
        .into());
    }

    Ok(Duration::minutes(sign * (hours * 60 + minutes)))
}

/// Normalize an offset string to `±HH:MM` form.
///
/// Empty and `Z` become `+00:00`; `±HHMM` gains its colon; already-normalized
/// values pass through, which makes the function idempotent. Strings outside
/// the accepted grammar are returned unchanged (and logged) rather than
/// invented.
pub fn format_timezone_offset(offset: &str) -> String {
    match parse_timezone_offset(offset) {
        Ok(duration) => {
            let total_minutes = duration.num_minutes();
            let sign = if total_minutes < 0 { '-' } else { '+' };
            let abs = total_minutes.abs();
            format!("{}{:02}:{:02}", sign, abs / 60, abs % 60)
        }
        Err(_) => {
            warn!("cannot normalize timezone offset '{offset}', keeping as-is");
            offset.to_string()
        }
    }
}

/// Convert a parsed, offset-carrying program time to UTC and apply the
/// source's configured shift.
///
/// The conversion to UTC is exact because `time` carries its own offset; the
/// `detected_offset` argument exists for logging context only. `shift_hours`
/// is then added as a plain duration.
pub fn normalize_program_time(
    time: DateTime<FixedOffset>,
    _detected_offset: &str,
    shift_hours: i32,
) -> DateTime<Utc> {
    time.with_timezone(&Utc) + Duration::hours(shift_hours as i64)
}

/// Whole-hour UTC offset of a timezone given as either an IANA name
/// (current offset, DST-aware at call time) or an offset string.
pub fn timezone_offset_hours(timezone: &str) -> AppResult<i32> {
    if let Ok(tz) = timezone.parse::<Tz>() {
        let now = Utc::now().naive_utc();
        let offset_seconds = tz.offset_from_utc_datetime(&now).fix().local_minus_utc();
        return Ok(offset_seconds / 3600);
    }

    let duration = parse_timezone_offset(timezone)?;
    Ok(duration.num_hours() as i32)
}

/// Shift compensating providers that serialize local wall clock as if it
/// were UTC: the inverse of the zone's current offset.
pub fn calculate_auto_shift(timezone: &str) -> AppResult<i32> {
    Ok(-timezone_offset_hours(timezone)?)
}
