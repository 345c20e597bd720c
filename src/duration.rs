//! Race time parsing
//!
//! Pace and finish times arrive as `MM:SS` or `HH:MM:SS`, optionally with
//! up to six fractional-second digits. Everything is converted to minutes
//! since midnight of the parsed clock time, rounded to two decimals.
//!
//! Hour fields of 24 or more are treated as day overflow: the hour field is
//! zeroed and the whole days are carried separately. Because the result is
//! measured from midnight, the carried days never reach the minute value, so
//! `"25:10:00"` reads as `10.0`, not `70.0`. Downstream pace charts depend on
//! this, so it is kept.

use crate::{Error, Result};

/// Parsed clock components before conversion to minutes
#[derive(Debug, Clone, Copy, PartialEq)]
struct ClockTime {
    hours: u32,
    minutes: u32,
    seconds: f64,
    overflow_days: u32,
}

impl ClockTime {
    fn minutes_from_midnight(self) -> f64 {
        f64::from(self.hours) * 60.0 + f64::from(self.minutes) + self.seconds / 60.0
    }
}

/// Parse a duration string into minutes, rounded to 2 decimal places.
///
/// # Errors
///
/// Returns [`Error::ParseError`] when the text has no colon, more than two
/// colons, a non-numeric field, or a field out of clock range.
///
/// # Example
///
/// ```
/// use tally::duration::parse_minutes;
///
/// assert_eq!(parse_minutes("05:30").unwrap(), 5.5);
/// assert_eq!(parse_minutes("01:02:03").unwrap(), 62.05);
/// ```
pub fn parse_minutes(text: &str) -> Result<f64> {
    let clock = parse_clock(text)?;
    Ok(round2(clock.minutes_from_midnight()))
}

/// Day overflow carried by an `HH:MM:SS` string (hours div 24).
///
/// Returns 0 for `MM:SS` strings and for hours below 24.
///
/// # Errors
///
/// Same conditions as [`parse_minutes`].
pub fn overflow_days(text: &str) -> Result<u32> {
    Ok(parse_clock(text)?.overflow_days)
}

fn parse_clock(text: &str) -> Result<ClockTime> {
    let fields: Vec<&str> = text.split(':').collect();
    match fields.as_slice() {
        [minutes, seconds] => Ok(ClockTime {
            hours: 0,
            minutes: parse_field(text, minutes, 59)?,
            seconds: parse_seconds(text, seconds)?,
            overflow_days: 0,
        }),
        [hours, minutes, seconds] => {
            let raw_hours = parse_digits(text, hours)?;
            let (hours, overflow_days) = if raw_hours >= 24 {
                (0, raw_hours / 24)
            } else {
                (raw_hours, 0)
            };
            Ok(ClockTime {
                hours,
                minutes: parse_field(text, minutes, 59)?,
                seconds: parse_seconds(text, seconds)?,
                overflow_days,
            })
        }
        _ => Err(Error::ParseError(format!(
            "expected MM:SS or HH:MM:SS, got {text:?} ({} colons)",
            fields.len() - 1
        ))),
    }
}

fn parse_digits(text: &str, field: &str) -> Result<u32> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::ParseError(format!(
            "non-numeric field {field:?} in {text:?}"
        )));
    }
    field
        .parse()
        .map_err(|_| Error::ParseError(format!("field {field:?} out of range in {text:?}")))
}

fn parse_field(text: &str, field: &str, max: u32) -> Result<u32> {
    if field.len() > 2 {
        return Err(Error::ParseError(format!(
            "field {field:?} has more than two digits in {text:?}"
        )));
    }
    let value = parse_digits(text, field)?;
    if value > max {
        return Err(Error::ParseError(format!(
            "field {field:?} exceeds {max} in {text:?}"
        )));
    }
    Ok(value)
}

fn parse_seconds(text: &str, field: &str) -> Result<f64> {
    let (whole, fraction) = match field.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (field, None),
    };
    let whole = f64::from(parse_field(text, whole, 59)?);

    let Some(fraction) = fraction else {
        return Ok(whole);
    };
    if fraction.is_empty() || fraction.len() > 6 {
        return Err(Error::ParseError(format!(
            "fractional seconds must have 1-6 digits in {text:?}"
        )));
    }
    let micros = parse_digits(text, fraction)?;
    // Right-pad to microseconds: ".5" is 500000us
    let scale = 10u32.pow(6 - u32::try_from(fraction.len()).unwrap_or(6));
    Ok(whole + f64::from(micros * scale) / 1_000_000.0)
}

/// Round to two decimal places
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
