//! Line framing and field parsers for RMonitor timing messages.
//!
//! This module handles the text-level concerns of the feed: stripping the
//! `$` line marker, splitting the comma-delimited payload, and turning the
//! individual fields (quoted strings, integers, `HH:MM:SS[.fff]` durations
//! and time-of-day stamps) into typed values.
//!
//! # Line Format
//!
//! ```text
//! $TAG,field1,field2,...\r\n
//! ```
//!
//! Example:
//! ```text
//! $G,1,"REG001",25,"00:32:10.500"
//! ```

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use nom::{
    IResult, Parser,
    character::complete::{char, i64 as signed_int},
    combinator::all_consuming,
    number::complete::recognize_float,
};
use thiserror::Error;

use crate::record::RaceTime;

/// Marker that starts every RMonitor line.
pub const LINE_MARKER: char = '$';

/// Delimiter between fields.
pub const FIELD_DELIMITER: char = ',';

/// Errors that can occur while parsing a single field.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("Invalid integer: {0}")]
    InvalidInteger(String),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Invalid time: {0}")]
    InvalidTime(String),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Strip the line marker and trailing line-ending noise.
///
/// Returns `None` if the line does not start with `$`. Exactly one trailing
/// `\n` is removed, then any trailing `\r` characters. Nothing else is
/// validated; an empty payload is passed through.
///
/// # Example
///
/// ```
/// use rmonitor_relay::parser::normalize_line;
///
/// assert_eq!(normalize_line("$F,1\r\n"), Some("F,1"));
/// assert_eq!(normalize_line("F,1\r\n"), None);
/// ```
pub fn normalize_line(raw: &str) -> Option<&str> {
    let line = raw.strip_prefix(LINE_MARKER)?;
    let line = line.strip_suffix('\n').unwrap_or(line);
    Some(line.trim_end_matches('\r'))
}

/// Split a normalized line into its fields.
///
/// Empty fields are preserved; quoted delimiters are not supported.
pub fn tokenize(line: &str) -> Vec<&str> {
    line.split(FIELD_DELIMITER).collect()
}

/// Remove one leading and one trailing double quote, if present.
#[inline]
pub fn unquote(field: &str) -> &str {
    let field = field.strip_suffix('"').unwrap_or(field);
    field.strip_prefix('"').unwrap_or(field)
}

/// Parse a decimal integer field.
pub fn parse_int(field: &str) -> ParseResult<i64> {
    let text = unquote(field);
    text.parse()
        .map_err(|_| ParseError::InvalidInteger(text.to_string()))
}

/// Split `H:M:S` into its integer hours, integer minutes and float seconds text.
fn duration_components(input: &str) -> IResult<&str, (i64, i64, &str)> {
    let (input, (hours, _, minutes, _, seconds)) =
        (signed_int, char(':'), signed_int, char(':'), recognize_float).parse(input)?;
    Ok((input, (hours, minutes, seconds)))
}

/// Parse a `HH:MM:SS` or `HH:MM:SS.fff` duration field.
///
/// Hours and minutes must be integers; seconds may be fractional. Sub-second
/// precision is kept to the nearest nanosecond.
///
/// # Example
///
/// ```
/// use rmonitor_relay::parser::parse_duration;
///
/// let time = parse_duration("\"00:32:10.500\"").unwrap();
/// assert_eq!(time.to_string(), "32m10.5s");
/// ```
pub fn parse_duration(field: &str) -> ParseResult<RaceTime> {
    let text = unquote(field);
    let invalid = || ParseError::InvalidDuration(text.to_string());

    let (_, (hours, minutes, seconds)) =
        all_consuming(duration_components).parse(text).map_err(|_| invalid())?;
    let seconds: f64 = seconds.parse().map_err(|_| invalid())?;
    if !seconds.is_finite() {
        return Err(invalid());
    }

    let nanos = hours
        .checked_mul(3_600_000_000_000)
        .and_then(|h| minutes.checked_mul(60_000_000_000).and_then(|m| h.checked_add(m)))
        .and_then(|hm| hm.checked_add((seconds * 1e9).round() as i64))
        .ok_or_else(invalid)?;

    Ok(RaceTime::from_nanos(nanos))
}

/// Parse a bare `HH:MM:SS` time of day and place it on `date`.
///
/// A fractional seconds suffix is accepted.
pub fn parse_time_of_day(field: &str, date: NaiveDate) -> ParseResult<NaiveDateTime> {
    let text = unquote(field);
    NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
        .map(|time| date.and_time(time))
        .map_err(|_| ParseError::InvalidTime(text.to_string()))
}
