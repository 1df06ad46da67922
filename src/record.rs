//! Data structures representing decoded RMonitor records.
//!
//! Each line of the timing feed decodes into one of eleven record types,
//! wrapped in an [`Envelope`] that keeps the type tag alongside the payload.

use chrono::{NaiveDateTime, TimeDelta};
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, digit0},
    combinator::{opt, value},
    multi::many1,
    sequence::preceded,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::parser::ParseError;

/// Type tags of the RMonitor record types.
pub mod tags {
    pub const HEARTBEAT: &str = "F";
    pub const COMPETITOR_INFO: &str = "A";
    pub const COMP_INFO: &str = "COMP";
    pub const RUN_INFO: &str = "B";
    pub const CLASS_INFO: &str = "C";
    pub const SETTING_INFO: &str = "E";
    pub const RACE_INFO: &str = "G";
    pub const PRACTICE_QUALIFY_INFO: &str = "H";
    pub const INIT_RECORD: &str = "I";
    pub const PASSING_INFO: &str = "J";
    pub const CORRECTED_FINISH: &str = "COR";

    /// Every tag the default decoder understands.
    pub const ALL: [&str; 11] = [
        HEARTBEAT,
        COMPETITOR_INFO,
        COMP_INFO,
        RUN_INFO,
        CLASS_INFO,
        SETTING_INFO,
        RACE_INFO,
        PRACTICE_QUALIFY_INFO,
        INIT_RECORD,
        PASSING_INFO,
        CORRECTED_FINISH,
    ];
}

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// An elapsed race time with nanosecond resolution.
///
/// Displays in a compact canonical form such as `1h2m3.25s`, `32m10.5s`,
/// `500ms` or `0s`, and parses that same form back. Serializes as that text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RaceTime(i64);

impl RaceTime {
    /// The zero duration, substituted for unparseable duration fields.
    pub const ZERO: RaceTime = RaceTime(0);

    /// Create a race time from a signed nanosecond count.
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// The race time as a signed nanosecond count.
    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// The race time in (fractional) seconds.
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    /// Convert to a chrono time delta.
    pub fn to_time_delta(self) -> TimeDelta {
        TimeDelta::nanoseconds(self.0)
    }
}

/// Write `value / 10^prec` followed by its fractional part, without trailing zeros.
fn write_scaled(f: &mut fmt::Formatter<'_>, value: u64, prec: u32) -> fmt::Result {
    let scale = 10u64.pow(prec);
    write!(f, "{}", value / scale)?;
    write_fraction(f, value % scale, prec)
}

fn write_fraction(f: &mut fmt::Formatter<'_>, frac: u64, prec: u32) -> fmt::Result {
    if frac == 0 {
        return Ok(());
    }
    let digits = format!("{:0width$}", frac, width = prec as usize);
    write!(f, ".{}", digits.trim_end_matches('0'))
}

impl fmt::Display for RaceTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.0.unsigned_abs();
        if self.0 < 0 {
            f.write_str("-")?;
        }

        if nanos < NANOS_PER_SEC {
            let (prec, unit) = match nanos {
                0 => return f.write_str("0s"),
                1..1_000 => (0, "ns"),
                1_000..1_000_000 => (3, "µs"),
                _ => (6, "ms"),
            };
            write_scaled(f, nanos, prec)?;
            return f.write_str(unit);
        }

        let secs = nanos / NANOS_PER_SEC;
        let minutes = secs / 60;
        let hours = minutes / 60;
        if hours > 0 {
            write!(f, "{}h", hours)?;
        }
        if minutes > 0 {
            write!(f, "{}m", minutes % 60)?;
        }
        write!(f, "{}", secs % 60)?;
        write_fraction(f, nanos % NANOS_PER_SEC, 9)?;
        f.write_str("s")
    }
}

/// Parse one `<decimal><unit>` component of a canonical race time.
fn parse_component(input: &str) -> IResult<&str, (&str, Option<&str>, u64)> {
    (
        digit0,
        opt(preceded(char('.'), digit0)),
        alt((
            value(1u64, tag("ns")),
            value(1_000, alt((tag("us"), tag("µs"), tag("μs")))),
            value(1_000_000, tag("ms")),
            value(NANOS_PER_SEC, tag("s")),
            value(60 * NANOS_PER_SEC, tag("m")),
            value(3600 * NANOS_PER_SEC, tag("h")),
        )),
    )
        .parse(input)
}

fn parse_canonical(s: &str) -> Option<i64> {
    let (negative, body) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    if body == "0" {
        return Some(0);
    }

    let (rest, components) = many1(parse_component).parse(body).ok()?;
    if !rest.is_empty() {
        return None;
    }

    let mut total: u64 = 0;
    for (whole, frac, unit) in components {
        let frac = frac.unwrap_or("");
        if whole.is_empty() && frac.is_empty() {
            return None;
        }
        let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        let mut nanos = whole.checked_mul(unit)?;
        if !frac.is_empty() {
            let scale = 10u128.checked_pow(frac.len() as u32)?;
            let digits: u128 = frac.parse().ok()?;
            let scaled = digits.checked_mul(unit as u128)? / scale;
            nanos = nanos.checked_add(u64::try_from(scaled).ok()?)?;
        }
        total = total.checked_add(nanos)?;
    }

    let total = i64::try_from(total).ok()?;
    Some(if negative { -total } else { total })
}

impl FromStr for RaceTime {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_canonical(s)
            .map(RaceTime)
            .ok_or_else(|| ParseError::InvalidDuration(s.to_string()))
    }
}

impl Serialize for RaceTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RaceTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// `$F` - periodic heartbeat with the overall race state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub laps_to_go: i64,
    pub time_to_go: RaceTime,
    pub time_of_day: NaiveDateTime,
    pub race_time: RaceTime,
    pub flag_status: String,
}

/// `$A` - competitor registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitorInfo {
    pub registration_number: String,
    pub number: String,
    pub transponder_number: i64,
    pub first_name: String,
    pub last_name: String,
    pub nationality: String,
    pub class_number: i64,
}

/// `$COMP` - competitor registration without transponder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompInfo {
    pub registration_number: String,
    pub number: String,
    pub class_number: i64,
    pub first_name: String,
    pub last_name: String,
    pub nationality: String,
}

/// `$B` - run (session) information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInfo {
    pub unique_number: i64,
    pub description: String,
}

/// `$C` - class information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub unique_number: i64,
    pub description: String,
}

/// `$E` - a named setting such as track name or length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingInfo {
    pub description: String,
    pub value: String,
}

/// `$G` - race position of one competitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceInfo {
    pub position: i64,
    pub registration_number: String,
    pub laps: i64,
    pub total_time: RaceTime,
}

/// `$H` - practice or qualifying position of one competitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeQualifyInfo {
    pub position: i64,
    pub registration_number: String,
    pub best_lap: i64,
    pub best_lap_time: RaceTime,
}

/// `$I` - init record, sent when the scoreboard should be reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRecord {
    pub time_of_day: NaiveDateTime,
    pub date: NaiveDateTime,
}

/// `$J` - a passing over the timing line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassingInfo {
    pub registration_number: String,
    pub lap_time: RaceTime,
    pub total_time: RaceTime,
}

/// `$COR` - corrected finish time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectedFinish {
    pub registration_number: String,
    pub number: String,
    pub laps: i64,
    pub total_time: RaceTime,
    pub correction_time: RaceTime,
}

/// A decoded record, one variant per supported type tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Heartbeat(Heartbeat),
    CompetitorInfo(CompetitorInfo),
    CompInfo(CompInfo),
    RunInfo(RunInfo),
    ClassInfo(ClassInfo),
    SettingInfo(SettingInfo),
    RaceInfo(RaceInfo),
    PracticeQualifyInfo(PracticeQualifyInfo),
    InitRecord(InitRecord),
    PassingInfo(PassingInfo),
    CorrectedFinish(CorrectedFinish),
}

impl Record {
    /// The type tag this record is decoded from.
    pub fn tag(&self) -> &'static str {
        match self {
            Record::Heartbeat(_) => tags::HEARTBEAT,
            Record::CompetitorInfo(_) => tags::COMPETITOR_INFO,
            Record::CompInfo(_) => tags::COMP_INFO,
            Record::RunInfo(_) => tags::RUN_INFO,
            Record::ClassInfo(_) => tags::CLASS_INFO,
            Record::SettingInfo(_) => tags::SETTING_INFO,
            Record::RaceInfo(_) => tags::RACE_INFO,
            Record::PracticeQualifyInfo(_) => tags::PRACTICE_QUALIFY_INFO,
            Record::InitRecord(_) => tags::INIT_RECORD,
            Record::PassingInfo(_) => tags::PASSING_INFO,
            Record::CorrectedFinish(_) => tags::CORRECTED_FINISH,
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Heartbeat(r) => write!(
                f,
                "heartbeat laps_to_go={} time_to_go={} tod={} race_time={} flag={}",
                r.laps_to_go,
                r.time_to_go,
                r.time_of_day.format("%H:%M:%S"),
                r.race_time,
                r.flag_status
            ),
            Record::CompetitorInfo(r) => write!(
                f,
                "competitor reg={} #{} transponder={} {} {} ({}) class={}",
                r.registration_number,
                r.number,
                r.transponder_number,
                r.first_name,
                r.last_name,
                r.nationality,
                r.class_number
            ),
            Record::CompInfo(r) => write!(
                f,
                "competitor reg={} #{} {} {} ({}) class={}",
                r.registration_number,
                r.number,
                r.first_name,
                r.last_name,
                r.nationality,
                r.class_number
            ),
            Record::RunInfo(r) => write!(f, "run {}: {}", r.unique_number, r.description),
            Record::ClassInfo(r) => write!(f, "class {}: {}", r.unique_number, r.description),
            Record::SettingInfo(r) => write!(f, "setting {}={}", r.description, r.value),
            Record::RaceInfo(r) => write!(
                f,
                "race P{} reg={} laps={} total={}",
                r.position, r.registration_number, r.laps, r.total_time
            ),
            Record::PracticeQualifyInfo(r) => write!(
                f,
                "qualify P{} reg={} best_lap={} best={}",
                r.position, r.registration_number, r.best_lap, r.best_lap_time
            ),
            Record::InitRecord(r) => write!(
                f,
                "init tod={} date={}",
                r.time_of_day.format("%H:%M:%S"),
                r.date.format("%Y-%m-%d")
            ),
            Record::PassingInfo(r) => write!(
                f,
                "passing reg={} lap={} total={}",
                r.registration_number, r.lap_time, r.total_time
            ),
            Record::CorrectedFinish(r) => write!(
                f,
                "corrected reg={} #{} laps={} total={} correction={}",
                r.registration_number, r.number, r.laps, r.total_time, r.correction_time
            ),
        }
    }
}

/// A decoded line: its type tag plus the record, if the tag is known.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub tag: String,
    pub payload: Option<Record>,
}

impl Envelope {
    /// Returns true if the line carried a recognised tag.
    pub fn is_known(&self) -> bool {
        self.payload.is_some()
    }

    /// Serialize the envelope as a JSON object.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.payload {
            Some(ref record) => write!(f, "{}", record),
            None => write!(f, "unknown record {:?}", self.tag),
        }
    }
}
