//! Tag-dispatched decoding of RMonitor lines into typed records.
//!
//! The decoder tokenizes a normalized line, looks the leading type tag up in
//! a registry of record schemas and runs the matching field mapper. Field
//! level parse failures never fail a line: each bad field is replaced by its
//! zero value. Only a missing line marker or a line with fewer fields than
//! its schema needs is reported as an error.

use chrono::{Local, NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::fmt::Debug;
use thiserror::Error;
use tracing::trace;

use crate::parser::{self, ParseResult};
use crate::record::{
    ClassInfo, CompInfo, CompetitorInfo, CorrectedFinish, Envelope, Heartbeat, InitRecord,
    PassingInfo, PracticeQualifyInfo, RaceInfo, RaceTime, Record, RunInfo, SettingInfo, tags,
};

/// Errors that fail a whole line.
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("Line missing '$' marker")]
    MissingMarker,

    #[error("Malformed {tag} record: expected at least {expected} fields, found {found}")]
    Malformed {
        tag: String,
        expected: usize,
        found: usize,
    },
}

/// Source of the calendar date used to complete time-of-day fields.
pub trait Clock: Send + Sync + Debug {
    fn today(&self) -> NaiveDate;
}

/// Clock reading the local system date.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Clock pinned to a fixed date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// Positional view of a tokenized line handed to field mappers.
///
/// Every accessor is lenient: a field that is missing or fails to parse
/// yields its zero value.
#[derive(Debug)]
pub struct Fields<'a> {
    tokens: &'a [&'a str],
    today: NaiveDate,
}

impl<'a> Fields<'a> {
    pub fn new(tokens: &'a [&'a str], today: NaiveDate) -> Self {
        Self { tokens, today }
    }

    fn raw(&self, index: usize) -> &'a str {
        self.tokens.get(index).copied().unwrap_or_default()
    }

    /// Number of tokens, including the tag.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// An unquoted string field.
    pub fn text(&self, index: usize) -> String {
        parser::unquote(self.raw(index)).to_string()
    }

    /// An integer field, or 0.
    pub fn int(&self, index: usize) -> i64 {
        lenient(index, parser::parse_int(self.raw(index))).0
    }

    /// A `HH:MM:SS[.fff]` duration field, or zero.
    pub fn duration(&self, index: usize) -> RaceTime {
        lenient(index, parser::parse_duration(self.raw(index))).0
    }

    /// A time-of-day field on the current date, or the Unix epoch.
    pub fn timestamp(&self, index: usize) -> NaiveDateTime {
        lenient(index, parser::parse_time_of_day(self.raw(index), self.today)).0
    }
}

/// Collapse a field parse result into `(value, valid)`, substituting the
/// zero value on failure.
fn lenient<T: Default>(index: usize, result: ParseResult<T>) -> (T, bool) {
    match result {
        Ok(value) => (value, true),
        Err(e) => {
            trace!("Field {} defaulted: {}", index, e);
            (T::default(), false)
        }
    }
}

/// Maps the fields of one line onto a record.
pub type FieldMapper = fn(&Fields<'_>) -> Record;

/// A registered record type: how many tokens it needs and how to map them.
#[derive(Debug, Clone, Copy)]
pub struct RecordSchema {
    /// Minimum token count, tag included.
    pub arity: usize,
    pub mapper: FieldMapper,
}

fn map_heartbeat(f: &Fields<'_>) -> Record {
    Record::Heartbeat(Heartbeat {
        laps_to_go: f.int(1),
        time_to_go: f.duration(2),
        time_of_day: f.timestamp(3),
        race_time: f.duration(4),
        flag_status: f.text(5),
    })
}

fn map_competitor_info(f: &Fields<'_>) -> Record {
    Record::CompetitorInfo(CompetitorInfo {
        registration_number: f.text(1),
        number: f.text(2),
        transponder_number: f.int(3),
        first_name: f.text(4),
        last_name: f.text(5),
        nationality: f.text(6),
        class_number: f.int(7),
    })
}

fn map_comp_info(f: &Fields<'_>) -> Record {
    Record::CompInfo(CompInfo {
        registration_number: f.text(1),
        number: f.text(2),
        class_number: f.int(3),
        first_name: f.text(4),
        last_name: f.text(5),
        nationality: f.text(6),
    })
}

fn map_run_info(f: &Fields<'_>) -> Record {
    Record::RunInfo(RunInfo {
        unique_number: f.int(1),
        description: f.text(2),
    })
}

fn map_class_info(f: &Fields<'_>) -> Record {
    Record::ClassInfo(ClassInfo {
        unique_number: f.int(1),
        description: f.text(2),
    })
}

fn map_setting_info(f: &Fields<'_>) -> Record {
    Record::SettingInfo(SettingInfo {
        description: f.text(1),
        value: f.text(2),
    })
}

fn map_race_info(f: &Fields<'_>) -> Record {
    Record::RaceInfo(RaceInfo {
        position: f.int(1),
        registration_number: f.text(2),
        laps: f.int(3),
        total_time: f.duration(4),
    })
}

fn map_practice_qualify_info(f: &Fields<'_>) -> Record {
    Record::PracticeQualifyInfo(PracticeQualifyInfo {
        position: f.int(1),
        registration_number: f.text(2),
        best_lap: f.int(3),
        best_lap_time: f.duration(4),
    })
}

fn map_init_record(f: &Fields<'_>) -> Record {
    Record::InitRecord(InitRecord {
        time_of_day: f.timestamp(1),
        date: f.timestamp(2),
    })
}

fn map_passing_info(f: &Fields<'_>) -> Record {
    Record::PassingInfo(PassingInfo {
        registration_number: f.text(1),
        lap_time: f.duration(2),
        total_time: f.duration(3),
    })
}

fn map_corrected_finish(f: &Fields<'_>) -> Record {
    Record::CorrectedFinish(CorrectedFinish {
        registration_number: f.text(1),
        number: f.text(2),
        laps: f.int(3),
        total_time: f.duration(4),
        correction_time: f.duration(5),
    })
}

/// Schemas for the eleven standard record types.
const DEFAULT_SCHEMAS: [(&str, RecordSchema); 11] = [
    (tags::HEARTBEAT, RecordSchema { arity: 6, mapper: map_heartbeat }),
    (tags::COMPETITOR_INFO, RecordSchema { arity: 8, mapper: map_competitor_info }),
    (tags::COMP_INFO, RecordSchema { arity: 7, mapper: map_comp_info }),
    (tags::RUN_INFO, RecordSchema { arity: 3, mapper: map_run_info }),
    (tags::CLASS_INFO, RecordSchema { arity: 3, mapper: map_class_info }),
    (tags::SETTING_INFO, RecordSchema { arity: 3, mapper: map_setting_info }),
    (tags::RACE_INFO, RecordSchema { arity: 5, mapper: map_race_info }),
    (
        tags::PRACTICE_QUALIFY_INFO,
        RecordSchema { arity: 5, mapper: map_practice_qualify_info },
    ),
    (tags::INIT_RECORD, RecordSchema { arity: 3, mapper: map_init_record }),
    (tags::PASSING_INFO, RecordSchema { arity: 4, mapper: map_passing_info }),
    (tags::CORRECTED_FINISH, RecordSchema { arity: 6, mapper: map_corrected_finish }),
];

/// Stateless line decoder.
///
/// Holds only the schema registry and the clock; decoding takes `&self` and
/// is safe to share across threads.
///
/// # Example
///
/// ```
/// use chrono::NaiveDate;
/// use rmonitor_relay::decoder::{Decoder, FixedClock};
/// use rmonitor_relay::record::Record;
///
/// let decoder = Decoder::with_clock(FixedClock(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()));
/// let envelope = decoder.decode("$G,1,\"REG001\",25,\"00:32:10.500\"\n").unwrap();
/// match envelope.payload {
///     Some(Record::RaceInfo(info)) => assert_eq!(info.total_time.to_string(), "32m10.5s"),
///     other => panic!("unexpected payload: {:?}", other),
/// }
/// ```
#[derive(Debug)]
pub struct Decoder<C: Clock = SystemClock> {
    clock: C,
    registry: HashMap<&'static str, RecordSchema>,
}

impl Decoder<SystemClock> {
    /// Create a decoder for the standard record types using the system date.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for Decoder<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Decoder<C> {
    /// Create a decoder for the standard record types using `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            registry: DEFAULT_SCHEMAS.into_iter().collect(),
        }
    }

    /// Register (or replace) the schema for a tag.
    pub fn register(&mut self, tag: &'static str, arity: usize, mapper: FieldMapper) {
        self.registry.insert(tag, RecordSchema { arity, mapper });
    }

    /// Whether `tag` has a registered schema.
    pub fn supports(&self, tag: &str) -> bool {
        self.registry.contains_key(tag)
    }

    /// Decode a raw line, marker and line ending included.
    pub fn decode(&self, raw: &str) -> Result<Envelope, DecodeError> {
        let line = parser::normalize_line(raw).ok_or(DecodeError::MissingMarker)?;
        self.decode_normalized(line, self.clock.today())
    }

    /// Decode a line that has already been through [`parser::normalize_line`],
    /// completing time-of-day fields with `today`.
    pub fn decode_normalized(&self, line: &str, today: NaiveDate) -> Result<Envelope, DecodeError> {
        let tokens = parser::tokenize(line);
        let tag = tokens[0];

        let Some(schema) = self.registry.get(tag) else {
            return Ok(Envelope {
                tag: tag.to_string(),
                payload: None,
            });
        };

        if tokens.len() < schema.arity {
            return Err(DecodeError::Malformed {
                tag: tag.to_string(),
                expected: schema.arity,
                found: tokens.len(),
            });
        }

        let record = (schema.mapper)(&Fields::new(&tokens, today));
        Ok(Envelope {
            tag: tag.to_string(),
            payload: Some(record),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    fn decoder() -> Decoder<FixedClock> {
        Decoder::with_clock(FixedClock(today()))
    }

    fn decode_record(line: &str) -> Record {
        decoder()
            .decode(line)
            .expect("Should decode")
            .payload
            .expect("Should have a payload")
    }

    #[test]
    fn test_decode_race_info() {
        let record = decode_record("$G,1,\"REG001\",25,\"00:32:10.500\"\n");
        let Record::RaceInfo(info) = record else {
            panic!("Expected RaceInfo, got {:?}", record);
        };
        assert_eq!(info.position, 1);
        assert_eq!(info.registration_number, "REG001");
        assert_eq!(info.laps, 25);
        assert_eq!(info.total_time.to_string(), "32m10.5s");
    }

    #[test]
    fn test_decode_heartbeat_with_bad_laps() {
        let record =
            decode_record("$F,abc,\"00:01:30\",\"14:05:00\",\"01:02:03.250\",\"GREEN\"\n");
        let Record::Heartbeat(hb) = record else {
            panic!("Expected Heartbeat, got {:?}", record);
        };
        assert_eq!(hb.laps_to_go, 0);
        assert_eq!(hb.time_to_go.to_string(), "1m30s");
        assert_eq!(hb.time_of_day, today().and_hms_opt(14, 5, 0).unwrap());
        assert_eq!(hb.race_time.to_string(), "1h2m3.25s");
        assert_eq!(hb.flag_status, "GREEN");
    }

    #[test]
    fn test_decode_heartbeat_well_formed() {
        let record = decode_record("$F,14,\"00:12:45\",\"13:34:23\",\"00:09:47\",\"Green \"\r\n");
        assert_eq!(
            record,
            Record::Heartbeat(Heartbeat {
                laps_to_go: 14,
                time_to_go: RaceTime::from_nanos(765_000_000_000),
                time_of_day: today().and_hms_opt(13, 34, 23).unwrap(),
                race_time: RaceTime::from_nanos(587_000_000_000),
                flag_status: "Green ".to_string(),
            })
        );
    }

    #[test]
    fn test_quoted_and_unquoted_competitor_match() {
        let quoted = decode_record("$A,\"12\",\"44X\",\"5\",\"John\",\"Doe\",\"USA\",\"3\"\n");
        let bare = decode_record("$A,12,44X,5,John,Doe,USA,3\n");
        assert_eq!(quoted, bare);
        assert_eq!(
            quoted,
            Record::CompetitorInfo(CompetitorInfo {
                registration_number: "12".to_string(),
                number: "44X".to_string(),
                transponder_number: 5,
                first_name: "John".to_string(),
                last_name: "Doe".to_string(),
                nationality: "USA".to_string(),
                class_number: 3,
            })
        );
    }

    #[test]
    fn test_decode_transponder_beyond_32_bits() {
        let record = decode_record("$A,\"12\",\"44X\",3000000000,\"John\",\"Doe\",\"USA\",3\n");
        let Record::CompetitorInfo(info) = record else {
            panic!("Expected CompetitorInfo, got {:?}", record);
        };
        assert_eq!(info.transponder_number, 3_000_000_000);
        assert_eq!(info.class_number, 3);
    }

    #[test]
    fn test_decode_comp_info() {
        let record = decode_record("$COMP,\"1234BE\",\"12X\",5,\"John\",\"Johnson\",\"USA\"\n");
        assert_eq!(
            record,
            Record::CompInfo(CompInfo {
                registration_number: "1234BE".to_string(),
                number: "12X".to_string(),
                class_number: 5,
                first_name: "John".to_string(),
                last_name: "Johnson".to_string(),
                nationality: "USA".to_string(),
            })
        );
    }

    #[test]
    fn test_decode_run_class_and_setting() {
        assert_eq!(
            decode_record("$B,5,\"Friday free practice\"\n"),
            Record::RunInfo(RunInfo {
                unique_number: 5,
                description: "Friday free practice".to_string(),
            })
        );
        assert_eq!(
            decode_record("$C,5,\"Formula 300\"\n"),
            Record::ClassInfo(ClassInfo {
                unique_number: 5,
                description: "Formula 300".to_string(),
            })
        );
        assert_eq!(
            decode_record("$E,\"TRACKNAME\",\"Indianapolis Motor Speedway\"\n"),
            Record::SettingInfo(SettingInfo {
                description: "TRACKNAME".to_string(),
                value: "Indianapolis Motor Speedway".to_string(),
            })
        );
    }

    #[test]
    fn test_decode_practice_qualify_info() {
        let record = decode_record("$H,2,\"1234BE\",3,\"00:02:17.872\"\n");
        let Record::PracticeQualifyInfo(info) = record else {
            panic!("Expected PracticeQualifyInfo, got {:?}", record);
        };
        assert_eq!(info.position, 2);
        assert_eq!(info.best_lap, 3);
        assert_eq!(info.best_lap_time.to_string(), "2m17.872s");
    }

    #[test]
    fn test_decode_init_record() {
        let record = decode_record("$I,\"16:36:08.000\",\"12 jan 01\"\n");
        let Record::InitRecord(init) = record else {
            panic!("Expected InitRecord, got {:?}", record);
        };
        assert_eq!(init.time_of_day, today().and_hms_opt(16, 36, 8).unwrap());
        // The date field only decodes when it carries a time of day.
        assert_eq!(init.date, NaiveDateTime::default());
    }

    #[test]
    fn test_decode_passing_and_corrected_finish() {
        assert_eq!(
            decode_record("$J,\"1234BE\",\"00:02:03.826\",\"01:42:17.672\"\n"),
            Record::PassingInfo(PassingInfo {
                registration_number: "1234BE".to_string(),
                lap_time: "2m3.826s".parse().unwrap(),
                total_time: "1h42m17.672s".parse().unwrap(),
            })
        );
        assert_eq!(
            decode_record("$COR,\"123BE\",\"658\",2,\"00:00:35.272\",\"+00:00:00.012\"\n"),
            Record::CorrectedFinish(CorrectedFinish {
                registration_number: "123BE".to_string(),
                number: "658".to_string(),
                laps: 2,
                total_time: "35.272s".parse().unwrap(),
                correction_time: "12ms".parse().unwrap(),
            })
        );
    }

    #[test]
    fn test_bad_numeric_field_is_isolated() {
        let good = decode_record("$G,3,\"REG7\",12,\"00:20:00\"\n");
        let bad = decode_record("$G,x,\"REG7\",12,\"00:20:00\"\n");
        let (Record::RaceInfo(good), Record::RaceInfo(bad)) = (good, bad) else {
            panic!("Expected RaceInfo records");
        };
        assert_eq!(bad.position, 0);
        assert_eq!(bad.registration_number, good.registration_number);
        assert_eq!(bad.laps, good.laps);
        assert_eq!(bad.total_time, good.total_time);
    }

    /// Well-formed lines with, per numeric field, its token index, JSON key
    /// and whether it is an integer (otherwise a duration).
    const NUMERIC_FIELDS: &[(&str, usize, &str, bool)] = &[
        ("$F,14,\"00:12:45\",\"13:34:23\",\"00:09:47\",\"Green\"", 1, "lapsToGo", true),
        ("$F,14,\"00:12:45\",\"13:34:23\",\"00:09:47\",\"Green\"", 2, "timeToGo", false),
        ("$F,14,\"00:12:45\",\"13:34:23\",\"00:09:47\",\"Green\"", 4, "raceTime", false),
        ("$A,\"12\",\"44X\",52474,\"John\",\"Doe\",\"USA\",3", 3, "transponderNumber", true),
        ("$A,\"12\",\"44X\",52474,\"John\",\"Doe\",\"USA\",3", 7, "classNumber", true),
        ("$COMP,\"1234BE\",\"12X\",5,\"John\",\"Johnson\",\"USA\"", 3, "classNumber", true),
        ("$B,5,\"Heat 1\"", 1, "uniqueNumber", true),
        ("$C,5,\"GT3\"", 1, "uniqueNumber", true),
        ("$G,3,\"1234BE\",14,\"01:12:47.872\"", 1, "position", true),
        ("$G,3,\"1234BE\",14,\"01:12:47.872\"", 3, "laps", true),
        ("$G,3,\"1234BE\",14,\"01:12:47.872\"", 4, "totalTime", false),
        ("$H,2,\"1234BE\",3,\"00:02:17.872\"", 1, "position", true),
        ("$H,2,\"1234BE\",3,\"00:02:17.872\"", 3, "bestLap", true),
        ("$H,2,\"1234BE\",3,\"00:02:17.872\"", 4, "bestLapTime", false),
        ("$J,\"1234BE\",\"00:02:03.826\",\"01:42:17.672\"", 2, "lapTime", false),
        ("$J,\"1234BE\",\"00:02:03.826\",\"01:42:17.672\"", 3, "totalTime", false),
        ("$COR,\"123BE\",\"658\",2,\"00:00:35.272\",\"+00:00:00.012\"", 3, "laps", true),
        ("$COR,\"123BE\",\"658\",2,\"00:00:35.272\",\"+00:00:00.012\"", 4, "totalTime", false),
        ("$COR,\"123BE\",\"658\",2,\"00:00:35.272\",\"+00:00:00.012\"", 5, "correctionTime", false),
    ];

    fn with_field(line: &str, index: usize, token: &str) -> String {
        let mut tokens: Vec<&str> = line.split(',').collect();
        tokens[index] = token;
        tokens.join(",")
    }

    fn assert_field_isolated(line: &str, index: usize, key: &str, is_int: bool, token: &str) {
        let good = serde_json::to_value(decode_record(line)).unwrap();
        let bad = serde_json::to_value(decode_record(&with_field(line, index, token))).unwrap();

        let zero = if is_int { json!(0) } else { json!("0s") };
        assert_ne!(good[key], zero, "{} fixture should be non-zero", key);
        assert_eq!(bad[key], zero, "{} in {}", key, line);

        let mut expected = good;
        expected[key] = zero;
        assert_eq!(bad, expected, "other fields changed for {} in {}", key, line);
    }

    #[test]
    fn test_every_numeric_field_is_isolated() {
        for &(line, index, key, is_int) in NUMERIC_FIELDS {
            assert_field_isolated(line, index, key, is_int, "\"x\"");
        }
    }

    proptest! {
        #[test]
        fn prop_non_numeric_field_is_isolated(token in "\"?[a-zA-Z ]{1,12}\"?") {
            for &(line, index, key, is_int) in NUMERIC_FIELDS {
                assert_field_isolated(line, index, key, is_int, &token);
            }
        }
    }

    #[test]
    fn test_bad_duration_defaults_to_zero() {
        let record = decode_record("$J,\"1234BE\",\"garbage\",\"01:42:17.672\"\n");
        let Record::PassingInfo(info) = record else {
            panic!("Expected PassingInfo, got {:?}", record);
        };
        assert_eq!(info.lap_time, RaceTime::ZERO);
        assert_eq!(info.lap_time.to_string(), "0s");
        assert_eq!(info.total_time.to_string(), "1h42m17.672s");
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let record = decode_record("$B,5,\"Heat\",\"extra\",\"more\"\n");
        assert_eq!(
            record,
            Record::RunInfo(RunInfo {
                unique_number: 5,
                description: "Heat".to_string(),
            })
        );
    }

    #[test]
    fn test_missing_marker() {
        assert_eq!(
            decoder().decode("G,1,\"REG001\",25,\"00:32:10.500\"\n"),
            Err(DecodeError::MissingMarker)
        );
    }

    #[test]
    fn test_unknown_tag_has_no_payload() {
        let envelope = decoder().decode("$T,1,2,3\n").unwrap();
        assert_eq!(envelope.tag, "T");
        assert!(envelope.payload.is_none());

        let envelope = decoder().decode("$\n").unwrap();
        assert_eq!(envelope.tag, "");
        assert!(envelope.payload.is_none());
    }

    #[test]
    fn test_too_few_fields_is_malformed() {
        assert_eq!(
            decoder().decode("$G,1,\"REG001\"\n"),
            Err(DecodeError::Malformed {
                tag: "G".to_string(),
                expected: 5,
                found: 3,
            })
        );
        assert!(decoder().decode("$F\n").is_err());
        assert!(decoder().decode("$COR,a,b,1,00:00:01\n").is_err());
    }

    #[test]
    fn test_every_standard_tag_is_supported() {
        let decoder = decoder();
        for tag in tags::ALL {
            assert!(decoder.supports(tag), "missing schema for {}", tag);
        }
        assert!(!decoder.supports("T"));
    }

    #[test]
    fn test_register_custom_schema() {
        fn map_lap_count(f: &Fields<'_>) -> Record {
            Record::RunInfo(RunInfo {
                unique_number: f.int(2),
                description: f.text(1),
            })
        }

        let mut decoder = decoder();
        decoder.register("L", 3, map_lap_count);
        let envelope = decoder.decode("$L,\"Laps\",42\n").unwrap();
        assert_eq!(envelope.tag, "L");
        assert_eq!(
            envelope.payload,
            Some(Record::RunInfo(RunInfo {
                unique_number: 42,
                description: "Laps".to_string(),
            }))
        );
    }

    #[test]
    fn test_fields_out_of_range_are_zero() {
        let tokens = ["G"];
        let fields = Fields::new(&tokens, today());
        assert_eq!(fields.len(), 1);
        assert!(!fields.is_empty());
        assert_eq!(fields.int(4), 0);
        assert_eq!(fields.text(4), "");
        assert_eq!(fields.duration(4), RaceTime::ZERO);
        assert_eq!(fields.timestamp(4), NaiveDateTime::default());
    }

    #[test]
    fn test_lenient_reports_validity() {
        assert_eq!(lenient(1, parser::parse_int("7")), (7, true));
        assert_eq!(lenient(1, parser::parse_int("x")), (0, false));
    }
}
