//! Per-line relay processing.
//!
//! Every line from the feed is decoded and counted, then turned into the
//! message to publish according to the configured [`ForwardMode`].

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::decoder::{Clock, DecodeError, Decoder, SystemClock};
use crate::stats::RelayStats;

/// What the relay publishes for each line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ForwardMode {
    /// The original line, unchanged, for every framed line that decodes.
    #[default]
    Raw,
    /// The decoded envelope as JSON, for known record types only.
    Envelope,
}

/// Decodes feed lines and decides what to forward.
pub struct Relay<C: Clock = SystemClock> {
    decoder: Decoder<C>,
    stats: Arc<RelayStats>,
    mode: ForwardMode,
    verbose: bool,
}

impl<C: Clock> Relay<C> {
    pub fn new(decoder: Decoder<C>, stats: Arc<RelayStats>, mode: ForwardMode) -> Self {
        Self {
            decoder,
            stats,
            mode,
            verbose: false,
        }
    }

    /// Print each decoded record to stdout.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn mode(&self) -> ForwardMode {
        self.mode
    }

    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Process a single raw line from the feed.
    ///
    /// Returns the message to publish, or `None` if the line is dropped.
    pub fn process_line(&self, raw: &str) -> Option<String> {
        self.stats.record_line(raw);

        let envelope = match self.decoder.decode(raw) {
            Ok(envelope) => envelope,
            Err(DecodeError::MissingMarker) => {
                self.stats.record_framing_error();
                debug!("Line missing marker: {}", raw.trim_end());
                return None;
            }
            Err(e) => {
                self.stats.record_malformed();
                debug!("Decode error for '{}': {}", raw.trim_end(), e);
                return None;
            }
        };

        match envelope.payload {
            Some(ref record) => {
                self.stats.record_decoded(&envelope.tag);
                trace!("Decoded {}", record);
                if self.verbose {
                    println!("{}", envelope);
                }
            }
            None => {
                self.stats.record_unknown_tag();
                debug!("Unknown tag '{}'", envelope.tag);
            }
        }

        match self.mode {
            ForwardMode::Raw => Some(raw.to_string()),
            ForwardMode::Envelope if envelope.is_known() => match envelope.to_json() {
                Ok(json) => Some(json),
                Err(e) => {
                    warn!("Failed to serialize {} record: {}", envelope.tag, e);
                    None
                }
            },
            ForwardMode::Envelope => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::FixedClock;
    use chrono::NaiveDate;
    use std::sync::atomic::Ordering;

    fn relay(mode: ForwardMode) -> Relay<FixedClock> {
        let clock = FixedClock(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        Relay::new(
            Decoder::with_clock(clock),
            Arc::new(RelayStats::new()),
            mode,
        )
    }

    #[test]
    fn test_raw_mode_forwards_original_line() {
        let relay = relay(ForwardMode::Raw);
        let line = "$G,1,\"REG001\",25,\"00:32:10.500\"\r\n";

        assert_eq!(relay.process_line(line), Some(line.to_string()));
        assert_eq!(relay.stats().records_decoded.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_envelope_mode_forwards_json() {
        let relay = relay(ForwardMode::Envelope);
        assert_eq!(relay.mode(), ForwardMode::Envelope);
        let json = relay
            .process_line("$G,1,\"REG001\",25,\"00:32:10.500\"\n")
            .expect("Should forward");

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["tag"], "G");
        assert_eq!(value["payload"]["laps"], 25);
        assert_eq!(value["payload"]["totalTime"], "32m10.5s");
    }

    #[test]
    fn test_missing_marker_is_dropped() {
        for mode in [ForwardMode::Raw, ForwardMode::Envelope] {
            let relay = relay(mode);
            assert_eq!(relay.process_line("G,1,\"REG001\",25,\"00:32:10.500\"\n"), None);
            assert_eq!(relay.stats().framing_errors.load(Ordering::Relaxed), 1);
        }
    }

    #[test]
    fn test_malformed_line_is_dropped() {
        for mode in [ForwardMode::Raw, ForwardMode::Envelope] {
            let relay = relay(mode);
            assert_eq!(relay.process_line("$G,1\n"), None);
            assert_eq!(relay.stats().malformed_lines.load(Ordering::Relaxed), 1);
            assert_eq!(relay.stats().records_decoded.load(Ordering::Relaxed), 0);
        }
    }

    #[test]
    fn test_unknown_tag_forwarding_depends_on_mode() {
        let line = "$T,1,2,3\n";

        let raw = relay(ForwardMode::Raw);
        assert_eq!(raw.process_line(line), Some(line.to_string()));
        assert_eq!(raw.stats().unknown_tags.load(Ordering::Relaxed), 1);

        let envelope = relay(ForwardMode::Envelope);
        assert_eq!(envelope.process_line(line), None);
        assert_eq!(envelope.stats().unknown_tags.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_lines_are_counted() {
        let relay = relay(ForwardMode::Raw);
        relay.process_line("$B,5,\"Heat 1\"\n");
        relay.process_line("garbage\n");
        relay.process_line("$C,1,\"GT3\"\n");

        let summary = relay.stats().summary();
        assert_eq!(summary.lines_received, 3);
        assert_eq!(summary.records_decoded, 2);
        assert_eq!(summary.framing_errors, 1);
        assert_eq!(summary.records_by_tag.get("B"), Some(&1));
        assert_eq!(summary.records_by_tag.get("C"), Some(&1));
    }

    #[test]
    fn test_forward_mode_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            forward: ForwardMode,
        }

        let parsed: Wrapper = toml::from_str("forward = \"envelope\"").unwrap();
        assert_eq!(parsed.forward, ForwardMode::Envelope);
        assert_eq!(ForwardMode::default(), ForwardMode::Raw);
    }
}
