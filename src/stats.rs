//! Statistics tracking for the relay.
//!
//! Counts lines by outcome (decoded, framing error, malformed, unknown
//! tag), decoded records by tag, forwarding results, and the distribution
//! of raw line sizes.

use hdrhistogram::Histogram;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Thread-safe statistics collector for the relay.
#[derive(Debug)]
pub struct RelayStats {
    /// Total number of lines received from the feed
    pub lines_received: AtomicU64,

    /// Lines decoded into a known record
    pub records_decoded: AtomicU64,

    /// Lines without the `$` marker
    pub framing_errors: AtomicU64,

    /// Lines with too few fields for their tag
    pub malformed_lines: AtomicU64,

    /// Lines with an unrecognised tag
    pub unknown_tags: AtomicU64,

    /// Messages handed to the publish endpoint
    pub messages_forwarded: AtomicU64,

    /// Messages the publish endpoint did not accept
    pub forward_failures: AtomicU64,

    /// Total bytes of raw input processed
    pub bytes_processed: AtomicU64,

    /// Histogram of raw line sizes
    line_size_histogram: RwLock<Histogram<u64>>,

    /// Decoded records per tag
    records_by_tag: RwLock<HashMap<String, u64>>,

    /// When stats collection started
    start_time: Instant,
}

impl RelayStats {
    /// Create a new statistics collector.
    pub fn new() -> Self {
        Self {
            lines_received: AtomicU64::new(0),
            records_decoded: AtomicU64::new(0),
            framing_errors: AtomicU64::new(0),
            malformed_lines: AtomicU64::new(0),
            unknown_tags: AtomicU64::new(0),
            messages_forwarded: AtomicU64::new(0),
            forward_failures: AtomicU64::new(0),
            bytes_processed: AtomicU64::new(0),
            // Line size histogram: 1 byte to 10KB, 3 significant figures
            line_size_histogram: RwLock::new(
                Histogram::new_with_bounds(1, 10_000, 3)
                    .expect("Failed to create line size histogram"),
            ),
            records_by_tag: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record a raw line received from the feed.
    pub fn record_line(&self, line: &str) {
        let len = line.len() as u64;
        self.lines_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_processed.fetch_add(len, Ordering::Relaxed);

        if let Ok(mut hist) = self.line_size_histogram.write() {
            let _ = hist.record(len.clamp(1, 10_000));
        }
    }

    /// Record a successfully decoded record.
    pub fn record_decoded(&self, tag: &str) {
        self.records_decoded.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut map) = self.records_by_tag.write() {
            *map.entry(tag.to_string()).or_insert(0) += 1;
        }
    }

    /// Record a line without the line marker.
    pub fn record_framing_error(&self) {
        self.framing_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a line with too few fields.
    pub fn record_malformed(&self) {
        self.malformed_lines.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a line with an unknown tag.
    pub fn record_unknown_tag(&self) {
        self.unknown_tags.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message accepted by the publish endpoint.
    pub fn record_forwarded(&self) {
        self.messages_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message the publish endpoint did not accept.
    pub fn record_forward_failure(&self) {
        self.forward_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the elapsed time since stats collection started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get the current lines per second rate.
    pub fn lines_per_second(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.lines_received.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Generate a summary report.
    pub fn summary(&self) -> StatsSummary {
        let line_size_percentiles = self
            .line_size_histogram
            .read()
            .ok()
            .filter(|h| !h.is_empty())
            .map(|h| HistogramPercentiles {
                p50: h.value_at_quantile(0.50),
                p90: h.value_at_quantile(0.90),
                p99: h.value_at_quantile(0.99),
                min: h.min(),
                max: h.max(),
                mean: h.mean(),
            });

        let records_by_tag = self
            .records_by_tag
            .read()
            .map(|m| m.clone())
            .unwrap_or_default();

        StatsSummary {
            elapsed_secs: self.elapsed().as_secs_f64(),
            lines_received: self.lines_received.load(Ordering::Relaxed),
            records_decoded: self.records_decoded.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            malformed_lines: self.malformed_lines.load(Ordering::Relaxed),
            unknown_tags: self.unknown_tags.load(Ordering::Relaxed),
            messages_forwarded: self.messages_forwarded.load(Ordering::Relaxed),
            forward_failures: self.forward_failures.load(Ordering::Relaxed),
            bytes_processed: self.bytes_processed.load(Ordering::Relaxed),
            lines_per_second: self.lines_per_second(),
            line_size_percentiles,
            records_by_tag,
        }
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Percentile values from a histogram.
#[derive(Debug, Clone, Serialize)]
pub struct HistogramPercentiles {
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
}

/// Summary of collected statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub elapsed_secs: f64,
    pub lines_received: u64,
    pub records_decoded: u64,
    pub framing_errors: u64,
    pub malformed_lines: u64,
    pub unknown_tags: u64,
    pub messages_forwarded: u64,
    pub forward_failures: u64,
    pub bytes_processed: u64,
    pub lines_per_second: f64,
    pub line_size_percentiles: Option<HistogramPercentiles>,
    pub records_by_tag: HashMap<String, u64>,
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "═══════════════════════════════════════════════════════")?;
        writeln!(f, "                 TIMING RELAY STATISTICS")?;
        writeln!(f, "═══════════════════════════════════════════════════════")?;
        writeln!(f)?;
        writeln!(f, "Runtime: {:.1}s", self.elapsed_secs)?;
        writeln!(f, "Lines received: {}", self.lines_received)?;
        writeln!(
            f,
            "Records decoded: {} ({:.1}%)",
            self.records_decoded,
            if self.lines_received > 0 {
                self.records_decoded as f64 / self.lines_received as f64 * 100.0
            } else {
                0.0
            }
        )?;
        writeln!(f, "Framing errors: {}", self.framing_errors)?;
        writeln!(f, "Malformed lines: {}", self.malformed_lines)?;
        writeln!(f, "Unknown tags: {}", self.unknown_tags)?;
        writeln!(
            f,
            "Forwarded: {} ({} failed)",
            self.messages_forwarded, self.forward_failures
        )?;
        writeln!(f, "Bytes processed: {} KB", self.bytes_processed / 1024)?;
        writeln!(f, "Rate: {:.1} lines/sec", self.lines_per_second)?;
        writeln!(f)?;

        if let Some(ref p) = self.line_size_percentiles {
            writeln!(f, "Line Size Distribution (bytes):")?;
            writeln!(f, "  Min: {}, Max: {}, Mean: {:.1}", p.min, p.max, p.mean)?;
            writeln!(f, "  P50: {}, P90: {}, P99: {}", p.p50, p.p90, p.p99)?;
            writeln!(f)?;
        }

        if !self.records_by_tag.is_empty() {
            writeln!(f, "Records by Tag:")?;
            let mut tags: Vec<_> = self.records_by_tag.iter().collect();
            tags.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
            for (tag, count) in tags {
                writeln!(f, "  {}: {}", tag, count)?;
            }
        }

        Ok(())
    }
}
