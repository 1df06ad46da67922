//! RMonitor Relay - A Rust library and server for decoding motorsport timing feeds.
//!
//! This crate provides:
//! - A lenient decoder for RMonitor timing lines into typed records
//! - An async TCP client for streaming the timing feed
//! - A WebSocket publisher for republishing raw lines or decoded records
//! - Statistics tracking with HDR histograms and a Prometheus endpoint
//!
//! # Example
//!
//! ```rust
//! use rmonitor_relay::{Decoder, Record};
//!
//! let decoder = Decoder::new();
//! let envelope = decoder
//!     .decode("$G,1,\"REG001\",25,\"00:32:10.500\"\r\n")
//!     .expect("Failed to decode line");
//!
//! if let Some(Record::RaceInfo(info)) = envelope.payload {
//!     println!("P{} {} {}", info.position, info.registration_number, info.total_time);
//! }
//! ```

pub mod client;
pub mod config;
pub mod decoder;
pub mod metrics;
pub mod parser;
pub mod publisher;
pub mod record;
pub mod relay;
pub mod stats;

pub use client::{TimingClient, TimingClientConfig, TimingEvent};
pub use config::Config;
pub use decoder::{Clock, DecodeError, Decoder, FixedClock, SystemClock};
pub use parser::{ParseError, normalize_line, tokenize, unquote};
pub use publisher::Publisher;
pub use record::{Envelope, RaceTime, Record};
pub use relay::{ForwardMode, Relay};
pub use stats::{RelayStats, StatsSummary};
