//! Prometheus metrics HTTP server.
//!
//! Exposes relay statistics in Prometheus text format via HTTP endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use tokio::net::TcpListener;
use tracing::info;

use crate::stats::RelayStats;

/// Start the Prometheus metrics HTTP server.
///
/// Runs in the background and serves metrics at `/metrics`.
/// Returns an error if the server fails to bind to the port.
pub async fn start_metrics_server(
    port: u16,
    stats: Arc<RelayStats>,
) -> Result<(), std::io::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = TcpListener::bind(addr).await?;
    info!("Prometheus metrics server listening on http://{}/metrics", addr);

    axum::serve(listener, router(stats))
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))
}

fn router(stats: Arc<RelayStats>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(stats)
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Prometheus metrics endpoint.
async fn metrics_handler(State(stats): State<Arc<RelayStats>>) -> impl IntoResponse {
    let output = format_prometheus_metrics(&stats);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        output,
    )
}

fn push_counter(output: &mut String, name: &str, help: &str, value: u64) {
    output.push_str(&format!("# HELP {} {}\n", name, help));
    output.push_str(&format!("# TYPE {} counter\n", name));
    output.push_str(&format!("{} {}\n", name, value));
}

/// Format statistics as Prometheus text format.
fn format_prometheus_metrics(stats: &RelayStats) -> String {
    let summary = stats.summary();
    let mut output = String::with_capacity(4096);

    output.push_str("# HELP relay_uptime_seconds Time since the relay started\n");
    output.push_str("# TYPE relay_uptime_seconds gauge\n");
    output.push_str(&format!("relay_uptime_seconds {:.3}\n", summary.elapsed_secs));

    push_counter(
        &mut output,
        "relay_lines_total",
        "Total number of lines received from the timing feed",
        summary.lines_received,
    );

    // Decoded records by tag
    output.push_str("# HELP relay_records_total Records decoded, by type tag\n");
    output.push_str("# TYPE relay_records_total counter\n");
    let mut tags: Vec<_> = summary.records_by_tag.iter().collect();
    tags.sort();
    for (tag, count) in tags {
        output.push_str(&format!("relay_records_total{{tag=\"{}\"}} {}\n", tag, count));
    }
    if summary.records_by_tag.is_empty() {
        output.push_str(&format!("relay_records_total {}\n", summary.records_decoded));
    }

    push_counter(
        &mut output,
        "relay_framing_errors_total",
        "Lines missing the line marker",
        summary.framing_errors,
    );
    push_counter(
        &mut output,
        "relay_malformed_lines_total",
        "Lines with too few fields for their type tag",
        summary.malformed_lines,
    );
    push_counter(
        &mut output,
        "relay_unknown_tags_total",
        "Lines with an unrecognised type tag",
        summary.unknown_tags,
    );
    push_counter(
        &mut output,
        "relay_messages_forwarded_total",
        "Messages sent to the publish endpoint",
        summary.messages_forwarded,
    );
    push_counter(
        &mut output,
        "relay_forward_failures_total",
        "Messages the publish endpoint did not accept",
        summary.forward_failures,
    );
    push_counter(
        &mut output,
        "relay_bytes_processed_total",
        "Total bytes of raw input processed",
        summary.bytes_processed,
    );

    output.push_str("# HELP relay_lines_per_second Current line processing rate\n");
    output.push_str("# TYPE relay_lines_per_second gauge\n");
    output.push_str(&format!(
        "relay_lines_per_second {:.3}\n",
        summary.lines_per_second
    ));

    if let Some(ref size) = summary.line_size_percentiles {
        output.push_str("# HELP relay_line_size_bytes Raw line size distribution\n");
        output.push_str("# TYPE relay_line_size_bytes summary\n");
        output.push_str(&format!(
            "relay_line_size_bytes{{quantile=\"0.5\"}} {}\n",
            size.p50
        ));
        output.push_str(&format!(
            "relay_line_size_bytes{{quantile=\"0.9\"}} {}\n",
            size.p90
        ));
        output.push_str(&format!(
            "relay_line_size_bytes{{quantile=\"0.99\"}} {}\n",
            size.p99
        ));
        output.push_str(&format!(
            "relay_line_size_bytes_count {}\n",
            summary.lines_received
        ));
    }

    output
}
