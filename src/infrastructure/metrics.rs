// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{info, warn};

/// 启动 Prometheus 导出器并登记指标说明
pub fn init_metrics(listen_addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = listen_addr.parse()?;

    // Ignore error if address is already in use (for development/testing)
    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        warn!("Failed to install Prometheus recorder: {}. This might happen if the port is already in use.", e);
        return Ok(());
    }

    describe_metrics();
    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

fn describe_metrics() {
    describe_counter!("jobs_claimed_total", "Jobs claimed by this process");
    describe_counter!("jobs_completed_total", "Jobs completed successfully");
    describe_counter!(
        "jobs_failed_total",
        "Job failures, labelled by whether they were retryable"
    );
    describe_counter!("jobs_timed_out_total", "Jobs that exceeded their execution timeout");
    describe_counter!(
        "jobs_claim_lost_total",
        "Results discarded because the claim expired and another worker took the job"
    );
    describe_histogram!(
        "job_duration_seconds",
        Unit::Seconds,
        "Wall-clock time from dispatch to acknowledgement"
    );
    describe_counter!(
        "content_items_processed_total",
        "Content queue items processed, labelled by outcome"
    );
    describe_counter!("notification_delivery_attempts_total", "Notification delivery attempts");
    describe_histogram!(
        "notification_delivery_duration_seconds",
        Unit::Seconds,
        "Notification webhook round-trip time"
    );
}
