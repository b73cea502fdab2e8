//! Production observability metrics for the market history sync service
//!
//! This module provides metrics collection for monitoring rate window
//! pressure, throttling behavior, resource bans, store writes, and task
//! outcomes.
//!
//! ## Architecture
//!
//! - Uses `metrics` crate for low-overhead metric collection
//! - Prometheus exporter for scraping endpoint (:9090/metrics)
//! - Recording is fire-and-forget; an uninstalled recorder drops samples
//!   without affecting the sync path

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Correlation ID generator for request tracing
static CORRELATION_COUNTER: Lazy<Arc<RwLock<u64>>> = Lazy::new(|| Arc::new(RwLock::new(0)));

/// Initialize metrics system with Prometheus exporter
///
/// This should be called once at application startup, typically in main().
/// The function is idempotent and will not reinitialize if already called.
///
/// # Arguments
/// * `addr` - Socket address to bind Prometheus scrape endpoint (e.g., "0.0.0.0:9090")
///
/// # Returns
/// Ok(()) if metrics initialized successfully, Err if binding fails
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    // Configure Prometheus exporter
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    // Register metric descriptions for better Prometheus integration
    describe_counter!(
        "http_requests_total",
        Unit::Count,
        "Total number of HTTP requests made to the market data API"
    );

    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request duration in seconds"
    );

    describe_counter!(
        "rate_limit_errors_total",
        Unit::Count,
        "Total number of rate limit error statuses (420/429) received"
    );

    describe_gauge!(
        "rate_window_calls",
        Unit::Count,
        "Calls admitted in the current rate window"
    );

    describe_gauge!(
        "rate_window_remaining",
        Unit::Count,
        "Admissions remaining in the current rate window"
    );

    describe_counter!(
        "rate_limit_throttled_total",
        Unit::Count,
        "Total number of admissions denied by a full rate window"
    );

    describe_histogram!(
        "rate_limit_retry_after_seconds",
        Unit::Seconds,
        "Delay until the window boundary reported to throttled callers"
    );

    describe_counter!(
        "resource_bans_total",
        Unit::Count,
        "Total number of resources placed on the ban list"
    );

    describe_counter!(
        "store_upserts_total",
        Unit::Count,
        "Total number of rows written to the local store"
    );

    describe_counter!(
        "sync_tasks_total",
        Unit::Count,
        "Total number of sync tasks settled, by outcome"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Generate a new correlation ID for request tracing
pub async fn generate_correlation_id() -> String {
    let mut counter = CORRELATION_COUNTER.write().await;
    *counter += 1;
    format!("req-{:08x}", *counter)
}

/// Record an HTTP fetch attempt with timing
pub struct FetchRequestMetrics {
    endpoint: String,
    start_time: Instant,
    correlation_id: String,
}

impl FetchRequestMetrics {
    /// Start recording a new fetch attempt
    pub async fn start(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let correlation_id = generate_correlation_id().await;

        debug!(
            correlation_id = %correlation_id,
            endpoint = %endpoint,
            "Starting fetch request metrics"
        );

        Self {
            endpoint,
            start_time: Instant::now(),
            correlation_id,
        }
    }

    /// Record completion of the fetch attempt
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => status_code.to_string(),
        )
        .increment(1);

        histogram!(
            "http_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        // Rate limit statuses get their own counter
        if status_code == 420 || status_code == 429 {
            counter!(
                "rate_limit_errors_total",
                "endpoint" => self.endpoint.clone(),
                "status" => status_code.to_string(),
            )
            .increment(1);

            warn!(
                correlation_id = %self.correlation_id,
                endpoint = %self.endpoint,
                status = status_code,
                duration_ms = duration.as_millis(),
                "Rate limit error recorded"
            );
        }

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            status = status_code,
            duration_ms = duration.as_millis(),
            "Fetch request completed"
        );
    }

    /// Record a network error (no status code)
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => "network_error",
        )
        .increment(1);

        histogram!(
            "http_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        warn!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            duration_ms = duration.as_millis(),
            "Network error recorded"
        );
    }

    /// Get the correlation ID for this request
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record rate window pressure after an admission
pub fn record_window_usage(resource_class: &str, count: u32, ceiling: u32) {
    let remaining = ceiling.saturating_sub(count);

    gauge!("rate_window_calls", "class" => resource_class.to_string()).set(count as f64);
    gauge!("rate_window_remaining", "class" => resource_class.to_string()).set(remaining as f64);

    // Emit warning if approaching the ceiling
    let usage_percent = (count as f64 / ceiling as f64) * 100.0;
    if usage_percent >= 80.0 {
        warn!(
            resource_class = %resource_class,
            count = count,
            ceiling = ceiling,
            usage_percent = usage_percent,
            "Rate window usage exceeds 80% threshold"
        );
    }
}

/// Record a denied admission and the delay handed to the caller
pub fn record_throttled(resource_class: &str, retry_after: Duration) {
    counter!(
        "rate_limit_throttled_total",
        "class" => resource_class.to_string(),
    )
    .increment(1);

    histogram!(
        "rate_limit_retry_after_seconds",
        "class" => resource_class.to_string(),
    )
    .record(retry_after.as_secs_f64());
}

/// Record a resource being placed on the ban list
pub fn record_ban(reason: &str) {
    counter!(
        "resource_bans_total",
        "reason" => reason.to_string(),
    )
    .increment(1);
}

/// Record a row written to the local store
pub fn record_upsert(kind: &str) {
    counter!(
        "store_upserts_total",
        "kind" => kind.to_string(),
    )
    .increment(1);
}

/// Record a settled sync task by outcome
pub fn record_task_outcome(outcome: &str) {
    counter!(
        "sync_tasks_total",
        "outcome" => outcome.to_string(),
    )
    .increment(1);
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}
