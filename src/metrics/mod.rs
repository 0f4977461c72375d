/*!
 * # Metrics Module
 *
 * In-process counters and histograms for the checkout service, exposed in
 * Prometheus text format at `/metrics`.
 *
 * Business metrics cover order creation, payment intent creation and
 * failure, reconciliation outcomes and webhook rejections.
 */

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to export metrics: {0}")]
    ExportError(String),
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "metrics export failed");
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Count and sum of observed values, in milliseconds for latencies
#[derive(Debug, Clone, Default)]
pub struct Histogram {
    sum: Arc<AtomicU64>,
    count: Arc<AtomicU64>,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, value: f64) {
        self.sum.fetch_add(value.max(0.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_duration(&self, elapsed: Duration) {
        self.observe(elapsed.as_millis() as f64);
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64
    }
}

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: Arc<DashMap<String, Counter>>,
    histograms: Arc<DashMap<String, Histogram>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create_counter(&self, name: &str) -> Counter {
        self.counters
            .entry(name.to_string())
            .or_insert_with(Counter::new)
            .clone()
    }

    pub fn get_or_create_histogram(&self, name: &str) -> Histogram {
        self.histograms
            .entry(name.to_string())
            .or_insert_with(Histogram::new)
            .clone()
    }

    pub fn export_metrics(&self) -> Result<String, MetricsError> {
        use std::fmt::Write;

        let mut output = String::new();
        let mut counters: Vec<_> = self
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().get()))
            .collect();
        counters.sort();
        for (name, value) in counters {
            writeln!(output, "# TYPE {} counter\n{} {}", name, name, value)
                .map_err(|e| MetricsError::ExportError(e.to_string()))?;
        }

        let mut histograms: Vec<_> = self
            .histograms
            .iter()
            .map(|entry| {
                let h = entry.value();
                (entry.key().clone(), h.get_count(), h.get_sum())
            })
            .collect();
        histograms.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, count, sum) in histograms {
            writeln!(
                output,
                "# TYPE {} histogram\n{}_count {}\n{}_sum {}",
                name, name, count, name, sum
            )
            .map_err(|e| MetricsError::ExportError(e.to_string()))?;
        }

        Ok(output)
    }
}

lazy_static::lazy_static! {
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
    pub static ref CHECKOUT_METRICS: CheckoutMetrics = CheckoutMetrics::new();
}

pub fn increment_counter(name: &str) {
    METRICS.get_or_create_counter(name).inc();
}

// Business metrics
pub struct CheckoutMetrics {
    pub orders_created: Counter,
    pub checkouts_rejected: Counter,
    pub order_number_collisions: Counter,
    pub checkout_leases_lost: Counter,
    pub payment_intents_created: Counter,
    pub payment_initiation_failures: Counter,
    pub payments_succeeded: Counter,
    pub payments_failed: Counter,
    pub payments_canceled: Counter,
    pub payments_refunded: Counter,
    pub duplicate_reports: Counter,
    pub webhooks_rejected: Counter,
    pub webhooks_ignored: Counter,
    pub gateway_latency_ms: Histogram,
}

impl CheckoutMetrics {
    pub fn new() -> Self {
        Self {
            orders_created: METRICS.get_or_create_counter("checkout_orders_created_total"),
            checkouts_rejected: METRICS.get_or_create_counter("checkout_rejected_total"),
            order_number_collisions: METRICS
                .get_or_create_counter("checkout_order_number_collisions_total"),
            checkout_leases_lost: METRICS.get_or_create_counter("checkout_leases_lost_total"),
            payment_intents_created: METRICS
                .get_or_create_counter("checkout_payment_intents_created_total"),
            payment_initiation_failures: METRICS
                .get_or_create_counter("checkout_payment_initiation_failures_total"),
            payments_succeeded: METRICS.get_or_create_counter("payments_succeeded_total"),
            payments_failed: METRICS.get_or_create_counter("payments_failed_total"),
            payments_canceled: METRICS.get_or_create_counter("payments_canceled_total"),
            payments_refunded: METRICS.get_or_create_counter("payments_refunded_total"),
            duplicate_reports: METRICS.get_or_create_counter("payment_reports_duplicate_total"),
            webhooks_rejected: METRICS.get_or_create_counter("payment_webhooks_rejected_total"),
            webhooks_ignored: METRICS.get_or_create_counter("payment_webhooks_ignored_total"),
            gateway_latency_ms: METRICS.get_or_create_histogram("payment_gateway_latency_ms"),
        }
    }
}

impl Default for CheckoutMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// HTTP endpoint handler for metrics
pub async fn metrics_handler() -> Result<String, MetricsError> {
    // Business counters register on first use; export them from the start.
    lazy_static::initialize(&CHECKOUT_METRICS);
    METRICS.export_metrics()
}
