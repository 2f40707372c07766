//! Prometheus metrics collection.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tessera_types::CommitOutcome;

/// HTTP request labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabels {
    /// HTTP method (GET, POST, etc.)
    pub method: String,
    /// Matched route, e.g. `/account/{address}`
    pub path: String,
    /// Response status code
    pub status: u16,
}

/// Global metrics state.
pub static METRICS: Lazy<MetricsState> = Lazy::new(MetricsState::new);

/// Metrics state container.
#[derive(Clone)]
pub struct MetricsState {
    /// Prometheus registry.
    pub registry: Arc<RwLock<Registry>>,
    /// HTTP request counter.
    pub http_requests_total: Family<HttpLabels, Counter>,
    /// HTTP request duration histogram (seconds).
    pub http_request_duration_seconds: Family<HttpLabels, Histogram>,
    /// Transactions handed to the ordering service.
    pub transactions_submitted: Counter,
    /// Committed blocks.
    pub blocks_committed: Counter,
    /// Transactions that failed inside committed blocks.
    pub transactions_failed: Counter,
    /// Time spent applying and committing one block (seconds).
    pub commit_duration_seconds: Histogram,
    /// Height of the last committed block.
    pub height: Gauge,
}

impl Default for MetricsState {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsState {
    /// Create a new metrics state with all metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let http_requests_total = Family::<HttpLabels, Counter>::default();
        registry.register(
            "tessera_http_requests",
            "Total HTTP requests",
            http_requests_total.clone(),
        );

        let http_request_duration_seconds =
            Family::<HttpLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 16))
            });
        registry.register(
            "tessera_http_request_duration_seconds",
            "HTTP request duration in seconds",
            http_request_duration_seconds.clone(),
        );

        let transactions_submitted = Counter::default();
        registry.register(
            "tessera_transactions_submitted",
            "Transactions taken by the ordering service",
            transactions_submitted.clone(),
        );

        let blocks_committed = Counter::default();
        registry.register(
            "tessera_blocks_committed",
            "Blocks committed to state",
            blocks_committed.clone(),
        );

        let transactions_failed = Counter::default();
        registry.register(
            "tessera_transactions_failed",
            "Transactions that failed inside committed blocks",
            transactions_failed.clone(),
        );

        let commit_duration_seconds = Histogram::new(exponential_buckets(0.0001, 2.0, 16));
        registry.register(
            "tessera_commit_duration_seconds",
            "Block apply and commit duration in seconds",
            commit_duration_seconds.clone(),
        );

        let height = Gauge::default();
        registry.register(
            "tessera_height",
            "Height of the last committed block",
            height.clone(),
        );

        Self {
            registry: Arc::new(RwLock::new(registry)),
            http_requests_total,
            http_request_duration_seconds,
            transactions_submitted,
            blocks_committed,
            transactions_failed,
            commit_duration_seconds,
            height,
        }
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let labels = HttpLabels {
            method: method.to_string(),
            path: path.to_string(),
            status,
        };
        self.http_requests_total.get_or_create(&labels).inc();
        self.http_request_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a committed block.
    pub fn record_commit(&self, outcome: &CommitOutcome, duration_secs: f64) {
        self.blocks_committed.inc();
        self.transactions_failed.inc_by(outcome.failed.len() as u64);
        self.commit_duration_seconds.observe(duration_secs);
        self.height.set(outcome.height as i64);
    }

    /// Encode metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        let registry = self.registry.read();
        prometheus_client::encoding::text::encode(&mut buffer, &registry)?;
        Ok(buffer)
    }
}
