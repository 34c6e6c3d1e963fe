//! Health server for Kubernetes probes and Prometheus metrics
//!
//! Provides HTTP endpoints for:
//! - `/healthz` - Liveness probe (is the process alive?)
//! - `/readyz` - Readiness probe (does this replica hold the leader lease?)
//! - `/metrics` - Prometheus metrics

use std::fmt;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// Lifecycle operation a metric sample belongs to
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct OperationLabels {
    pub operation: String,
}

impl EncodeLabelSet for OperationLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), fmt::Error> {
        ("operation", self.operation.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for cluster status metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct StatusLabels {
    pub status: String,
}

impl EncodeLabelSet for StatusLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), fmt::Error> {
        ("status", self.status.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics state
pub struct Metrics {
    /// Lifecycle operations started, by operation
    pub operations_total: Family<OperationLabels, Counter>,
    /// Lifecycle operations that returned an error, by operation
    pub operation_failures_total: Family<OperationLabels, Counter>,
    pub operation_duration_seconds: Family<OperationLabels, Histogram>,
    /// Cluster instances the operator currently manages
    pub managed_clusters: Gauge,
    /// Managed clusters by persisted status
    pub clusters_by_status: Family<StatusLabels, Gauge>,

    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let operations_total = Family::<OperationLabels, Counter>::default();
        registry.register(
            "spilo_operator_cluster_operations",
            "Total number of cluster lifecycle operations",
            operations_total.clone(),
        );

        let operation_failures_total = Family::<OperationLabels, Counter>::default();
        registry.register(
            "spilo_operator_cluster_operation_failures",
            "Total number of failed cluster lifecycle operations",
            operation_failures_total.clone(),
        );

        let operation_duration_seconds =
            Family::<OperationLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.01, 2.0, 16))
            });
        registry.register(
            "spilo_operator_cluster_operation_duration_seconds",
            "Duration of cluster lifecycle operations in seconds",
            operation_duration_seconds.clone(),
        );

        let managed_clusters = Gauge::default();
        registry.register(
            "spilo_operator_managed_clusters",
            "Number of clusters managed by this operator",
            managed_clusters.clone(),
        );

        let clusters_by_status = Family::<StatusLabels, Gauge>::default();
        registry.register(
            "spilo_operator_clusters",
            "Number of managed clusters by status",
            clusters_by_status.clone(),
        );

        Self {
            operations_total,
            operation_failures_total,
            operation_duration_seconds,
            managed_clusters,
            clusters_by_status,
            registry,
        }
    }

    /// Record a finished lifecycle operation
    pub fn record_operation(&self, operation: Operation, duration_secs: f64, failed: bool) {
        let labels = OperationLabels {
            operation: operation.to_string(),
        };
        self.operations_total.get_or_create(&labels).inc();
        self.operation_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
        if failed {
            self.operation_failures_total.get_or_create(&labels).inc();
        }
    }

    pub fn set_managed_clusters(&self, count: i64) {
        self.managed_clusters.set(count);
    }

    /// Update the number of clusters in one status
    pub fn set_clusters_by_status(&self, status: &str, count: i64) {
        let labels = StatusLabels {
            status: status.to_string(),
        };
        self.clusters_by_status.get_or_create(&labels).set(count);
    }

    /// Encode metrics to Prometheus text format
    ///
    /// Returns an empty string if encoding fails.
    fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether this replica leads and runs the controller
    pub ready: RwLock<bool>,
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 503 Service Unavailable until the operator is ready.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve health and metrics endpoints on all interfaces
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("Health server listening on 0.0.0.0:{}", port);

    axum::serve(listener, app).await
}
