//! Health, readiness and metrics endpoints.
//!
//! - `GET /healthz`: process is alive
//! - `GET /readyz`: both watchers listed their resource and are running
//! - `GET /metrics`: Prometheus text format

use crate::error::ControllerError;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use crds::TargetKind;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Outcome label for passes that returned an error
pub const OUTCOME_ERROR: &str = "error";

const WATCHED_KINDS: [TargetKind; 2] = [TargetKind::Cluster, TargetKind::NodePool];

/// Allocation counters and watcher readiness shared with the probe server
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    allocations: IntCounterVec,
    running_watchers: Arc<Mutex<BTreeSet<TargetKind>>>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();
        let allocations = IntCounterVec::new(
            Opts::new(
                "subnet_allocations_total",
                "Allocation passes by target kind and outcome",
            ),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(allocations.clone()))?;

        Ok(Self {
            registry,
            allocations,
            running_watchers: Arc::new(Mutex::new(BTreeSet::new())),
        })
    }

    /// Count one allocation pass
    pub fn record(&self, kind: TargetKind, outcome: &str) {
        self.allocations
            .with_label_values(&[kind.as_str(), outcome])
            .inc();
    }

    /// Current value of one counter
    pub fn count(&self, kind: TargetKind, outcome: &str) -> u64 {
        self.allocations
            .with_label_values(&[kind.as_str(), outcome])
            .get()
    }

    /// The watcher for `kind` reached the API server and is processing events
    pub fn watcher_started(&self, kind: TargetKind) {
        self.with_watchers(|running| {
            running.insert(kind);
        });
    }

    /// The watcher for `kind` exited
    pub fn watcher_stopped(&self, kind: TargetKind) {
        self.with_watchers(|running| {
            running.remove(&kind);
        });
    }

    /// Ready while every target kind has a running watcher
    pub fn is_ready(&self) -> bool {
        self.with_watchers(|running| WATCHED_KINDS.iter().all(|kind| running.contains(kind)))
    }

    fn with_watchers<T>(&self, f: impl FnOnce(&mut BTreeSet<TargetKind>) -> T) -> T {
        match self.running_watchers.lock() {
            Ok(mut running) => f(&mut running),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Render all registered metrics in the Prometheus text format
    pub fn encode(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| ControllerError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(metrics): State<Metrics>) -> (StatusCode, &'static str) {
    if metrics.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn metrics_text(State(metrics): State<Metrics>) -> Result<String, (StatusCode, String)> {
    metrics
        .encode()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Build the probe router
pub fn routes(metrics: Metrics) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_text))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}

/// Serve the probe endpoints until the listener fails
pub async fn serve(addr: SocketAddr, metrics: Metrics) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Probe server listening on {}", addr);
    axum::serve(listener, routes(metrics)).await?;
    Ok(())
}
