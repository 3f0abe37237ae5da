//! Prometheus metrics.
//!
//! All metric types use atomics internally (no locks on the hot path).
//! The `Metrics` struct is cheap to clone (Arc-based registry + collectors).

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use prometheus::{
    Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;

use crate::api::handlers::AppState;

/// All Prometheus metrics for the depot service.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // -- Process & Build --
    pub process_start_time_seconds: Gauge,
    pub build_info: GaugeVec,

    // -- HTTP Requests --
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,

    // -- Object traffic --
    pub objects_created_total: IntCounter,
    pub files_downloaded_total: IntCounter,
    pub bytes_ingested_total: IntCounter,
    pub bytes_served_total: IntCounter,

    // -- Background tasks --
    pub task_runs_total: IntCounterVec,
    pub fixity_mismatch_total: IntCounter,
    pub multipart_merges_total: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        // -- Process & Build --
        let process_start_time_seconds =
            Gauge::new("process_start_time_seconds", "Start time of the process").unwrap();
        registry
            .register(Box::new(process_start_time_seconds.clone()))
            .unwrap();

        let build_info = GaugeVec::new(
            Opts::new("depot_build_info", "Build information"),
            &["version"],
        )
        .unwrap();
        registry.register(Box::new(build_info.clone())).unwrap();

        // Register standard process metrics (RSS, CPU, open FDs on Linux)
        #[cfg(target_os = "linux")]
        {
            let pc = prometheus::process_collector::ProcessCollector::for_self();
            let _ = registry.register(Box::new(pc));
        }

        // -- HTTP Requests --
        let http_requests_total = IntCounterVec::new(
            Opts::new(
                "depot_http_requests_total",
                "Total HTTP requests by method and status",
            ),
            &["method", "status"],
        )
        .unwrap();
        registry
            .register(Box::new(http_requests_total.clone()))
            .unwrap();

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "depot_http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method"],
        )
        .unwrap();
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .unwrap();

        // -- Object traffic --
        let objects_created_total = IntCounter::new(
            "depot_objects_created_total",
            "Object versions committed (uploads and multipart merges)",
        )
        .unwrap();
        registry
            .register(Box::new(objects_created_total.clone()))
            .unwrap();

        let files_downloaded_total = IntCounter::new(
            "depot_files_downloaded_total",
            "Object downloads served",
        )
        .unwrap();
        registry
            .register(Box::new(files_downloaded_total.clone()))
            .unwrap();

        let bytes_ingested_total =
            IntCounter::new("depot_bytes_ingested_total", "Bytes accepted into storage").unwrap();
        registry
            .register(Box::new(bytes_ingested_total.clone()))
            .unwrap();

        let bytes_served_total =
            IntCounter::new("depot_bytes_served_total", "Bytes served to clients").unwrap();
        registry
            .register(Box::new(bytes_served_total.clone()))
            .unwrap();

        // -- Background tasks --
        let task_runs_total = IntCounterVec::new(
            Opts::new(
                "depot_task_runs_total",
                "Background task executions by kind and outcome",
            ),
            &["task", "outcome"],
        )
        .unwrap();
        registry.register(Box::new(task_runs_total.clone())).unwrap();

        let fixity_mismatch_total = IntCounter::new(
            "depot_fixity_mismatch_total",
            "Fixity checks whose recomputed checksum differed from the catalog",
        )
        .unwrap();
        registry
            .register(Box::new(fixity_mismatch_total.clone()))
            .unwrap();

        let multipart_merges_total = IntCounterVec::new(
            Opts::new(
                "depot_multipart_merges_total",
                "Multipart merge attempts by outcome",
            ),
            &["outcome"],
        )
        .unwrap();
        registry
            .register(Box::new(multipart_merges_total.clone()))
            .unwrap();

        Self {
            registry,
            process_start_time_seconds,
            build_info,
            http_requests_total,
            http_request_duration_seconds,
            objects_created_total,
            files_downloaded_total,
            bytes_ingested_total,
            bytes_served_total,
            task_runs_total,
            fixity_mismatch_total,
            multipart_merges_total,
        }
    }

    /// Render the registry in the Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        if encoder.encode(&families, &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }

    pub fn record_task(&self, task: &str, outcome: &str) {
        self.task_runs_total.with_label_values(&[task, outcome]).inc();
    }
}

/// Axum middleware recording request counts and durations.
pub async fn http_metrics_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    state
        .metrics
        .http_requests_total
        .with_label_values(&[&method, &status])
        .inc();
    state
        .metrics
        .http_request_duration_seconds
        .with_label_values(&[&method])
        .observe(start.elapsed().as_secs_f64());
    response
}
