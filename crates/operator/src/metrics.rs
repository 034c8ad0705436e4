use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use once_cell::sync::Lazy;
use prometheus::{histogram_opts, opts, Encoder, HistogramVec, IntCounterVec, IntGaugeVec, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static RECONCILE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        opts!("controller_runtime_reconcile_total", "Total number of reconciliations per controller"),
        &["controller", "result"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static RECONCILE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        opts!("controller_runtime_reconcile_errors_total", "Total number of reconciliation errors per controller"),
        &["controller"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static RECONCILE_TIME: Lazy<HistogramVec> = Lazy::new(|| {
    let h = HistogramVec::new(
        histogram_opts!(
            "controller_runtime_reconcile_time_seconds",
            "Length of time per reconciliation per controller",
            vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.15, 0.2, 0.25, 0.3, 0.35, 0.4, 0.45, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0, 1.25, 1.5, 1.75, 2.0, 2.5, 3.0, 3.5, 4.0, 4.5, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 15.0, 20.0, 25.0, 30.0, 40.0, 50.0, 60.0]
        ),
        &["controller"],
    )
    .unwrap();
    REGISTRY.register(Box::new(h.clone())).ok();
    h
});

pub static ACTIVE_WORKERS: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(
        opts!("controller_runtime_active_workers", "Number of currently used workers per controller"),
        &["controller"],
    )
    .unwrap();
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

pub static LEADER_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(opts!("leader_election_master_status", "1 if this replica holds the named lease"), &["name"]).unwrap();
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

/// Result label values for `controller_runtime_reconcile_total`.
pub mod labels {
    pub const SUCCESS: &str = "success";
    pub const ERROR: &str = "error";
    pub const REQUEUE: &str = "requeue";
    pub const REQUEUE_AFTER: &str = "requeue_after";
}

/// Forces registration so every series is present from the first scrape.
pub fn init(controller: &str) {
    for result in [labels::SUCCESS, labels::ERROR, labels::REQUEUE, labels::REQUEUE_AFTER] {
        RECONCILE_TOTAL.with_label_values(&[controller, result]);
    }
    RECONCILE_ERRORS.with_label_values(&[controller]);
    ACTIVE_WORKERS.with_label_values(&[controller]);
    Lazy::force(&RECONCILE_TIME);
}

pub fn set_leader(name: &str, leader: bool) { LEADER_STATUS.with_label_values(&[name]).set(i64::from(leader)); }

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&metric_families, &mut buf).is_err() { return StatusCode::INTERNAL_SERVER_ERROR.into_response(); }
    ([("Content-Type", "text/plain; version=0.0.4")], buf).into_response()
}

pub fn router() -> Router { Router::new().route("/metrics", get(metrics_handler)) }
