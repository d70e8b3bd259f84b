//! # Metrics
//!
//! Prometheus metrics for reconciliation passes.
//!
//! ## Metrics Exposed
//!
//! - `saasherder_triggers_total{kind}` - Triggers produced per detector
//! - `saasherder_collaborator_errors_total{detector}` - Failed collaborator calls
//! - `saasherder_promotion_validation_failures_total{reason}` - Rejected promotions
//! - `saasherder_slo_gated_triggers_total` - Triggers removed by SLO gating
//! - `saasherder_validation_errors_total` - Bundle validation errors
//! - `saasherder_run_duration_seconds` - Duration of a reconciliation pass

use anyhow::Result;
use prometheus::{Encoder, Histogram, IntCounter, IntCounterVec, Registry, TextEncoder};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static TRIGGERS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "saasherder_triggers_total",
            "Total number of triggers produced by detector",
        ),
        &["kind"],
    )
    .expect("Failed to create TRIGGERS_TOTAL metric - this should never happen")
});

static COLLABORATOR_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "saasherder_collaborator_errors_total",
            "Total number of failed collaborator calls by detector",
        ),
        &["detector"],
    )
    .expect("Failed to create COLLABORATOR_ERRORS_TOTAL metric - this should never happen")
});

static PROMOTION_VALIDATION_FAILURES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "saasherder_promotion_validation_failures_total",
            "Total number of rejected promotions by reason",
        ),
        &["reason"],
    )
    .expect(
        "Failed to create PROMOTION_VALIDATION_FAILURES_TOTAL metric - this should never happen",
    )
});

static SLO_GATED_TRIGGERS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "saasherder_slo_gated_triggers_total",
        "Total number of triggers removed because of breached SLOs",
    )
    .expect("Failed to create SLO_GATED_TRIGGERS_TOTAL metric - this should never happen")
});

static VALIDATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "saasherder_validation_errors_total",
        "Total number of bundle validation errors",
    )
    .expect("Failed to create VALIDATION_ERRORS_TOTAL metric - this should never happen")
});

static RUN_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "saasherder_run_duration_seconds",
            "Duration of a reconciliation pass in seconds",
        )
        .buckets(vec![0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
    )
    .expect("Failed to create RUN_DURATION metric - this should never happen")
});

/// Register every metric with the crate registry. Safe to call repeatedly.
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(TRIGGERS_TOTAL.clone()),
        Box::new(COLLABORATOR_ERRORS_TOTAL.clone()),
        Box::new(PROMOTION_VALIDATION_FAILURES_TOTAL.clone()),
        Box::new(SLO_GATED_TRIGGERS_TOTAL.clone()),
        Box::new(VALIDATION_ERRORS_TOTAL.clone()),
        Box::new(RUN_DURATION.clone()),
    ];
    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

pub fn increment_triggers(kind: &str, count: usize) {
    TRIGGERS_TOTAL
        .with_label_values(&[kind])
        .inc_by(count as u64);
}

pub fn increment_collaborator_errors(detector: &str) {
    COLLABORATOR_ERRORS_TOTAL
        .with_label_values(&[detector])
        .inc();
}

pub fn increment_promotion_validation_failures(reason: &str) {
    PROMOTION_VALIDATION_FAILURES_TOTAL
        .with_label_values(&[reason])
        .inc();
}

pub fn increment_slo_gated_triggers() {
    SLO_GATED_TRIGGERS_TOTAL.inc();
}

pub fn increment_validation_errors(count: usize) {
    VALIDATION_ERRORS_TOTAL.inc_by(count as u64);
}

pub fn observe_run_duration(duration: f64) {
    RUN_DURATION.observe(duration);
}

/// Text exposition of the registry
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn encode_metrics() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
