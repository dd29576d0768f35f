//! Metrics module for billing-sync-service.
//! Provides Prometheus metrics for sync runs, emitted patches and invoice warnings.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter,
    register_int_counter_vec, Encoder, HistogramTimer, HistogramVec, IntCounter, IntCounterVec,
    TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "billing_sync_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Sync runs counter by trigger and outcome
pub static SYNC_RUNS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Sync run duration histogram
pub static SYNC_RUN_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Patches emitted by kind
pub static PATCHES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Validation issues added to immutable invoices
pub static VALIDATION_ISSUES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Period generator safety cap hits
pub static GENERATOR_SAFETY_CAP_TOTAL: OnceLock<IntCounter> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    SYNC_RUNS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_sync_runs_total",
                "Total subscription sync runs by trigger and status"
            ),
            &["trigger", "status"]
        )
        .expect("Failed to register SYNC_RUNS_TOTAL")
    });

    // Sync runs are dominated by collaborator I/O
    SYNC_RUN_DURATION.get_or_init(|| {
        register_histogram_vec!(
            histogram_opts!(
                "billing_sync_run_duration_seconds",
                "Subscription sync run duration",
                vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
            ),
            &["trigger"]
        )
        .expect("Failed to register SYNC_RUN_DURATION")
    });

    PATCHES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("billing_sync_patches_total", "Total line patches by kind"),
            &["kind"]
        )
        .expect("Failed to register PATCHES_TOTAL")
    });

    VALIDATION_ISSUES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_sync_validation_issues_total",
                "Validation issues recorded on immutable invoices"
            ),
            &["code"]
        )
        .expect("Failed to register VALIDATION_ISSUES_TOTAL")
    });

    GENERATOR_SAFETY_CAP_TOTAL.get_or_init(|| {
        register_int_counter!(opts!(
            "billing_sync_generator_safety_cap_total",
            "Item versions whose period generation hit the iteration cap"
        ))
        .expect("Failed to register GENERATOR_SAFETY_CAP_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record a finished sync run.
pub fn record_sync_run(trigger: &str, status: &str) {
    if let Some(counter) = SYNC_RUNS_TOTAL.get() {
        counter.with_label_values(&[trigger, status]).inc();
    }
}

/// Start timing a sync run; the duration is observed when the timer drops.
pub fn start_sync_run_timer(trigger: &str) -> Option<HistogramTimer> {
    SYNC_RUN_DURATION
        .get()
        .map(|histogram| histogram.with_label_values(&[trigger]).start_timer())
}

/// Record an emitted patch.
pub fn record_patch(kind: &str) {
    if let Some(counter) = PATCHES_TOTAL.get() {
        counter.with_label_values(&[kind]).inc();
    }
}

/// Record validation issues added to an invoice.
pub fn record_validation_issues(code: &str, count: usize) {
    if let Some(counter) = VALIDATION_ISSUES_TOTAL.get() {
        counter.with_label_values(&[code]).inc_by(count as u64);
    }
}

/// Record a period generator safety cap hit.
pub fn record_generator_safety_cap() {
    if let Some(counter) = GENERATOR_SAFETY_CAP_TOTAL.get() {
        counter.inc();
    }
}
