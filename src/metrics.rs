use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus exporter and register the application metrics.
/// Returns a `PrometheusHandle` whose `render()` method produces the
/// text/plain Prometheus scrape payload.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // Pre-register so they appear before the first increment.
    counter!("trade_events_total").absolute(0);
    counter!("trades_filtered_total").absolute(0);
    counter!("alerts_emitted_total").absolute(0);
    counter!("frames_dropped_total").absolute(0);
    counter!("frames_malformed_total").absolute(0);
    counter!("frames_ignored_total").absolute(0);
    counter!("verifications_total").absolute(0);
    counter!("verifications_deferred_total").absolute(0);
    counter!("observations_expired_total").absolute(0);
    counter!("snapshot_saves_total").absolute(0);
    counter!("snapshot_save_failures_total").absolute(0);

    gauge!("pending_observations").set(0.0);
    gauge!("contrarian_winners").set(0.0);

    histogram!("pipeline_latency_seconds").record(0.0);

    handle
}

/// A handle backed by a recorder that is not installed globally. Renders
/// an empty payload; used where a process-wide recorder must not be set.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}
