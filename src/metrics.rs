use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and describe every pipeline series.
    pub fn init(cadence_secs: u64) -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("prometheus: install recorder");

        describe_counter!(
            "pipeline_phase_runs_total",
            "Phase invocations that acquired the phase lock"
        );
        describe_counter!(
            "pipeline_phase_skips_total",
            "Phase invocations skipped because the phase was busy or disabled"
        );
        describe_counter!("pipeline_items_fetched_total", "Raw items pulled from feeds");
        describe_counter!("pipeline_fetch_failures_total", "Sources that failed a fetch");
        describe_counter!("pipeline_drafts_created_total", "Drafts created by dedup");
        describe_counter!(
            "pipeline_drafts_deduped_total",
            "Events skipped because a draft already existed"
        );
        describe_counter!("pipeline_drafts_processed_total", "Drafts fully processed");
        describe_counter!(
            "pipeline_process_failures_total",
            "Per-draft processing failures"
        );
        describe_counter!("pipeline_gate_decisions_total", "Quality gate outcomes");
        describe_counter!(
            "pipeline_drafts_scheduled_total",
            "Drafts armed for auto-publish"
        );
        describe_counter!(
            "pipeline_drafts_published_total",
            "Drafts published via the CMS"
        );
        describe_counter!(
            "pipeline_dispatch_failures_total",
            "Primary channel dispatch failures"
        );
        describe_counter!(
            "pipeline_publish_cancels_total",
            "Scheduled publishes cancelled"
        );
        describe_counter!("pipeline_drafts_rejected_total", "Drafts rejected, by reason");
        describe_gauge!("pipeline_drafts", "Current draft count per status");
        describe_gauge!("pipeline_cycle_cadence_secs", "Configured seconds between cycles");

        gauge!("pipeline_cycle_cadence_secs").set(cadence_secs as f64);

        Self { handle }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
