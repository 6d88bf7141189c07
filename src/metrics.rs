//! Metric series registration. The `metrics` facade is a no-op unless a
//! recorder is installed, so emitting sites stay cheap either way.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration so series carry descriptions.
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("vigil_snapshots_total", "Snapshots persisted to the store.");
        describe_counter!("vigil_collector_errors_total", "Collector fetch/parse errors.");
        describe_counter!("vigil_insights_total", "Insights produced by analyzers.");
        describe_counter!("vigil_analyzer_errors_total", "Analyzer run failures.");
        describe_counter!("vigil_deliveries_total", "Insights delivered to at least one channel.");
        describe_counter!(
            "vigil_delivery_failures_total",
            "Insights that failed on every routed channel."
        );
        describe_histogram!("vigil_tick_ms", "Engine tick duration in milliseconds.");
        describe_gauge!("vigil_last_tick_ts", "Unix ts when the engine last ticked.");
    });
}
