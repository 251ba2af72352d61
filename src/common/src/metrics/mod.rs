pub mod metric_def;

use metrics::{counter, gauge, histogram, Histogram, Label};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::RwLock;
use std::sync::{Arc, LazyLock, Once};
use tracing::{info, warn};

static DEFAULT_BUCKETS: &[f64; 14] = &[
    1e+2, 2e+2, 4e+2, 8e+2, 1e+3, 2e+3, 4e+3, 8e+3, 1e+4, 2e+4, 4e+4, 8e+4, 1e+5, 1e+6,
];

const DEFAULT_QUANTILES: &[f64; 9] = &[0.0, 0.5, 0.7, 0.8, 0.9, 0.95, 0.99, 0.999, 1.0];

static PROMETHEUS_HANDLE: LazyLock<Arc<RwLock<Option<PrometheusHandle>>>> =
    LazyLock::new(|| Arc::new(RwLock::new(None)));

pub fn init_metrics_context() {
    static START: Once = Once::new();
    START.call_once(init_metrics)
}

fn init_metrics() {
    let recorder = PrometheusBuilder::new()
        .set_quantiles(DEFAULT_QUANTILES)
        .expect("can't set quantiles")
        .set_buckets(DEFAULT_BUCKETS)
        .expect("can't set buckets")
        .build_recorder();
    let mut prometheus_handle = PROMETHEUS_HANDLE.as_ref().write();
    *prometheus_handle = Some(recorder.handle());
    match metrics::set_global_recorder(recorder) {
        Ok(_) => {
            metric_def::describe_all();
            info!("Veritaserum init prometheus metrics context successfully!");
        }
        Err(e) => {
            warn!(
                "Veritaserum init prometheus metrics context error.cause by {:?}",
                e.to_string()
            );
        }
    }
}

pub fn try_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.as_ref().read().clone()
}

pub fn common_labels() -> &'static Vec<(&'static str, String)> {
    static COMMON_LABELS: LazyLock<Vec<(&'static str, String)>> =
        LazyLock::new(|| vec![("service", "veritaserum".to_string())]);
    &COMMON_LABELS
}

fn to_labels(labels: &[(&'static str, String)]) -> Vec<Label> {
    labels
        .iter()
        .map(|(key, value)| Label::new(*key, value.clone()))
        .collect()
}

pub fn counter_inc(name: &'static str, value: u64, labels: Option<&Vec<(&'static str, String)>>) {
    match labels {
        Some(labels) => counter!(name, to_labels(labels)).increment(value),
        None => counter!(name).increment(value),
    }
}

pub fn gauge_inc(name: &'static str, value: f64, labels: Option<&Vec<(&'static str, String)>>) {
    match labels {
        Some(labels) => gauge!(name, to_labels(labels)).increment(value),
        None => gauge!(name).increment(value),
    }
}

pub fn gauge_dec(name: &'static str, value: f64, labels: Option<&Vec<(&'static str, String)>>) {
    match labels {
        Some(labels) => gauge!(name, to_labels(labels)).decrement(value),
        None => gauge!(name).decrement(value),
    }
}

/// Observes the elapsed time into a histogram when dropped.
pub struct MetricsTimer {
    start: coarsetime::Instant,
    histogram: Histogram,
    observed: bool,
}

impl MetricsTimer {
    pub fn new_with_labels(name: &'static str, labels: &[(&'static str, String)]) -> Self {
        Self {
            start: coarsetime::Instant::now(),
            histogram: histogram!(name, to_labels(labels)),
            observed: false,
        }
    }

    pub fn observe(&mut self) {
        if !self.observed {
            let elapsed_us = self.start.elapsed().as_f64() * 1e6;
            self.histogram.record(elapsed_us);
            self.observed = true;
        }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        self.observe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_absent_until_initialized() {
        // the recorder is installed lazily by init_metrics_context; a bare
        // process must see no handle and metric helpers must be no-ops.
        counter_inc(metric_def::ENGINE_CAPTURES, 1, Some(common_labels()));
        gauge_inc(metric_def::ENGINE_CURR_CONN, 1.0, None);
        gauge_dec(metric_def::ENGINE_CURR_CONN, 1.0, None);
        let mut timer =
            MetricsTimer::new_with_labels(metric_def::ENGINE_DISPATCH_LATENCY, common_labels());
        timer.observe();
    }
}
