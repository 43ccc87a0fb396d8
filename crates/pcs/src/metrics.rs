//! Metrics collection and reporting using metrics-rs.
//!
//! Replay records its counters through the `metrics` facade. Without an
//! installed recorder they cost nothing; `pcs --metrics` installs the
//! in-memory [`CliRecorder`] and prints a summary at exit.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder,
    SharedString, Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge,
    histogram,
};
use parking_lot::RwLock;

use crate::{FcallState, StackSummary};

// ============================================================================
// Metric descriptions
// ============================================================================

/// Initialize metric descriptions.
///
/// Call this once at startup to register metric descriptions.
pub fn init() {
    describe_counter!(
        "pcs_transitions_total",
        Unit::Count,
        "Call stack transitions replayed"
    );
    describe_counter!(
        "pcs_accesses_total",
        Unit::Count,
        "Access records replayed"
    );
    describe_counter!(
        "pcs_call_stacks_total",
        Unit::Count,
        "Call stacks that left the tracker"
    );
    describe_gauge!(
        "pcs_live_call_stacks",
        Unit::Count,
        "Call stacks alive after the last transition"
    );
    describe_histogram!(
        "pcs_call_stack_accesses",
        Unit::Count,
        "Accesses attributed to each call stack"
    );
}

// ============================================================================
// Metric recording functions
// ============================================================================

/// Record one applied transition and the resulting number of live call stacks.
pub fn record_transition(state: FcallState, live: usize) {
    counter!("pcs_transitions_total", "state" => state.as_str()).increment(1);
    #[allow(clippy::cast_precision_loss)]
    let live = live as f64;
    gauge!("pcs_live_call_stacks").set(live);
}

/// Record one access record.
pub fn record_access(attributed: bool) {
    let attributed = if attributed { "true" } else { "false" };
    counter!("pcs_accesses_total", "attributed" => attributed).increment(1);
}

/// Record a call stack leaving the tracker.
pub fn record_call_stack(summary: &StackSummary) {
    counter!("pcs_call_stacks_total", "ended" => summary.ended.as_str()).increment(1);
    #[allow(clippy::cast_precision_loss)]
    let accesses = summary.accesses as f64;
    histogram!("pcs_call_stack_accesses").record(accesses);
}

// ============================================================================
// In-memory recorder for `pcs --metrics`
// ============================================================================

/// Values captured by [`CliRecorder`], keyed by `name{label=value,...}`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, f64>,
    pub histograms: BTreeMap<String, Vec<f64>>,
}

impl MetricsSnapshot {
    /// Render the replay metrics summary printed at exit.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.counters.is_empty() && self.gauges.is_empty() && self.histograms.is_empty() {
            out.push_str("No replay metrics collected.\n");
            return out;
        }

        out.push_str("\n## Replay metrics\n\n");
        for (key, value) in &self.counters {
            let _ = writeln!(out, "  {key}: {value}");
        }
        for (key, value) in &self.gauges {
            let _ = writeln!(out, "  {key}: {value:.0}");
        }
        for (key, values) in &self.histograms {
            if values.is_empty() {
                continue;
            }
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            #[allow(clippy::cast_precision_loss)]
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            let _ = writeln!(
                out,
                "  {key}: stacks={}, min={min:.0}, max={max:.0}, mean={mean:.2}",
                values.len()
            );
        }
        out
    }
}

type Store = Arc<RwLock<MetricsSnapshot>>;

/// A registered metric. One handle type backs counters, gauges and histograms.
struct CliMetric {
    key: String,
    store: Store,
}

impl CounterFn for CliMetric {
    fn increment(&self, value: u64) {
        *self.store.write().counters.entry(self.key.clone()).or_insert(0) += value;
    }

    fn absolute(&self, value: u64) {
        self.store.write().counters.insert(self.key.clone(), value);
    }
}

impl GaugeFn for CliMetric {
    fn increment(&self, value: f64) {
        *self.store.write().gauges.entry(self.key.clone()).or_insert(0.0) += value;
    }

    fn decrement(&self, value: f64) {
        *self.store.write().gauges.entry(self.key.clone()).or_insert(0.0) -= value;
    }

    fn set(&self, value: f64) {
        self.store.write().gauges.insert(self.key.clone(), value);
    }
}

impl HistogramFn for CliMetric {
    fn record(&self, value: f64) {
        self.store
            .write()
            .histograms
            .entry(self.key.clone())
            .or_default()
            .push(value);
    }
}

/// Recorder that keeps replay metrics in memory for a summary at exit.
#[derive(Default)]
pub struct CliRecorder {
    store: Store,
}

impl CliRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install this recorder as the global metrics recorder.
    ///
    /// Returns `None` if another recorder is already installed.
    #[must_use]
    pub fn install(self) -> Option<CliRecorderHandle> {
        let handle = self.handle();
        metrics::set_global_recorder(self).ok()?;
        Some(handle)
    }

    fn handle(&self) -> CliRecorderHandle {
        CliRecorderHandle {
            store: Arc::clone(&self.store),
        }
    }

    fn metric(&self, key: &Key) -> Arc<CliMetric> {
        Arc::new(CliMetric {
            key: metric_key(key),
            store: Arc::clone(&self.store),
        })
    }
}

fn metric_key(key: &Key) -> String {
    let labels: Vec<String> = key
        .labels()
        .map(|label| format!("{}={}", label.key(), label.value()))
        .collect();
    if labels.is_empty() {
        key.name().to_string()
    } else {
        format!("{}{{{}}}", key.name(), labels.join(","))
    }
}

impl Recorder for CliRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(self.metric(key))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(self.metric(key))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(self.metric(key))
    }
}

/// Read side of an installed [`CliRecorder`].
pub struct CliRecorderHandle {
    store: Store,
}

impl CliRecorderHandle {
    /// Copy of everything recorded so far.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.store.read().clone()
    }

    pub fn print_summary(&self) {
        print!("{}", self.store.read().render());
    }
}
