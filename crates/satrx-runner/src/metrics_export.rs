//! Metrics export for simulation results.
//!
//! [`InMemoryRecorder`] implements `metrics::Recorder`, keeps every value in
//! memory while the simulation runs and produces a [`MetricsSnapshot`] at
//! the end. Snapshots hold totals per metric name plus a per-carrier
//! breakdown taken from the `carrier` label, and can be written as JSON or
//! in Prometheus text format.

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ============================================================================
// Metrics Snapshot Types
// ============================================================================

/// Metric values of one carrier.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct CarrierMetrics {
    /// Counter metrics for this carrier.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<String, u64>,
    /// Gauge metrics for this carrier.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub gauges: BTreeMap<String, f64>,
    /// Histogram metrics for this carrier.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub histograms: BTreeMap<String, HistogramSummary>,
}

/// Collected metric data for export.
#[derive(Debug, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Wall-clock time the snapshot was taken.
    pub timestamp: String,
    /// Counters summed over all label sets.
    pub counters: BTreeMap<String, u64>,
    /// Gauges summed over all label sets.
    pub gauges: BTreeMap<String, f64>,
    /// Histograms merged over all label sets.
    pub histograms: BTreeMap<String, HistogramSummary>,
    /// Per-carrier breakdown.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub carriers: BTreeMap<String, CarrierMetrics>,
}

/// Summary statistics for a histogram metric.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct HistogramSummary {
    /// Number of samples recorded.
    pub count: u64,
    /// Sum of all samples.
    pub sum: f64,
    /// Minimum value.
    pub min: f64,
    /// Maximum value.
    pub max: f64,
    /// Mean value.
    pub mean: f64,
    /// 50th percentile.
    pub p50: f64,
    /// 90th percentile.
    pub p90: f64,
    /// 99th percentile.
    pub p99: f64,
}

impl HistogramSummary {
    fn empty() -> Self {
        HistogramSummary {
            count: 0,
            sum: 0.0,
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            p50: 0.0,
            p90: 0.0,
            p99: 0.0,
        }
    }
}

// ============================================================================
// Export Functions
// ============================================================================

/// Export metrics as JSON.
pub fn export_json<W: Write>(snapshot: &MetricsSnapshot, writer: &mut W) -> std::io::Result<()> {
    serde_json::to_writer_pretty(&mut *writer, snapshot)?;
    writeln!(writer)?;
    Ok(())
}

/// Export metrics in Prometheus text exposition format.
pub fn export_prometheus<W: Write>(snapshot: &MetricsSnapshot, writer: &mut W) -> std::io::Result<()> {
    for (name, value) in &snapshot.counters {
        let prom_name = prometheus_name(name);
        writeln!(writer, "# TYPE {} counter", prom_name)?;
        writeln!(writer, "{} {}", prom_name, value)?;
    }
    for (carrier, m) in &snapshot.carriers {
        for (name, value) in &m.counters {
            writeln!(writer, "{}{{carrier=\"{}\"}} {}", prometheus_name(name), carrier, value)?;
        }
    }

    for (name, value) in &snapshot.gauges {
        let prom_name = prometheus_name(name);
        writeln!(writer, "# TYPE {} gauge", prom_name)?;
        writeln!(writer, "{} {}", prom_name, value)?;
    }
    for (carrier, m) in &snapshot.carriers {
        for (name, value) in &m.gauges {
            writeln!(writer, "{}{{carrier=\"{}\"}} {}", prometheus_name(name), carrier, value)?;
        }
    }

    for (name, summary) in &snapshot.histograms {
        let prom_name = prometheus_name(name);
        writeln!(writer, "# TYPE {} summary", prom_name)?;
        write_summary(writer, &prom_name, None, summary)?;
    }
    for (carrier, m) in &snapshot.carriers {
        for (name, summary) in &m.histograms {
            write_summary(writer, &prometheus_name(name), Some(carrier), summary)?;
        }
    }
    Ok(())
}

fn prometheus_name(name: &str) -> String {
    name.replace('.', "_")
}

fn write_summary<W: Write>(
    writer: &mut W,
    prom_name: &str,
    carrier: Option<&str>,
    summary: &HistogramSummary,
) -> std::io::Result<()> {
    let (plain, prefix) = match carrier {
        Some(c) => (format!("{{carrier=\"{}\"}}", c), format!("carrier=\"{}\",", c)),
        None => (String::new(), String::new()),
    };
    writeln!(writer, "{}_count{} {}", prom_name, plain, summary.count)?;
    writeln!(writer, "{}_sum{} {}", prom_name, plain, summary.sum)?;
    for (q, v) in [("0.5", summary.p50), ("0.9", summary.p90), ("0.99", summary.p99)] {
        writeln!(writer, "{}{{{}quantile=\"{}\"}} {}", prom_name, prefix, q, v)?;
    }
    Ok(())
}

// ============================================================================
// In-Memory Recorder
// ============================================================================

#[derive(Debug, Default)]
struct CounterState {
    value: AtomicU64,
}

/// f64 bits in an AtomicU64.
#[derive(Debug, Default)]
struct GaugeState {
    value: AtomicU64,
}

impl GaugeState {
    fn set(&self, value: f64) {
        self.value.store(value.to_bits(), Ordering::Relaxed);
    }

    fn add(&self, delta: f64) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            });
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }
}

/// Maximum number of samples kept per histogram for percentiles.
const HISTOGRAM_RESERVOIR_SIZE: usize = 10_000;

#[derive(Debug)]
struct HistogramInner {
    reservoir: Vec<f64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    rng_state: u64,
}

/// Histogram samples kept with reservoir sampling (Algorithm R).
#[derive(Debug)]
struct HistogramState {
    inner: Mutex<HistogramInner>,
}

impl Default for HistogramState {
    fn default() -> Self {
        HistogramState {
            inner: Mutex::new(HistogramInner {
                reservoir: Vec::new(),
                count: 0,
                sum: 0.0,
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
                rng_state: 0x9E37_79B9_7F4A_7C15,
            }),
        }
    }
}

impl HistogramState {
    fn record(&self, value: f64) {
        let mut h = self.inner.lock();
        h.count += 1;
        h.sum += value;
        h.min = h.min.min(value);
        h.max = h.max.max(value);
        if h.reservoir.len() < HISTOGRAM_RESERVOIR_SIZE {
            h.reservoir.push(value);
        } else {
            // xorshift64
            let mut x = h.rng_state;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            h.rng_state = x;
            let j = (x % h.count) as usize;
            if j < HISTOGRAM_RESERVOIR_SIZE {
                h.reservoir[j] = value;
            }
        }
    }

    fn summary(&self) -> HistogramSummary {
        let h = self.inner.lock();
        if h.count == 0 {
            return HistogramSummary::empty();
        }
        let mut summary = summarize(&h.reservoir);
        summary.count = h.count;
        summary.sum = h.sum;
        summary.min = h.min;
        summary.max = h.max;
        summary.mean = h.sum / h.count as f64;
        summary
    }

    fn samples(&self) -> Vec<f64> {
        self.inner.lock().reservoir.clone()
    }
}

fn summarize(samples: &[f64]) -> HistogramSummary {
    if samples.is_empty() {
        return HistogramSummary::empty();
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let count = sorted.len() as u64;
    let sum: f64 = sorted.iter().sum();
    let percentile = |p: f64| {
        let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    };
    HistogramSummary {
        count,
        sum,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean: sum / count as f64,
        p50: percentile(50.0),
        p90: percentile(90.0),
        p99: percentile(99.0),
    }
}

#[derive(Debug, Clone)]
struct KeyMetadata {
    name: String,
    carrier: Option<String>,
}

fn key_to_string(key: &Key) -> String {
    let labels: Vec<String> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
    if labels.is_empty() {
        key.name().to_string()
    } else {
        format!("{}|{}", key.name(), labels.join(","))
    }
}

fn key_metadata(key: &Key) -> KeyMetadata {
    KeyMetadata {
        name: key.name().to_string(),
        carrier: key
            .labels()
            .find(|l| l.key() == "carrier")
            .map(|l| l.value().to_string()),
    }
}

#[derive(Debug, Default)]
struct RecorderState {
    counters: RwLock<BTreeMap<String, Arc<CounterState>>>,
    gauges: RwLock<BTreeMap<String, Arc<GaugeState>>>,
    histograms: RwLock<BTreeMap<String, Arc<HistogramState>>>,
    key_metadata: RwLock<BTreeMap<String, KeyMetadata>>,
}

impl RecorderState {
    fn get_or_create<T: Default>(
        &self,
        map: &RwLock<BTreeMap<String, Arc<T>>>,
        key: &Key,
    ) -> Arc<T> {
        let key_str = key_to_string(key);
        if let Some(existing) = map.read().get(&key_str) {
            return Arc::clone(existing);
        }
        self.key_metadata
            .write()
            .entry(key_str.clone())
            .or_insert_with(|| key_metadata(key));
        Arc::clone(map.write().entry(key_str).or_default())
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let metadata = self.key_metadata.read();
        let mut counters: BTreeMap<String, u64> = BTreeMap::new();
        let mut gauges: BTreeMap<String, f64> = BTreeMap::new();
        let mut samples: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut carriers: BTreeMap<String, CarrierMetrics> = BTreeMap::new();

        for (key_str, counter) in self.counters.read().iter() {
            let Some(meta) = metadata.get(key_str) else { continue };
            let value = counter.value.load(Ordering::Relaxed);
            *counters.entry(meta.name.clone()).or_insert(0) += value;
            if let Some(carrier) = &meta.carrier {
                *carriers
                    .entry(carrier.clone())
                    .or_default()
                    .counters
                    .entry(meta.name.clone())
                    .or_insert(0) += value;
            }
        }

        for (key_str, gauge) in self.gauges.read().iter() {
            let Some(meta) = metadata.get(key_str) else { continue };
            let value = gauge.get();
            *gauges.entry(meta.name.clone()).or_insert(0.0) += value;
            if let Some(carrier) = &meta.carrier {
                *carriers
                    .entry(carrier.clone())
                    .or_default()
                    .gauges
                    .entry(meta.name.clone())
                    .or_insert(0.0) += value;
            }
        }

        for (key_str, histogram) in self.histograms.read().iter() {
            let Some(meta) = metadata.get(key_str) else { continue };
            samples.entry(meta.name.clone()).or_default().extend(histogram.samples());
            if let Some(carrier) = &meta.carrier {
                carriers
                    .entry(carrier.clone())
                    .or_default()
                    .histograms
                    .insert(meta.name.clone(), histogram.summary());
            }
        }

        MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            counters,
            gauges,
            histograms: samples.into_iter().map(|(name, s)| (name, summarize(&s))).collect(),
            carriers,
        }
    }
}

/// In-memory metrics recorder that collects metrics for later export.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecorder {
    state: Arc<RecorderState>,
}

impl InMemoryRecorder {
    /// Create a new in-memory recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a snapshot of all current metric values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.state.snapshot()
    }
}

struct InMemoryCounter(Arc<CounterState>);

impl metrics::CounterFn for InMemoryCounter {
    fn increment(&self, value: u64) {
        self.0.value.fetch_add(value, Ordering::Relaxed);
    }

    fn absolute(&self, value: u64) {
        self.0.value.fetch_max(value, Ordering::Relaxed);
    }
}

struct InMemoryGauge(Arc<GaugeState>);

impl metrics::GaugeFn for InMemoryGauge {
    fn increment(&self, value: f64) {
        self.0.add(value);
    }

    fn decrement(&self, value: f64) {
        self.0.add(-value);
    }

    fn set(&self, value: f64) {
        self.0.set(value);
    }
}

struct InMemoryHistogram(Arc<HistogramState>);

impl metrics::HistogramFn for InMemoryHistogram {
    fn record(&self, value: f64) {
        self.0.record(value);
    }
}

impl Recorder for InMemoryRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        let state = self.state.get_or_create(&self.state.counters, key);
        Counter::from_arc(Arc::new(InMemoryCounter(state)))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        let state = self.state.get_or_create(&self.state.gauges, key);
        Gauge::from_arc(Arc::new(InMemoryGauge(state)))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        let state = self.state.get_or_create(&self.state.histograms, key);
        Histogram::from_arc(Arc::new(InMemoryHistogram(state)))
    }
}
