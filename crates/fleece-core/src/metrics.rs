//! Request and load telemetry
//!
//! [`MetricsRecorder`] is the injected observation sink used by the cache and
//! the orchestrator. [`PrometheusRecorder`] keeps everything in memory and
//! renders the Prometheus text exposition format for `/metrics`.

use dashmap::DashMap;
use std::fmt::Write;
use std::time::Duration;

use crate::cache::CacheStats;

pub const REQUESTS_TOTAL: &str = "hf_requests_total";
pub const INFERENCE_LATENCY: &str = "hf_inference_latency_seconds";
pub const MODEL_LOAD_TIME: &str = "hf_model_load_time_seconds";
pub const REQUEST_TOTAL_LATENCY: &str = "hf_request_total_latency_seconds";
pub const HANDLE_WAIT_TIME: &str = "fleece_handle_wait_seconds";

/// Default histogram buckets in seconds
const DEFAULT_BUCKETS: [f64; 15] = [
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0, 30.0,
];

/// Labels of the per-request counter
#[derive(Debug, Clone, Copy)]
pub struct RequestLabels<'a> {
    pub model_name: &'a str,
    pub task: &'a str,
    pub worker_pid: u32,
}

/// Passive observation sink. Implementations must not block.
pub trait MetricsRecorder: Send + Sync {
    /// Count one finished request with its HTTP status
    fn record_request(&self, labels: &RequestLabels<'_>, http_status: u16);

    /// Duration of an actual handle load (not a cache lookup)
    fn observe_load(&self, model_name: &str, task: &str, elapsed: Duration);

    /// Time a request spent obtaining its handle, hit or miss
    fn observe_handle_wait(&self, model_name: &str, task: &str, elapsed: Duration);

    /// Duration of the handle invocation
    fn observe_inference(&self, model_name: &str, task: &str, elapsed: Duration);

    /// End-to-end request duration
    fn observe_total(&self, model_name: &str, task: &str, elapsed: Duration);
}

/// Recorder that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl MetricsRecorder for NoopRecorder {
    fn record_request(&self, _labels: &RequestLabels<'_>, _http_status: u16) {}
    fn observe_load(&self, _model_name: &str, _task: &str, _elapsed: Duration) {}
    fn observe_handle_wait(&self, _model_name: &str, _task: &str, _elapsed: Duration) {}
    fn observe_inference(&self, _model_name: &str, _task: &str, _elapsed: Duration) {}
    fn observe_total(&self, _model_name: &str, _task: &str, _elapsed: Duration) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct RequestKey {
    model_name: String,
    task: String,
    worker_pid: u32,
    http_status: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct SeriesKey {
    metric: &'static str,
    model_name: String,
    task: String,
}

/// Cumulative histogram with fixed upper bounds
#[derive(Debug, Clone)]
struct Histogram {
    /// Non-cumulative count per bucket; the last slot is +Inf
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            counts: vec![0; DEFAULT_BUCKETS.len() + 1],
            sum: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, value: f64) {
        let index = DEFAULT_BUCKETS
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(DEFAULT_BUCKETS.len());
        self.counts[index] += 1;
        self.sum += value;
        self.count += 1;
    }
}

/// In-memory Prometheus registry
#[derive(Debug, Default)]
pub struct PrometheusRecorder {
    requests: DashMap<RequestKey, u64>,
    histograms: DashMap<SeriesKey, Histogram>,
}

impl PrometheusRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn observe(&self, metric: &'static str, model_name: &str, task: &str, elapsed: Duration) {
        let key = SeriesKey {
            metric,
            model_name: model_name.to_string(),
            task: task.to_string(),
        };
        self.histograms
            .entry(key)
            .or_insert_with(Histogram::new)
            .observe(elapsed.as_secs_f64());
    }

    /// Requests counted for (model, task, status) across all workers
    pub fn request_count(&self, model_name: &str, task: &str, http_status: u16) -> u64 {
        self.requests
            .iter()
            .filter(|entry| {
                let key = entry.key();
                key.model_name == model_name && key.task == task && key.http_status == http_status
            })
            .map(|entry| *entry.value())
            .sum()
    }

    /// Number of observations in a histogram series
    pub fn observation_count(&self, metric: &str, model_name: &str, task: &str) -> u64 {
        self.histograms
            .iter()
            .find(|entry| {
                let key = entry.key();
                key.metric == metric && key.model_name == model_name && key.task == task
            })
            .map(|entry| entry.value().count)
            .unwrap_or(0)
    }

    /// Render every series in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();

        let mut requests: Vec<(RequestKey, u64)> = self
            .requests
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        requests.sort();

        write_header(&mut out, REQUESTS_TOTAL, "Total number of inference requests", "counter");
        for (key, value) in &requests {
            let _ = writeln!(
                out,
                "{REQUESTS_TOTAL}{{model_name=\"{}\",task=\"{}\",worker_pid=\"{}\",http_status=\"{}\"}} {value}",
                escape_label(&key.model_name),
                escape_label(&key.task),
                key.worker_pid,
                key.http_status,
            );
        }

        let mut histograms: Vec<(SeriesKey, Histogram)> = self
            .histograms
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        histograms.sort_by(|a, b| a.0.cmp(&b.0));

        for (metric, help) in [
            (INFERENCE_LATENCY, "Inference latency in seconds for the pipeline execution itself"),
            (MODEL_LOAD_TIME, "Time taken to load a model pipeline object"),
            (REQUEST_TOTAL_LATENCY, "Total request handling latency in seconds"),
            (HANDLE_WAIT_TIME, "Time a request waited to obtain its pipeline, cached or loaded"),
        ] {
            write_header(&mut out, metric, help, "histogram");
            for (key, histogram) in histograms.iter().filter(|(key, _)| key.metric == metric) {
                write_histogram(&mut out, key, histogram);
            }
        }

        out
    }
}

impl MetricsRecorder for PrometheusRecorder {
    fn record_request(&self, labels: &RequestLabels<'_>, http_status: u16) {
        let key = RequestKey {
            model_name: labels.model_name.to_string(),
            task: labels.task.to_string(),
            worker_pid: labels.worker_pid,
            http_status,
        };
        *self.requests.entry(key).or_insert(0) += 1;
    }

    fn observe_load(&self, model_name: &str, task: &str, elapsed: Duration) {
        self.observe(MODEL_LOAD_TIME, model_name, task, elapsed);
    }

    fn observe_handle_wait(&self, model_name: &str, task: &str, elapsed: Duration) {
        self.observe(HANDLE_WAIT_TIME, model_name, task, elapsed);
    }

    fn observe_inference(&self, model_name: &str, task: &str, elapsed: Duration) {
        self.observe(INFERENCE_LATENCY, model_name, task, elapsed);
    }

    fn observe_total(&self, model_name: &str, task: &str, elapsed: Duration) {
        self.observe(REQUEST_TOTAL_LATENCY, model_name, task, elapsed);
    }
}

fn write_header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

fn write_histogram(out: &mut String, key: &SeriesKey, histogram: &Histogram) {
    let labels = format!(
        "model_name=\"{}\",task=\"{}\"",
        escape_label(&key.model_name),
        escape_label(&key.task)
    );

    let mut cumulative = 0;
    for (bound, count) in DEFAULT_BUCKETS.iter().zip(&histogram.counts) {
        cumulative += count;
        let _ = writeln!(out, "{}_bucket{{{labels},le=\"{bound}\"}} {cumulative}", key.metric);
    }
    let _ = writeln!(out, "{}_bucket{{{labels},le=\"+Inf\"}} {}", key.metric, histogram.count);
    let _ = writeln!(out, "{}_sum{{{labels}}} {}", key.metric, histogram.sum);
    let _ = writeln!(out, "{}_count{{{labels}}} {}", key.metric, histogram.count);
}

/// Render cache counters as Prometheus series
pub fn render_cache_stats(stats: &CacheStats, worker_pid: u32) -> String {
    let mut out = String::new();
    for (name, help, kind, value) in [
        ("fleece_cache_hits_total", "Pipeline cache hits", "counter", stats.hits),
        ("fleece_cache_misses_total", "Pipeline cache misses", "counter", stats.misses),
        ("fleece_cache_evictions_total", "Pipelines evicted for capacity", "counter", stats.evictions),
        ("fleece_cache_load_failures_total", "Pipeline loads that failed", "counter", stats.load_failures),
        ("fleece_cache_coalesced_total", "Lookups that joined an in-flight load", "counter", stats.coalesced),
        ("fleece_cache_size", "Pipelines currently cached", "gauge", stats.current_size as u64),
        ("fleece_cache_capacity", "Maximum cached pipelines", "gauge", stats.capacity as u64),
        ("fleece_cache_in_flight", "Pipeline loads currently running", "gauge", stats.in_flight as u64),
    ] {
        write_header(&mut out, name, help, kind);
        let _ = writeln!(out, "{name}{{worker_pid=\"{worker_pid}\"}} {value}");
    }
    out
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> RequestLabels<'static> {
        RequestLabels {
            model_name: "gpt2",
            task: "text-generation",
            worker_pid: 42,
        }
    }

    #[test]
    fn test_request_counter_by_status() {
        let recorder = PrometheusRecorder::new();
        recorder.record_request(&labels(), 200);
        recorder.record_request(&labels(), 200);
        recorder.record_request(&labels(), 400);

        assert_eq!(recorder.request_count("gpt2", "text-generation", 200), 2);
        assert_eq!(recorder.request_count("gpt2", "text-generation", 400), 1);
        assert_eq!(recorder.request_count("gpt2", "text-generation", 500), 0);
    }

    #[test]
    fn test_render_counter_line() {
        let recorder = PrometheusRecorder::new();
        recorder.record_request(&labels(), 200);
        let text = recorder.render();

        assert!(text.contains("# TYPE hf_requests_total counter"));
        assert!(text.contains(
            "hf_requests_total{model_name=\"gpt2\",task=\"text-generation\",worker_pid=\"42\",http_status=\"200\"} 1"
        ));
    }

    #[test]
    fn test_histogram_buckets_are_cumulative() {
        let recorder = PrometheusRecorder::new();
        recorder.observe_inference("gpt2", "text-generation", Duration::from_millis(20));
        recorder.observe_inference("gpt2", "text-generation", Duration::from_secs(60));

        assert_eq!(recorder.observation_count(INFERENCE_LATENCY, "gpt2", "text-generation"), 2);
        let text = recorder.render();
        assert!(text.contains(
            "hf_inference_latency_seconds_bucket{model_name=\"gpt2\",task=\"text-generation\",le=\"0.025\"} 1"
        ));
        assert!(text.contains(
            "hf_inference_latency_seconds_bucket{model_name=\"gpt2\",task=\"text-generation\",le=\"30\"} 1"
        ));
        assert!(text.contains(
            "hf_inference_latency_seconds_bucket{model_name=\"gpt2\",task=\"text-generation\",le=\"+Inf\"} 2"
        ));
        assert!(text.contains(
            "hf_inference_latency_seconds_count{model_name=\"gpt2\",task=\"text-generation\"} 2"
        ));
    }

    #[test]
    fn test_label_values_are_escaped() {
        assert_eq!(escape_label("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
    }

    #[test]
    fn test_render_cache_stats() {
        let stats = CacheStats {
            hits: 3,
            misses: 2,
            capacity: 10,
            current_size: 2,
            ..CacheStats::default()
        };
        let text = render_cache_stats(&stats, 7);
        assert!(text.contains("fleece_cache_hits_total{worker_pid=\"7\"} 3"));
        assert!(text.contains("fleece_cache_size{worker_pid=\"7\"} 2"));
        assert!(text.contains("# TYPE fleece_cache_capacity gauge"));
    }
}
