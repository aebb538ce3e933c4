//! In-process Saga Metrics
//!
//! Per-saga-type counters and duration percentiles over a sliding window
//! (default last 1,000 samples). Percentiles are recomputed on each sample
//! so a snapshot is always current. No exporter wiring here; callers pull
//! snapshots.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Aggregated metrics for one saga type.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SagaTypeMetrics {
    pub execution_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub compensation_count: u64,
    pub compensation_failure_count: u64,
    pub avg_duration_ms: f64,
    pub p50_duration_ms: f64,
    pub p95_duration_ms: f64,
    pub p99_duration_ms: f64,
}

struct TypeWindow {
    metrics: SagaTypeMetrics,
    durations: VecDeque<f64>,
}

impl TypeWindow {
    fn new() -> Self {
        Self {
            metrics: SagaTypeMetrics::default(),
            durations: VecDeque::new(),
        }
    }

    fn record(&mut self, duration_ms: f64, window: usize) {
        if self.durations.len() == window {
            self.durations.pop_front();
        }
        self.durations.push_back(duration_ms);

        let mut sorted: Vec<f64> = self.durations.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let sum: f64 = sorted.iter().sum();
        self.metrics.avg_duration_ms = sum / sorted.len() as f64;
        self.metrics.p50_duration_ms = percentile(&sorted, 0.50);
        self.metrics.p95_duration_ms = percentile(&sorted, 0.95);
        self.metrics.p99_duration_ms = percentile(&sorted, 0.99);
    }
}

/// Nearest-rank percentile over an ascending-sorted slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((sorted.len() as f64) * q).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Process-wide collector. Initialized once at startup and shared by
/// coordinators.
pub struct SagaMetrics {
    window: usize,
    inner: Mutex<HashMap<String, TypeWindow>>,
}

impl SagaMetrics {
    pub const DEFAULT_WINDOW: usize = 1_000;

    pub fn new() -> Self {
        Self::with_window(Self::DEFAULT_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            window: window.max(1),
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_execution(&self, saga_type: &str, duration: Duration, success: bool) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let entry = inner
            .entry(saga_type.to_string())
            .or_insert_with(TypeWindow::new);
        entry.metrics.execution_count += 1;
        if success {
            entry.metrics.success_count += 1;
        } else {
            entry.metrics.failure_count += 1;
        }
        entry.record(duration.as_secs_f64() * 1000.0, self.window);
    }

    pub fn record_compensation(&self, saga_type: &str, failed: bool) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let entry = inner
            .entry(saga_type.to_string())
            .or_insert_with(TypeWindow::new);
        entry.metrics.compensation_count += 1;
        if failed {
            entry.metrics.compensation_failure_count += 1;
        }
    }

    pub fn snapshot(&self) -> HashMap<String, SagaTypeMetrics> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .iter()
            .map(|(k, v)| (k.clone(), v.metrics.clone()))
            .collect()
    }
}

impl Default for SagaMetrics {
    fn default() -> Self {
        Self::new()
    }
}
