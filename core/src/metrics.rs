use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
struct ScoringCounters {
    total_scorings: u64,
    not_found: u64,
    overall_sum: u64,
    latencies: VecDeque<u64>, // microseconds
}

/// In-process counters for score calculations. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ScoringMetrics {
    state: Arc<Mutex<MetricsState>>,
}

struct MetricsState {
    counters: ScoringCounters,
    max_history: usize,
}

impl Default for ScoringMetrics {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl ScoringMetrics {
    pub fn new(max_history: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MetricsState {
                counters: ScoringCounters::default(),
                max_history,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        // Counters stay usable even if a recording thread panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_scoring(&self, latency_us: u64, overall: u8) {
        let mut state = self.lock();
        let max_history = state.max_history;
        let counters = &mut state.counters;
        counters.total_scorings += 1;
        counters.overall_sum += u64::from(overall);
        counters.latencies.push_back(latency_us);
        if counters.latencies.len() > max_history {
            counters.latencies.pop_front();
        }
    }

    pub fn record_not_found(&self) {
        self.lock().counters.not_found += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.lock();
        let c = &state.counters;

        let mut sorted_latencies: Vec<u64> = c.latencies.iter().copied().collect();
        sorted_latencies.sort_unstable();

        let avg_overall = if c.total_scorings > 0 {
            c.overall_sum as f32 / c.total_scorings as f32
        } else {
            0.0
        };

        MetricsSnapshot {
            total_scorings: c.total_scorings,
            not_found: c.not_found,
            avg_overall,
            p50: percentile(&sorted_latencies, 50.0),
            p95: percentile(&sorted_latencies, 95.0),
            p99: percentile(&sorted_latencies, 99.0),
            history_count: c.latencies.len(),
        }
    }
}

fn percentile(sorted: &[u64], p: f32) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((p / 100.0) * (sorted.len() as f32)).ceil() as usize;
    sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub total_scorings: u64,
    pub not_found: u64,
    pub avg_overall: f32,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub history_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_are_ordered() {
        let metrics = ScoringMetrics::new(100);
        for latency in 1..=100 {
            metrics.record_scoring(latency, 50);
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_scorings, 100);
        assert_eq!(snapshot.p50, 50);
        assert_eq!(snapshot.p95, 95);
        assert_eq!(snapshot.p99, 99);
        assert_eq!(snapshot.avg_overall, 50.0);
    }

    #[test]
    fn history_is_bounded() {
        let metrics = ScoringMetrics::new(3);
        for latency in [10, 20, 30, 40] {
            metrics.record_scoring(latency, 80);
        }
        metrics.record_not_found();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.history_count, 3);
        assert_eq!(snapshot.total_scorings, 4);
        assert_eq!(snapshot.not_found, 1);
        assert_eq!(snapshot.p50, 30);
    }
}
