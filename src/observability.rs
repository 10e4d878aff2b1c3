use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{info, warn};

/// Workflow engine counters
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub runs_started: AtomicU64,
    pub runs_succeeded: AtomicU64,
    pub runs_failed: AtomicU64,
    pub runs_skipped: AtomicU64,
    pub runs_cancelled: AtomicU64,
    pub node_retries: AtomicU64,
    pub delegation_polls: AtomicU64,
    pub checkpoint_failures: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_succeeded(&self) {
        self.runs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_skipped(&self) {
        self.runs_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_cancelled(&self) {
        self.runs_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_node_retry(&self) {
        self.node_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll(&self) {
        self.delegation_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkpoint_failure(&self) {
        self.checkpoint_failures.fetch_add(1, Ordering::Relaxed);
        warn!("Checkpoint write failed");
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> EngineStats {
        EngineStats {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_succeeded: self.runs_succeeded.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            runs_skipped: self.runs_skipped.load(Ordering::Relaxed),
            runs_cancelled: self.runs_cancelled.load(Ordering::Relaxed),
            node_retries: self.node_retries.load(Ordering::Relaxed),
            delegation_polls: self.delegation_polls.load(Ordering::Relaxed),
            checkpoint_failures: self.checkpoint_failures.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            runs_started = stats.runs_started,
            runs_succeeded = stats.runs_succeeded,
            runs_failed = stats.runs_failed,
            runs_skipped = stats.runs_skipped,
            runs_cancelled = stats.runs_cancelled,
            node_retries = stats.node_retries,
            delegation_polls = stats.delegation_polls,
            checkpoint_failures = stats.checkpoint_failures,
            cache_hits = stats.cache_hits,
            cache_misses = stats.cache_misses,
            "Workflow engine metrics"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub runs_started: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub runs_skipped: u64,
    pub runs_cancelled: u64,
    pub node_retries: u64,
    pub delegation_polls: u64,
    pub checkpoint_failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Global metrics instance
static ENGINE_METRICS: std::sync::LazyLock<EngineMetrics> =
    std::sync::LazyLock::new(EngineMetrics::new);

pub fn engine_metrics() -> &'static EngineMetrics {
    &ENGINE_METRICS
}

/// Time a node execution and log its duration
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        info!(
            operation = %self.operation,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
    }
}
