//! Metrics collection for authorization service observability

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Service metrics snapshot
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    /// Total number of authorization checks
    pub total_checks: u64,

    /// Number of allowed decisions
    pub allowed_decisions: u64,

    /// Number of denied decisions
    pub denied_decisions: u64,

    /// Lookups answered by the local tier
    pub l1_hits: u64,

    /// Lookups answered by the shared tier
    pub l2_hits: u64,

    /// Lookups that fell through to the resolver
    pub cache_misses: u64,

    /// Shared-tier failures absorbed on the check path
    pub degraded_events: u64,

    /// Assignments rejected by separation of duty
    pub sod_rejections: u64,

    /// Sessions rejected for a stale epoch
    pub stale_tokens: u64,

    /// Latency percentiles
    pub latency_p50_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p99_ms: f64,

    /// Average latency
    pub avg_latency_ms: f64,

    /// Error count
    pub error_count: u64,
}

impl EngineMetrics {
    /// Fraction of lookups served by either cache tier
    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.l1_hits + self.l2_hits;
        let total = hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Calculate allow rate
    pub fn allow_rate(&self) -> f64 {
        let total = self.allowed_decisions + self.denied_decisions;
        if total == 0 {
            0.0
        } else {
            self.allowed_decisions as f64 / total as f64
        }
    }
}

/// Cache tier outcome fed to the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    L1Hit,
    L2Hit,
    Miss { degraded: bool },
}

/// Metrics collector
pub struct MetricsCollector {
    /// Metrics data
    metrics: Arc<RwLock<EngineMetrics>>,

    /// Latency samples for percentile calculation
    latency_samples: Arc<RwLock<Vec<f64>>>,

    /// Maximum samples to keep
    max_samples: usize,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::with_max_samples(10_000)
    }

    /// Create a collector keeping at most `max_samples` latency samples
    pub fn with_max_samples(max_samples: usize) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            metrics: Arc::new(RwLock::new(EngineMetrics::default())),
            latency_samples: Arc::new(RwLock::new(Vec::with_capacity(max_samples))),
            max_samples,
        }
    }

    /// Record which cache tier answered a lookup
    pub async fn record_cache(&self, outcome: CacheOutcome) {
        let mut metrics = self.metrics.write().await;
        match outcome {
            CacheOutcome::L1Hit => metrics.l1_hits += 1,
            CacheOutcome::L2Hit => metrics.l2_hits += 1,
            CacheOutcome::Miss { degraded } => {
                metrics.cache_misses += 1;
                if degraded {
                    metrics.degraded_events += 1;
                }
            }
        }
    }

    /// Record an authorization decision
    pub async fn record_decision(&self, allowed: bool) {
        let mut metrics = self.metrics.write().await;
        metrics.total_checks += 1;

        if allowed {
            metrics.allowed_decisions += 1;
        } else {
            metrics.denied_decisions += 1;
        }
    }

    /// Record a SoD rejection
    pub async fn record_sod_rejection(&self) {
        self.metrics.write().await.sod_rejections += 1;
    }

    /// Record a stale session token
    pub async fn record_stale_token(&self) {
        self.metrics.write().await.stale_tokens += 1;
    }

    /// Record an error
    pub async fn record_error(&self) {
        self.metrics.write().await.error_count += 1;
    }

    /// Record check latency
    pub async fn record_latency(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut samples = self.latency_samples.write().await;
        samples.push(latency_ms);

        // Keep only recent samples
        if samples.len() > self.max_samples {
            let excess = samples.len() - self.max_samples;
            samples.drain(0..excess);
        }

        let mut sorted = samples.clone();
        drop(samples);
        sorted.sort_by(f64::total_cmp);

        let mut metrics = self.metrics.write().await;
        metrics.avg_latency_ms = sorted.iter().sum::<f64>() / sorted.len() as f64;
        metrics.latency_p50_ms = Self::percentile(&sorted, 0.50);
        metrics.latency_p90_ms = Self::percentile(&sorted, 0.90);
        metrics.latency_p99_ms = Self::percentile(&sorted, 0.99);
    }

    /// Get current metrics snapshot
    pub async fn get_metrics(&self) -> EngineMetrics {
        self.metrics.read().await.clone()
    }

    /// Reset all metrics
    pub async fn reset(&self) {
        *self.metrics.write().await = EngineMetrics::default();
        self.latency_samples.write().await.clear();
    }

    /// Calculate percentile from sorted data
    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = ((sorted.len() as f64) * p) as usize;
        let idx = idx.min(sorted.len() - 1);
        sorted[idx]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_decision() {
        let collector = MetricsCollector::new();

        collector.record_decision(true).await;
        collector.record_decision(false).await;
        collector.record_decision(true).await;

        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.total_checks, 3);
        assert_eq!(metrics.allowed_decisions, 2);
        assert_eq!(metrics.denied_decisions, 1);
        assert!((metrics.allow_rate() - 0.666).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_record_cache() {
        let collector = MetricsCollector::new();

        collector.record_cache(CacheOutcome::L1Hit).await;
        collector.record_cache(CacheOutcome::L2Hit).await;
        collector.record_cache(CacheOutcome::Miss { degraded: true }).await;
        collector.record_cache(CacheOutcome::Miss { degraded: false }).await;

        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.l1_hits, 1);
        assert_eq!(metrics.l2_hits, 1);
        assert_eq!(metrics.cache_misses, 2);
        assert_eq!(metrics.degraded_events, 1);
        assert!((metrics.cache_hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_record_latency() {
        let collector = MetricsCollector::new();

        collector.record_latency(Duration::from_millis(5)).await;
        collector.record_latency(Duration::from_millis(10)).await;
        collector.record_latency(Duration::from_millis(15)).await;

        let metrics = collector.get_metrics().await;
        assert!((metrics.avg_latency_ms - 10.0).abs() < 1.0);
        assert!(metrics.latency_p50_ms > 0.0);
        assert!(metrics.latency_p99_ms >= metrics.latency_p50_ms);
    }

    #[tokio::test]
    async fn test_sample_window_bounded() {
        let collector = MetricsCollector::with_max_samples(3);
        for ms in [100, 1, 1, 1] {
            collector.record_latency(Duration::from_millis(ms)).await;
        }

        let metrics = collector.get_metrics().await;
        assert!((metrics.avg_latency_ms - 1.0).abs() < 0.1);
    }

    #[tokio::test]
    async fn test_reset() {
        let collector = MetricsCollector::new();

        collector.record_decision(true).await;
        collector.record_sod_rejection().await;
        collector.record_stale_token().await;

        collector.reset().await;

        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.total_checks, 0);
        assert_eq!(metrics.sod_rejections, 0);
        assert_eq!(metrics.stale_tokens, 0);
    }
}
