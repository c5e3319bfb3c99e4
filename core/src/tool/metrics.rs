//! Per-tool execution metrics

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Aggregated counters for one tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolMetrics {
    /// Total executions
    pub executions: u64,
    /// Executions that ended in failure
    pub failures: u64,
    /// Total retries across all executions
    pub retries: u64,
    /// Retried executions that eventually succeeded
    pub retry_successes: u64,
    /// Cumulative execution time in milliseconds
    pub total_duration_ms: u64,
}

impl ToolMetrics {
    /// Fraction of executions that succeeded
    pub fn success_rate(&self) -> f64 {
        if self.executions == 0 {
            return 0.0;
        }
        (self.executions - self.failures) as f64 / self.executions as f64
    }

    /// Mean execution duration in milliseconds
    pub fn average_duration_ms(&self) -> f64 {
        if self.executions == 0 {
            return 0.0;
        }
        self.total_duration_ms as f64 / self.executions as f64
    }
}

/// Registry of metrics for all tools, updated under a short lock
pub struct MetricsRegistry {
    inner: Mutex<HashMap<String, ToolMetrics>>,
}

impl MetricsRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Record one finished execution
    pub fn record(&self, tool: &str, success: bool, duration: Duration, attempts: u32) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let entry = map.entry(tool.to_string()).or_default();
        entry.executions += 1;
        if !success {
            entry.failures += 1;
        }
        let retries = attempts.saturating_sub(1) as u64;
        entry.retries += retries;
        if success && retries > 0 {
            entry.retry_successes += 1;
        }
        entry.total_duration_ms += duration.as_millis() as u64;
    }

    /// Snapshot of one tool's counters
    pub fn get(&self, tool: &str) -> Option<ToolMetrics> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(tool)
            .cloned()
    }

    /// Snapshot of all counters
    pub fn snapshot(&self) -> HashMap<String, ToolMetrics> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
