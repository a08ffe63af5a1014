//! Per-plugin runtime counters.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Live counters shared by the dispatcher, supervisor and health monitor.
#[derive(Debug, Default)]
pub struct PluginStats {
    executions: AtomicU64,
    errors: AtomicU64,
    total_execution_time_ns: AtomicU64,
    scheduled_task_errors: AtomicU64,
    crash_count: AtomicU64,
    last_execution_at: Mutex<Option<DateTime<Utc>>>,
    last_error_text: Mutex<Option<String>>,
}

/// Point-in-time copy of [`PluginStats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub executions: u64,
    pub errors: u64,
    pub total_execution_time_ns: u64,
    pub avg_execution_time_ms: u64,
    pub scheduled_task_errors: u64,
    pub crash_count: u64,
    pub last_execution_at: Option<DateTime<Utc>>,
    pub last_error_text: Option<String>,
}

impl StatsSnapshot {
    /// `errors / max(executions, 1)`.
    pub fn error_rate(&self) -> f64 {
        self.errors as f64 / self.executions.max(1) as f64
    }
}

impl PluginStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a successful handler run.
    pub fn record_success(&self, elapsed: std::time::Duration, at: DateTime<Utc>) {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.total_execution_time_ns.fetch_add(nanos, Ordering::SeqCst);
        *self.last_execution_at.lock() = Some(at);
    }

    /// Count a failed handler run; returns the error total after the increment.
    pub fn record_failure(&self, error: &str, crashed: bool, at: DateTime<Utc>) -> u64 {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let errors = self.errors.fetch_add(1, Ordering::SeqCst) + 1;
        if crashed {
            self.crash_count.fetch_add(1, Ordering::SeqCst);
        }
        *self.last_execution_at.lock() = Some(at);
        *self.last_error_text.lock() = Some(error.to_string());
        errors
    }

    pub fn record_task_error(&self, error: &str) {
        self.scheduled_task_errors.fetch_add(1, Ordering::SeqCst);
        *self.last_error_text.lock() = Some(error.to_string());
    }

    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let executions = self.executions.load(Ordering::SeqCst);
        let total_execution_time_ns = self.total_execution_time_ns.load(Ordering::SeqCst);
        let avg_ns = if executions == 0 { 0 } else { total_execution_time_ns / executions };
        StatsSnapshot {
            executions,
            errors: self.errors.load(Ordering::SeqCst),
            total_execution_time_ns,
            avg_execution_time_ms: avg_ns / 1_000_000,
            scheduled_task_errors: self.scheduled_task_errors.load(Ordering::SeqCst),
            crash_count: self.crash_count.load(Ordering::SeqCst),
            last_execution_at: *self.last_execution_at.lock(),
            last_error_text: self.last_error_text.lock().clone(),
        }
    }
}
