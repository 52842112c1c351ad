use log::info;
use std::sync::Mutex;

/// Counters for one simulation run.
pub struct MetricsRecorder {
    inner: Mutex<SessionMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionMetrics {
    pub steps: u64,
    pub skipped_entities: u64,
    pub control_failures: u64,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SessionMetrics::default()),
        }
    }

    pub fn record_step(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.steps += 1;
        }
    }

    pub fn record_skipped_entity(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.skipped_entities += 1;
        }
    }

    pub fn record_control_failure(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.control_failures += 1;
        }
    }

    pub fn snapshot(&self) -> SessionMetrics {
        self.inner.lock().map(|m| *m).unwrap_or_default()
    }

    /// Logs the run summary and starts the counters over.
    pub fn finish(&self) -> SessionMetrics {
        let summary = match self.inner.lock() {
            Ok(mut metrics) => std::mem::take(&mut *metrics),
            Err(_) => SessionMetrics::default(),
        };
        info!(
            "session finished: {} steps, {} skipped entity queries, {} control failures",
            summary.steps, summary.skipped_entities, summary.control_failures
        );
        summary
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
