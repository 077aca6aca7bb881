//! Progress reporting
//!
//! The coordinator calls the sink while holding its transfer-state lock, so a
//! sink never sees two calls at once and always sees non-decreasing byte counts.

use crate::models::ProgressEvent;
use tracing::info;

/// Receiver of cumulative upload progress
///
/// Only `Send` is required: calls are serialized by the coordinator.
pub trait ProgressSink: Send {
    fn on_progress(&mut self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: FnMut(ProgressEvent) + Send,
{
    fn on_progress(&mut self, event: ProgressEvent) {
        self(event)
    }
}

/// Sink that logs progress through `tracing`, at most once per `step_percent`
pub struct LogProgressSink {
    step_percent: f64,
    next_report: f64,
}

impl LogProgressSink {
    pub fn new(step_percent: f64) -> Self {
        let step_percent = if step_percent > 0.0 { step_percent } else { 10.0 };
        LogProgressSink {
            step_percent,
            next_report: 0.0,
        }
    }

    /// Whether the next event at `percent` would be logged
    fn due(&self, percent: f64) -> bool {
        percent >= self.next_report
    }
}

impl Default for LogProgressSink {
    fn default() -> Self {
        Self::new(10.0)
    }
}

impl ProgressSink for LogProgressSink {
    fn on_progress(&mut self, event: ProgressEvent) {
        let percent = event.percent();
        if !self.due(percent) {
            return;
        }

        info!(
            "Uploaded {} / {} bytes ({:.1}%)",
            event.bytes_uploaded, event.total_size, percent
        );
        while self.next_report <= percent {
            self.next_report += self.step_percent;
        }
    }
}
