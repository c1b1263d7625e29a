//! Progress and throughput estimation
//!
//! Purely observational: nothing here feeds back into scheduling.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

/// Shown for speed and ETA until the first byte is acknowledged
pub const NOT_YET_AVAILABLE: &str = "not yet available";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One progress observation, emitted after each part completion
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub bytes_acked: u64,
    pub total_bytes: u64,
    /// Bytes per second, `None` while not yet available
    pub speed_bytes_per_sec: Option<f64>,
    pub eta: Option<Duration>,
    pub speed: String,
    pub eta_description: String,
    pub parts_completed: u32,
    pub total_parts: u32,
}

/// Derives percent, speed and ETA from acknowledged bytes over elapsed time
#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    total_bytes: u64,
    total_parts: u32,
    started: Instant,
}

impl ProgressEstimator {
    pub fn new(total_bytes: u64, total_parts: u32) -> Self {
        Self::started_at(total_bytes, total_parts, Instant::now())
    }

    pub fn started_at(total_bytes: u64, total_parts: u32, started: Instant) -> Self {
        Self {
            total_bytes,
            total_parts,
            started,
        }
    }

    /// Estimate against the wall clock
    pub fn estimate(&self, bytes_acked: u64, parts_completed: u32) -> ProgressUpdate {
        self.estimate_after(bytes_acked, parts_completed, self.started.elapsed())
    }

    /// Estimate for a given elapsed time. Never yields NaN or negative values.
    pub fn estimate_after(
        &self,
        bytes_acked: u64,
        parts_completed: u32,
        elapsed: Duration,
    ) -> ProgressUpdate {
        let bytes_acked = bytes_acked.min(self.total_bytes);

        let percent = if self.total_bytes == 0 {
            100
        } else {
            (100.0 * bytes_acked as f64 / self.total_bytes as f64).round() as u8
        };

        let seconds = elapsed.as_secs_f64();
        let speed = if bytes_acked > 0 && seconds > 0.0 {
            Some(bytes_acked as f64 / seconds).filter(|s| s.is_finite() && *s > 0.0)
        } else {
            None
        };

        let eta = speed.and_then(|speed| {
            let remaining = (self.total_bytes - bytes_acked) as f64 / speed;
            Duration::try_from_secs_f64(remaining).ok()
        });

        ProgressUpdate {
            percent,
            bytes_acked,
            total_bytes: self.total_bytes,
            speed_bytes_per_sec: speed,
            eta,
            speed: speed
                .map(describe_speed)
                .unwrap_or_else(|| NOT_YET_AVAILABLE.to_string()),
            eta_description: eta
                .map(describe_eta)
                .unwrap_or_else(|| NOT_YET_AVAILABLE.to_string()),
            parts_completed: parts_completed.min(self.total_parts),
            total_parts: self.total_parts,
        }
    }
}

/// `12.34 MB/s`, in binary megabytes
pub fn describe_speed(bytes_per_sec: f64) -> String {
    format!("{:.2} MB/s", bytes_per_sec / BYTES_PER_MB)
}

/// Seconds below a minute, minutes below an hour, hours beyond
pub fn describe_eta(eta: Duration) -> String {
    let seconds = eta.as_secs_f64();
    if seconds < 60.0 {
        format!("{} seconds", seconds.ceil() as u64)
    } else if seconds < 3600.0 {
        format!("{} minutes", (seconds / 60.0).ceil() as u64)
    } else {
        format!("{:.1} hours", seconds / 3600.0)
    }
}

/// Publishes progress to the caller's channel, if any
///
/// Workers report concurrently; updates that arrive behind a newer one are
/// dropped so the channel only ever moves forward.
pub struct ProgressReporter {
    estimator: ProgressEstimator,
    sender: Option<UnboundedSender<ProgressUpdate>>,
    last_parts: Mutex<u32>,
}

impl ProgressReporter {
    pub fn new(estimator: ProgressEstimator, sender: Option<UnboundedSender<ProgressUpdate>>) -> Self {
        Self {
            estimator,
            sender,
            last_parts: Mutex::new(0),
        }
    }

    pub fn report(&self, bytes_acked: u64, parts_completed: u32) {
        let mut last = self.last_parts.lock();
        if parts_completed <= *last {
            return;
        }
        *last = parts_completed;

        let update = self.estimator.estimate(bytes_acked, parts_completed);
        tracing::debug!(
            percent = update.percent,
            parts_completed = update.parts_completed,
            total_parts = update.total_parts,
            speed = %update.speed,
            eta = %update.eta_description,
            "Upload progress"
        );

        if let Some(sender) = &self.sender {
            // A dropped receiver only means nobody is watching.
            let _ = sender.send(update);
        }
    }
}
