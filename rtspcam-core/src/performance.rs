//! Relay metrics
//!
//! Provides:
//! - Frame counters (relayed, published, failed, dropped, previewed)
//! - Rolling averages for convert and publish latency
//! - Input frame rate from arrival intervals

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Maximum number of samples to keep for rolling averages
const MAX_SAMPLES: usize = 120;

/// Relay statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RelayStats {
    /// Frames that entered the relay while connected
    pub frames_relayed: u64,
    /// Frames written to the frame channel
    pub frames_published: u64,
    /// Frames whose convert or publish step failed
    pub frames_failed: u64,
    /// Frames dropped before processing (disconnected, bad geometry)
    pub frames_dropped: u64,
    /// Frames delivered to the preview sink
    pub frames_previewed: u64,
    /// Average adjust + convert time in milliseconds
    pub convert_latency_ms: f64,
    /// Average channel publish time in milliseconds
    pub publish_latency_ms: f64,
    /// Input frame rate measured from arrivals
    pub fps: f64,
    /// Seconds since the metrics were created or reset
    pub uptime_secs: f64,
}

impl RelayStats {
    /// Format stats as a single line for logging
    pub fn format_line(&self) -> String {
        format!(
            "{} published | {} failed | {} dropped | convert {:.2}ms | publish {:.2}ms | {:.1}fps",
            self.frames_published,
            self.frames_failed,
            self.frames_dropped,
            self.convert_latency_ms,
            self.publish_latency_ms,
            self.fps
        )
    }
}

/// Rolling average calculator for timing data
#[derive(Debug)]
struct RollingAverage {
    samples: VecDeque<Duration>,
    max_samples: usize,
}

impl RollingAverage {
    fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    fn add(&mut self, duration: Duration) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
    }

    fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().sum();
        total / self.samples.len() as u32
    }

    fn average_ms(&self) -> f64 {
        self.average().as_secs_f64() * 1000.0
    }

    fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Thread-safe relay metrics
///
/// Written on the decode thread, read from the session.
#[derive(Debug)]
pub struct RelayMetrics {
    convert_latency: RwLock<RollingAverage>,
    publish_latency: RwLock<RollingAverage>,
    frame_intervals: RwLock<RollingAverage>,
    last_arrival: RwLock<Option<Instant>>,
    relayed: AtomicU64,
    published: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    previewed: AtomicU64,
    start_time: RwLock<Instant>,
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayMetrics {
    /// Create an empty collector
    pub fn new() -> Self {
        Self {
            convert_latency: RwLock::new(RollingAverage::new(MAX_SAMPLES)),
            publish_latency: RwLock::new(RollingAverage::new(MAX_SAMPLES)),
            frame_intervals: RwLock::new(RollingAverage::new(MAX_SAMPLES)),
            last_arrival: RwLock::new(None),
            relayed: AtomicU64::new(0),
            published: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            previewed: AtomicU64::new(0),
            start_time: RwLock::new(Instant::now()),
        }
    }

    /// A frame entered the relay; returns the relayed count
    pub fn record_relayed(&self, now: Instant) -> u64 {
        let mut last = self.last_arrival.write();
        if let Some(prev) = *last {
            self.frame_intervals.write().add(now.duration_since(prev));
        }
        *last = Some(now);
        self.relayed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Adjust + convert timing
    pub fn record_convert(&self, duration: Duration) {
        self.convert_latency.write().add(duration);
    }

    /// Successful publish and its timing
    pub fn record_published(&self, duration: Duration) {
        self.publish_latency.write().add(duration);
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Convert or publish failure; returns the failure count
    pub fn record_failed(&self) -> u64 {
        self.failed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Frame dropped before processing; returns the drop count
    pub fn record_dropped(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Preview delivered
    pub fn record_previewed(&self) {
        self.previewed.fetch_add(1, Ordering::Relaxed);
    }

    /// Frames published so far
    pub fn frames_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Frames dropped so far
    pub fn frames_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Current snapshot
    pub fn snapshot(&self) -> RelayStats {
        let interval = self.frame_intervals.read().average();
        let fps = if interval.as_secs_f64() > 0.0 {
            1.0 / interval.as_secs_f64()
        } else {
            0.0
        };

        RelayStats {
            frames_relayed: self.relayed.load(Ordering::Relaxed),
            frames_published: self.published.load(Ordering::Relaxed),
            frames_failed: self.failed.load(Ordering::Relaxed),
            frames_dropped: self.dropped.load(Ordering::Relaxed),
            frames_previewed: self.previewed.load(Ordering::Relaxed),
            convert_latency_ms: self.convert_latency.read().average_ms(),
            publish_latency_ms: self.publish_latency.read().average_ms(),
            fps,
            uptime_secs: self.start_time.read().elapsed().as_secs_f64(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.convert_latency.write().clear();
        self.publish_latency.write().clear();
        self.frame_intervals.write().clear();
        *self.last_arrival.write() = None;
        self.relayed.store(0, Ordering::Relaxed);
        self.published.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.previewed.store(0, Ordering::Relaxed);
        *self.start_time.write() = Instant::now();
    }
}
