//! Progress accounting for long-running operations.
//!
//! Workers bump lock-free counters in a shared [`Stats`]; a reporter task
//! samples them on a fixed interval and hands snapshots to a
//! [`ProgressSink`], so reporting cost does not scale with chunk count.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared counters updated by pipeline workers.
#[derive(Debug)]
pub struct Stats {
    started: Instant,
    files: AtomicU64,
    directories: AtomicU64,
    chunks: AtomicU64,
    bytes: AtomicU64,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    /// Zeroed counters; elapsed time starts now.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            files: AtomicU64::new(0),
            directories: AtomicU64::new(0),
            chunks: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    /// Count one completed file.
    pub fn add_file(&self) {
        self.files.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one created directory.
    pub fn add_directory(&self) {
        self.directories.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one written chunk of `bytes` bytes.
    pub fn add_chunk(&self, bytes: u64) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Current counter values. Throughput is left at zero.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            files: self.files.load(Ordering::Relaxed),
            directories: self.directories.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
            bytes_per_sec: 0.0,
        }
    }
}

/// Point-in-time view of [`Stats`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatsSnapshot {
    /// Files completed.
    pub files: u64,
    /// Directories created.
    pub directories: u64,
    /// Chunks written.
    pub chunks: u64,
    /// Payload bytes written.
    pub bytes: u64,
    /// Time since the counters were created.
    pub elapsed: Duration,
    /// Moving-average throughput over the last few samples.
    pub bytes_per_sec: f64,
}

/// Receives progress snapshots.
pub trait ProgressSink: Send + Sync {
    /// Called at most once per reporting interval, plus once at the end.
    fn report(&self, snapshot: &StatsSnapshot);
}

/// Logs snapshots at `info` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&self, s: &StatsSnapshot) {
        info!(
            files = s.files,
            directories = s.directories,
            chunks = s.chunks,
            bytes = s.bytes,
            mib_per_sec = s.bytes_per_sec / (1024.0 * 1024.0),
            "progress"
        );
    }
}

/// Byte-rate moving average over the most recent samples.
#[derive(Debug)]
pub(crate) struct Throughput {
    samples: VecDeque<(Instant, u64)>,
    window: usize,
}

impl Throughput {
    pub(crate) fn new(window: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(window + 1),
            window: window.max(1),
        }
    }

    /// Record the running byte total at `at` and return the current rate.
    pub(crate) fn sample(&mut self, at: Instant, total_bytes: u64) -> f64 {
        self.samples.push_back((at, total_bytes));
        while self.samples.len() > self.window + 1 {
            self.samples.pop_front();
        }
        let (Some(&(t0, b0)), Some(&(t1, b1))) = (self.samples.front(), self.samples.back())
        else {
            return 0.0;
        };
        let secs = t1.saturating_duration_since(t0).as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        b1.saturating_sub(b0) as f64 / secs
    }
}

/// Report `stats` to `sink` every `interval` until `stop` fires, then once more.
pub(crate) fn spawn_reporter(
    stats: Arc<Stats>,
    sink: Arc<dyn ProgressSink>,
    interval: Duration,
    window: usize,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let mut rate = Throughput::new(window);
        loop {
            let done = tokio::select! {
                _ = stop.cancelled() => true,
                _ = ticker.tick() => false,
            };
            let mut snapshot = stats.snapshot();
            snapshot.bytes_per_sec = rate.sample(Instant::now(), snapshot.bytes);
            sink.report(&snapshot);
            if done {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<StatsSnapshot>>);

    impl ProgressSink for Collect {
        fn report(&self, snapshot: &StatsSnapshot) {
            self.0.lock().expect("lock poisoned").push(*snapshot);
        }
    }

    #[test]
    fn test_stats_counters() {
        let stats = Stats::new();
        stats.add_file();
        stats.add_directory();
        stats.add_chunk(100);
        stats.add_chunk(50);
        let s = stats.snapshot();
        assert_eq!((s.files, s.directories, s.chunks, s.bytes), (1, 1, 2, 150));
    }

    #[test]
    fn test_throughput_moving_average() {
        let start = Instant::now();
        let mut rate = Throughput::new(2);
        assert_eq!(rate.sample(start, 0), 0.0);
        let r = rate.sample(start + Duration::from_secs(1), 1000);
        assert!((r - 1000.0).abs() < 1e-6);
        rate.sample(start + Duration::from_secs(2), 2000);
        // Window of two intervals: the first sample is dropped now.
        let r = rate.sample(start + Duration::from_secs(3), 5000);
        assert!((r - 2000.0).abs() < 1e-6, "got {r}");
    }

    #[tokio::test]
    #[ntest::timeout(5000)]
    async fn test_reporter_reports_final_snapshot() {
        let stats = Arc::new(Stats::new());
        let sink = Arc::new(Collect::default());
        let stop = CancellationToken::new();
        let handle = spawn_reporter(
            stats.clone(),
            sink.clone(),
            Duration::from_millis(10),
            3,
            stop.clone(),
        );

        stats.add_chunk(42);
        tokio::time::sleep(Duration::from_millis(35)).await;
        stop.cancel();
        handle.await.unwrap();

        let reports = sink.0.lock().unwrap();
        assert!(reports.len() >= 2, "interval reports plus the final one");
        assert_eq!(reports.last().unwrap().bytes, 42);
    }
}
