//! Runtime counters and the kernel launch latency histogram.

use hdrhistogram::Histogram;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics shared by every device of one runtime.
#[derive(Debug)]
pub struct Metrics {
    kernels_launched: AtomicU64,
    work_groups_executed: AtomicU64,
    kernel_failures: AtomicU64,

    transfers: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,

    builds: AtomicU64,
    build_failures: AtomicU64,

    steals: AtomicU64,
    worker_panics: AtomicU64,

    // kernel execution time on the device pool, nanoseconds
    launch_latency: RwLock<Option<Histogram<u64>>>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        // 3 significant figures, max one hour in nanoseconds
        let histogram = Histogram::new_with_max(3_600_000_000_000, 3).ok();

        Self {
            kernels_launched: AtomicU64::new(0),
            work_groups_executed: AtomicU64::new(0),
            kernel_failures: AtomicU64::new(0),
            transfers: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            builds: AtomicU64::new(0),
            build_failures: AtomicU64::new(0),
            steals: AtomicU64::new(0),
            worker_panics: AtomicU64::new(0),
            launch_latency: RwLock::new(histogram),
            start_time: Instant::now(),
        }
    }

    pub fn record_kernel_launch(&self, work_groups: u64, latency_ns: u64) {
        self.kernels_launched.fetch_add(1, Ordering::Relaxed);
        self.work_groups_executed
            .fetch_add(work_groups, Ordering::Relaxed);

        if let Some(mut guard) = self.launch_latency.try_write() {
            if let Some(hist) = guard.as_mut() {
                let _ = hist.record(latency_ns.max(1));
            }
        }
    }

    pub fn record_kernel_failure(&self) {
        self.kernel_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self, bytes: usize) {
        self.transfers.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: usize) {
        self.transfers.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_build(&self, failed_devices: usize) {
        self.builds.fetch_add(1, Ordering::Relaxed);
        if failed_devices > 0 {
            self.build_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_steal(&self) {
        self.steals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_panic(&self) {
        self.worker_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let guard = self.launch_latency.read();
        let (avg, p50, p99, max) = match guard.as_ref() {
            Some(h) if h.len() > 0 => (
                h.mean() as u64,
                h.value_at_quantile(0.50),
                h.value_at_quantile(0.99),
                h.max(),
            ),
            _ => (0, 0, 0, 0),
        };

        MetricsSnapshot {
            uptime: self.start_time.elapsed(),
            kernels_launched: self.kernels_launched.load(Ordering::Relaxed),
            work_groups_executed: self.work_groups_executed.load(Ordering::Relaxed),
            kernel_failures: self.kernel_failures.load(Ordering::Relaxed),
            transfers: self.transfers.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            builds: self.builds.load(Ordering::Relaxed),
            build_failures: self.build_failures.load(Ordering::Relaxed),
            steals: self.steals.load(Ordering::Relaxed),
            worker_panics: self.worker_panics.load(Ordering::Relaxed),
            avg_launch_latency_ns: avg,
            p50_launch_latency_ns: p50,
            p99_launch_latency_ns: p99,
            max_launch_latency_ns: max,
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.kernels_launched,
            &self.work_groups_executed,
            &self.kernel_failures,
            &self.transfers,
            &self.bytes_read,
            &self.bytes_written,
            &self.builds,
            &self.build_failures,
            &self.steals,
            &self.worker_panics,
        ] {
            counter.store(0, Ordering::Relaxed);
        }

        if let Some(hist) = self.launch_latency.write().as_mut() {
            hist.reset();
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub uptime: std::time::Duration,
    pub kernels_launched: u64,
    pub work_groups_executed: u64,
    pub kernel_failures: u64,
    pub transfers: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub builds: u64,
    pub build_failures: u64,
    pub steals: u64,
    pub worker_panics: u64,
    pub avg_launch_latency_ns: u64,
    pub p50_launch_latency_ns: u64,
    pub p99_launch_latency_ns: u64,
    pub max_launch_latency_ns: u64,
}

impl MetricsSnapshot {
    pub fn launches_per_second(&self) -> f64 {
        let seconds = self.uptime.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        self.kernels_launched as f64 / seconds
    }

    pub fn groups_per_launch(&self) -> f64 {
        if self.kernels_launched == 0 {
            return 0.0;
        }
        self.work_groups_executed as f64 / self.kernels_launched as f64
    }
}
