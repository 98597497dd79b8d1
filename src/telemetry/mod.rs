//! Telemetry subsystem.
//!
//! Counts kernel launches, transfers and builds, and keeps a launch latency
//! histogram. With the `telemetry` feature off the same API records nothing.

#[cfg(feature = "telemetry")]
pub mod metrics;

#[cfg(feature = "telemetry")]
pub mod export;

#[cfg(feature = "telemetry")]
pub use metrics::{Metrics, MetricsSnapshot};

#[cfg(feature = "telemetry")]
pub use export::{ConsoleExporter, JsonExporter, MetricsExporter};

// Stub implementations when telemetry is disabled
#[cfg(not(feature = "telemetry"))]
pub mod metrics {
    #[derive(Debug, Clone, Default)]
    pub struct Metrics;

    impl Metrics {
        pub fn new() -> Self { Self }
        pub fn record_kernel_launch(&self, _: u64, _: u64) {}
        pub fn record_kernel_failure(&self) {}
        pub fn record_read(&self, _: usize) {}
        pub fn record_write(&self, _: usize) {}
        pub fn record_build(&self, _: usize) {}
        pub fn record_steal(&self) {}
        pub fn record_worker_panic(&self) {}
        pub fn reset(&self) {}
        pub fn snapshot(&self) -> MetricsSnapshot { MetricsSnapshot::default() }
    }

    #[derive(Debug, Clone, Default)]
    pub struct MetricsSnapshot {
        pub kernels_launched: u64,
        pub work_groups_executed: u64,
        pub kernel_failures: u64,
        pub transfers: u64,
        pub bytes_read: u64,
        pub bytes_written: u64,
        pub builds: u64,
        pub build_failures: u64,
    }
}

#[cfg(not(feature = "telemetry"))]
pub use metrics::{Metrics, MetricsSnapshot};
