//! Metrics export to JSON files and the console.

use super::metrics::MetricsSnapshot;
use crate::error::{Error, Result};
use serde::Serialize;

pub trait MetricsExporter: Send + Sync {
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()>;
}

/// Writes each snapshot as pretty-printed JSON, replacing the file.
#[derive(Debug)]
pub struct JsonExporter {
    output_path: std::path::PathBuf,
}

impl JsonExporter {
    pub fn new(output_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }
}

impl MetricsExporter for JsonExporter {
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        let serializable = SerializableSnapshot::from(snapshot);
        let json = serde_json::to_string_pretty(&serializable)
            .map_err(|e| Error::telemetry(format!("JSON serialization failed: {}", e)))?;

        std::fs::write(&self.output_path, json)?;

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
struct SerializableSnapshot {
    uptime_secs: f64,
    kernels_launched: u64,
    work_groups_executed: u64,
    kernel_failures: u64,
    transfers: u64,
    bytes_read: u64,
    bytes_written: u64,
    builds: u64,
    build_failures: u64,
    steals: u64,
    worker_panics: u64,
    avg_launch_latency_us: f64,
    p50_launch_latency_us: f64,
    p99_launch_latency_us: f64,
    max_launch_latency_us: f64,
    launches_per_second: f64,
}

impl From<&MetricsSnapshot> for SerializableSnapshot {
    fn from(snapshot: &MetricsSnapshot) -> Self {
        Self {
            uptime_secs: snapshot.uptime.as_secs_f64(),
            kernels_launched: snapshot.kernels_launched,
            work_groups_executed: snapshot.work_groups_executed,
            kernel_failures: snapshot.kernel_failures,
            transfers: snapshot.transfers,
            bytes_read: snapshot.bytes_read,
            bytes_written: snapshot.bytes_written,
            builds: snapshot.builds,
            build_failures: snapshot.build_failures,
            steals: snapshot.steals,
            worker_panics: snapshot.worker_panics,
            avg_launch_latency_us: snapshot.avg_launch_latency_ns as f64 / 1_000.0,
            p50_launch_latency_us: snapshot.p50_launch_latency_ns as f64 / 1_000.0,
            p99_launch_latency_us: snapshot.p99_launch_latency_ns as f64 / 1_000.0,
            max_launch_latency_us: snapshot.max_launch_latency_ns as f64 / 1_000.0,
            launches_per_second: snapshot.launches_per_second(),
        }
    }
}

/// Prints a summary to stdout.
#[derive(Debug, Default)]
pub struct ConsoleExporter {
    verbose: bool,
}

impl ConsoleExporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl MetricsExporter for ConsoleExporter {
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        println!("=== ndrange runtime metrics ===");
        println!("Uptime: {:.2}s", snapshot.uptime.as_secs_f64());
        println!("Kernel launches: {}", snapshot.kernels_launched);
        println!("Work-groups: {}", snapshot.work_groups_executed);
        println!("Kernel failures: {}", snapshot.kernel_failures);
        println!(
            "Builds: {} ({} failed)",
            snapshot.builds, snapshot.build_failures
        );
        println!(
            "Transfers: {} ({} B read, {} B written)",
            snapshot.transfers, snapshot.bytes_read, snapshot.bytes_written
        );

        if self.verbose {
            println!("\nLaunch latency:");
            println!(
                "  Average: {:.2}us",
                snapshot.avg_launch_latency_ns as f64 / 1_000.0
            );
            println!("  P50: {:.2}us", snapshot.p50_launch_latency_ns as f64 / 1_000.0);
            println!("  P99: {:.2}us", snapshot.p99_launch_latency_ns as f64 / 1_000.0);
            println!("  Max: {:.2}us", snapshot.max_launch_latency_ns as f64 / 1_000.0);
            println!("Steals: {}", snapshot.steals);
            println!("Worker panics: {}", snapshot.worker_panics);
        }

        println!("===============================");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            uptime: std::time::Duration::from_secs(10),
            kernels_launched: 40,
            work_groups_executed: 1280,
            transfers: 80,
            bytes_read: 4096,
            bytes_written: 8192,
            builds: 3,
            build_failures: 1,
            avg_launch_latency_ns: 1000,
            p50_launch_latency_ns: 900,
            p99_launch_latency_ns: 2000,
            max_launch_latency_ns: 5000,
            ..MetricsSnapshot::default()
        }
    }

    #[test]
    fn test_console_exporter() {
        let exporter = ConsoleExporter::new(true);
        assert!(exporter.export(&dummy_snapshot()).is_ok());
    }

    #[test]
    fn test_json_exporter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let exporter = JsonExporter::new(&path);

        exporter.export(&dummy_snapshot()).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["kernels_launched"], 40);
        assert_eq!(value["build_failures"], 1);
        assert_eq!(value["launches_per_second"], 4.0);
    }
}
