//! Device and platform attribute snapshots.

use super::{Device, DeviceType};
use crate::config::DeviceSpec;

/// Attributes of a platform, fixed at enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub name: String,
    pub vendor: String,
    pub version: String,
}

/// Which optional queue properties a device honours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueCapabilities {
    pub out_of_order: bool,
    pub profiling: bool,
}

/// Snapshot of a device's limits. Taken when the device is enumerated and
/// replaced only by [`Device::refresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub kind: DeviceType,
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub compute_units: usize,
    pub max_work_group_size: usize,
    pub max_work_item_dimensions: usize,
    pub max_work_item_sizes: [usize; 3],
    pub local_memory_bytes: u64,
    pub global_memory_bytes: u64,
    pub extensions: Vec<String>,
    pub queue: QueueCapabilities,
}

impl DeviceInfo {
    pub(crate) fn from_spec(spec: &DeviceSpec) -> Self {
        Self {
            kind: spec.kind,
            name: spec.name.clone(),
            vendor: spec.vendor.clone(),
            version: spec.version.clone(),
            compute_units: spec.compute_units,
            max_work_group_size: spec.max_work_group_size,
            max_work_item_dimensions: 3,
            max_work_item_sizes: spec.max_work_item_sizes,
            local_memory_bytes: spec.local_memory_bytes,
            global_memory_bytes: spec.global_memory_bytes,
            extensions: spec.extensions.clone(),
            queue: QueueCapabilities {
                out_of_order: spec.out_of_order,
                profiling: spec.profiling,
            },
        }
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|ext| ext == name)
    }

    /// Extensions as the space-separated string devices traditionally report.
    pub fn extension_string(&self) -> String {
        self.extensions.join(" ")
    }
}

/// Read the capability snapshot of `device`.
pub fn query_capabilities(device: &Device) -> DeviceInfo {
    device.info()
}

pub fn format_device_info(info: &DeviceInfo) -> String {
    let mut lines = Vec::with_capacity(12);

    lines.push(format!("Device:          {}", info.name));
    lines.push(format!("Type:            {}", info.kind));
    lines.push(format!("Vendor:          {}", info.vendor));
    lines.push(format!("Version:         {}", info.version));
    lines.push(format!("Compute units:   {}", info.compute_units));
    lines.push(format!("Max workgroup:   {}", info.max_work_group_size));
    lines.push(format!(
        "Work-item dims:  {} (max sizes: {:?})",
        info.max_work_item_dimensions, info.max_work_item_sizes
    ));
    lines.push(format!("Global memory:   {}", format_bytes(info.global_memory_bytes)));
    lines.push(format!("Local memory:    {}", format_bytes(info.local_memory_bytes)));
    lines.push(format!("Out-of-order:    {}", info.queue.out_of_order));
    lines.push(format!("Profiling:       {}", info.queue.profiling));
    lines.push(format!("Extensions:      {}", info.extension_string()));

    lines.join("\n")
}

pub fn format_bytes(bytes: u64) -> String {
    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;
    const KB: u64 = 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
