//! Platforms, devices and their enumeration.
//!
//! A platform groups devices behind one compiler. Platform 0 is the host CPU
//! when [`Config::host_platform`] is set; further platforms come from the
//! descriptors in [`Config::platforms`].

pub mod capability;
pub mod selector;

pub use capability::{
    format_bytes, format_device_info, query_capabilities, DeviceInfo, PlatformInfo,
    QueueCapabilities,
};
pub use selector::{present_options, resolve_selection, SelectionChoice, Selector};

use crate::config::{Config, DeviceSpec};
use crate::error::Result;
use crate::executor::{ComputePool, PoolSettings};
use crate::program::KernelCompiler;
use crate::telemetry::Metrics;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Local memory advertised by the host CPU device.
pub const HOST_LOCAL_MEMORY_BYTES: u64 = 32 * 1024;

/// Largest work-group the host CPU device accepts.
pub const HOST_MAX_WORK_GROUP_SIZE: usize = 1024;

const HOST_EXTENSIONS: &[&str] = &[
    "cl_khr_global_int32_base_atomics",
    "cl_khr_global_int32_extended_atomics",
    "cl_khr_local_int32_base_atomics",
    "cl_khr_local_int32_extended_atomics",
    "cl_khr_byte_addressable_store",
    "cl_khr_fp64",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Cpu,
    Gpu,
    Accelerator,
    Other,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Cpu => write!(f, "CPU"),
            DeviceType::Gpu => write!(f, "GPU"),
            DeviceType::Accelerator => write!(f, "Accelerator"),
            DeviceType::Other => write!(f, "Other"),
        }
    }
}

/// Position of a device in enumeration order. Stable for the lifetime of a
/// [`crate::Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId {
    pub platform: usize,
    pub device: usize,
}

impl DeviceId {
    pub fn new(platform: usize, device: usize) -> Self {
        Self { platform, device }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.device)
    }
}

#[derive(Debug, Clone)]
enum DeviceSource {
    Host,
    Described(DeviceSpec),
}

struct DeviceInner {
    id: DeviceId,
    platform: Arc<PlatformInfo>,
    source: DeviceSource,
    info: RwLock<DeviceInfo>,
    thread_cap: usize,
    epoch: Instant,
    pool_settings: PoolSettings,
    pool: Mutex<Option<Arc<ComputePool>>>,
    compiler: Arc<dyn KernelCompiler>,
    metrics: Arc<Metrics>,
}

/// Handle to one compute device. Cheap to clone; clones refer to the same
/// device.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    pub fn id(&self) -> DeviceId {
        self.inner.id
    }

    pub fn name(&self) -> String {
        self.inner.info.read().name.clone()
    }

    pub fn kind(&self) -> DeviceType {
        self.inner.info.read().kind
    }

    /// Current capability snapshot.
    pub fn info(&self) -> DeviceInfo {
        self.inner.info.read().clone()
    }

    pub fn platform_info(&self) -> &PlatformInfo {
        &self.inner.platform
    }

    pub fn platform_index(&self) -> usize {
        self.inner.id.platform
    }

    /// Re-take the capability snapshot. Only the host device can change
    /// between snapshots (its compute unit count follows the CPU count).
    pub fn refresh(&self) -> DeviceInfo {
        let fresh = match &self.inner.source {
            DeviceSource::Host => host_device_info(self.inner.thread_cap),
            DeviceSource::Described(spec) => DeviceInfo::from_spec(spec),
        };
        *self.inner.info.write() = fresh.clone();
        fresh
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.inner.info.read().has_extension(name)
    }

    pub(crate) fn compiler(&self) -> &Arc<dyn KernelCompiler> {
        &self.inner.compiler
    }

    pub(crate) fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    pub(crate) fn epoch(&self) -> Instant {
        self.inner.epoch
    }

    pub(crate) fn thread_name_prefix(&self) -> &str {
        &self.inner.pool_settings.thread_name_prefix
    }

    /// Worker pool executing this device's work-groups, started on first use.
    pub(crate) fn pool(&self) -> Result<Arc<ComputePool>> {
        let mut slot = self.inner.pool.lock();
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }

        let threads = self
            .inner
            .info
            .read()
            .compute_units
            .min(self.inner.thread_cap)
            .max(1);
        let label = format!("{}.{}", self.inner.id.platform, self.inner.id.device);
        let pool = Arc::new(ComputePool::new(
            &self.inner.pool_settings,
            &label,
            threads,
            self.inner.metrics.clone(),
        )?);
        debug!(device = %self.inner.id, threads, "started device worker pool");
        *slot = Some(pool.clone());
        Ok(pool)
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Device {}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.inner.id)
            .field("name", &self.inner.info.read().name)
            .finish()
    }
}

struct PlatformInner {
    index: usize,
    info: Arc<PlatformInfo>,
    devices: Vec<Device>,
}

/// Handle to one platform and the devices it exposes.
#[derive(Clone)]
pub struct Platform {
    inner: Arc<PlatformInner>,
}

impl Platform {
    pub fn index(&self) -> usize {
        self.inner.index
    }

    pub fn info(&self) -> &PlatformInfo {
        &self.inner.info
    }

    pub fn name(&self) -> &str {
        &self.inner.info.name
    }

    pub fn vendor(&self) -> &str {
        &self.inner.info.vendor
    }

    pub fn version(&self) -> &str {
        &self.inner.info.version
    }

    pub fn devices(&self) -> &[Device] {
        &self.inner.devices
    }
}

impl PartialEq for Platform {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Platform {}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("index", &self.inner.index)
            .field("name", &self.inner.info.name)
            .field("vendor", &self.inner.info.vendor)
            .field("devices", &self.inner.devices.len())
            .finish()
    }
}

/// List every platform `config` exposes, in order. An empty list is a valid
/// answer and means no compute capability is available.
pub fn enumerate_platforms(
    config: &Config,
    compiler: Arc<dyn KernelCompiler>,
    metrics: Arc<Metrics>,
) -> Result<Vec<Platform>> {
    config.validate()?;

    let thread_cap = config.worker_threads();
    let pool_settings = PoolSettings::from_config(config);
    let mut platforms = Vec::new();

    if config.host_platform {
        let index = platforms.len();
        let info = Arc::new(PlatformInfo {
            name: "Host".to_string(),
            vendor: "ndrange".to_string(),
            version: "OpenCL 1.2 host".to_string(),
        });
        let device = Device {
            inner: Arc::new(DeviceInner {
                id: DeviceId::new(index, 0),
                platform: info.clone(),
                source: DeviceSource::Host,
                info: RwLock::new(host_device_info(thread_cap)),
                thread_cap,
                epoch: Instant::now(),
                pool_settings: pool_settings.clone(),
                pool: Mutex::new(None),
                compiler: compiler.clone(),
                metrics: metrics.clone(),
            }),
        };
        platforms.push(Platform {
            inner: Arc::new(PlatformInner {
                index,
                info,
                devices: vec![device],
            }),
        });
    }

    for spec in &config.platforms {
        let index = platforms.len();
        let info = Arc::new(PlatformInfo {
            name: spec.name.clone(),
            vendor: spec.vendor.clone(),
            version: spec.version.clone(),
        });
        let devices = spec
            .devices
            .iter()
            .enumerate()
            .map(|(d, device_spec)| Device {
                inner: Arc::new(DeviceInner {
                    id: DeviceId::new(index, d),
                    platform: info.clone(),
                    source: DeviceSource::Described(device_spec.clone()),
                    info: RwLock::new(DeviceInfo::from_spec(device_spec)),
                    thread_cap,
                    epoch: Instant::now(),
                    pool_settings: pool_settings.clone(),
                    pool: Mutex::new(None),
                    compiler: compiler.clone(),
                    metrics: metrics.clone(),
                }),
            })
            .collect();
        platforms.push(Platform {
            inner: Arc::new(PlatformInner {
                index,
                info,
                devices,
            }),
        });
    }

    for platform in &platforms {
        debug!(
            platform = platform.name(),
            vendor = platform.vendor(),
            devices = platform.devices().len(),
            "enumerated platform"
        );
    }
    info!(platforms = platforms.len(), "platform enumeration complete");

    Ok(platforms)
}

/// Devices of `platform`, all types included.
pub fn enumerate_devices(platform: &Platform) -> Vec<Device> {
    platform.devices().to_vec()
}

fn host_device_info(thread_cap: usize) -> DeviceInfo {
    DeviceInfo {
        kind: DeviceType::Cpu,
        name: format!("{} host CPU", std::env::consts::ARCH),
        vendor: "ndrange".to_string(),
        version: "OpenCL 1.2 host".to_string(),
        compute_units: num_cpus::get().min(thread_cap).max(1),
        max_work_group_size: HOST_MAX_WORK_GROUP_SIZE,
        max_work_item_dimensions: 3,
        max_work_item_sizes: [HOST_MAX_WORK_GROUP_SIZE; 3],
        local_memory_bytes: HOST_LOCAL_MEMORY_BYTES,
        global_memory_bytes: 1 << 30,
        extensions: HOST_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        queue: QueueCapabilities {
            out_of_order: true,
            profiling: true,
        },
    }
}
