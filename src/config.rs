use crate::dispatch::QueueOptions;
use crate::error::{Error, Result};
use crate::platform::DeviceType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of environment variables that override file settings.
pub const ENV_PREFIX: &str = "NDRANGE_";

/// Runtime configuration. Passed explicitly to [`crate::Runtime::new`]; there
/// is no process-wide instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Expose the machine's own CPU as platform 0.
    pub host_platform: bool,
    /// Cap on worker threads per device pool (defaults to the CPU count).
    pub num_threads: Option<usize>,
    pub pin_workers: bool,
    pub stack_size: Option<usize>,
    pub thread_name_prefix: String,
    /// Directory that relative kernel source names resolve against.
    pub kernel_dir: Option<PathBuf>,
    /// Options used by sessions that do not ask for anything else.
    pub queue: QueueOptions,
    /// Additional platforms, described rather than discovered.
    pub platforms: Vec<PlatformSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host_platform: true,
            num_threads: None,
            pin_workers: false,
            stack_size: Some(2 * 1024 * 1024),
            thread_name_prefix: "ndrange".to_string(),
            kernel_dir: None,
            queue: QueueOptions::default(),
            platforms: Vec::new(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Parse a TOML document. Missing fields keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: Config =
            toml::from_str(text).map_err(|e| Error::config(format!("invalid TOML: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read a TOML file, then apply `NDRANGE_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut cfg: Config =
            toml::from_str(&text).map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(format!("serialize failed: {}", e)))
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(std::env::vars())
    }

    /// Apply overrides from an explicit variable source. Unknown
    /// `NDRANGE_*` keys are ignored.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            match name {
                "NUM_THREADS" => self.num_threads = Some(parse_env(name, value)?),
                "HOST_PLATFORM" => self.host_platform = parse_bool(name, value)?,
                "PIN_WORKERS" => self.pin_workers = parse_bool(name, value)?,
                "PROFILING" => self.queue.profiling = parse_bool(name, value)?,
                "OUT_OF_ORDER" => self.queue.out_of_order = parse_bool(name, value)?,
                "KERNEL_DIR" => self.kernel_dir = Some(PathBuf::from(value)),
                "THREAD_NAME_PREFIX" => self.thread_name_prefix = value.to_string(),
                _ => {}
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.num_threads {
            if n == 0 {
                return Err(Error::config("num_threads must be > 0"));
            }
            if n > 1024 {
                return Err(Error::config("num_threads too large (max 1024)"));
            }
        }

        if self.thread_name_prefix.is_empty() {
            return Err(Error::config("thread_name_prefix must not be empty"));
        }

        for platform in &self.platforms {
            platform.validate()?;
        }

        Ok(())
    }

    pub fn worker_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get)
    }

    pub fn resolve_source_path(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        match &self.kernel_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::config(format!("{}{}={:?}: {}", ENV_PREFIX, key, value, e)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!(
            "{}{}={:?}: expected a boolean",
            ENV_PREFIX, key, value
        ))),
    }
}

/// Description of a platform that is not probed from the machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformSpec {
    pub name: String,
    pub vendor: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub devices: Vec<DeviceSpec>,
}

fn default_version() -> String {
    "OpenCL 1.2".to_string()
}

impl PlatformSpec {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, vendor: V) -> Self {
        Self {
            name: name.into(),
            vendor: vendor.into(),
            version: default_version(),
            devices: Vec::new(),
        }
    }

    pub fn device(mut self, device: DeviceSpec) -> Self {
        self.devices.push(device);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("platform name must not be empty"));
        }
        for device in &self.devices {
            device.validate().map_err(|e| match e {
                Error::Config(msg) => Error::config(format!("{}: {}", self.name, msg)),
                other => other,
            })?;
        }
        Ok(())
    }
}

/// Description of a device's limits and capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSpec {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub kind: DeviceType,
    pub compute_units: usize,
    pub max_work_group_size: usize,
    pub max_work_item_sizes: [usize; 3],
    pub local_memory_bytes: u64,
    pub global_memory_bytes: u64,
    pub extensions: Vec<String>,
    pub out_of_order: bool,
    pub profiling: bool,
}

impl Default for DeviceSpec {
    fn default() -> Self {
        Self {
            name: "Virtual Device".to_string(),
            vendor: "ndrange".to_string(),
            version: default_version(),
            kind: DeviceType::Other,
            compute_units: 4,
            max_work_group_size: 256,
            max_work_item_sizes: [256, 256, 64],
            local_memory_bytes: 32 * 1024,
            global_memory_bytes: 256 * 1024 * 1024,
            extensions: Vec::new(),
            out_of_order: false,
            profiling: true,
        }
    }
}

impl DeviceSpec {
    pub fn new<S: Into<String>>(name: S, kind: DeviceType) -> Self {
        Self {
            name: name.into(),
            kind,
            ..Self::default()
        }
    }

    pub fn gpu<S: Into<String>>(name: S) -> Self {
        Self {
            compute_units: 8,
            max_work_group_size: 1024,
            max_work_item_sizes: [1024, 1024, 64],
            ..Self::new(name, DeviceType::Gpu)
        }
    }

    pub fn cpu<S: Into<String>>(name: S) -> Self {
        Self {
            max_work_group_size: 8192,
            max_work_item_sizes: [8192, 8192, 8192],
            out_of_order: true,
            ..Self::new(name, DeviceType::Cpu)
        }
    }

    pub fn vendor<S: Into<String>>(mut self, vendor: S) -> Self {
        self.vendor = vendor.into();
        self
    }

    pub fn compute_units(mut self, n: usize) -> Self {
        self.compute_units = n;
        self
    }

    pub fn max_work_group_size(mut self, n: usize) -> Self {
        self.max_work_group_size = n;
        self
    }

    pub fn max_work_item_sizes(mut self, sizes: [usize; 3]) -> Self {
        self.max_work_item_sizes = sizes;
        self
    }

    pub fn local_memory(mut self, bytes: u64) -> Self {
        self.local_memory_bytes = bytes;
        self
    }

    pub fn extension<S: Into<String>>(mut self, ext: S) -> Self {
        self.extensions.push(ext.into());
        self
    }

    pub fn out_of_order(mut self, supported: bool) -> Self {
        self.out_of_order = supported;
        self
    }

    pub fn profiling(mut self, supported: bool) -> Self {
        self.profiling = supported;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("device name must not be empty"));
        }
        if self.compute_units == 0 {
            return Err(Error::config(format!("{}: compute_units must be > 0", self.name)));
        }
        if self.max_work_group_size == 0 {
            return Err(Error::config(format!(
                "{}: max_work_group_size must be > 0",
                self.name
            )));
        }
        if self.max_work_item_sizes.iter().any(|&s| s == 0) {
            return Err(Error::config(format!(
                "{}: max_work_item_sizes must be > 0 in every dimension",
                self.name
            )));
        }
        if self.local_memory_bytes == 0 {
            return Err(Error::config(format!(
                "{}: local_memory_bytes must be > 0",
                self.name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn host_platform(mut self, enable: bool) -> Self {
        self.config.host_platform = enable;
        self
    }

    pub fn num_threads(mut self, n: usize) -> Self {
        self.config.num_threads = Some(n);
        self
    }

    pub fn pin_workers(mut self, pin: bool) -> Self {
        self.config.pin_workers = pin;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn kernel_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.kernel_dir = Some(dir.into());
        self
    }

    pub fn profiling(mut self, enable: bool) -> Self {
        self.config.queue.profiling = enable;
        self
    }

    pub fn out_of_order(mut self, enable: bool) -> Self {
        self.config.queue.out_of_order = enable;
        self
    }

    pub fn platform(mut self, platform: PlatformSpec) -> Self {
        self.config.platforms.push(platform);
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
