//! Program builds with per-device diagnostics.

pub mod compiler;
pub mod kernel;
pub mod source;

pub use compiler::{BuildOptions, DeviceBuild, HostCompiler, KernelCompiler, KernelRegistry};
pub use kernel::{Kernel, KernelDef, NativeKernel, ParamKind};
pub use source::{Directive, Directives, KernelDecl, KernelSource};

use crate::context::Context;
use crate::error::{BuildFailure, BuildLog, Error, Result};
use crate::platform::{Device, DeviceId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Build state of a program on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    /// Never built for this device.
    None,
    InProgress,
    Success,
    Error,
}

#[derive(Debug, Clone)]
struct DeviceBuildRecord {
    status: BuildStatus,
    log: String,
}

struct ProgramInner {
    context: Context,
    label: String,
    options: BuildOptions,
    builds: BTreeMap<DeviceId, DeviceBuildRecord>,
    kernels: BTreeMap<String, Arc<dyn NativeKernel>>,
}

/// A source unit built for a set of devices of one context.
#[derive(Clone)]
pub struct Program {
    inner: Arc<ProgramInner>,
}

impl Program {
    /// Compile `source` for every device in `devices` as one unit.
    ///
    /// Returns [`Error::BuildFailure`] carrying one log per device whose
    /// build ended in error, or [`Error::RuntimeBuild`] when the build could
    /// not be attempted (empty or foreign device list, bad options, compiler
    /// invocation failure).
    pub fn build(
        context: &Context,
        devices: &[Device],
        source: &KernelSource,
        options: &str,
    ) -> Result<Program> {
        if devices.is_empty() {
            return Err(Error::runtime_build("no devices to build for"));
        }
        for (i, device) in devices.iter().enumerate() {
            if !context.contains(device) {
                return Err(Error::runtime_build(format!(
                    "device '{}' is not part of context {}",
                    device.name(),
                    context.id()
                )));
            }
            if devices[..i].contains(device) {
                return Err(Error::runtime_build(format!(
                    "device '{}' listed twice",
                    device.name()
                )));
            }
        }

        let options = BuildOptions::parse(options)?;

        let mut builds: BTreeMap<DeviceId, DeviceBuildRecord> = devices
            .iter()
            .map(|d| {
                (
                    d.id(),
                    DeviceBuildRecord {
                        status: BuildStatus::InProgress,
                        log: String::new(),
                    },
                )
            })
            .collect();
        let mut kernels = None;

        for device in devices {
            let info = device.info();
            let outcome = device
                .compiler()
                .compile(source, &info, &options)
                .map_err(|e| match e {
                    Error::RuntimeBuild(msg) => Error::RuntimeBuild(msg),
                    other => Error::runtime_build(other.to_string()),
                })?;

            debug!(
                source = source.label(),
                device = %info.name,
                status = ?outcome.status,
                "compiled for device"
            );
            if outcome.status == BuildStatus::Success && kernels.is_none() {
                kernels = Some(outcome.kernels);
            }
            builds.insert(
                device.id(),
                DeviceBuildRecord {
                    status: outcome.status,
                    log: outcome.log,
                },
            );
        }

        let mut failure = BuildFailure::default();
        for device in devices {
            let record = &builds[&device.id()];
            if record.status == BuildStatus::Error {
                warn!(source = source.label(), device = %device.name(), "build failed");
                failure.logs.insert(
                    device.id(),
                    BuildLog {
                        device_name: device.name(),
                        log: record.log.clone(),
                    },
                );
            }
        }

        devices[0].metrics().record_build(failure.logs.len());
        if !failure.is_empty() {
            return Err(Error::BuildFailure(failure));
        }

        let kernels = kernels.unwrap_or_default();
        info!(
            source = source.label(),
            devices = devices.len(),
            kernels = kernels.len(),
            "program built"
        );

        Ok(Program {
            inner: Arc::new(ProgramInner {
                context: context.clone(),
                label: source.label().to_string(),
                options,
                builds,
                kernels,
            }),
        })
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn options(&self) -> &str {
        self.inner.options.as_str()
    }

    pub fn build_status(&self, device: &Device) -> BuildStatus {
        if !self.inner.context.contains(device) {
            return BuildStatus::None;
        }
        self.inner
            .builds
            .get(&device.id())
            .map(|r| r.status)
            .unwrap_or(BuildStatus::None)
    }

    pub fn build_log(&self, device: &Device) -> Option<&str> {
        if !self.inner.context.contains(device) {
            return None;
        }
        self.inner.builds.get(&device.id()).map(|r| r.log.as_str())
    }

    pub fn kernel_names(&self) -> impl Iterator<Item = &str> {
        self.inner.kernels.keys().map(|k| k.as_str())
    }

    /// Look up an entry point by name.
    pub fn kernel(&self, name: &str) -> Result<Kernel> {
        let native = self
            .inner
            .kernels
            .get(name)
            .cloned()
            .ok_or_else(|| Error::kernel_not_found(name))?;
        Ok(Kernel::new(self.clone(), native))
    }

    /// One handle per entry point, in name order.
    pub fn create_kernels(&self) -> Vec<Kernel> {
        self.inner
            .kernels
            .values()
            .map(|native| Kernel::new(self.clone(), native.clone()))
            .collect()
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("label", &self.inner.label)
            .field("context", &self.inner.context.id())
            .field("builds", &self.inner.builds)
            .field("kernels", &self.inner.kernels.keys().collect::<Vec<_>>())
            .finish()
    }
}
