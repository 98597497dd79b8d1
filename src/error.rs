//! Error taxonomy shared by every stage of the runtime.

use crate::platform::DeviceId;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no device selected")]
    NoDeviceSelected,

    #[error("invalid option: {input:?}")]
    InvalidOption { input: String },

    #[error("kernel source not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("program build failed on {} device(s)\n{0}", .0.logs.len())]
    BuildFailure(BuildFailure),

    #[error("runtime build error: {0}")]
    RuntimeBuild(String),

    #[error("kernel not found: {name}")]
    KernelNotFound { name: String },

    #[error("invalid argument binding for kernel '{kernel}' slot {slot}: {reason}")]
    InvalidArgumentBinding {
        kernel: String,
        slot: usize,
        reason: String,
    },

    #[error("no parallel work-group size for kernel '{kernel}' on {device}: {reason}")]
    NoParallelismAvailable {
        kernel: String,
        device: String,
        reason: String,
    },

    #[error("context creation failed: {0}")]
    ContextCreation(String),

    #[error("dispatch error: {0}")]
    RuntimeDispatch(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_option<S: Into<String>>(input: S) -> Self {
        Error::InvalidOption {
            input: input.into(),
        }
    }

    pub fn runtime_build<S: Into<String>>(msg: S) -> Self {
        Error::RuntimeBuild(msg.into())
    }

    pub fn kernel_not_found<S: Into<String>>(name: S) -> Self {
        Error::KernelNotFound { name: name.into() }
    }

    pub fn binding<K: Into<String>, R: Into<String>>(kernel: K, slot: usize, reason: R) -> Self {
        Error::InvalidArgumentBinding {
            kernel: kernel.into(),
            slot,
            reason: reason.into(),
        }
    }

    pub fn context<S: Into<String>>(msg: S) -> Self {
        Error::ContextCreation(msg.into())
    }

    pub fn dispatch<S: Into<String>>(msg: S) -> Self {
        Error::RuntimeDispatch(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    #[cfg(feature = "telemetry")]
    pub fn telemetry<S: Into<String>>(msg: S) -> Self {
        Error::RuntimeDispatch(format!("telemetry: {}", msg.into()))
    }

    /// Only a bad selection can be retried (by prompting again); every other
    /// failure ends the current run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::InvalidOption { .. })
    }

    /// The per-device logs when this is a build failure.
    pub fn build_logs(&self) -> Option<&BTreeMap<DeviceId, BuildLog>> {
        match self {
            Error::BuildFailure(failure) => Some(&failure.logs),
            _ => None,
        }
    }
}

/// Compiler output for one device whose build ended in error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLog {
    pub device_name: String,
    pub log: String,
}

/// Build diagnostics keyed by the devices that failed. Devices that built
/// successfully never appear here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildFailure {
    pub logs: BTreeMap<DeviceId, BuildLog>,
}

impl BuildFailure {
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    pub fn log_for(&self, device: DeviceId) -> Option<&BuildLog> {
        self.logs.get(&device)
    }
}

impl fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in self.logs.values() {
            writeln!(f, "Device - {}, build log:", entry.device_name)?;
            writeln!(f, "{}", entry.log.trim_end())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_invalid_option_is_recoverable() {
        assert!(Error::invalid_option("x").is_recoverable());
        assert!(!Error::NoDeviceSelected.is_recoverable());
        assert!(!Error::dispatch("boom").is_recoverable());
    }

    #[test]
    fn test_build_failure_display_tags_device_names() {
        let mut failure = BuildFailure::default();
        failure.logs.insert(
            DeviceId::new(0, 1),
            BuildLog {
                device_name: "Integrated CPU".to_string(),
                log: "line 3: error: undeclared identifier\n".to_string(),
            },
        );

        let rendered = Error::BuildFailure(failure).to_string();
        assert!(rendered.contains("1 device(s)"));
        assert!(rendered.contains("Device - Integrated CPU, build log:"));
        assert!(rendered.contains("undeclared identifier"));
    }
}
