use crate::config::Config;
use crate::context::Context;
use crate::dispatch::{CommandQueue, QueueOptions};
use crate::error::{Error, Result};
use crate::platform::{enumerate_platforms, Device, Platform, SelectionChoice, Selector};
use crate::program::{HostCompiler, KernelCompiler, KernelRegistry, KernelSource, Program};
use crate::telemetry::{Metrics, MetricsSnapshot};
use std::fmt;
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::{info, warn};

/// Enumerated platforms plus the configuration they came from.
///
/// Everything downstream (contexts, queues, programs) is created through a
/// [`Session`] or directly from the handles this returns; there is no global
/// state.
pub struct Runtime {
    config: Config,
    platforms: Vec<Platform>,
    selector: Selector,
    metrics: Arc<Metrics>,
}

impl Runtime {
    /// Enumerate with the host compiler resolving kernels from `registry`.
    pub fn new(config: Config, registry: KernelRegistry) -> Result<Self> {
        Self::with_compiler(config, Arc::new(HostCompiler::new(registry)))
    }

    pub fn with_compiler(config: Config, compiler: Arc<dyn KernelCompiler>) -> Result<Self> {
        let metrics = Arc::new(Metrics::new());
        let platforms = enumerate_platforms(&config, compiler, metrics.clone())?;
        let selector = Selector::new(&platforms);
        if selector.is_empty() {
            warn!("no compute devices available");
        }

        Ok(Self {
            config,
            platforms,
            selector,
            metrics,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn platforms(&self) -> &[Platform] {
        &self.platforms
    }

    /// Every (platform, device) pair as a numbered option.
    pub fn options(&self) -> &[SelectionChoice] {
        self.selector.options()
    }

    /// Resolve one line of user input to a session.
    pub fn select(&self, raw: &str) -> Result<Session> {
        let (platform, device) = self.selector.resolve(raw)?;
        Session::new(platform, device, self.config.queue)
    }

    /// Print the options to `output` and read choices from `input` until one
    /// is valid. Invalid lines are reported and prompted again; end of input
    /// means nothing was selected.
    pub fn select_interactive<R, W>(&self, mut input: R, mut output: W) -> Result<Session>
    where
        R: BufRead,
        W: Write,
    {
        if self.selector.is_empty() {
            return Err(Error::NoDeviceSelected);
        }
        for choice in self.selector.options() {
            writeln!(output, "{}", choice)?;
        }

        let mut line = String::new();
        loop {
            write!(output, "Select a device: ")?;
            output.flush()?;
            line.clear();
            if input.read_line(&mut line)? == 0 {
                return Err(Error::NoDeviceSelected);
            }
            match self.select(&line) {
                Err(e) if e.is_recoverable() => writeln!(output, "{}", e)?,
                other => return other,
            }
        }
    }

    /// Session on a specific enumerated device.
    pub fn session_for(&self, device: &Device) -> Result<Session> {
        let platform = self
            .platforms
            .get(device.platform_index())
            .filter(|p| p.devices().contains(device))
            .cloned()
            .ok_or(Error::NoDeviceSelected)?;
        Session::new(platform, device.clone(), self.config.queue)
    }

    /// Session on the first available device.
    pub fn default_session(&self) -> Result<Session> {
        if self.selector.is_empty() {
            return Err(Error::NoDeviceSelected);
        }
        self.select("0")
    }

    /// Load a kernel source file, resolving relative names against the
    /// configured kernel directory.
    pub fn load_source(&self, name: &str) -> Result<KernelSource> {
        KernelSource::from_file(self.config.resolve_source_path(name))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("platforms", &self.platforms)
            .field("options", &self.selector.len())
            .finish()
    }
}

/// A selected device with its own context and default queue.
#[derive(Debug, Clone)]
pub struct Session {
    platform: Platform,
    device: Device,
    context: Context,
    queue: CommandQueue,
}

impl Session {
    pub fn new(platform: Platform, device: Device, options: QueueOptions) -> Result<Self> {
        let context = Context::new(std::slice::from_ref(&device))?;
        let queue = CommandQueue::new(&context, &device, options)?;
        info!(
            platform = platform.name(),
            device = %device.name(),
            "session ready"
        );
        Ok(Self {
            platform,
            device,
            context,
            queue,
        })
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Another queue on the session's device.
    pub fn create_queue(&self, options: QueueOptions) -> Result<CommandQueue> {
        CommandQueue::new(&self.context, &self.device, options)
    }

    /// Build `source` for the session's device.
    pub fn build(&self, source: &KernelSource, options: &str) -> Result<Program> {
        Program::build(&self.context, std::slice::from_ref(&self.device), source, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceSpec, PlatformSpec};
    use std::io::Cursor;

    fn runtime() -> Runtime {
        let config = Config::builder()
            .num_threads(2)
            .platform(PlatformSpec::new("Lab", "Acme").device(DeviceSpec::gpu("R9")))
            .build()
            .unwrap();
        Runtime::new(config, KernelRegistry::new()).unwrap()
    }

    #[test]
    fn test_select_by_ordinal() {
        let rt = runtime();
        assert_eq!(rt.options().len(), 2);
        let session = rt.select(" 1\n").unwrap();
        assert_eq!(session.device().name(), "R9");
        assert_eq!(session.platform().vendor(), "Acme");
        assert!(session.context().contains(session.device()));
    }

    #[test]
    fn test_interactive_reprompts_on_bad_input() {
        let rt = runtime();
        let mut out = Vec::new();
        let session = rt
            .select_interactive(Cursor::new("abc\n7\n1\n"), &mut out)
            .unwrap();
        assert_eq!(session.device().name(), "R9");

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Option 1: Platform - Acme, Device - R9"));
        assert_eq!(text.matches("invalid option").count(), 2);
    }

    #[test]
    fn test_interactive_eof_selects_nothing() {
        let rt = runtime();
        let err = rt.select_interactive(Cursor::new(""), Vec::new()).unwrap_err();
        assert!(matches!(err, Error::NoDeviceSelected));
    }

    #[test]
    fn test_no_devices() {
        let config = Config::builder().host_platform(false).build().unwrap();
        let rt = Runtime::new(config, KernelRegistry::new()).unwrap();
        assert!(matches!(rt.default_session(), Err(Error::NoDeviceSelected)));
        assert!(matches!(rt.select("0"), Err(Error::NoDeviceSelected)));
    }

    #[test]
    fn test_load_source_uses_kernel_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("k.cl"), "__kernel void k(void) {}").unwrap();
        let config = Config::builder().kernel_dir(dir.path()).build().unwrap();
        let rt = Runtime::new(config, KernelRegistry::new()).unwrap();

        let source = rt.load_source("k.cl").unwrap();
        assert_eq!(source.kernel_names().collect::<Vec<_>>(), vec!["k"]);
        assert!(matches!(
            rt.load_source("missing.cl"),
            Err(Error::SourceNotFound { .. })
        ));
    }
}
