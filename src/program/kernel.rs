//! Kernel entry points and argument binding.

use super::Program;
use crate::dispatch::{KernelArg, ScalarType, WorkGroup};
use crate::error::{Error, Result};
use crate::platform::Device;
use std::fmt;
use std::sync::Arc;

/// Kind of one positional kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Passed by value.
    Scalar(ScalarType),
    /// `__global` buffer.
    Global,
    /// `__local` reservation sized by the host.
    Local,
    /// `image2d_t`.
    Image,
}

/// A kernel body the host platform can execute.
///
/// `run_group` is called once per work-group. Work-items are visited through
/// [`WorkGroup::for_each_item`]; consecutive calls behave as if separated by
/// a group barrier.
pub trait NativeKernel: Send + Sync {
    fn name(&self) -> &str;

    fn params(&self) -> &[ParamKind];

    /// Upper bound on work-group size imposed by the kernel's resource use.
    fn work_group_limit(&self) -> Option<usize> {
        None
    }

    fn required_extensions(&self) -> &[String] {
        &[]
    }

    /// Local memory the kernel declares statically, in bytes.
    fn static_local_bytes(&self) -> u64 {
        0
    }

    fn run_group(&self, group: &WorkGroup<'_>) -> Result<()>;
}

type GroupFn = dyn Fn(&WorkGroup<'_>) -> Result<()> + Send + Sync;

/// [`NativeKernel`] built from a closure.
///
/// ```
/// use ndrange_rs::dispatch::ScalarType;
/// use ndrange_rs::program::{KernelDef, ParamKind};
///
/// let scale = KernelDef::new(
///     "scale",
///     vec![ParamKind::Global, ParamKind::Scalar(ScalarType::F32)],
///     |wg| {
///         let data = wg.global_mut::<f32>(0)?;
///         let factor: f32 = wg.scalar(1)?;
///         wg.for_each_item(|item| {
///             let i = item.global_id(0);
///             data.set(i, data.get(i) * factor);
///         });
///         Ok(())
///     },
/// );
/// # let _ = scale;
/// ```
#[derive(Clone)]
pub struct KernelDef {
    name: String,
    params: Vec<ParamKind>,
    work_group_limit: Option<usize>,
    extensions: Vec<String>,
    static_local_bytes: u64,
    body: Arc<GroupFn>,
}

impl KernelDef {
    pub fn new<S, F>(name: S, params: Vec<ParamKind>, body: F) -> Self
    where
        S: Into<String>,
        F: Fn(&WorkGroup<'_>) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params,
            work_group_limit: None,
            extensions: Vec::new(),
            static_local_bytes: 0,
            body: Arc::new(body),
        }
    }

    pub fn work_group_limit(mut self, limit: usize) -> Self {
        self.work_group_limit = Some(limit);
        self
    }

    pub fn requires<S: Into<String>>(mut self, extension: S) -> Self {
        self.extensions.push(extension.into());
        self
    }

    pub fn static_local(mut self, bytes: u64) -> Self {
        self.static_local_bytes = bytes;
        self
    }
}

impl NativeKernel for KernelDef {
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> &[ParamKind] {
        &self.params
    }

    fn work_group_limit(&self) -> Option<usize> {
        self.work_group_limit
    }

    fn required_extensions(&self) -> &[String] {
        &self.extensions
    }

    fn static_local_bytes(&self) -> u64 {
        self.static_local_bytes
    }

    fn run_group(&self, group: &WorkGroup<'_>) -> Result<()> {
        (self.body)(group)
    }
}

impl fmt::Debug for KernelDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelDef")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("work_group_limit", &self.work_group_limit)
            .field("extensions", &self.extensions)
            .finish()
    }
}

/// Named entry point of a built [`Program`], with its bound arguments.
///
/// Arguments are captured when a launch is enqueued, so rebinding afterwards
/// does not affect commands already in flight.
#[derive(Clone)]
pub struct Kernel {
    program: Program,
    native: Arc<dyn NativeKernel>,
    args: Vec<Option<KernelArg>>,
}

impl Kernel {
    pub(crate) fn new(program: Program, native: Arc<dyn NativeKernel>) -> Self {
        let args = vec![None; native.params().len()];
        Self {
            program,
            native,
            args,
        }
    }

    pub fn name(&self) -> &str {
        self.native.name()
    }

    pub fn params(&self) -> &[ParamKind] {
        self.native.params()
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Bind one positional argument.
    pub fn set_arg<A: Into<KernelArg>>(&mut self, slot: usize, arg: A) -> Result<()> {
        let arg = arg.into();
        let kind = self.native.params().get(slot).copied().ok_or_else(|| {
            Error::binding(
                self.name(),
                slot,
                format!("kernel takes {} arguments", self.args.len()),
            )
        })?;

        arg.check(kind, self.program.context().id())
            .map_err(|reason| Error::binding(self.name(), slot, reason))?;

        self.args[slot] = Some(arg);
        Ok(())
    }

    /// Bind arguments positionally, starting at slot 0.
    pub fn bind_arguments<I>(&mut self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = KernelArg>,
    {
        for (slot, arg) in args.into_iter().enumerate() {
            self.set_arg(slot, arg)?;
        }
        Ok(())
    }

    /// Largest work-group this kernel may run with on `device`.
    pub fn work_group_size(&self, device: &Device) -> Result<usize> {
        if !self.program.context().contains(device) {
            return Err(Error::dispatch(format!(
                "device '{}' is not part of the kernel's context",
                device.name()
            )));
        }
        let device_max = device.info().max_work_group_size;
        Ok(match self.native.work_group_limit() {
            Some(limit) => device_max.min(limit),
            None => device_max,
        })
    }

    /// Local memory needed per work-group: static declarations plus bound
    /// local reservations.
    pub fn local_memory_size(&self) -> u64 {
        let reserved: u64 = self
            .args
            .iter()
            .filter_map(|arg| match arg {
                Some(KernelArg::Local(bytes)) => Some(*bytes as u64),
                _ => None,
            })
            .sum();
        self.native.static_local_bytes() + reserved
    }

    pub(crate) fn native(&self) -> &Arc<dyn NativeKernel> {
        &self.native
    }

    /// Bound arguments in slot order; every slot must be set.
    pub(crate) fn snapshot_args(&self) -> Result<Vec<KernelArg>> {
        self.args
            .iter()
            .enumerate()
            .map(|(slot, arg)| {
                arg.clone()
                    .ok_or_else(|| Error::binding(self.name(), slot, "argument not set"))
            })
            .collect()
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name())
            .field("params", &self.params())
            .field("bound", &self.args.iter().filter(|a| a.is_some()).count())
            .finish()
    }
}
