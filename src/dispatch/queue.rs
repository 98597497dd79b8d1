//! Command queues: kernel launches and buffer transfers on one device.

use super::event::{CommandType, Event, EventStatus};
use super::ndrange::{NdRange, ResolvedRange};
use super::workgroup::{LaunchArg, WorkGroup};
use super::KernelArg;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::memory::{Buffer, Image2D};
use crate::platform::Device;
use crate::program::{BuildStatus, Kernel, NativeKernel};
use bytemuck::Pod;
use crossbeam_channel::{never, unbounded, Receiver, Select, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, trace, warn};

static QUEUE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Requested queue properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    pub profiling: bool,
    pub out_of_order: bool,
}

type Work = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

struct Command {
    event: Event,
    deps: Vec<Event>,
    work: Work,
}

impl Command {
    fn run(self) {
        for dep in &self.deps {
            if let Err(e) = dep.wait() {
                self.event
                    .finish(Err(format!("dependency failed: {}", failure_message(&e))));
                return;
            }
        }
        self.event.mark_running();
        let outcome = (self.work)().map_err(|e| failure_message(&e));
        if let Err(msg) = &outcome {
            warn!(command = ?self.event.command_type(), error = %msg, "command failed");
        }
        self.event.finish(outcome);
    }
}

fn failure_message(error: &Error) -> String {
    match error {
        Error::RuntimeDispatch(msg) => msg.clone(),
        other => other.to_string(),
    }
}

/// Shared state behind every clone of a [`CommandQueue`].
///
/// Queue threads are not joined on release. Dropping the last handle closes
/// the channel; the threads drain what was already submitted and exit.
struct QueueInner {
    id: u64,
    context: Context,
    device: Device,
    options: QueueOptions,
    fell_back: bool,
    sender: Sender<Command>,
    issued: Mutex<Vec<Event>>,
}

const OUT_OF_ORDER_RUNNERS: usize = 4;

fn spawn_in_order(name: String, commands: Receiver<Command>) -> Result<()> {
    thread::Builder::new().name(name).spawn(move || {
        for command in commands.iter() {
            command.run();
        }
    })?;
    Ok(())
}

fn spawn_out_of_order(name: String, commands: Receiver<Command>) -> Result<()> {
    let (ready_tx, ready_rx) = unbounded::<Command>();
    for runner in 0..OUT_OF_ORDER_RUNNERS {
        let ready = ready_rx.clone();
        thread::Builder::new()
            .name(format!("{}-run-{}", name, runner))
            .spawn(move || {
                for command in ready.iter() {
                    command.run();
                }
            })?;
    }
    thread::Builder::new()
        .name(format!("{}-dispatch", name))
        .spawn(move || dispatch_ready(commands, ready_tx))?;
    Ok(())
}

/// A command whose wait list has not finished yet.
struct Held {
    command: Command,
    watching: Option<usize>,
    watch: Receiver<EventStatus>,
}

impl Held {
    fn new(command: Command) -> Self {
        Self {
            command,
            watching: None,
            watch: never(),
        }
    }

    /// True once every dependency is terminal. Otherwise subscribes to the
    /// first unfinished one, at most once per dependency.
    fn refresh(&mut self) -> bool {
        if let Some(i) = self.watching {
            if !self.command.deps[i].is_complete() {
                return false;
            }
        }
        match self.command.deps.iter().position(|dep| !dep.is_complete()) {
            Some(i) => {
                self.watching = Some(i);
                self.watch = self.command.deps[i].completion();
                false
            }
            None => true,
        }
    }
}

/// Hold out-of-order commands until their wait lists finish, then hand them
/// to the runner threads.
fn dispatch_ready(incoming: Receiver<Command>, ready: Sender<Command>) {
    let mut held: Vec<Held> = Vec::new();
    let mut open = true;

    loop {
        let mut i = 0;
        while i < held.len() {
            if held[i].refresh() {
                let command = held.swap_remove(i).command;
                if ready.send(command).is_err() {
                    return;
                }
            } else {
                i += 1;
            }
        }
        if !open && held.is_empty() {
            return;
        }

        // Some(_) when the incoming channel fired
        let arrived = {
            let mut select = Select::new();
            let incoming_op = if open { Some(select.recv(&incoming)) } else { None };
            for h in &held {
                select.recv(&h.watch);
            }
            let op = select.select();
            let index = op.index();
            if Some(index) == incoming_op {
                Some(op.recv(&incoming).ok())
            } else {
                let first_watch = usize::from(incoming_op.is_some());
                let _ = op.recv(&held[index - first_watch].watch);
                None
            }
        };

        match arrived {
            Some(Some(command)) => held.push(Held::new(command)),
            Some(None) => open = false,
            None => {}
        }
    }
}

/// Channel of commands to one device of a context.
///
/// In-order queues run commands one after another on a dedicated thread.
/// Out-of-order queues hand each command to a small set of runner threads as
/// soon as its wait list is done.
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<QueueInner>,
}

impl CommandQueue {
    pub fn new(context: &Context, device: &Device, options: QueueOptions) -> Result<Self> {
        if !context.contains(device) {
            return Err(Error::context(format!(
                "device '{}' is not part of context {}",
                device.name(),
                context.id()
            )));
        }

        let caps = device.info().queue;
        if options.profiling && !caps.profiling {
            return Err(Error::context(format!(
                "device '{}' does not support profiling queues",
                device.name()
            )));
        }

        let mut effective = options;
        let fell_back = options.out_of_order && !caps.out_of_order;
        if fell_back {
            warn!(
                device = %device.name(),
                "out-of-order execution not supported, using an in-order queue"
            );
            effective.out_of_order = false;
        }

        let id = QUEUE_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let (sender, commands) = unbounded::<Command>();
        let name = format!("{}-queue-{}", device.thread_name_prefix(), id);
        if effective.out_of_order {
            spawn_out_of_order(name, commands)?;
        } else {
            spawn_in_order(name, commands)?;
        }

        debug!(
            queue = id,
            device = %device.name(),
            out_of_order = effective.out_of_order,
            profiling = effective.profiling,
            "created command queue"
        );

        Ok(Self {
            inner: Arc::new(QueueInner {
                id,
                context: context.clone(),
                device: device.clone(),
                options: effective,
                fell_back,
                sender,
                issued: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    /// Properties in effect, after any fallback.
    pub fn options(&self) -> QueueOptions {
        self.inner.options
    }

    pub fn is_out_of_order(&self) -> bool {
        self.inner.options.out_of_order
    }

    pub fn profiling_enabled(&self) -> bool {
        self.inner.options.profiling
    }

    /// True when out-of-order execution was requested but the device could
    /// only provide an in-order queue.
    pub fn fell_back_to_in_order(&self) -> bool {
        self.inner.fell_back
    }

    /// Launch `kernel` over `range` with its currently bound arguments.
    pub fn enqueue_range(&self, kernel: &Kernel, range: &NdRange, wait_on: &[Event]) -> Result<Event> {
        let device = &self.inner.device;
        if kernel.program().context().id() != self.inner.context.id() {
            return Err(Error::dispatch(format!(
                "kernel '{}' belongs to another context",
                kernel.name()
            )));
        }
        if kernel.program().build_status(device) != BuildStatus::Success {
            return Err(Error::dispatch(format!(
                "program '{}' is not built for device '{}'",
                kernel.program().label(),
                device.name()
            )));
        }

        let info = device.info();
        let group_limit = kernel.work_group_size(device)?;
        let resolved = range.resolve(info.max_work_item_sizes, group_limit)?;

        let local_bytes = kernel.local_memory_size();
        if local_bytes > info.local_memory_bytes {
            return Err(Error::dispatch(format!(
                "kernel '{}' needs {} bytes of local memory, device has {}",
                kernel.name(),
                local_bytes,
                info.local_memory_bytes
            )));
        }

        let args: Arc<[LaunchArg]> = kernel
            .snapshot_args()?
            .into_iter()
            .map(|arg| match arg {
                KernelArg::Scalar(value) => LaunchArg::Scalar(value),
                KernelArg::Buffer(buffer) => LaunchArg::Global {
                    memory: buffer.memory().clone(),
                    access: buffer.access(),
                },
                KernelArg::Image(image) => LaunchArg::Image {
                    memory: image.memory().clone(),
                    access: image.access(),
                    format: image.format(),
                    width: image.width(),
                    height: image.height(),
                },
                KernelArg::Local(bytes) => LaunchArg::Local(bytes),
            })
            .collect();

        debug!(
            kernel = kernel.name(),
            global = ?resolved.global,
            local = ?resolved.local,
            groups = resolved.total_groups(),
            "enqueue range"
        );

        let command = if range.global().iter().product::<usize>() == 1 {
            CommandType::Task
        } else {
            CommandType::NdRangeKernel
        };
        let native = kernel.native().clone();
        let device = device.clone();
        self.submit(command, wait_on, move || {
            execute_range(&device, native, args, resolved)
        })
    }

    /// Launch `kernel` as a single work-item.
    pub fn enqueue_task(&self, kernel: &Kernel, wait_on: &[Event]) -> Result<Event> {
        self.enqueue_range(kernel, &NdRange::d1(1).with_local(&[1]), wait_on)
    }

    /// Copy `data` into the start of `buffer`. The host slice is copied at
    /// enqueue, so it may be reused as soon as this returns.
    pub fn write_buffer<T: Pod>(
        &self,
        buffer: &Buffer,
        blocking: bool,
        data: &[T],
        wait_on: &[Event],
    ) -> Result<Event> {
        self.check_buffer(buffer)?;
        let bytes: Vec<u8> = bytemuck::cast_slice(data).to_vec();
        buffer.check_range(0, bytes.len())?;

        let memory = buffer.memory().clone();
        let metrics = self.inner.device.metrics().clone();
        let event = self.submit(CommandType::WriteBuffer, wait_on, move || {
            memory.write_bytes(0, &bytes);
            metrics.record_write(bytes.len());
            Ok(())
        })?;

        if blocking {
            event.wait()?;
        }
        Ok(event)
    }

    /// Blocking read of the whole buffer.
    pub fn read_buffer<T: Pod>(&self, buffer: &Buffer, wait_on: &[Event]) -> Result<Vec<T>> {
        self.enqueue_read_buffer(buffer, wait_on)?.wait()
    }

    /// Blocking read of `count` elements starting `offset` bytes in.
    pub fn read_buffer_region<T: Pod>(
        &self,
        buffer: &Buffer,
        offset: usize,
        count: usize,
        wait_on: &[Event],
    ) -> Result<Vec<T>> {
        self.enqueue_read(buffer, offset, count, wait_on)?.wait()
    }

    /// Non-blocking read of the whole buffer.
    pub fn enqueue_read_buffer<T: Pod>(
        &self,
        buffer: &Buffer,
        wait_on: &[Event],
    ) -> Result<PendingRead<T>> {
        let count = buffer.element_count::<T>()?;
        self.enqueue_read(buffer, 0, count, wait_on)
    }

    fn enqueue_read<T: Pod>(
        &self,
        buffer: &Buffer,
        offset: usize,
        count: usize,
        wait_on: &[Event],
    ) -> Result<PendingRead<T>> {
        self.check_buffer(buffer)?;
        let len = count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| Error::dispatch("read size overflows"))?;
        buffer.check_range(offset, len)?;

        let memory = buffer.memory().clone();
        let metrics = self.inner.device.metrics().clone();
        let slot: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
        let filled = slot.clone();
        let event = self.submit(CommandType::ReadBuffer, wait_on, move || {
            let mut bytes = vec![0u8; len];
            memory.read_bytes(offset, &mut bytes);
            metrics.record_read(len);
            *filled.lock() = Some(bytes);
            Ok(())
        })?;

        Ok(PendingRead {
            event,
            slot,
            count,
            _elem: PhantomData,
        })
    }

    /// Device-side copy of `bytes` bytes between two buffers of this context.
    pub fn copy_buffer(
        &self,
        src: &Buffer,
        dst: &Buffer,
        src_offset: usize,
        dst_offset: usize,
        bytes: usize,
        wait_on: &[Event],
    ) -> Result<Event> {
        self.check_buffer(src)?;
        self.check_buffer(dst)?;
        src.check_range(src_offset, bytes)?;
        dst.check_range(dst_offset, bytes)?;
        if src == dst && src_offset < dst_offset + bytes && dst_offset < src_offset + bytes {
            return Err(Error::dispatch("source and destination regions overlap"));
        }

        let from = src.memory().clone();
        let to = dst.memory().clone();
        self.submit(CommandType::CopyBuffer, wait_on, move || {
            let mut staging = vec![0u8; bytes];
            from.read_bytes(src_offset, &mut staging);
            to.write_bytes(dst_offset, &staging);
            Ok(())
        })
    }

    /// Blocking read of a 2-D or 3-D region into `host`, which is laid out
    /// with the host pitches of `rect`. Host elements outside the region are
    /// left untouched.
    pub fn read_buffer_rect<T: Pod>(
        &self,
        buffer: &Buffer,
        rect: &BufferRect,
        host: &mut [T],
        wait_on: &[Event],
    ) -> Result<Event> {
        self.check_buffer(buffer)?;
        let layout = rect.resolve()?;
        let buffer_end = layout.buffer_extent();
        if buffer_end > buffer.size() {
            return Err(Error::dispatch(format!(
                "rectangle reaches byte {} of a {}-byte buffer",
                buffer_end,
                buffer.size()
            )));
        }
        let host_bytes: &mut [u8] = bytemuck::cast_slice_mut(host);
        let host_end = layout.host_extent();
        if host_end > host_bytes.len() {
            return Err(Error::dispatch(format!(
                "rectangle reaches byte {} of a {}-byte host array",
                host_end,
                host_bytes.len()
            )));
        }

        let memory = buffer.memory().clone();
        let metrics = self.inner.device.metrics().clone();
        let slot: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
        let filled = slot.clone();
        let event = self.submit(CommandType::ReadBufferRect, wait_on, move || {
            let row = layout.region[0];
            let mut rows = vec![0u8; row * layout.region[1] * layout.region[2]];
            for (i, chunk) in rows.chunks_mut(row).enumerate() {
                let (y, z) = (i % layout.region[1], i / layout.region[1]);
                memory.read_bytes(layout.buffer_offset(y, z), chunk);
            }
            metrics.record_read(rows.len());
            *filled.lock() = Some(rows);
            Ok(())
        })?;

        event.wait()?;
        let rows = slot
            .lock()
            .take()
            .ok_or_else(|| Error::dispatch("rectangle read produced no data"))?;
        let row = layout.region[0];
        for (i, chunk) in rows.chunks(row).enumerate() {
            let (y, z) = (i % layout.region[1], i / layout.region[1]);
            let at = layout.host_offset(y, z);
            host_bytes[at..at + row].copy_from_slice(chunk);
        }
        Ok(event)
    }

    /// Copy `pixels`, packed row after row, into `region` of `image` starting
    /// at pixel `origin`.
    pub fn write_image(
        &self,
        image: &Image2D,
        blocking: bool,
        origin: [usize; 2],
        region: [usize; 2],
        pixels: &[u8],
        wait_on: &[Event],
    ) -> Result<Event> {
        self.check_image(image)?;
        let len = image.check_region(origin, region)?;
        if pixels.len() != len {
            return Err(Error::dispatch(format!(
                "region {:?} needs {} bytes of pixels, got {}",
                region,
                len,
                pixels.len()
            )));
        }

        let rows = image_rows(image, origin, region);
        let row_len = len / region[1];
        let bytes = pixels.to_vec();
        let memory = image.memory().clone();
        let metrics = self.inner.device.metrics().clone();
        let event = self.submit(CommandType::WriteImage, wait_on, move || {
            for (at, chunk) in rows.into_iter().zip(bytes.chunks(row_len)) {
                memory.write_bytes(at, chunk);
            }
            metrics.record_write(bytes.len());
            Ok(())
        })?;

        if blocking {
            event.wait()?;
        }
        Ok(event)
    }

    /// Blocking read of `region` of `image` starting at pixel `origin`.
    /// Rows come back packed with no padding.
    pub fn read_image(
        &self,
        image: &Image2D,
        origin: [usize; 2],
        region: [usize; 2],
        wait_on: &[Event],
    ) -> Result<Vec<u8>> {
        self.enqueue_read_image(image, origin, region, wait_on)?.wait()
    }

    /// Non-blocking form of [`read_image`](CommandQueue::read_image).
    pub fn enqueue_read_image(
        &self,
        image: &Image2D,
        origin: [usize; 2],
        region: [usize; 2],
        wait_on: &[Event],
    ) -> Result<PendingRead<u8>> {
        self.check_image(image)?;
        let len = image.check_region(origin, region)?;

        let rows = image_rows(image, origin, region);
        let row_len = len / region[1];
        let memory = image.memory().clone();
        let metrics = self.inner.device.metrics().clone();
        let slot: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
        let filled = slot.clone();
        let event = self.submit(CommandType::ReadImage, wait_on, move || {
            let mut bytes = vec![0u8; len];
            for (at, chunk) in rows.into_iter().zip(bytes.chunks_mut(row_len)) {
                memory.read_bytes(at, chunk);
            }
            metrics.record_read(len);
            *filled.lock() = Some(bytes);
            Ok(())
        })?;

        Ok(PendingRead {
            event,
            slot,
            count: len,
            _elem: PhantomData,
        })
    }

    /// Block until every command issued so far has finished. Reports the
    /// first failure among them.
    pub fn finish(&self) -> Result<()> {
        let issued = std::mem::take(&mut *self.inner.issued.lock());
        Event::wait_all(&issued)
    }

    fn check_buffer(&self, buffer: &Buffer) -> Result<()> {
        if buffer.context_id() != self.inner.context.id() {
            return Err(Error::dispatch(format!(
                "buffer {} belongs to another context",
                buffer.id()
            )));
        }
        Ok(())
    }

    fn check_image(&self, image: &Image2D) -> Result<()> {
        if image.context_id() != self.inner.context.id() {
            return Err(Error::dispatch(format!(
                "image {} belongs to another context",
                image.id()
            )));
        }
        Ok(())
    }

    fn submit<F>(&self, command: CommandType, wait_on: &[Event], work: F) -> Result<Event>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        if let Some(foreign) = wait_on
            .iter()
            .find(|e| e.context_id() != self.inner.context.id())
        {
            return Err(Error::dispatch(format!(
                "event {} in the wait list belongs to another context",
                foreign.id()
            )));
        }

        let event = Event::new(
            command,
            self.inner.context.id(),
            self.inner.device.epoch(),
            self.inner.options.profiling,
            EventStatus::Queued,
        );
        let job = Command {
            event: event.clone(),
            deps: wait_on.to_vec(),
            work: Box::new(work),
        };

        self.inner
            .sender
            .send(job)
            .map_err(|_| Error::dispatch("command queue thread has exited"))?;
        event.mark_submitted();
        trace!(queue = self.inner.id, event = event.id(), ?command, "submitted");

        let mut issued = self.inner.issued.lock();
        issued.retain(|e| e.status() != EventStatus::Complete);
        issued.push(event.clone());
        Ok(event)
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("id", &self.inner.id)
            .field("device", &self.inner.device.id())
            .field("options", &self.inner.options)
            .field("fell_back", &self.inner.fell_back)
            .finish()
    }
}

/// Byte offset of each row of `region`.
fn image_rows(image: &Image2D, origin: [usize; 2], region: [usize; 2]) -> Vec<usize> {
    (0..region[1])
        .map(|y| image.pixel_offset(origin[0], origin[1] + y))
        .collect()
}

/// Run every work-group of a launch on the device pool.
fn execute_range(
    device: &Device,
    native: Arc<dyn NativeKernel>,
    args: Arc<[LaunchArg]>,
    range: ResolvedRange,
) -> Result<()> {
    let started = Instant::now();
    let pool = device.pool()?;
    let total = range.total_groups();
    let chunks = (pool.num_threads() * 4).min(total).max(1);
    let per_chunk = (total + chunks - 1) / chunks;

    let jobs: Vec<_> = (0..chunks)
        .map(|c| {
            let native = native.clone();
            let args = args.clone();
            let start = c * per_chunk;
            let end = (start + per_chunk).min(total);
            move || -> Result<()> {
                let shared = native.static_local_bytes() as usize;
                for linear in start..end {
                    let id = range.group_id_at(linear);
                    let group = WorkGroup::new(native.name(), &range, id, &args, shared);
                    native.run_group(&group)?;
                }
                Ok(())
            }
        })
        .collect();

    match pool.run_all(jobs).into_iter().find_map(|r| r.err()) {
        Some(e) => {
            device.metrics().record_kernel_failure();
            Err(e)
        }
        None => {
            device
                .metrics()
                .record_kernel_launch(total as u64, started.elapsed().as_nanos() as u64);
            Ok(())
        }
    }
}

/// Result of a non-blocking read. The data is only reachable through
/// [`wait`](PendingRead::wait).
pub struct PendingRead<T: Pod> {
    event: Event,
    slot: Arc<Mutex<Option<Vec<u8>>>>,
    count: usize,
    _elem: PhantomData<T>,
}

impl<T: Pod> PendingRead<T> {
    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn wait(self) -> Result<Vec<T>> {
        self.event.wait()?;
        let bytes = self
            .slot
            .lock()
            .take()
            .ok_or_else(|| Error::dispatch("read produced no data"))?;
        let mut out = vec![T::zeroed(); self.count];
        bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(&bytes);
        Ok(out)
    }
}

impl<T: Pod> fmt::Debug for PendingRead<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRead")
            .field("event", &self.event)
            .field("count", &self.count)
            .finish()
    }
}

/// Rectangular region of a buffer and where it lands in host memory.
///
/// `buffer_origin[0]`, `host_origin[0]` and `region[0]` are in bytes; the
/// other components count rows and slices. A zero row pitch means
/// `region[0]`; a zero slice pitch means `region[1] * row_pitch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferRect {
    pub buffer_origin: [usize; 3],
    pub host_origin: [usize; 3],
    pub region: [usize; 3],
    pub buffer_row_pitch: usize,
    pub buffer_slice_pitch: usize,
    pub host_row_pitch: usize,
    pub host_slice_pitch: usize,
}

impl BufferRect {
    pub fn new(region: [usize; 3]) -> Self {
        Self {
            region,
            ..Self::default()
        }
    }

    pub fn buffer_origin(mut self, origin: [usize; 3]) -> Self {
        self.buffer_origin = origin;
        self
    }

    pub fn host_origin(mut self, origin: [usize; 3]) -> Self {
        self.host_origin = origin;
        self
    }

    pub fn buffer_pitch(mut self, row: usize, slice: usize) -> Self {
        self.buffer_row_pitch = row;
        self.buffer_slice_pitch = slice;
        self
    }

    pub fn host_pitch(mut self, row: usize, slice: usize) -> Self {
        self.host_row_pitch = row;
        self.host_slice_pitch = slice;
        self
    }

    fn resolve(&self) -> Result<RectLayout> {
        if self.region.iter().any(|&r| r == 0) {
            return Err(Error::dispatch(format!(
                "rectangle region {:?} has a zero extent",
                self.region
            )));
        }
        let (buffer_row, buffer_slice) =
            pitches(self.region, self.buffer_row_pitch, self.buffer_slice_pitch, "buffer")?;
        let (host_row, host_slice) =
            pitches(self.region, self.host_row_pitch, self.host_slice_pitch, "host")?;
        Ok(RectLayout {
            buffer_origin: self.buffer_origin,
            host_origin: self.host_origin,
            region: self.region,
            buffer_row,
            buffer_slice,
            host_row,
            host_slice,
        })
    }
}

fn pitches(region: [usize; 3], row: usize, slice: usize, side: &str) -> Result<(usize, usize)> {
    let row = if row == 0 { region[0] } else { row };
    let slice = if slice == 0 { region[1] * row } else { slice };
    if row < region[0] || slice < region[1] * row {
        return Err(Error::dispatch(format!(
            "{} pitches ({}, {}) are smaller than the region {:?}",
            side, row, slice, region
        )));
    }
    Ok((row, slice))
}

#[derive(Debug, Clone, Copy)]
struct RectLayout {
    buffer_origin: [usize; 3],
    host_origin: [usize; 3],
    region: [usize; 3],
    buffer_row: usize,
    buffer_slice: usize,
    host_row: usize,
    host_slice: usize,
}

impl RectLayout {
    fn buffer_offset(&self, y: usize, z: usize) -> usize {
        (self.buffer_origin[2] + z) * self.buffer_slice
            + (self.buffer_origin[1] + y) * self.buffer_row
            + self.buffer_origin[0]
    }

    fn host_offset(&self, y: usize, z: usize) -> usize {
        (self.host_origin[2] + z) * self.host_slice
            + (self.host_origin[1] + y) * self.host_row
            + self.host_origin[0]
    }

    fn buffer_extent(&self) -> usize {
        self.buffer_offset(self.region[1] - 1, self.region[2] - 1) + self.region[0]
    }

    fn host_extent(&self) -> usize {
        self.host_offset(self.region[1] - 1, self.region[2] - 1) + self.region[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_default_pitches() {
        let layout = BufferRect::new([16, 2, 1]).resolve().unwrap();
        assert_eq!(layout.buffer_row, 16);
        assert_eq!(layout.buffer_slice, 32);
        assert_eq!(layout.host_extent(), 32);
    }

    #[test]
    fn test_rect_offsets() {
        let layout = BufferRect::new([4 * 4, 2, 1])
            .buffer_origin([5 * 4, 2, 0])
            .host_origin([4, 1, 0])
            .buffer_pitch(40, 0)
            .host_pitch(40, 0)
            .resolve()
            .unwrap();
        assert_eq!(layout.buffer_offset(0, 0), 2 * 40 + 20);
        assert_eq!(layout.buffer_offset(1, 0), 3 * 40 + 20);
        assert_eq!(layout.host_offset(1, 0), 2 * 40 + 4);
        assert_eq!(layout.buffer_extent(), 3 * 40 + 20 + 16);
    }

    #[test]
    fn test_rect_rejects_small_pitch_and_empty_region() {
        assert!(BufferRect::new([16, 2, 1]).buffer_pitch(8, 0).resolve().is_err());
        assert!(BufferRect::new([16, 0, 1]).resolve().is_err());
    }

    #[test]
    fn test_failure_message_unwraps_dispatch() {
        assert_eq!(failure_message(&Error::dispatch("boom")), "boom");
        assert!(failure_message(&Error::kernel_not_found("k")).contains("kernel not found"));
    }
}
