//! The view a native kernel body has of one work-group.

use super::args::{ScalarArg, ScalarValue};
use super::ndrange::ResolvedRange;
use crate::error::{Error, Result};
use crate::memory::image::MAX_PIXEL_BYTES;
use crate::memory::DeviceMemory;
use crate::memory::{ImageFormat, MemAccess};
use bytemuck::Pod;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Argument as captured at enqueue time.
#[derive(Debug, Clone)]
pub(crate) enum LaunchArg {
    Scalar(ScalarValue),
    Global {
        memory: Arc<DeviceMemory>,
        access: MemAccess,
    },
    Image {
        memory: Arc<DeviceMemory>,
        access: MemAccess,
        format: ImageFormat,
        width: usize,
        height: usize,
    },
    Local(usize),
}

/// One work-group of a launch.
///
/// Local memory is allocated fresh for every group and zero-filled. Each
/// [`for_each_item`](WorkGroup::for_each_item) call is one barrier-separated
/// phase: every item finishes the phase before any item starts the next.
pub struct WorkGroup<'a> {
    kernel: &'a str,
    range: &'a ResolvedRange,
    group_id: [usize; 3],
    args: &'a [LaunchArg],
    locals: Vec<Option<DeviceMemory>>,
    shared: Option<DeviceMemory>,
}

impl<'a> WorkGroup<'a> {
    pub(crate) fn new(
        kernel: &'a str,
        range: &'a ResolvedRange,
        group_id: [usize; 3],
        args: &'a [LaunchArg],
        static_local_bytes: usize,
    ) -> Self {
        let locals = args
            .iter()
            .map(|arg| match arg {
                LaunchArg::Local(bytes) => Some(DeviceMemory::zeroed(*bytes)),
                _ => None,
            })
            .collect();
        let shared = (static_local_bytes > 0).then(|| DeviceMemory::zeroed(static_local_bytes));
        Self {
            kernel,
            range,
            group_id,
            args,
            locals,
            shared,
        }
    }

    pub fn work_dim(&self) -> usize {
        self.range.dims
    }

    pub fn group_id(&self, dim: usize) -> usize {
        self.group_id.get(dim).copied().unwrap_or(0)
    }

    pub fn num_groups(&self, dim: usize) -> usize {
        if dim < 3 {
            self.range.num_groups(dim)
        } else {
            1
        }
    }

    pub fn local_size(&self, dim: usize) -> usize {
        self.range.local.get(dim).copied().unwrap_or(1)
    }

    pub fn global_size(&self, dim: usize) -> usize {
        self.range.global.get(dim).copied().unwrap_or(1)
    }

    pub fn global_offset(&self, dim: usize) -> usize {
        self.range.offset.get(dim).copied().unwrap_or(0)
    }

    /// Number of work-items in this group.
    pub fn size(&self) -> usize {
        self.range.items_per_group()
    }

    /// Run one phase for every work-item, dimension 0 fastest.
    pub fn for_each_item<F>(&self, mut f: F)
    where
        F: FnMut(&WorkItem),
    {
        let local = self.range.local;
        for z in 0..local[2] {
            for y in 0..local[1] {
                for x in 0..local[0] {
                    let item = WorkItem::new(self.range, self.group_id, [x, y, z]);
                    f(&item);
                }
            }
        }
    }

    /// By-value argument at `slot`.
    pub fn scalar<T: ScalarArg>(&self, slot: usize) -> Result<T> {
        match self.args.get(slot) {
            Some(LaunchArg::Scalar(value)) => T::from_value(value).ok_or_else(|| {
                self.arg_error(slot, format!("scalar is {:?}", value.scalar_type()))
            }),
            _ => Err(self.arg_error(slot, "not a scalar argument")),
        }
    }

    /// By-value byte array argument at `slot`.
    pub fn bytes(&self, slot: usize) -> Result<&[u8]> {
        match self.args.get(slot) {
            Some(LaunchArg::Scalar(ScalarValue::Bytes(bytes))) => Ok(bytes),
            _ => Err(self.arg_error(slot, "not a byte array argument")),
        }
    }

    /// Read view of the buffer at `slot`.
    pub fn global<T: Pod>(&self, slot: usize) -> Result<MemRef<'_, T>> {
        match self.args.get(slot) {
            Some(LaunchArg::Global { memory, .. }) => Ok(MemRef::new(memory)),
            _ => Err(self.arg_error(slot, "not a buffer argument")),
        }
    }

    /// Read-write view of the buffer at `slot`. Fails for read-only buffers.
    pub fn global_mut<T: Pod>(&self, slot: usize) -> Result<MemMut<'_, T>> {
        match self.args.get(slot) {
            Some(LaunchArg::Global { memory, access }) => {
                if !access.kernel_writable() {
                    return Err(self.arg_error(slot, "buffer is read-only"));
                }
                Ok(MemMut::new(memory))
            }
            _ => Err(self.arg_error(slot, "not a buffer argument")),
        }
    }

    /// Sampling view of the image at `slot`. Fails for write-only images.
    pub fn image(&self, slot: usize) -> Result<ImageRef<'_>> {
        match self.args.get(slot) {
            Some(LaunchArg::Image {
                memory,
                access,
                format,
                width,
                height,
            }) => {
                if !access.kernel_readable() {
                    return Err(self.arg_error(slot, "image is write-only"));
                }
                Ok(ImageRef {
                    pixels: Pixels::new(memory, *format, *width, *height),
                })
            }
            _ => Err(self.arg_error(slot, "not an image argument")),
        }
    }

    /// Writable view of the image at `slot`. Fails for read-only images.
    pub fn image_mut(&self, slot: usize) -> Result<ImageMut<'_>> {
        match self.args.get(slot) {
            Some(LaunchArg::Image {
                memory,
                access,
                format,
                width,
                height,
            }) => {
                if !access.kernel_writable() {
                    return Err(self.arg_error(slot, "image is read-only"));
                }
                Ok(ImageMut {
                    pixels: Pixels::new(memory, *format, *width, *height),
                })
            }
            _ => Err(self.arg_error(slot, "not an image argument")),
        }
    }

    /// This group's local memory for the reservation at `slot`.
    pub fn local<T: Pod>(&self, slot: usize) -> Result<MemMut<'_, T>> {
        match self.locals.get(slot) {
            Some(Some(memory)) => Ok(MemMut::new(memory)),
            _ => Err(self.arg_error(slot, "not a local argument")),
        }
    }

    /// The kernel's statically declared local memory, shared by the group.
    pub fn shared<T: Pod>(&self) -> Result<MemMut<'_, T>> {
        self.shared.as_ref().map(MemMut::new).ok_or_else(|| {
            Error::dispatch(format!("kernel '{}' declares no local memory", self.kernel))
        })
    }

    fn arg_error<S: fmt::Display>(&self, slot: usize, reason: S) -> Error {
        Error::dispatch(format!(
            "kernel '{}' argument {}: {}",
            self.kernel, slot, reason
        ))
    }
}

impl fmt::Debug for WorkGroup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkGroup")
            .field("kernel", &self.kernel)
            .field("group_id", &self.group_id)
            .field("local", &self.range.local)
            .finish()
    }
}

/// Index space coordinates of one work-item.
#[derive(Debug, Clone, Copy)]
pub struct WorkItem {
    global: [usize; 3],
    local: [usize; 3],
    group: [usize; 3],
    local_size: [usize; 3],
    global_size: [usize; 3],
    offset: [usize; 3],
}

impl WorkItem {
    fn new(range: &ResolvedRange, group: [usize; 3], local: [usize; 3]) -> Self {
        let mut global = [0; 3];
        for d in 0..3 {
            global[d] = range.offset[d] + group[d] * range.local[d] + local[d];
        }
        Self {
            global,
            local,
            group,
            local_size: range.local,
            global_size: range.global,
            offset: range.offset,
        }
    }

    /// Global id including the launch offset.
    pub fn global_id(&self, dim: usize) -> usize {
        self.global.get(dim).copied().unwrap_or(0)
    }

    pub fn local_id(&self, dim: usize) -> usize {
        self.local.get(dim).copied().unwrap_or(0)
    }

    pub fn group_id(&self, dim: usize) -> usize {
        self.group.get(dim).copied().unwrap_or(0)
    }

    pub fn local_linear_id(&self) -> usize {
        (self.local[2] * self.local_size[1] + self.local[1]) * self.local_size[0] + self.local[0]
    }

    /// Row-major position in the launch with the offset removed.
    pub fn global_linear_id(&self) -> usize {
        let g = |d: usize| self.global[d] - self.offset[d];
        (g(2) * self.global_size[1] + g(1)) * self.global_size[0] + g(0)
    }
}

/// Typed read view over device memory.
pub struct MemRef<'g, T> {
    memory: &'g DeviceMemory,
    len: usize,
    _elem: PhantomData<T>,
}

impl<'g, T: Pod> MemRef<'g, T> {
    fn new(memory: &'g DeviceMemory) -> Self {
        Self {
            memory,
            len: memory.len() / std::mem::size_of::<T>(),
            _elem: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Panics
    /// If `index` is out of bounds.
    pub fn get(&self, index: usize) -> T {
        assert!(index < self.len, "index {} out of bounds ({})", index, self.len);
        self.memory.load(index * std::mem::size_of::<T>())
    }
}

/// Typed read-write view over device memory. Element stores from different
/// work-items never tear each other.
pub struct MemMut<'g, T> {
    memory: &'g DeviceMemory,
    len: usize,
    _elem: PhantomData<T>,
}

impl<'g, T: Pod> MemMut<'g, T> {
    fn new(memory: &'g DeviceMemory) -> Self {
        Self {
            memory,
            len: memory.len() / std::mem::size_of::<T>(),
            _elem: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Panics
    /// If `index` is out of bounds.
    pub fn get(&self, index: usize) -> T {
        assert!(index < self.len, "index {} out of bounds ({})", index, self.len);
        self.memory.load(index * std::mem::size_of::<T>())
    }

    /// # Panics
    /// If `index` is out of bounds.
    pub fn set(&self, index: usize, value: T) {
        assert!(index < self.len, "index {} out of bounds ({})", index, self.len);
        self.memory.store(index * std::mem::size_of::<T>(), value);
    }
}

impl<T> fmt::Debug for MemRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemRef").field("len", &self.len).finish()
    }
}

impl<T> fmt::Debug for MemMut<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemMut").field("len", &self.len).finish()
    }
}

struct Pixels<'g> {
    memory: &'g DeviceMemory,
    format: ImageFormat,
    width: usize,
    height: usize,
}

impl<'g> Pixels<'g> {
    fn new(memory: &'g DeviceMemory, format: ImageFormat, width: usize, height: usize) -> Self {
        Self {
            memory,
            format,
            width,
            height,
        }
    }

    // clamp-to-edge
    fn clamped_offset(&self, x: isize, y: isize) -> usize {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        (y * self.width + x) * self.format.pixel_size()
    }

    fn checked_offset(&self, x: usize, y: usize) -> usize {
        assert!(
            x < self.width && y < self.height,
            "pixel ({}, {}) outside {}x{} image",
            x,
            y,
            self.width,
            self.height
        );
        (y * self.width + x) * self.format.pixel_size()
    }

    fn read(&self, x: isize, y: isize) -> [u8; MAX_PIXEL_BYTES] {
        let mut raw = [0u8; MAX_PIXEL_BYTES];
        let size = self.format.pixel_size();
        self.memory.read_bytes(self.clamped_offset(x, y), &mut raw[..size]);
        raw
    }

    fn write(&self, x: usize, y: usize, raw: &[u8; MAX_PIXEL_BYTES]) {
        let size = self.format.pixel_size();
        self.memory.write_bytes(self.checked_offset(x, y), &raw[..size]);
    }

    fn read_f32(&self, x: isize, y: isize) -> [f32; 4] {
        self.format.decode_f32(&self.read(x, y))
    }

    fn read_u32(&self, x: isize, y: isize) -> [u32; 4] {
        self.format.decode_u32(&self.read(x, y))
    }
}

/// Read view of an image. Coordinates outside the image clamp to the
/// nearest edge pixel.
pub struct ImageRef<'g> {
    pixels: Pixels<'g>,
}

impl ImageRef<'_> {
    pub fn width(&self) -> usize {
        self.pixels.width
    }

    pub fn height(&self) -> usize {
        self.pixels.height
    }

    /// RGBA as floats: normalized channels in `0.0..=1.0`.
    pub fn read_f32(&self, x: isize, y: isize) -> [f32; 4] {
        self.pixels.read_f32(x, y)
    }

    /// RGBA as raw unsigned channel values.
    pub fn read_u32(&self, x: isize, y: isize) -> [u32; 4] {
        self.pixels.read_u32(x, y)
    }
}

/// Writable view of an image. Reads clamp like [`ImageRef`]; writes must
/// land inside the image.
pub struct ImageMut<'g> {
    pixels: Pixels<'g>,
}

impl ImageMut<'_> {
    pub fn width(&self) -> usize {
        self.pixels.width
    }

    pub fn height(&self) -> usize {
        self.pixels.height
    }

    pub fn read_f32(&self, x: isize, y: isize) -> [f32; 4] {
        self.pixels.read_f32(x, y)
    }

    pub fn read_u32(&self, x: isize, y: isize) -> [u32; 4] {
        self.pixels.read_u32(x, y)
    }

    /// # Panics
    /// If (`x`, `y`) is outside the image.
    pub fn write_f32(&self, x: usize, y: usize, rgba: [f32; 4]) {
        let mut raw = [0u8; MAX_PIXEL_BYTES];
        self.pixels.format.encode_f32(rgba, &mut raw);
        self.pixels.write(x, y, &raw);
    }

    /// # Panics
    /// If (`x`, `y`) is outside the image.
    pub fn write_u32(&self, x: usize, y: usize, rgba: [u32; 4]) {
        let mut raw = [0u8; MAX_PIXEL_BYTES];
        self.pixels.format.encode_u32(rgba, &mut raw);
        self.pixels.write(x, y, &raw);
    }
}

impl fmt::Debug for ImageRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRef")
            .field("width", &self.pixels.width)
            .field("height", &self.pixels.height)
            .field("format", &self.pixels.format)
            .finish()
    }
}

impl fmt::Debug for ImageMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageMut")
            .field("width", &self.pixels.width)
            .field("height", &self.pixels.height)
            .field("format", &self.pixels.format)
            .finish()
    }
}

/// 32-bit element types with atomic read-modify-write support.
pub trait AtomicElement: Pod {
    fn into_word(self) -> u32;
    fn from_word(word: u32) -> Self;
    fn sum(self, other: Self) -> Self;
    fn max_of(self, other: Self) -> Self;
    fn min_of(self, other: Self) -> Self;
    fn one() -> Self;
}

impl AtomicElement for u32 {
    fn into_word(self) -> u32 {
        self
    }
    fn from_word(bits: u32) -> Self {
        bits
    }
    fn sum(self, other: Self) -> Self {
        self.wrapping_add(other)
    }
    fn max_of(self, other: Self) -> Self {
        Ord::max(self, other)
    }
    fn min_of(self, other: Self) -> Self {
        Ord::min(self, other)
    }
    fn one() -> Self {
        1
    }
}

impl AtomicElement for i32 {
    fn into_word(self) -> u32 {
        self as u32
    }
    fn from_word(bits: u32) -> Self {
        bits as i32
    }
    fn sum(self, other: Self) -> Self {
        self.wrapping_add(other)
    }
    fn max_of(self, other: Self) -> Self {
        Ord::max(self, other)
    }
    fn min_of(self, other: Self) -> Self {
        Ord::min(self, other)
    }
    fn one() -> Self {
        1
    }
}

impl AtomicElement for f32 {
    fn into_word(self) -> u32 {
        f32::to_bits(self)
    }
    fn from_word(bits: u32) -> Self {
        f32::from_bits(bits)
    }
    fn sum(self, other: Self) -> Self {
        self + other
    }
    fn max_of(self, other: Self) -> Self {
        f32::max(self, other)
    }
    fn min_of(self, other: Self) -> Self {
        f32::min(self, other)
    }
    fn one() -> Self {
        1.0
    }
}

impl<'g, T: AtomicElement> MemMut<'g, T> {
    /// Atomically replace element `index` with `f(old)`. Returns the old value.
    ///
    /// # Panics
    /// If `index` is out of bounds.
    pub fn atomic_update<F>(&self, index: usize, mut f: F) -> T
    where
        F: FnMut(T) -> T,
    {
        assert!(index < self.len, "index {} out of bounds ({})", index, self.len);
        let previous = self
            .memory
            .update_word(index * 4, |bits| f(T::from_word(bits)).into_word());
        T::from_word(previous)
    }

    pub fn atomic_add(&self, index: usize, value: T) -> T {
        self.atomic_update(index, |old| old.sum(value))
    }

    pub fn atomic_inc(&self, index: usize) -> T {
        self.atomic_update(index, |old| old.sum(T::one()))
    }

    pub fn atomic_max(&self, index: usize, value: T) -> T {
        self.atomic_update(index, |old| old.max_of(value))
    }

    pub fn atomic_min(&self, index: usize, value: T) -> T {
        self.atomic_update(index, |old| old.min_of(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ndrange::NdRange;

    fn range(global: &[usize], local: &[usize]) -> ResolvedRange {
        NdRange::new(global)
            .with_local(local)
            .resolve([1024, 1024, 64], 1024)
            .unwrap()
    }

    #[test]
    fn test_item_ids_include_offset() {
        let resolved = NdRange::d2(6, 4)
            .with_offset(&[3, 5])
            .with_local(&[3, 2])
            .resolve([1024, 1024, 64], 1024)
            .unwrap();
        let args: [LaunchArg; 0] = [];
        let group = WorkGroup::new("k", &resolved, [1, 1, 0], &args, 0);

        let mut seen = Vec::new();
        group.for_each_item(|item| {
            seen.push((item.global_id(0), item.global_id(1), item.global_linear_id()))
        });
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[0], (6, 7, 2 * 6 + 3));
        assert_eq!(seen[5], (8, 8, 3 * 6 + 5));
    }

    #[test]
    fn test_local_memory_is_per_group() {
        let resolved = range(&[8], &[4]);
        let args = [LaunchArg::Local(16)];
        let group = WorkGroup::new("k", &resolved, [0, 0, 0], &args, 0);
        let scratch = group.local::<u32>(0).unwrap();
        assert_eq!(scratch.len(), 4);
        group.for_each_item(|item| scratch.set(item.local_id(0), item.global_id(0) as u32));
        assert_eq!(scratch.get(3), 3);

        let other = WorkGroup::new("k", &resolved, [1, 0, 0], &args, 8);
        assert_eq!(other.local::<u32>(0).unwrap().get(3), 0);
        assert_eq!(other.shared::<i32>().unwrap().len(), 2);
        assert!(group.shared::<i32>().is_err());
    }

    #[test]
    fn test_read_only_buffer_rejects_mutable_view() {
        let resolved = range(&[4], &[4]);
        let args = [LaunchArg::Global {
            memory: Arc::new(DeviceMemory::zeroed(16)),
            access: MemAccess::ReadOnly,
        }];
        let group = WorkGroup::new("k", &resolved, [0, 0, 0], &args, 0);
        assert!(group.global::<f32>(0).is_ok());
        assert!(matches!(group.global_mut::<f32>(0), Err(Error::RuntimeDispatch(_))));
        assert!(group.scalar::<f32>(0).is_err());
    }

    #[test]
    fn test_image_views_clamp_and_check_access() {
        let resolved = range(&[4], &[4]);
        let format = ImageFormat::new(crate::memory::ChannelOrder::R, crate::memory::ChannelType::Float);
        let memory = Arc::new(DeviceMemory::zeroed(2 * 2 * 4));
        let args = [
            LaunchArg::Image {
                memory: memory.clone(),
                access: MemAccess::ReadWrite,
                format,
                width: 2,
                height: 2,
            },
            LaunchArg::Image {
                memory,
                access: MemAccess::WriteOnly,
                format,
                width: 2,
                height: 2,
            },
        ];
        let group = WorkGroup::new("k", &resolved, [0, 0, 0], &args, 0);

        let out = group.image_mut(0).unwrap();
        out.write_f32(1, 0, [3.0, 0.0, 0.0, 0.0]);
        out.write_f32(0, 1, [5.0, 0.0, 0.0, 0.0]);

        let view = group.image(0).unwrap();
        assert_eq!(view.read_f32(1, 0), [3.0, 0.0, 0.0, 1.0]);
        assert_eq!(view.read_f32(9, -4)[0], 3.0);
        assert_eq!(view.read_f32(-1, 7)[0], 5.0);
        assert!(group.image(1).is_err());
        assert!(group.global::<f32>(0).is_err());
    }

    #[test]
    fn test_atomics() {
        let memory = DeviceMemory::zeroed(8);
        let view: MemMut<'_, i32> = MemMut::new(&memory);
        assert_eq!(view.atomic_inc(0), 0);
        assert_eq!(view.atomic_add(0, 5), 1);
        view.atomic_max(1, -3);
        assert_eq!(view.get(1), 0);
        view.atomic_min(1, -3);
        assert_eq!(view.get(1), -3);
        assert_eq!(view.get(0), 6);
    }
}
