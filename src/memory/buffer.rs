//! Context-owned device buffers.

use super::storage::DeviceMemory;
use crate::context::Context;
use crate::error::{Error, Result};
use bytemuck::Pod;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

static BUFFER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// How kernels may access a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemAccess {
    #[default]
    ReadWrite,
    ReadOnly,
    WriteOnly,
}

impl MemAccess {
    pub fn kernel_writable(self) -> bool {
        !matches!(self, MemAccess::ReadOnly)
    }

    pub fn kernel_readable(self) -> bool {
        !matches!(self, MemAccess::WriteOnly)
    }
}

/// Where a buffer's contents came from and who owns them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    /// Host data was copied at creation; the buffer owns its own storage and
    /// later host changes are not seen.
    CopyHost,
    /// The buffer aliases a [`HostMemory`] allocation. Device writes are
    /// visible through the host handle without a read-back. The host must not
    /// change the data while a command using the buffer is in flight.
    UseHost,
    /// Zero-initialised storage that only transfers and kernels touch.
    DeviceOnly,
}

/// Initial contents of a new buffer.
#[derive(Debug)]
pub enum BufferSource<'a, T: Pod> {
    CopyHost(&'a [T]),
    UseHost(&'a HostMemory<T>),
    DeviceOnly { len: usize },
}

/// Host array that can back a [`BufferMode::UseHost`] buffer in place.
///
/// The allocation is reference counted, so it lives as long as the longest
/// of the host handle and any buffer aliasing it.
pub struct HostMemory<T: Pod> {
    memory: Arc<DeviceMemory>,
    len: usize,
    _elem: PhantomData<T>,
}

impl<T: Pod> HostMemory<T> {
    pub fn from_slice(data: &[T]) -> Self {
        Self {
            memory: Arc::new(DeviceMemory::from_bytes(bytemuck::cast_slice(data))),
            len: data.len(),
            _elem: PhantomData,
        }
    }

    pub fn zeroed(len: usize) -> Self {
        Self {
            memory: Arc::new(DeviceMemory::zeroed(len * std::mem::size_of::<T>())),
            len,
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
        assert!(index < self.len, "host memory index {} out of range", index);
        self.memory.load(index * std::mem::size_of::<T>())
    }

    /// # Panics
    /// If `index` is out of bounds.
    pub fn set(&self, index: usize, value: T) {
        assert!(index < self.len, "host memory index {} out of range", index);
        self.memory.store(index * std::mem::size_of::<T>(), value);
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.memory.to_vec(0, self.len)
    }

    pub fn copy_from_slice(&self, data: &[T]) -> Result<()> {
        if data.len() != self.len {
            return Err(Error::dispatch(format!(
                "host memory holds {} elements, got {}",
                self.len,
                data.len()
            )));
        }
        self.memory.write_bytes(0, bytemuck::cast_slice(data));
        Ok(())
    }

    /// Number of buffers currently aliasing this allocation.
    pub fn alias_count(&self) -> usize {
        Arc::strong_count(&self.memory) - 1
    }
}

impl<T: Pod> fmt::Debug for HostMemory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostMemory")
            .field("len", &self.len)
            .field("aliases", &self.alias_count())
            .finish()
    }
}

struct BufferInner {
    id: u64,
    context_id: u64,
    access: MemAccess,
    mode: BufferMode,
    memory: Arc<DeviceMemory>,
}

/// Handle to a device buffer. Clones share the same storage.
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

impl Buffer {
    pub fn create<T: Pod>(
        context: &Context,
        access: MemAccess,
        source: BufferSource<'_, T>,
    ) -> Result<Self> {
        let (mode, memory) = match source {
            BufferSource::CopyHost(data) => (
                BufferMode::CopyHost,
                Arc::new(DeviceMemory::from_bytes(bytemuck::cast_slice(data))),
            ),
            BufferSource::UseHost(host) => (BufferMode::UseHost, host.memory.clone()),
            BufferSource::DeviceOnly { len } => (
                BufferMode::DeviceOnly,
                Arc::new(DeviceMemory::zeroed(len * std::mem::size_of::<T>())),
            ),
        };

        if memory.len() == 0 {
            return Err(Error::dispatch("buffer size must be > 0"));
        }
        let limit = context.max_allocation();
        if memory.len() as u64 > limit {
            return Err(Error::dispatch(format!(
                "buffer of {} bytes exceeds device memory ({} bytes)",
                memory.len(),
                limit
            )));
        }

        let id = BUFFER_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        trace!(buffer = id, bytes = memory.len(), ?mode, ?access, "created buffer");

        Ok(Self {
            inner: Arc::new(BufferInner {
                id,
                context_id: context.id(),
                access,
                mode,
                memory,
            }),
        })
    }

    pub fn from_slice<T: Pod>(context: &Context, access: MemAccess, data: &[T]) -> Result<Self> {
        Self::create(context, access, BufferSource::CopyHost(data))
    }

    pub fn use_host<T: Pod>(
        context: &Context,
        access: MemAccess,
        host: &HostMemory<T>,
    ) -> Result<Self> {
        Self::create(context, access, BufferSource::UseHost(host))
    }

    pub fn device_only<T: Pod>(context: &Context, access: MemAccess, len: usize) -> Result<Self> {
        Self::create::<T>(context, access, BufferSource::DeviceOnly { len })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.inner.memory.len()
    }

    pub fn access(&self) -> MemAccess {
        self.inner.access
    }

    pub fn mode(&self) -> BufferMode {
        self.inner.mode
    }

    pub(crate) fn context_id(&self) -> u64 {
        self.inner.context_id
    }

    pub(crate) fn memory(&self) -> &Arc<DeviceMemory> {
        &self.inner.memory
    }

    /// Number of `T` elements the buffer holds; errors when the byte size is
    /// not a whole number of elements.
    pub(crate) fn element_count<T: Pod>(&self) -> Result<usize> {
        let elem = std::mem::size_of::<T>();
        if elem == 0 || self.size() % elem != 0 {
            return Err(Error::dispatch(format!(
                "buffer of {} bytes is not a whole number of {}-byte elements",
                self.size(),
                elem
            )));
        }
        Ok(self.size() / elem)
    }

    pub(crate) fn check_range(&self, offset: usize, bytes: usize) -> Result<()> {
        match offset.checked_add(bytes) {
            Some(end) if end <= self.size() => Ok(()),
            _ => Err(Error::dispatch(format!(
                "range {}..{} outside buffer of {} bytes",
                offset,
                offset.saturating_add(bytes),
                self.size()
            ))),
        }
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.inner.id)
            .field("size", &self.size())
            .field("access", &self.inner.access)
            .field("mode", &self.inner.mode)
            .finish()
    }
}
