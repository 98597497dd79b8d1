//! Two-dimensional image objects.
//!
//! Pixels are stored row-major with no row padding. Kernels sample them with
//! nearest filtering and clamp-to-edge addressing; channel values convert
//! according to the image's [`ImageFormat`].

use super::buffer::MemAccess;
use super::storage::DeviceMemory;
use crate::context::Context;
use crate::error::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

static IMAGE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Largest pixel: four 32-bit float channels.
pub(crate) const MAX_PIXEL_BYTES: usize = 16;

/// Which colour channels a pixel stores, in memory order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    R,
    Rg,
    Rgba,
    Bgra,
}

impl ChannelOrder {
    pub fn channels(self) -> usize {
        match self {
            ChannelOrder::R => 1,
            ChannelOrder::Rg => 2,
            ChannelOrder::Rgba | ChannelOrder::Bgra => 4,
        }
    }

    // rgba index of each stored channel
    fn layout(self) -> &'static [usize] {
        match self {
            ChannelOrder::R => &[0],
            ChannelOrder::Rg => &[0, 1],
            ChannelOrder::Rgba => &[0, 1, 2, 3],
            ChannelOrder::Bgra => &[2, 1, 0, 3],
        }
    }
}

/// Storage type of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    /// Byte read as `value / 255.0` by float accessors.
    UnormInt8,
    UnsignedInt8,
    Float,
}

impl ChannelType {
    pub fn size(self) -> usize {
        match self {
            ChannelType::UnormInt8 | ChannelType::UnsignedInt8 => 1,
            ChannelType::Float => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFormat {
    pub order: ChannelOrder,
    pub channel_type: ChannelType,
}

impl ImageFormat {
    /// 8-bit normalized RGBA, the usual format for bitmap data.
    pub const RGBA_UNORM8: ImageFormat = ImageFormat::new(ChannelOrder::Rgba, ChannelType::UnormInt8);

    pub const fn new(order: ChannelOrder, channel_type: ChannelType) -> Self {
        Self {
            order,
            channel_type,
        }
    }

    pub fn pixel_size(&self) -> usize {
        self.order.channels() * self.channel_type.size()
    }

    /// Pixel bytes to RGBA floats. Missing colour channels read 0, a missing
    /// alpha reads 1.
    pub(crate) fn decode_f32(&self, bytes: &[u8]) -> [f32; 4] {
        let mut rgba = [0.0, 0.0, 0.0, 1.0];
        let size = self.channel_type.size();
        for (i, &at) in self.order.layout().iter().enumerate() {
            let raw = &bytes[i * size..(i + 1) * size];
            rgba[at] = match self.channel_type {
                ChannelType::UnormInt8 => raw[0] as f32 / 255.0,
                ChannelType::UnsignedInt8 => raw[0] as f32,
                ChannelType::Float => f32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]),
            };
        }
        rgba
    }

    /// RGBA floats to pixel bytes; normalized channels saturate to 0..=1.
    pub(crate) fn encode_f32(&self, rgba: [f32; 4], out: &mut [u8]) {
        let size = self.channel_type.size();
        for (i, &at) in self.order.layout().iter().enumerate() {
            let slot = &mut out[i * size..(i + 1) * size];
            let v = rgba[at];
            match self.channel_type {
                ChannelType::UnormInt8 => slot[0] = (v.clamp(0.0, 1.0) * 255.0).round() as u8,
                ChannelType::UnsignedInt8 => slot[0] = v.clamp(0.0, 255.0).round() as u8,
                ChannelType::Float => slot.copy_from_slice(&v.to_ne_bytes()),
            }
        }
    }

    /// Pixel bytes to raw unsigned channels.
    pub(crate) fn decode_u32(&self, bytes: &[u8]) -> [u32; 4] {
        let mut rgba = [0, 0, 0, 1];
        let size = self.channel_type.size();
        for (i, &at) in self.order.layout().iter().enumerate() {
            let raw = &bytes[i * size..(i + 1) * size];
            rgba[at] = match self.channel_type {
                ChannelType::UnormInt8 | ChannelType::UnsignedInt8 => raw[0] as u32,
                ChannelType::Float => f32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]) as u32,
            };
        }
        rgba
    }

    /// Raw unsigned channels to pixel bytes; 8-bit channels saturate at 255.
    pub(crate) fn encode_u32(&self, rgba: [u32; 4], out: &mut [u8]) {
        let size = self.channel_type.size();
        for (i, &at) in self.order.layout().iter().enumerate() {
            let slot = &mut out[i * size..(i + 1) * size];
            match self.channel_type {
                ChannelType::UnormInt8 | ChannelType::UnsignedInt8 => {
                    slot[0] = rgba[at].min(255) as u8
                }
                ChannelType::Float => slot.copy_from_slice(&(rgba[at] as f32).to_ne_bytes()),
            }
        }
    }
}

struct ImageInner {
    id: u64,
    context_id: u64,
    access: MemAccess,
    format: ImageFormat,
    width: usize,
    height: usize,
    memory: Arc<DeviceMemory>,
}

/// Handle to a 2-D image. Clones share the same storage.
#[derive(Clone)]
pub struct Image2D {
    inner: Arc<ImageInner>,
}

impl Image2D {
    /// Zero-filled image.
    pub fn new(
        context: &Context,
        access: MemAccess,
        format: ImageFormat,
        width: usize,
        height: usize,
    ) -> Result<Self> {
        Self::create(context, access, format, width, height, None)
    }

    /// Image initialised with a copy of `pixels`, which must hold exactly
    /// `width * height` pixels of `format`.
    pub fn from_pixels(
        context: &Context,
        access: MemAccess,
        format: ImageFormat,
        width: usize,
        height: usize,
        pixels: &[u8],
    ) -> Result<Self> {
        Self::create(context, access, format, width, height, Some(pixels))
    }

    fn create(
        context: &Context,
        access: MemAccess,
        format: ImageFormat,
        width: usize,
        height: usize,
        pixels: Option<&[u8]>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::dispatch(format!(
                "image dimensions {}x{} must be > 0",
                width, height
            )));
        }
        let size = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(format.pixel_size()))
            .ok_or_else(|| Error::dispatch("image size overflows"))?;
        let limit = context.max_allocation();
        if size as u64 > limit {
            return Err(Error::dispatch(format!(
                "image of {} bytes exceeds device memory ({} bytes)",
                size, limit
            )));
        }

        let memory = match pixels {
            Some(data) if data.len() != size => {
                return Err(Error::dispatch(format!(
                    "{}x{} image of {:?} needs {} bytes, got {}",
                    width,
                    height,
                    format,
                    size,
                    data.len()
                )));
            }
            Some(data) => DeviceMemory::from_bytes(data),
            None => DeviceMemory::zeroed(size),
        };

        let id = IMAGE_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        trace!(image = id, width, height, ?format, ?access, "created image");

        Ok(Self {
            inner: Arc::new(ImageInner {
                id,
                context_id: context.id(),
                access,
                format,
                width,
                height,
                memory: Arc::new(memory),
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn format(&self) -> ImageFormat {
        self.inner.format
    }

    pub fn width(&self) -> usize {
        self.inner.width
    }

    pub fn height(&self) -> usize {
        self.inner.height
    }

    pub fn access(&self) -> MemAccess {
        self.inner.access
    }

    /// Bytes per row.
    pub fn row_pitch(&self) -> usize {
        self.inner.width * self.inner.format.pixel_size()
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.inner.memory.len()
    }

    pub(crate) fn context_id(&self) -> u64 {
        self.inner.context_id
    }

    pub(crate) fn memory(&self) -> &Arc<DeviceMemory> {
        &self.inner.memory
    }

    /// Byte length of `region` when packed row after row.
    pub(crate) fn check_region(&self, origin: [usize; 2], region: [usize; 2]) -> Result<usize> {
        let fits = |d: usize, extent: usize| {
            region[d] > 0 && origin[d].checked_add(region[d]).map_or(false, |end| end <= extent)
        };
        if !fits(0, self.width()) || !fits(1, self.height()) {
            return Err(Error::dispatch(format!(
                "region {:?} at {:?} outside {}x{} image",
                region,
                origin,
                self.width(),
                self.height()
            )));
        }
        Ok(region[0] * region[1] * self.inner.format.pixel_size())
    }

    /// Byte offset of pixel (`x`, `y`).
    pub(crate) fn pixel_offset(&self, x: usize, y: usize) -> usize {
        y * self.row_pitch() + x * self.inner.format.pixel_size()
    }
}

impl PartialEq for Image2D {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Image2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image2D")
            .field("id", &self.inner.id)
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("format", &self.inner.format)
            .field("access", &self.inner.access)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unorm_round_trip_is_exact() {
        let format = ImageFormat::RGBA_UNORM8;
        let mut out = [0u8; 4];
        for byte in [0u8, 1, 127, 128, 254, 255] {
            let rgba = format.decode_f32(&[byte, byte, byte, byte]);
            format.encode_f32(rgba, &mut out);
            assert_eq!(out, [byte; 4]);
        }
        format.encode_f32([-0.5, 2.0, 0.5, 1.0], &mut out);
        assert_eq!(out, [0, 255, 128, 255]);
    }

    #[test]
    fn test_bgra_swizzle_and_missing_channels() {
        let bgra = ImageFormat::new(ChannelOrder::Bgra, ChannelType::UnsignedInt8);
        assert_eq!(bgra.decode_u32(&[1, 2, 3, 4]), [3, 2, 1, 4]);
        let mut out = [0u8; 4];
        bgra.encode_u32([10, 20, 300, 40], &mut out);
        assert_eq!(out, [255, 20, 10, 40]);

        let red = ImageFormat::new(ChannelOrder::R, ChannelType::Float);
        assert_eq!(red.pixel_size(), 4);
        assert_eq!(red.decode_f32(&2.5f32.to_ne_bytes()), [2.5, 0.0, 0.0, 1.0]);
        assert_eq!(red.decode_u32(&7.9f32.to_ne_bytes()), [7, 0, 0, 1]);
    }
}
