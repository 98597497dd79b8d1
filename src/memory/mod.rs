//! Device memory: buffers, images and the host arrays they may alias.

pub mod buffer;
pub mod image;
pub(crate) mod storage;

pub use buffer::{Buffer, BufferMode, BufferSource, HostMemory, MemAccess};
pub use image::{ChannelOrder, ChannelType, Image2D, ImageFormat};
pub(crate) use storage::DeviceMemory;
