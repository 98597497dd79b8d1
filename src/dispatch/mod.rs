//! Kernel launches, buffer transfers and their completion events.
//!
//! A [`CommandQueue`] feeds commands to one device. Each command yields an
//! [`Event`] that later commands (on any queue of the same context) can wait
//! on. Kernel bodies see their launch through a [`WorkGroup`].

pub mod args;
pub mod event;
pub mod ndrange;
pub mod queue;
pub mod workgroup;

pub use args::{KernelArg, ScalarArg, ScalarType, ScalarValue};
pub use event::{CommandType, Event, EventStatus, ProfilingInfo, UserEvent};
pub use ndrange::{NdRange, ResolvedRange};
pub use queue::{BufferRect, CommandQueue, PendingRead, QueueOptions};
pub use workgroup::{AtomicElement, ImageMut, ImageRef, MemMut, MemRef, WorkGroup, WorkItem};
