pub use crate::config::{Config, ConfigBuilder, DeviceSpec, PlatformSpec};
pub use crate::context::Context;
pub use crate::dispatch::{
    BufferRect, CommandQueue, CommandType, Event, EventStatus, KernelArg, NdRange, PendingRead,
    QueueOptions, ScalarType, UserEvent, WorkGroup, WorkItem,
};
pub use crate::error::{Error, Result};
pub use crate::memory::{
    Buffer, BufferMode, ChannelOrder, ChannelType, HostMemory, Image2D, ImageFormat, MemAccess,
};
pub use crate::partition::{
    finalize_scalar, finalize_vector, PartitionLimits, ReductionVariant, WorkPartitionPlan,
    WorkPartitionPlanner,
};
pub use crate::platform::{Device, DeviceType, Platform};
pub use crate::program::{Kernel, KernelDef, KernelRegistry, KernelSource, ParamKind, Program};
pub use crate::runtime::{Runtime, Session};

#[cfg(feature = "telemetry")]
pub use crate::telemetry::{Metrics, MetricsSnapshot};
