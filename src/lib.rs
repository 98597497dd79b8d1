//! ndrange - host-side runtime for data-parallel kernels
//!
//! Enumerates compute platforms and devices, lets a user pick one, builds
//! kernel sources with per-device diagnostics, sizes work-groups for
//! reductions, and dispatches N-dimensional ranges and buffer transfers
//! through command queues with completion events.
//!
//! Kernels run on the host: each `__kernel` declared in a source is resolved
//! to a native Rust implementation registered in a [`KernelRegistry`], and
//! every device executes its work-groups on its own work-stealing pool.
//!
//! # Quick Start
//!
//! ```no_run
//! use ndrange_rs::prelude::*;
//!
//! let registry = KernelRegistry::new().with(KernelDef::new(
//!     "twice",
//!     vec![ParamKind::Global],
//!     |wg| {
//!         let data = wg.global_mut::<f32>(0)?;
//!         wg.for_each_item(|item| {
//!             let i = item.global_id(0);
//!             data.set(i, data.get(i) * 2.0);
//!         });
//!         Ok(())
//!     },
//! ));
//!
//! let runtime = Runtime::new(Config::default(), registry).unwrap();
//! let session = runtime.default_session().unwrap();
//! let source = KernelSource::new("twice.cl", "__kernel void twice(__global float* d) {}");
//! let program = session.build(&source, "").unwrap();
//!
//! let data = vec![1.0f32; 256];
//! let buffer = Buffer::from_slice(session.context(), MemAccess::ReadWrite, &data).unwrap();
//! let mut kernel = program.kernel("twice").unwrap();
//! kernel.set_arg(0, &buffer).unwrap();
//!
//! let queue = session.queue();
//! let done = queue.enqueue_range(&kernel, &NdRange::d1(256), &[]).unwrap();
//! let out: Vec<f32> = queue.read_buffer(&buffer, &[done]).unwrap();
//! assert!(out.iter().all(|&x| x == 2.0));
//! ```
//!
//! # Features
//!
//! - **Device selection**: numbered options, strict parsing of the choice
//! - **Per-device build logs**: one failure value carrying every failing device
//! - **Reduction planning**: work-group size from device, kernel and local memory limits
//! - **Queues and events**: in-order or out-of-order, profiling, user events
//! - **Telemetry**: launch and transfer counters (optional)

// Lint configuration
#![warn(missing_docs, missing_debug_implementations)]

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod memory;
pub mod partition;
pub mod platform;
pub mod prelude;
pub mod program;
pub mod runtime;
pub mod telemetry;

// Re-export key types at crate root
pub use config::{Config, ConfigBuilder, DeviceSpec, PlatformSpec};
pub use context::Context;
pub use dispatch::{CommandQueue, Event, KernelArg, NdRange, QueueOptions, UserEvent};
pub use error::{BuildFailure, BuildLog, Error, Result};
pub use memory::{Buffer, HostMemory, MemAccess};
pub use partition::{ReductionVariant, WorkPartitionPlan, WorkPartitionPlanner};
pub use platform::{Device, DeviceId, DeviceType, Platform};
pub use program::{Kernel, KernelRegistry, KernelSource, Program};
pub use runtime::{Runtime, Session};
