//! Work-group execution infrastructure.
//!
//! Every device runs its work-groups on a [`ComputePool`]: named worker
//! threads with local FIFO deques, a global injector and randomized stealing.

pub mod pool;
pub mod task;
pub mod worker;

pub use pool::{ComputePool, PoolSettings};

pub(crate) use task::Task;
