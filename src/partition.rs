//! Work-group sizing for two-level reductions.
//!
//! A reduction kernel sums one group's elements in local memory and writes
//! one partial per group; the host adds the partials. The planner picks the
//! group size `W` from three bounds: the device's work-group limit, the
//! kernel's work-group limit on that device, and the local memory one group
//! of `W` accumulators needs.
//!
//! When local memory is short, `W` shrinks by a factor of 4 per step. This
//! does not always find the largest size that fits.

use crate::dispatch::{KernelArg, NdRange};
use crate::error::{Error, Result};
use crate::platform::Device;
use crate::program::Kernel;
use tracing::debug;

/// Accumulator shape of a reduction kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReductionVariant {
    /// One accumulator per work-item.
    Scalar,
    /// One `width`-wide accumulator per work-item, covering `width`
    /// consecutive elements.
    Vector { width: usize },
}

impl ReductionVariant {
    pub const VECTOR4: ReductionVariant = ReductionVariant::Vector { width: 4 };

    pub fn width(self) -> usize {
        match self {
            ReductionVariant::Scalar => 1,
            ReductionVariant::Vector { width } => width,
        }
    }
}

/// Local memory one group of `work_group_size` items needs.
pub fn bytes_per_group(element_size: usize, work_group_size: usize, variant: ReductionVariant) -> u64 {
    (element_size * work_group_size * variant.width()) as u64
}

/// The three bounds a plan must respect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionLimits {
    pub device_max: usize,
    pub kernel_max: usize,
    pub local_memory_bytes: u64,
    pub kernel: String,
    pub device: String,
}

impl PartitionLimits {
    pub fn new(device_max: usize, kernel_max: usize, local_memory_bytes: u64) -> Self {
        Self {
            device_max,
            kernel_max,
            local_memory_bytes,
            kernel: "kernel".to_string(),
            device: "device".to_string(),
        }
    }

    /// Names used in error messages.
    pub fn named<K: Into<String>, D: Into<String>>(mut self, kernel: K, device: D) -> Self {
        self.kernel = kernel.into();
        self.device = device.into();
        self
    }

    /// Read the bounds for `kernel` on `device`. The device limit is also
    /// capped by its dimension-0 work-item limit, since reductions launch 1-D.
    pub fn query(kernel: &Kernel, device: &Device) -> Result<Self> {
        let info = device.info();
        let kernel_max = kernel.work_group_size(device)?;
        Ok(Self::new(
            info.max_work_group_size.min(info.max_work_item_sizes[0]),
            kernel_max,
            info.local_memory_bytes,
        )
        .named(kernel.name(), info.name))
    }
}

/// A legal partition of a reduction over `total_elements` work-items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkPartitionPlan {
    /// Work-items launched: the element count divided by the vector width.
    pub total_elements: usize,
    pub work_group_size: usize,
    pub num_groups: usize,
    pub local_buffer_bytes: u64,
    pub variant: ReductionVariant,
}

impl WorkPartitionPlan {
    /// The 1-D launch this plan describes.
    pub fn range(&self) -> NdRange {
        NdRange::d1(self.total_elements).with_local(&[self.work_group_size])
    }

    /// The per-group local reservation to bind to the kernel.
    pub fn local_arg(&self) -> KernelArg {
        KernelArg::local(self.local_buffer_bytes as usize)
    }

    /// Number of partial values the kernel writes: one per group, times the
    /// vector width.
    pub fn partial_count(&self) -> usize {
        self.num_groups * self.variant.width()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkPartitionPlanner {
    element_size: usize,
    variant: ReductionVariant,
}

impl WorkPartitionPlanner {
    pub fn new(element_size: usize, variant: ReductionVariant) -> Self {
        Self {
            element_size,
            variant,
        }
    }

    pub fn for_type<T>(variant: ReductionVariant) -> Self {
        Self::new(std::mem::size_of::<T>(), variant)
    }

    pub fn variant(&self) -> ReductionVariant {
        self.variant
    }

    /// Plan a reduction over `elements` logical elements.
    pub fn plan(&self, elements: usize, limits: &PartitionLimits) -> Result<WorkPartitionPlan> {
        let no_parallelism = |reason: String| Error::NoParallelismAvailable {
            kernel: limits.kernel.clone(),
            device: limits.device.clone(),
            reason,
        };

        if limits.kernel_max <= 1 {
            return Err(no_parallelism(
                "the kernel allows only one work-item per group".to_string(),
            ));
        }

        let mut w = limits.device_max.min(limits.kernel_max);
        while w > 0 && bytes_per_group(self.element_size, w, self.variant) > limits.local_memory_bytes {
            w /= 4;
        }
        if w == 0 {
            return Err(no_parallelism(format!(
                "no work-group size fits in {} bytes of local memory",
                limits.local_memory_bytes
            )));
        }

        let width = self.variant.width();
        if width == 0 || elements % width != 0 {
            return Err(Error::dispatch(format!(
                "{} elements do not split into vectors of width {}",
                elements, width
            )));
        }
        let effective = elements / width;
        if effective == 0 || effective % w != 0 {
            return Err(Error::dispatch(format!(
                "{} work-items do not divide into groups of {}",
                effective, w
            )));
        }

        let plan = WorkPartitionPlan {
            total_elements: effective,
            work_group_size: w,
            num_groups: effective / w,
            local_buffer_bytes: bytes_per_group(self.element_size, w, self.variant),
            variant: self.variant,
        };
        debug!(
            kernel = %limits.kernel,
            elements,
            work_group_size = plan.work_group_size,
            groups = plan.num_groups,
            local_bytes = plan.local_buffer_bytes,
            "planned reduction partition"
        );
        Ok(plan)
    }

    /// Query `kernel` on `device` and plan.
    pub fn plan_for(&self, elements: usize, kernel: &Kernel, device: &Device) -> Result<WorkPartitionPlan> {
        let limits = PartitionLimits::query(kernel, device)?;
        self.plan(elements, &limits)
    }
}

/// Host-side sum of per-group partials.
pub fn finalize_scalar<T: Copy + Into<f64>>(partials: &[T]) -> f64 {
    partials.iter().map(|&p| p.into()).sum()
}

/// Host-side sum of vector partials: component-wise first, then across the
/// components. `partials` holds `width` values per group.
pub fn finalize_vector<T: Copy + Into<f64>>(partials: &[T], width: usize) -> Result<f64> {
    if width == 0 || partials.len() % width != 0 {
        return Err(Error::dispatch(format!(
            "{} partials are not a whole number of {}-wide vectors",
            partials.len(),
            width
        )));
    }
    let mut lanes = vec![0f64; width];
    for group in partials.chunks(width) {
        for (lane, &value) in lanes.iter_mut().zip(group) {
            *lane += value.into();
        }
    }
    Ok(lanes.iter().sum())
}
