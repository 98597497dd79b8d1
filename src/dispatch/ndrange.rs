//! N-dimensional launch geometry.

use crate::error::{Error, Result};

/// Offset, global size and optional local size of a launch, in 1 to 3
/// dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdRange {
    global: Vec<usize>,
    offset: Vec<usize>,
    local: Option<Vec<usize>>,
}

impl NdRange {
    pub fn new(global: &[usize]) -> Self {
        Self {
            global: global.to_vec(),
            offset: Vec::new(),
            local: None,
        }
    }

    pub fn d1(global: usize) -> Self {
        Self::new(&[global])
    }

    pub fn d2(x: usize, y: usize) -> Self {
        Self::new(&[x, y])
    }

    pub fn d3(x: usize, y: usize, z: usize) -> Self {
        Self::new(&[x, y, z])
    }

    pub fn with_offset(mut self, offset: &[usize]) -> Self {
        self.offset = offset.to_vec();
        self
    }

    pub fn with_local(mut self, local: &[usize]) -> Self {
        self.local = Some(local.to_vec());
        self
    }

    pub fn dims(&self) -> usize {
        self.global.len()
    }

    pub fn global(&self) -> &[usize] {
        &self.global
    }

    pub fn offset(&self) -> &[usize] {
        &self.offset
    }

    pub fn local(&self) -> Option<&[usize]> {
        self.local.as_deref()
    }

    /// Check against device limits and pick a local size when none was
    /// given. `group_limit` is the kernel's work-group size on the device.
    pub(crate) fn resolve(
        &self,
        max_item_sizes: [usize; 3],
        group_limit: usize,
    ) -> Result<ResolvedRange> {
        let dims = self.global.len();
        if !(1..=3).contains(&dims) {
            return Err(Error::dispatch(format!(
                "work dimension must be 1, 2 or 3, got {}",
                dims
            )));
        }
        if !self.offset.is_empty() && self.offset.len() != dims {
            return Err(Error::dispatch(format!(
                "offset has {} dimensions, global size has {}",
                self.offset.len(),
                dims
            )));
        }

        let mut global = [1usize; 3];
        let mut offset = [0usize; 3];
        global[..dims].copy_from_slice(&self.global);
        if !self.offset.is_empty() {
            offset[..dims].copy_from_slice(&self.offset);
        }
        if let Some(d) = global.iter().position(|&g| g == 0) {
            return Err(Error::dispatch(format!("global size is 0 in dimension {}", d)));
        }

        let local = match &self.local {
            Some(requested) => {
                if requested.len() != dims {
                    return Err(Error::dispatch(format!(
                        "local size has {} dimensions, global size has {}",
                        requested.len(),
                        dims
                    )));
                }
                let mut local = [1usize; 3];
                local[..dims].copy_from_slice(requested);
                for d in 0..dims {
                    if local[d] == 0 || global[d] % local[d] != 0 {
                        return Err(Error::dispatch(format!(
                            "local size {} does not divide global size {} in dimension {}",
                            local[d], global[d], d
                        )));
                    }
                    if local[d] > max_item_sizes[d] {
                        return Err(Error::dispatch(format!(
                            "local size {} exceeds device limit {} in dimension {}",
                            local[d], max_item_sizes[d], d
                        )));
                    }
                }
                let items: usize = local.iter().product();
                if items > group_limit {
                    return Err(Error::dispatch(format!(
                        "work-group of {} items exceeds limit {}",
                        items, group_limit
                    )));
                }
                local
            }
            None => {
                let mut local = [1usize; 3];
                let mut budget = group_limit.max(1);
                for d in 0..dims {
                    local[d] = largest_divisor_at_most(global[d], budget.min(max_item_sizes[d]));
                    budget /= local[d];
                }
                local
            }
        };

        Ok(ResolvedRange {
            dims,
            offset,
            global,
            local,
        })
    }
}

fn largest_divisor_at_most(n: usize, limit: usize) -> usize {
    (1..=limit.min(n).max(1))
        .rev()
        .find(|c| n % c == 0)
        .unwrap_or(1)
}

/// Launch geometry after validation. Unused dimensions have size 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub dims: usize,
    pub offset: [usize; 3],
    pub global: [usize; 3],
    pub local: [usize; 3],
}

impl ResolvedRange {
    pub fn num_groups(&self, dim: usize) -> usize {
        self.global[dim] / self.local[dim]
    }

    pub fn total_groups(&self) -> usize {
        (0..3).map(|d| self.num_groups(d)).product()
    }

    pub fn items_per_group(&self) -> usize {
        self.local.iter().product()
    }

    /// Group coordinates of the `linear`-th group, dimension 0 fastest.
    pub fn group_id_at(&self, linear: usize) -> [usize; 3] {
        let n0 = self.num_groups(0);
        let n1 = self.num_groups(1);
        [linear % n0, (linear / n0) % n1, linear / (n0 * n1)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITEMS: [usize; 3] = [1024, 1024, 64];

    #[test]
    fn test_explicit_2d_range() {
        let range = NdRange::d2(6, 4).with_offset(&[3, 5]).with_local(&[3, 2]);
        let resolved = range.resolve(ITEMS, 256).unwrap();
        assert_eq!(resolved.offset, [3, 5, 0]);
        assert_eq!(resolved.total_groups(), 4);
        assert_eq!(resolved.items_per_group(), 6);
        assert_eq!(resolved.group_id_at(3), [1, 1, 0]);
    }

    #[test]
    fn test_local_must_divide_global() {
        let range = NdRange::d1(100).with_local(&[32]);
        assert!(matches!(range.resolve(ITEMS, 256), Err(Error::RuntimeDispatch(_))));
    }

    #[test]
    fn test_local_respects_group_limit() {
        let range = NdRange::d2(64, 64).with_local(&[32, 32]);
        assert!(range.resolve(ITEMS, 256).is_err());
        assert!(range.resolve(ITEMS, 1024).is_ok());
    }

    #[test]
    fn test_auto_local_picks_divisor_within_limit() {
        let resolved = NdRange::d1(1000).resolve(ITEMS, 256).unwrap();
        assert_eq!(resolved.local[0], 250);

        let resolved = NdRange::d2(64, 64).resolve(ITEMS, 256).unwrap();
        assert_eq!(resolved.local, [64, 4, 1]);

        let resolved = NdRange::d1(7).resolve(ITEMS, 1).unwrap();
        assert_eq!(resolved.local[0], 1);
    }

    #[test]
    fn test_dimension_mismatches() {
        assert!(NdRange::new(&[]).resolve(ITEMS, 64).is_err());
        assert!(NdRange::new(&[1, 1, 1, 1]).resolve(ITEMS, 64).is_err());
        assert!(NdRange::d1(8).with_offset(&[0, 0]).resolve(ITEMS, 64).is_err());
        assert!(NdRange::d1(0).resolve(ITEMS, 64).is_err());
    }
}
