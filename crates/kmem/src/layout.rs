//! Physical memory regions managed by the kernel.
//!
//! ```text
//!     IRAM2_END -->+---------------------------+ High Address
//!                  |       PoolId::Iram2       |
//!   IRAM2_START -->|---------------------------|
//!                  |  unmanaged free space     |
//!     IRAM1_END -->|---------------------------|
//!                  |       PoolId::Iram1       |
//!   IRAM1_START -->|---------------------------|
//!                  |  kernel image, stacks     |
//!                  +---------------------------+ Low Address
//! ```
//!
//! Each region becomes exactly one buddy pool. A region must start at a
//! multiple of its (power-of-two rounded) size.

use core::ops::Range;

use derive_more::{Display, IsVariant};
use snafu::Snafu;

use crate::error::ErrorKind;

pub const IRAM1_START: usize = 0x0080_0000;
pub const IRAM1_END: usize = 0x0080_8000;
pub const IRAM2_START: usize = 0x0090_0000;
pub const IRAM2_END: usize = 0x0090_8000;

const _: () = assert!(IRAM1_END <= IRAM2_START);
const _: () = assert!(IRAM1_START.is_multiple_of((IRAM1_END - IRAM1_START).next_power_of_two()));
const _: () = assert!(IRAM2_START.is_multiple_of((IRAM2_END - IRAM2_START).next_power_of_two()));

/// Identifier of a memory pool, one per physical region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, IsVariant)]
pub enum PoolId {
    #[display("IRAM1")]
    Iram1,
    #[display("IRAM2")]
    Iram2,
}

#[derive(Debug, Snafu)]
#[snafu(display("invalid memory pool id: {raw}"))]
pub struct InvalidPoolIdError {
    #[snafu(implicit)]
    location: snafu::Location,
    raw: u32,
}

impl InvalidPoolIdError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidArgument
    }
}

impl PoolId {
    /// Number of pools.
    pub const COUNT: usize = 2;

    /// All pool ids, in region order.
    pub const ALL: [Self; Self::COUNT] = [Self::Iram1, Self::Iram2];

    /// Returns the index of this pool in per-pool tables.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Iram1 => 0,
            Self::Iram2 => 1,
        }
    }
}

impl TryFrom<u32> for PoolId {
    type Error = InvalidPoolIdError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Iram1),
            1 => Ok(Self::Iram2),
            _ => InvalidPoolIdSnafu { raw }.fail(),
        }
    }
}

impl From<PoolId> for u32 {
    fn from(pool_id: PoolId) -> Self {
        match pool_id {
            PoolId::Iram1 => 0,
            PoolId::Iram2 => 1,
        }
    }
}

/// Address ranges of the regions, indexed by [`PoolId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLayout {
    regions: [Range<usize>; PoolId::COUNT],
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self::IRAM
    }
}

impl MemoryLayout {
    /// The on-chip RAM regions of the target board.
    pub const IRAM: Self = Self::new([IRAM1_START..IRAM1_END, IRAM2_START..IRAM2_END]);

    /// Creates a layout from the regions of [`PoolId::Iram1`] and
    /// [`PoolId::Iram2`].
    #[must_use]
    pub const fn new(regions: [Range<usize>; PoolId::COUNT]) -> Self {
        Self { regions }
    }

    /// Returns the address range of `pool_id`.
    #[must_use]
    pub fn region(&self, pool_id: PoolId) -> Range<usize> {
        self.regions[pool_id.index()].clone()
    }

    /// Returns the pool whose region starts at `start`.
    #[must_use]
    pub fn pool_at(&self, start: usize) -> Option<PoolId> {
        PoolId::ALL
            .into_iter()
            .find(|&pool_id| self.regions[pool_id.index()].start == start)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_id_raw() {
        assert_eq!(PoolId::try_from(0).unwrap(), PoolId::Iram1);
        assert_eq!(PoolId::try_from(1).unwrap(), PoolId::Iram2);
        let err = PoolId::try_from(2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        for pool_id in PoolId::ALL {
            assert_eq!(PoolId::try_from(u32::from(pool_id)).unwrap(), pool_id);
        }
    }

    #[test]
    fn test_pool_at() {
        let layout = MemoryLayout::IRAM;
        assert_eq!(layout.pool_at(IRAM1_START), Some(PoolId::Iram1));
        assert_eq!(layout.pool_at(IRAM2_START), Some(PoolId::Iram2));
        assert_eq!(layout.pool_at(IRAM1_START + 0x1000), None);
        assert_eq!(layout.region(PoolId::Iram2), IRAM2_START..IRAM2_END);
    }

    #[test]
    fn test_regions_are_disjoint() {
        let layout = MemoryLayout::default();
        let iram1 = layout.region(PoolId::Iram1);
        let iram2 = layout.region(PoolId::Iram2);
        assert!(iram1.end <= iram2.start || iram2.end <= iram1.start);
    }
}
