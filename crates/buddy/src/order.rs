//! Conversions between byte sizes and block orders.
//!
//! A block of order `k` is exactly `2^k` bytes long.

use crate::{HEADER_SIZE, MAX_ORDER};

/// Returns the smallest power of two greater than or equal to `n`.
///
/// `0` rounds up to `1`. Returns `None` if the result does not fit in a
/// `usize`.
#[must_use]
pub fn round_up_pow2(n: usize) -> Option<usize> {
    n.checked_next_power_of_two()
}

/// Returns the order `k` such that `2^k == size`.
///
/// # Panics
///
/// Panics if `size` is not a power of two. Round it with [`round_up_pow2`]
/// first.
#[must_use]
pub fn order_of(size: usize) -> u32 {
    assert!(size.is_power_of_two(), "{size:#x} is not a power of two");
    size.trailing_zeros()
}

/// Returns the size in bytes of a block of the given order.
///
/// # Panics
///
/// Panics if `order` is greater than [`MAX_ORDER`].
#[must_use]
pub fn size_of_order(order: u32) -> usize {
    assert!(order <= MAX_ORDER, "order {order} exceeds maximum order");
    1 << order
}

/// Returns the block size needed to hold `requested` bytes plus the block
/// header.
#[must_use]
pub fn needed_block_size(requested: usize) -> Option<usize> {
    requested
        .checked_add(HEADER_SIZE)
        .and_then(round_up_pow2)
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up_pow2() {
        assert_eq!(round_up_pow2(0), Some(1));
        assert_eq!(round_up_pow2(1), Some(1));
        assert_eq!(round_up_pow2(3), Some(4));
        assert_eq!(round_up_pow2(120), Some(128));
        assert_eq!(round_up_pow2(4096), Some(4096));
        assert_eq!(round_up_pow2(4097), Some(8192));
        assert_eq!(round_up_pow2(usize::MAX), None);
        assert_eq!(round_up_pow2((usize::MAX >> 1) + 2), None);
    }

    #[test]
    fn test_order_of() {
        assert_eq!(order_of(1), 0);
        assert_eq!(order_of(32), 5);
        assert_eq!(order_of(4096), 12);
        assert_eq!(order_of(1 << 31), 31);
    }

    #[test]
    #[should_panic = "is not a power of two"]
    fn test_order_of_non_power_of_two() {
        let _ = order_of(100);
    }

    #[test]
    fn test_size_of_order() {
        assert_eq!(size_of_order(0), 1);
        assert_eq!(size_of_order(7), 128);
        assert_eq!(size_of_order(MAX_ORDER), 1 << MAX_ORDER);
        for order in 0..=MAX_ORDER {
            assert_eq!(order_of(size_of_order(order)), order);
        }
    }

    #[test]
    fn test_needed_block_size() {
        assert_eq!(needed_block_size(1), Some(32));
        assert_eq!(needed_block_size(12), Some(32));
        assert_eq!(needed_block_size(13), Some(64));
        assert_eq!(needed_block_size(100), Some(128));
        assert_eq!(needed_block_size(4096 - HEADER_SIZE), Some(4096));
        assert_eq!(needed_block_size(usize::MAX), None);
    }
}
