//! Buddy-system memory pool for the Onix real-time kernel.
//!
//! A [`Pool`](pool::Pool) manages one contiguous, power-of-two sized address
//! range and serves variable-sized requests by splitting the range into
//! power-of-two blocks. Freed blocks are merged with their buddies again, so
//! repeated allocate/deallocate cycles never fragment the pool permanently.
//!
//! # Memory Layout
//!
//! Every block, free or allocated, starts with a 20-byte header. Callers only
//! ever see the bytes after the header.
//!
//! ```text
//! Block Layout:
//! ┌────────────────────────────────────────┬──────────────────────┐
//! │ Header (20 bytes)                      │ Caller's data        │
//! │ ┌──────┬─────────┬───────┬──────┬──────┐│                      │
//! │ │ size │ is_free │ order │ prev │ next ││                      │
//! │ └──────┴─────────┴───────┴──────┴──────┘│                      │
//! └────────────────────────────────────────┴──────────────────────┘
//! ```
//!
//! `prev` and `next` link the free blocks of one order into a doubly-linked
//! list. They are stored as offsets from the pool base, never as raw
//! pointers, and all header accesses go through bounds-checked reads and
//! writes on the pool's backing storage.
//!
//! # Usage Example
//!
//! ```rust
//! use buddy::pool::Pool;
//!
//! let mut storage = vec![0u8; 4096];
//! let mut pool = Pool::new(0x1000, 0x2000, &mut storage).unwrap();
//!
//! let addr = pool.allocate(100).unwrap().unwrap();
//! assert!(pool.contains(addr));
//!
//! pool.deallocate(addr).unwrap();
//! assert_eq!(pool.free_blocks().count(), 1);
//! ```
//!
//! # Thread Safety
//!
//! Every mutating operation takes `&mut self`. The kernel is expected to
//! disable preemption around calls; the pool performs no locking itself.

#![no_std]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod free_list;
pub mod header;
pub mod order;
pub mod pool;

pub use self::header::HEADER_SIZE;

/// The largest block order a pool can manage (inclusive).
///
/// Block sizes and offsets are stored as `u32` in the header, so the largest
/// block is 2 GiB.
pub const MAX_ORDER: u32 = 31;

/// Number of free lists in a pool, one per order `0..=MAX_ORDER`.
pub const ORDER_COUNT: usize = MAX_ORDER as usize + 1;

/// The smallest region a pool can be created over.
pub const MIN_BLOCK_SIZE: usize = 32;

/// The size of a block of [`MAX_ORDER`].
pub const MAX_BLOCK_SIZE: usize = 1 << MAX_ORDER;

const _: () = assert!(MIN_BLOCK_SIZE >= HEADER_SIZE);
const _: () = assert!(MIN_BLOCK_SIZE.is_power_of_two());
