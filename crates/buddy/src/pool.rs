//! Buddy memory pool.
//!
//! # Algorithm
//!
//! - **Creation**: the whole region becomes one free block of the largest
//!   order that covers it.
//! - **Allocation**: the request plus the header is rounded up to a power of
//!   two. The smallest non-empty free list of a sufficient order provides a
//!   block, which is halved until it has the requested order. Every upper
//!   half that is split off goes to the head of its order's free list.
//! - **Deallocation**: the block is marked free and merged with its buddy
//!   (the block whose offset differs only in the size bit) while the buddy is
//!   free and has the same order. The merged block goes to the head of its
//!   order's free list.
//!
//! Splitting and merging are loops bounded by the pool's maximum order.
//!
//! # Performance Characteristics
//!
//! - **Allocation**: O(`MAX_ORDER`)
//! - **Deallocation**: O(`MAX_ORDER`)
//! - **Memory Overhead**: 20 bytes per block, plus rounding to a power of two

use core::{fmt, iter::FusedIterator};

use log::{debug, trace, warn};
use snafu::{OptionExt as _, Snafu, ensure};

use crate::{
    HEADER_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE,
    free_list::FreeLists,
    header::{Arena, BlockHeader, BlockOffset},
    order,
};

/// Errors that can occur while creating a [`Pool`].
#[derive(Debug, Snafu, derive_more::IsVariant)]
pub enum CreatePoolError {
    #[snafu(display("invalid memory range: {start:#x}..{end:#x}"))]
    InvalidRange {
        #[snafu(implicit)]
        location: snafu::Location,
        start: usize,
        end: usize,
    },
    #[snafu(display("memory region of {size:#x} bytes is smaller than {MIN_BLOCK_SIZE:#x}"))]
    RegionTooSmall {
        #[snafu(implicit)]
        location: snafu::Location,
        size: usize,
    },
    #[snafu(display("memory region of {size:#x} bytes exceeds {MAX_BLOCK_SIZE:#x}"))]
    RegionTooLarge {
        #[snafu(implicit)]
        location: snafu::Location,
        size: usize,
    },
    #[snafu(display("pool base {start:#x} is not aligned to the pool size {pool_size:#x}"))]
    MisalignedBase {
        #[snafu(implicit)]
        location: snafu::Location,
        start: usize,
        pool_size: usize,
    },
    #[snafu(display("backing storage of {storage_len:#x} bytes cannot hold a {pool_size:#x} byte pool"))]
    StorageTooSmall {
        #[snafu(implicit)]
        location: snafu::Location,
        storage_len: usize,
        pool_size: usize,
    },
}

/// Errors that can occur while allocating from a [`Pool`].
#[derive(Debug, Snafu, derive_more::IsVariant)]
pub enum AllocateError {
    #[snafu(display("request of {size:#x} bytes exceeds the pool size {pool_size:#x}"))]
    RequestTooLarge {
        #[snafu(implicit)]
        location: snafu::Location,
        size: usize,
        pool_size: usize,
    },
    #[snafu(display("no free block can hold {size:#x} bytes"))]
    NoFreeBlock {
        #[snafu(implicit)]
        location: snafu::Location,
        size: usize,
    },
}

/// Errors that can occur while returning memory to a [`Pool`].
#[derive(Debug, Snafu, derive_more::IsVariant)]
pub enum DeallocateError {
    #[snafu(display("address {addr:#x} is outside of the pool {start:#x}..{end:#x}"))]
    AddressOutOfRange {
        #[snafu(implicit)]
        location: snafu::Location,
        addr: usize,
        start: usize,
        end: usize,
    },
    #[snafu(display("address {addr:#x} does not belong to a block of the pool"))]
    InvalidBlock {
        #[snafu(implicit)]
        location: snafu::Location,
        addr: usize,
    },
}

/// A block as seen from outside the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockInfo {
    /// Address of the block header.
    pub addr: usize,
    /// Size of the block including its header.
    pub size: usize,
    /// log2 of `size`.
    pub order: u32,
    /// Whether the block is free.
    pub is_free: bool,
}

/// A buddy-system memory pool over one contiguous address range.
///
/// The pool manages the addresses `start..start + 2^max_order`. The bytes of
/// that range are the `storage` the pool was created with; addresses handed
/// out by [`allocate`](Self::allocate) are `start` plus an offset into the
/// storage. In the kernel the storage is the memory at `start` itself, so the
/// addresses are usable pointers.
pub struct Pool<'mem> {
    start: usize,
    max_order: u32,
    arena: Arena<'mem>,
    free_lists: FreeLists,
}

impl fmt::Debug for Pool<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("start", &format_args!("{:#x}", self.start))
            .field("end", &format_args!("{:#x}", self.end()))
            .field("max_order", &self.max_order)
            .finish_non_exhaustive()
    }
}

impl<'mem> Pool<'mem> {
    /// Creates a pool over `start..end`, backed by `storage`.
    ///
    /// The region size is rounded up to a power of two; the whole rounded
    /// range becomes one free block.
    ///
    /// # Errors
    ///
    /// - the range is inverted or smaller than [`MIN_BLOCK_SIZE`], or its
    ///   rounded size runs past the end of the address space
    /// - the rounded size exceeds [`MAX_BLOCK_SIZE`]
    /// - `start` is not aligned to the rounded size, which buddy addressing
    ///   requires
    /// - `storage` is shorter than the rounded size
    pub fn new(start: usize, end: usize, storage: &'mem mut [u8]) -> Result<Self, CreatePoolError> {
        trace!("creating buddy pool: RAM range: [{start:#x}, {end:#x})");

        let total = end
            .checked_sub(start)
            .context(InvalidRangeSnafu { start, end })?;
        ensure!(total >= MIN_BLOCK_SIZE, RegionTooSmallSnafu { size: total });

        let pool_size = order::round_up_pow2(total)
            .filter(|&size| size <= MAX_BLOCK_SIZE)
            .context(RegionTooLargeSnafu { size: total })?;
        ensure!(
            start.is_multiple_of(pool_size),
            MisalignedBaseSnafu { start, pool_size }
        );
        // the rounded range must not wrap around the address space
        start
            .checked_add(pool_size)
            .context(InvalidRangeSnafu { start, end })?;
        ensure!(
            storage.len() >= pool_size,
            StorageTooSmallSnafu {
                storage_len: storage.len(),
                pool_size,
            }
        );

        let max_order = order::order_of(pool_size);
        let mut pool = Self {
            start,
            max_order,
            arena: Arena::new(&mut storage[..pool_size]),
            free_lists: FreeLists::new(),
        };
        pool.arena
            .write_header(BlockOffset::ZERO, BlockHeader::free(max_order));
        pool.free_lists
            .push_front(&mut pool.arena, max_order, BlockOffset::ZERO);

        debug!(
            "created buddy pool [{start:#x}, {:#x}) with max order {max_order}",
            pool.end()
        );
        Ok(pool)
    }

    /// Returns the first address of the pool.
    #[must_use]
    pub fn start(&self) -> usize {
        self.start
    }

    /// Returns the address one past the end of the pool.
    #[must_use]
    pub fn end(&self) -> usize {
        self.start + self.size()
    }

    /// Returns the size of the pool in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        order::size_of_order(self.max_order)
    }

    /// Returns the order of the largest block of the pool.
    #[must_use]
    pub fn max_order(&self) -> u32 {
        self.max_order
    }

    /// Returns `true` if `addr` lies within the pool.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        (self.start..self.end()).contains(&addr)
    }

    fn addr_of(&self, block: BlockOffset) -> usize {
        self.start + block.value()
    }

    fn block_info(&self, block: BlockOffset, header: BlockHeader) -> BlockInfo {
        BlockInfo {
            addr: self.addr_of(block),
            size: header.size(),
            order: header.order,
            is_free: header.is_free,
        }
    }

    /// Allocates a block that can hold `size` bytes.
    ///
    /// Returns the address right after the block header, or `None` if `size`
    /// is zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the request can never fit in the pool, or if no
    /// free block is large enough right now.
    pub fn allocate(&mut self, size: usize) -> Result<Option<usize>, AllocateError> {
        trace!("allocate: pool = {:#x}, size = {size:#x}", self.start);

        if size == 0 {
            return Ok(None);
        }

        let needed = order::needed_block_size(size)
            .filter(|&needed| needed <= self.size())
            .context(RequestTooLargeSnafu {
                size,
                pool_size: self.size(),
            })?;
        let target_order = order::order_of(needed);

        let free_lists = &mut self.free_lists;
        let arena = &mut self.arena;
        let Some((found_order, block)) = (target_order..=self.max_order)
            .find_map(|order| Some((order, free_lists.pop_front(arena, order)?)))
        else {
            warn!(
                "no free block of {needed:#x} bytes in pool {:#x}",
                self.start
            );
            return NoFreeBlockSnafu { size }.fail();
        };

        for order in (target_order..found_order).rev() {
            let upper = block.upper_half(order);
            self.arena.write_header(upper, BlockHeader::free(order));
            self.free_lists.push_front(&mut self.arena, order, upper);
            debug!(
                "split: block {:#x} of order {}, buddy {:#x} freed",
                self.addr_of(block),
                order + 1,
                self.addr_of(upper)
            );
        }
        self.arena
            .write_header(block, BlockHeader::allocated(target_order));

        Ok(Some(self.addr_of(block) + HEADER_SIZE))
    }

    /// Returns the block at `addr` to the pool and merges it with its free
    /// buddies.
    ///
    /// `addr` must be a value returned by [`allocate`](Self::allocate) on this
    /// pool. A null address (`0`) and an already free block are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if `addr` is outside of the pool, or if the header in
    /// front of `addr` does not describe a block of the pool.
    pub fn deallocate(&mut self, addr: usize) -> Result<(), DeallocateError> {
        trace!("deallocate: pool = {:#x}, addr = {addr:#x}", self.start);

        if addr == 0 {
            return Ok(());
        }

        let block = self.block_at(addr).context(AddressOutOfRangeSnafu {
            addr,
            start: self.start,
            end: self.end(),
        })?;
        let header = self
            .arena
            .try_header(block)
            .filter(|header| header.order <= self.max_order && block.is_aligned_to(header.order))
            .context(InvalidBlockSnafu { addr })?;

        if header.is_free {
            debug!("deallocate: block {addr:#x} is already free");
            return Ok(());
        }

        let mut block = block;
        let mut order = header.order;
        self.arena.write_header(block, BlockHeader::free(order));

        while order < self.max_order {
            let buddy = block.buddy(order);
            let mergeable = self
                .arena
                .try_header(buddy)
                .is_some_and(|buddy| buddy.is_free && buddy.order == order);
            if !mergeable {
                break;
            }

            self.free_lists.remove(&mut self.arena, order, buddy);
            block = block.min(buddy);
            order += 1;
            self.arena.write_header(block, BlockHeader::free(order));
            debug!(
                "merge: block {:#x} of order {order}",
                self.addr_of(block)
            );
        }

        self.free_lists.push_front(&mut self.arena, order, block);
        Ok(())
    }

    /// Returns the block whose caller-visible memory starts at `addr`.
    fn block_at(&self, addr: usize) -> Option<BlockOffset> {
        if !self.contains(addr) {
            return None;
        }
        let offset = (addr - self.start).checked_sub(HEADER_SIZE)?;
        BlockOffset::new(offset)
    }

    /// Returns an iterator over the free blocks, in ascending order and in
    /// free-list order within each order.
    pub fn free_blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        (0..=self.max_order).flat_map(move |order| {
            self.free_lists
                .iter(&self.arena, order)
                .map(move |block| self.block_info(block, self.arena.header(block)))
        })
    }

    /// Returns the total size of the free blocks in bytes.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.free_blocks().map(|block| block.size).sum()
    }

    /// Returns an iterator over every block of the pool, free or allocated,
    /// in address order.
    #[must_use]
    pub fn blocks(&self) -> Blocks<'_, 'mem> {
        Blocks {
            pool: self,
            next: Some(BlockOffset::ZERO),
        }
    }

    /// Writes one line per free block (`address: size`) followed by a summary
    /// line.
    ///
    /// Returns the number of free blocks.
    pub fn dump<W>(&self, out: &mut W) -> Result<usize, fmt::Error>
    where
        W: fmt::Write,
    {
        let mut count = 0;
        for block in self.free_blocks() {
            writeln!(out, "{:#010x}: {:#04x}", block.addr, block.size)?;
            count += 1;
        }
        writeln!(out)?;
        writeln!(out, "{count} free memory block(s) found")?;
        Ok(count)
    }
}

/// Iterator over all blocks of a pool, created by [`Pool::blocks`].
#[derive(Debug)]
pub struct Blocks<'a, 'mem> {
    pool: &'a Pool<'mem>,
    next: Option<BlockOffset>,
}

impl Iterator for Blocks<'_, '_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.next?;
        let header = self.pool.arena.header(block);
        self.next = BlockOffset::new(block.value() + header.size())
            .filter(|next| next.value() < self.pool.size());
        Some(self.pool.block_info(block, header))
    }
}

impl FusedIterator for Blocks<'_, '_> {}
