//! Block headers and the byte arena they are stored in.
//!
//! The header of a block lives in the first [`HEADER_SIZE`] bytes of the
//! block. [`Arena`] is the only place where those bytes are interpreted; it
//! converts between the in-memory [`RawHeader`] record and the typed
//! [`BlockHeader`] used by the rest of the crate.

use core::fmt;

use dataview::{DataView, Pod};
use platform_cast::CastFrom as _;

use crate::{MAX_ORDER, order};

/// Size of the header at the start of every block.
pub const HEADER_SIZE: usize = size_of::<RawHeader>();
const _: () = assert!(HEADER_SIZE == 20);

/// Encoding of an absent `prev`/`next` link.
const NIL: u32 = u32::MAX;

/// In-memory representation of a block header.
#[derive(Debug, Clone, Copy, Pod)]
#[repr(C)]
struct RawHeader {
    size: u32,
    is_free: u32,
    order: u32,
    prev: u32,
    next: u32,
}

/// Offset of a block from the base of its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct BlockOffset(u32);

impl fmt::LowerHex for BlockOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl BlockOffset {
    /// The offset of the first block of a pool.
    pub const ZERO: Self = Self(0);

    /// Creates a block offset from a byte offset.
    ///
    /// Returns `None` if `offset` cannot be represented in a header link.
    #[must_use]
    pub fn new(offset: usize) -> Option<Self> {
        u32::try_from(offset)
            .ok()
            .filter(|&offset| offset != NIL)
            .map(Self)
    }

    /// Returns the offset in bytes.
    #[must_use]
    pub fn value(self) -> usize {
        usize::cast_from(self.0)
    }

    /// Returns the offset of the buddy of a block of `order` at this offset.
    #[must_use]
    pub fn buddy(self, order: u32) -> Self {
        assert!(order < MAX_ORDER, "a block of order {order} has no buddy");
        Self(self.0 ^ (1 << order))
    }

    /// Returns the offset of the upper half of a block that is split into two
    /// blocks of `order`.
    #[must_use]
    pub fn upper_half(self, order: u32) -> Self {
        assert!(order < MAX_ORDER, "a block of order {order} cannot be split");
        Self(self.0 | (1 << order))
    }

    /// Returns `true` if this offset is a valid start of a block of `order`.
    #[must_use]
    pub fn is_aligned_to(self, order: u32) -> bool {
        order <= MAX_ORDER && self.value().is_multiple_of(order::size_of_order(order))
    }

    fn to_link(link: Option<Self>) -> u32 {
        link.map_or(NIL, |offset| offset.0)
    }

    fn from_link(link: u32) -> Option<Self> {
        (link != NIL).then_some(Self(link))
    }
}

/// Typed view of a block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// log2 of the block size.
    pub order: u32,
    /// Whether the block is on a free list.
    pub is_free: bool,
    /// Previous block on the free list of `order`.
    pub prev: Option<BlockOffset>,
    /// Next block on the free list of `order`.
    pub next: Option<BlockOffset>,
}

impl BlockHeader {
    /// Creates the header of an unlinked free block.
    #[must_use]
    pub fn free(order: u32) -> Self {
        Self {
            order,
            is_free: true,
            prev: None,
            next: None,
        }
    }

    /// Creates the header of an allocated block.
    #[must_use]
    pub fn allocated(order: u32) -> Self {
        Self {
            is_free: false,
            ..Self::free(order)
        }
    }

    /// Returns the size of the block in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        order::size_of_order(self.order)
    }

    fn to_raw(self) -> RawHeader {
        assert!(self.order <= MAX_ORDER);
        RawHeader {
            size: 1 << self.order,
            is_free: u32::from(self.is_free),
            order: self.order,
            prev: BlockOffset::to_link(self.prev),
            next: BlockOffset::to_link(self.next),
        }
    }

    fn from_raw(raw: RawHeader) -> Option<Self> {
        let RawHeader {
            size,
            is_free,
            order,
            prev,
            next,
        } = raw;
        if order > MAX_ORDER || size != 1 << order {
            return None;
        }
        let is_free = match is_free {
            0 => false,
            1 => true,
            _ => return None,
        };
        Some(Self {
            order,
            is_free,
            prev: BlockOffset::from_link(prev),
            next: BlockOffset::from_link(next),
        })
    }
}

/// Backing storage of a pool, addressed by [`BlockOffset`].
pub struct Arena<'mem> {
    bytes: &'mem mut DataView,
}

impl fmt::Debug for Arena<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

impl<'mem> Arena<'mem> {
    /// Creates an arena over the given bytes.
    #[must_use]
    pub fn new(bytes: &'mem mut [u8]) -> Self {
        Self {
            bytes: DataView::from_mut(bytes),
        }
    }

    /// Returns the size of the arena in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the arena has no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads the header at `offset`.
    ///
    /// Returns `None` if the header would extend past the arena or the bytes
    /// do not form a consistent header.
    #[must_use]
    pub fn try_header(&self, offset: BlockOffset) -> Option<BlockHeader> {
        let raw = self.bytes.try_read::<RawHeader>(offset.value())?;
        BlockHeader::from_raw(raw)
    }

    /// Reads the header of a block known to exist at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if there is no valid header at `offset`.
    #[must_use]
    pub fn header(&self, offset: BlockOffset) -> BlockHeader {
        let Some(header) = self.try_header(offset) else {
            panic!("no valid block header at offset {offset:#x}");
        };
        header
    }

    /// Writes `header` at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the header would extend past the arena.
    pub fn write_header(&mut self, offset: BlockOffset, header: BlockHeader) {
        let written = self.bytes.try_write(offset.value(), &header.to_raw());
        assert!(
            written.is_some(),
            "block header at offset {offset:#x} is out of bounds"
        );
    }

    /// Reads the header at `offset`, applies `f` to it and writes it back.
    ///
    /// # Panics
    ///
    /// Panics if there is no valid header at `offset`.
    pub fn update_header<F>(&mut self, offset: BlockOffset, f: F)
    where
        F: FnOnce(&mut BlockHeader),
    {
        let mut header = self.header(offset);
        f(&mut header);
        self.write_header(offset, header);
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    extern crate alloc;

    use alloc::vec;

    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let mut bytes = vec![0u8; 64];
        let mut arena = Arena::new(&mut bytes);
        let header = BlockHeader {
            order: 5,
            is_free: true,
            prev: BlockOffset::new(0x40),
            next: None,
        };
        let offset = BlockOffset::new(32).unwrap();
        arena.write_header(offset, header);
        assert_eq!(arena.header(offset), header);
        assert_eq!(arena.header(offset).size(), 32);
    }

    #[test]
    fn test_header_layout() {
        let mut bytes = vec![0u8; 32];
        let mut arena = Arena::new(&mut bytes);
        arena.write_header(BlockOffset::ZERO, BlockHeader::allocated(5));
        drop(arena);

        let words = bytes[..HEADER_SIZE]
            .chunks_exact(4)
            .map(|chunk| u32::from_ne_bytes(chunk.try_into().unwrap()))
            .collect::<alloc::vec::Vec<_>>();
        assert_eq!(words, [32, 0, 5, u32::MAX, u32::MAX]);
    }

    #[test]
    fn test_try_header_rejects_garbage() {
        let mut bytes = vec![0x11u8; 64];
        let arena = Arena::new(&mut bytes);
        assert_eq!(arena.try_header(BlockOffset::ZERO), None);
    }

    #[test]
    fn test_try_header_out_of_bounds() {
        let mut bytes = vec![0u8; 32];
        let mut arena = Arena::new(&mut bytes);
        arena.write_header(BlockOffset::ZERO, BlockHeader::free(5));
        assert!(arena.try_header(BlockOffset::ZERO).is_some());
        assert_eq!(arena.try_header(BlockOffset::new(16).unwrap()), None);
    }

    #[test]
    #[should_panic = "out of bounds"]
    fn test_write_header_out_of_bounds() {
        let mut bytes = vec![0u8; 32];
        let mut arena = Arena::new(&mut bytes);
        arena.write_header(BlockOffset::new(16).unwrap(), BlockHeader::free(4));
    }

    #[test]
    fn test_block_offset_arithmetic() {
        let offset = BlockOffset::new(0x100).unwrap();
        assert_eq!(offset.buddy(8), BlockOffset::ZERO);
        assert_eq!(BlockOffset::ZERO.buddy(8), offset);
        assert_eq!(offset.buddy(7), BlockOffset::new(0x180).unwrap());
        assert_eq!(BlockOffset::ZERO.upper_half(7), BlockOffset::new(0x80).unwrap());
        assert!(offset.is_aligned_to(8));
        assert!(!offset.is_aligned_to(9));
        assert_eq!(BlockOffset::new(u32::MAX as usize), None);
    }
}
