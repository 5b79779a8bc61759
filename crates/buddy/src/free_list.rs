//! Per-order free lists of a pool.
//!
//! Each order has a doubly-linked list of free blocks. The list nodes are the
//! block headers themselves, so the registry only stores the head offset of
//! each list; `prev`/`next` live in the headers inside the [`Arena`].

use core::iter::FusedIterator;

use platform_cast::CastFrom as _;

use crate::{
    ORDER_COUNT,
    header::{Arena, BlockOffset},
};

/// Heads of the free lists, indexed by order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeLists {
    heads: [Option<BlockOffset>; ORDER_COUNT],
}

impl Default for FreeLists {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeLists {
    /// Creates a registry with every list empty.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            heads: [None; ORDER_COUNT],
        }
    }

    fn slot(order: u32) -> usize {
        let index = usize::cast_from(order);
        assert!(index < ORDER_COUNT, "order {order} has no free list");
        index
    }

    /// Empties every list.
    ///
    /// The headers of blocks that were linked are left untouched.
    pub fn clear(&mut self) {
        self.heads = [None; ORDER_COUNT];
    }

    /// Returns the first block on the list of `order`.
    #[must_use]
    pub fn head(&self, order: u32) -> Option<BlockOffset> {
        self.heads[Self::slot(order)]
    }

    /// Returns `true` if the list of `order` has no blocks.
    #[must_use]
    pub fn is_empty(&self, order: u32) -> bool {
        self.head(order).is_none()
    }

    /// Inserts `block` at the head of the list of `order`.
    ///
    /// # Panics
    ///
    /// Panics if the header of `block` is not a free block of `order`.
    pub fn push_front(&mut self, arena: &mut Arena<'_>, order: u32, block: BlockOffset) {
        let slot = Self::slot(order);
        let old_head = self.heads[slot];
        assert_ne!(old_head, Some(block), "block {block:#x} is already linked");

        arena.update_header(block, |header| {
            assert!(header.is_free, "block {block:#x} is not free");
            assert_eq!(header.order, order, "block {block:#x} has wrong order");
            header.prev = None;
            header.next = old_head;
        });
        if let Some(old_head) = old_head {
            arena.update_header(old_head, |header| header.prev = Some(block));
        }
        self.heads[slot] = Some(block);
    }

    /// Unlinks `block` from the list of `order`.
    ///
    /// The links of the removed block are cleared.
    ///
    /// # Panics
    ///
    /// Panics if `block` is not on the list of `order`.
    pub fn remove(&mut self, arena: &mut Arena<'_>, order: u32, block: BlockOffset) {
        let slot = Self::slot(order);
        let header = arena.header(block);
        assert!(
            header.is_free && header.order == order,
            "block {block:#x} is not a free block of order {order}"
        );

        match header.prev {
            Some(prev) => arena.update_header(prev, |prev_header| {
                assert_eq!(prev_header.next, Some(block));
                prev_header.next = header.next;
            }),
            None => {
                assert_eq!(
                    self.heads[slot],
                    Some(block),
                    "block {block:#x} is not on the free list of order {order}"
                );
                self.heads[slot] = header.next;
            }
        }
        if let Some(next) = header.next {
            arena.update_header(next, |next_header| {
                assert_eq!(next_header.prev, Some(block));
                next_header.prev = header.prev;
            });
        }

        arena.update_header(block, |header| {
            header.prev = None;
            header.next = None;
        });
    }

    /// Unlinks and returns the first block on the list of `order`.
    pub fn pop_front(&mut self, arena: &mut Arena<'_>, order: u32) -> Option<BlockOffset> {
        let head = self.head(order)?;
        self.remove(arena, order, head);
        Some(head)
    }

    /// Returns an iterator over the blocks on the list of `order`, head first.
    #[must_use]
    pub fn iter<'a, 'mem>(&self, arena: &'a Arena<'mem>, order: u32) -> Iter<'a, 'mem> {
        Iter {
            arena,
            next: self.head(order),
        }
    }
}

/// Iterator over one free list.
#[derive(Debug, Clone)]
pub struct Iter<'a, 'mem> {
    arena: &'a Arena<'mem>,
    next: Option<BlockOffset>,
}

impl Iterator for Iter<'_, '_> {
    type Item = BlockOffset;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.arena.header(current).next;
        Some(current)
    }
}

impl FusedIterator for Iter<'_, '_> {}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    extern crate alloc;

    use alloc::{vec, vec::Vec};

    use super::*;
    use crate::header::BlockHeader;

    const ORDER: u32 = 5;

    fn offset(n: usize) -> BlockOffset {
        BlockOffset::new(n << ORDER).unwrap()
    }

    fn with_test_arena<F>(blocks: usize, test_fn: F)
    where
        F: FnOnce(&mut Arena<'_>),
    {
        let mut bytes = vec![0x11u8; blocks << ORDER];
        let mut arena = Arena::new(&mut bytes);
        for n in 0..blocks {
            arena.write_header(offset(n), BlockHeader::free(ORDER));
        }
        test_fn(&mut arena);
    }

    fn collect(lists: &FreeLists, arena: &Arena<'_>) -> Vec<BlockOffset> {
        lists.iter(arena, ORDER).collect()
    }

    fn assert_links(lists: &FreeLists, arena: &Arena<'_>) {
        let blocks = collect(lists, arena);
        for (i, &block) in blocks.iter().enumerate() {
            let header = arena.header(block);
            let prev = i.checked_sub(1).map(|i| blocks[i]);
            assert_eq!(header.prev, prev);
            assert_eq!(header.next, blocks.get(i + 1).copied());
        }
    }

    #[test]
    fn test_push_front() {
        with_test_arena(3, |arena| {
            let mut lists = FreeLists::new();
            assert!(lists.is_empty(ORDER));

            lists.push_front(arena, ORDER, offset(0));
            lists.push_front(arena, ORDER, offset(1));
            lists.push_front(arena, ORDER, offset(2));

            assert_eq!(lists.head(ORDER), Some(offset(2)));
            assert_eq!(collect(&lists, arena), [offset(2), offset(1), offset(0)]);
            assert_links(&lists, arena);
            assert!(lists.is_empty(ORDER + 1));
        });
    }

    #[test]
    fn test_remove_head() {
        with_test_arena(3, |arena| {
            let mut lists = FreeLists::new();
            for n in 0..3 {
                lists.push_front(arena, ORDER, offset(n));
            }

            lists.remove(arena, ORDER, offset(2));
            assert_eq!(lists.head(ORDER), Some(offset(1)));
            assert_eq!(collect(&lists, arena), [offset(1), offset(0)]);
            assert_links(&lists, arena);

            let header = arena.header(offset(2));
            assert_eq!((header.prev, header.next), (None, None));
        });
    }

    #[test]
    fn test_remove_interior_and_tail() {
        with_test_arena(4, |arena| {
            let mut lists = FreeLists::new();
            for n in 0..4 {
                lists.push_front(arena, ORDER, offset(n));
            }

            lists.remove(arena, ORDER, offset(2));
            assert_eq!(collect(&lists, arena), [offset(3), offset(1), offset(0)]);
            assert_links(&lists, arena);

            lists.remove(arena, ORDER, offset(0));
            assert_eq!(collect(&lists, arena), [offset(3), offset(1)]);
            assert_links(&lists, arena);
        });
    }

    #[test]
    fn test_pop_front_until_empty() {
        with_test_arena(2, |arena| {
            let mut lists = FreeLists::new();
            lists.push_front(arena, ORDER, offset(0));
            lists.push_front(arena, ORDER, offset(1));

            assert_eq!(lists.pop_front(arena, ORDER), Some(offset(1)));
            assert_eq!(lists.pop_front(arena, ORDER), Some(offset(0)));
            assert_eq!(lists.pop_front(arena, ORDER), None);
            assert!(lists.is_empty(ORDER));
        });
    }

    #[test]
    fn test_clear() {
        with_test_arena(2, |arena| {
            let mut lists = FreeLists::new();
            lists.push_front(arena, ORDER, offset(0));
            lists.clear();
            assert_eq!(lists, FreeLists::new());
        });
    }

    #[test]
    #[should_panic = "is not on the free list"]
    fn test_remove_unlinked_block() {
        with_test_arena(2, |arena| {
            let mut lists = FreeLists::new();
            lists.push_front(arena, ORDER, offset(0));
            lists.remove(arena, ORDER, offset(1));
        });
    }

    #[test]
    #[should_panic = "is not free"]
    fn test_push_allocated_block() {
        with_test_arena(1, |arena| {
            arena.write_header(offset(0), BlockHeader::allocated(ORDER));
            FreeLists::new().push_front(arena, ORDER, offset(0));
        });
    }
}
