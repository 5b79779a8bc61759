//! Statically reserved task stacks.
//!
//! ```text
//!                  +---------------------------+ High Address
//!                  |     PROC_STACK_SIZE       |
//! PROCESS_STACKS + |---------------------------|
//!                  |          ...              |
//!                  |---------------------------|
//!                  |     KERN_STACK_SIZE       |
//!  KERNEL_STACKS + |---------------------------|
//!                  +---------------------------+ Low Address
//! ```
//!
//! Each task owns slot `task_id` of both arrays for the life of the kernel.
//! The stacks grow downward, so a task is handed the top of its slot.

use core::{cell::UnsafeCell, mem, ops::Range, ptr::NonNull};

use log::trace;
use snafu::{Snafu, ensure};

use crate::error::ErrorKind;

pub type TaskId = usize;

/// Number of kernel stacks.
pub const MAX_TASKS: usize = 16;
/// Number of process stacks.
pub const NUM_TASKS: usize = 8;
/// Size of each kernel stack in bytes.
pub const KERN_STACK_SIZE: usize = 0x200;
/// Size of each process stack in bytes.
pub const PROC_STACK_SIZE: usize = 0x400;

const WORD_SIZE: usize = mem::size_of::<u32>();
const STACK_ALIGN: usize = 8;

pub static KERNEL_STACKS: StackArray<MAX_TASKS, { KERN_STACK_SIZE / WORD_SIZE }> =
    StackArray::new();
pub static PROCESS_STACKS: StackArray<NUM_TASKS, { PROC_STACK_SIZE / WORD_SIZE }> =
    StackArray::new();

#[derive(Debug, Snafu)]
#[snafu(display("task {task_id} has no stack, only {capacity} are reserved"))]
pub struct StackOutOfRangeError {
    #[snafu(implicit)]
    location: snafu::Location,
    task_id: TaskId,
    capacity: usize,
}

impl StackOutOfRangeError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::OutOfRange
    }
}

/// `SLOTS` stacks of `WORDS` 32-bit words each.
#[repr(C, align(8))]
pub struct StackArray<const SLOTS: usize, const WORDS: usize> {
    slots: UnsafeCell<[[u32; WORDS]; SLOTS]>,
}

// SAFETY: the array itself never reads or writes the slots; they are only
// reached through the raw pointers handed to their tasks.
unsafe impl<const SLOTS: usize, const WORDS: usize> Sync for StackArray<SLOTS, WORDS> {}

impl<const SLOTS: usize, const WORDS: usize> Default for StackArray<SLOTS, WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SLOTS: usize, const WORDS: usize> StackArray<SLOTS, WORDS> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: UnsafeCell::new([[0; WORDS]; SLOTS]),
        }
    }

    /// Returns the number of stacks.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        SLOTS
    }

    /// Returns the size of each stack in bytes.
    #[must_use]
    pub const fn stack_size(&self) -> usize {
        WORDS * WORD_SIZE
    }

    fn slot_ptr(&self, task_id: TaskId) -> Result<NonNull<[u32; WORDS]>, StackOutOfRangeError> {
        ensure!(
            task_id < SLOTS,
            StackOutOfRangeSnafu {
                task_id,
                capacity: SLOTS,
            }
        );
        let base = NonNull::from(&self.slots).cast::<[u32; WORDS]>();
        // SAFETY: `task_id < SLOTS`, so the slot lies inside the array.
        Ok(unsafe { base.add(task_id) })
    }

    /// Returns the byte address range of the stack of `task_id`.
    pub fn range(&self, task_id: TaskId) -> Result<Range<usize>, StackOutOfRangeError> {
        let start = self.slot_ptr(task_id)?.as_ptr().addr();
        Ok(start..start + self.stack_size())
    }

    /// Returns the initial stack pointer of `task_id`: the top of its slot,
    /// moved down one word if it is not 8-byte aligned.
    pub fn top(&self, task_id: TaskId) -> Result<NonNull<u32>, StackOutOfRangeError> {
        let slot = self.slot_ptr(task_id)?;
        // SAFETY: one past the end of a slot is at most one past the end of
        // the array.
        let mut sp = unsafe { slot.add(1) }.cast::<u32>();
        if !sp.as_ptr().addr().is_multiple_of(STACK_ALIGN) {
            // SAFETY: a slot holds at least one word below its top.
            sp = unsafe { sp.sub(1) };
        }
        Ok(sp)
    }
}

/// Returns the initial kernel stack pointer of `task_id`.
///
/// The error indicator is left untouched; use
/// [`MemoryManager::alloc_kernel_stack`] to record it.
///
/// [`MemoryManager::alloc_kernel_stack`]: crate::MemoryManager::alloc_kernel_stack
pub fn alloc_kernel_stack(task_id: TaskId) -> Result<NonNull<u32>, StackOutOfRangeError> {
    trace!("alloc_kernel_stack: task_id = {task_id}");
    KERNEL_STACKS.top(task_id)
}

/// Returns the initial process stack pointer of `task_id`.
///
/// The error indicator is left untouched; use
/// [`MemoryManager::alloc_process_stack`] to record it.
///
/// [`MemoryManager::alloc_process_stack`]: crate::MemoryManager::alloc_process_stack
pub fn alloc_process_stack(task_id: TaskId) -> Result<NonNull<u32>, StackOutOfRangeError> {
    trace!("alloc_process_stack: task_id = {task_id}");
    PROCESS_STACKS.top(task_id)
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_stack_bounds() {
        let sp = alloc_kernel_stack(MAX_TASKS - 1).unwrap();
        assert!(sp.as_ptr().addr().is_multiple_of(STACK_ALIGN));

        let err = alloc_kernel_stack(MAX_TASKS).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
        assert_eq!(err.kind().errno(), 11);
    }

    #[test]
    fn test_process_stack_bounds() {
        let sp = alloc_process_stack(NUM_TASKS - 1).unwrap();
        assert!(sp.as_ptr().addr().is_multiple_of(STACK_ALIGN));
        assert!(alloc_process_stack(NUM_TASKS).is_err());
        assert!(alloc_process_stack(MAX_TASKS - 1).is_err());
    }

    #[test]
    fn test_stack_top_is_end_of_slot() {
        for task_id in 0..MAX_TASKS {
            let range = KERNEL_STACKS.range(task_id).unwrap();
            assert_eq!(range.len(), KERN_STACK_SIZE);
            let sp = alloc_kernel_stack(task_id).unwrap().as_ptr().addr();
            assert_eq!(sp, range.end);
        }
    }

    #[test]
    fn test_stacks_are_contiguous_and_disjoint() {
        let ranges = (0..NUM_TASKS)
            .map(|task_id| PROCESS_STACKS.range(task_id).unwrap())
            .collect::<Vec<_>>();
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }

        let kernel = KERNEL_STACKS.range(0).unwrap().start
            ..KERNEL_STACKS.range(MAX_TASKS - 1).unwrap().end;
        let process = ranges[0].start..ranges[NUM_TASKS - 1].end;
        assert!(kernel.end <= process.start || process.end <= kernel.start);
    }

    #[test]
    fn test_odd_word_count_is_realigned() {
        let stacks = StackArray::<2, 3>::new();
        let base = stacks.range(0).unwrap().start;
        assert!(base.is_multiple_of(STACK_ALIGN));

        // the top of slot 0 is 12 bytes above the base
        let sp = stacks.top(0).unwrap().as_ptr().addr();
        assert_eq!(sp, base + 8);
        // the top of slot 1 is 24 bytes above the base
        let sp = stacks.top(1).unwrap().as_ptr().addr();
        assert_eq!(sp, base + 24);
    }

    #[test]
    fn test_capacity() {
        assert_eq!(KERNEL_STACKS.capacity(), MAX_TASKS);
        assert_eq!(PROCESS_STACKS.capacity(), NUM_TASKS);
        assert_eq!(PROCESS_STACKS.stack_size(), PROC_STACK_SIZE);
    }
}
