//! Kernel memory pools.
//!
//! [`MemoryManager`] owns one [`Pool`] per physical region and is the entry
//! point the rest of the kernel uses to create pools, allocate and free
//! memory, and inspect the free lists. Every failing call also records its
//! [`ErrorKind`] as the kernel's error indicator.

use core::{
    fmt,
    ops::Range,
    ptr::{self, NonNull},
    slice,
};

use buddy::pool::{self, Pool};
use derive_more::{Display, IsVariant};
use log::{debug, trace};
use snafu::{OptionExt as _, ResultExt as _, Snafu};

use crate::{
    error::ErrorKind,
    layout::{MemoryLayout, PoolId},
    stack::{self, StackOutOfRangeError, TaskId},
};

/// Memory allocation algorithm of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IsVariant)]
pub enum Algorithm {
    #[display("buddy")]
    Buddy,
}

#[derive(Debug, Snafu)]
#[snafu(display("unsupported memory allocation algorithm: {raw}"))]
pub struct InvalidAlgorithmError {
    #[snafu(implicit)]
    location: snafu::Location,
    raw: u32,
}

impl InvalidAlgorithmError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidArgument
    }
}

impl TryFrom<u32> for Algorithm {
    type Error = InvalidAlgorithmError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Buddy),
            _ => InvalidAlgorithmSnafu { raw }.fail(),
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum CreatePoolError {
    #[snafu(display("no memory region starts at {start:#x}"))]
    UnknownRegion {
        #[snafu(implicit)]
        location: snafu::Location,
        start: usize,
    },
    #[snafu(display("failed to create memory pool {pool_id}: {source}"))]
    Pool {
        #[snafu(implicit)]
        location: snafu::Location,
        pool_id: PoolId,
        #[snafu(source)]
        source: pool::CreatePoolError,
    },
}

impl CreatePoolError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidArgument
    }
}

#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum InitError {
    #[snafu(display("failed to initialize memory pool {pool_id}: {source}"))]
    CreatePool {
        #[snafu(implicit)]
        location: snafu::Location,
        pool_id: PoolId,
        #[snafu(source)]
        source: CreatePoolError,
    },
}

impl InitError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CreatePool { source, .. } => source.kind(),
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum AllocateError {
    #[snafu(display("memory pool {pool_id} has not been created"))]
    PoolNotCreated {
        #[snafu(implicit)]
        location: snafu::Location,
        pool_id: PoolId,
    },
    #[snafu(display("failed to allocate from memory pool {pool_id}: {source}"))]
    Pool {
        #[snafu(implicit)]
        location: snafu::Location,
        pool_id: PoolId,
        #[snafu(source)]
        source: pool::AllocateError,
    },
}

impl AllocateError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PoolNotCreated { .. } => ErrorKind::InvalidArgument,
            Self::Pool { .. } => ErrorKind::OutOfMemory,
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum DeallocateError {
    #[snafu(display("memory pool {pool_id} has not been created"))]
    PoolNotCreated {
        #[snafu(implicit)]
        location: snafu::Location,
        pool_id: PoolId,
    },
    #[snafu(display("failed to deallocate to memory pool {pool_id}: {source}"))]
    Pool {
        #[snafu(implicit)]
        location: snafu::Location,
        pool_id: PoolId,
        #[snafu(source)]
        source: pool::DeallocateError,
    },
}

impl DeallocateError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Pool { source, .. } if source.is_address_out_of_range() => {
                ErrorKind::AddressOutOfRange
            }
            Self::PoolNotCreated { .. } | Self::Pool { .. } => ErrorKind::InvalidArgument,
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum DumpError {
    #[snafu(display("memory pool {pool_id} has not been created"))]
    PoolNotCreated {
        #[snafu(implicit)]
        location: snafu::Location,
        pool_id: PoolId,
    },
    #[snafu(display("failed to write free blocks of memory pool {pool_id}"))]
    Write {
        #[snafu(implicit)]
        location: snafu::Location,
        pool_id: PoolId,
        #[snafu(source)]
        source: fmt::Error,
    },
}

impl DumpError {
    /// Returns the kind of this error.
    ///
    /// A sink that rejects the output is an unusable argument of the caller,
    /// so both variants report [`ErrorKind::InvalidArgument`].
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PoolNotCreated { .. } | Self::Write { .. } => ErrorKind::InvalidArgument,
        }
    }
}

/// The memory pools of the kernel.
///
/// The kernel creates exactly one manager at boot and calls
/// [`init`](Self::init) before multitasking starts. Afterwards every call must
/// be made with preemption disabled; the manager does no locking of its own.
pub struct MemoryManager<'mem> {
    layout: MemoryLayout,
    pools: [Option<Pool<'mem>>; PoolId::COUNT],
    errno: Option<ErrorKind>,
}

impl fmt::Debug for MemoryManager<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryManager")
            .field("layout", &self.layout)
            .field("pools", &self.pools)
            .field("errno", &self.errno)
            .finish()
    }
}

impl Default for MemoryManager<'_> {
    fn default() -> Self {
        Self::new(MemoryLayout::IRAM)
    }
}

impl<'mem> MemoryManager<'mem> {
    /// Creates a manager for `layout` with no pools.
    #[must_use]
    pub const fn new(layout: MemoryLayout) -> Self {
        Self {
            layout,
            pools: [const { None }; PoolId::COUNT],
            errno: None,
        }
    }

    /// Returns the region layout of this manager.
    #[must_use]
    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    /// Returns the kind of the last failed operation, if any.
    #[must_use]
    pub fn errno(&self) -> Option<ErrorKind> {
        self.errno
    }

    /// Returns the pool of `pool_id`, if it has been created.
    #[must_use]
    pub fn pool(&self, pool_id: PoolId) -> Option<&Pool<'mem>> {
        self.pools[pool_id.index()].as_ref()
    }

    fn pool_mut(&mut self, pool_id: PoolId) -> Option<&mut Pool<'mem>> {
        self.pools[pool_id.index()].as_mut()
    }

    /// Creates the pools of all regions, using `storage[i]` as the memory of
    /// the region of `PoolId::ALL[i]`.
    ///
    /// Fails on the first pool that cannot be created.
    pub fn init_with_storage(
        &mut self,
        algorithm: Algorithm,
        storage: [&'mem mut [u8]; PoolId::COUNT],
    ) -> Result<(), InitError> {
        use self::init_error::CreatePoolSnafu;

        trace!("init: algorithm = {algorithm}");

        for (pool_id, storage) in PoolId::ALL.into_iter().zip(storage) {
            let Range { start, end } = self.layout.region(pool_id);
            self.create_pool(algorithm, start, end, storage)
                .context(CreatePoolSnafu { pool_id })?;
        }
        Ok(())
    }

    /// Creates a pool over `start..end` using `storage` as its memory.
    ///
    /// `start` must be the start of one of the regions in the layout; the
    /// pool of that region is (re)initialized and its id returned.
    pub fn create_pool(
        &mut self,
        algorithm: Algorithm,
        start: usize,
        end: usize,
        storage: &'mem mut [u8],
    ) -> Result<PoolId, CreatePoolError> {
        use self::create_pool_error::{PoolSnafu, UnknownRegionSnafu};

        trace!("create_pool: algorithm = {algorithm}, range = [{start:#x}, {end:#x})");

        let result = self
            .layout
            .pool_at(start)
            .context(UnknownRegionSnafu { start })
            .and_then(|pool_id| {
                let pool = match algorithm {
                    Algorithm::Buddy => Pool::new(start, end, storage),
                }
                .context(PoolSnafu { pool_id })?;
                Ok((pool_id, pool))
            });
        let (pool_id, pool) = result.inspect_err(|e| self.errno = Some(e.kind()))?;

        debug!("created memory pool {pool_id}: {pool:?}");
        self.pools[pool_id.index()] = Some(pool);
        Ok(pool_id)
    }

    /// Allocates `size` bytes from the pool of `pool_id`.
    ///
    /// Returns `None` for a zero-sized request.
    pub fn allocate(&mut self, pool_id: PoolId, size: usize) -> Result<Option<usize>, AllocateError> {
        use self::allocate_error::{PoolNotCreatedSnafu, PoolSnafu};

        let result = self
            .pool_mut(pool_id)
            .context(PoolNotCreatedSnafu { pool_id })
            .and_then(|pool| pool.allocate(size).context(PoolSnafu { pool_id }));
        result.inspect_err(|e| self.errno = Some(e.kind()))
    }

    /// Returns the memory at `addr` to the pool of `pool_id`.
    ///
    /// A null address and a block that is already free are ignored.
    pub fn deallocate(&mut self, pool_id: PoolId, addr: usize) -> Result<(), DeallocateError> {
        use self::deallocate_error::{PoolNotCreatedSnafu, PoolSnafu};

        if addr == 0 {
            return Ok(());
        }

        let result = self
            .pool_mut(pool_id)
            .context(PoolNotCreatedSnafu { pool_id })
            .and_then(|pool| pool.deallocate(addr).context(PoolSnafu { pool_id }));
        result.inspect_err(|e| self.errno = Some(e.kind()))
    }

    /// Writes the free blocks of the pool of `pool_id` to `out`, one line per
    /// block.
    ///
    /// Returns the number of free blocks.
    pub fn dump<W>(&mut self, pool_id: PoolId, out: &mut W) -> Result<usize, DumpError>
    where
        W: fmt::Write,
    {
        use self::dump_error::{PoolNotCreatedSnafu, WriteSnafu};

        trace!("dump: pool = {pool_id}");

        let result = self
            .pool(pool_id)
            .context(PoolNotCreatedSnafu { pool_id })
            .and_then(|pool| pool.dump(out).context(WriteSnafu { pool_id }));
        result.inspect_err(|e| self.errno = Some(e.kind()))
    }

    /// Returns the initial kernel stack pointer of `task_id`.
    ///
    /// See [`stack::alloc_kernel_stack`].
    pub fn alloc_kernel_stack(
        &mut self,
        task_id: TaskId,
    ) -> Result<NonNull<u32>, StackOutOfRangeError> {
        stack::alloc_kernel_stack(task_id).inspect_err(|e| self.errno = Some(e.kind()))
    }

    /// Returns the initial process stack pointer of `task_id`.
    ///
    /// See [`stack::alloc_process_stack`].
    pub fn alloc_process_stack(
        &mut self,
        task_id: TaskId,
    ) -> Result<NonNull<u32>, StackOutOfRangeError> {
        stack::alloc_process_stack(task_id).inspect_err(|e| self.errno = Some(e.kind()))
    }
}

impl MemoryManager<'static> {
    /// Creates the pools of all regions over the physical memory of the
    /// layout.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - every region of the layout is RAM that is not used by anything else
    ///   for the rest of the program
    /// - this method is called at most once per manager, and no two managers
    ///   share a region
    pub unsafe fn init(&mut self, algorithm: Algorithm) -> Result<(), InitError> {
        let storage = PoolId::ALL.map(|pool_id| {
            let region = self.layout.region(pool_id);
            // SAFETY: the caller guarantees the region is unused RAM.
            unsafe { region_storage(region) }
        });
        self.init_with_storage(algorithm, storage)
    }
}

/// Returns the memory of `region` as a byte slice.
///
/// # Safety
///
/// `region` must be valid, exclusively owned memory for the rest of the
/// program.
unsafe fn region_storage(region: Range<usize>) -> &'static mut [u8] {
    let start = ptr::with_exposed_provenance_mut::<u8>(region.start);
    // SAFETY: guaranteed by the caller.
    unsafe { slice::from_raw_parts_mut(start, region.len()) }
}
