//! Memory management of the Onix real-time kernel.
//!
//! The kernel owns two on-chip RAM regions ([`layout`]). At boot,
//! [`MemoryManager::init`] turns each region into a [`buddy`] pool; tasks then
//! allocate and free memory from a pool by its [`PoolId`]. Task stacks do not
//! come from the pools but from statically reserved arrays ([`stack`]).
//!
//! Failures are reported as `Result`s. Each error maps to an [`ErrorKind`],
//! and the manager remembers the kind of the last failure so that it can be
//! reported to tasks as an errno value.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod error;
pub mod layout;
pub mod manager;
pub mod stack;

pub use self::{
    error::ErrorKind,
    layout::{MemoryLayout, PoolId},
    manager::{Algorithm, MemoryManager},
    stack::{TaskId, alloc_kernel_stack, alloc_process_stack},
};
