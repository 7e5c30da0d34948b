//! # Block Cache Contract
//!
//! The index never touches a device directly. All persistence goes through a
//! [`BlockCache`], a fixed-geometry array of equal-sized blocks addressed by
//! index. The trait mirrors what a buffer cache over a block device provides:
//! geometry queries, whole-block reads and writes, liveness notifications,
//! and a durability barrier.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryCache`]: heap-backed, used by tests and benchmarks
//! - [`MmapCache`]: a memory-mapped file, used by the interactive driver and
//!   anything that needs the tree to survive the process
//!
//! ## Liveness notifications
//!
//! `notify_allocate` / `notify_deallocate` are advisory. The allocator calls
//! them immediately after the superblock carrying the updated free-list head
//! has been written, so a cache that tracks block liveness can trust its
//! in-memory state. Implementations that do not care may ignore them.

mod memory;
mod mmap;

pub use memory::MemoryCache;
pub use mmap::MmapCache;

use eyre::Result;

/// A fixed array of equal-sized blocks behind a buffer cache.
pub trait BlockCache {
    /// Size in bytes of every block. Constant for the cache lifetime.
    fn block_size(&self) -> usize;

    /// Total number of blocks the device holds.
    fn num_blocks(&self) -> u32;

    /// Reads block `block` into `buf`. `buf` must be exactly `block_size()`
    /// bytes long.
    fn read_block(&self, block: u32, buf: &mut [u8]) -> Result<()>;

    /// Writes `data` as the new contents of block `block`. `data` must be
    /// exactly `block_size()` bytes long.
    fn write_block(&mut self, block: u32, data: &[u8]) -> Result<()>;

    /// Advisory hook: `block` has left the free list.
    fn notify_allocate(&mut self, block: u32);

    /// Advisory hook: `block` has returned to the free list.
    fn notify_deallocate(&mut self, block: u32);

    /// Durability barrier. Returns once previously written blocks are
    /// persistent to whatever degree the implementation supports.
    fn sync(&self) -> Result<()>;
}
