//! Heap-backed block cache used by tests, benchmarks, and anything that does
//! not need persistence.

use eyre::{ensure, Result};
use hashbrown::HashSet;

use super::BlockCache;

/// An in-memory block device with advisory liveness tracking.
///
/// The allocated-set is populated purely from the notify hooks, which makes
/// it a convenient witness for allocator bookkeeping in tests.
#[derive(Debug)]
pub struct MemoryCache {
    blocks: Vec<Box<[u8]>>,
    block_size: usize,
    allocated: HashSet<u32>,
}

impl MemoryCache {
    pub fn new(block_size: usize, num_blocks: u32) -> Result<Self> {
        ensure!(block_size > 0, "block size must be nonzero");
        ensure!(num_blocks > 0, "block count must be nonzero");

        let blocks = (0..num_blocks)
            .map(|_| vec![0u8; block_size].into_boxed_slice())
            .collect();

        Ok(Self {
            blocks,
            block_size,
            allocated: HashSet::new(),
        })
    }

    /// Whether the notify hooks have marked `block` as live.
    pub fn is_allocated(&self, block: u32) -> bool {
        self.allocated.contains(&block)
    }

    /// Number of blocks the notify hooks currently mark as live.
    pub fn allocated_count(&self) -> usize {
        self.allocated.len()
    }

    fn check_block(&self, block: u32) -> Result<()> {
        ensure!(
            (block as usize) < self.blocks.len(),
            "block {} out of bounds (num_blocks={})",
            block,
            self.blocks.len()
        );
        Ok(())
    }
}

impl BlockCache for MemoryCache {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn num_blocks(&self) -> u32 {
        self.blocks.len() as u32
    }

    fn read_block(&self, block: u32, buf: &mut [u8]) -> Result<()> {
        self.check_block(block)?;
        ensure!(
            buf.len() == self.block_size,
            "read buffer is {} bytes, block size is {}",
            buf.len(),
            self.block_size
        );
        buf.copy_from_slice(&self.blocks[block as usize]);
        Ok(())
    }

    fn write_block(&mut self, block: u32, data: &[u8]) -> Result<()> {
        self.check_block(block)?;
        ensure!(
            data.len() == self.block_size,
            "write buffer is {} bytes, block size is {}",
            data.len(),
            self.block_size
        );
        self.blocks[block as usize].copy_from_slice(data);
        Ok(())
    }

    fn notify_allocate(&mut self, block: u32) {
        self.allocated.insert(block);
    }

    fn notify_deallocate(&mut self, block: u32) {
        self.allocated.remove(&block);
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}
