//! Memory-mapped file block cache.
//!
//! The device is a single file of `num_blocks * block_size` bytes mapped
//! read-write into the process. Reads and writes copy whole blocks between
//! the mapping and caller buffers; `sync` flushes the mapping so a reopened
//! cache observes everything written before it.
//!
//! The file size is fixed at creation. The index never grows a device; new
//! blocks come from the on-disk free list, not from extending the file.

use std::fs::OpenOptions;
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;

use super::BlockCache;

#[derive(Debug)]
pub struct MmapCache {
    mmap: MmapMut,
    block_size: usize,
    num_blocks: u32,
}

impl MmapCache {
    /// Creates (or truncates) a device file sized for `num_blocks` blocks.
    pub fn create<P: AsRef<Path>>(path: P, block_size: usize, num_blocks: u32) -> Result<Self> {
        let path = path.as_ref();

        ensure!(block_size > 0, "block size must be nonzero");
        ensure!(num_blocks > 0, "block count must be nonzero");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create device file '{}'", path.display()))?;

        let file_size = num_blocks as u64 * block_size as u64;
        file.set_len(file_size)
            .wrap_err_with(|| format!("failed to size device file to {} bytes", file_size))?;

        // SAFETY: map_mut is unsafe because a file modified behind the
        // mapping's back is undefined behavior. This is safe because:
        // 1. The file was just created with truncate, so no other mapping
        //    of prior contents exists.
        // 2. Device files are owned by a single process for their lifetime.
        // 3. The mapping is dropped with the MmapCache, and all access is
        //    bounds-checked against the fixed geometry.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            mmap,
            block_size,
            num_blocks,
        })
    }

    /// Opens an existing device file. The block count is derived from the
    /// file size, which must be an exact multiple of `block_size`.
    pub fn open<P: AsRef<Path>>(path: P, block_size: usize) -> Result<Self> {
        let path = path.as_ref();

        ensure!(block_size > 0, "block size must be nonzero");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open device file '{}'", path.display()))?;

        let file_size = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len();

        ensure!(
            file_size > 0,
            "cannot open empty device file '{}'",
            path.display()
        );
        ensure!(
            file_size % block_size as u64 == 0,
            "device file '{}' size {} is not a multiple of block size {}",
            path.display(),
            file_size,
            block_size
        );

        let num_blocks = (file_size / block_size as u64) as u32;

        // SAFETY: map_mut is unsafe because of external modification. Safe
        // here for the same reasons as in create: the file is owned by this
        // process, the mapping lives inside MmapCache, and access is
        // bounds-checked.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            mmap,
            block_size,
            num_blocks,
        })
    }

    fn block_range(&self, block: u32) -> Result<std::ops::Range<usize>> {
        ensure!(
            block < self.num_blocks,
            "block {} out of bounds (num_blocks={})",
            block,
            self.num_blocks
        );
        let start = block as usize * self.block_size;
        Ok(start..start + self.block_size)
    }
}

impl BlockCache for MmapCache {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    fn read_block(&self, block: u32, buf: &mut [u8]) -> Result<()> {
        ensure!(
            buf.len() == self.block_size,
            "read buffer is {} bytes, block size is {}",
            buf.len(),
            self.block_size
        );
        let range = self.block_range(block)?;
        buf.copy_from_slice(&self.mmap[range]);
        Ok(())
    }

    fn write_block(&mut self, block: u32, data: &[u8]) -> Result<()> {
        ensure!(
            data.len() == self.block_size,
            "write buffer is {} bytes, block size is {}",
            data.len(),
            self.block_size
        );
        let range = self.block_range(block)?;
        self.mmap[range].copy_from_slice(data);
        Ok(())
    }

    fn notify_allocate(&mut self, _block: u32) {}

    fn notify_deallocate(&mut self, _block: u32) {}

    fn sync(&self) -> Result<()> {
        self.mmap.flush().wrap_err("failed to flush device mapping")
    }
}
