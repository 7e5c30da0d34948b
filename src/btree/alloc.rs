//! # Free-List Allocator
//!
//! Blocks available for allocation form a singly-linked list threaded
//! through the `freelist` field of each Free block, with the head stored in
//! the superblock. Allocation pops the head; deallocation pushes onto it.
//!
//! Both operations persist the updated superblock before invoking the
//! cache's liveness hook, so a cache that tracks allocation can trust what
//! it sees on disk. Deallocation marks the block Free on disk before the
//! head moves, keeping an interrupted writer from ever leaving a reachable
//! block on the list.

use eyre::{ensure, Result};
use tracing::{debug, trace};

use crate::cache::BlockCache;
use crate::config::{INITIAL_ROOT_BLOCK, MIN_BLOCKS, SUPERBLOCK_BLOCK};
use crate::error::TreeError;

use super::node::{Node, NodeKind};

/// Formats a device: superblock at block 0, an empty root at block 1, and
/// blocks 2 through `num_blocks - 1` threaded as the free list, terminated
/// by 0.
pub(crate) fn format_device<C: BlockCache>(
    cache: &mut C,
    keysize: usize,
    valuesize: usize,
) -> Result<()> {
    let block_size = cache.block_size();
    let num_blocks = cache.num_blocks();
    ensure!(
        num_blocks >= MIN_BLOCKS,
        "device has {} blocks, need at least {}",
        num_blocks,
        MIN_BLOCKS
    );

    // A split must leave both halves populated, so the geometry has to
    // admit two entries per node.
    let probe = Node::new(NodeKind::Leaf, keysize, valuesize, block_size)?;
    ensure!(
        probe.leaf_slots() >= 2,
        "block size {} holds fewer than two {}-byte key / {}-byte value leaf entries",
        block_size,
        keysize,
        valuesize
    );
    ensure!(
        probe.interior_slots() >= 2,
        "block size {} holds fewer than two interior cells for {}-byte keys",
        block_size,
        keysize
    );

    let mut superblock = Node::new(NodeKind::Super, keysize, valuesize, block_size)?;
    superblock.set_root_block(INITIAL_ROOT_BLOCK);
    superblock.set_freelist(INITIAL_ROOT_BLOCK + 1);
    cache.notify_allocate(SUPERBLOCK_BLOCK);
    superblock.write_to(cache, SUPERBLOCK_BLOCK)?;

    let mut root = Node::new(NodeKind::Root, keysize, valuesize, block_size)?;
    root.set_root_block(INITIAL_ROOT_BLOCK);
    cache.notify_allocate(INITIAL_ROOT_BLOCK);
    root.write_to(cache, INITIAL_ROOT_BLOCK)?;

    for block in INITIAL_ROOT_BLOCK + 1..num_blocks {
        let mut free = Node::new(NodeKind::Free, keysize, valuesize, block_size)?;
        free.set_root_block(INITIAL_ROOT_BLOCK);
        free.set_freelist(if block + 1 == num_blocks { 0 } else { block + 1 });
        free.write_to(cache, block)?;
    }

    debug!(num_blocks, block_size, keysize, valuesize, "formatted device");
    Ok(())
}

/// Pops the free-list head. The popped block stays marked Free on disk
/// until the caller writes a node into it, which the caller must do before
/// its own operation completes.
pub(crate) fn allocate_block<C: BlockCache>(cache: &mut C, superblock: &mut Node) -> Result<u32> {
    let head = superblock.freelist();
    if head == 0 {
        return Err(TreeError::OutOfSpace.into());
    }

    let node = Node::read_from(cache, head)?;
    if node.kind() != NodeKind::Free {
        return Err(TreeError::insane(format!(
            "free-list head {} is a {:?} block",
            head,
            node.kind()
        )));
    }

    superblock.set_freelist(node.freelist());
    superblock.write_to(cache, SUPERBLOCK_BLOCK)?;
    cache.notify_allocate(head);

    trace!(block = head, "allocated block");
    Ok(head)
}

/// Returns a live block to the free list. The block must currently hold a
/// non-Free node.
pub(crate) fn deallocate_block<C: BlockCache>(
    cache: &mut C,
    superblock: &mut Node,
    block: u32,
) -> Result<()> {
    let node = Node::read_from(cache, block)?;
    if node.kind() == NodeKind::Free {
        return Err(TreeError::insane(format!("block {} deallocated twice", block)));
    }
    push_free(cache, superblock, block)
}

/// Pushes `block` onto the free list unconditionally. Used for blocks that
/// were popped but never written, where the Free marker is still on disk.
pub(crate) fn push_free<C: BlockCache>(
    cache: &mut C,
    superblock: &mut Node,
    block: u32,
) -> Result<()> {
    ensure!(
        block != SUPERBLOCK_BLOCK,
        "cannot put the superblock on the free list"
    );

    let mut node = Node::new(
        NodeKind::Free,
        superblock.keysize(),
        superblock.valuesize(),
        cache.block_size(),
    )?;
    node.set_root_block(superblock.root_block());
    node.set_freelist(superblock.freelist());
    node.write_to(cache, block)?;

    superblock.set_freelist(block);
    superblock.write_to(cache, SUPERBLOCK_BLOCK)?;
    cache.notify_deallocate(block);

    trace!(block, "returned block to free list");
    Ok(())
}
