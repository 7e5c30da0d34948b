//! # Configuration Constants
//!
//! Centralized layout and limit constants. Values that depend on each other
//! are co-located here so a change to one is visible next to the others it
//! affects.
//!
//! ```text
//! NODE_HEADER_SIZE (16 bytes)
//!       │
//!       ├─> leaf payload starts at NODE_HEADER_SIZE + LEAF_LINK_SIZE
//!       │     leaf capacity = (block - 20) / (keysize + valuesize)
//!       │
//!       └─> interior payload starts at NODE_HEADER_SIZE
//!             interior capacity = (block - 16 - PTR_SIZE) / (PTR_SIZE + keysize)
//!
//! SUPERBLOCK_BLOCK (0)
//!       │
//!       └─> INITIAL_ROOT_BLOCK (1), free chain threads 2..num_blocks
//! ```
//!
//! `MAX_DEPTH` bounds every descent and traversal. A tree with fan-out 2
//! (the minimum the geometry checks admit) reaches 2^64 keys before hitting
//! it, so a descent that runs this deep is following a cycle, not a tree.

/// Size in bytes of the header at the start of every block.
pub const NODE_HEADER_SIZE: usize = 16;

/// Size in bytes of a child block pointer stored in interior nodes.
pub const PTR_SIZE: usize = 4;

/// Size in bytes of the sibling link slot at the start of a leaf payload.
pub const LEAF_LINK_SIZE: usize = 4;

/// Block index of the superblock. Attach supports no other location.
pub const SUPERBLOCK_BLOCK: u32 = 0;

/// Block index of the root created when a device is formatted.
pub const INITIAL_ROOT_BLOCK: u32 = 1;

/// Minimum number of blocks a device must have: superblock, root, and at
/// least one free block.
pub const MIN_BLOCKS: u32 = 3;

/// Upper bound on tree height for descents and traversals.
pub const MAX_DEPTH: usize = 64;

/// Default geometry for the interactive driver.
pub const DEFAULT_BLOCK_SIZE: usize = 256;
pub const DEFAULT_NUM_BLOCKS: u32 = 64;
pub const DEFAULT_KEYSIZE: usize = 8;
pub const DEFAULT_VALUESIZE: usize = 8;

const _: () = assert!(PTR_SIZE == std::mem::size_of::<u32>());
const _: () = assert!(LEAF_LINK_SIZE == PTR_SIZE);
const _: () = assert!(MIN_BLOCKS as u64 > INITIAL_ROOT_BLOCK as u64);
