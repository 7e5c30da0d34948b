//! # B+Tree Index Implementation
//!
//! A disk-backed B+-tree over fixed-width keys and values, one node per
//! block. The module splits along the same seams the on-disk format does:
//!
//! - `node`: block codec and typed slot accessors; every block starts
//!   with the same self-describing 16-byte header
//! - `alloc`: device formatting and the free-list allocator rooted in
//!   the superblock
//! - `tree`: the index itself; descent, insert with upward split
//!   propagation, root growth
//! - `display`: read-only renderers for debugging
//! - `check`: structural audit of a live device
//!
//! ## Block Roles
//!
//! ```text
//! block 0      Superblock: geometry, root pointer, free-list head
//! block 1      Initial root, relabeled Interior when the tree grows
//! blocks 2..   Leaves, interiors, and the free chain
//! ```
//!
//! All data lives in leaves. Interior nodes carry separator keys only;
//! leaf splits copy their separator up, interior splits promote theirs.

mod alloc;
mod check;
mod display;
mod node;
mod tree;

pub use display::DisplayMode;
pub use node::{Node, NodeKind};
pub use tree::BTreeIndex;
