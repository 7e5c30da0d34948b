//! # blocktree
//!
//! A disk-backed B+-tree index that maps fixed-width binary keys to
//! fixed-width binary values, persisted as equal-sized blocks through a
//! pluggable buffer cache.
//!
//! ## Quick Start
//!
//! ```ignore
//! use blocktree::{BTreeIndex, MemoryCache};
//!
//! let cache = MemoryCache::new(256, 64)?;
//! let mut index = BTreeIndex::create(cache, 8, 8)?;
//!
//! index.insert(b"00000001", b"A\0\0\0\0\0\0\0")?;
//! let value = index.lookup(b"00000001")?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   Public API (BTreeIndex)           │
//! ├─────────────────────────────────────┤
//! │   Descent / Insert / Split engines  │
//! ├─────────────────────────────────────┤
//! │   Node codec + free-list allocator  │
//! ├─────────────────────────────────────┤
//! │   BlockCache (memory or mmap file)  │
//! └─────────────────────────────────────┘
//! ```
//!
//! The tree is single-writer and fully synchronous. Operations either run
//! to completion or return an error; there is no journaling, and recovery
//! after a crash mid-write is out of scope. Within one insert, children
//! are persisted before the parents that reference them, so an interrupted
//! write leaves the on-disk tree stale rather than contradictory.
//!
//! ## Module Overview
//!
//! - [`btree`]: node layout, allocator, descent/insert/split, renderers
//! - [`cache`]: the buffer-cache contract and its two implementations
//! - [`error`]: the error taxonomy shared by every operation
//! - [`config`]: layout constants and limits

pub mod btree;
pub mod cache;
pub mod config;
pub mod error;

pub use btree::{BTreeIndex, DisplayMode, Node, NodeKind};
pub use cache::{BlockCache, MemoryCache, MmapCache};
pub use error::TreeError;
