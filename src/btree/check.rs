//! Structural audit of the on-disk tree.
//!
//! `sanity_check` walks every reachable node carrying the key window its
//! subtree is allowed to hold, then walks the free list, and finally checks
//! that the two walks plus the superblock account for every block on the
//! device. It reads blocks only; a damaged tree is reported, never repaired.

use eyre::Result;
use hashbrown::HashSet;

use crate::cache::BlockCache;
use crate::config::{MAX_DEPTH, SUPERBLOCK_BLOCK};
use crate::error::TreeError;

use super::node::{Node, NodeKind};
use super::tree::BTreeIndex;

impl<C: BlockCache> BTreeIndex<C> {
    /// Verifies the tree's structural invariants:
    ///
    /// - every reachable block is a Root, Interior, or Leaf node, reached
    ///   exactly once
    /// - keys within each node are strictly ascending and inside the window
    ///   implied by the separators above
    /// - no node exceeds its geometry-derived capacity
    /// - every leaf sits at the same depth
    /// - the free list holds only Free blocks and terminates
    /// - reachable blocks, free blocks, and the superblock account for the
    ///   whole device
    pub fn sanity_check(&self) -> Result<()> {
        let num_blocks = self.cache.num_blocks();
        let mut seen: HashSet<u32> = HashSet::new();
        seen.insert(SUPERBLOCK_BLOCK);

        let mut leaf_depth = None;
        self.check_node(
            self.superblock.root_block(),
            0,
            None,
            None,
            &mut seen,
            &mut leaf_depth,
        )?;

        let mut head = self.superblock.freelist();
        let mut chain_len = 0u32;
        while head != 0 {
            if head >= num_blocks {
                return Err(TreeError::insane(format!(
                    "free list points at block {} beyond the device",
                    head
                )));
            }
            if !seen.insert(head) {
                return Err(TreeError::insane(format!(
                    "block {} is reachable and on the free list",
                    head
                )));
            }
            let node = Node::read_from(&self.cache, head)?;
            if node.kind() != NodeKind::Free {
                return Err(TreeError::insane(format!(
                    "free list holds a {:?} block at {}",
                    node.kind(),
                    head
                )));
            }
            chain_len += 1;
            if chain_len > num_blocks {
                return Err(TreeError::insane("free list does not terminate"));
            }
            head = node.freelist();
        }

        if seen.len() as u32 != num_blocks {
            return Err(TreeError::insane(format!(
                "{} of {} blocks are neither reachable nor free",
                num_blocks - seen.len() as u32,
                num_blocks
            )));
        }
        Ok(())
    }

    fn check_node(
        &self,
        block: u32,
        depth: usize,
        lo: Option<&[u8]>,
        hi: Option<&[u8]>,
        seen: &mut HashSet<u32>,
        leaf_depth: &mut Option<usize>,
    ) -> Result<()> {
        if depth >= MAX_DEPTH {
            return Err(TreeError::insane("audit exceeded the maximum tree depth"));
        }
        if block == SUPERBLOCK_BLOCK || block >= self.cache.num_blocks() {
            return Err(TreeError::insane(format!(
                "child pointer addresses block {}",
                block
            )));
        }
        if !seen.insert(block) {
            return Err(TreeError::insane(format!(
                "block {} is reachable through two paths",
                block
            )));
        }

        let node = Node::read_from(&self.cache, block)?;
        match node.kind() {
            NodeKind::Root => {
                if depth != 0 {
                    return Err(TreeError::insane(format!(
                        "Root node at block {} below the root",
                        block
                    )));
                }
            }
            NodeKind::Interior => {
                if depth == 0 {
                    return Err(TreeError::insane(format!(
                        "root block {} is an Interior node",
                        block
                    )));
                }
            }
            NodeKind::Leaf => {}
            kind => {
                return Err(TreeError::insane(format!(
                    "{:?} block at {} is reachable from the root",
                    kind, block
                )))
            }
        }

        let n = node.num_keys();
        let capacity = match node.kind() {
            NodeKind::Leaf => node.leaf_slots(),
            _ => node.interior_slots(),
        };
        if n > capacity {
            return Err(TreeError::insane(format!(
                "block {} holds {} keys, capacity is {}",
                block, n, capacity
            )));
        }

        for i in 0..n {
            let key = node.key_at(i)?;
            if i > 0 && node.key_at(i - 1)? >= key {
                return Err(TreeError::insane(format!(
                    "keys out of order in block {} at slot {}",
                    block, i
                )));
            }
            if let Some(lo) = lo {
                if key < lo {
                    return Err(TreeError::insane(format!(
                        "key below its subtree window in block {}",
                        block
                    )));
                }
            }
            if let Some(hi) = hi {
                if key >= hi {
                    return Err(TreeError::insane(format!(
                        "key above its subtree window in block {}",
                        block
                    )));
                }
            }
        }

        match node.kind() {
            NodeKind::Leaf => match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(expected) if expected != depth => {
                    return Err(TreeError::insane(format!(
                        "leaf at block {} sits at depth {}, expected {}",
                        block, depth, expected
                    )))
                }
                Some(_) => {}
            },
            _ => {
                // An empty root has no children yet. Anywhere else a
                // separator-less interior node would strand its subtree.
                if n == 0 && depth > 0 {
                    return Err(TreeError::insane(format!(
                        "interior block {} has no separators",
                        block
                    )));
                }
                if n > 0 {
                    for i in 0..=n {
                        let child = node.ptr_at(i)?;
                        let child_lo = if i == 0 { lo } else { Some(node.key_at(i - 1)?) };
                        let child_hi = if i == n { hi } else { Some(node.key_at(i)?) };
                        self.check_node(child, depth + 1, child_lo, child_hi, seen, leaf_depth)?;
                    }
                }
            }
        }
        Ok(())
    }
}
