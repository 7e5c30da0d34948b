//! # B+Tree Index
//!
//! The index maps fixed-width keys to fixed-width values, persisted as one
//! node per block through a [`BlockCache`]. All structure lives on the
//! device; the only in-memory state between operations is the superblock
//! copy, which is authoritative and written back after every allocator
//! mutation.
//!
//! ## Descent
//!
//! Both lookup and update use one routine that walks from the root to the
//! leaf that owns the key, applying the intent at the matched slot. The
//! walk is iterative. Insert repeats the walk while recording the parent
//! path so a split can hand its separator upward without recursion.
//!
//! At an interior node the child is chosen by the first separator strictly
//! greater than the key; equality falls through to the right subtree, so a
//! separator admits the key range `[K, next)` on its right. At a leaf only
//! exact equality matches.
//!
//! ## Insert
//!
//! ```text
//! 1. Probe for the key; an existing key is a conflict.
//! 2. Walk to the target leaf, recording the parent path.
//! 3. Plan the split chain: the leaf if full, the run of full ancestors
//!    above it, plus a root block if the run covers the whole path.
//! 4. Reserve exactly that many blocks. On failure, push the partial
//!    reservation back and report out of space with the tree untouched.
//! 5. Insert into the leaf, splitting if planned; hand each resulting
//!    (separator, sibling) pair to the next parent on the path.
//! 6. If the pair survives past the root, install a fresh root with one
//!    separator and two children, then persist the superblock.
//! ```
//!
//! Children are always written before the parent that references them, and
//! the superblock is written last, so an interrupted insert leaves a stale
//! tree rather than a contradictory one.
//!
//! ## Splits
//!
//! A split merges the full node's slots with the incoming entry into a
//! pre-sized buffer, then rebuilds both halves:
//!
//! - Leaf with n entries: the left half keeps `(n + 2) / 2`, the right
//!   half keeps the rest, and the right half's first key is handed up as
//!   the separator while staying in the leaf.
//! - Interior with n cells: the left half keeps `(n + 1) / 2` keys and one
//!   more pointer, the middle key is promoted out of both halves, and the
//!   promoted key's right-hand pointer becomes the right half's first
//!   pointer.
//!
//! Ties leave the extra entry on the left, which makes split shapes
//! deterministic.

use std::collections::VecDeque;

use eyre::{ensure, Result};
use smallvec::SmallVec;
use tracing::debug;

use crate::cache::BlockCache;
use crate::config::{MAX_DEPTH, SUPERBLOCK_BLOCK};
use crate::error::TreeError;

use super::alloc;
use super::node::{Node, NodeKind};

/// Short fixed-width keys and values stay off the heap during splits.
type SlotBuf = SmallVec<[u8; 32]>;

/// A disk-backed B+-tree index over a block cache.
#[derive(Debug)]
pub struct BTreeIndex<C: BlockCache> {
    pub(super) cache: C,
    pub(super) superblock: Node,
}

impl<C: BlockCache> BTreeIndex<C> {
    /// Formats the device and attaches to the fresh tree.
    pub fn create(mut cache: C, keysize: usize, valuesize: usize) -> Result<Self> {
        alloc::format_device(&mut cache, keysize, valuesize)?;
        Self::attach(cache, SUPERBLOCK_BLOCK)
    }

    /// Attaches to a previously formatted device.
    pub fn open(cache: C) -> Result<Self> {
        Self::attach(cache, SUPERBLOCK_BLOCK)
    }

    fn attach(cache: C, init_block: u32) -> Result<Self> {
        ensure!(
            init_block == SUPERBLOCK_BLOCK,
            "only block {} is supported as the superblock location",
            SUPERBLOCK_BLOCK
        );

        let superblock = Node::read_from(&cache, init_block)?;
        if superblock.kind() != NodeKind::Super {
            return Err(TreeError::insane(format!(
                "block {} holds a {:?} node, not a superblock",
                init_block,
                superblock.kind()
            )));
        }
        let root = superblock.root_block();
        if root == SUPERBLOCK_BLOCK || root >= cache.num_blocks() {
            return Err(TreeError::insane(format!(
                "superblock names {} as the root block",
                root
            )));
        }

        debug!(
            root,
            keysize = superblock.keysize(),
            valuesize = superblock.valuesize(),
            "attached index"
        );
        Ok(Self { cache, superblock })
    }

    /// Persists the superblock, syncs the cache, and hands the cache back.
    pub fn detach(mut self) -> Result<C> {
        self.superblock.write_to(&mut self.cache, SUPERBLOCK_BLOCK)?;
        self.cache.sync()?;
        debug!("detached index");
        Ok(self.cache)
    }

    pub fn keysize(&self) -> usize {
        self.superblock.keysize()
    }

    pub fn valuesize(&self) -> usize {
        self.superblock.valuesize()
    }

    pub fn root_block(&self) -> u32 {
        self.superblock.root_block()
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        ensure!(
            key.len() == self.keysize(),
            "key is {} bytes, index key width is {}",
            key.len(),
            self.keysize()
        );
        Ok(())
    }

    fn check_value(&self, value: &[u8]) -> Result<()> {
        ensure!(
            value.len() == self.valuesize(),
            "value is {} bytes, index value width is {}",
            value.len(),
            self.valuesize()
        );
        Ok(())
    }

    fn new_node(&self, kind: NodeKind) -> Result<Node> {
        let mut node = Node::new(
            kind,
            self.keysize(),
            self.valuesize(),
            self.cache.block_size(),
        )?;
        node.set_root_block(self.superblock.root_block());
        Ok(node)
    }

    /// Walks from the root to the leaf slot holding `key`, if any. The
    /// shared descent behind both lookup and update.
    fn find_entry(&self, key: &[u8]) -> Result<Option<(u32, Node, usize)>> {
        let mut current = self.superblock.root_block();

        for _ in 0..MAX_DEPTH {
            let node = Node::read_from(&self.cache, current)?;
            match node.kind() {
                NodeKind::Root | NodeKind::Interior => {
                    if node.num_keys() == 0 {
                        return Ok(None);
                    }
                    current = child_for_lookup(&node, key)?;
                }
                NodeKind::Leaf => {
                    for slot in 0..node.num_keys() {
                        if node.key_at(slot)? == key {
                            return Ok(Some((current, node, slot)));
                        }
                    }
                    return Ok(None);
                }
                kind => {
                    return Err(TreeError::insane(format!(
                        "descent reached a {:?} node at block {}",
                        kind, current
                    )))
                }
            }
        }

        Err(TreeError::insane("descent exceeded the maximum tree depth"))
    }

    /// Point lookup. Returns the value stored for `key`.
    pub fn lookup(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.check_key(key)?;
        match self.find_entry(key)? {
            Some((_, node, slot)) => Ok(node.val_at(slot)?.to_vec()),
            None => Err(TreeError::NotFound.into()),
        }
    }

    /// Overwrites the value stored for an existing key in place.
    pub fn update(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        self.check_value(value)?;
        match self.find_entry(key)? {
            Some((block, mut node, slot)) => {
                node.set_val_at(slot, value)?;
                node.write_to(&mut self.cache, block)
            }
            None => Err(TreeError::NotFound.into()),
        }
    }

    /// Deletion is not supported.
    pub fn delete(&mut self, _key: &[u8]) -> Result<()> {
        Err(TreeError::Unimplemented.into())
    }

    /// Inserts a new key. An existing key is a conflict; nothing is
    /// overwritten.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        self.check_value(value)?;

        if self.find_entry(key)?.is_some() {
            return Err(TreeError::Conflict.into());
        }

        let root_block = self.superblock.root_block();
        {
            let root = Node::read_from(&self.cache, root_block)?;
            if root.kind() != NodeKind::Root {
                return Err(TreeError::insane(format!(
                    "root block {} holds a {:?} node",
                    root_block,
                    root.kind()
                )));
            }
            if root.num_keys() == 0 {
                return self.seed_empty_root(root_block, root, key, value);
            }
        }

        // Walk to the target leaf, recording the parent path.
        let mut path: Vec<u32> = Vec::new();
        let mut current = root_block;
        let leaf = loop {
            if path.len() >= MAX_DEPTH {
                return Err(TreeError::insane("descent exceeded the maximum tree depth"));
            }
            let node = Node::read_from(&self.cache, current)?;
            match node.kind() {
                NodeKind::Root | NodeKind::Interior => {
                    let child = child_for_insert(&node, key)?;
                    path.push(current);
                    current = child;
                }
                NodeKind::Leaf => break node,
                kind => {
                    return Err(TreeError::insane(format!(
                        "descent reached a {:?} node at block {}",
                        kind, current
                    )))
                }
            }
        };

        // Plan the split chain so every block it needs exists before
        // anything is modified.
        let mut needed = 0;
        if leaf.num_keys() == leaf.leaf_slots() {
            let mut full_run = 0;
            for &block in path.iter().rev() {
                let node = Node::read_from(&self.cache, block)?;
                if node.num_keys() == node.interior_slots() {
                    full_run += 1;
                } else {
                    break;
                }
            }
            needed = 1 + full_run;
            if full_run == path.len() {
                needed += 1;
            }
        }
        let mut reserved = self.reserve_blocks(needed)?;

        let mut pending = self.insert_into_leaf(current, leaf, key, value, &mut reserved)?;
        while let Some((separator, sibling)) = pending {
            pending = match path.pop() {
                Some(parent) => {
                    self.insert_into_interior(parent, &separator, sibling, &mut reserved)?
                }
                None => {
                    self.grow_root(root_block, &separator, sibling, &mut reserved)?;
                    None
                }
            };
        }

        if !reserved.is_empty() {
            return Err(TreeError::insane(
                "insert consumed fewer blocks than it reserved",
            ));
        }
        Ok(())
    }

    /// First insert into a fresh tree: hang two leaves off the root with
    /// the key as the lone separator. The left leaf starts empty; the key
    /// itself lands in the right leaf, which owns the range at and above
    /// the separator.
    fn seed_empty_root(
        &mut self,
        root_block: u32,
        mut root: Node,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let reserved = self.reserve_blocks(2)?;
        let (left_block, right_block) = (reserved[0], reserved[1]);

        let mut left = self.new_node(NodeKind::Leaf)?;
        left.set_link(right_block)?;
        left.write_to(&mut self.cache, left_block)?;

        let mut right = self.new_node(NodeKind::Leaf)?;
        right.set_link(0)?;
        right.leaf_insert_at(0, key, value)?;
        right.write_to(&mut self.cache, right_block)?;

        root.set_num_keys(1)?;
        root.set_key_at(0, key)?;
        root.set_ptr_at(0, left_block)?;
        root.set_ptr_at(1, right_block)?;
        root.write_to(&mut self.cache, root_block)?;

        debug!(left_block, right_block, "seeded empty root");
        Ok(())
    }

    /// Pops `count` blocks off the free list, undoing the whole batch if
    /// the list runs dry part-way.
    fn reserve_blocks(&mut self, count: usize) -> Result<VecDeque<u32>> {
        let mut reserved = VecDeque::with_capacity(count);
        for _ in 0..count {
            match alloc::allocate_block(&mut self.cache, &mut self.superblock) {
                Ok(block) => reserved.push_back(block),
                Err(err) => {
                    while let Some(block) = reserved.pop_back() {
                        alloc::push_free(&mut self.cache, &mut self.superblock, block)?;
                    }
                    return Err(err);
                }
            }
        }
        Ok(reserved)
    }

    fn insert_into_leaf(
        &mut self,
        block: u32,
        mut node: Node,
        key: &[u8],
        value: &[u8],
        reserved: &mut VecDeque<u32>,
    ) -> Result<Option<(SlotBuf, u32)>> {
        let slot = insertion_slot(&node, key)?;

        if node.num_keys() < node.leaf_slots() {
            node.leaf_insert_at(slot, key, value)?;
            node.write_to(&mut self.cache, block)?;
            return Ok(None);
        }

        self.split_leaf(block, node, slot, key, value, reserved)
            .map(Some)
    }

    fn split_leaf(
        &mut self,
        block: u32,
        node: Node,
        slot: usize,
        key: &[u8],
        value: &[u8],
        reserved: &mut VecDeque<u32>,
    ) -> Result<(SlotBuf, u32)> {
        let n = node.num_keys();
        let mut keys: Vec<SlotBuf> = Vec::with_capacity(n + 1);
        let mut vals: Vec<SlotBuf> = Vec::with_capacity(n + 1);
        for i in 0..n {
            if i == slot {
                keys.push(SlotBuf::from_slice(key));
                vals.push(SlotBuf::from_slice(value));
            }
            keys.push(SlotBuf::from_slice(node.key_at(i)?));
            vals.push(SlotBuf::from_slice(node.val_at(i)?));
        }
        if slot == n {
            keys.push(SlotBuf::from_slice(key));
            vals.push(SlotBuf::from_slice(value));
        }

        let left_n = (n + 2) / 2;
        let right_n = n + 1 - left_n;
        let new_block = take_reserved(reserved)?;

        // The separator is the right half's first key, and it stays there;
        // leaves never give a key up.
        let separator = keys[left_n].clone();

        let mut right = self.new_node(NodeKind::Leaf)?;
        right.set_num_keys(right_n)?;
        for i in 0..right_n {
            right.set_key_at(i, &keys[left_n + i])?;
            right.set_val_at(i, &vals[left_n + i])?;
        }
        right.set_link(node.link()?)?;

        let mut left = self.new_node(NodeKind::Leaf)?;
        left.set_num_keys(left_n)?;
        for i in 0..left_n {
            left.set_key_at(i, &keys[i])?;
            left.set_val_at(i, &vals[i])?;
        }
        left.set_link(new_block)?;

        right.write_to(&mut self.cache, new_block)?;
        left.write_to(&mut self.cache, block)?;

        debug!(block, new_block, "split leaf");
        Ok((separator, new_block))
    }

    fn insert_into_interior(
        &mut self,
        block: u32,
        separator: &[u8],
        child: u32,
        reserved: &mut VecDeque<u32>,
    ) -> Result<Option<(SlotBuf, u32)>> {
        let mut node = Node::read_from(&self.cache, block)?;
        match node.kind() {
            NodeKind::Root | NodeKind::Interior => {}
            kind => {
                return Err(TreeError::insane(format!(
                    "split propagated into a {:?} node at block {}",
                    kind, block
                )))
            }
        }

        let slot = insertion_slot(&node, separator)?;

        if node.num_keys() < node.interior_slots() {
            node.interior_insert_at(slot, separator, child)?;
            node.write_to(&mut self.cache, block)?;
            return Ok(None);
        }

        self.split_interior(block, node, slot, separator, child, reserved)
            .map(Some)
    }

    fn split_interior(
        &mut self,
        block: u32,
        node: Node,
        slot: usize,
        key: &[u8],
        child: u32,
        reserved: &mut VecDeque<u32>,
    ) -> Result<(SlotBuf, u32)> {
        let n = node.num_keys();
        let mut keys: Vec<SlotBuf> = Vec::with_capacity(n + 1);
        for i in 0..n {
            keys.push(SlotBuf::from_slice(node.key_at(i)?));
        }
        keys.insert(slot, SlotBuf::from_slice(key));

        let mut ptrs: Vec<u32> = Vec::with_capacity(n + 2);
        for i in 0..=n {
            ptrs.push(node.ptr_at(i)?);
        }
        ptrs.insert(slot + 1, child);

        let left_n = (n + 1) / 2;
        let right_n = n - left_n;

        // The middle key is promoted out of both halves. Its right-hand
        // pointer leads the right sibling.
        let separator = keys[left_n].clone();
        let new_block = take_reserved(reserved)?;

        let mut right = self.new_node(NodeKind::Interior)?;
        right.set_num_keys(right_n)?;
        for i in 0..right_n {
            right.set_key_at(i, &keys[left_n + 1 + i])?;
        }
        for i in 0..=right_n {
            right.set_ptr_at(i, ptrs[left_n + 1 + i])?;
        }

        // A split root is demoted to interior; the caller installs the new
        // root above both halves.
        let mut left = self.new_node(NodeKind::Interior)?;
        left.set_num_keys(left_n)?;
        for i in 0..left_n {
            left.set_key_at(i, &keys[i])?;
        }
        for i in 0..=left_n {
            left.set_ptr_at(i, ptrs[i])?;
        }

        right.write_to(&mut self.cache, new_block)?;
        left.write_to(&mut self.cache, block)?;

        debug!(
            block,
            new_block,
            was_root = node.kind() == NodeKind::Root,
            "split interior"
        );
        Ok((separator, new_block))
    }

    /// Installs a fresh root above a split that consumed the old one, then
    /// persists the superblock.
    fn grow_root(
        &mut self,
        old_root: u32,
        separator: &[u8],
        sibling: u32,
        reserved: &mut VecDeque<u32>,
    ) -> Result<()> {
        let root_block = take_reserved(reserved)?;

        let mut root = self.new_node(NodeKind::Root)?;
        root.set_root_block(root_block);
        root.set_num_keys(1)?;
        root.set_key_at(0, separator)?;
        root.set_ptr_at(0, old_root)?;
        root.set_ptr_at(1, sibling)?;
        root.write_to(&mut self.cache, root_block)?;

        self.superblock.set_root_block(root_block);
        self.superblock.write_to(&mut self.cache, SUPERBLOCK_BLOCK)?;

        debug!(old_root, root_block, "root grew");
        Ok(())
    }
}

/// Child to follow while searching: the first separator strictly greater
/// than the key diverts; equality falls through to the right subtree.
fn child_for_lookup(node: &Node, key: &[u8]) -> Result<u32> {
    for i in 0..node.num_keys() {
        if key < node.key_at(i)? {
            return node.ptr_at(i);
        }
    }
    node.ptr_at(node.num_keys())
}

/// Child to follow while inserting. The caller has already proven the key
/// absent, so meeting it among the separators means the structure lies.
fn child_for_insert(node: &Node, key: &[u8]) -> Result<u32> {
    for i in 0..node.num_keys() {
        let probe = node.key_at(i)?;
        if key == probe {
            return Err(TreeError::insane(
                "inserted key already present in an interior node",
            ));
        }
        if key < probe {
            return node.ptr_at(i);
        }
    }
    node.ptr_at(node.num_keys())
}

/// Slot where `key` sorts into `node`: the first slot whose key is greater,
/// or one past the end.
fn insertion_slot(node: &Node, key: &[u8]) -> Result<usize> {
    for i in 0..node.num_keys() {
        let probe = node.key_at(i)?;
        if key == probe {
            return Err(TreeError::insane("duplicate key surfaced during insert"));
        }
        if key < probe {
            return Ok(i);
        }
    }
    Ok(node.num_keys())
}

fn take_reserved(reserved: &mut VecDeque<u32>) -> Result<u32> {
    reserved
        .pop_front()
        .ok_or_else(|| TreeError::Insane("split plan reserved too few blocks".to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn test_index(num_blocks: u32) -> BTreeIndex<MemoryCache> {
        let cache = MemoryCache::new(256, num_blocks).unwrap();
        BTreeIndex::create(cache, 8, 8).unwrap()
    }

    fn key(i: usize) -> Vec<u8> {
        format!("k{:07}", i).into_bytes()
    }

    fn val(i: usize) -> Vec<u8> {
        format!("v{:07}", i).into_bytes()
    }

    #[test]
    fn create_initializes_empty_tree() {
        let index = test_index(8);

        assert_eq!(index.root_block(), 1);
        assert_eq!(index.keysize(), 8);
        assert_eq!(index.valuesize(), 8);

        let root = Node::read_from(index.cache(), 1).unwrap();
        assert_eq!(root.kind(), NodeKind::Root);
        assert_eq!(root.num_keys(), 0);
    }

    #[test]
    fn lookup_on_empty_tree_is_not_found() {
        let index = test_index(8);

        let err = index.lookup(&key(1)).unwrap_err();
        assert_eq!(err.downcast_ref::<TreeError>(), Some(&TreeError::NotFound));
    }

    #[test]
    fn insert_and_lookup_single_key() {
        let mut index = test_index(8);

        index.insert(&key(1), &val(1)).unwrap();
        assert_eq!(index.lookup(&key(1)).unwrap(), val(1));
    }

    #[test]
    fn insert_rejects_wrong_width_key() {
        let mut index = test_index(8);

        assert!(index.insert(b"short", &val(1)).is_err());
        assert!(index.insert(&key(1), b"waytoolongvalue!").is_err());
    }

    #[test]
    fn duplicate_insert_is_conflict_and_preserves_value() {
        let mut index = test_index(8);

        index.insert(&key(7), &val(7)).unwrap();
        let err = index.insert(&key(7), &val(8)).unwrap_err();
        assert_eq!(err.downcast_ref::<TreeError>(), Some(&TreeError::Conflict));
        assert_eq!(index.lookup(&key(7)).unwrap(), val(7));
    }

    #[test]
    fn update_overwrites_in_place() {
        let mut index = test_index(8);

        index.insert(&key(3), &val(3)).unwrap();
        index.update(&key(3), b"newvalue").unwrap();
        assert_eq!(index.lookup(&key(3)).unwrap(), b"newvalue".to_vec());
    }

    #[test]
    fn update_of_missing_key_is_not_found() {
        let mut index = test_index(8);

        let err = index.update(&key(3), &val(3)).unwrap_err();
        assert_eq!(err.downcast_ref::<TreeError>(), Some(&TreeError::NotFound));
    }

    #[test]
    fn delete_is_unimplemented() {
        let mut index = test_index(8);

        let err = index.delete(&key(1)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<TreeError>(),
            Some(&TreeError::Unimplemented)
        );
    }

    #[test]
    fn ascending_inserts_split_leaves() {
        let mut index = test_index(64);

        for i in 0..100 {
            index.insert(&key(i), &val(i)).unwrap();
        }
        for i in 0..100 {
            assert_eq!(index.lookup(&key(i)).unwrap(), val(i), "key {}", i);
        }
        let err = index.lookup(&key(100)).unwrap_err();
        assert_eq!(err.downcast_ref::<TreeError>(), Some(&TreeError::NotFound));
    }

    #[test]
    fn descending_inserts_split_leaves() {
        let mut index = test_index(64);

        for i in (0..100).rev() {
            index.insert(&key(i), &val(i)).unwrap();
        }
        for i in 0..100 {
            assert_eq!(index.lookup(&key(i)).unwrap(), val(i));
        }
    }

    #[test]
    fn interleaved_inserts_stay_retrievable() {
        let mut index = test_index(64);

        // 37 is coprime with 100, so this touches every key once in a
        // scattered order.
        for step in 0..100 {
            let i = (step * 37) % 100;
            index.insert(&key(i), &val(i)).unwrap();
        }
        for i in 0..100 {
            assert_eq!(index.lookup(&key(i)).unwrap(), val(i));
        }
    }

    #[test]
    fn out_of_space_leaves_existing_keys_intact() {
        // Superblock, root, and two free blocks. The first insert takes
        // both seed leaves; the first leaf split has nothing to reserve.
        let mut index = test_index(4);

        let mut inserted = 0;
        let err = loop {
            match index.insert(&key(inserted), &val(inserted)) {
                Ok(()) => inserted += 1,
                Err(err) => break err,
            }
        };
        assert_eq!(
            err.downcast_ref::<TreeError>(),
            Some(&TreeError::OutOfSpace)
        );
        assert!(inserted > 0);

        for i in 0..inserted {
            assert_eq!(index.lookup(&key(i)).unwrap(), val(i));
        }
    }

    #[test]
    fn detach_and_reopen_preserves_tree() {
        let mut index = test_index(16);
        for i in 0..20 {
            index.insert(&key(i), &val(i)).unwrap();
        }

        let cache = index.detach().unwrap();
        let index = BTreeIndex::open(cache).unwrap();

        for i in 0..20 {
            assert_eq!(index.lookup(&key(i)).unwrap(), val(i));
        }
    }

    #[test]
    fn open_rejects_unformatted_device() {
        let cache = MemoryCache::new(256, 8).unwrap();
        let err = BTreeIndex::open(cache).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TreeError>(),
            Some(TreeError::Insane(_))
        ));
    }
}
