//! End-to-end scenarios over the in-memory cache: the documented geometry
//! of 256-byte blocks with 8-byte keys and values, split-forcing workloads,
//! and allocator exhaustion.

use blocktree::{BTreeIndex, DisplayMode, MemoryCache, TreeError};

const BLOCK_SIZE: usize = 256;
const NUM_BLOCKS: u32 = 64;

fn new_index(num_blocks: u32) -> BTreeIndex<MemoryCache> {
    let cache = MemoryCache::new(BLOCK_SIZE, num_blocks).unwrap();
    BTreeIndex::create(cache, 8, 8).unwrap()
}

fn pad(text: &str) -> Vec<u8> {
    assert!(text.len() <= 8);
    let mut out = vec![0u8; 8];
    out[..text.len()].copy_from_slice(text.as_bytes());
    out
}

fn sorted_projection(index: &BTreeIndex<MemoryCache>) -> Vec<String> {
    let mut out = Vec::new();
    index.display(&mut out, DisplayMode::SortedKeyVal).unwrap();
    String::from_utf8(out)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn single_insert_then_lookup() {
    let mut index = new_index(NUM_BLOCKS);

    index.insert(&pad("00000001"), &pad("A")).unwrap();
    assert_eq!(index.lookup(&pad("00000001")).unwrap(), pad("A"));

    index.sanity_check().unwrap();
}

#[test]
fn reinsert_conflicts_and_keeps_first_value() {
    let mut index = new_index(NUM_BLOCKS);

    index.insert(&pad("K"), &pad("V1")).unwrap();
    let err = index.insert(&pad("K"), &pad("V2")).unwrap_err();
    assert_eq!(err.downcast_ref::<TreeError>(), Some(&TreeError::Conflict));
    assert_eq!(index.lookup(&pad("K")).unwrap(), pad("V1"));

    index.sanity_check().unwrap();
}

#[test]
fn forty_keys_split_and_stay_retrievable() {
    let mut index = new_index(NUM_BLOCKS);

    for i in 1..=40 {
        let key = format!("k{:02}", i);
        let val = format!("v{:02}", i);
        index.insert(&pad(&key), &pad(&val)).unwrap();
    }

    for i in 1..=40 {
        let key = format!("k{:02}", i);
        let val = format!("v{:02}", i);
        assert_eq!(index.lookup(&pad(&key)).unwrap(), pad(&val), "key {}", key);
    }

    let err = index.lookup(&pad("k99")).unwrap_err();
    assert_eq!(err.downcast_ref::<TreeError>(), Some(&TreeError::NotFound));

    index.sanity_check().unwrap();
}

#[test]
fn update_after_splits_touches_only_its_key() {
    let mut index = new_index(NUM_BLOCKS);

    for i in 1..=40 {
        index
            .insert(&pad(&format!("k{:02}", i)), &pad(&format!("v{:02}", i)))
            .unwrap();
    }

    index.update(&pad("k20"), &pad("V_NEW")).unwrap();
    assert_eq!(index.lookup(&pad("k20")).unwrap(), pad("V_NEW"));
    assert_eq!(index.lookup(&pad("k21")).unwrap(), pad("v21"));

    index.sanity_check().unwrap();
}

#[test]
fn update_is_idempotent_at_the_byte_level() {
    let mut index = new_index(16);
    for i in 0..10 {
        index
            .insert(&pad(&format!("k{:02}", i)), &pad(&format!("v{:02}", i)))
            .unwrap();
    }

    index.update(&pad("k05"), &pad("fresh")).unwrap();
    let after_first = snapshot(&index);
    index.update(&pad("k05"), &pad("fresh")).unwrap();
    assert_eq!(after_first, snapshot(&index));
}

fn snapshot(index: &BTreeIndex<MemoryCache>) -> Vec<Vec<u8>> {
    use blocktree::BlockCache;
    let cache = index.cache();
    (0..cache.num_blocks())
        .map(|block| {
            let mut buf = vec![0u8; cache.block_size()];
            cache.read_block(block, &mut buf).unwrap();
            buf
        })
        .collect()
}

#[test]
fn conflicting_insert_leaves_the_device_byte_identical() {
    let mut index = new_index(16);
    for i in 0..10 {
        index
            .insert(&pad(&format!("k{:02}", i)), &pad(&format!("v{:02}", i)))
            .unwrap();
    }

    let before = snapshot(&index);
    let err = index.insert(&pad("k03"), &pad("other")).unwrap_err();
    assert_eq!(err.downcast_ref::<TreeError>(), Some(&TreeError::Conflict));
    assert_eq!(before, snapshot(&index));
}

#[test]
fn filling_the_device_fails_cleanly() {
    let mut index = new_index(12);

    let mut inserted = Vec::new();
    let err = loop {
        let i = inserted.len();
        let key = pad(&format!("k{:04}", i));
        match index.insert(&key, &pad("v")) {
            Ok(()) => inserted.push(key),
            Err(err) => break err,
        }
    };
    assert_eq!(
        err.downcast_ref::<TreeError>(),
        Some(&TreeError::OutOfSpace)
    );
    assert!(inserted.len() > 20, "only {} keys fit", inserted.len());

    // The failed insert must not have disturbed the structure.
    index.sanity_check().unwrap();
    for key in &inserted {
        assert_eq!(index.lookup(key).unwrap(), pad("v"));
    }

    // A key that sorts into a leaf with room needs no allocation and
    // still goes in.
    index.insert(&pad("a"), &pad("v")).unwrap();
    assert_eq!(index.lookup(&pad("a")).unwrap(), pad("v"));
    index.sanity_check().unwrap();

    let projection = sorted_projection(&index);
    assert_eq!(projection.len(), inserted.len() + 1);
}

#[test]
fn deep_tree_grows_through_root_splits() {
    // 1000 keys overflow a single 19-separator root, forcing interior
    // splits and root growth past two levels.
    let mut index = new_index(256);

    for step in 0..1000 {
        let i = (step * 577) % 1000;
        let key = format!("k{:06}", i);
        let val = format!("v{:06}", i);
        index.insert(&pad(&key), &pad(&val)).unwrap();
    }

    assert!(index.root_block() != 1, "root never moved");

    for i in 0..1000 {
        let key = format!("k{:06}", i);
        let val = format!("v{:06}", i);
        assert_eq!(index.lookup(&pad(&key)).unwrap(), pad(&val), "key {}", key);
    }

    index.sanity_check().unwrap();

    let projection = sorted_projection(&index);
    assert_eq!(projection.len(), 1000);
    let mut sorted = projection.clone();
    sorted.sort();
    assert_eq!(projection, sorted);
}

#[test]
fn dot_rendering_names_every_reachable_block() {
    let mut index = new_index(NUM_BLOCKS);
    for i in 0..60 {
        index
            .insert(&pad(&format!("k{:02}", i)), &pad(&format!("v{:02}", i)))
            .unwrap();
    }

    let mut out = Vec::new();
    index.display(&mut out, DisplayMode::DepthDot).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert!(text.starts_with("digraph tree {\n"));
    assert!(text.ends_with("}\n"));

    // Every edge target has a label line of its own.
    for line in text.lines() {
        if let Some((_, target)) = line.strip_suffix(';').and_then(|l| l.split_once(" -> ")) {
            let label = format!("{} [ label=", target);
            assert!(text.contains(&label), "no label for block {}", target);
        }
    }
}

#[test]
fn display_does_not_disturb_the_tree() {
    let mut index = new_index(NUM_BLOCKS);
    for i in 0..40 {
        index
            .insert(&pad(&format!("k{:02}", i)), &pad(&format!("v{:02}", i)))
            .unwrap();
    }

    let before = snapshot(&index);
    let mut out = Vec::new();
    index.display(&mut out, DisplayMode::Depth).unwrap();
    index.display(&mut out, DisplayMode::DepthDot).unwrap();
    index.display(&mut out, DisplayMode::SortedKeyVal).unwrap();
    assert_eq!(before, snapshot(&index));
}
