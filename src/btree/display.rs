//! Debug rendering of the on-disk tree.
//!
//! Three projections of the same depth-first traversal:
//!
//! - `Depth`: one node per line, indented by depth
//! - `DepthDot`: the traversal as a GraphViz digraph with explicit edges
//! - `SortedKeyVal`: leaf entries only, `(key,value)` per line in key order
//!
//! The traversal is read-only. A block whose kind the renderer does not
//! recognize produces a marked line and is not descended into; rendering a
//! damaged tree should show the damage, not abort on it.

use std::io::Write;

use eyre::Result;

use crate::cache::BlockCache;
use crate::config::MAX_DEPTH;
use crate::error::TreeError;

use super::node::{Node, NodeKind};
use super::tree::BTreeIndex;

/// Output shape for [`BTreeIndex::display`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// Indented textual traversal, one node per line.
    Depth,
    /// The traversal wrapped in a GraphViz `digraph` with edges.
    DepthDot,
    /// Leaf-only projection: `(key,value)` lines in ascending key order.
    SortedKeyVal,
}

impl<C: BlockCache> BTreeIndex<C> {
    /// Renders the tree into `out` in the requested mode.
    pub fn display(&self, out: &mut dyn Write, mode: DisplayMode) -> Result<()> {
        if mode == DisplayMode::DepthDot {
            writeln!(out, "digraph tree {{")?;
        }
        self.display_node(out, mode, self.superblock.root_block(), 0)?;
        if mode == DisplayMode::DepthDot {
            writeln!(out, "}}")?;
        }
        Ok(())
    }

    fn display_node(
        &self,
        out: &mut dyn Write,
        mode: DisplayMode,
        block: u32,
        depth: usize,
    ) -> Result<()> {
        if depth >= MAX_DEPTH {
            return Err(TreeError::insane("traversal exceeded the maximum tree depth"));
        }

        let node = Node::read_from(&self.cache, block)?;
        match node.kind() {
            NodeKind::Root | NodeKind::Interior => {
                let summary = interior_summary(&node)?;
                match mode {
                    DisplayMode::Depth => {
                        writeln!(out, "{:indent$}{}: {}", "", block, summary, indent = depth * 2)?
                    }
                    DisplayMode::DepthDot => {
                        writeln!(out, "{} [ label=\"{}: {}\" ];", block, block, summary)?
                    }
                    DisplayMode::SortedKeyVal => {}
                }

                if node.num_keys() > 0 {
                    for i in 0..=node.num_keys() {
                        let child = node.ptr_at(i)?;
                        if mode == DisplayMode::DepthDot {
                            writeln!(out, "{} -> {};", block, child)?;
                        }
                        self.display_node(out, mode, child, depth + 1)?;
                    }
                }
            }
            NodeKind::Leaf => match mode {
                DisplayMode::Depth => writeln!(
                    out,
                    "{:indent$}{}: {}",
                    "",
                    block,
                    leaf_summary(&node)?,
                    indent = depth * 2
                )?,
                DisplayMode::DepthDot => {
                    writeln!(out, "{} [ label=\"{}: {}\" ];", block, block, leaf_summary(&node)?)?
                }
                DisplayMode::SortedKeyVal => {
                    for i in 0..node.num_keys() {
                        writeln!(
                            out,
                            "({},{})",
                            render_bytes(node.key_at(i)?),
                            render_bytes(node.val_at(i)?)
                        )?;
                    }
                }
            },
            _ => {
                let line = format!("{}: unknown node kind 0x{:02x}", block, node.kind_byte());
                match mode {
                    DisplayMode::Depth => {
                        writeln!(out, "{:indent$}{}", "", line, indent = depth * 2)?
                    }
                    DisplayMode::DepthDot => {
                        writeln!(out, "{} [ label=\"{}\" ];", block, line)?
                    }
                    DisplayMode::SortedKeyVal => writeln!(out, "{}", line)?,
                }
            }
        }
        Ok(())
    }
}

fn interior_summary(node: &Node) -> Result<String> {
    let mut out = String::from("Interior:");
    for i in 0..node.num_keys() {
        out.push_str(&format!(" *{}", node.ptr_at(i)?));
        out.push_str(&format!(" {}", render_bytes(node.key_at(i)?)));
    }
    if node.num_keys() > 0 {
        out.push_str(&format!(" *{}", node.ptr_at(node.num_keys())?));
    }
    Ok(out)
}

fn leaf_summary(node: &Node) -> Result<String> {
    let mut out = format!("Leaf: @{}", node.link()?);
    for i in 0..node.num_keys() {
        out.push_str(&format!(
            " ({},{})",
            render_bytes(node.key_at(i)?),
            render_bytes(node.val_at(i)?)
        ));
    }
    Ok(out)
}

/// Fixed-width slots are NUL-padded; trailing padding is dropped and
/// anything unprintable is hex-escaped so lines stay one line.
fn render_bytes(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |last| last + 1);
    let mut out = String::with_capacity(end);
    for &b in &bytes[..end] {
        if (0x20..0x7f).contains(&b) && b != b'"' && b != b'\\' {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{:02x}", b));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn populated_index(keys: usize) -> BTreeIndex<MemoryCache> {
        let cache = MemoryCache::new(256, 64).unwrap();
        let mut index = BTreeIndex::create(cache, 8, 8).unwrap();
        for i in 0..keys {
            let key = format!("k{:07}", i);
            let val = format!("v{:07}", i);
            index.insert(key.as_bytes(), val.as_bytes()).unwrap();
        }
        index
    }

    fn render(index: &BTreeIndex<MemoryCache>, mode: DisplayMode) -> String {
        let mut out = Vec::new();
        index.display(&mut out, mode).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn depth_mode_lists_every_node_kind() {
        let index = populated_index(40);
        let text = render(&index, DisplayMode::Depth);

        assert!(text.contains("Interior:"));
        assert!(text.contains("Leaf:"));
        assert!(text.contains("(k0000001,v0000001)"));
    }

    #[test]
    fn dot_mode_wraps_a_digraph_with_edges() {
        let index = populated_index(40);
        let text = render(&index, DisplayMode::DepthDot);

        assert!(text.starts_with("digraph tree {\n"));
        assert!(text.ends_with("}\n"));
        assert!(text.contains("->"));
        assert!(text.contains("label="));
    }

    #[test]
    fn sorted_mode_emits_keys_in_order() {
        let index = populated_index(40);
        let text = render(&index, DisplayMode::SortedKeyVal);

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 40);
        let mut sorted = lines.clone();
        sorted.sort();
        assert_eq!(lines, sorted);
        assert_eq!(lines[0], "(k0000000,v0000000)");
    }

    #[test]
    fn empty_tree_renders_without_children() {
        let cache = MemoryCache::new(256, 8).unwrap();
        let index = BTreeIndex::create(cache, 8, 8).unwrap();

        let text = render(&index, DisplayMode::Depth);
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("Interior:"));

        assert_eq!(render(&index, DisplayMode::SortedKeyVal), "");
    }

    #[test]
    fn unknown_kind_renders_a_marked_line() {
        let mut index = populated_index(3);

        // Scribble over a child leaf's kind byte behind the tree's back.
        let root = Node::read_from(index.cache(), index.root_block()).unwrap();
        let victim = root.ptr_at(0).unwrap();
        let mut raw = vec![0u8; 256];
        index.cache().read_block(victim, &mut raw).unwrap();
        raw[0] = 0x7E;
        index.cache.write_block(victim, &raw).unwrap();

        let text = render(&index, DisplayMode::Depth);
        assert!(text.contains("unknown node kind 0x7e"));
    }
}
