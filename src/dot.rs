//! Graphviz rendering of the occupancy tree.
//!
//! This is a debugging aid layered entirely on the read-only
//! [`BuddyAllocator::node`] interface; it never mutates the tree. Subtrees
//! with no marks are collapsed into their root, so the output stays small
//! even for large regions.
//!
//! [`BuddyAllocator::node`]: crate::BuddyAllocator::node

use alloc::string::String;
use core::fmt::Write;

use crate::buddy::{BuddyAllocator, NodeView};

/// Renders the allocator's occupancy tree as a Graphviz `digraph`.
///
/// Each emitted node is labeled with its block size in bytes and filled grey
/// when marked. Children are emitted only under nodes with at least one
/// marked child, mirroring the shape of the live allocations.
pub fn render<const REGION_SIZE: usize, const MIN_BLOCK_SIZE: usize>(
    buddy: &BuddyAllocator<REGION_SIZE, MIN_BLOCK_SIZE>,
) -> String {
    let mut out = String::new();

    out.push_str("digraph occupancy {\n");
    out.push_str("graph [fontname = \"Bitstream Vera Sans\"];\n");
    out.push_str("node [fontname = \"Bitstream Vera Sans\"];\n");
    out.push_str("edge [fontname = \"Bitstream Vera Sans\"];\n");

    if let Some(root) = buddy.node(1) {
        emit_node(&mut out, &root);
        visit(buddy, &mut out, &root);
    }

    out.push_str("}\n");

    out
}

fn emit_node(out: &mut String, view: &NodeView) {
    let fill = if view.marked { "grey" } else { "white" };

    let _ = writeln!(
        out,
        "n{} [label=\"{}\",style=filled,fillcolor={}];",
        view.index, view.block_size, fill
    );
}

fn visit<const REGION_SIZE: usize, const MIN_BLOCK_SIZE: usize>(
    buddy: &BuddyAllocator<REGION_SIZE, MIN_BLOCK_SIZE>,
    out: &mut String,
    view: &NodeView,
) {
    let Some((l_marked, r_marked)) = view.children else {
        return;
    };

    if !l_marked && !r_marked {
        return;
    }

    let l = buddy.node(2 * view.index).unwrap();
    let r = buddy.node(2 * view.index + 1).unwrap();

    emit_node(out, &l);
    emit_node(out, &r);

    let _ = writeln!(out, "n{} -> n{};", view.index, l.index);
    let _ = writeln!(out, "n{} -> n{};", view.index, r.index);

    visit(buddy, out, &l);
    visit(buddy, out, &r);
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    #[test]
    fn empty_tree_renders_root_only() {
        let buddy = BuddyAllocator::<1024, 16>::new();
        let dot = render(&buddy);

        assert!(dot.starts_with("digraph occupancy {"));
        assert!(dot.contains("n1 [label=\"1024\",style=filled,fillcolor=white];"));
        assert!(!dot.contains("->"));
        assert!(dot.ends_with("}\n"));
    }

    #[test]
    fn marked_branch_is_expanded() {
        let mut buddy = BuddyAllocator::<1024, 16>::new();
        buddy.allocate_scan(256).unwrap();

        let dot = render(&buddy);

        assert!(dot.contains("n1 [label=\"1024\",style=filled,fillcolor=grey];"));
        assert!(dot.contains("n4 [label=\"256\",style=filled,fillcolor=grey];"));
        assert!(dot.contains("n5 [label=\"256\",style=filled,fillcolor=white];"));
        assert!(dot.contains("n1 -> n2;"));

        // The free half of the region stays collapsed.
        assert!(!dot.contains("n6 "));
    }
}
