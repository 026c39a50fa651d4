//! The implicit occupancy tree.
//!
//! A complete binary tree over the managed region, stored as one mark bit per
//! node in a packed [`Bitmap`]. Nodes are 1-indexed: node 1 is the root and
//! covers the whole region, node `n`'s children are `2n` and `2n + 1`, and
//! the deepest level holds one node per minimum-size block. Bit 0 is unused.
//!
//! A node's mark is set if and only if at least one live allocation exists
//! within the byte range the node covers. An internal node is therefore
//! marked only while at least one descendant leaf range is occupied; clearing
//! the last occupied descendant clears the node as well (the callers in
//! `buddy` maintain this by always marking and coalescing along whole
//! root-to-node branches).

use crate::bitmap::Bitmap;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct OccupancyTree {
    leaf_count: usize,
    marks: Bitmap,
}

impl OccupancyTree {
    /// Constructs a fully unmarked tree with `leaf_count` leaves.
    pub fn new(leaf_count: usize) -> OccupancyTree {
        assert!(leaf_count.is_power_of_two());

        OccupancyTree {
            leaf_count,
            // One bit per node, plus the unused bit 0.
            marks: Bitmap::new(2 * leaf_count),
        }
    }

    #[inline]
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Returns `true` if `node` is a valid node index for this tree.
    #[inline]
    pub fn contains(&self, node: usize) -> bool {
        (1..2 * self.leaf_count).contains(&node)
    }

    /// Returns `true` if `node` is at the deepest level.
    #[inline]
    pub fn is_leaf(&self, node: usize) -> bool {
        assert!(self.contains(node));

        node >= self.leaf_count
    }

    /// Returns the depth of `node`, with the root at depth 0.
    #[inline]
    pub const fn depth_of(node: usize) -> u32 {
        node.ilog2()
    }

    #[inline]
    pub const fn parent(node: usize) -> usize {
        node >> 1
    }

    #[inline]
    pub const fn children(node: usize) -> (usize, usize) {
        (2 * node, 2 * node + 1)
    }

    /// Returns the mark of `node`.
    #[inline]
    pub fn is_marked(&self, node: usize) -> bool {
        assert!(self.contains(node));

        self.marks.test(node)
    }

    /// Marks `node` and every ancestor up to the root.
    ///
    /// Marking an already-marked ancestor is a no-op, so this is safe to call
    /// on any branch regardless of surrounding occupancy.
    pub fn mark_branch(&mut self, node: usize) {
        assert!(self.contains(node));

        let mut n = node;
        while n > 0 {
            self.marks.set(n);
            n = Self::parent(n);
        }
    }

    /// Clears the mark of `node` alone.
    ///
    /// Ancestors are not touched; coalescing decisions belong to the caller,
    /// which knows whether a sibling allocation still pins them.
    #[inline]
    pub fn clear(&mut self, node: usize) {
        assert!(self.contains(node));

        self.marks.clear(node);
    }

    /// Returns `true` if no node is marked, i.e. the whole region is free.
    pub fn all_clear(&self) -> bool {
        self.marks.all_clear()
    }
}
