//! A binary-buddy allocator over a bitmap-encoded occupancy tree.
//!
//! [`BuddyAllocator`] owns one contiguous region of `REGION_SIZE` bytes and
//! an occupancy tree with one leaf per `MIN_BLOCK_SIZE` bytes. There are
//! no free lists: every question about availability is answered from the
//! tree's mark bits alone, which makes allocation O(log N) to O(N log N)
//! time in the number of leaves and O(N) bits of metadata.
//!
//! Two allocation strategies are provided over the same tree:
//!
//! - [`allocate_scan`] tries candidate blocks of the resolved size class in
//!   address order and returns the lowest-address free block.
//! - [`allocate_descent`] walks top-down from the root, pruning exhausted
//!   subtrees and preferring the less-occupied child at each split.
//!
//! Both find a free block of the requested size class exactly when one
//! exists; they differ only in which of several equally-sized candidates is
//! returned. A single [`free`] releases blocks produced by either strategy.
//!
//! [`allocate_scan`]: BuddyAllocator::allocate_scan
//! [`allocate_descent`]: BuddyAllocator::allocate_descent
//! [`free`]: BuddyAllocator::free

use core::{alloc::Layout, cmp, ptr::NonNull};

use sptr::Strict;

use crate::{tree::OccupancyTree, AllocError, AllocInitError, FreeError};

/// A handle to a live allocation.
///
/// The byte offset is the allocation's identity: it is the value accepted by
/// [`BuddyAllocator::free`]. The size records the block's size class (the
/// requested size rounded up), which the allocator itself does not remember.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Block {
    offset: usize,
    size: usize,
}

impl Block {
    /// The offset of the block from the start of the region, in bytes.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The size of the block in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

/// A read-only view of one occupancy tree node.
///
/// This is the sole interface needed by external consumers of the tree's
/// state, such as the Graphviz renderer in [`crate::dot`]; producing it does
/// not mutate the tree.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct NodeView {
    /// The node's index, in the 1-indexed implicit tree order.
    pub index: usize,
    /// The node's depth; the root is at depth 0.
    pub depth: u32,
    /// Byte offset of the covered range from the start of the region.
    pub offset: usize,
    /// Size in bytes of the covered range.
    pub block_size: usize,
    /// Whether any live allocation exists within the covered range.
    pub marked: bool,
    /// The children's marks, or `None` for minimum-size leaves.
    pub children: Option<(bool, bool)>,
}

/// A binary-buddy allocator backed by an occupancy bitmap.
///
/// This takes two const parameters:
/// - `REGION_SIZE` is the size in bytes of the managed region.
/// - `MIN_BLOCK_SIZE` is the size in bytes of the smallest allocatable block.
///
/// Both must be powers of two, with `MIN_BLOCK_SIZE <= REGION_SIZE`.
/// Constructors reject configurations that violate these invariants with
/// [`AllocInitError::InvalidConfig`].
///
/// For example, an allocator managing 1 MiB in units of 1 KiB:
///
/// ```
/// use bitbuddy::BuddyAllocator;
///
/// let mut buddy = BuddyAllocator::<{ 1 << 20 }, { 1 << 10 }>::new();
/// let block = buddy.allocate_scan(4096).unwrap();
/// assert_eq!(block.size(), 4096);
/// buddy.free(block.offset()).unwrap();
/// ```
#[derive(Debug)]
pub struct BuddyAllocator<const REGION_SIZE: usize, const MIN_BLOCK_SIZE: usize> {
    /// Pointer to the region managed by this allocator.
    base: NonNull<u8>,
    tree: OccupancyTree,
}

impl<const REGION_SIZE: usize, const MIN_BLOCK_SIZE: usize>
    BuddyAllocator<REGION_SIZE, MIN_BLOCK_SIZE>
{
    /// Constructs a new `BuddyAllocator` with the whole region free.
    ///
    /// # Errors
    ///
    /// Returns [`AllocInitError::InvalidConfig`] if either const parameter is
    /// not a power of two, if `MIN_BLOCK_SIZE` exceeds `REGION_SIZE`, or if
    /// the region layout is too large for the platform. Returns
    /// [`AllocInitError::AllocFailed`] if the backing allocation fails.
    pub fn try_new() -> Result<Self, AllocInitError> {
        if !REGION_SIZE.is_power_of_two()
            || !MIN_BLOCK_SIZE.is_power_of_two()
            || MIN_BLOCK_SIZE > REGION_SIZE
        {
            return Err(AllocInitError::InvalidConfig);
        }

        let layout = Layout::from_size_align(REGION_SIZE, MIN_BLOCK_SIZE)
            .map_err(|_| AllocInitError::InvalidConfig)?;

        let base = {
            // SAFETY: `layout` has nonzero size; REGION_SIZE is a power of two.
            let raw = unsafe { alloc::alloc::alloc(layout) };
            NonNull::new(raw).ok_or(AllocInitError::AllocFailed(layout))?
        };

        Ok(BuddyAllocator {
            base,
            tree: OccupancyTree::new(REGION_SIZE / MIN_BLOCK_SIZE),
        })
    }

    /// Constructs a new `BuddyAllocator`, panicking on failure.
    ///
    /// # Panics
    ///
    /// Panics if the const parameters are invalid; invokes
    /// [`handle_alloc_error`] if the backing allocation fails.
    ///
    /// [`handle_alloc_error`]: alloc::alloc::handle_alloc_error
    pub fn new() -> Self {
        match Self::try_new() {
            Ok(buddy) => buddy,
            Err(AllocInitError::AllocFailed(layout)) => alloc::alloc::handle_alloc_error(layout),
            Err(AllocInitError::InvalidConfig) => {
                panic!("buddy allocator sizes must be powers of two with MIN_BLOCK_SIZE <= REGION_SIZE")
            }
        }
    }

    /// Returns the layout of the region managed by an allocator of this type.
    ///
    /// # Panics
    ///
    /// Panics if the const parameters are invalid.
    pub fn region_layout() -> Layout {
        Layout::from_size_align(REGION_SIZE, MIN_BLOCK_SIZE).unwrap()
    }

    /// The size in bytes of the managed region.
    #[inline]
    pub const fn region_size(&self) -> usize {
        REGION_SIZE
    }

    /// The size in bytes of the smallest allocatable block.
    #[inline]
    pub const fn min_block_size(&self) -> usize {
        MIN_BLOCK_SIZE
    }

    /// The number of minimum-size blocks in the region.
    #[inline]
    pub fn leaf_count(&self) -> usize {
        self.tree.leaf_count()
    }

    /// Resolves a requested byte count to its size class.
    ///
    /// The size class is the smallest power of two that is at least
    /// `MIN_BLOCK_SIZE` and large enough to hold `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidSize`] for a zero-byte request and
    /// [`AllocError::RequestTooLarge`] if `size` exceeds the region size.
    pub fn size_class_for(size: usize) -> Result<usize, AllocError> {
        if size == 0 {
            return Err(AllocError::InvalidSize);
        }

        if size > REGION_SIZE {
            return Err(AllocError::RequestTooLarge);
        }

        Ok(cmp::max(size, MIN_BLOCK_SIZE).next_power_of_two())
    }

    /// Resolves a requested byte count to the tree depth of its size class.
    fn depth_for(size: usize) -> Result<u32, AllocError> {
        let class = Self::size_class_for(size)?;

        Ok((REGION_SIZE / class).ilog2())
    }

    /// Byte offset of the range covered by `node`.
    fn node_offset(node: usize) -> usize {
        let depth = OccupancyTree::depth_of(node);

        (node - (1 << depth)) * (REGION_SIZE >> depth)
    }

    /// Deepest-level node whose range starts at `offset`.
    fn leaf_for_offset(&self, offset: usize) -> usize {
        self.tree.leaf_count() + offset / MIN_BLOCK_SIZE
    }

    /// Marks the accepted node's branch and produces its handle.
    fn commit(&mut self, node: usize, depth: u32) -> Block {
        self.tree.mark_branch(node);

        Block {
            offset: Self::node_offset(node),
            size: REGION_SIZE >> depth,
        }
    }

    /// Allocates a block by scanning candidates in address order.
    ///
    /// Candidates of the resolved size class are tried left to right, so
    /// among several equally valid free blocks the lowest-address one is
    /// always chosen. Worst case this touches every candidate and every
    /// ancestor per candidate.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidSize`], [`AllocError::RequestTooLarge`],
    /// or [`AllocError::OutOfMemory`] when no free block of the needed size
    /// class exists.
    pub fn allocate_scan(&mut self, size: usize) -> Result<Block, AllocError> {
        let depth = Self::depth_for(size)?;
        let first = 1usize << depth;

        'candidates: for node in first..2 * first {
            if self.tree.is_marked(node) {
                continue;
            }

            // Walk the ancestor chain. The first marked ancestor decides:
            // node's own side of it is unmarked, so exactly one marked child
            // means the mark comes from the buddy subtree and the path down
            // to the candidate is free, while no marked child means the
            // ancestor is itself an allocated block.
            let mut a = OccupancyTree::parent(node);
            while a > 0 {
                if self.tree.is_marked(a) {
                    let (l, r) = OccupancyTree::children(a);
                    if self.tree.is_marked(l) != self.tree.is_marked(r) {
                        return Ok(self.commit(node, depth));
                    }

                    continue 'candidates;
                }

                a = OccupancyTree::parent(a);
            }

            // No marked ancestor at all; the root mark is the final
            // consistency check before accepting.
            if !self.tree.is_marked(1) {
                return Ok(self.commit(node, depth));
            }
        }

        Err(AllocError::OutOfMemory)
    }

    /// Allocates a block by recursive descent from the root.
    ///
    /// Succeeds and fails in exactly the states [`allocate_scan`] does, but
    /// in O(log N) by pruning exhausted subtrees. At each split the
    /// less-occupied child is visited first, biasing discovery toward
    /// emptier branches; with both children equally occupied this matches
    /// the scan's left-to-right order.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidSize`], [`AllocError::RequestTooLarge`],
    /// or [`AllocError::OutOfMemory`] when no free block of the needed size
    /// class exists.
    ///
    /// [`allocate_scan`]: Self::allocate_scan
    pub fn allocate_descent(&mut self, size: usize) -> Result<Block, AllocError> {
        let depth = Self::depth_for(size)?;
        let class = REGION_SIZE >> depth;

        let node = self
            .descend(1, REGION_SIZE, class)
            .ok_or(AllocError::OutOfMemory)?;

        Ok(self.commit(node, depth))
    }

    /// Searches the subtree at `node` for a free block of size `class`.
    fn descend(&self, node: usize, node_size: usize, class: usize) -> Option<usize> {
        if !self.tree.is_marked(node) && node_size == class {
            return Some(node);
        }

        if node_size <= MIN_BLOCK_SIZE {
            // A minimum-size block that didn't match cannot be subdivided.
            return None;
        }

        let (l, r) = OccupancyTree::children(node);
        let (l_marked, r_marked) = (self.tree.is_marked(l), self.tree.is_marked(r));

        if self.tree.is_marked(node) && !l_marked && !r_marked {
            // Marked with no marked child: this whole block is one live
            // allocation, so nothing below it is available.
            return None;
        }

        let (near, far) = if l_marked <= r_marked { (l, r) } else { (r, l) };

        self.descend(near, node_size / 2, class)
            .or_else(|| self.descend(far, node_size / 2, class))
    }

    /// Frees the allocation that starts at `offset`.
    ///
    /// The allocation's size is rediscovered from the tree: a marked
    /// minimum-size leaf is cleared directly, otherwise the upward walk
    /// clears the nearest marked ancestor with no marked children. In both
    /// cases the walk then coalesces freed buddies as far up as possible,
    /// stopping at the first ancestor pinned by a sibling allocation.
    ///
    /// Because no size is stored out-of-band, the caller must pass back
    /// exactly an offset previously returned by an allocation; freeing an
    /// aligned address in the interior of a live block is indistinguishable
    /// from freeing that block.
    ///
    /// # Errors
    ///
    /// Returns [`FreeError::OutOfRange`] if `offset` lies outside the region
    /// and [`FreeError::Misaligned`] if it is not a multiple of
    /// `MIN_BLOCK_SIZE`. On error the tree is left untouched.
    pub fn free(&mut self, offset: usize) -> Result<(), FreeError> {
        if offset >= REGION_SIZE {
            return Err(FreeError::OutOfRange);
        }

        if offset % MIN_BLOCK_SIZE != 0 {
            return Err(FreeError::Misaligned);
        }

        let leaf = self.leaf_for_offset(offset);

        if self.tree.is_marked(leaf) {
            // A minimum-size allocation.
            self.tree.clear(leaf);
        }

        // Walk toward the root: clear the allocated block if the leaf wasn't
        // it, then keep clearing ancestors whose subtrees have emptied. An
        // ancestor with a marked child still covers a sibling allocation and
        // stops the walk.
        let mut a = OccupancyTree::parent(leaf);
        while a > 0 {
            if self.tree.is_marked(a) {
                let (l, r) = OccupancyTree::children(a);
                if self.tree.is_marked(l) || self.tree.is_marked(r) {
                    break;
                }

                self.tree.clear(a);
            }

            a = OccupancyTree::parent(a);
        }

        Ok(())
    }

    /// Returns a read-only view of the indexed tree node, or `None` if
    /// `index` is not a valid node.
    pub fn node(&self, index: usize) -> Option<NodeView> {
        if !self.tree.contains(index) {
            return None;
        }

        let depth = OccupancyTree::depth_of(index);

        let children = (!self.tree.is_leaf(index)).then(|| {
            let (l, r) = OccupancyTree::children(index);
            (self.tree.is_marked(l), self.tree.is_marked(r))
        });

        Some(NodeView {
            index,
            depth,
            offset: Self::node_offset(index),
            block_size: REGION_SIZE >> depth,
            marked: self.tree.is_marked(index),
            children,
        })
    }

    /// Returns a pointer to the first byte of `block`'s range.
    ///
    /// The pointer inherits the provenance of the region base pointer and is
    /// valid for `block.size()` bytes while the block remains allocated.
    pub fn block_ptr(&self, block: Block) -> NonNull<u8> {
        assert!(block.offset < REGION_SIZE);
        assert!(block.size <= REGION_SIZE - block.offset);

        let raw = Strict::map_addr(self.base.as_ptr(), |addr| {
            addr.checked_add(block.offset).unwrap()
        });

        // SAFETY: `base` is non-null and `offset` is within the region, so
        // the computed address cannot wrap to zero.
        unsafe { NonNull::new_unchecked(raw) }
    }

    #[cfg(test)]
    pub(crate) fn tree(&self) -> &OccupancyTree {
        &self.tree
    }
}

impl<const REGION_SIZE: usize, const MIN_BLOCK_SIZE: usize> Drop
    for BuddyAllocator<REGION_SIZE, MIN_BLOCK_SIZE>
{
    fn drop(&mut self) {
        // SAFETY: `base` was allocated in `try_new` with this layout.
        unsafe { alloc::alloc::dealloc(self.base.as_ptr(), Self::region_layout()) };
    }
}

impl<const REGION_SIZE: usize, const MIN_BLOCK_SIZE: usize> Clone
    for BuddyAllocator<REGION_SIZE, MIN_BLOCK_SIZE>
{
    /// Clones the occupancy state into a freshly allocated region.
    ///
    /// The clone answers every allocation and free exactly as the original
    /// would, but the contents of its region are uninitialized.
    fn clone(&self) -> Self {
        let layout = Self::region_layout();

        let base = {
            // SAFETY: `layout` has nonzero size.
            let raw = unsafe { alloc::alloc::alloc(layout) };
            NonNull::new(raw).unwrap_or_else(|| alloc::alloc::handle_alloc_error(layout))
        };

        BuddyAllocator {
            base,
            tree: self.tree.clone(),
        }
    }
}

impl<const REGION_SIZE: usize, const MIN_BLOCK_SIZE: usize> Default
    for BuddyAllocator<REGION_SIZE, MIN_BLOCK_SIZE>
{
    fn default() -> Self {
        Self::new()
    }
}
