//! A fixed-size binary-buddy allocator encoded as a bitmap tree.
//!
//! [`BuddyAllocator`] partitions one contiguous region of raw storage into
//! power-of-two blocks and serves allocation and free requests against it
//! without consulting a general-purpose allocator on the hot path. In place
//! of free lists, a complete binary tree of occupancy bits answers "is this
//! block, or some ancestor or descendant of it, available?" in O(log N) to
//! O(N log N) time using O(N) bits of metadata.
//!
//! Allocations are identified by their byte offset into the region. The
//! allocator stores no out-of-band size information: `free` rediscovers the
//! freed block's size from the tree itself and coalesces buddies as far
//! upward as possible.
//!
//! ```
//! use bitbuddy::BuddyAllocator;
//!
//! // 64 KiB managed in 256-byte units.
//! let mut buddy = BuddyAllocator::<{ 64 * 1024 }, 256>::new();
//!
//! let a = buddy.allocate_scan(1000).unwrap();
//! assert_eq!(a.size(), 1024);
//!
//! let b = buddy.allocate_descent(300).unwrap();
//! assert_eq!(b.size(), 512);
//!
//! buddy.free(b.offset()).unwrap();
//! buddy.free(a.offset()).unwrap();
//! ```
//!
//! The allocator is a single-threaded structure: operations require `&mut
//! self`, and sharing one instance across threads needs external mutual
//! exclusion.

#![doc(html_root_url = "https://docs.rs/bitbuddy/0.1.0")]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]
#![no_std]
// This is necessary to allow `sptr` to shadow methods provided by newer
// standard libraries.
#![allow(unstable_name_collisions)]

extern crate alloc;

mod bitmap;
pub mod buddy;
pub mod dot;
mod tree;

#[cfg(test)]
mod tests;

use core::alloc::Layout;

pub use crate::buddy::{Block, BuddyAllocator, NodeView};

/// The error type for allocator constructors.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AllocInitError {
    /// The allocation of the managed region failed.
    ///
    /// The variant contains the [`Layout`] that could not be allocated.
    AllocFailed(Layout),

    /// The configuration of the allocator is invalid.
    ///
    /// This variant is returned when the region size or minimum block size
    /// is not a power of two, or when the minimum block size exceeds the
    /// region size.
    InvalidConfig,
}

/// The error type for allocation requests.
///
/// All variants are recoverable: a failed allocation leaves the occupancy
/// tree untouched and the allocator remains usable.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AllocError {
    /// A zero-byte allocation was requested.
    InvalidSize,

    /// The requested size exceeds the region size.
    RequestTooLarge,

    /// No free block of the needed size class currently exists.
    OutOfMemory,
}

/// The error type for free requests.
///
/// An invalid free is a no-op: the occupancy tree is left bit-for-bit
/// unchanged.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FreeError {
    /// The offset lies outside the managed region.
    OutOfRange,

    /// The offset is not aligned to the minimum block size.
    Misaligned,
}
