#![cfg(test)]
extern crate std;

use core::{ptr, slice};
use std::prelude::rust_2021::*;

use quickcheck::{Arbitrary, Gen, QuickCheck};

use crate::{AllocError, Block, BuddyAllocator, FreeError};

// This config produces an allocator over 65536 bytes with block sizes from
// 16 to 65536.
type TestBuddy = BuddyAllocator<65536, 16>;

const TEST_REGION_SIZE: usize = 65536;

// The configuration of the fragmentation walkthrough in the `fragmentation`
// example: 1 MiB managed in 1 KiB units.
type DemoBuddy = BuddyAllocator<{ 1 << 20 }, { 1 << 10 }>;

const KIB: usize = 1024;

// Miri is substantially slower to run property tests, so the number of test
// cases is reduced to keep the runtime in check.

#[cfg(not(miri))]
const MAX_TESTS: u64 = 100;

#[cfg(miri)]
const MAX_TESTS: u64 = 20;

#[derive(Copy, Clone, Debug)]
enum Strategy {
    Scan,
    Descent,
}

impl Arbitrary for Strategy {
    fn arbitrary(g: &mut Gen) -> Self {
        *g.choose(&[Strategy::Scan, Strategy::Descent]).unwrap()
    }
}

fn allocate<const R: usize, const M: usize>(
    buddy: &mut BuddyAllocator<R, M>,
    strategy: Strategy,
    size: usize,
) -> Result<Block, AllocError> {
    match strategy {
        Strategy::Scan => buddy.allocate_scan(size),
        Strategy::Descent => buddy.allocate_descent(size),
    }
}

enum AllocatorOpTag {
    Allocate,
    Free,
}

#[derive(Clone, Debug)]
enum AllocatorOp {
    /// Allocate a block of `size` bytes.
    Allocate { size: usize },
    /// Free an existing allocation.
    ///
    /// Given `n` outstanding allocations, the allocation to free is at index
    /// `index % n`.
    Free { index: usize },
}

/// Limit on allocation size, expressed in bits.
const ALLOC_LIMIT_BITS: u8 = 16;

impl Arbitrary for AllocatorOp {
    fn arbitrary(g: &mut Gen) -> Self {
        match g
            .choose(&[AllocatorOpTag::Allocate, AllocatorOpTag::Free])
            .unwrap()
        {
            AllocatorOpTag::Allocate => AllocatorOp::Allocate {
                size: {
                    // Try to distribute allocations evenly between powers of two.
                    let exp = u8::arbitrary(g) % (ALLOC_LIMIT_BITS + 1);
                    usize::arbitrary(g) % 2_usize.pow(exp.into())
                },
            },
            AllocatorOpTag::Free => AllocatorOp::Free {
                index: usize::arbitrary(g),
            },
        }
    }
}

/// Applies `ops` to `buddy`, returning the outstanding allocations.
fn apply_ops(buddy: &mut TestBuddy, strategy: Strategy, ops: Vec<AllocatorOp>) -> Vec<Block> {
    let mut live = Vec::new();

    for op in ops {
        match op {
            AllocatorOp::Allocate { size } => {
                if let Ok(block) = allocate(buddy, strategy, size) {
                    live.push(block);
                }
            }

            AllocatorOp::Free { index } => {
                if live.is_empty() {
                    continue;
                }

                let block = live.swap_remove(index % live.len());
                buddy.free(block.offset()).unwrap();
            }
        }
    }

    live
}

struct Allocation {
    id: u8,
    block: Block,
}

#[test]
fn allocations_are_mutually_exclusive() {
    fn prop(strategy: Strategy, ops: Vec<AllocatorOp>) -> bool {
        let mut buddy = TestBuddy::new();
        let mut allocations: Vec<Allocation> = Vec::with_capacity(ops.len());

        for (id, op) in ops.into_iter().enumerate() {
            match op {
                AllocatorOp::Allocate { size } => {
                    let block = match allocate(&mut buddy, strategy, size) {
                        Ok(b) => b,
                        Err(_) => continue,
                    };

                    // The block is the resolved size class, aligned to its
                    // own size, and contained in the region.
                    if block.size() != TestBuddy::size_class_for(size).unwrap() {
                        return false;
                    }
                    if block.offset() % block.size() != 0 {
                        return false;
                    }
                    if block.offset() + block.size() > TEST_REGION_SIZE {
                        return false;
                    }

                    // The block overlaps no outstanding allocation.
                    for a in &allocations {
                        let disjoint = block.offset() + block.size() <= a.block.offset()
                            || a.block.offset() + a.block.size() <= block.offset();
                        if !disjoint {
                            return false;
                        }
                    }

                    let id = id as u8;
                    unsafe {
                        ptr::write_bytes(buddy.block_ptr(block).as_ptr(), id, block.size())
                    };

                    allocations.push(Allocation { id, block });
                }

                AllocatorOp::Free { index } => {
                    if allocations.is_empty() {
                        continue;
                    }

                    let a = allocations.swap_remove(index % allocations.len());

                    let contents = unsafe {
                        slice::from_raw_parts(buddy.block_ptr(a.block).as_ptr(), a.block.size())
                    };
                    if contents.iter().any(|&byte| byte != a.id) {
                        return false;
                    }

                    buddy.free(a.block.offset()).unwrap();
                }
            }
        }

        // Free any outstanding allocations.
        for a in allocations.drain(..) {
            buddy.free(a.block.offset()).unwrap();
        }

        buddy.tree().all_clear()
    }

    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(prop as fn(_, _) -> bool);
}

#[test]
fn size_class_is_monotonic() {
    fn prop(a: usize, b: usize) -> bool {
        let a = a % TEST_REGION_SIZE + 1;
        let b = b % TEST_REGION_SIZE + 1;
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };

        TestBuddy::size_class_for(lo).unwrap() <= TestBuddy::size_class_for(hi).unwrap()
    }

    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(prop as fn(_, _) -> bool);
}

#[test]
fn allocate_free_round_trip_restores_tree() {
    fn prop(strategy: Strategy, prep: Vec<AllocatorOp>, size: usize) -> bool {
        let mut buddy = TestBuddy::new();
        let _live = apply_ops(&mut buddy, strategy, prep);

        let snapshot = buddy.tree().clone();

        // Oversized requests exercise the error paths.
        match allocate(&mut buddy, strategy, size % (2 * TEST_REGION_SIZE)) {
            Ok(block) => buddy.free(block.offset()).unwrap(),
            Err(_) => (),
        }

        *buddy.tree() == snapshot
    }

    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(prop as fn(_, _, _) -> bool);
}

#[test]
fn strategies_are_equivalent() {
    fn prop(prep: Vec<AllocatorOp>, size: usize) -> bool {
        let mut buddy = TestBuddy::new();
        let _live = apply_ops(&mut buddy, Strategy::Scan, prep);

        let size = size % (2 * TEST_REGION_SIZE);

        let mut by_scan = buddy.clone();
        let mut by_descent = buddy.clone();

        // On the same occupancy tree, the two strategies fail alike or
        // succeed with the same size class; only addresses may differ.
        match (by_scan.allocate_scan(size), by_descent.allocate_descent(size)) {
            (Ok(a), Ok(b)) => a.size() == b.size(),
            (Err(a), Err(b)) => a == b,
            _ => false,
        }
    }

    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(prop as fn(_, _) -> bool);
}

#[test]
fn whole_region_exhaustion() {
    let mut buddy = TestBuddy::new();

    let whole = buddy.allocate_scan(TEST_REGION_SIZE).unwrap();
    assert_eq!(whole.offset(), 0);
    assert_eq!(whole.size(), TEST_REGION_SIZE);

    assert_eq!(
        buddy.allocate_scan(TEST_REGION_SIZE),
        Err(AllocError::OutOfMemory)
    );
    assert_eq!(buddy.allocate_descent(16), Err(AllocError::OutOfMemory));

    buddy.free(whole.offset()).unwrap();
    assert!(buddy.tree().all_clear());
}

#[test]
fn freed_buddies_coalesce() {
    for free_first_first in [true, false] {
        let mut buddy = TestBuddy::new();

        let first = buddy.allocate_scan(16).unwrap();
        let second = buddy.allocate_scan(16).unwrap();
        assert_eq!(first.offset(), 0);
        assert_eq!(second.offset(), 16);

        let (x, y) = if free_first_first {
            (first, second)
        } else {
            (second, first)
        };

        buddy.free(x.offset()).unwrap();
        buddy.free(y.offset()).unwrap();

        assert!(buddy.tree().all_clear());

        // The coalesced region can back a whole-region allocation again.
        let whole = buddy.allocate_scan(TEST_REGION_SIZE).unwrap();
        assert_eq!(whole.offset(), 0);
    }
}

#[test]
fn fragmentation_then_recovery_scan() {
    let mut buddy = DemoBuddy::new();

    // Each request rounds up to the next power of two.
    let a = buddy.allocate_scan(100 * KIB).unwrap();
    assert_eq!((a.offset(), a.size()), (0, 128 * KIB));

    let b = buddy.allocate_scan(240 * KIB).unwrap();
    assert_eq!((b.offset(), b.size()), (256 * KIB, 256 * KIB));

    let c = buddy.allocate_scan(64 * KIB).unwrap();
    assert_eq!((c.offset(), c.size()), (128 * KIB, 64 * KIB));

    let d = buddy.allocate_scan(256 * KIB).unwrap();
    assert_eq!((d.offset(), d.size()), (512 * KIB, 256 * KIB));

    buddy.free(b.offset()).unwrap();
    buddy.free(a.offset()).unwrap();

    // The new request must reuse the freed space below `c`.
    let e = buddy.allocate_scan(75 * KIB).unwrap();
    assert_eq!((e.offset(), e.size()), (0, 128 * KIB));

    buddy.free(c.offset()).unwrap();
    buddy.free(e.offset()).unwrap();
    buddy.free(d.offset()).unwrap();

    assert!(buddy.tree().all_clear());
}

#[test]
fn fragmentation_then_recovery_descent() {
    let mut buddy = DemoBuddy::new();

    let a = buddy.allocate_descent(100 * KIB).unwrap();
    let b = buddy.allocate_descent(240 * KIB).unwrap();
    let c = buddy.allocate_descent(64 * KIB).unwrap();
    let d = buddy.allocate_descent(256 * KIB).unwrap();

    assert_eq!(a.size(), 128 * KIB);
    assert_eq!(b.size(), 256 * KIB);
    assert_eq!(c.size(), 64 * KIB);
    assert_eq!(d.size(), 256 * KIB);

    buddy.free(b.offset()).unwrap();
    buddy.free(a.offset()).unwrap();

    let e = buddy.allocate_descent(75 * KIB).unwrap();
    assert_eq!(e.size(), 128 * KIB);

    buddy.free(c.offset()).unwrap();
    buddy.free(e.offset()).unwrap();
    buddy.free(d.offset()).unwrap();

    assert!(buddy.tree().all_clear());
}

#[test]
fn invalid_frees_leave_tree_unchanged() {
    let mut buddy = TestBuddy::new();

    buddy.allocate_scan(100).unwrap();
    buddy.allocate_descent(1000).unwrap();

    let snapshot = buddy.tree().clone();

    assert_eq!(buddy.free(TEST_REGION_SIZE), Err(FreeError::OutOfRange));
    assert_eq!(buddy.free(usize::MAX), Err(FreeError::OutOfRange));
    assert_eq!(buddy.free(17), Err(FreeError::Misaligned));
    assert_eq!(buddy.free(TEST_REGION_SIZE - 1), Err(FreeError::Misaligned));

    assert_eq!(*buddy.tree(), snapshot);
}

#[test]
fn free_of_free_address_is_a_noop() {
    let mut buddy = TestBuddy::new();

    let block = buddy.allocate_scan(64).unwrap();

    // An aligned address with no allocation under it reports success but
    // changes nothing; the allocator cannot distinguish it from a
    // legitimate free without out-of-band size metadata.
    let snapshot = buddy.tree().clone();
    buddy.free(TEST_REGION_SIZE - 16).unwrap();
    assert_eq!(*buddy.tree(), snapshot);

    buddy.free(block.offset()).unwrap();
    assert!(buddy.tree().all_clear());
}

// Version sync ================================================================
#[test]
fn html_root_url() {
    version_sync::assert_html_root_url_updated!("src/lib.rs");
}
