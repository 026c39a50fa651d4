//! A scripted fragmentation-then-recovery walkthrough.
//!
//! Issues a fixed sequence of allocate and free calls against a 1 MiB region
//! managed in 1 KiB units, writing one Graphviz snapshot of the occupancy
//! tree per step (`balloc_0000.dot`, `balloc_0001.dot`, ...). Render the
//! snapshots with e.g. `dot -Tpng -O balloc_*.dot`.

use bitbuddy::{dot, Block, BuddyAllocator};

type Demo = BuddyAllocator<{ 1 << 20 }, { 1 << 10 }>;

fn snapshot(buddy: &Demo, step: &mut usize) -> std::io::Result<()> {
    let path = format!("balloc_{step:04}.dot");
    std::fs::write(path, dot::render(buddy))?;
    *step += 1;
    Ok(())
}

fn report(name: char, requested_kib: usize, block: Block) {
    println!(
        "{name}: {requested_kib:>3} KiB -> offset {:>7}, rounded to {} KiB",
        block.offset(),
        block.size() / 1024,
    );
}

fn main() -> std::io::Result<()> {
    let mut buddy = Demo::new();
    let mut step = 0;

    snapshot(&buddy, &mut step)?;

    let a = buddy.allocate_scan(100 * 1024).unwrap();
    report('a', 100, a);
    snapshot(&buddy, &mut step)?;

    let b = buddy.allocate_scan(240 * 1024).unwrap();
    report('b', 240, b);
    snapshot(&buddy, &mut step)?;

    let c = buddy.allocate_scan(64 * 1024).unwrap();
    report('c', 64, c);
    snapshot(&buddy, &mut step)?;

    let d = buddy.allocate_scan(256 * 1024).unwrap();
    report('d', 256, d);
    snapshot(&buddy, &mut step)?;

    buddy.free(b.offset()).unwrap();
    println!("freed b");
    snapshot(&buddy, &mut step)?;

    buddy.free(a.offset()).unwrap();
    println!("freed a");
    snapshot(&buddy, &mut step)?;

    // The freed space is reused for a new allocation.
    let e = buddy.allocate_scan(75 * 1024).unwrap();
    report('e', 75, e);
    snapshot(&buddy, &mut step)?;

    buddy.free(c.offset()).unwrap();
    println!("freed c");
    snapshot(&buddy, &mut step)?;

    buddy.free(e.offset()).unwrap();
    println!("freed e");
    snapshot(&buddy, &mut step)?;

    buddy.free(d.offset()).unwrap();
    println!("freed d");
    snapshot(&buddy, &mut step)?;

    Ok(())
}
