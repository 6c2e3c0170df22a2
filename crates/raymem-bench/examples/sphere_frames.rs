//! Smooth-scaling frame loop over a tracked sphere arena.
//!
//! Demonstrates: initialize heaps → build the scene arena → per frame,
//! construct the dynamic sphere, render, release it → walk → clean up.
//!
//! Run with `RUST_LOG=debug` to see every tracked operation.

use std::time::Instant;

use raymem_bench::{dynamic_sphere, smooth_scaling_scene};
use raymem_heap::{ByteSize, HeapId, HeapRegistry};
use tracing_subscriber::EnvFilter;

const FRAMES: usize = 100;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== raymem sphere frames ===\n");

    let registry = HeapRegistry::new();
    registry.initialize().unwrap();
    let mut spheres = smooth_scaling_scene(&registry).unwrap();
    println!(
        "scene arena: {} slots of {} each, {} block",
        spheres.capacity(),
        ByteSize(spheres.slot_size()),
        ByteSize(spheres.block_bytes()),
    );

    let origin = [0.0, 0.0, 0.0];
    for frame in 0..FRAMES {
        let start = Instant::now();
        let slot = spheres.try_construct(dynamic_sphere(frame)).unwrap();

        // One primary ray straight down -z stands in for the render.
        let hits = spheres
            .iter()
            .filter(|(_, s)| s.intersects(origin, [0.0, 0.0, -1.0]))
            .count();

        spheres.release_last().unwrap();
        let elapsed = start.elapsed();

        if frame % 25 == 0 || frame == FRAMES - 1 {
            println!(
                "  frame {:>3}: {} at slot {}, {} hits, {:>6}ns",
                frame,
                slot,
                slot.index(),
                hits,
                elapsed.as_nanos(),
            );
        }
    }

    let report = registry.walk(HeapId::Graphics).unwrap();
    println!("\n{report}");

    drop(spheres);
    let cleanup = registry.clean_up().unwrap();
    println!("clean up drained {} records", cleanup.total_drained());
}
