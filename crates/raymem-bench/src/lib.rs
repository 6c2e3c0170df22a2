//! Benchmark profiles and utilities for the raymem memory subsystem.
//!
//! - [`allocation_sizes`]: deterministic payload sizes for allocate/free runs
//! - [`smooth_scaling_scene`]: the tracked sphere arena used by the frame loop
//! - [`dynamic_sphere`]: the per-frame sphere that is constructed and released

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use raymem_heap::HeapRegistry;
use raymem_pool::{ArenaConfig, ArenaError, ObjectArena};
use raymem_test_utils::{scene_spheres, Sphere};

/// Spheres live at once in the smooth-scaling scene: three static, one dynamic.
pub const SCENE_CAPACITY: usize = 4;

/// Produce `count` payload sizes in `1..=max` from `seed`.
///
/// A fixed 64-bit LCG keeps runs reproducible across machines.
pub fn allocation_sizes(count: usize, max: usize, seed: u64) -> Vec<usize> {
    let mut state = seed;
    (0..count)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            1 + (state >> 33) as usize % max.max(1)
        })
        .collect()
}

/// Build the scene arena: capacity [`SCENE_CAPACITY`], tracked in the
/// graphics heap, holding the three static spheres.
pub fn smooth_scaling_scene(registry: &HeapRegistry) -> Result<ObjectArena<Sphere>, ArenaError> {
    let mut pool = ObjectArena::tracked(ArenaConfig::new(SCENE_CAPACITY), registry)?;
    for sphere in scene_spheres() {
        pool.try_construct(sphere)?;
    }
    Ok(pool)
}

/// The dynamic sphere for `frame`, sliding along x.
pub fn dynamic_sphere(frame: usize) -> Sphere {
    let x = -5.0 + frame as f32 * 0.1;
    Sphere::new([x, 0.0, -20.0], 1.0, [1.00, 0.32, 0.36], 1.0, 0.5)
}
