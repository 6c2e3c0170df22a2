//! Reusable arena and heap fixtures.
//!
//! - [`Sphere`]: fixed-size scene primitive.
//! - [`DropCounter`]: counts how many times it has been dropped.
//! - [`FailingProvider`]: raw provider that fails after N allocations.

use std::cell::Cell;
use std::rc::Rc;

use raymem_heap::{RawProvider, SystemProvider};

/// A sphere as the renderer stores it: geometry plus surface properties.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sphere {
    pub center: [f32; 3],
    pub radius: f32,
    pub radius2: f32,
    pub surface_color: [f32; 3],
    pub emission_color: [f32; 3],
    pub transparency: f32,
    pub reflection: f32,
}

impl Sphere {
    pub fn new(
        center: [f32; 3],
        radius: f32,
        surface_color: [f32; 3],
        reflection: f32,
        transparency: f32,
    ) -> Self {
        Self {
            center,
            radius,
            radius2: radius * radius,
            surface_color,
            emission_color: [0.0; 3],
            transparency,
            reflection,
        }
    }

    /// The emissive sphere used as the scene's light source.
    pub fn light(center: [f32; 3], radius: f32, emission: [f32; 3]) -> Self {
        Self {
            emission_color: emission,
            ..Self::new(center, radius, [0.0; 3], 0.0, 0.0)
        }
    }

    /// Whether a ray from `origin` along the unit vector `dir` hits the sphere.
    pub fn intersects(&self, origin: [f32; 3], dir: [f32; 3]) -> bool {
        let l = [
            self.center[0] - origin[0],
            self.center[1] - origin[1],
            self.center[2] - origin[2],
        ];
        let tca = l[0] * dir[0] + l[1] * dir[1] + l[2] * dir[2];
        if tca < 0.0 {
            return false;
        }
        let d2 = l[0] * l[0] + l[1] * l[1] + l[2] * l[2] - tca * tca;
        d2 <= self.radius2
    }
}

/// The three static spheres of the smooth-scaling scene: floor and two
/// coloured balls.
pub fn scene_spheres() -> [Sphere; 3] {
    [
        Sphere::new([0.0, -10004.0, -20.0], 10000.0, [0.20, 0.20, 0.20], 0.0, 0.0),
        Sphere::new([5.0, -1.0, -15.0], 2.0, [0.90, 0.76, 0.46], 1.0, 0.0),
        Sphere::new([5.0, 0.0, -25.0], 3.0, [0.65, 0.77, 0.97], 1.0, 0.0),
    ]
}

/// Element that increments a shared counter when dropped.
#[derive(Debug)]
pub struct DropCounter {
    pub id: u32,
    drops: Rc<Cell<usize>>,
}

impl DropCounter {
    pub fn new(id: u32, drops: &Rc<Cell<usize>>) -> Self {
        Self {
            id,
            drops: Rc::clone(drops),
        }
    }
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

/// Provider that serves `succeed` allocations and then always fails.
#[derive(Debug, Default)]
pub struct FailingProvider {
    inner: SystemProvider,
    remaining: usize,
}

impl FailingProvider {
    pub fn new(succeed: usize) -> Self {
        Self {
            inner: SystemProvider::new(),
            remaining: succeed,
        }
    }
}

impl RawProvider for FailingProvider {
    fn allocate(&mut self, len: usize) -> Option<Box<[u8]>> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.inner.allocate(len)
    }

    fn release(&mut self, block: Box<[u8]>) {
        self.inner.release(block);
    }

    fn bytes_in_use(&self) -> usize {
        self.inner.bytes_in_use()
    }
}
