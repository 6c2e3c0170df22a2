//! Test utilities for raymem development.
//!
//! Provides a plain-data [`Sphere`] scene primitive (the element type the
//! ray tracer keeps in its object arena), a [`DropCounter`] element for
//! checking construction/destruction coupling, and a [`FailingProvider`]
//! for exercising provider exhaustion.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

pub use fixtures::{scene_spheres, DropCounter, FailingProvider, Sphere};
