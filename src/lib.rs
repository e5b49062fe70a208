//! Two-level bounding-volume hierarchies for CPU ray tracing.
//!
//! A bottom-level BVH ([`Blas`]) is built per mesh with binned SAH
//! partitioning and supports refitting for animated geometry. Instances
//! ([`BlasInstance`]) place a BLAS in the world with an affine transform and
//! a world-space AABB. The top-level BVH ([`Tlas`]) is built over instances
//! with agglomerative clustering (a reference nearest-neighbour chain plus a
//! parallel variant accelerated by per-group kD-tree indices) and dispatches
//! rays through both levels to the closest triangle hit.
//!
//! Build and refit entry points validate capacity up front and return
//! [`AccelError`] on failure; traversal never fails, it only misses. Build
//! timings are reported through [`BuildStats`], never printed.

pub mod blas;
pub mod error;
pub mod instance;
pub mod intersect;
pub mod kdtree;
pub mod mesh;
pub mod ray;
pub mod tlas;
pub mod types;

pub use blas::Blas;
pub use error::{AccelError, Result};
pub use instance::BlasInstance;
pub use kdtree::KdTree;
pub use mesh::{Tri, TriAttr, TriMesh};
pub use ray::{Hit, Ray};
pub use tlas::Tlas;
pub use types::{Aabb, BuildOptions, BuildStats, BvhNode, TlasNode};

/// Convenience entry points mirroring the type-level API.
pub fn build_blas(mesh: &mut TriMesh) -> Result<Blas> {
    Blas::build(mesh)
}

/// Refits `blas` to the current triangle positions; returns the refit
/// duration in milliseconds.
pub fn refit_blas(blas: &mut Blas, mesh: &TriMesh) -> Result<f32> {
    blas.refit(mesh)
}

pub fn build_tlas(instances: &[BlasInstance]) -> Result<Tlas> {
    Tlas::build(instances)
}

pub fn build_tlas_fast(instances: &[BlasInstance], workers: usize) -> Result<Tlas> {
    Tlas::build_fast(instances, workers)
}
