// src/instance.rs
// One placed copy of a BLAS: transform pair, world-space bounds, and ray
// re-basing into BLAS-local space.
// RELEVANT FILES:src/blas.rs,src/tlas.rs

use glam::Mat4;

use crate::blas::Blas;
use crate::mesh::TriMesh;
use crate::ray::Ray;
use crate::types::Aabb;

/// A BLAS placed in the world. References its BLAS by index, never by
/// pointer, so instance lists stay plain data.
///
/// The design assumes an affine rigid (optionally uniformly scaled)
/// transform; under non-uniform scaling the local-space hit distance no
/// longer equals the world-space distance.
#[derive(Debug, Clone, Copy)]
pub struct BlasInstance {
    pub blas_index: u32,
    transform: Mat4,
    inv_transform: Mat4,
    bounds: Aabb,
}

impl BlasInstance {
    pub fn new(blas_index: u32) -> Self {
        Self {
            blas_index,
            transform: Mat4::IDENTITY,
            inv_transform: Mat4::IDENTITY,
            bounds: Aabb::empty(),
        }
    }

    pub fn with_transform(blas_index: u32, blas: &Blas, transform: Mat4) -> Self {
        let mut instance = Self::new(blas_index);
        instance.set_transform(blas, transform);
        instance
    }

    /// Stores the transform pair and recomputes world bounds by growing an
    /// empty box over the 8 transformed corners of the BLAS root AABB; the
    /// box itself is never transformed as a box.
    pub fn set_transform(&mut self, blas: &Blas, transform: Mat4) {
        self.transform = transform;
        self.inv_transform = transform.inverse();
        let root = blas.root_aabb();
        let mut bounds = Aabb::empty();
        if root.is_valid() {
            for corner in 0..8 {
                bounds.grow(transform.transform_point3(root.corner(corner)));
            }
        }
        self.bounds = bounds;
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    pub fn inv_transform(&self) -> Mat4 {
        self.inv_transform
    }

    /// World-space bounds of the transformed BLAS root.
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Re-bases the ray into BLAS-local space, traverses, then restores the
    /// world-space origin/direction. The hit record carries over unchanged:
    /// affine transforms preserve the parameter `t`.
    pub fn intersect(&self, ray: &mut Ray, blas: &Blas, mesh: &TriMesh, instance_idx: u32) {
        let (origin, dir, rdir) = (ray.origin, ray.dir, ray.rdir);
        ray.origin = self.inv_transform.transform_point3(origin);
        ray.dir = self.inv_transform.transform_vector3(dir);
        ray.rdir = ray.dir.recip();
        blas.intersect(ray, mesh, instance_idx);
        ray.origin = origin;
        ray.dir = dir;
        ray.rdir = rdir;
    }
}
