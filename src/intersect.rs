// src/intersect.rs
// Ray/triangle (Möller–Trumbore) and ray/AABB (slab) intersection kernels.
// The SIMD-lane slab variant must stay observationally identical to the
// scalar form; tests cross-validate the two.
// RELEVANT FILES:src/ray.rs,src/blas.rs,src/tlas.rs

use glam::{Vec3, Vec3A};

use crate::mesh::Tri;
use crate::ray::{Hit, Ray};
use crate::types::{EPS_HIT, EPS_PARALLEL, INF};

/// Möller–Trumbore ray/triangle intersection. Updates `ray.hit` when the
/// triangle is hit closer than the current closest hit.
pub fn intersect_tri(ray: &mut Ray, tri: &Tri, inst_prim: u32) {
    let edge1 = tri.v1 - tri.v0;
    let edge2 = tri.v2 - tri.v0;
    let h = ray.dir.cross(edge2);
    let a = edge1.dot(h);
    if a.abs() < EPS_PARALLEL {
        return; // ray parallel to triangle plane
    }
    let f = 1.0 / a;
    let s = ray.origin - tri.v0;
    let u = f * s.dot(h);
    if u < 0.0 || u > 1.0 {
        return;
    }
    let q = s.cross(edge1);
    let v = f * ray.dir.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return;
    }
    let t = f * edge2.dot(q);
    if t > EPS_HIT && t < ray.hit.t {
        ray.hit = Hit { t, u, v, inst_prim };
    }
}

/// Scalar slab test. Returns the entry distance, or [`INF`] on a miss.
///
/// Zero direction components yield ±inf slabs through IEEE arithmetic,
/// which classifies axis-aligned rays correctly without any epsilon.
pub fn intersect_aabb(ray: &Ray, bmin: Vec3, bmax: Vec3) -> f32 {
    let tx1 = (bmin.x - ray.origin.x) * ray.rdir.x;
    let tx2 = (bmax.x - ray.origin.x) * ray.rdir.x;
    let mut tmin = tx1.min(tx2);
    let mut tmax = tx1.max(tx2);
    let ty1 = (bmin.y - ray.origin.y) * ray.rdir.y;
    let ty2 = (bmax.y - ray.origin.y) * ray.rdir.y;
    tmin = tmin.max(ty1.min(ty2));
    tmax = tmax.min(ty1.max(ty2));
    let tz1 = (bmin.z - ray.origin.z) * ray.rdir.z;
    let tz2 = (bmax.z - ray.origin.z) * ray.rdir.z;
    tmin = tmin.max(tz1.min(tz2));
    tmax = tmax.min(tz1.max(tz2));
    if tmax >= tmin && tmin < ray.hit.t && tmax > 0.0 {
        tmin
    } else {
        INF
    }
}

/// Slab test with all three axes in one wide register.
pub fn intersect_aabb_simd(ray: &Ray, bmin: Vec3A, bmax: Vec3A) -> f32 {
    let origin = Vec3A::from(ray.origin);
    let rdir = Vec3A::from(ray.rdir);
    let t1 = (bmin - origin) * rdir;
    let t2 = (bmax - origin) * rdir;
    let tmin = t1.min(t2).max_element();
    let tmax = t1.max(t2).min_element();
    if tmax >= tmin && tmin < ray.hit.t && tmax > 0.0 {
        tmin
    } else {
        INF
    }
}
