// src/types.rs
// Core pool-level types: AABB, the 32-byte BVH/TLAS node layouts, packing
// constants and build statistics.
// RELEVANT FILES:src/blas.rs,src/tlas.rs,src/ray.rs

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Sentinel "infinite" distance used by slab tests and hit records.
pub const INF: f32 = 1e30;

/// Rays whose triangle-plane determinant is below this are treated as
/// parallel and miss.
pub const EPS_PARALLEL: f32 = 1e-5;

/// Hits closer than this along the ray are rejected (self-intersection
/// guard).
pub const EPS_HIT: f32 = 1e-4;

/// Bits of the packed hit identifier reserved for the primitive index; the
/// instance index occupies the bits above.
pub const PRIM_BITS: u32 = 20;
pub const PRIM_MASK: u32 = (1 << PRIM_BITS) - 1;

/// A BLAS addresses primitives with [`PRIM_BITS`] bits.
pub const MAX_TRIS_PER_BLAS: usize = 1 << PRIM_BITS;

/// Instances are addressed with the 12 bits above the primitive index.
pub const MAX_INSTANCES: usize = 1 << 12;

/// TLAS children are packed as two 16-bit node indices.
pub const MAX_TLAS_NODES: usize = u16::MAX as usize;

/// Fixed traversal stack capacity. Builds reject trees deeper than this so
/// traversal itself never has to check.
pub const TRAVERSAL_STACK: usize = 64;

/// Axis-aligned bounding box. The empty box is encoded with inverted bounds
/// (min = +INF, max = -INF).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(INF),
            max: Vec3::splat(-INF),
        }
    }

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Expand to include a point.
    pub fn grow(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Expand to include another AABB.
    pub fn grow_aabb(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Componentwise fmin/fmax of two boxes.
    pub fn union(a: &Aabb, b: &Aabb) -> Aabb {
        Aabb {
            min: a.min.min(b.min),
            max: a.max.max(b.max),
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    /// Half surface area, the score used by both SAH ranking and TLAS
    /// nearest-neighbour matching. Empty boxes score zero.
    pub fn half_area(&self) -> f32 {
        if !self.is_valid() {
            return 0.0;
        }
        let e = self.extent();
        e.x * e.y + e.y * e.z + e.z * e.x
    }

    pub fn area(&self) -> f32 {
        2.0 * self.half_area()
    }

    /// Half-area of the union with `other`.
    pub fn merged_half_area(&self, other: &Aabb) -> f32 {
        Aabb::union(self, other).half_area()
    }

    /// One of the 8 corners, selected by the low three bits of `i`.
    pub fn corner(&self, i: usize) -> Vec3 {
        Vec3::new(
            if i & 1 != 0 { self.max.x } else { self.min.x },
            if i & 2 != 0 { self.max.y } else { self.min.y },
            if i & 4 != 0 { self.max.z } else { self.min.z },
        )
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.y >= self.min.y
            && p.z >= self.min.z
            && p.x <= self.max.x
            && p.y <= self.max.y
            && p.z <= self.max.z
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

/// BLAS node. 32 bytes, two per cache line.
///
/// Leaf iff `tri_count > 0`; then `left_first` is the start of its range in
/// the triangle index array. Interior nodes store the left child index in
/// `left_first`; the right child is always `left_first + 1` (children are
/// allocated in pairs).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BvhNode {
    pub aabb_min: [f32; 3],
    pub left_first: u32,
    pub aabb_max: [f32; 3],
    pub tri_count: u32,
}

impl BvhNode {
    pub fn is_leaf(&self) -> bool {
        self.tri_count > 0
    }

    pub fn aabb(&self) -> Aabb {
        Aabb {
            min: Vec3::from(self.aabb_min),
            max: Vec3::from(self.aabb_max),
        }
    }

    pub fn set_aabb(&mut self, aabb: Aabb) {
        self.aabb_min = aabb.min.to_array();
        self.aabb_max = aabb.max.to_array();
    }

    /// SAH cost of keeping this node as a leaf.
    pub fn node_cost(&self) -> f32 {
        self.tri_count as f32 * self.aabb().half_area()
    }
}

/// TLAS node. 32 bytes, same footprint as [`BvhNode`].
///
/// Leaf iff `left_right == 0`; then `blas` names the instance. Interior
/// nodes pack the two child indices into the low and high 16 bits of
/// `left_right`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TlasNode {
    pub aabb_min: [f32; 3],
    pub left_right: u32,
    pub aabb_max: [f32; 3],
    pub blas: u32,
}

impl TlasNode {
    pub fn leaf(aabb: Aabb, instance: u32) -> Self {
        let mut node = Self::zeroed();
        node.set_aabb(aabb);
        node.blas = instance;
        node
    }

    pub fn interior(aabb: Aabb, left: u32, right: u32) -> Self {
        debug_assert!(left <= u16::MAX as u32 && right <= u16::MAX as u32);
        let mut node = Self::zeroed();
        node.set_aabb(aabb);
        node.left_right = left | (right << 16);
        node
    }

    pub fn is_leaf(&self) -> bool {
        self.left_right == 0
    }

    pub fn left(&self) -> u32 {
        self.left_right & 0xffff
    }

    pub fn right(&self) -> u32 {
        self.left_right >> 16
    }

    pub fn aabb(&self) -> Aabb {
        Aabb {
            min: Vec3::from(self.aabb_min),
            max: Vec3::from(self.aabb_max),
        }
    }

    pub fn set_aabb(&mut self, aabb: Aabb) {
        self.aabb_min = aabb.min.to_array();
        self.aabb_max = aabb.max.to_array();
    }
}

// Verify the pool layouts at compile time.
const _: () = {
    assert!(std::mem::size_of::<BvhNode>() == 32);
    assert!(std::mem::size_of::<TlasNode>() == 32);
    assert!(std::mem::align_of::<BvhNode>() == 4);
    assert!(std::mem::align_of::<TlasNode>() == 4);
};

/// Options for SAH binned BLAS construction.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Number of SAH bins per axis; at least 4.
    pub bins: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self { bins: 8 }
    }
}

/// Statistics from acceleration-structure construction.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BuildStats {
    pub build_time_ms: f32,
    pub node_count: u32,
    pub leaf_count: u32,
    pub max_depth: u32,
    pub memory_usage_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aabb_grow_and_area() {
        let mut aabb = Aabb::empty();
        assert!(!aabb.is_valid());
        assert_eq!(aabb.half_area(), 0.0);

        aabb.grow(Vec3::ZERO);
        aabb.grow(Vec3::ONE);
        assert!(aabb.is_valid());
        assert_eq!(aabb.center(), Vec3::splat(0.5));
        assert_eq!(aabb.half_area(), 3.0);
        assert_eq!(aabb.area(), 6.0);

        let other = Aabb::new(Vec3::splat(0.5), Vec3::splat(1.5));
        let merged = Aabb::union(&aabb, &other);
        assert_eq!(merged.min, Vec3::ZERO);
        assert_eq!(merged.max, Vec3::splat(1.5));
        assert_eq!(aabb.merged_half_area(&other), merged.half_area());
    }

    #[test]
    fn aabb_corners() {
        let aabb = Aabb::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(aabb.corner(0), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(aabb.corner(7), Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(aabb.corner(1), Vec3::new(4.0, 2.0, 3.0));
        assert_eq!(aabb.corner(6), Vec3::new(1.0, 5.0, 6.0));
    }

    #[test]
    fn bvh_node_semantics() {
        let mut node = BvhNode::zeroed();
        assert!(!node.is_leaf());
        node.tri_count = 3;
        node.left_first = 7;
        assert!(node.is_leaf());

        node.set_aabb(Aabb::new(Vec3::ZERO, Vec3::ONE));
        assert_eq!(node.aabb().min, Vec3::ZERO);
        assert_eq!(node.node_cost(), 9.0);
    }

    #[test]
    fn tlas_node_packing() {
        let leaf = TlasNode::leaf(Aabb::new(Vec3::ZERO, Vec3::ONE), 5);
        assert!(leaf.is_leaf());
        assert_eq!(leaf.blas, 5);

        let interior = TlasNode::interior(Aabb::new(Vec3::ZERO, Vec3::ONE), 3, 260);
        assert!(!interior.is_leaf());
        assert_eq!(interior.left(), 3);
        assert_eq!(interior.right(), 260);
    }
}
