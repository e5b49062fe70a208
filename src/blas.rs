// src/blas.rs
// Bottom-level BVH over one mesh: binned SAH construction, refitting for
// animated geometry, and ordered stack traversal.
// RELEVANT FILES:src/types.rs,src/intersect.rs,src/mesh.rs

use std::time::Instant;

use bytemuck::Zeroable;
use log::debug;

use crate::error::{AccelError, Result};
use crate::intersect::{intersect_aabb, intersect_tri};
use crate::mesh::TriMesh;
use crate::ray::{pack_inst_prim, Ray};
use crate::types::{
    Aabb, BuildOptions, BuildStats, BvhNode, INF, MAX_TRIS_PER_BLAS, TRAVERSAL_STACK,
};

/// One SAH bin: a triangle tally and the bounds of the member vertices.
#[derive(Clone, Copy)]
struct Bin {
    bounds: Aabb,
    count: u32,
}

impl Default for Bin {
    fn default() -> Self {
        Self {
            bounds: Aabb::empty(),
            count: 0,
        }
    }
}

/// Bottom-level BVH. Owns its node pool and triangle index permutation;
/// the mesh itself is passed to every operation.
///
/// The pool holds `2 * tri_count` nodes: slot 0 is the root, slot 1 stays
/// unused so sibling pairs share a cache line, and allocation starts at 2.
#[derive(Debug, Clone)]
pub struct Blas {
    nodes: Vec<BvhNode>,
    tri_idx: Vec<u32>,
    nodes_used: u32,
    stats: BuildStats,
}

impl Blas {
    /// Builds a BVH over `mesh` with default options. Centroids are
    /// recomputed, so the mesh is taken mutably.
    pub fn build(mesh: &mut TriMesh) -> Result<Self> {
        Self::build_with_options(mesh, &BuildOptions::default())
    }

    pub fn build_with_options(mesh: &mut TriMesh, options: &BuildOptions) -> Result<Self> {
        if options.bins < 4 {
            return Err(AccelError::invalid_options(format!(
                "at least 4 SAH bins required, got {}",
                options.bins
            )));
        }
        let tri_count = mesh.tri_count();
        if tri_count > MAX_TRIS_PER_BLAS {
            return Err(AccelError::CapacityExceeded {
                what: "triangle",
                count: tri_count,
                max: MAX_TRIS_PER_BLAS,
            });
        }
        if tri_count == 0 {
            // empty tree; traversal over it is a no-op
            return Ok(Self {
                nodes: Vec::new(),
                tri_idx: Vec::new(),
                nodes_used: 0,
                stats: BuildStats::default(),
            });
        }

        let start = Instant::now();
        mesh.update_centroids();

        let mut blas = Self {
            nodes: vec![BvhNode::zeroed(); 2 * tri_count],
            tri_idx: (0..tri_count as u32).collect(),
            nodes_used: 2,
            stats: BuildStats::default(),
        };
        blas.nodes[0].left_first = 0;
        blas.nodes[0].tri_count = tri_count as u32;
        blas.update_node_bounds(0, mesh);
        blas.subdivide(0, mesh, options.bins, 0);

        if blas.stats.max_depth > TRAVERSAL_STACK as u32 {
            return Err(AccelError::DepthExceeded {
                depth: blas.stats.max_depth,
            });
        }

        blas.stats.build_time_ms = start.elapsed().as_secs_f32() * 1000.0;
        blas.stats.node_count = blas.nodes_used;
        blas.stats.memory_usage_bytes = (blas.nodes.len() * std::mem::size_of::<BvhNode>()
            + blas.tri_idx.len() * std::mem::size_of::<u32>())
            as u64;
        debug!(
            "BLAS built: {} tris, {} nodes, depth {}, {:.2}ms",
            tri_count, blas.nodes_used, blas.stats.max_depth, blas.stats.build_time_ms
        );
        Ok(blas)
    }

    /// Re-fits all node bounds to the current triangle positions without
    /// touching topology; triangle-to-leaf assignment must be unchanged.
    /// Children are always allocated after their parent, so one reverse
    /// sweep sees every child before its parent. Returns the refit duration
    /// in milliseconds.
    pub fn refit(&mut self, mesh: &TriMesh) -> Result<f32> {
        if mesh.tri_count() != self.tri_idx.len() {
            return Err(AccelError::TriCountChanged {
                expected: self.tri_idx.len(),
                got: mesh.tri_count(),
            });
        }
        let start = Instant::now();
        for i in (0..self.nodes_used as usize).rev() {
            if i == 1 {
                continue; // reserved slot
            }
            let node = self.nodes[i];
            if node.is_leaf() {
                self.update_node_bounds(i, mesh);
                continue;
            }
            let left = self.nodes[node.left_first as usize].aabb();
            let right = self.nodes[node.left_first as usize + 1].aabb();
            self.nodes[i].set_aabb(Aabb::union(&left, &right));
        }
        let ms = start.elapsed().as_secs_f32() * 1000.0;
        debug!("BLAS refitted: {} nodes, {:.2}ms", self.nodes_used, ms);
        Ok(ms)
    }

    /// Traverses the BVH with an explicit stack, descending near-to-far.
    /// The far child is pushed only when its entry distance beats the
    /// current closest hit, so already-occluded subtrees are skipped.
    pub fn intersect(&self, ray: &mut Ray, mesh: &TriMesh, instance_idx: u32) {
        if self.nodes_used == 0 {
            return;
        }
        let mut stack = [0u32; TRAVERSAL_STACK];
        let mut stack_ptr = 0usize;
        let mut node_idx = 0u32;
        loop {
            let node = &self.nodes[node_idx as usize];
            if node.is_leaf() {
                for i in 0..node.tri_count {
                    let prim = self.tri_idx[(node.left_first + i) as usize];
                    intersect_tri(
                        ray,
                        &mesh.tris()[prim as usize],
                        pack_inst_prim(instance_idx, prim),
                    );
                }
                if stack_ptr == 0 {
                    break;
                }
                stack_ptr -= 1;
                node_idx = stack[stack_ptr];
                continue;
            }
            let mut child1 = node.left_first;
            let mut child2 = node.left_first + 1;
            let n1 = &self.nodes[child1 as usize];
            let n2 = &self.nodes[child2 as usize];
            let mut dist1 = intersect_aabb(ray, n1.aabb().min, n1.aabb().max);
            let mut dist2 = intersect_aabb(ray, n2.aabb().min, n2.aabb().max);
            if dist1 > dist2 {
                std::mem::swap(&mut dist1, &mut dist2);
                std::mem::swap(&mut child1, &mut child2);
            }
            if dist1 == INF {
                if stack_ptr == 0 {
                    break;
                }
                stack_ptr -= 1;
                node_idx = stack[stack_ptr];
            } else {
                node_idx = child1;
                if dist2 < ray.hit.t {
                    debug_assert!(stack_ptr < TRAVERSAL_STACK);
                    stack[stack_ptr] = child2;
                    stack_ptr += 1;
                }
            }
        }
    }

    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    pub fn tri_idx(&self) -> &[u32] {
        &self.tri_idx
    }

    pub fn nodes_used(&self) -> u32 {
        self.nodes_used
    }

    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    /// Root bounds, or the empty box for a BVH over zero triangles.
    pub fn root_aabb(&self) -> Aabb {
        if self.nodes_used == 0 {
            Aabb::empty()
        } else {
            self.nodes[0].aabb()
        }
    }

    /// Fits a node's bounds to the vertices of every triangle it covers.
    fn update_node_bounds(&mut self, node_idx: usize, mesh: &TriMesh) {
        let node = self.nodes[node_idx];
        let mut aabb = Aabb::empty();
        for i in 0..node.tri_count {
            let tri = &mesh.tris()[self.tri_idx[(node.left_first + i) as usize] as usize];
            aabb.grow(tri.v0);
            aabb.grow(tri.v1);
            aabb.grow(tri.v2);
        }
        self.nodes[node_idx].set_aabb(aabb);
    }

    /// Evaluates all candidate split planes over `bins` bins per axis and
    /// returns (axis, plane position, SAH cost) of the best.
    fn find_best_split(&self, node: &BvhNode, mesh: &TriMesh, bins: usize) -> (usize, f32, f32) {
        let mut best_axis = 0;
        let mut best_pos = 0.0;
        let mut best_cost = INF;
        let first = node.left_first as usize;
        let count = node.tri_count as usize;
        for axis in 0..3 {
            let mut cmin = INF;
            let mut cmax = -INF;
            for i in 0..count {
                let tri = &mesh.tris()[self.tri_idx[first + i] as usize];
                cmin = cmin.min(tri.centroid[axis]);
                cmax = cmax.max(tri.centroid[axis]);
            }
            if cmin == cmax {
                continue;
            }
            // populate the bins; bin bounds grow over triangle vertices,
            // bin selection uses the centroid
            let mut bin = vec![Bin::default(); bins];
            let scale = bins as f32 / (cmax - cmin);
            for i in 0..count {
                let tri = &mesh.tris()[self.tri_idx[first + i] as usize];
                let b = (((tri.centroid[axis] - cmin) * scale) as usize).min(bins - 1);
                bin[b].count += 1;
                bin[b].bounds.grow(tri.v0);
                bin[b].bounds.grow(tri.v1);
                bin[b].bounds.grow(tri.v2);
            }
            // prefix sums for the bins-1 planes, swept from both ends
            let mut left_area = vec![0.0f32; bins - 1];
            let mut right_area = vec![0.0f32; bins - 1];
            let mut left_count = vec![0u32; bins - 1];
            let mut right_count = vec![0u32; bins - 1];
            let mut left_box = Aabb::empty();
            let mut right_box = Aabb::empty();
            let mut left_sum = 0;
            let mut right_sum = 0;
            for i in 0..bins - 1 {
                left_sum += bin[i].count;
                left_count[i] = left_sum;
                left_box.grow_aabb(&bin[i].bounds);
                left_area[i] = left_box.half_area();
                right_sum += bin[bins - 1 - i].count;
                right_count[bins - 2 - i] = right_sum;
                right_box.grow_aabb(&bin[bins - 1 - i].bounds);
                right_area[bins - 2 - i] = right_box.half_area();
            }
            let scale = (cmax - cmin) / bins as f32;
            for i in 0..bins - 1 {
                if left_count[i] == 0 || right_count[i] == 0 {
                    continue;
                }
                let cost = left_count[i] as f32 * left_area[i] + right_count[i] as f32 * right_area[i];
                if cost < best_cost {
                    best_axis = axis;
                    best_pos = cmin + scale * (i + 1) as f32;
                    best_cost = cost;
                }
            }
        }
        (best_axis, best_pos, best_cost)
    }

    fn subdivide(&mut self, node_idx: usize, mesh: &TriMesh, bins: usize, depth: u32) {
        self.stats.max_depth = self.stats.max_depth.max(depth);
        let node = self.nodes[node_idx];
        let (axis, split_pos, split_cost) = self.find_best_split(&node, mesh, bins);
        if split_cost >= node.node_cost() {
            self.stats.leaf_count += 1;
            return;
        }
        // in-place two-pointer partition of the index range
        let mut i = node.left_first as isize;
        let mut j = i + node.tri_count as isize - 1;
        while i <= j {
            if mesh.tris()[self.tri_idx[i as usize] as usize].centroid[axis] < split_pos {
                i += 1;
            } else {
                self.tri_idx.swap(i as usize, j as usize);
                j -= 1;
            }
        }
        let left_count = (i - node.left_first as isize) as u32;
        if left_count == 0 || left_count == node.tri_count {
            // all centroids landed on one side; give up on this node
            self.stats.leaf_count += 1;
            return;
        }
        let left_child = self.nodes_used as usize;
        self.nodes_used += 2;
        self.nodes[left_child].left_first = node.left_first;
        self.nodes[left_child].tri_count = left_count;
        self.nodes[left_child + 1].left_first = i as u32;
        self.nodes[left_child + 1].tri_count = node.tri_count - left_count;
        self.nodes[node_idx].left_first = left_child as u32;
        self.nodes[node_idx].tri_count = 0;
        self.update_node_bounds(left_child, mesh);
        self.update_node_bounds(left_child + 1, mesh);
        self.subdivide(left_child, mesh, bins, depth + 1);
        self.subdivide(left_child + 1, mesh, bins, depth + 1);
    }
}
