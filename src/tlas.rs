// src/tlas.rs
// Top-level BVH over BLAS instances: reference agglomerative build
// (nearest-neighbour chain), fast parallel build (sorted pre-splitting plus
// per-group kD-tree clustering), and two-level traversal.
// RELEVANT FILES:src/kdtree.rs,src/instance.rs,src/blas.rs

use std::time::Instant;

use bytemuck::Zeroable;
use log::{debug, warn};
use rayon::prelude::*;

use crate::blas::Blas;
use crate::error::{AccelError, Result};
use crate::instance::BlasInstance;
use crate::intersect::intersect_aabb;
use crate::kdtree::KdTree;
use crate::mesh::TriMesh;
use crate::ray::Ray;
use crate::types::{Aabb, BuildStats, TlasNode, INF, MAX_INSTANCES, MAX_TLAS_NODES, TRAVERSAL_STACK};

/// Top-level BVH. Owns its node pool (2·N slots, slot 0 holds the final
/// root) and references the instance list only during build and traversal.
#[derive(Debug, Clone)]
pub struct Tlas {
    nodes: Vec<TlasNode>,
    nodes_used: u32,
    stats: BuildStats,
}

impl Tlas {
    /// Reference agglomerative build. Repeatedly merges mutual nearest
    /// neighbours, found by walking the nearest-neighbour chain with a
    /// linear scan. Deterministic: identical instance lists produce
    /// byte-identical node pools.
    pub fn build(instances: &[BlasInstance]) -> Result<Self> {
        Self::check_capacity(instances.len())?;
        let n = instances.len();
        if n == 0 {
            return Ok(Self::empty());
        }
        let start = Instant::now();

        let mut nodes = vec![TlasNode::zeroed(); 2 * n];
        let mut node_idx: Vec<u32> = Vec::with_capacity(n);
        let mut nodes_used: u32 = 1;
        for (i, inst) in instances.iter().enumerate() {
            node_idx.push(nodes_used);
            nodes[nodes_used as usize] = TlasNode::leaf(inst.bounds(), i as u32);
            nodes_used += 1;
        }

        let mut active = n;
        let mut a = 0usize;
        let mut b = find_best_match(&nodes, &node_idx[..active], a);
        while active > 1 {
            let c = find_best_match(&nodes, &node_idx[..active], b);
            if a == c {
                // mutual pair: fold A and B into a fresh interior node
                let idx_a = node_idx[a];
                let idx_b = node_idx[b];
                let merged = Aabb::union(
                    &nodes[idx_a as usize].aabb(),
                    &nodes[idx_b as usize].aabb(),
                );
                nodes[nodes_used as usize] = TlasNode::interior(merged, idx_a, idx_b);
                node_idx[a] = nodes_used;
                nodes_used += 1;
                node_idx[b] = node_idx[active - 1];
                active -= 1;
                if a == active {
                    // the merged cluster was the last active slot and just
                    // moved to B's slot; follow it
                    a = b;
                }
                if active > 1 {
                    b = find_best_match(&nodes, &node_idx[..active], a);
                }
            } else {
                a = b;
                b = c;
            }
        }
        nodes[0] = nodes[node_idx[a] as usize];

        let mut tlas = Self {
            nodes,
            nodes_used,
            stats: BuildStats::default(),
        };
        tlas.finalize(n as u32, start)?;
        debug!(
            "TLAS built: {} instances, {} nodes, {:.2}ms",
            n, tlas.nodes_used, tlas.stats.build_time_ms
        );
        Ok(tlas)
    }

    /// Fast parallel build: sort instances along the scene's dominant axis,
    /// pre-split into 2^k contiguous groups by balanced median halving, run
    /// the kD-tree-accelerated merge chain per group in parallel over
    /// disjoint pool regions, then join the group roots with a recursive
    /// pairing pass. Deterministic for a fixed worker count and input
    /// order; changing the worker count changes the grouping.
    pub fn build_fast(instances: &[BlasInstance], workers: usize) -> Result<Self> {
        Self::check_capacity(instances.len())?;
        let n = instances.len();
        if n == 0 {
            return Ok(Self::empty());
        }
        let start = Instant::now();

        // largest power of two <= workers, clamped to the instance count
        let mut p = 1usize;
        while p * 2 <= workers {
            p *= 2;
        }
        while p > n {
            p /= 2;
        }
        if p != workers {
            warn!("fast TLAS build: worker count {workers} clamped to {p}");
        }

        let mut scene = Aabb::empty();
        for inst in instances {
            scene.grow_aabb(&inst.bounds());
        }
        let axis = dominant_axis(scene.extent().to_array());
        let mut order: Vec<u32> = (0..n as u32).collect();
        order.sort_by(|&x, &y| {
            let cx = instances[x as usize].bounds().center()[axis];
            let cy = instances[y as usize].bounds().center()[axis];
            cx.partial_cmp(&cy).unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut groups: Vec<&[u32]> = Vec::with_capacity(p);
        split_groups(&order, p, &mut groups);

        // pool layout: slot 0, then per group its leaves followed by its
        // interior slots, then the join parents
        let mut region_start = Vec::with_capacity(p + 1);
        region_start.push(1usize);
        for g in 0..p {
            region_start.push(region_start[g] + 2 * groups[g].len() - 1);
        }
        let mut nodes = vec![TlasNode::zeroed(); 2 * n];
        for g in 0..p {
            for (k, &inst) in groups[g].iter().enumerate() {
                nodes[region_start[g] + k] =
                    TlasNode::leaf(instances[inst as usize].bounds(), inst);
            }
        }

        let roots: Vec<u32> = {
            let mut regions: Vec<(usize, &mut [TlasNode])> = Vec::with_capacity(p);
            let (_, mut rest) = nodes.split_at_mut(1);
            for g in 0..p {
                let len = region_start[g + 1] - region_start[g];
                let (region, tail) = rest.split_at_mut(len);
                regions.push((region_start[g], region));
                rest = tail;
            }
            regions
                .into_par_iter()
                .map(|(base, region)| cluster_group(region, base as u32))
                .collect()
        };

        let mut nodes_used = region_start[p] as u32;
        let mut level = roots;
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len() / 2);
            for pair in level.chunks(2) {
                let merged = Aabb::union(
                    &nodes[pair[0] as usize].aabb(),
                    &nodes[pair[1] as usize].aabb(),
                );
                nodes[nodes_used as usize] = TlasNode::interior(merged, pair[0], pair[1]);
                next.push(nodes_used);
                nodes_used += 1;
            }
            level = next;
        }
        nodes[0] = nodes[level[0] as usize];

        let mut tlas = Self {
            nodes,
            nodes_used,
            stats: BuildStats::default(),
        };
        tlas.finalize(n as u32, start)?;
        debug!(
            "TLAS fast build: {} instances, {} workers, {:.2}ms",
            n, p, tlas.stats.build_time_ms
        );
        Ok(tlas)
    }

    /// Two-level traversal: TLAS leaves re-base the ray into the referenced
    /// instance's BLAS and continue there. `blases[i]` must be the BVH
    /// built over `meshes[i]`; instances reference both through
    /// `blas_index`.
    pub fn intersect(
        &self,
        ray: &mut Ray,
        instances: &[BlasInstance],
        blases: &[Blas],
        meshes: &[TriMesh],
    ) {
        if self.nodes_used == 0 {
            return;
        }
        ray.rdir = ray.dir.recip();
        let mut stack = [0u32; TRAVERSAL_STACK];
        let mut stack_ptr = 0usize;
        let mut node_idx = 0u32;
        loop {
            let node = &self.nodes[node_idx as usize];
            if node.is_leaf() {
                let inst_idx = node.blas;
                let inst = &instances[inst_idx as usize];
                inst.intersect(
                    ray,
                    &blases[inst.blas_index as usize],
                    &meshes[inst.blas_index as usize],
                    inst_idx,
                );
                if stack_ptr == 0 {
                    break;
                }
                stack_ptr -= 1;
                node_idx = stack[stack_ptr];
                continue;
            }
            let mut child1 = node.left();
            let mut child2 = node.right();
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

    pub fn nodes(&self) -> &[TlasNode] {
        &self.nodes
    }

    pub fn nodes_used(&self) -> u32 {
        self.nodes_used
    }

    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            nodes_used: 0,
            stats: BuildStats::default(),
        }
    }

    fn check_capacity(count: usize) -> Result<()> {
        if count > MAX_INSTANCES {
            return Err(AccelError::CapacityExceeded {
                what: "instance",
                count,
                max: MAX_INSTANCES,
            });
        }
        // the 2N pool slots must stay addressable by the 16-bit child fields
        if 2 * count > MAX_TLAS_NODES {
            return Err(AccelError::CapacityExceeded {
                what: "TLAS node",
                count: 2 * count,
                max: MAX_TLAS_NODES,
            });
        }
        Ok(())
    }

    fn finalize(&mut self, leaf_count: u32, start: Instant) -> Result<()> {
        let depth = self.compute_depth();
        if depth > TRAVERSAL_STACK as u32 {
            return Err(AccelError::DepthExceeded { depth });
        }
        self.stats = BuildStats {
            build_time_ms: start.elapsed().as_secs_f32() * 1000.0,
            node_count: self.nodes_used,
            leaf_count,
            max_depth: depth,
            memory_usage_bytes: (self.nodes.len() * std::mem::size_of::<TlasNode>()) as u64,
        };
        Ok(())
    }

    fn compute_depth(&self) -> u32 {
        if self.nodes_used == 0 {
            return 0;
        }
        let mut max_depth = 0;
        let mut stack = vec![(0u32, 0u32)];
        while let Some((idx, depth)) = stack.pop() {
            max_depth = max_depth.max(depth);
            let node = &self.nodes[idx as usize];
            if !node.is_leaf() {
                stack.push((node.left(), depth + 1));
                stack.push((node.right(), depth + 1));
            }
        }
        max_depth
    }
}

/// Linear scan for the active cluster whose union with slot `a`'s box has
/// the smallest half-area. Ties break to the lowest active slot.
fn find_best_match(nodes: &[TlasNode], node_idx: &[u32], a: usize) -> usize {
    let mut smallest = INF;
    let mut best = usize::MAX;
    let aabb_a = nodes[node_idx[a] as usize].aabb();
    for (b, &idx_b) in node_idx.iter().enumerate() {
        if b == a {
            continue;
        }
        let sa = aabb_a.merged_half_area(&nodes[idx_b as usize].aabb());
        if sa < smallest {
            smallest = sa;
            best = b;
        }
    }
    best
}

/// Splits the sorted order into `p` (a power of two) contiguous groups by
/// repeated balanced halving.
fn split_groups<'a>(order: &'a [u32], p: usize, out: &mut Vec<&'a [u32]>) {
    if p == 1 {
        out.push(order);
        return;
    }
    let half = order.len() / 2;
    let (lo, hi) = order.split_at(half);
    split_groups(lo, p / 2, out);
    split_groups(hi, p / 2, out);
}

fn dominant_axis(extent: [f32; 3]) -> usize {
    if extent[1] > extent[0] {
        if extent[2] > extent[1] {
            2
        } else {
            1
        }
    } else if extent[2] > extent[0] {
        2
    } else {
        0
    }
}

/// Agglomerative nearest-neighbour chain within one pre-split group,
/// accelerated by the group's own kD-tree. The region holds the group's
/// `m` leaves followed by `m - 1` free interior slots; the returned root
/// and all packed child indices are global (region base + local offset).
fn cluster_group(region: &mut [TlasNode], base: u32) -> u32 {
    let m = (region.len() + 1) / 2;
    if m == 1 {
        return base;
    }
    let mut tree = KdTree::new(base, region.len());
    let leaves: Vec<(u32, Aabb)> = (0..m).map(|k| (base + k as u32, region[k].aabb())).collect();
    tree.rebuild(&leaves);

    let mut next = m;
    let mut work_left = m;
    let mut a = base;
    let mut b = tree.find_nearest(a, a, INF).0;
    loop {
        let sa_ab = region[(a - base) as usize]
            .aabb()
            .merged_half_area(&region[(b - base) as usize].aabb());
        let (c, _) = tree.find_nearest(b, a, sa_ab);
        if c == a {
            let merged = Aabb::union(
                &region[(a - base) as usize].aabb(),
                &region[(b - base) as usize].aabb(),
            );
            region[next] = TlasNode::interior(merged, a, b);
            let new_id = base + next as u32;
            next += 1;
            work_left -= 1;
            if work_left == 1 {
                return new_id;
            }
            tree.remove_leaf(a);
            tree.remove_leaf(b);
            tree.add(new_id, merged);
            a = new_id;
            b = tree.find_nearest(a, a, INF).0;
        } else {
            a = b;
            b = c;
        }
    }
}
