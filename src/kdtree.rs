// src/kdtree.rs
// Dynamic 3-D point index over TLAS cluster boxes, keyed by box centre.
// Supports median-split rebuild, add, remove, and best-merge queries with
// branch-and-bound pruning; this is what makes agglomerative clustering
// fast enough for per-frame TLAS builds.
// RELEVANT FILES:src/tlas.rs,src/types.rs

use glam::Vec3;

use crate::types::{Aabb, INF};

const NONE: u32 = u32::MAX;
const LEAF_CAPACITY: usize = 8;

/// One indexed member: a cluster id with its box and the box centre used as
/// the kD point.
#[derive(Debug, Clone, Copy)]
struct Entry {
    id: u32,
    point: Vec3,
    aabb: Aabb,
}

/// Tree node in the flat pool. Every node keeps the union of the member
/// boxes below it; leaves hold a small member bucket.
#[derive(Debug, Clone)]
struct KdNode {
    bounds: Aabb,
    axis: usize,
    split: f32,
    left: u32,
    right: u32,
    parent: u32,
    bucket: Vec<Entry>,
}

impl KdNode {
    fn is_leaf(&self) -> bool {
        self.left == NONE
    }

    fn leaf(parent: u32, bucket: Vec<Entry>) -> Self {
        let mut bounds = Aabb::empty();
        for e in &bucket {
            bounds.grow_aabb(&e.aabb);
        }
        Self {
            bounds,
            axis: 0,
            split: 0.0,
            left: NONE,
            right: NONE,
            parent,
            bucket,
        }
    }
}

/// kD-tree index over clusters identified by ids in `[base, base + capacity)`.
///
/// The tree caches each member's box at insertion time; callers re-add a
/// cluster if its box changes (the TLAS build only ever adds freshly merged
/// clusters). Inserts after a rebuild go into existing buckets without
/// re-splitting; the TLAS rebuilds the index at the start of every build, so
/// bucket growth stays bounded by the merge chain.
#[derive(Debug, Clone)]
pub struct KdTree {
    nodes: Vec<KdNode>,
    /// (id - base) -> containing leaf node, NONE when absent.
    slots: Vec<u32>,
    base: u32,
    len: usize,
}

impl KdTree {
    /// Creates an empty index accepting ids in `[base, base + capacity)`.
    pub fn new(base: u32, capacity: usize) -> Self {
        Self {
            nodes: Vec::new(),
            slots: vec![NONE; capacity],
            base,
            len: 0,
        }
    }

    /// Discards the current tree and rebuilds it over `items` by recursive
    /// median split on the widest point axis.
    pub fn rebuild(&mut self, items: &[(u32, Aabb)]) {
        self.nodes.clear();
        for s in &mut self.slots {
            *s = NONE;
        }
        self.len = items.len();
        if items.is_empty() {
            return;
        }
        let mut entries: Vec<Entry> = items
            .iter()
            .map(|&(id, aabb)| Entry {
                id,
                point: aabb.center(),
                aabb,
            })
            .collect();
        self.build_node(&mut entries, NONE);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts a member, descending to a leaf bucket and growing bounds
    /// along the path.
    pub fn add(&mut self, id: u32, aabb: Aabb) {
        let entry = Entry {
            id,
            point: aabb.center(),
            aabb,
        };
        self.len += 1;
        if self.nodes.is_empty() {
            self.nodes.push(KdNode::leaf(NONE, vec![entry]));
            self.slots[(id - self.base) as usize] = 0;
            return;
        }
        let mut idx = 0u32;
        loop {
            let node = &mut self.nodes[idx as usize];
            node.bounds.grow_aabb(&entry.aabb);
            if node.is_leaf() {
                node.bucket.push(entry);
                break;
            }
            idx = if entry.point[node.axis] < node.split {
                node.left
            } else {
                node.right
            };
        }
        self.slots[(id - self.base) as usize] = idx;
    }

    /// Removes a member and refits bounds along its leaf-to-root path,
    /// which is all [`Self::find_nearest`] needs to stay correct.
    pub fn remove_leaf(&mut self, id: u32) {
        let slot = (id - self.base) as usize;
        let leaf = self.slots[slot];
        debug_assert!(leaf != NONE, "cluster id not indexed");
        if leaf == NONE {
            return;
        }
        self.slots[slot] = NONE;
        let bucket = &mut self.nodes[leaf as usize].bucket;
        if let Some(pos) = bucket.iter().position(|e| e.id == id) {
            bucket.swap_remove(pos);
            self.len -= 1;
        }
        let mut idx = leaf;
        loop {
            let bounds = {
                let node = &self.nodes[idx as usize];
                if node.is_leaf() {
                    let mut b = Aabb::empty();
                    for e in &node.bucket {
                        b.grow_aabb(&e.aabb);
                    }
                    b
                } else {
                    Aabb::union(
                        &self.nodes[node.left as usize].bounds,
                        &self.nodes[node.right as usize].bounds,
                    )
                }
            };
            self.nodes[idx as usize].bounds = bounds;
            let parent = self.nodes[idx as usize].parent;
            if parent == NONE {
                break;
            }
            idx = parent;
        }
    }

    /// Returns the member (other than `a`) whose merged box with `a`'s has
    /// the smallest half-area, starting from an existing candidate bound.
    /// Ties break to the lowest id.
    pub fn find_nearest(&self, a: u32, best: u32, best_sa: f32) -> (u32, f32) {
        let query = self.member_aabb(a);
        let mut best = best;
        let mut best_sa = best_sa;
        if !self.nodes.is_empty() {
            self.search(0, a, &query, &mut best, &mut best_sa);
        }
        (best, best_sa)
    }

    fn member_aabb(&self, id: u32) -> Aabb {
        let leaf = self.slots[(id - self.base) as usize];
        self.nodes[leaf as usize]
            .bucket
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.aabb)
            .expect("cluster id not indexed")
    }

    fn build_node(&mut self, entries: &mut [Entry], parent: u32) -> u32 {
        if entries.len() <= LEAF_CAPACITY {
            let idx = self.nodes.len() as u32;
            self.nodes.push(KdNode::leaf(parent, entries.to_vec()));
            for e in entries {
                self.slots[(e.id - self.base) as usize] = idx;
            }
            return idx;
        }
        let mut pbounds = Aabb::empty();
        for e in entries.iter() {
            pbounds.grow(e.point);
        }
        let ext = pbounds.extent();
        let axis = if ext.y > ext.x {
            if ext.z > ext.y {
                2
            } else {
                1
            }
        } else if ext.z > ext.x {
            2
        } else {
            0
        };
        let mid = entries.len() / 2;
        entries.select_nth_unstable_by(mid, |a, b| {
            a.point[axis]
                .partial_cmp(&b.point[axis])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let split = entries[mid].point[axis];
        let idx = self.nodes.len() as u32;
        self.nodes.push(KdNode {
            bounds: Aabb::empty(),
            axis,
            split,
            left: NONE,
            right: NONE,
            parent,
            bucket: Vec::new(),
        });
        let (lo, hi) = entries.split_at_mut(mid);
        let left = self.build_node(lo, idx);
        let right = self.build_node(hi, idx);
        let bounds = Aabb::union(
            &self.nodes[left as usize].bounds,
            &self.nodes[right as usize].bounds,
        );
        let node = &mut self.nodes[idx as usize];
        node.left = left;
        node.right = right;
        node.bounds = bounds;
        idx
    }

    fn search(&self, idx: u32, a: u32, query: &Aabb, best: &mut u32, best_sa: &mut f32) {
        let node = &self.nodes[idx as usize];
        if node.is_leaf() {
            for e in &node.bucket {
                if e.id == a {
                    continue;
                }
                let sa = query.merged_half_area(&e.aabb);
                if sa < *best_sa || (sa == *best_sa && e.id < *best) {
                    *best_sa = sa;
                    *best = e.id;
                }
            }
            return;
        }
        let lb_left = Self::merge_lower_bound(query, &self.nodes[node.left as usize].bounds);
        let lb_right = Self::merge_lower_bound(query, &self.nodes[node.right as usize].bounds);
        let (near, near_lb, far, far_lb) = if lb_left <= lb_right {
            (node.left, lb_left, node.right, lb_right)
        } else {
            (node.right, lb_right, node.left, lb_left)
        };
        // <= keeps equal-score candidates reachable for the id tie-break
        if near_lb <= *best_sa {
            self.search(near, a, query, best, best_sa);
        }
        if far_lb <= *best_sa {
            self.search(far, a, query, best, best_sa);
        }
    }

    /// Lower bound on the merge score against anything inside `cell`: grow
    /// the query box to the nearest point of the cell. Every member box lies
    /// within the cell, so its true merged box can only be larger.
    fn merge_lower_bound(query: &Aabb, cell: &Aabb) -> f32 {
        if !cell.is_valid() {
            return INF;
        }
        let nearest = cell.min.max(query.min).min(cell.max);
        let mut grown = *query;
        grown.grow(nearest);
        grown.half_area()
    }
}
