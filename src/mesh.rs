// src/mesh.rs
// Triangle store consumed by BLAS build and traversal: positions with cached
// centroids, plus optional per-triangle shading attributes.
// RELEVANT FILES:src/blas.rs,src/types.rs

use glam::{Vec2, Vec3};

use crate::error::{AccelError, Result};
use crate::types::Aabb;

/// A single triangle with its cached centroid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tri {
    pub v0: Vec3,
    pub v1: Vec3,
    pub v2: Vec3,
    /// Derived state; recomputed at the start of every build.
    pub centroid: Vec3,
}

impl Tri {
    pub fn new(v0: Vec3, v1: Vec3, v2: Vec3) -> Self {
        Self {
            v0,
            v1,
            v2,
            centroid: (v0 + v1 + v2) / 3.0,
        }
    }

    pub(crate) fn update_centroid(&mut self) {
        self.centroid = (self.v0 + self.v1 + self.v2) / 3.0;
    }

    pub fn aabb(&self) -> Aabb {
        let mut aabb = Aabb::empty();
        aabb.grow(self.v0);
        aabb.grow(self.v1);
        aabb.grow(self.v2);
        aabb
    }
}

/// Per-triangle shading attributes. Traversal never reads these; they exist
/// so a hit's barycentrics can be resolved to a surface normal and UV.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TriAttr {
    pub n0: Vec3,
    pub n1: Vec3,
    pub n2: Vec3,
    pub uv0: Vec2,
    pub uv1: Vec2,
    pub uv2: Vec2,
}

impl TriAttr {
    /// Vertex normal interpolated at hit barycentrics (u, v). Not
    /// renormalized.
    pub fn normal_at(&self, u: f32, v: f32) -> Vec3 {
        (1.0 - u - v) * self.n0 + u * self.n1 + v * self.n2
    }

    pub fn uv_at(&self, u: f32, v: f32) -> Vec2 {
        (1.0 - u - v) * self.uv0 + u * self.uv1 + v * self.uv2
    }
}

/// Triangle mesh: the source a BLAS is built over and traversed against.
/// Vertex mutation is permitted only between build/refit calls.
#[derive(Debug, Clone, Default)]
pub struct TriMesh {
    tris: Vec<Tri>,
    attrs: Vec<TriAttr>,
}

impl TriMesh {
    pub fn from_triangles(tris: Vec<Tri>) -> Self {
        Self {
            tris,
            attrs: Vec::new(),
        }
    }

    /// Builds the triangle list from shared vertex positions and per-triangle
    /// vertex indices.
    pub fn from_vertices(vertices: &[[f32; 3]], indices: &[[u32; 3]]) -> Result<Self> {
        let mut tris = Vec::with_capacity(indices.len());
        for (tri, idx) in indices.iter().enumerate() {
            for &vertex in idx {
                if vertex as usize >= vertices.len() {
                    return Err(AccelError::invalid_mesh(format!(
                        "triangle {tri} references vertex {vertex} out of range ({} vertices)",
                        vertices.len()
                    )));
                }
            }
            tris.push(Tri::new(
                Vec3::from(vertices[idx[0] as usize]),
                Vec3::from(vertices[idx[1] as usize]),
                Vec3::from(vertices[idx[2] as usize]),
            ));
        }
        Ok(Self {
            tris,
            attrs: Vec::new(),
        })
    }

    /// Attaches shading attributes; the count must match the triangle count.
    pub fn set_attrs(&mut self, attrs: Vec<TriAttr>) -> Result<()> {
        if attrs.len() != self.tris.len() {
            return Err(AccelError::invalid_mesh(format!(
                "{} attribute records for {} triangles",
                attrs.len(),
                self.tris.len()
            )));
        }
        self.attrs = attrs;
        Ok(())
    }

    pub fn tri_count(&self) -> usize {
        self.tris.len()
    }

    pub fn tris(&self) -> &[Tri] {
        &self.tris
    }

    /// Mutable triangle access for animation. Cached centroids may go stale
    /// here; the next build recomputes them, and refit does not need them.
    pub fn tris_mut(&mut self) -> &mut [Tri] {
        &mut self.tris
    }

    pub fn attrs(&self) -> &[TriAttr] {
        &self.attrs
    }

    pub(crate) fn update_centroids(&mut self) {
        for tri in &mut self.tris {
            tri.update_centroid();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_vertices_builds_centroids() {
        let mesh = TriMesh::from_vertices(
            &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0]],
            &[[0, 1, 2]],
        )
        .unwrap();
        assert_eq!(mesh.tri_count(), 1);
        let c = mesh.tris()[0].centroid;
        assert!((c.x - 0.5).abs() < 1e-6);
        assert!((c.y - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(c.z, 0.0);
    }

    #[test]
    fn from_vertices_rejects_bad_index() {
        let result = TriMesh::from_vertices(&[[0.0; 3], [1.0, 0.0, 0.0]], &[[0, 1, 2]]);
        assert!(matches!(result, Err(AccelError::InvalidMesh(_))));
    }

    #[test]
    fn attr_interpolation() {
        let attr = TriAttr {
            n0: Vec3::X,
            n1: Vec3::Y,
            n2: Vec3::Z,
            uv0: Vec2::new(0.0, 0.0),
            uv1: Vec2::new(1.0, 0.0),
            uv2: Vec2::new(0.0, 1.0),
        };
        let n = attr.normal_at(0.25, 0.25);
        assert_eq!(n, Vec3::new(0.5, 0.25, 0.25));
        assert_eq!(attr.uv_at(0.25, 0.25), Vec2::new(0.25, 0.25));
    }
}
