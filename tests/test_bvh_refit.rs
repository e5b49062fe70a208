// tests/test_bvh_refit.rs
// BVH refit for animated meshes: topology preservation, idempotence on
// unchanged geometry, and hit correctness after movement.
// RELEVANT FILES:src/blas.rs,src/mesh.rs

use anyhow::Result;
use beamline::{AccelError, Blas, Ray, Tri, TriMesh};
use glam::Vec3;

fn cube_mesh() -> TriMesh {
    let vertices = [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [1.0, 1.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [1.0, 0.0, 1.0],
        [1.0, 1.0, 1.0],
        [0.0, 1.0, 1.0],
    ];
    let indices = [
        [0, 1, 2],
        [0, 2, 3],
        [1, 5, 6],
        [1, 6, 2],
        [5, 4, 7],
        [5, 7, 6],
        [4, 0, 3],
        [4, 3, 7],
        [3, 2, 6],
        [3, 6, 7],
        [4, 5, 1],
        [4, 1, 0],
    ];
    TriMesh::from_vertices(&vertices, &indices).expect("cube mesh should build")
}

fn wave_mesh(phase: f32) -> TriMesh {
    let mut tris = Vec::new();
    for i in 0..48 {
        let x = i as f32 * 0.3;
        let y = (x + phase).sin();
        tris.push(Tri::new(
            Vec3::new(x, y, 0.0),
            Vec3::new(x + 0.25, y, 0.0),
            Vec3::new(x, y + 0.25, 0.2),
        ));
    }
    TriMesh::from_triangles(tris)
}

fn topology_snapshot(blas: &Blas) -> (Vec<u32>, Vec<(u32, u32)>) {
    let ranges = blas
        .nodes()
        .iter()
        .take(blas.nodes_used() as usize)
        .map(|n| (n.left_first, n.tri_count))
        .collect();
    (blas.tri_idx().to_vec(), ranges)
}

#[test]
fn refit_preserves_topology() -> Result<()> {
    let mut mesh = wave_mesh(0.0);
    let mut blas = Blas::build(&mut mesh)?;
    let before = topology_snapshot(&blas);

    // animate and refit
    let moved = wave_mesh(1.3);
    mesh.tris_mut().copy_from_slice(moved.tris());
    blas.refit(&mesh)?;

    assert_eq!(topology_snapshot(&blas), before);
    Ok(())
}

#[test]
fn refit_unchanged_mesh_is_identity() -> Result<()> {
    let mut mesh = wave_mesh(0.5);
    let mut blas = Blas::build(&mut mesh)?;
    let before: &[u8] = bytemuck::cast_slice(blas.nodes());
    let before = before.to_vec();

    blas.refit(&mesh)?;

    let after: &[u8] = bytemuck::cast_slice(blas.nodes());
    assert_eq!(after, &before[..], "refit of an unchanged mesh must not move any bound");
    Ok(())
}

#[test]
fn refit_keeps_bounds_enclosing() -> Result<()> {
    let mut mesh = wave_mesh(0.0);
    let mut blas = Blas::build(&mut mesh)?;

    let moved = wave_mesh(2.7);
    mesh.tris_mut().copy_from_slice(moved.tris());
    blas.refit(&mesh)?;

    for i in 0..blas.nodes_used() as usize {
        if i == 1 {
            continue;
        }
        let node = &blas.nodes()[i];
        if !node.is_leaf() {
            continue;
        }
        let aabb = node.aabb();
        for k in 0..node.tri_count {
            let tri_idx = blas.tri_idx()[(node.left_first + k) as usize];
            let tri = &mesh.tris()[tri_idx as usize];
            for v in [tri.v0, tri.v1, tri.v2] {
                assert!(aabb.contains(v), "refitted leaf must enclose its vertices");
            }
        }
    }
    Ok(())
}

#[test]
fn refit_translated_cube_hits_at_new_position() -> Result<()> {
    let mut mesh = cube_mesh();
    let mut blas = Blas::build(&mut mesh)?;

    for tri in mesh.tris_mut() {
        tri.v0.x += 5.0;
        tri.v1.x += 5.0;
        tri.v2.x += 5.0;
    }
    blas.refit(&mesh)?;

    let mut ray = Ray::new(Vec3::new(5.5, 0.5, -2.0), Vec3::Z);
    blas.intersect(&mut ray, &mesh, 0);
    assert!(ray.hit.is_hit());
    assert!((ray.hit.t - 2.0).abs() < 1e-4);

    // the old position no longer hits
    let mut stale = Ray::new(Vec3::new(0.5, 0.5, -2.0), Vec3::Z);
    blas.intersect(&mut stale, &mesh, 0);
    assert!(!stale.hit.is_hit());
    Ok(())
}

#[test]
fn refit_rejects_changed_triangle_count() -> Result<()> {
    let mut mesh = wave_mesh(0.0);
    let mut blas = Blas::build(&mut mesh)?;

    let smaller = wave_mesh(0.0);
    let truncated = TriMesh::from_triangles(smaller.tris()[..10].to_vec());

    let result = blas.refit(&truncated);
    assert!(matches!(result, Err(AccelError::TriCountChanged { .. })));
    Ok(())
}
