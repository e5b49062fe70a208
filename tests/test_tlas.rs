// tests/test_tlas.rs
// TLAS construction invariants, build determinism, and agreement between
// the reference agglomerative build and the fast parallel build.
// RELEVANT FILES:src/tlas.rs,src/kdtree.rs,src/instance.rs

use anyhow::Result;
use beamline::types::MAX_INSTANCES;
use beamline::{AccelError, Aabb, Blas, BlasInstance, Ray, Tlas, TriMesh};
use glam::{Mat4, Vec3};

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

/// A scene of scattered cube instances over a single BLAS.
fn scattered_scene(count: usize) -> (Vec<TriMesh>, Vec<Blas>, Vec<BlasInstance>) {
    let mut mesh = cube_mesh();
    let blas = Blas::build(&mut mesh).expect("cube build should succeed");
    let mut instances = Vec::with_capacity(count);
    for i in 0..count {
        let f = i as f32;
        let translation = Vec3::new(
            (f * 0.917).sin() * 25.0,
            (f * 1.271).cos() * 18.0,
            (f * 0.533).sin() * 21.0,
        );
        instances.push(BlasInstance::with_transform(
            0,
            &blas,
            Mat4::from_translation(translation),
        ));
    }
    (vec![mesh], vec![blas], instances)
}

fn check_tlas_invariants(tlas: &Tlas, instance_count: usize) {
    assert!(tlas.nodes_used() > 0);
    let nodes = tlas.nodes();
    let mut seen = vec![false; instance_count];
    let mut stack = vec![0u32];
    while let Some(idx) = stack.pop() {
        let node = &nodes[idx as usize];
        if node.is_leaf() {
            let inst = node.blas as usize;
            assert!(inst < instance_count);
            assert!(!seen[inst], "instance {inst} appears in more than one leaf");
            seen[inst] = true;
        } else {
            let left = nodes[node.left() as usize].aabb();
            let right = nodes[node.right() as usize].aabb();
            let merged = Aabb::union(&left, &right);
            assert_eq!(
                node.aabb(),
                merged,
                "interior bound must equal the fmin/fmax of its children"
            );
            stack.push(node.left());
            stack.push(node.right());
        }
    }
    assert!(
        seen.iter().all(|&s| s),
        "every instance must appear in exactly one leaf"
    );
}

#[test]
fn reference_build_invariants() -> Result<()> {
    for count in [1usize, 2, 3, 7, 16, 33] {
        let (_meshes, _blases, instances) = scattered_scene(count);
        let tlas = Tlas::build(&instances)?;
        check_tlas_invariants(&tlas, count);
        assert_eq!(tlas.stats().leaf_count as usize, count);
        assert_eq!(tlas.stats().node_count, tlas.nodes_used());
    }
    Ok(())
}

#[test]
fn fast_build_invariants() -> Result<()> {
    // worker counts of 0, non-powers-of-two, and more workers than
    // instances all clamp and must still produce a valid tree
    for count in [1usize, 2, 5, 8, 16, 29, 64] {
        for workers in [0usize, 1, 2, 4, 6, 8, 128] {
            let (_meshes, _blases, instances) = scattered_scene(count);
            let tlas = Tlas::build_fast(&instances, workers)?;
            check_tlas_invariants(&tlas, count);
        }
    }
    Ok(())
}

#[test]
fn reference_build_is_deterministic() -> Result<()> {
    let (_meshes, _blases, instances) = scattered_scene(24);
    let a = Tlas::build(&instances)?;
    let b = Tlas::build(&instances)?;
    let bytes_a: &[u8] = bytemuck::cast_slice(a.nodes());
    let bytes_b: &[u8] = bytemuck::cast_slice(b.nodes());
    assert_eq!(bytes_a, bytes_b, "identical inputs must give byte-identical pools");
    Ok(())
}

#[test]
fn fast_build_is_deterministic_per_worker_count() -> Result<()> {
    let (_meshes, _blases, instances) = scattered_scene(40);
    for workers in [1usize, 4, 8] {
        let a = Tlas::build_fast(&instances, workers)?;
        let b = Tlas::build_fast(&instances, workers)?;
        let bytes_a: &[u8] = bytemuck::cast_slice(a.nodes());
        let bytes_b: &[u8] = bytemuck::cast_slice(b.nodes());
        assert_eq!(bytes_a, bytes_b);
    }
    Ok(())
}

#[test]
fn reference_and_fast_builds_agree_on_hits() -> Result<()> {
    let (meshes, blases, instances) = scattered_scene(32);
    let reference = Tlas::build(&instances)?;
    let fast = Tlas::build_fast(&instances, 8)?;

    for i in 0..64 {
        let f = i as f32;
        let origin = Vec3::new(
            (f * 0.713).cos() * 40.0,
            (f * 0.291).sin() * 40.0,
            (f * 1.117).cos() * 40.0,
        );
        let target = Vec3::new((f * 0.437).sin() * 10.0, 0.0, (f * 0.731).cos() * 10.0);
        let dir = (target - origin).normalize();

        let mut ray_ref = Ray::new(origin, dir);
        reference.intersect(&mut ray_ref, &instances, &blases, &meshes);
        let mut ray_fast = Ray::new(origin, dir);
        fast.intersect(&mut ray_fast, &instances, &blases, &meshes);

        assert_eq!(ray_ref.hit.is_hit(), ray_fast.hit.is_hit());
        if ray_ref.hit.is_hit() {
            assert!(
                (ray_ref.hit.t - ray_fast.hit.t).abs() <= 1e-4,
                "closest hit diverged between builds"
            );
        }
    }
    Ok(())
}

#[test]
fn empty_instance_list_builds_empty_tree() -> Result<()> {
    let tlas = Tlas::build(&[])?;
    assert_eq!(tlas.nodes_used(), 0);

    let mut ray = Ray::new(Vec3::ZERO, Vec3::Z);
    tlas.intersect(&mut ray, &[], &[], &[]);
    assert!(!ray.hit.is_hit());

    let fast = Tlas::build_fast(&[], 8)?;
    assert_eq!(fast.nodes_used(), 0);
    Ok(())
}

#[test]
fn oversized_instance_list_rejected() {
    let instances = vec![BlasInstance::new(0); MAX_INSTANCES + 1];
    let result = Tlas::build(&instances);
    assert!(matches!(
        result,
        Err(AccelError::CapacityExceeded { what: "instance", .. })
    ));
    let result = Tlas::build_fast(&instances, 8);
    assert!(matches!(
        result,
        Err(AccelError::CapacityExceeded { what: "instance", .. })
    ));
}
