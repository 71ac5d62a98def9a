//! Finite-difference checks of every energy term, the constraint
//! Jacobians, and the augmented Lagrangian built on top of them.
//!
//! Each analytic gradient is compared component by component against
//!
//!     dE/dx_i  ≈  [ E(x + h eᵢ) − E(x − h eᵢ) ] / 2h
//!
//! at a generic point (random frames, a perturbed rest mesh). Quadratic
//! terms additionally have their assembled Hessian compared against a
//! central difference of the gradient along a random direction.

mod common;

use common::*;
use fieldopt::assembly::assemble;
use fieldopt::functional::{AugmentedLagrangian, CompositeConstraint, CompositeEnergy};
use fieldopt::mesh::flatten_nodes;
use fieldopt::terms::*;
use fieldopt::{Constraint, Functional};
use nalgebra::Vector3;

const H: f64 = 1e-6;
const TOL_ABS: f64 = 1e-6;
const TOL_REL: f64 = 1e-4;

// ─────────────────────────────────────────────────────────────
//  Fixtures
// ─────────────────────────────────────────────────────────────

struct Frames {
    n: usize,
    pairs: PairAdjacency,
    normals: BoundaryNormals,
    volumes: Vec<f64>,
}

fn frames_on(k: usize) -> Frames {
    let mesh = cube_grid(k);
    let adjacency = mesh.face_adjacency().unwrap();
    Frames {
        n: mesh.num_tets(),
        pairs: PairAdjacency::from_tets(&mesh, &adjacency),
        normals: BoundaryNormals::from_faces(&mesh, &adjacency.boundary),
        volumes: mesh.volumes(),
    }
}

/// Kuhn-cube node coordinates moved by up to `amplitude` per component.
fn perturbed_cube(amplitude: f64, seed: u64) -> (fieldopt::mesh::TetMesh, Vec<f64>) {
    let mesh = kuhn_cube();
    let x: Vec<f64> = flatten_nodes(&mesh.nodes)
        .iter()
        .zip(pseudo_random(3 * mesh.num_nodes(), seed))
        .map(|(p, r)| p + amplitude * r)
        .collect();
    (mesh, x)
}

// ─────────────────────────────────────────────────────────────
//  Frame-field terms
// ─────────────────────────────────────────────────────────────

#[test]
fn fd_sh_smoothness() {
    let f = frames_on(2);
    let term = ShSmoothness::new(f.n, f.pairs, 1.3).unwrap();
    let x = pseudo_random(9 * f.n, 1);
    fd_gradient_check(&term, &x, H, TOL_ABS, TOL_REL);
    fd_hessian_check(&term, &x, &pseudo_random(9 * f.n, 2), 1e-4, 1e-6);
}

#[test]
fn fd_sh_alignment() {
    let f = frames_on(1);
    let term = ShAlignment::new(f.n, &f.normals, 0.7).unwrap();
    let x = pseudo_random(9 * f.n, 3);
    fd_gradient_check(&term, &x, H, TOL_ABS, TOL_REL);
    fd_hessian_check(&term, &x, &pseudo_random(9 * f.n, 4), 1e-4, 1e-6);
}

#[test]
fn fd_sh_alignment_on_oblique_normals() {
    let normals = BoundaryNormals::new(
        vec![0, 1, 1],
        vec![
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(-0.95, 0.1, 0.0),
            Vector3::new(0.0, 0.0, -1.0),
        ],
        vec![0.2, 0.5, 0.3],
    )
    .unwrap();
    let term = ShAlignment::new(2, &normals, 1.0).unwrap();
    let x = pseudo_random(18, 5);
    fd_gradient_check(&term, &x, H, TOL_ABS, TOL_REL);
}

#[test]
fn fd_frame_smoothness() {
    let f = frames_on(1);
    let term = FrameSmoothness::new(f.n, f.pairs, 1.0).unwrap();
    let x: Vec<f64> = pseudo_random(3 * f.n, 6).iter().map(|v| 3.0 * v).collect();
    fd_gradient_check(&term, &x, H, TOL_ABS, TOL_REL);
}

#[test]
fn fd_frame_alignment() {
    let f = frames_on(1);
    let term = FrameAlignment::new(f.n, f.normals, 2.0).unwrap();
    let x: Vec<f64> = pseudo_random(3 * f.n, 7).iter().map(|v| 3.0 * v).collect();
    fd_gradient_check(&term, &x, H, TOL_ABS, TOL_REL);
}

#[test]
fn fd_l1_smoothness() {
    let f = frames_on(1);
    let term = L1Smoothness::new(f.n, f.pairs, 1e-3, 1.0).unwrap();
    let x = pseudo_random(9 * f.n, 8);
    fd_gradient_check(&term, &x, H, TOL_ABS, TOL_REL);
}

#[test]
fn fd_orthogonality() {
    let f = frames_on(1);
    let term = Orthogonality::new(f.volumes, 0.5);
    let x = pseudo_random(9 * f.n, 9);
    fd_gradient_check(&term, &x, H, TOL_ABS, TOL_REL);
}

#[test]
fn fd_boundary_fix() {
    let mesh = kuhn_cube();
    let adjacency = mesh.face_adjacency().unwrap();
    let target = pseudo_random(3 * mesh.num_tets(), 10);
    let term = BoundaryFix::on_boundary_faces(&mesh, &adjacency, 3, target, 1.5).unwrap();
    let x = pseudo_random(3 * mesh.num_tets(), 11);
    fd_gradient_check(&term, &x, H, TOL_ABS, TOL_REL);
    fd_hessian_check(&term, &x, &pseudo_random(x.len(), 12), 1e-4, 1e-6);
}

// ─────────────────────────────────────────────────────────────
//  Mesh terms
// ─────────────────────────────────────────────────────────────

#[test]
fn fd_dirichlet_with_rhs() {
    let mesh = planar_grid(4);
    let n = mesh.num_nodes();
    let l = assemble(n, n, &mesh.laplacian()).unwrap();
    let term = Dirichlet::new(l, 0.8)
        .unwrap()
        .with_rhs(pseudo_random(n, 13))
        .unwrap();
    let x = pseudo_random(n, 14);
    fd_gradient_check(&term, &x, H, TOL_ABS, TOL_REL);
    fd_hessian_check(&term, &x, &pseudo_random(n, 15), 1e-4, 1e-6);
}

#[test]
fn fd_tet_distortion() {
    let (mesh, x) = perturbed_cube(0.1, 16);
    let term = TetDistortion::new(&mesh, 1.0).unwrap();
    fd_gradient_check(&term, &x, H, TOL_ABS, TOL_REL);
}

#[test]
fn fd_normal_alignment() {
    let (mesh, x) = perturbed_cube(0.1, 17);
    let adjacency = mesh.face_adjacency().unwrap();
    let term = NormalAlignment::new(&mesh, &adjacency, 1e-2, 1.0).unwrap();
    fd_gradient_check(&term, &x, H, TOL_ABS, TOL_REL);
}

// ─────────────────────────────────────────────────────────────
//  Constraints
// ─────────────────────────────────────────────────────────────

#[test]
fn fd_surface_area_jacobian() {
    let (mesh, x) = perturbed_cube(0.1, 18);
    let adjacency = mesh.face_adjacency().unwrap();
    let area = SurfaceArea::new(&mesh, &adjacency).unwrap();

    let mut jac = Vec::new();
    area.jac(&x, 0, &mut jac);
    let mut analytic = vec![0.0; x.len()];
    for t in &jac {
        assert_eq!(t.row, 0);
        analytic[t.col] += t.value;
    }

    let mut xp = x.clone();
    let mut c = [0.0];
    for i in 0..x.len() {
        xp[i] = x[i] + H;
        area.val(&xp, &mut c);
        let plus = c[0];
        xp[i] = x[i] - H;
        area.val(&xp, &mut c);
        let minus = c[0];
        xp[i] = x[i];
        let fd = (plus - minus) / (2.0 * H);
        assert!(
            (analytic[i] - fd).abs() < TOL_ABS || (analytic[i] - fd).abs() < TOL_REL * fd.abs(),
            "surface area: component {i}: analytic={:.8e}, fd={fd:.8e}",
            analytic[i],
        );
    }
}

#[test]
fn fd_augmented_lagrangian() {
    let (mesh, x) = perturbed_cube(0.1, 19);
    let adjacency = mesh.face_adjacency().unwrap();
    let rest = flatten_nodes(&mesh.nodes);

    let terms: Vec<Option<Term>> = vec![
        Some(TetDistortion::new(&mesh, 1.0).unwrap().into()),
        Some(NormalAlignment::new(&mesh, &adjacency, 1e-2, 0.5).unwrap().into()),
    ];
    let constraints: Vec<Option<ConstraintTerm>> = vec![
        Some(SurfaceArea::new(&mesh, &adjacency).unwrap().into()),
        Some(Anchor::vertex(&rest, 0).unwrap().into()),
    ];
    let energy = CompositeEnergy::new(&terms).unwrap();
    let stack = CompositeConstraint::new(&constraints).unwrap();

    let mut lagrangian = AugmentedLagrangian::new(&energy, &stack, 10.0).unwrap();
    lagrangian.lambdas = vec![0.3, -0.1, 0.2, 0.05];
    fd_gradient_check(&lagrangian, &x, H, TOL_ABS, TOL_REL);
}
