//! DOF elimination, sparse assembly and the linear backends.

use approx::assert_relative_eq;
use fieldopt::assembly::{assemble, mul_vec};
use fieldopt::dof::DofMap;
use fieldopt::functional::CompositeEnergy;
use fieldopt::linear::{solve, solve_quadratic_stage, Factorization, LinearBackend};
use fieldopt::terms::{Dirichlet, Term};
use fieldopt::types::{Error, Triplet};
use std::collections::BTreeSet;

// ─────────────────────────────────────────────────────────────
//  Helpers
// ─────────────────────────────────────────────────────────────

/// Graph Laplacian of the path 0 - 1 - ... - (n-1), plus `shift · I`.
fn path_laplacian(n: usize, shift: f64) -> Vec<Triplet> {
    let mut t = Vec::new();
    for i in 0..n - 1 {
        t.push(Triplet::new(i, i, 1.0));
        t.push(Triplet::new(i + 1, i + 1, 1.0));
        t.push(Triplet::new(i, i + 1, -1.0));
        t.push(Triplet::new(i + 1, i, -1.0));
    }
    t.extend((0..n).map(|i| Triplet::new(i, i, shift)));
    t
}

fn set(items: &[usize]) -> BTreeSet<usize> {
    items.iter().copied().collect()
}

// ─────────────────────────────────────────────────────────────
//  DofMap
// ─────────────────────────────────────────────────────────────

#[test]
fn dof_map_indices() {
    let dofs = DofMap::new(6, &set(&[1, 4])).unwrap();
    assert_eq!(dofs.num_total(), 6);
    assert_eq!(dofs.num_free(), 4);
    assert_eq!(dofs.free_indices(), &[0, 2, 3, 5]);
    assert_eq!(dofs.local(0), Some(0));
    assert_eq!(dofs.local(1), None);
    assert_eq!(dofs.local(5), Some(3));
    assert_eq!(dofs.local(6), None);
}

#[test]
fn dof_map_rejects_out_of_range() {
    assert!(matches!(DofMap::new(3, &set(&[3])), Err(Error::Shape(_))));
}

#[test]
fn scatter_leaves_excluded_entries_untouched() {
    let dofs = DofMap::new(5, &set(&[0, 3])).unwrap();
    let full = [10.0, 11.0, 12.0, 13.0, 14.0];
    let reduced = dofs.reduce_vector(&full).unwrap();
    assert_eq!(reduced, vec![11.0, 12.0, 14.0]);

    let mut out = [-1.0; 5];
    dofs.scatter(&reduced, &mut out).unwrap();
    assert_eq!(out, [-1.0, 11.0, 12.0, -1.0, 14.0]);

    assert_eq!(dofs.expand(&reduced).unwrap(), vec![0.0, 11.0, 12.0, 0.0, 14.0]);
    assert!(matches!(dofs.scatter(&[1.0], &mut out), Err(Error::Shape(_))));
    assert!(matches!(dofs.reduce_vector(&[1.0; 4]), Err(Error::Shape(_))));
}

#[test]
fn reduce_matrix_drops_rows_and_columns() {
    let triplets: Vec<Triplet> = (0..4)
        .flat_map(|i| (0..4).map(move |j| Triplet::new(i, j, (10 * i + j) as f64)))
        .collect();
    let a = assemble(4, 4, &triplets).unwrap();
    let dofs = DofMap::new(4, &set(&[1])).unwrap();
    let r = dofs.reduce_matrix(&a).unwrap();
    assert_eq!((r.rows(), r.cols()), (3, 3));
    let kept = [0, 2, 3];
    for (li, &gi) in kept.iter().enumerate() {
        for (lj, &gj) in kept.iter().enumerate() {
            let v = r.get(li, lj).copied().unwrap_or(0.0);
            assert_eq!(v, (10 * gi + gj) as f64);
        }
    }
    let wrong = assemble(3, 3, &[]).unwrap();
    assert!(matches!(dofs.reduce_matrix(&wrong), Err(Error::Shape(_))));
}

// ─────────────────────────────────────────────────────────────
//  Assembly
// ─────────────────────────────────────────────────────────────

#[test]
fn assembly_sums_duplicates() {
    let a = assemble(
        2,
        2,
        &[
            Triplet::new(0, 0, 1.0),
            Triplet::new(0, 0, 2.0),
            Triplet::new(1, 0, -1.0),
            Triplet::new(1, 1, 4.0),
        ],
    )
    .unwrap();
    assert_eq!(a.get(0, 0).copied(), Some(3.0));
    assert_eq!(mul_vec(&a, &[1.0, 1.0]), vec![3.0, 3.0]);
    assert!(matches!(
        assemble(2, 2, &[Triplet::new(2, 0, 1.0)]),
        Err(Error::Shape(_))
    ));
}

// ─────────────────────────────────────────────────────────────
//  Backends
// ─────────────────────────────────────────────────────────────

#[test]
fn cholesky_factorization_serves_several_right_hand_sides() {
    let a = assemble(6, 6, &path_laplacian(6, 0.5)).unwrap();
    let factor = Factorization::new(&a, LinearBackend::Cholesky).unwrap();
    assert_eq!(factor.dim(), 6);
    for seed in 0..3 {
        let rhs: Vec<f64> = (0..6).map(|i| ((i + seed) as f64).sin()).collect();
        let x = factor.solve(&rhs).unwrap();
        let ax = mul_vec(&a, &x);
        for (l, r) in ax.iter().zip(&rhs) {
            assert_relative_eq!(*l, *r, epsilon = 1e-10);
        }
    }
    assert!(matches!(factor.solve(&[1.0; 5]), Err(Error::Shape(_))));
}

#[test]
fn cholesky_rejects_indefinite_matrix() {
    let a = assemble(
        2,
        2,
        &[
            Triplet::new(0, 0, 1.0),
            Triplet::new(0, 1, 2.0),
            Triplet::new(1, 0, 2.0),
            Triplet::new(1, 1, 1.0),
        ],
    )
    .unwrap();
    assert!(matches!(
        Factorization::new(&a, LinearBackend::Cholesky),
        Err(Error::NotPositiveDefinite { .. })
    ));

    let x = solve(&a, &[3.0, 3.0], LinearBackend::Ldl).unwrap();
    assert_relative_eq!(x[0], 1.0, epsilon = 1e-12);
    assert_relative_eq!(x[1], 1.0, epsilon = 1e-12);
}

#[test]
fn non_square_matrix_is_rejected() {
    let a = assemble(2, 3, &[Triplet::new(0, 0, 1.0)]).unwrap();
    assert!(matches!(
        Factorization::new(&a, LinearBackend::Cholesky),
        Err(Error::Shape(_))
    ));
}

#[test]
fn conjugate_gradient_agrees_with_cholesky() {
    let n = 40;
    let a = assemble(n, n, &path_laplacian(n, 0.1)).unwrap();
    let rhs: Vec<f64> = (0..n).map(|i| (i as f64 * 0.37).cos()).collect();
    let direct = solve(&a, &rhs, LinearBackend::Cholesky).unwrap();
    let iterative = solve(&a, &rhs, LinearBackend::cg()).unwrap();
    for (d, c) in direct.iter().zip(&iterative) {
        assert_relative_eq!(*d, *c, epsilon = 1e-7, max_relative = 1e-7);
    }
}

#[test]
fn conjugate_gradient_reports_non_convergence() {
    let n = 40;
    let a = assemble(n, n, &path_laplacian(n, 1e-4)).unwrap();
    let rhs = vec![1.0; n];
    let backend = LinearBackend::ConjugateGradient {
        tolerance: 1e-14,
        max_iterations: 2,
    };
    assert!(matches!(solve(&a, &rhs, backend), Err(Error::LinearSolve(_))));
}

#[test]
fn backend_names() {
    assert_eq!(LinearBackend::from_name("cholesky").unwrap(), LinearBackend::Cholesky);
    assert_eq!(LinearBackend::from_name("CHOLMOD").unwrap(), LinearBackend::Cholesky);
    assert_eq!(LinearBackend::from_name("ldl").unwrap(), LinearBackend::Ldl);
    assert_eq!(LinearBackend::from_name("PETSc").unwrap(), LinearBackend::cg());
    assert!(matches!(
        LinearBackend::from_name("superlu"),
        Err(Error::InvalidOption { .. })
    ));
}

// ─────────────────────────────────────────────────────────────
//  Direct stage
// ─────────────────────────────────────────────────────────────

#[test]
fn quadratic_stage_interpolates_between_pinned_ends() {
    let n = 5;
    let l = assemble(n, n, &path_laplacian(n, 0.0)).unwrap();
    let terms = vec![Some(Term::from(Dirichlet::new(l, 1.0).unwrap()))];
    let energy = CompositeEnergy::new(&terms).unwrap();

    let mut x = vec![0.0, 7.0, -3.0, 2.0, 1.0];
    let value =
        solve_quadratic_stage(&energy, &mut x, &set(&[0, 4]), LinearBackend::Cholesky).unwrap();
    for (i, xi) in x.iter().enumerate() {
        assert_relative_eq!(*xi, i as f64 / 4.0, epsilon = 1e-12);
    }
    assert_relative_eq!(value, 0.5 * 4.0 * (0.25_f64).powi(2), epsilon = 1e-12);
}

#[test]
fn quadratic_stage_with_nothing_free_is_a_no_op() {
    let l = assemble(2, 2, &path_laplacian(2, 0.0)).unwrap();
    let terms = vec![Some(Term::from(Dirichlet::new(l, 1.0).unwrap()))];
    let energy = CompositeEnergy::new(&terms).unwrap();
    let mut x = vec![1.0, 3.0];
    let value = solve_quadratic_stage(&energy, &mut x, &set(&[0, 1]), LinearBackend::Ldl).unwrap();
    assert_eq!(x, vec![1.0, 3.0]);
    assert_relative_eq!(value, 2.0, epsilon = 1e-14);
}

#[test]
fn quadratic_stage_propagates_unsupported_hessian() {
    use fieldopt::terms::{Orthogonality};
    let terms = vec![Some(Term::from(Orthogonality::new(vec![1.0], 1.0)))];
    let energy = CompositeEnergy::new(&terms).unwrap();
    let mut x = vec![0.0; 9];
    assert!(matches!(
        solve_quadratic_stage(&energy, &mut x, &BTreeSet::new(), LinearBackend::Cholesky),
        Err(Error::Unsupported { .. })
    ));
}
