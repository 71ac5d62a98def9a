//! Energy and constraint terms over per-element variable blocks.
//!
//! Every term precomputes its normalized weights and topology once, then
//! evaluates elements in parallel with rayon. Gradients are computed per
//! element into local buffers and scattered into the shared output after
//! the parallel region, since neighbouring elements write the same rows.

use crate::assembly::{add_dense_block, add_diag_block, dot, mul_vec};
use crate::frame;
use crate::functional::{Constraint, Functional};
use crate::kernels;
use crate::mesh::{normalize_weights, BoundaryFace, FaceAdjacency, TetMesh};
use crate::types::{Error, Result, Triplet};
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use rayon::prelude::*;
use sprs::CsMat;

#[inline]
fn block(x: &[f64], e: usize, n: usize) -> &[f64] {
    &x[n * e..n * e + n]
}

fn matrix_block(x: &[f64], e: usize) -> Matrix3<f64> {
    Matrix3::from_column_slice(block(x, e, 9))
}

fn add_block(g: &mut [f64], e: usize, values: &[f64]) {
    let n = values.len();
    for (gi, v) in g[n * e..n * e + n].iter_mut().zip(values) {
        *gi += v;
    }
}

fn sub_block(g: &mut [f64], e: usize, values: &[f64]) {
    let n = values.len();
    for (gi, v) in g[n * e..n * e + n].iter_mut().zip(values) {
        *gi -= v;
    }
}

fn check_elements(
    term: &str,
    indices: impl IntoIterator<Item = usize>,
    count: usize,
) -> Result<()> {
    match indices.into_iter().find(|&e| e >= count) {
        Some(bad) => Err(Error::Shape(format!(
            "{term}: element {bad} out of range for {count} elements"
        ))),
        None => Ok(()),
    }
}

/// Per-element ZYZ frames and their partials.
fn zyz_frames(x: &[f64], num_elems: usize) -> Vec<(Matrix3<f64>, [Matrix3<f64>; 3])> {
    (0..num_elems)
        .into_par_iter()
        .map(|e| {
            let abc = block(x, e, 3);
            (frame::zyz_to_matrix(abc), frame::zyz_jacobian(abc))
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────
//  Topology tables
// ─────────────────────────────────────────────────────────────

/// Pairs of adjacent elements with a stiffness per pair.
#[derive(Debug, Clone, Default)]
pub struct PairAdjacency {
    pairs: Vec<(usize, usize)>,
    stiffness: Vec<f64>,
}

impl PairAdjacency {
    /// Raw table; stiffness is used as given.
    pub fn new(pairs: Vec<(usize, usize)>, stiffness: Vec<f64>) -> Result<Self> {
        if pairs.len() != stiffness.len() {
            return Err(Error::Shape(format!(
                "{} pairs but {} stiffness values",
                pairs.len(),
                stiffness.len()
            )));
        }
        Ok(Self { pairs, stiffness })
    }

    /// Interior face pairs of a tet mesh with stiffness
    /// `(vol_a + vol_b) / |c_a - c_b|²`, normalized to sum to 1.
    pub fn from_tets(mesh: &TetMesh, adjacency: &FaceAdjacency) -> Self {
        let volumes = mesh.volumes();
        let mut stiffness: Vec<f64> = adjacency
            .interior
            .par_iter()
            .map(|&(a, b)| {
                let d2 = (mesh.centroid(a) - mesh.centroid(b)).norm_squared();
                (volumes[a] + volumes[b]) / d2
            })
            .collect();
        normalize_weights(&mut stiffness);
        Self {
            pairs: adjacency.interior.clone(),
            stiffness,
        }
    }

    pub fn pairs(&self) -> &[(usize, usize)] {
        &self.pairs
    }

    pub fn stiffness(&self) -> &[f64] {
        &self.stiffness
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    fn check(&self, term: &str, num_elems: usize) -> Result<()> {
        check_elements(
            term,
            self.pairs.iter().flat_map(|&(a, b)| [a, b]),
            num_elems,
        )
    }

    fn par_entries(&self) -> impl IndexedParallelIterator<Item = (&(usize, usize), &f64)> + '_ {
        self.pairs.par_iter().zip(self.stiffness.par_iter())
    }
}

/// Boundary faces reduced to (incident element, unit normal, weight).
#[derive(Debug, Clone, Default)]
pub struct BoundaryNormals {
    elements: Vec<usize>,
    normals: Vec<Vector3<f64>>,
    weights: Vec<f64>,
}

impl BoundaryNormals {
    /// Raw table; normals are normalized, weights used as given.
    pub fn new(
        elements: Vec<usize>,
        normals: Vec<Vector3<f64>>,
        weights: Vec<f64>,
    ) -> Result<Self> {
        if elements.len() != normals.len() || elements.len() != weights.len() {
            return Err(Error::Shape(format!(
                "{} elements, {} normals, {} weights",
                elements.len(),
                normals.len(),
                weights.len()
            )));
        }
        let normals = normals.iter().map(|n| n.normalize()).collect();
        Ok(Self {
            elements,
            normals,
            weights,
        })
    }

    /// Outward normals of the boundary faces, weighted by face area
    /// normalized to sum to 1. Degenerate faces are dropped.
    pub fn from_faces(mesh: &TetMesh, faces: &[BoundaryFace]) -> Self {
        let mut table = Self::default();
        for face in faces {
            let area_vector = mesh.face_area_vector(face);
            let area = area_vector.norm();
            if area > 0.0 {
                table.elements.push(face.tet);
                table.normals.push(area_vector / area);
                table.weights.push(area);
            }
        }
        normalize_weights(&mut table.weights);
        table
    }

    pub fn elements(&self) -> &[usize] {
        &self.elements
    }

    pub fn normals(&self) -> &[Vector3<f64>] {
        &self.normals
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────
//  SH smoothness  (9 per element, quadratic)
// ─────────────────────────────────────────────────────────────

/// `w Σ k_ab |f_a - f_b|²` over adjacent elements.
#[derive(Debug, Clone)]
pub struct ShSmoothness {
    num_elems: usize,
    adjacency: PairAdjacency,
    weight: f64,
}

impl ShSmoothness {
    pub fn new(num_elems: usize, adjacency: PairAdjacency, weight: f64) -> Result<Self> {
        adjacency.check("sh smoothness", num_elems)?;
        Ok(Self {
            num_elems,
            adjacency,
            weight,
        })
    }
}

impl Functional for ShSmoothness {
    fn name(&self) -> &'static str {
        "sh smoothness"
    }

    fn nx(&self) -> usize {
        9 * self.num_elems
    }

    fn val(&self, x: &[f64]) -> f64 {
        self.adjacency
            .par_entries()
            .map(|(&(a, b), &k)| {
                let d2: f64 = block(x, a, 9)
                    .iter()
                    .zip(block(x, b, 9))
                    .map(|(fa, fb)| (fa - fb).powi(2))
                    .sum();
                self.weight * k * d2
            })
            .sum()
    }

    fn gra(&self, x: &[f64], g: &mut [f64]) {
        let local: Vec<[f64; 9]> = self
            .adjacency
            .par_entries()
            .map(|(&(a, b), &k)| {
                let (fa, fb) = (block(x, a, 9), block(x, b, 9));
                std::array::from_fn(|i| 2.0 * self.weight * k * (fa[i] - fb[i]))
            })
            .collect();
        for (&(a, b), d) in self.adjacency.pairs().iter().zip(&local) {
            add_block(g, a, d);
            sub_block(g, b, d);
        }
    }

    fn hes(&self, _x: &[f64], hes: &mut Vec<Triplet>) -> Result<()> {
        for (&(a, b), &k) in self.adjacency.pairs().iter().zip(self.adjacency.stiffness()) {
            let c = 2.0 * self.weight * k;
            add_diag_block(hes, 9 * a, 9 * a, 9, c);
            add_diag_block(hes, 9 * b, 9 * b, 9, c);
            add_diag_block(hes, 9 * a, 9 * b, 9, -c);
            add_diag_block(hes, 9 * b, 9 * a, 9, -c);
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
//  SH alignment  (9 per element, quadratic)
// ─────────────────────────────────────────────────────────────

/// Quadratic form `k (fᵀQf - 2bᵀf + t²)` of one boundary face.
#[derive(Debug, Clone)]
struct AlignedFace {
    element: usize,
    stiffness: f64,
    q: SMatrix<f64, 9, 9>,
    b: SVector<f64, 9>,
    tt: f64,
}

/// Pulls boundary SH coefficients towards frames with an axis along the
/// face normal.
///
/// With `A = D(R_nᵀ)` rotating the normal onto `z`, an aligned field has
/// `(A f)_m = 0` for `m = ±1, ±2, ±3` and `(A f)_0` equal to the
/// canonical value; `m = ±4` is the free twist about the normal.
#[derive(Debug, Clone)]
pub struct ShAlignment {
    num_elems: usize,
    faces: Vec<AlignedFace>,
    weight: f64,
}

impl ShAlignment {
    pub fn new(num_elems: usize, normals: &BoundaryNormals, weight: f64) -> Result<Self> {
        check_elements("sh alignment", normals.elements().iter().copied(), num_elems)?;
        let target = frame::canonical_sh()[4];
        let faces = (0..normals.len())
            .into_par_iter()
            .map(|i| {
                let a = frame::wigner(&frame::normal_frame(&normals.normals()[i]).transpose());
                let mut q = SMatrix::<f64, 9, 9>::zeros();
                for m in 1..8 {
                    let row = a.row(m);
                    q += row.transpose() * row;
                }
                AlignedFace {
                    element: normals.elements()[i],
                    stiffness: normals.weights()[i],
                    q,
                    b: a.row(4).transpose() * target,
                    tt: target * target,
                }
            })
            .collect();
        Ok(Self {
            num_elems,
            faces,
            weight,
        })
    }
}

impl Functional for ShAlignment {
    fn name(&self) -> &'static str {
        "sh alignment"
    }

    fn nx(&self) -> usize {
        9 * self.num_elems
    }

    fn val(&self, x: &[f64]) -> f64 {
        self.faces
            .par_iter()
            .map(|face| {
                let f = SVector::<f64, 9>::from_column_slice(block(x, face.element, 9));
                let e = f.dot(&(face.q * f)) - 2.0 * face.b.dot(&f) + face.tt;
                self.weight * face.stiffness * e
            })
            .sum()
    }

    fn gra(&self, x: &[f64], g: &mut [f64]) {
        let local: Vec<SVector<f64, 9>> = self
            .faces
            .par_iter()
            .map(|face| {
                let f = SVector::<f64, 9>::from_column_slice(block(x, face.element, 9));
                (face.q * f - face.b) * (2.0 * self.weight * face.stiffness)
            })
            .collect();
        for (face, d) in self.faces.iter().zip(&local) {
            add_block(g, face.element, d.as_slice());
        }
    }

    fn hes(&self, _x: &[f64], hes: &mut Vec<Triplet>) -> Result<()> {
        for face in &self.faces {
            let h = face.q * (2.0 * self.weight * face.stiffness);
            let row_major: Vec<f64> = h.transpose().as_slice().to_vec();
            let base = 9 * face.element;
            add_dense_block(hes, base, base, 9, &row_major);
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
//  Frame smoothness / alignment  (ZYZ, 3 per element)
// ─────────────────────────────────────────────────────────────

/// `w Σ k_ab (6 - 2 Σ (RaᵀRb)⁴)` over adjacent ZYZ frames.
#[derive(Debug, Clone)]
pub struct FrameSmoothness {
    num_elems: usize,
    adjacency: PairAdjacency,
    weight: f64,
}

impl FrameSmoothness {
    pub fn new(num_elems: usize, adjacency: PairAdjacency, weight: f64) -> Result<Self> {
        adjacency.check("frame smoothness", num_elems)?;
        Ok(Self {
            num_elems,
            adjacency,
            weight,
        })
    }
}

impl Functional for FrameSmoothness {
    fn name(&self) -> &'static str {
        "frame smoothness"
    }

    fn nx(&self) -> usize {
        3 * self.num_elems
    }

    fn val(&self, x: &[f64]) -> f64 {
        let frames: Vec<Matrix3<f64>> = (0..self.num_elems)
            .into_par_iter()
            .map(|e| frame::zyz_to_matrix(block(x, e, 3)))
            .collect();
        self.adjacency
            .par_entries()
            .map(|(&(a, b), &k)| {
                self.weight * k * kernels::frame_smoothness_loss(&frames[a], &frames[b])
            })
            .sum()
    }

    fn gra(&self, x: &[f64], g: &mut [f64]) {
        let frames = zyz_frames(x, self.num_elems);
        let local: Vec<([f64; 3], [f64; 3])> = self
            .adjacency
            .par_entries()
            .map(|(&(a, b), &k)| {
                let (ga, gb) = kernels::frame_smoothness_grad(&frames[a].0, &frames[b].0);
                let c = self.weight * k;
                (
                    kernels::zyz_pullback(&frames[a].1, &(ga * c)),
                    kernels::zyz_pullback(&frames[b].1, &(gb * c)),
                )
            })
            .collect();
        for (&(a, b), (da, db)) in self.adjacency.pairs().iter().zip(&local) {
            add_block(g, a, da);
            add_block(g, b, db);
        }
    }
}

/// `w Σ_f k_f (1 - Σ_j (r_j · n_f)⁴)` over boundary faces.
#[derive(Debug, Clone)]
pub struct FrameAlignment {
    num_elems: usize,
    normals: BoundaryNormals,
    weight: f64,
}

impl FrameAlignment {
    pub fn new(num_elems: usize, normals: BoundaryNormals, weight: f64) -> Result<Self> {
        check_elements("frame alignment", normals.elements().iter().copied(), num_elems)?;
        Ok(Self {
            num_elems,
            normals,
            weight,
        })
    }

    fn entries(&self) -> impl IndexedParallelIterator<Item = ((&usize, &Vector3<f64>), &f64)> + '_ {
        self.normals
            .elements
            .par_iter()
            .zip(self.normals.normals.par_iter())
            .zip(self.normals.weights.par_iter())
    }
}

impl Functional for FrameAlignment {
    fn name(&self) -> &'static str {
        "frame alignment"
    }

    fn nx(&self) -> usize {
        3 * self.num_elems
    }

    fn val(&self, x: &[f64]) -> f64 {
        self.entries()
            .map(|((&e, n), &k)| {
                let r = frame::zyz_to_matrix(block(x, e, 3));
                self.weight * k * kernels::frame_alignment_loss(&r, n)
            })
            .sum()
    }

    fn gra(&self, x: &[f64], g: &mut [f64]) {
        let local: Vec<[f64; 3]> = self
            .entries()
            .map(|((&e, n), &k)| {
                let abc = block(x, e, 3);
                let r = frame::zyz_to_matrix(abc);
                let dr = frame::zyz_jacobian(abc);
                let gr = kernels::frame_alignment_grad(&r, n) * (self.weight * k);
                kernels::zyz_pullback(&dr, &gr)
            })
            .collect();
        for (&e, d) in self.normals.elements().iter().zip(&local) {
            add_block(g, e, d);
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Matrix-field terms  (9 per element, column-major 3×3)
// ─────────────────────────────────────────────────────────────

/// `w Σ k_ab Σ_c sqrt((F_a - F_b)_c² + eps)`: smoothed L1 smoothness.
#[derive(Debug, Clone)]
pub struct L1Smoothness {
    num_elems: usize,
    adjacency: PairAdjacency,
    eps: f64,
    weight: f64,
}

impl L1Smoothness {
    pub fn new(num_elems: usize, adjacency: PairAdjacency, eps: f64, weight: f64) -> Result<Self> {
        adjacency.check("l1 smoothness", num_elems)?;
        if eps <= 0.0 {
            return Err(Error::InvalidOption {
                key: "abs_eps.value".into(),
                reason: format!("must be positive, got {eps}"),
            });
        }
        Ok(Self {
            num_elems,
            adjacency,
            eps,
            weight,
        })
    }
}

impl Functional for L1Smoothness {
    fn name(&self) -> &'static str {
        "l1 smoothness"
    }

    fn nx(&self) -> usize {
        9 * self.num_elems
    }

    fn val(&self, x: &[f64]) -> f64 {
        self.adjacency
            .par_entries()
            .map(|(&(a, b), &k)| {
                let s: f64 = block(x, a, 9)
                    .iter()
                    .zip(block(x, b, 9))
                    .map(|(fa, fb)| kernels::smoothed_abs(fa - fb, self.eps))
                    .sum();
                self.weight * k * s
            })
            .sum()
    }

    fn gra(&self, x: &[f64], g: &mut [f64]) {
        let local: Vec<[f64; 9]> = self
            .adjacency
            .par_entries()
            .map(|(&(a, b), &k)| {
                let (fa, fb) = (block(x, a, 9), block(x, b, 9));
                std::array::from_fn(|i| {
                    self.weight * k * kernels::smoothed_abs_grad(fa[i] - fb[i], self.eps)
                })
            })
            .collect();
        for (&(a, b), d) in self.adjacency.pairs().iter().zip(&local) {
            add_block(g, a, d);
            sub_block(g, b, d);
        }
    }
}

/// `w Σ_t v_t |F_tᵀF_t - I|²` with volumes normalized to sum to 1.
#[derive(Debug, Clone)]
pub struct Orthogonality {
    volumes: Vec<f64>,
    weight: f64,
}

impl Orthogonality {
    pub fn new(mut volumes: Vec<f64>, weight: f64) -> Self {
        normalize_weights(&mut volumes);
        Self { volumes, weight }
    }

    pub fn volumes(&self) -> &[f64] {
        &self.volumes
    }
}

impl Functional for Orthogonality {
    fn name(&self) -> &'static str {
        "orthogonality"
    }

    fn nx(&self) -> usize {
        9 * self.volumes.len()
    }

    fn val(&self, x: &[f64]) -> f64 {
        self.volumes
            .par_iter()
            .enumerate()
            .map(|(t, &v)| self.weight * v * kernels::orthogonality_loss(&matrix_block(x, t)))
            .sum()
    }

    fn gra(&self, x: &[f64], g: &mut [f64]) {
        g.par_chunks_exact_mut(9)
            .zip(self.volumes.par_iter())
            .enumerate()
            .for_each(|(t, (gt, &v))| {
                let d = kernels::orthogonality_grad(&matrix_block(x, t)) * (self.weight * v);
                for (gi, di) in gt.iter_mut().zip(d.as_slice()) {
                    *gi += di;
                }
            });
    }
}

// ─────────────────────────────────────────────────────────────
//  Boundary fixing  (dim per element)
// ─────────────────────────────────────────────────────────────

/// `w Σ_t k_t |x_t - x0_t|²` over a subset of elements.
#[derive(Debug, Clone)]
pub struct BoundaryFix {
    dim: usize,
    target: Vec<f64>,
    elements: Vec<usize>,
    stiffness: Vec<f64>,
    weight: f64,
}

impl BoundaryFix {
    /// `target` holds `dim` values for every element; `stiffness` is
    /// normalized to sum to 1.
    pub fn new(
        dim: usize,
        target: Vec<f64>,
        elements: Vec<usize>,
        mut stiffness: Vec<f64>,
        weight: f64,
    ) -> Result<Self> {
        if dim == 0 || target.len() % dim != 0 {
            return Err(Error::Shape(format!(
                "target of length {} is not a whole number of {dim}-blocks",
                target.len()
            )));
        }
        if elements.len() != stiffness.len() {
            return Err(Error::Shape(format!(
                "{} elements but {} stiffness values",
                elements.len(),
                stiffness.len()
            )));
        }
        check_elements("boundary fix", elements.iter().copied(), target.len() / dim)?;
        normalize_weights(&mut stiffness);
        Ok(Self {
            dim,
            target,
            elements,
            stiffness,
            weight,
        })
    }

    /// Pins the tets touching the surface with one entry per boundary face,
    /// weighted by face area; a tet with two surface faces counts twice.
    pub fn on_boundary_faces(
        mesh: &TetMesh,
        adjacency: &FaceAdjacency,
        dim: usize,
        target: Vec<f64>,
        weight: f64,
    ) -> Result<Self> {
        let (elements, stiffness): (Vec<usize>, Vec<f64>) = adjacency
            .boundary
            .iter()
            .map(|face| (face.tet, mesh.face_area_vector(face).norm()))
            .unzip();
        Self::new(dim, target, elements, stiffness, weight)
    }

    pub fn elements(&self) -> &[usize] {
        &self.elements
    }

    pub fn stiffness(&self) -> &[f64] {
        &self.stiffness
    }
}

impl Functional for BoundaryFix {
    fn name(&self) -> &'static str {
        "boundary fix"
    }

    fn nx(&self) -> usize {
        self.target.len()
    }

    fn val(&self, x: &[f64]) -> f64 {
        let d = self.dim;
        self.elements
            .iter()
            .zip(&self.stiffness)
            .map(|(&t, &k)| {
                let d2: f64 = block(x, t, d)
                    .iter()
                    .zip(block(&self.target, t, d))
                    .map(|(a, b)| (a - b).powi(2))
                    .sum();
                self.weight * k * d2
            })
            .sum()
    }

    fn gra(&self, x: &[f64], g: &mut [f64]) {
        let d = self.dim;
        for (&t, &k) in self.elements.iter().zip(&self.stiffness) {
            for i in d * t..d * t + d {
                g[i] += 2.0 * self.weight * k * (x[i] - self.target[i]);
            }
        }
    }

    fn hes(&self, _x: &[f64], hes: &mut Vec<Triplet>) -> Result<()> {
        let d = self.dim;
        for (&t, &k) in self.elements.iter().zip(&self.stiffness) {
            add_diag_block(hes, d * t, d * t, d, 2.0 * self.weight * k);
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
//  Dirichlet / Poisson  (1 per vertex, quadratic)
// ─────────────────────────────────────────────────────────────

/// `w (½ xᵀLx - bᵀx)` for a symmetric positive semi-definite `L`.
///
/// With `b = 0` this is the Dirichlet energy whose minimizers are harmonic;
/// with `b = div(g)` its minimizer has gradient closest to `g`.
#[derive(Debug, Clone)]
pub struct Dirichlet {
    laplacian: CsMat<f64>,
    rhs: Vec<f64>,
    weight: f64,
}

impl Dirichlet {
    pub fn new(laplacian: CsMat<f64>, weight: f64) -> Result<Self> {
        if laplacian.rows() != laplacian.cols() {
            return Err(Error::Shape(format!(
                "laplacian is {}×{}",
                laplacian.rows(),
                laplacian.cols()
            )));
        }
        let rhs = vec![0.0; laplacian.rows()];
        Ok(Self {
            laplacian,
            rhs,
            weight,
        })
    }

    pub fn with_rhs(mut self, rhs: Vec<f64>) -> Result<Self> {
        if rhs.len() != self.laplacian.rows() {
            return Err(Error::Shape(format!(
                "rhs has {} entries, laplacian is {}×{}",
                rhs.len(),
                self.laplacian.rows(),
                self.laplacian.cols()
            )));
        }
        self.rhs = rhs;
        Ok(self)
    }

    pub fn laplacian(&self) -> &CsMat<f64> {
        &self.laplacian
    }
}

impl Functional for Dirichlet {
    fn name(&self) -> &'static str {
        "dirichlet"
    }

    fn nx(&self) -> usize {
        self.laplacian.rows()
    }

    fn val(&self, x: &[f64]) -> f64 {
        let lx = mul_vec(&self.laplacian, x);
        self.weight * (0.5 * dot(x, &lx) - dot(&self.rhs, x))
    }

    fn gra(&self, x: &[f64], g: &mut [f64]) {
        let lx = mul_vec(&self.laplacian, x);
        for ((gi, l), b) in g.iter_mut().zip(&lx).zip(&self.rhs) {
            *gi += self.weight * (l - b);
        }
    }

    fn hes(&self, _x: &[f64], hes: &mut Vec<Triplet>) -> Result<()> {
        hes.extend(
            self.laplacian
                .iter()
                .map(|(&v, (r, c))| Triplet::new(r, c, self.weight * v)),
        );
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
//  Polycube terms  (3 per vertex)
// ─────────────────────────────────────────────────────────────

fn vertex(x: &[f64], i: usize) -> Vector3<f64> {
    Vector3::new(x[3 * i], x[3 * i + 1], x[3 * i + 2])
}

fn add_vertex(g: &mut [f64], i: usize, v: &Vector3<f64>) {
    add_block(g, i, v.as_slice());
}

/// `w Σ_t v_t |F_t - R(F_t)|²`: as-rigid-as-possible distortion of each tet
/// relative to the rest mesh.
#[derive(Debug, Clone)]
pub struct TetDistortion {
    num_nodes: usize,
    tets: Vec<[usize; 4]>,
    rest_inv: Vec<Matrix3<f64>>,
    volumes: Vec<f64>,
    weight: f64,
}

impl TetDistortion {
    pub fn new(mesh: &TetMesh, weight: f64) -> Result<Self> {
        let rest_inv = (0..mesh.num_tets())
            .map(|t| {
                let [p0, p1, p2, p3] = mesh.tets[t].map(|v| mesh.node(v));
                Matrix3::from_columns(&[p1 - p0, p2 - p0, p3 - p0])
                    .try_inverse()
                    .ok_or_else(|| Error::Shape(format!("tet {t} is degenerate")))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut volumes = mesh.volumes();
        normalize_weights(&mut volumes);
        Ok(Self {
            num_nodes: mesh.num_nodes(),
            tets: mesh.tets.clone(),
            rest_inv,
            volumes,
            weight,
        })
    }

    pub fn volumes(&self) -> &[f64] {
        &self.volumes
    }

    fn deformation_gradient(&self, x: &[f64], t: usize) -> Matrix3<f64> {
        let [p0, p1, p2, p3] = self.tets[t].map(|v| vertex(x, v));
        Matrix3::from_columns(&[p1 - p0, p2 - p0, p3 - p0]) * self.rest_inv[t]
    }
}

impl Functional for TetDistortion {
    fn name(&self) -> &'static str {
        "tet distortion"
    }

    fn nx(&self) -> usize {
        3 * self.num_nodes
    }

    fn val(&self, x: &[f64]) -> f64 {
        (0..self.tets.len())
            .into_par_iter()
            .map(|t| {
                let f = self.deformation_gradient(x, t);
                self.weight * self.volumes[t] * kernels::arap_loss(&f)
            })
            .sum()
    }

    fn gra(&self, x: &[f64], g: &mut [f64]) {
        let local: Vec<Matrix3<f64>> = (0..self.tets.len())
            .into_par_iter()
            .map(|t| {
                let f = self.deformation_gradient(x, t);
                let scale = self.weight * self.volumes[t];
                kernels::arap_grad(&f) * self.rest_inv[t].transpose() * scale
            })
            .collect();
        for (tet, h) in self.tets.iter().zip(&local) {
            let mut g0 = Vector3::zeros();
            for k in 0..3 {
                let col: Vector3<f64> = h.column(k).into_owned();
                add_vertex(g, tet[k + 1], &col);
                g0 -= col;
            }
            add_vertex(g, tet[0], &g0);
        }
    }
}

/// `w / A0 Σ_f Σ_c sqrt(N_c² + eps²)` over surface triangles, with `N` the
/// area vector and `A0` the rest surface area. Small when every face is
/// axis aligned.
#[derive(Debug, Clone)]
pub struct NormalAlignment {
    num_nodes: usize,
    faces: Vec<[usize; 3]>,
    rest_area: f64,
    eps: f64,
    weight: f64,
}

impl NormalAlignment {
    pub fn new(mesh: &TetMesh, adjacency: &FaceAdjacency, eps: f64, weight: f64) -> Result<Self> {
        if eps <= 0.0 {
            return Err(Error::InvalidOption {
                key: "abs_eps.value".into(),
                reason: format!("must be positive, got {eps}"),
            });
        }
        let rest_area = surface_area(mesh, &adjacency.boundary);
        if rest_area <= 0.0 {
            return Err(Error::Shape("mesh has no surface area".into()));
        }
        Ok(Self {
            num_nodes: mesh.num_nodes(),
            faces: adjacency.boundary.iter().map(|f| f.verts).collect(),
            rest_area,
            eps,
            weight,
        })
    }
}

fn surface_area(mesh: &TetMesh, faces: &[BoundaryFace]) -> f64 {
    faces.iter().map(|f| mesh.face_area_vector(f).norm()).sum()
}

fn face_corners(x: &[f64], face: &[usize; 3]) -> [Vector3<f64>; 3] {
    face.map(|v| vertex(x, v))
}

impl Functional for NormalAlignment {
    fn name(&self) -> &'static str {
        "normal alignment"
    }

    fn nx(&self) -> usize {
        3 * self.num_nodes
    }

    fn val(&self, x: &[f64]) -> f64 {
        let eps2 = self.eps * self.eps;
        let total: f64 = self
            .faces
            .par_iter()
            .map(|face| {
                let [a, b, c] = face_corners(x, face);
                kernels::area_vector(&a, &b, &c)
                    .iter()
                    .map(|&n| kernels::smoothed_abs(n, eps2))
                    .sum::<f64>()
            })
            .sum();
        self.weight * total / self.rest_area
    }

    fn gra(&self, x: &[f64], g: &mut [f64]) {
        let eps2 = self.eps * self.eps;
        let scale = self.weight / self.rest_area;
        let local: Vec<[Vector3<f64>; 3]> = self
            .faces
            .par_iter()
            .map(|face| {
                let [a, b, c] = face_corners(x, face);
                let s = kernels::area_vector(&a, &b, &c)
                    .map(|n| scale * kernels::smoothed_abs_grad(n, eps2));
                kernels::area_vector_pullback(&a, &b, &c, &s)
            })
            .collect();
        for (face, grads) in self.faces.iter().zip(&local) {
            for (&v, gv) in face.iter().zip(grads) {
                add_vertex(g, v, gv);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Constraints
// ─────────────────────────────────────────────────────────────

/// One row: `A(x) / A0 - 1`, the relative change of surface area.
#[derive(Debug, Clone)]
pub struct SurfaceArea {
    num_nodes: usize,
    faces: Vec<[usize; 3]>,
    rest_area: f64,
}

impl SurfaceArea {
    pub fn new(mesh: &TetMesh, adjacency: &FaceAdjacency) -> Result<Self> {
        let rest_area = surface_area(mesh, &adjacency.boundary);
        if rest_area <= 0.0 {
            return Err(Error::Shape("mesh has no surface area".into()));
        }
        Ok(Self {
            num_nodes: mesh.num_nodes(),
            faces: adjacency.boundary.iter().map(|f| f.verts).collect(),
            rest_area,
        })
    }

    pub fn area(&self, x: &[f64]) -> f64 {
        self.faces
            .iter()
            .map(|face| {
                let [a, b, c] = face_corners(x, face);
                kernels::area_vector(&a, &b, &c).norm()
            })
            .sum()
    }
}

impl Constraint for SurfaceArea {
    fn name(&self) -> &'static str {
        "surface area"
    }

    fn nx(&self) -> usize {
        3 * self.num_nodes
    }

    fn nf(&self) -> usize {
        1
    }

    fn val(&self, x: &[f64], c: &mut [f64]) {
        c[0] = self.area(x) / self.rest_area - 1.0;
    }

    fn jac(&self, x: &[f64], row_offset: usize, jac: &mut Vec<Triplet>) {
        let mut row = vec![0.0; 3 * self.num_nodes];
        for face in &self.faces {
            let [a, b, c] = face_corners(x, face);
            let n = kernels::area_vector(&a, &b, &c);
            let len = n.norm();
            if len == 0.0 {
                continue;
            }
            let s = n / (len * self.rest_area);
            let grads = kernels::area_vector_pullback(&a, &b, &c, &s);
            for (&v, gv) in face.iter().zip(&grads) {
                add_vertex(&mut row, v, gv);
            }
        }
        jac.extend(
            row.iter()
                .enumerate()
                .filter(|(_, &v)| v != 0.0)
                .map(|(i, &v)| Triplet::new(row_offset, i, v)),
        );
    }
}

/// `x_i - v_i` for a list of pinned variables.
#[derive(Debug, Clone)]
pub struct Anchor {
    nx: usize,
    indices: Vec<usize>,
    values: Vec<f64>,
}

impl Anchor {
    pub fn new(nx: usize, indices: Vec<usize>, values: Vec<f64>) -> Result<Self> {
        if indices.len() != values.len() {
            return Err(Error::Shape(format!(
                "{} anchored indices but {} values",
                indices.len(),
                values.len()
            )));
        }
        check_elements("anchor", indices.iter().copied(), nx)?;
        Ok(Self {
            nx,
            indices,
            values,
        })
    }

    /// Pins the three coordinates of `vertex` at their values in `x`.
    pub fn vertex(x: &[f64], vertex: usize) -> Result<Self> {
        let indices: Vec<usize> = (3 * vertex..3 * vertex + 3).collect();
        check_elements("anchor", indices.iter().copied(), x.len())?;
        let values = indices.iter().map(|&i| x[i]).collect();
        Self::new(x.len(), indices, values)
    }
}

impl Constraint for Anchor {
    fn name(&self) -> &'static str {
        "anchor"
    }

    fn nx(&self) -> usize {
        self.nx
    }

    fn nf(&self) -> usize {
        self.indices.len()
    }

    fn val(&self, x: &[f64], c: &mut [f64]) {
        for ((ck, &i), &v) in c.iter_mut().zip(&self.indices).zip(&self.values) {
            *ck = x[i] - v;
        }
    }

    fn jac(&self, _x: &[f64], row_offset: usize, jac: &mut Vec<Triplet>) {
        jac.extend(
            self.indices
                .iter()
                .enumerate()
                .map(|(k, &i)| Triplet::new(row_offset + k, i, 1.0)),
        );
    }

    /// Linear rows have zero Hessian.
    fn hes(&self, _x: &[f64], _hes: &mut [Vec<Triplet>]) -> Result<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
//  Closed variant sets
// ─────────────────────────────────────────────────────────────

/// Every energy term a driver can put in its arena.
#[derive(Debug, Clone)]
pub enum Term {
    ShSmoothness(ShSmoothness),
    ShAlignment(ShAlignment),
    FrameSmoothness(FrameSmoothness),
    FrameAlignment(FrameAlignment),
    L1Smoothness(L1Smoothness),
    Orthogonality(Orthogonality),
    BoundaryFix(BoundaryFix),
    Dirichlet(Dirichlet),
    TetDistortion(TetDistortion),
    NormalAlignment(NormalAlignment),
}

impl Term {
    fn as_functional(&self) -> &dyn Functional {
        match self {
            Self::ShSmoothness(t) => t,
            Self::ShAlignment(t) => t,
            Self::FrameSmoothness(t) => t,
            Self::FrameAlignment(t) => t,
            Self::L1Smoothness(t) => t,
            Self::Orthogonality(t) => t,
            Self::BoundaryFix(t) => t,
            Self::Dirichlet(t) => t,
            Self::TetDistortion(t) => t,
            Self::NormalAlignment(t) => t,
        }
    }
}

impl Functional for Term {
    fn name(&self) -> &'static str {
        self.as_functional().name()
    }

    fn nx(&self) -> usize {
        self.as_functional().nx()
    }

    fn val(&self, x: &[f64]) -> f64 {
        self.as_functional().val(x)
    }

    fn gra(&self, x: &[f64], g: &mut [f64]) {
        self.as_functional().gra(x, g)
    }

    fn hes(&self, x: &[f64], hes: &mut Vec<Triplet>) -> Result<()> {
        self.as_functional().hes(x, hes)
    }
}

/// Every constraint block a driver can put in its arena.
#[derive(Debug, Clone)]
pub enum ConstraintTerm {
    SurfaceArea(SurfaceArea),
    Anchor(Anchor),
}

impl ConstraintTerm {
    fn as_constraint(&self) -> &dyn Constraint {
        match self {
            Self::SurfaceArea(c) => c,
            Self::Anchor(c) => c,
        }
    }
}

impl Constraint for ConstraintTerm {
    fn name(&self) -> &'static str {
        self.as_constraint().name()
    }

    fn nx(&self) -> usize {
        self.as_constraint().nx()
    }

    fn nf(&self) -> usize {
        self.as_constraint().nf()
    }

    fn val(&self, x: &[f64], c: &mut [f64]) {
        self.as_constraint().val(x, c)
    }

    fn jac(&self, x: &[f64], row_offset: usize, jac: &mut Vec<Triplet>) {
        self.as_constraint().jac(x, row_offset, jac)
    }

    fn hes(&self, x: &[f64], hes: &mut [Vec<Triplet>]) -> Result<()> {
        self.as_constraint().hes(x, hes)
    }
}

macro_rules! impl_from {
    ($target:ident: $($variant:ident),+ $(,)?) => {
        $(impl From<$variant> for $target {
            fn from(t: $variant) -> Self {
                Self::$variant(t)
            }
        })+
    };
}

impl_from!(Term: ShSmoothness, ShAlignment, FrameSmoothness, FrameAlignment, L1Smoothness,
    Orthogonality, BoundaryFix, Dirichlet, TetDistortion, NormalAlignment);
impl_from!(ConstraintTerm: SurfaceArea, Anchor);
