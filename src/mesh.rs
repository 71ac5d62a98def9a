//! Tetrahedral and triangle meshes, plus the geometric tables the energy
//! terms are built from.

use crate::types::{Error, Result, Triplet};
use nalgebra::Vector3;
use ndarray::Array2;

fn check_nodes(nodes: &Array2<f64>) -> Result<()> {
    if nodes.ncols() != 3 {
        return Err(Error::Shape(format!(
            "nodes must be n×3, got {}×{}",
            nodes.nrows(),
            nodes.ncols()
        )));
    }
    Ok(())
}

fn check_indices<const N: usize>(elements: &[[usize; N]], num_nodes: usize) -> Result<()> {
    for (e, element) in elements.iter().enumerate() {
        if let Some(&bad) = element.iter().find(|&&v| v >= num_nodes) {
            return Err(Error::Shape(format!(
                "element {e} references node {bad}, mesh has {num_nodes}"
            )));
        }
    }
    Ok(())
}

/// Sum of `w`, then `w /= sum`. A zero or non-finite sum leaves `w` as is.
pub fn normalize_weights(w: &mut [f64]) {
    let total: f64 = w.iter().sum();
    if total > 0.0 && total.is_finite() {
        for v in w.iter_mut() {
            *v /= total;
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Tetrahedral mesh
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TetMesh {
    pub tets: Vec<[usize; 4]>,
    /// Node positions (n × 3)
    pub nodes: Array2<f64>,
}

/// Surface triangle of a tet mesh, wound so its normal points outward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryFace {
    pub tet: usize,
    pub verts: [usize; 3],
}

/// Face-sharing structure of a tet mesh.
#[derive(Debug, Clone, Default)]
pub struct FaceAdjacency {
    /// Tets sharing an interior face, `(a, b)` with `a < b`.
    pub interior: Vec<(usize, usize)>,
    pub boundary: Vec<BoundaryFace>,
}

impl TetMesh {
    pub fn new(tets: Vec<[usize; 4]>, nodes: Array2<f64>) -> Result<Self> {
        check_nodes(&nodes)?;
        check_indices(&tets, nodes.nrows())?;
        Ok(Self { tets, nodes })
    }

    pub fn num_tets(&self) -> usize {
        self.tets.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.nrows()
    }

    pub fn node(&self, i: usize) -> Vector3<f64> {
        node_at(&self.nodes, i)
    }

    pub fn signed_volume(&self, t: usize) -> f64 {
        let [a, b, c, d] = self.tets[t].map(|v| self.node(v));
        (b - a).dot(&(c - a).cross(&(d - a))) / 6.0
    }

    pub fn volumes(&self) -> Vec<f64> {
        (0..self.num_tets()).map(|t| self.signed_volume(t).abs()).collect()
    }

    pub fn centroid(&self, t: usize) -> Vector3<f64> {
        self.tets[t].iter().map(|&v| self.node(v)).sum::<Vector3<f64>>() / 4.0
    }

    /// Interior tet pairs and outward-wound boundary faces.
    ///
    /// A face shared by more than two tets is rejected.
    pub fn face_adjacency(&self) -> Result<FaceAdjacency> {
        let mut faces: Vec<([usize; 3], usize, usize)> = Vec::with_capacity(4 * self.num_tets());
        for (t, tet) in self.tets.iter().enumerate() {
            for opposite in 0..4 {
                let mut key = [0; 3];
                let mut k = 0;
                for (i, &v) in tet.iter().enumerate() {
                    if i != opposite {
                        key[k] = v;
                        k += 1;
                    }
                }
                key.sort_unstable();
                faces.push((key, t, opposite));
            }
        }
        faces.sort_unstable();

        let mut adjacency = FaceAdjacency::default();
        for group in faces.chunk_by(|a, b| a.0 == b.0) {
            match group {
                [(key, t, opposite)] => {
                    adjacency.boundary.push(self.oriented_face(*key, *t, *opposite));
                }
                [(_, a, _), (_, b, _)] => adjacency.interior.push((*a.min(b), *a.max(b))),
                _ => {
                    return Err(Error::Shape(format!(
                        "face {:?} is shared by {} tets",
                        group[0].0,
                        group.len()
                    )));
                }
            }
        }
        Ok(adjacency)
    }

    fn oriented_face(&self, key: [usize; 3], tet: usize, opposite: usize) -> BoundaryFace {
        let [a, b, c] = key.map(|v| self.node(v));
        let apex = self.node(self.tets[tet][opposite]);
        let normal = (b - a).cross(&(c - a));
        let verts = if normal.dot(&(apex - a)) > 0.0 {
            [key[0], key[2], key[1]]
        } else {
            key
        };
        BoundaryFace { tet, verts }
    }

    /// Area-scaled outward normal of a boundary face.
    pub fn face_area_vector(&self, face: &BoundaryFace) -> Vector3<f64> {
        let [a, b, c] = face.verts.map(|v| self.node(v));
        0.5 * (b - a).cross(&(c - a))
    }
}

fn node_at(nodes: &Array2<f64>, i: usize) -> Vector3<f64> {
    Vector3::new(nodes[[i, 0]], nodes[[i, 1]], nodes[[i, 2]])
}

/// Node positions as an interleaved `[x0, y0, z0, x1, ...]` vector.
pub fn flatten_nodes(nodes: &Array2<f64>) -> Vec<f64> {
    nodes.iter().copied().collect()
}

/// Inverse of [`flatten_nodes`].
pub fn unflatten_nodes(x: &[f64]) -> Result<Array2<f64>> {
    if x.len() % 3 != 0 {
        return Err(Error::Shape(format!("{} values is not a multiple of 3", x.len())));
    }
    Array2::from_shape_vec((x.len() / 3, 3), x.to_vec()).map_err(|e| Error::Shape(e.to_string()))
}

// ─────────────────────────────────────────────────────────────
//  Triangle mesh
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TriMesh {
    pub tris: Vec<[usize; 3]>,
    /// Node positions (n × 3)
    pub nodes: Array2<f64>,
}

impl TriMesh {
    pub fn new(tris: Vec<[usize; 3]>, nodes: Array2<f64>) -> Result<Self> {
        check_nodes(&nodes)?;
        check_indices(&tris, nodes.nrows())?;
        Ok(Self { tris, nodes })
    }

    pub fn num_tris(&self) -> usize {
        self.tris.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.nrows()
    }

    pub fn node(&self, i: usize) -> Vector3<f64> {
        node_at(&self.nodes, i)
    }

    pub fn area(&self, t: usize) -> f64 {
        let [a, b, c] = self.tris[t].map(|v| self.node(v));
        0.5 * (b - a).cross(&(c - a)).norm()
    }

    pub fn areas(&self) -> Vec<f64> {
        (0..self.num_tris()).map(|t| self.area(t)).collect()
    }

    /// Gradients of the three hat functions of triangle `t` (zero for a
    /// degenerate triangle).
    pub fn hat_gradients(&self, t: usize) -> [Vector3<f64>; 3] {
        let p = self.tris[t].map(|v| self.node(v));
        let n = (p[1] - p[0]).cross(&(p[2] - p[0]));
        let double_area = n.norm();
        if double_area == 0.0 {
            return [Vector3::zeros(); 3];
        }
        let n = n / double_area;
        [0, 1, 2].map(|i| n.cross(&(p[(i + 2) % 3] - p[(i + 1) % 3])) / double_area)
    }

    /// Cotangent Laplacian `L_ij = Σ_t A_t ∇φ_i · ∇φ_j` as triplets
    /// (positive semi-definite).
    pub fn laplacian(&self) -> Vec<Triplet> {
        let mut triplets = Vec::with_capacity(9 * self.num_tris());
        for (t, tri) in self.tris.iter().enumerate() {
            let area = self.area(t);
            let grads = self.hat_gradients(t);
            for i in 0..3 {
                for j in 0..3 {
                    triplets.push(Triplet::new(tri[i], tri[j], area * grads[i].dot(&grads[j])));
                }
            }
        }
        triplets
    }

    /// Per-triangle gradient of a per-vertex scalar field.
    pub fn gradient(&self, field: &[f64]) -> Vec<Vector3<f64>> {
        (0..self.num_tris())
            .map(|t| {
                let grads = self.hat_gradients(t);
                (0..3).map(|i| grads[i] * field[self.tris[t][i]]).sum()
            })
            .collect()
    }

    /// `div_i = Σ_t A_t ∇φ_i · g_t` for a per-triangle vector field `g`.
    pub fn divergence(&self, g: &[Vector3<f64>]) -> Vec<f64> {
        let mut div = vec![0.0; self.num_nodes()];
        for (t, tri) in self.tris.iter().enumerate() {
            let area = self.area(t);
            let grads = self.hat_gradients(t);
            for i in 0..3 {
                div[tri[i]] += area * grads[i].dot(&g[t]);
            }
        }
        div
    }

    /// Column `c` of the node array.
    pub fn coordinate(&self, c: usize) -> Vec<f64> {
        self.nodes.column(c).to_vec()
    }
}
