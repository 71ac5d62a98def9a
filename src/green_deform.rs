//! Green-coordinate cage deformation in the plane.
//!
//! Each sample point is written as
//!
//!   η = Σ_i φ_i(η) v_i + Σ_j ψ_j(η) n_j
//!
//! over the cage vertices `v_i` and the outward unit normals `n_j` of the
//! cage edges. Moving the cage moves the points through the same
//! coordinates, with each normal term scaled by its edge's stretch so the
//! map stays conformal.

use crate::types::{Error, Result};
use nalgebra::Vector2;
use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;
use std::f64::consts::PI;
use tracing::{debug, info};

/// Closed polygonal cage, one vertex per row, edge `j` from row `j` to row
/// `j + 1` (wrapping).
fn read_polygon(cage: &Array2<f64>) -> Result<Vec<Vector2<f64>>> {
    if cage.ncols() != 2 || cage.nrows() < 3 {
        return Err(Error::Shape(format!(
            "cage must be n×2 with n ≥ 3, got {}×{}",
            cage.nrows(),
            cage.ncols()
        )));
    }
    let verts: Vec<Vector2<f64>> = cage
        .rows()
        .into_iter()
        .map(|r| Vector2::new(r[0], r[1]))
        .collect();
    if let Some(j) = (0..verts.len()).find(|&j| verts[j] == verts[(j + 1) % verts.len()]) {
        return Err(Error::Shape(format!("cage edge {j} has zero length")));
    }
    Ok(verts)
}

fn signed_area(verts: &[Vector2<f64>]) -> f64 {
    let n = verts.len();
    0.5 * (0..n)
        .map(|j| {
            let (p, q) = (verts[j], verts[(j + 1) % n]);
            p.x * q.y - q.x * p.y
        })
        .sum::<f64>()
}

fn outward_normal(edge: &Vector2<f64>, counter_clockwise: bool) -> Vector2<f64> {
    let n = if counter_clockwise {
        Vector2::new(edge.y, -edge.x)
    } else {
        Vector2::new(-edge.y, edge.x)
    };
    n / edge.norm()
}

/// Vertex (`φ`) and edge (`ψ`) coordinates of `eta` with respect to `cage`.
fn green_coordinates(
    cage: &[Vector2<f64>],
    counter_clockwise: bool,
    eta: &Vector2<f64>,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let n = cage.len();
    let mut phi = vec![0.0; n];
    let mut psi = vec![0.0; n];
    for j in 0..n {
        let next = (j + 1) % n;
        let a = cage[next] - cage[j];
        let b = cage[j] - eta;
        let q = a.dot(&a);
        let s = b.dot(&b);
        let r = 2.0 * a.dot(&b);
        let len = q.sqrt();

        let disc = 4.0 * s * q - r * r;
        if disc <= 1e-12 * 4.0 * s * q || s == 0.0 {
            return Err(Error::Shape(format!(
                "point ({}, {}) lies on the line of cage edge {j}",
                eta.x, eta.y
            )));
        }
        let srt = disc.sqrt();
        let ba = b.dot(&outward_normal(&a, counter_clockwise)) * len;

        let l0 = s.ln();
        let l1 = (s + q + r).ln();
        let a0 = (r / srt).atan() / srt;
        let a1 = ((2.0 * q + r) / srt).atan() / srt;
        let a10 = a1 - a0;
        let l10 = l1 - l0;

        psi[j] = -len / (4.0 * PI) * ((4.0 * s - r * r / q) * a10 + r / (2.0 * q) * l10 + l1 - 2.0);
        phi[next] += ba / (2.0 * PI) * (l10 / (2.0 * q) - a10 * r / q);
        phi[j] += ba / (2.0 * PI) * (a10 * (2.0 + r / q) - l10 / (2.0 * q));
    }
    Ok((phi, psi))
}

#[derive(Debug, Clone)]
pub struct GreenDeform2d {
    rest_cage: Vec<Vector2<f64>>,
    cage: Vec<Vector2<f64>>,
    counter_clockwise: bool,
    /// Vertex coordinates, one row per sample point.
    phi: Array2<f64>,
    /// Edge coordinates, one row per sample point.
    psi: Array2<f64>,
}

impl GreenDeform2d {
    /// Coordinates of every row of `points` (m×2) with respect to `cage`
    /// (n×2). The cage may wind either way; points must not lie on the
    /// supporting line of any cage edge.
    pub fn new(cage: &Array2<f64>, points: &Array2<f64>) -> Result<Self> {
        let rest_cage = read_polygon(cage)?;
        if points.ncols() != 2 {
            return Err(Error::Shape(format!(
                "points must be m×2, got {}×{}",
                points.nrows(),
                points.ncols()
            )));
        }
        let area = signed_area(&rest_cage);
        if area == 0.0 {
            return Err(Error::Shape("cage encloses no area".into()));
        }
        let counter_clockwise = area > 0.0;

        let n = rest_cage.len();
        let m = points.nrows();
        let coords = (0..m)
            .into_par_iter()
            .map(|i| {
                let eta = Vector2::new(points[[i, 0]], points[[i, 1]]);
                green_coordinates(&rest_cage, counter_clockwise, &eta)
            })
            .collect::<Result<Vec<_>>>()?;
        let mut phi = Array2::zeros((m, n));
        let mut psi = Array2::zeros((m, n));
        for (i, (p, s)) in coords.into_iter().enumerate() {
            phi.row_mut(i).assign(&ArrayView1::from(p.as_slice()));
            psi.row_mut(i).assign(&ArrayView1::from(s.as_slice()));
        }
        info!(cage_vertices = n, points = m, counter_clockwise, "green coordinates");

        Ok(Self {
            cage: rest_cage.clone(),
            rest_cage,
            counter_clockwise,
            phi,
            psi,
        })
    }

    pub fn num_points(&self) -> usize {
        self.phi.nrows()
    }

    pub fn is_counter_clockwise(&self) -> bool {
        self.counter_clockwise
    }

    /// `(φ, ψ)` of point `i`.
    pub fn coordinates(&self, i: usize) -> (ArrayView1<'_, f64>, ArrayView1<'_, f64>) {
        (self.phi.row(i), self.psi.row(i))
    }

    /// Displace cage vertex `id` by `dx`.
    pub fn move_cage(&mut self, id: usize, dx: [f64; 2]) -> Result<()> {
        let n = self.cage.len();
        let v = self
            .cage
            .get_mut(id)
            .ok_or_else(|| Error::Shape(format!("cage vertex {id} out of range for {n}")))?;
        *v += Vector2::from(dx);
        Ok(())
    }

    /// Replace the deformed cage; must have as many vertices as the rest cage.
    pub fn set_cage(&mut self, cage: &Array2<f64>) -> Result<()> {
        let verts = read_polygon(cage)?;
        if verts.len() != self.rest_cage.len() {
            return Err(Error::Shape(format!(
                "cage has {} vertices, rest cage has {}",
                verts.len(),
                self.rest_cage.len()
            )));
        }
        self.cage = verts;
        Ok(())
    }

    /// Sample points under the current cage (m×2).
    pub fn deform(&self) -> Result<Array2<f64>> {
        let n = self.cage.len();
        let mut normals = Vec::with_capacity(n);
        for j in 0..n {
            let edge = self.cage[(j + 1) % n] - self.cage[j];
            let rest_len = (self.rest_cage[(j + 1) % n] - self.rest_cage[j]).norm();
            if edge.norm() == 0.0 {
                return Err(Error::Shape(format!("deformed cage edge {j} has zero length")));
            }
            normals.push(outward_normal(&edge, self.counter_clockwise) * (edge.norm() / rest_len));
        }

        let flat: Vec<f64> = (0..self.num_points())
            .into_par_iter()
            .flat_map_iter(|i| {
                let phi = self.phi.row(i);
                let psi = self.psi.row(i);
                let p: Vector2<f64> = (0..n)
                    .map(|j| self.cage[j] * phi[j] + normals[j] * psi[j])
                    .sum();
                [p.x, p.y]
            })
            .collect();
        debug!(points = self.num_points(), "cage deformation applied");
        Array2::from_shape_vec((self.num_points(), 2), flat)
            .map_err(|e| Error::Shape(e.to_string()))
    }
}
