//! Gradient-field (Poisson) deformation of a triangle mesh.
//!
//! A harmonic scalar field `h`, 0 on the fixed vertices and 1 on the edited
//! handle, blends a user transform across the surface. Each triangle's
//! coordinate gradients are transformed by the blended amount, and the new
//! positions are the Poisson solutions whose gradients best match them.
//!
//! Typical use: [`GradientFieldDeform::set_fixed_verts`],
//! [`GradientFieldDeform::edit_boundary`],
//! [`GradientFieldDeform::set_transform`],
//! [`GradientFieldDeform::propagate_transform`],
//! [`GradientFieldDeform::deform`].

use crate::assembly;
use crate::dof::DofMap;
use crate::functional::CompositeEnergy;
use crate::linear::{newton_step, solve_quadratic_stage, Factorization, LinearBackend};
use crate::mesh::TriMesh;
use crate::terms::{Dirichlet, Term};
use crate::types::{Error, Result};
use nalgebra::{Matrix3, Rotation3, Unit, Vector3};
use ndarray::Array2;
use rayon::prelude::*;
use sprs::CsMat;
use std::collections::BTreeSet;
use tracing::{error, info};

/// Rotation about `axis` by `angle` combined with a uniform `scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub axis: Unit<Vector3<f64>>,
    pub angle: f64,
    pub scale: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            axis: Vector3::z_axis(),
            angle: 0.0,
            scale: 1.0,
        }
    }
}

impl Transform {
    /// The transform applied `s ∈ [0, 1]` of the way.
    pub fn blended(&self, s: f64) -> Matrix3<f64> {
        let rotation = Rotation3::from_axis_angle(&self.axis, s * self.angle);
        rotation.matrix() * (1.0 + s * (self.scale - 1.0))
    }
}

#[derive(Debug)]
pub struct GradientFieldDeform {
    mesh: TriMesh,
    areas: Vec<f64>,
    laplacian: CsMat<f64>,
    /// Per-triangle gradients of the rest x, y, z coordinates.
    rest_gradients: [Vec<Vector3<f64>>; 3],
    target_gradients: [Vec<Vector3<f64>>; 3],
    fixed: BTreeSet<usize>,
    edit: BTreeSet<usize>,
    harmonic: Vec<f64>,
    transform: Transform,
    deformed: Array2<f64>,
    backend: LinearBackend,
    /// Reduced Laplacian factorization over the free vertices.
    solver: Option<(DofMap, Factorization)>,
}

impl GradientFieldDeform {
    pub fn new(mesh: TriMesh) -> Result<Self> {
        let n = mesh.num_nodes();
        let laplacian = assembly::assemble(n, n, &mesh.laplacian())?;
        let rest_gradients = [0, 1, 2].map(|c| mesh.gradient(&mesh.coordinate(c)));
        info!(
            vertices = n,
            triangles = mesh.num_tris(),
            "gradient deformation setup"
        );
        Ok(Self {
            areas: mesh.areas(),
            target_gradients: rest_gradients.clone(),
            rest_gradients,
            laplacian,
            fixed: BTreeSet::new(),
            edit: BTreeSet::new(),
            harmonic: vec![0.0; n],
            transform: Transform::default(),
            deformed: mesh.nodes.clone(),
            backend: LinearBackend::default(),
            solver: None,
            mesh,
        })
    }

    pub fn with_backend(mut self, backend: LinearBackend) -> Self {
        self.backend = backend;
        self
    }

    fn check_vertices(&self, idx: &[usize]) -> Result<()> {
        let n = self.mesh.num_nodes();
        match idx.iter().find(|&&v| v >= n) {
            Some(bad) => Err(Error::Shape(format!("vertex {bad} out of range for {n} vertices"))),
            None => Ok(()),
        }
    }

    /// Pin `idx` in place and factorize the Laplacian over the rest.
    ///
    /// The pure-Neumann Laplacian is singular, so at least one vertex must
    /// be pinned.
    pub fn set_fixed_verts(&mut self, idx: &[usize]) -> Result<()> {
        self.check_vertices(idx)?;
        if idx.is_empty() {
            return Err(Error::Shape("at least one vertex must be fixed".into()));
        }
        self.fixed = idx.iter().copied().collect();
        let dofs = DofMap::new(self.mesh.num_nodes(), &self.fixed)?;
        let reduced = dofs.reduce_matrix(&self.laplacian)?;
        let factor = Factorization::new(&reduced, self.backend).map_err(|e| {
            error!("deformation precompute failed: {e}");
            e
        })?;
        info!(
            fixed = self.fixed.len(),
            free = dofs.num_free(),
            "deformation precomputed"
        );
        self.solver = Some((dofs, factor));
        Ok(())
    }

    /// Mark `idx` as the handle; the harmonic field is 1 there.
    pub fn edit_boundary(&mut self, idx: &[usize]) -> Result<()> {
        self.check_vertices(idx)?;
        self.edit = idx.iter().copied().collect();
        for &v in &self.edit {
            self.harmonic[v] = 1.0;
        }
        Ok(())
    }

    pub fn set_transform(&mut self, axis: [f64; 3], angle: f64, scale: f64) -> Result<()> {
        let axis = Unit::try_new(Vector3::from(axis), f64::EPSILON).ok_or_else(|| {
            Error::InvalidOption {
                key: "axis".into(),
                reason: "rotation axis has zero length".into(),
            }
        })?;
        self.transform = Transform { axis, angle, scale };
        Ok(())
    }

    /// Solve the harmonic field with the fixed and handle vertices pinned,
    /// then blend the transform into the target gradients.
    pub fn propagate_transform(&mut self) -> Result<()> {
        let pinned: BTreeSet<usize> = self.fixed.union(&self.edit).copied().collect();
        let terms = vec![Some(Term::from(Dirichlet::new(self.laplacian.clone(), 1.0)?))];
        let energy = CompositeEnergy::new(&terms)?;
        let residual = solve_quadratic_stage(&energy, &mut self.harmonic, &pinned, self.backend)
            .map_err(|e| {
                error!("harmonic field solve failed: {e}");
                e
            })?;
        info!(pinned = pinned.len(), energy = residual, "harmonic field propagated");

        let blend: Vec<Matrix3<f64>> = self
            .mesh
            .tris
            .par_iter()
            .map(|tri| {
                let s = tri.iter().map(|&v| self.harmonic[v]).sum::<f64>() / 3.0;
                self.transform.blended(s)
            })
            .collect();
        for c in 0..3 {
            self.target_gradients[c] = blend
                .iter()
                .enumerate()
                .map(|(t, m)| (0..3).map(|k| self.rest_gradients[k][t] * m[(c, k)]).sum())
                .collect();
        }
        Ok(())
    }

    /// Poisson-solve x, y and z against the target gradients, reusing the
    /// factorization from [`Self::set_fixed_verts`].
    pub fn deform(&mut self) -> Result<()> {
        let (dofs, factor) = self.solver.as_ref().ok_or(Error::NotReady("fixed vertex set"))?;
        for c in 0..3 {
            let rhs = self.mesh.divergence(&self.target_gradients[c]);
            let dirichlet = Dirichlet::new(self.laplacian.clone(), 1.0)?.with_rhs(rhs)?;
            let mut coord = self.deformed.column(c).to_vec();
            newton_step(&dirichlet, &mut coord, dofs, factor)?;
            for (dst, v) in self.deformed.column_mut(c).iter_mut().zip(&coord) {
                *dst = *v;
            }
        }
        info!("deformation solved");
        Ok(())
    }

    pub fn mesh(&self) -> &TriMesh {
        &self.mesh
    }

    pub fn areas(&self) -> &[f64] {
        &self.areas
    }

    pub fn laplacian(&self) -> &CsMat<f64> {
        &self.laplacian
    }

    pub fn harmonic_field(&self) -> &[f64] {
        &self.harmonic
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Per-triangle target gradient of coordinate `c`.
    pub fn target_gradients(&self, c: usize) -> &[Vector3<f64>] {
        &self.target_gradients[c]
    }

    pub fn deformed_nodes(&self) -> &Array2<f64> {
        &self.deformed
    }
}
