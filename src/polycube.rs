//! Polycube deformation of a tet mesh: pull every surface normal towards a
//! coordinate axis while keeping tets close to rigid and the surface area
//! fixed.

use crate::config::Config;
use crate::functional::{CompositeConstraint, CompositeEnergy, Functional};
use crate::kernels;
use crate::mesh::{flatten_nodes, TetMesh};
use crate::optimizer::{log_energies, Lbfgs};
use crate::terms::{Anchor, ConstraintTerm, NormalAlignment, SurfaceArea, TetDistortion, Term};
use crate::types::{AugmentedLagrangianOptions, Error, LbfgsOptions, OptimizationReport, Result};
use nalgebra::Vector3;
use tracing::{error, info};

#[derive(Debug)]
pub struct PolycubeSolver {
    num_nodes: usize,
    surface: Vec<[usize; 3]>,
    /// Tet distortion, normal alignment.
    energy_terms: Vec<Option<Term>>,
    /// Surface area, anchor of vertex 0.
    constraint_terms: Vec<Option<ConstraintTerm>>,
    lbfgs: LbfgsOptions,
    lagrangian: AugmentedLagrangianOptions,
}

impl PolycubeSolver {
    /// Reads `weight.distortion.value`, `weight.align.value`,
    /// `abs_eps.value` and the `lbfgs.*` options. The optional `lagrangian`
    /// object holds outer-loop settings; `weight.area.value`, when present,
    /// overrides its initial penalty.
    pub fn new(mesh: &TetMesh, config: &Config) -> Result<Self> {
        let wd: f64 = config.get("weight.distortion.value")?;
        let wa: f64 = config.get("weight.align.value")?;
        let eps: f64 = config.get("abs_eps.value")?;
        let mut lagrangian: AugmentedLagrangianOptions =
            config.get_or("lagrangian", AugmentedLagrangianOptions::default())?;
        lagrangian.mu_init = config.get_or("weight.area.value", lagrangian.mu_init)?;

        let adjacency = mesh.face_adjacency()?;
        let rest = flatten_nodes(&mesh.nodes);
        info!(
            tets = mesh.num_tets(),
            surface_faces = adjacency.boundary.len(),
            "polycube setup"
        );
        Ok(Self {
            num_nodes: mesh.num_nodes(),
            surface: adjacency.boundary.iter().map(|f| f.verts).collect(),
            energy_terms: vec![
                Some(TetDistortion::new(mesh, wd)?.into()),
                Some(NormalAlignment::new(mesh, &adjacency, eps, wa)?.into()),
            ],
            constraint_terms: vec![
                Some(SurfaceArea::new(mesh, &adjacency)?.into()),
                Some(Anchor::vertex(&rest, 0)?.into()),
            ],
            lbfgs: LbfgsOptions::from_config(config)?,
            lagrangian,
        })
    }

    pub fn with_lagrangian(mut self, options: AugmentedLagrangianOptions) -> Self {
        self.lagrangian = options;
        self
    }

    pub fn lagrangian(&self) -> &AugmentedLagrangianOptions {
        &self.lagrangian
    }

    /// Deform the flattened node positions `x` (3 per vertex) in place.
    pub fn deform(&self, x: &mut [f64]) -> Result<OptimizationReport> {
        if x.len() != 3 * self.num_nodes {
            return Err(Error::Shape(format!(
                "{} nodes need {} values, got {}",
                self.num_nodes,
                3 * self.num_nodes,
                x.len()
            )));
        }
        let energy = CompositeEnergy::new(&self.energy_terms)?;
        let constraint = CompositeConstraint::new(&self.constraint_terms)?;
        info!(polycube_error = self.polycube_error(x), "polycube before");
        log_energies("prev", &energy, x);

        let report = Lbfgs::new(self.lbfgs)
            .minimize_constrained(&energy, &constraint, x, &self.lagrangian)
            .map_err(|e| {
                error!("polycube deformation failed: {e}");
                e
            })?;

        log_energies("post", &energy, x);
        info!(
            polycube_error = self.polycube_error(x),
            status = ?report.status,
            max_violation = report.constraint_max_violation,
            "polycube after"
        );
        Ok(report)
    }

    /// Area-weighted mean of `|n_x| + |n_y| + |n_z| - 1` over the surface;
    /// zero exactly when every face is axis aligned.
    pub fn polycube_error(&self, x: &[f64]) -> f64 {
        let corner = |v: usize| Vector3::new(x[3 * v], x[3 * v + 1], x[3 * v + 2]);
        let (l1, area) = self.surface.iter().fold((0.0, 0.0), |(l1, area), face| {
            let [a, b, c] = face.map(&corner);
            let n = kernels::area_vector(&a, &b, &c);
            (l1 + n.abs().sum(), area + n.norm())
        });
        if area > 0.0 {
            l1 / area - 1.0
        } else {
            0.0
        }
    }

    /// Current value of the energy (distortion + alignment), without
    /// constraints.
    pub fn energy(&self, x: &[f64]) -> Result<f64> {
        Ok(CompositeEnergy::new(&self.energy_terms)?.val(x))
    }
}
