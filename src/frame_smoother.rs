//! Post-smoothing of a frame field, either over ZYZ angles or over raw
//! 3×3 matrices with a smoothed L1 penalty.

use crate::config::Config;
use crate::frame;
use crate::functional::{CompositeEnergy, Functional};
use crate::mesh::{FaceAdjacency, TetMesh};
use crate::optimizer::{Lbfgs, Monitor};
use crate::terms::{BoundaryFix, FrameSmoothness, L1Smoothness, Orthogonality, PairAdjacency, Term};
use crate::types::{Error, LbfgsOptions, OptimizationReport, Result};
use tracing::{error, info};

/// Evaluations between progress reports.
const MONITOR_EVERY: usize = 100;

#[derive(Debug)]
pub struct FrameSmoother {
    mesh: TetMesh,
    adjacency: FaceAdjacency,
    pairs: PairAdjacency,
    smooth_weight: f64,
    boundary_weight: f64,
    orth_weight: f64,
    abs_eps: f64,
    lbfgs: LbfgsOptions,
}

impl FrameSmoother {
    /// Reads `weight.smooth.value`, `weight.boundary.value`,
    /// `weight.orth.value`, `abs_eps.value` and the `lbfgs.*` options.
    pub fn new(mesh: TetMesh, config: &Config) -> Result<Self> {
        let adjacency = mesh.face_adjacency()?;
        let pairs = PairAdjacency::from_tets(&mesh, &adjacency);
        Ok(Self {
            smooth_weight: config.get("weight.smooth.value")?,
            boundary_weight: config.get("weight.boundary.value")?,
            orth_weight: config.get("weight.orth.value")?,
            abs_eps: config.get("abs_eps.value")?,
            lbfgs: LbfgsOptions::from_config(config)?,
            mesh,
            adjacency,
            pairs,
        })
    }

    fn check_len(&self, x: &[f64], per_tet: usize) -> Result<()> {
        if x.len() != per_tet * self.mesh.num_tets() {
            return Err(Error::Shape(format!(
                "{} tets need {} values, got {}",
                self.mesh.num_tets(),
                per_tet * self.mesh.num_tets(),
                x.len()
            )));
        }
        Ok(())
    }

    fn l1_smoothness(&self) -> Result<L1Smoothness> {
        L1Smoothness::new(
            self.mesh.num_tets(),
            self.pairs.clone(),
            self.abs_eps,
            self.smooth_weight,
        )
    }

    fn boundary_fix(&self, dim: usize, target: Vec<f64>) -> Result<BoundaryFix> {
        BoundaryFix::on_boundary_faces(
            &self.mesh,
            &self.adjacency,
            dim,
            target,
            self.boundary_weight,
        )
    }

    /// Smooth ZYZ angles in place, holding boundary tets near their input.
    ///
    /// Progress is reported as the L1 smoothness of the equivalent matrices.
    pub fn smooth_sh(&self, abc: &mut [f64]) -> Result<OptimizationReport> {
        self.check_len(abc, 3)?;
        let n = self.mesh.num_tets();
        let terms: Vec<Option<Term>> = vec![
            Some(FrameSmoothness::new(n, self.pairs.clone(), self.smooth_weight)?.into()),
            Some(self.boundary_fix(3, abc.to_vec())?.into()),
        ];
        let energy = CompositeEnergy::new(&terms).map_err(|e| {
            error!("SH smoothing energy: {e}");
            e
        })?;

        let l1 = self.l1_smoothness()?;
        let monitor = Monitor::new(MONITOR_EVERY, |count, x| {
            let mats = frame::zyz_to_matrices(x);
            info!(evaluation = count, l1_smoothness = l1.val(&mats), "smoothing");
        });
        Lbfgs::new(self.lbfgs).minimize(&energy, abc, Some(monitor))
    }

    /// Smooth column-major frame matrices in place, then project each onto
    /// the nearest rotation.
    pub fn smooth_l1(&self, mat: &mut [f64]) -> Result<OptimizationReport> {
        self.check_len(mat, 9)?;
        let terms: Vec<Option<Term>> = vec![
            Some(self.l1_smoothness()?.into()),
            Some(Orthogonality::new(self.mesh.volumes(), self.orth_weight).into()),
            Some(self.boundary_fix(9, mat.to_vec())?.into()),
        ];
        let energy = CompositeEnergy::new(&terms).map_err(|e| {
            error!("L1 smoothing energy: {e}");
            e
        })?;

        let report = {
            let smoothness = &terms[0];
            let monitor = Monitor::new(MONITOR_EVERY, |count, x| {
                if let Some(term) = smoothness {
                    info!(evaluation = count, l1_smoothness = term.val(x), "smoothing");
                }
            });
            Lbfgs::new(self.lbfgs).minimize(&energy, mat, Some(monitor))?
        };
        frame::orthogonalize_frames(mat);
        Ok(report)
    }
}
