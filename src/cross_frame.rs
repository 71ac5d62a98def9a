//! Cross-frame field on a tet mesh.
//!
//! Three stages, each usable on its own:
//!
//! 1. **SH Laplacian** ([`CrossFrameOpt::solve_laplacian`]): one direct solve
//!    of SH smoothness + SH boundary alignment from zero.
//! 2. **Frame extraction** ([`CrossFrameOpt::solve_initial_frames`]): fit
//!    ZYZ angles to each tet's SH coefficients.
//! 3. **Refinement** ([`CrossFrameOpt::optimize_frames`]): L-BFGS over the
//!    angles with frame smoothness + frame alignment.

use crate::assembly::norm;
use crate::config::Config;
use crate::frame;
use crate::functional::{CompositeEnergy, Functional};
use crate::linear::{solve_quadratic_stage, LinearBackend};
use crate::mesh::TetMesh;
use crate::optimizer::{log_energies, Lbfgs};
use crate::terms::{
    BoundaryNormals, FrameAlignment, FrameSmoothness, PairAdjacency, ShAlignment, ShSmoothness,
    Term,
};
use crate::types::{Error, LbfgsOptions, OptimizationReport, Result};
use rayon::prelude::*;
use std::collections::BTreeSet;
use tracing::{error, info};

#[derive(Debug)]
pub struct CrossFrameOpt {
    num_tets: usize,
    /// SH smoothness, SH alignment (9 per tet).
    sh_terms: Vec<Option<Term>>,
    /// Frame smoothness, frame alignment (3 per tet).
    frame_terms: Vec<Option<Term>>,
    lbfgs: LbfgsOptions,
    backend: LinearBackend,
    fit_iters: usize,
}

impl CrossFrameOpt {
    /// Reads `weight.smooth.value`, `weight.align.value`, the `lbfgs.*`
    /// options, `lins.type.value` and `sh.fit_iters.value`.
    pub fn new(mesh: &TetMesh, config: &Config) -> Result<Self> {
        let ws: f64 = config.get("weight.smooth.value")?;
        let wa: f64 = config.get("weight.align.value")?;
        let adjacency = mesh.face_adjacency()?;
        let pairs = PairAdjacency::from_tets(mesh, &adjacency);
        let normals = BoundaryNormals::from_faces(mesh, &adjacency.boundary);
        let n = mesh.num_tets();
        info!(
            tets = n,
            interior_faces = pairs.len(),
            boundary_faces = normals.len(),
            "cross frame setup"
        );

        Ok(Self {
            num_tets: n,
            sh_terms: vec![
                Some(ShSmoothness::new(n, pairs.clone(), ws)?.into()),
                Some(ShAlignment::new(n, &normals, wa)?.into()),
            ],
            frame_terms: vec![
                Some(FrameSmoothness::new(n, pairs, ws)?.into()),
                Some(FrameAlignment::new(n, normals, wa)?.into()),
            ],
            lbfgs: LbfgsOptions::from_config(config)?,
            backend: LinearBackend::from_config(config)?,
            fit_iters: config.get_or("sh.fit_iters.value", 1000)?,
        })
    }

    pub fn num_tets(&self) -> usize {
        self.num_tets
    }

    /// Total SH energy at `fs` (9 per tet).
    pub fn sh_energy(&self, fs: &[f64]) -> Result<f64> {
        let energy = CompositeEnergy::new(&self.sh_terms)?;
        self.check_len(fs, energy.nx())?;
        Ok(energy.val(fs))
    }

    /// Total frame energy at `abc` (3 per tet).
    pub fn frame_energy(&self, abc: &[f64]) -> Result<f64> {
        let energy = CompositeEnergy::new(&self.frame_terms)?;
        self.check_len(abc, energy.nx())?;
        Ok(energy.val(abc))
    }

    fn check_len(&self, x: &[f64], nx: usize) -> Result<()> {
        if x.len() != nx {
            return Err(Error::Shape(format!(
                "{} tets need {nx} values, got {}",
                self.num_tets,
                x.len()
            )));
        }
        Ok(())
    }

    /// SH coefficients minimizing the quadratic SH energy, 9 per tet.
    pub fn solve_laplacian(&self) -> Result<Vec<f64>> {
        let energy = CompositeEnergy::new(&self.sh_terms)?;
        let mut fs = vec![0.0; energy.nx()];
        info!(dimension = fs.len(), "linear solve");
        log_energies("prev", &energy, &fs);

        solve_quadratic_stage(&energy, &mut fs, &BTreeSet::new(), self.backend).map_err(|e| {
            error!("SH laplacian solve failed: {e}");
            e
        })?;

        log_energies("post", &energy, &fs);
        info!(solution_norm = norm(&fs), "SH laplacian solved");
        Ok(fs)
    }

    /// ZYZ angles fitted to each tet's SH coefficients, 3 per tet.
    pub fn solve_initial_frames(&self, fs: &[f64]) -> Result<Vec<f64>> {
        self.check_len(fs, 9 * self.num_tets)?;
        Ok(fs
            .par_chunks_exact(9)
            .flat_map_iter(|f| frame::sh_to_zyz(f, self.fit_iters))
            .collect())
    }

    /// Refine `abc` in place with L-BFGS.
    pub fn optimize_frames(&self, abc: &mut [f64]) -> Result<OptimizationReport> {
        let energy = CompositeEnergy::new(&self.frame_terms)?;
        self.check_len(abc, energy.nx())?;
        log_energies("prev", &energy, abc);

        let mut lbfgs = Lbfgs::new(self.lbfgs);
        let report = lbfgs.minimize(&energy, abc, None).map_err(|e| {
            error!("frame optimization failed: {e}");
            e
        })?;

        log_energies("post", &energy, abc);
        info!(
            status = ?report.status,
            iterations = report.iterations,
            "frame optimization finished"
        );
        Ok(report)
    }

    /// All three stages; returns the refined ZYZ angles.
    pub fn run(&self) -> Result<Vec<f64>> {
        let fs = self.solve_laplacian()?;
        let mut abc = self.solve_initial_frames(&fs)?;
        self.optimize_frames(&mut abc)?;
        Ok(abc)
    }
}
