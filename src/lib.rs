//! **fieldopt**: composable energy optimization for frame fields and mesh
//! deformation.
//!
//! The crate is organised around one abstraction and two solve strategies:
//!
//! 1. **Energies** (`functional`, `terms`, `kernels`): per-element terms
//!    implementing [`Functional`] / [`Constraint`], summed or stacked by
//!    composites that borrow a driver-owned arena.
//! 2. **Direct stage** (`assembly`, `dof`, `linear`): sparse triplet
//!    assembly, elimination of fixed DOFs, one SPD solve for quadratics.
//! 3. **Nonlinear stage** (`optimizer`): L-BFGS via `argmin`, plus an
//!    augmented Lagrangian loop for equality constraints.
//! 4. **Drivers**: cross frames (`cross_frame`), frame smoothing
//!    (`frame_smoother`), gradient-field deformation (`gradient_deform`),
//!    polycubes (`polycube`), green-coordinate cages (`green_deform`).

pub mod types;
pub mod config;
pub mod assembly;
pub mod dof;
pub mod functional;
pub mod linear;
pub mod optimizer;
pub mod frame;
pub mod kernels;
pub mod mesh;
pub mod terms;
pub mod cross_frame;
pub mod frame_smoother;
pub mod gradient_deform;
pub mod polycube;
pub mod green_deform;

pub use functional::{Constraint, Functional};
pub use types::{Error, Result};
