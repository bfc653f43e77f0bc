//! PANOC: an inner solver for nonconvex augmented-Lagrangian optimization.
//!
//! Minimizes the augmented objective
//!
//! ```text
//! ψ(x) = f(x) + ½ dist²_Σ(g(x) + Σ⁻¹y, D)    over x ∈ C
//! ```
//!
//! at fixed Lagrange multipliers `y` and penalty weights `Σ`, where `C` and
//! `D` are boxes. The iteration combines a projected-gradient
//! (forward-backward) step with an L-BFGS quasi-Newton direction through a
//! line search on the forward-backward envelope, while adaptively estimating
//! the local Lipschitz constant of ∇ψ.
//!
//! Problems supply their oracles through the [`Problem`] trait; [`FnProblem`]
//! assembles one from closures.
//!
//! # Example
//!
//! ```
//! use panoc::{FnProblem, PanocParams, PanocSolver, SolverStatus};
//!
//! // minimize (x₀ - 1)² + (x₁ + 2)² over R²
//! let mut problem = FnProblem::unconstrained(
//!     2,
//!     |x: &[f64]| (x[0] - 1.0).powi(2) + (x[1] + 2.0).powi(2),
//!     |x, grad| {
//!         grad[0] = 2.0 * (x[0] - 1.0);
//!         grad[1] = 2.0 * (x[1] + 2.0);
//!     },
//! );
//!
//! let solver = PanocSolver::new(PanocParams::default());
//! let mut x = vec![0.0, 0.0];
//! let (mut z, mut y, mut err_z) = (vec![], vec![], vec![]);
//! let stats = solver.solve(&mut problem, &mut x, &mut z, &mut y, &mut err_z, &[], 1e-9);
//!
//! assert_eq!(stats.status, SolverStatus::Converged);
//! assert!((x[0] - 1.0).abs() < 1e-6);
//! assert!((x[1] + 2.0).abs() < 1e-6);
//! ```

pub mod float;
pub mod lbfgs;
pub mod linalg;
pub mod objective;
pub mod problem;
pub mod result;
pub mod sets;
pub mod solver;

pub use float::Float;
pub use lbfgs::{Lbfgs, SpecializedLbfgs};
pub use problem::{FnProblem, Problem};
pub use result::{SolverStatus, Stats};
pub use sets::{proj_grad_step, BoxSet};
pub use solver::{LipschitzParams, PanocParams, PanocSolver};
