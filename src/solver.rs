//! The PANOC iteration: a forward-backward step combined with an L-BFGS
//! quasi-Newton direction through a line search on the forward-backward
//! envelope, with adaptive estimation of the local Lipschitz constant of ∇ψ.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::float::Float;
use crate::lbfgs::{Lbfgs, SpecializedLbfgs};
use crate::linalg::{all_finite, dot, norm, norm_inf, norm_sq};
use crate::objective::{grad_psi, grad_psi_from_y_hat, psi_grad_psi, psi_y_hat, z_and_err};
use crate::problem::Problem;
use crate::result::{SolverStatus, Stats};
use crate::sets::proj_grad_step;

/// Parameters of the finite-difference Lipschitz estimate.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LipschitzParams<F> {
    /// Relative perturbation (default: 1e-6).
    pub epsilon: F,
    /// Absolute perturbation floor (default: 1e-12).
    pub delta: F,
    /// Step size factor in (0, 1): γ = factor / L (default: 0.95).
    pub l_gamma_factor: F,
}

impl Default for LipschitzParams<f64> {
    fn default() -> Self {
        LipschitzParams {
            epsilon: 1e-6,
            delta: 1e-12,
            l_gamma_factor: 0.95,
        }
    }
}

impl Default for LipschitzParams<f32> {
    fn default() -> Self {
        LipschitzParams {
            epsilon: 1e-3,
            delta: 1e-6,
            l_gamma_factor: 0.95,
        }
    }
}

/// Parameters of the PANOC iteration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PanocParams<F> {
    /// Lipschitz-estimation parameters.
    pub lipschitz: LipschitzParams<F>,
    /// Number of L-BFGS pairs to store (default: 10).
    pub lbfgs_mem: usize,
    /// Derive L-BFGS pairs from the projected-gradient map so the buffer
    /// survives step size changes (default: false).
    pub specialized_lbfgs: bool,
    /// Re-fit the quadratic upper bound inside the line search
    /// (default: true).
    pub update_lipschitz_in_linesearch: bool,
    /// Maximum number of iterations (default: 100).
    pub max_iter: usize,
    /// Wall-clock budget (default: none).
    pub max_time: Option<Duration>,
    /// Smallest line-search averaging factor before falling back to the
    /// proximal step (default: 1/256).
    pub tau_min: F,
    /// Log a progress row every this many iterations; 0 disables
    /// (default: 0).
    pub print_interval: usize,
}

impl Default for PanocParams<f64> {
    fn default() -> Self {
        PanocParams {
            lipschitz: LipschitzParams::default(),
            lbfgs_mem: 10,
            specialized_lbfgs: false,
            update_lipschitz_in_linesearch: true,
            max_iter: 100,
            max_time: None,
            tau_min: 1.0 / 256.0,
            print_interval: 0,
        }
    }
}

impl Default for PanocParams<f32> {
    fn default() -> Self {
        PanocParams {
            lipschitz: LipschitzParams::default(),
            lbfgs_mem: 10,
            specialized_lbfgs: false,
            update_lipschitz_in_linesearch: true,
            max_iter: 100,
            max_time: None,
            tau_min: 1.0 / 256.0,
            print_interval: 0,
        }
    }
}

/// Either flavor of the quasi-Newton accelerator.
enum Direction<F> {
    Standard(Lbfgs<F>),
    Specialized(SpecializedLbfgs<F>),
}

impl<F: Float> Direction<F> {
    fn apply(&mut self, q: &mut [F]) {
        match self {
            Direction::Standard(b) => b.apply(q),
            Direction::Specialized(b) => b.apply(q),
        }
    }

    fn reset(&mut self) {
        match self {
            Direction::Standard(b) => b.reset(),
            Direction::Specialized(b) => b.reset(),
        }
    }
}

/// Inner solver for the augmented-Lagrangian subproblem
///
/// ```text
/// minimize  ψ(x) = f(x) + ½ dist²_Σ(g(x) + Σ⁻¹y, D)   over x ∈ C
/// ```
///
/// at fixed multipliers y and penalty weights Σ, to a stopping tolerance ε.
///
/// A solver value holds only parameters and the stop signal; every call to
/// [`solve`](PanocSolver::solve) carries its own iterate state, so one
/// instance can be reused across outer iterations. Concurrent solves need
/// separate instances.
pub struct PanocSolver<F> {
    params: PanocParams<F>,
    stop_signal: Arc<AtomicBool>,
}

impl<F: Float> PanocSolver<F> {
    /// Create a solver with the given parameters.
    pub fn new(params: PanocParams<F>) -> Self {
        PanocSolver {
            params,
            stop_signal: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The solver parameters.
    pub fn params(&self) -> &PanocParams<F> {
        &self.params
    }

    /// Handle another thread can set to interrupt [`solve`](PanocSolver::solve).
    ///
    /// Polled once per iteration with relaxed ordering; a set flag terminates
    /// the solve with [`SolverStatus::Interrupted`] after the current
    /// iteration, with valid outputs for the last iterate.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_signal)
    }

    /// Minimize the augmented objective from the starting point in `x`.
    ///
    /// On return `x` holds the final iterate x̂, `y` the multiplier estimate
    /// ŷ(x̂), `z` the projected constraint image ẑ and `err_z` the slack
    /// error g(x̂) - ẑ. `sigma` are the positive penalty weights and `eps`
    /// the stopping tolerance; both are required to be positive, which is
    /// only checked in debug builds.
    #[allow(clippy::too_many_arguments)]
    pub fn solve<P: Problem<F>>(
        &self,
        problem: &mut P,
        x: &mut [F],
        z: &mut [F],
        y: &mut [F],
        err_z: &mut [F],
        sigma: &[F],
        eps: F,
    ) -> Stats<F> {
        let start = Instant::now();
        let n = problem.n();
        let m = problem.m();
        debug_assert_eq!(x.len(), n);
        debug_assert_eq!(y.len(), m);
        debug_assert_eq!(z.len(), m);
        debug_assert_eq!(err_z.len(), m);
        debug_assert_eq!(sigma.len(), m);
        debug_assert!(sigma.iter().all(|&s| s > F::zero()));
        debug_assert!(eps > F::zero());

        let params = &self.params;
        let two = F::one() + F::one();

        let mut accel = if params.specialized_lbfgs {
            Direction::Specialized(SpecializedLbfgs::new(n, params.lbfgs_mem))
        } else {
            Direction::Standard(Lbfgs::new(n, params.lbfgs_mem))
        };

        // Iterate state and the shadow buffers for the next iterate. All
        // allocation happens here; the loop below reuses these.
        let mut x_k = x.to_vec();
        let mut x_hat_k = vec![F::zero(); n];
        let mut x_next = vec![F::zero(); n];
        let mut x_hat_next = vec![F::zero(); n];
        let mut y_hat_k = vec![F::zero(); m];
        let mut y_hat_next = vec![F::zero(); m];
        let mut p_k = vec![F::zero(); n];
        let mut p_next = vec![F::zero(); n];
        let mut q_k = vec![F::zero(); n];
        let mut grad_k = vec![F::zero(); n];
        let mut grad_hat_k = vec![F::zero(); n];
        let mut grad_next = vec![F::zero(); n];
        let mut work_n = vec![F::zero(); n];
        let mut work_m = vec![F::zero(); m];

        let mut linesearch_failures = 0usize;
        let mut lbfgs_failures = 0usize;
        let mut lbfgs_rejected = 0usize;

        // Estimate the local Lipschitz constant of ∇ψ by finite differences,
        // h_i = max(ε|x_i|, δ).
        for i in 0..n {
            let hi = (x_k[i] * params.lipschitz.epsilon).abs().max(params.lipschitz.delta);
            p_k[i] = hi;
            x_hat_k[i] = x_k[i] + hi;
        }
        // ∇ψ(x₀ + h)
        grad_psi(problem, &x_hat_k, y, sigma, &mut grad_next, &mut work_n, &mut work_m);
        // ψ(x₀), ∇ψ(x₀)
        let mut psi_k = psi_grad_psi(problem, &x_k, y, sigma, &mut grad_k, &mut work_n, &mut work_m);

        let mut l_k = {
            let mut diff_sq = F::zero();
            for i in 0..n {
                let d = grad_next[i] - grad_k[i];
                diff_sq = diff_sq + d * d;
            }
            (diff_sq / norm_sq(&p_k)).sqrt()
        };
        if l_k < F::epsilon() {
            l_k = F::epsilon();
        } else if !l_k.is_finite() {
            return Stats {
                status: SolverStatus::NotFinite,
                iterations: 0,
                eps: F::infinity(),
                elapsed: start.elapsed(),
                linesearch_failures,
                lbfgs_failures,
                lbfgs_rejected,
            };
        }

        let mut gamma_k = params.lipschitz.l_gamma_factor / l_k;
        let mut sigma_k = gamma_k * (F::one() - gamma_k * l_k) / two;

        // x̂₀, p₀
        let _ = proj_grad_step(problem.bounds(), gamma_k, &x_k, &grad_k, &mut x_hat_k, &mut p_k);
        let mut psi_hat_k = psi_y_hat(problem, &x_hat_k, y, sigma, &mut y_hat_k);

        let mut grad_k_dot_p_k = dot(&grad_k, &p_k);
        let mut norm_sq_p_k = norm_sq(&p_k);

        // Forward-backward envelope at x₀
        let mut phi_k = psi_k + norm_sq_p_k / (two * gamma_k) + grad_k_dot_p_k;

        for k in 0..=params.max_iter {
            // Shrink γ until the quadratic upper bound on ψ at x̂ holds.
            if k == 0 || !params.update_lipschitz_in_linesearch {
                while psi_hat_k > psi_k + grad_k_dot_p_k + l_k * norm_sq_p_k / two {
                    if !l_k.is_finite() || !psi_hat_k.is_finite() {
                        break;
                    }
                    l_k = l_k * two;
                    sigma_k = sigma_k / two;
                    gamma_k = gamma_k / two;

                    // The standard pairs were built for the old γ
                    if k > 0 {
                        if let Direction::Standard(b) = &mut accel {
                            b.reset();
                        }
                    }

                    let _ = proj_grad_step(
                        problem.bounds(),
                        gamma_k,
                        &x_k,
                        &grad_k,
                        &mut x_hat_k,
                        &mut p_k,
                    );
                    grad_k_dot_p_k = dot(&grad_k, &p_k);
                    norm_sq_p_k = norm_sq(&p_k);
                    psi_hat_k = psi_y_hat(problem, &x_hat_k, y, sigma, &mut y_hat_k);
                }
            }

            // Seed the specialized buffer once the first step size is fixed
            if k == 0 {
                if let Direction::Specialized(b) = &mut accel {
                    b.initialize(&x_k, &grad_k, &x_hat_k, gamma_k);
                }
            }

            // ∇ψ(x̂ₖ) from the cached ŷ(x̂ₖ)
            grad_psi_from_y_hat(problem, &x_hat_k, &y_hat_k, &mut grad_hat_k, &mut work_n);

            // Stopping residual ‖(1/γ)p + (∇ψ(x̂) - ∇ψ(x))‖∞. The grouping
            // keeps the two gradients from cancelling when p is small.
            for i in 0..n {
                work_n[i] = (F::one() / gamma_k) * p_k[i] + (grad_hat_k[i] - grad_k[i]);
            }
            let eps_k = if all_finite(&work_n) {
                norm_inf(&work_n)
            } else {
                F::nan()
            };

            if params.print_interval != 0 && k % params.print_interval == 0 {
                log::info!(
                    "{:6}: psi = {:14.8e}, |grad| = {:10.4e}, |p| = {:10.4e}, gamma = {:10.4e}, eps = {:10.4e}",
                    k,
                    psi_k,
                    norm(&grad_k),
                    norm_sq_p_k.sqrt(),
                    gamma_k,
                    eps_k
                );
            }

            let elapsed = start.elapsed();
            let out_of_time = params.max_time.is_some_and(|t| elapsed > t);

            if eps_k <= eps || k == params.max_iter || out_of_time {
                if params.print_interval != 0 {
                    log::debug!(
                        "final {:6}: |grad| = {:10.4e}, gamma = {:10.4e}, eps = {:10.4e}",
                        k,
                        norm(&grad_k),
                        gamma_k,
                        eps_k
                    );
                }
                z_and_err(problem, &x_hat_k, y, sigma, z, err_z);
                x.copy_from_slice(&x_hat_k);
                y.copy_from_slice(&y_hat_k);
                return Stats {
                    status: if eps_k <= eps {
                        SolverStatus::Converged
                    } else if out_of_time {
                        SolverStatus::MaxTime
                    } else {
                        SolverStatus::MaxIter
                    },
                    iterations: k,
                    eps: eps_k,
                    elapsed,
                    linesearch_failures,
                    lbfgs_failures,
                    lbfgs_rejected,
                };
            } else if !eps_k.is_finite() {
                log::warn!(
                    "non-finite residual at iteration {}: psi = {:e}, gamma = {:e}",
                    k,
                    psi_k,
                    gamma_k
                );
                z_and_err(problem, &x_hat_k, y, sigma, z, err_z);
                x.copy_from_slice(&x_hat_k);
                y.copy_from_slice(&y_hat_k);
                return Stats {
                    status: SolverStatus::NotFinite,
                    iterations: k,
                    eps: eps_k,
                    elapsed,
                    linesearch_failures,
                    lbfgs_failures,
                    lbfgs_rejected,
                };
            } else if self.stop_signal.load(Ordering::Relaxed) {
                z_and_err(problem, &x_hat_k, y, sigma, z, err_z);
                x.copy_from_slice(&x_hat_k);
                y.copy_from_slice(&y_hat_k);
                return Stats {
                    status: SolverStatus::Interrupted,
                    iterations: k,
                    eps: eps_k,
                    elapsed,
                    linesearch_failures,
                    lbfgs_failures,
                    lbfgs_rejected,
                };
            }

            // Quasi-Newton direction q = H·p. The first iteration has no
            // pairs yet and takes the pure proximal step.
            let mut tau = F::one();
            if k == 0 {
                tau = F::zero();
            } else {
                q_k.copy_from_slice(&p_k);
                accel.apply(&mut q_k);
                if !all_finite(&q_k) {
                    tau = F::zero();
                    lbfgs_failures += 1;
                    accel.reset();
                }
            }

            // Line search on the forward-backward envelope, τ ← τ/2
            let sigma_norm_gamma_inv_p = sigma_k * norm_sq_p_k / (gamma_k * gamma_k);
            let mut l_next;
            let mut sigma_next;
            let mut gamma_next;
            let mut phi_next;
            let mut psi_next;
            let mut psi_hat_next;
            let mut grad_next_dot_p_next;
            let mut norm_sq_p_next;
            loop {
                l_next = l_k;
                sigma_next = sigma_k;
                gamma_next = gamma_k;

                if tau / two < params.tau_min {
                    // Line search failed: the prox step is guaranteed descent
                    mem::swap(&mut x_next, &mut x_hat_k);
                } else {
                    for i in 0..n {
                        x_next[i] = x_k[i] + (F::one() - tau) * p_k[i] + tau * q_k[i];
                    }
                }

                // ψ(xₖ₊₁), ∇ψ(xₖ₊₁), then the forward-backward step at xₖ₊₁
                psi_next =
                    psi_grad_psi(problem, &x_next, y, sigma, &mut grad_next, &mut work_n, &mut work_m);
                let _ = proj_grad_step(
                    problem.bounds(),
                    gamma_next,
                    &x_next,
                    &grad_next,
                    &mut x_hat_next,
                    &mut p_next,
                );
                psi_hat_next = psi_y_hat(problem, &x_hat_next, y, sigma, &mut y_hat_next);

                grad_next_dot_p_next = dot(&grad_next, &p_next);
                norm_sq_p_next = norm_sq(&p_next);

                if params.update_lipschitz_in_linesearch {
                    // Re-fit the quadratic upper bound at the candidate
                    while psi_hat_next
                        > psi_next + grad_next_dot_p_next + l_next * norm_sq_p_next / two
                    {
                        if !l_next.is_finite() || !psi_hat_next.is_finite() {
                            break;
                        }
                        l_next = l_next * two;
                        sigma_next = sigma_next / two;
                        gamma_next = gamma_next / two;
                        if let Direction::Standard(b) = &mut accel {
                            b.reset();
                        }

                        let _ = proj_grad_step(
                            problem.bounds(),
                            gamma_next,
                            &x_next,
                            &grad_next,
                            &mut x_hat_next,
                            &mut p_next,
                        );
                        grad_next_dot_p_next = dot(&grad_next, &p_next);
                        norm_sq_p_next = norm_sq(&p_next);
                        psi_hat_next = psi_y_hat(problem, &x_hat_next, y, sigma, &mut y_hat_next);
                    }
                }

                phi_next = psi_next + norm_sq_p_next / (two * gamma_next) + grad_next_dot_p_next;

                tau = tau / two;

                let ls_cond = phi_next - (phi_k - sigma_norm_gamma_inv_p * gamma_k);
                if !(ls_cond > F::zero() && tau >= params.tau_min) {
                    break;
                }
            }

            // τ below τ_min means the backtracking gave up and the prox step
            // was taken
            if tau < params.tau_min && k != 0 {
                linesearch_failures += 1;
            }

            let accepted = match &mut accel {
                Direction::Standard(b) => {
                    // s = xₖ₊₁ - xₖ, y = pₖ - pₖ₊₁; q is free again
                    for i in 0..n {
                        work_n[i] = x_next[i] - x_k[i];
                        q_k[i] = p_k[i] - p_next[i];
                    }
                    b.update(&work_n, &q_k)
                }
                Direction::Specialized(b) => {
                    b.update(&x_next, &grad_next, &x_hat_next, problem.bounds(), gamma_next)
                }
            };
            if !accepted {
                lbfgs_rejected += 1;
            }

            // Advance: the shadow buffers become the current iterate
            l_k = l_next;
            sigma_k = sigma_next;
            gamma_k = gamma_next;
            psi_k = psi_next;
            psi_hat_k = psi_hat_next;
            phi_k = phi_next;
            mem::swap(&mut x_k, &mut x_next);
            mem::swap(&mut x_hat_k, &mut x_hat_next);
            mem::swap(&mut y_hat_k, &mut y_hat_next);
            mem::swap(&mut p_k, &mut p_next);
            mem::swap(&mut grad_k, &mut grad_next);
            grad_k_dot_p_k = grad_next_dot_p_next;
            norm_sq_p_k = norm_sq_p_next;
        }

        unreachable!("iteration loop exited without reaching a termination condition");
    }
}
