//! Evaluation of the augmented objective
//!
//! ```text
//! ψ(x) = f(x) + ½ dist²_Σ(g(x) + Σ⁻¹y, D)
//! ```
//!
//! and its gradient, split the way the solver loop consumes them: ψ together
//! with the multiplier estimate ŷ, ∇ψ from a cached ŷ, or both fused. All
//! functions write into caller-provided buffers and never allocate.

use crate::float::Float;
use crate::problem::Problem;

/// Compute ψ(x) together with the vector ŷ that later yields ∇ψ(x).
///
/// `y_hat` (length m) receives `ŷ = Σ·(ζ - Π_D(ζ))` with `ζ = g(x) + Σ⁻¹y`,
/// the multiplier estimate entering the gradient through the chain rule.
pub fn psi_y_hat<F: Float, P: Problem<F>>(
    problem: &mut P,
    x: &[F],
    y: &[F],
    sigma: &[F],
    y_hat: &mut [F],
) -> F {
    let two = F::one() + F::one();
    // g(x)
    problem.g(x, y_hat);
    // ζ = g(x) + Σ⁻¹y
    for i in 0..y_hat.len() {
        y_hat[i] = y_hat[i] + y[i] / sigma[i];
    }
    // d = ζ - Π(ζ, D)
    problem.constraint_set().projecting_difference(y_hat);
    // ⟨d, Σd⟩, then ŷ = Σd
    let mut d_sigma_d = F::zero();
    for i in 0..y_hat.len() {
        d_sigma_d = d_sigma_d + y_hat[i] * sigma[i] * y_hat[i];
        y_hat[i] = sigma[i] * y_hat[i];
    }
    // ψ(x) = f(x) + ½ ⟨d, Σd⟩
    problem.f(x) + d_sigma_d / two
}

/// Compute ∇ψ(x) from a previously computed ŷ.
///
/// `∇ψ = ∇f(x) + (∇g(x))ᵀ ŷ`; `work_n` is scratch of length n.
pub fn grad_psi_from_y_hat<F: Float, P: Problem<F>>(
    problem: &mut P,
    x: &[F],
    y_hat: &[F],
    grad: &mut [F],
    work_n: &mut [F],
) {
    problem.grad_f(x, grad);
    if !y_hat.is_empty() {
        problem.grad_g_prod(x, y_hat, work_n);
        for i in 0..grad.len() {
            grad[i] = grad[i] + work_n[i];
        }
    }
}

/// Compute ψ(x) and ∇ψ(x) in one pass, reusing ŷ internally.
pub fn psi_grad_psi<F: Float, P: Problem<F>>(
    problem: &mut P,
    x: &[F],
    y: &[F],
    sigma: &[F],
    grad: &mut [F],
    work_n: &mut [F],
    work_m: &mut [F],
) -> F {
    let psi = psi_y_hat(problem, x, y, sigma, work_m);
    grad_psi_from_y_hat(problem, x, work_m, grad, work_n);
    psi
}

/// Compute ∇ψ(x) without materializing ψ.
pub fn grad_psi<F: Float, P: Problem<F>>(
    problem: &mut P,
    x: &[F],
    y: &[F],
    sigma: &[F],
    grad: &mut [F],
    work_n: &mut [F],
    work_m: &mut [F],
) {
    // ŷ = Σ·(ζ - Π(ζ, D))
    problem.g(x, work_m);
    for i in 0..work_m.len() {
        work_m[i] = work_m[i] + y[i] / sigma[i];
    }
    problem.constraint_set().projecting_difference(work_m);
    for i in 0..work_m.len() {
        work_m[i] = sigma[i] * work_m[i];
    }
    grad_psi_from_y_hat(problem, x, work_m, grad, work_n);
}

/// Compute the projected constraint image `ẑ = Π_D(g(x̂) + Σ⁻¹y)` and the
/// slack error `g(x̂) - ẑ`, reported to the caller on exit.
pub fn z_and_err<F: Float, P: Problem<F>>(
    problem: &mut P,
    x_hat: &[F],
    y: &[F],
    sigma: &[F],
    z: &mut [F],
    err_z: &mut [F],
) {
    // g(x̂)
    problem.g(x_hat, err_z);
    // ζ = g(x̂) + Σ⁻¹y
    for i in 0..z.len() {
        z[i] = err_z[i] + y[i] / sigma[i];
    }
    // ẑ = Π(ζ, D)
    problem.constraint_set().project(z);
    // g(x̂) - ẑ
    for i in 0..err_z.len() {
        err_z[i] = err_z[i] - z[i];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::FnProblem;
    use crate::sets::BoxSet;

    /// minimize x₀² + x₁²  subject to  x₀ + x₁ = 1, with penalty weight 100.
    fn penalized() -> FnProblem<f64> {
        FnProblem::new(
            BoxSet::unbounded(2),
            BoxSet::new(vec![1.0], vec![1.0]),
            |x: &[f64]| x[0] * x[0] + x[1] * x[1],
            |x, grad| {
                grad[0] = 2.0 * x[0];
                grad[1] = 2.0 * x[1];
            },
            |x, out| out[0] = x[0] + x[1],
            |_, v, out| {
                out[0] = v[0];
                out[1] = v[0];
            },
        )
    }

    #[test]
    fn psi_and_y_hat_at_origin() {
        let mut problem = penalized();
        let (y, sigma) = ([0.0], [100.0]);
        let mut y_hat = [0.0];

        // ζ = 0, d = ζ - Π_{1}(ζ) = -1, ŷ = -100, ψ = 0 + ½·100·1 = 50
        let psi = psi_y_hat(&mut problem, &[0.0, 0.0], &y, &sigma, &mut y_hat);
        assert_eq!(psi, 50.0);
        assert_eq!(y_hat, [-100.0]);
    }

    #[test]
    fn grad_from_cached_y_hat() {
        let mut problem = penalized();
        let mut grad = [0.0; 2];
        let mut work_n = [0.0; 2];

        grad_psi_from_y_hat(&mut problem, &[0.0, 0.0], &[-100.0], &mut grad, &mut work_n);
        assert_eq!(grad, [-100.0, -100.0]);
    }

    #[test]
    fn fused_matches_split_evaluation() {
        let mut problem = penalized();
        let (y, sigma) = ([3.0], [100.0]);
        let x = [0.25, -0.5];

        let mut y_hat = [0.0];
        let psi_split = psi_y_hat(&mut problem, &x, &y, &sigma, &mut y_hat);
        let mut grad_split = [0.0; 2];
        let mut work_n = [0.0; 2];
        grad_psi_from_y_hat(&mut problem, &x, &y_hat, &mut grad_split, &mut work_n);

        let mut grad_fused = [0.0; 2];
        let mut work_m = [0.0];
        let psi_fused =
            psi_grad_psi(&mut problem, &x, &y, &sigma, &mut grad_fused, &mut work_n, &mut work_m);

        assert_eq!(psi_split, psi_fused);
        assert_eq!(grad_split, grad_fused);

        let mut grad_only = [0.0; 2];
        grad_psi(&mut problem, &x, &y, &sigma, &mut grad_only, &mut work_n, &mut work_m);
        assert_eq!(grad_only, grad_fused);
    }

    #[test]
    fn unconstrained_psi_is_f() {
        let mut problem =
            FnProblem::unconstrained(2, |x: &[f64]| x[0] * x[0] + x[1], |_, _| {});
        let mut y_hat = [0.0; 0];
        let psi = psi_y_hat(&mut problem, &[3.0, 1.0], &[], &[], &mut y_hat);
        assert_eq!(psi, 10.0);
    }

    #[test]
    fn slack_and_error_on_exit() {
        let mut problem = penalized();
        let (y, sigma) = ([0.0], [100.0]);
        let (mut z, mut err_z) = ([0.0], [0.0]);

        // Feasible point: ẑ = 1, error 0
        z_and_err(&mut problem, &[0.5, 0.5], &y, &sigma, &mut z, &mut err_z);
        assert_eq!(z, [1.0]);
        assert_eq!(err_z, [0.0]);

        // Infeasible point: g = 0.6, ẑ = 1, error -0.4
        z_and_err(&mut problem, &[0.4, 0.2], &y, &sigma, &mut z, &mut err_z);
        assert_eq!(z, [1.0]);
        assert!((err_z[0] + 0.4).abs() < 1e-15);
    }
}
