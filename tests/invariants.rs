//! Property-based checks of the solver's observable invariants on random
//! separable box-constrained quadratics, where the exact minimizer is the
//! componentwise clamp of the unconstrained one.

use panoc::{BoxSet, FnProblem, PanocParams, PanocSolver, SolverStatus};
use proptest::prelude::*;

fn diag_quadratic(a: Vec<f64>, b: Vec<f64>, bounds: BoxSet<f64>) -> FnProblem<f64> {
    let (af, bf) = (a.clone(), b.clone());
    FnProblem::new(
        bounds,
        BoxSet::unbounded(0),
        move |x: &[f64]| {
            let mut v = 0.0;
            for i in 0..x.len() {
                v += 0.5 * af[i] * x[i] * x[i] - bf[i] * x[i];
            }
            v
        },
        move |x, grad| {
            for i in 0..x.len() {
                grad[i] = a[i] * x[i] - b[i];
            }
        },
        |_, _| {},
        |_, _, _| {},
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn box_qp_solution_is_feasible_and_optimal(
        a in prop::array::uniform3(0.5f64..20.0),
        b in prop::array::uniform3(-5.0f64..5.0),
        lo in -2.0f64..0.0,
        hi in 0.1f64..2.0,
        x0_frac in prop::array::uniform3(0.0f64..1.0),
    ) {
        let bounds = BoxSet::new(vec![lo; 3], vec![hi; 3]);
        let mut problem = diag_quadratic(a.to_vec(), b.to_vec(), bounds.clone());

        let mut x: Vec<f64> = x0_frac.iter().map(|f| lo + f * (hi - lo)).collect();
        let params = PanocParams { max_iter: 500, ..PanocParams::default() };
        let solver = PanocSolver::new(params);
        let (mut z, mut y, mut err_z) = (vec![], vec![], vec![]);
        let stats = solver.solve(&mut problem, &mut x, &mut z, &mut y, &mut err_z, &[], 1e-7);

        prop_assert_eq!(stats.status, SolverStatus::Converged, "stats: {:?}", stats);
        prop_assert!(stats.eps <= 1e-7, "reported eps {} above tolerance", stats.eps);
        prop_assert!(bounds.contains(&x, 1e-9), "infeasible solution {:?}", x);

        for i in 0..3 {
            let expected = (b[i] / a[i]).clamp(lo, hi);
            prop_assert!(
                (x[i] - expected).abs() < 1e-4,
                "x[{}] = {}, expected {}", i, x[i], expected
            );
        }
    }

    #[test]
    fn objective_never_increases_from_feasible_start(
        a in prop::array::uniform3(0.5f64..20.0),
        b in prop::array::uniform3(-5.0f64..5.0),
        x0_frac in prop::array::uniform3(0.0f64..1.0),
    ) {
        let bounds = BoxSet::new(vec![-1.0; 3], vec![1.0; 3]);
        let mut problem = diag_quadratic(a.to_vec(), b.to_vec(), bounds);

        let x0: Vec<f64> = x0_frac.iter().map(|f| -1.0 + 2.0 * f).collect();
        let f0: f64 = (0..3).map(|i| 0.5 * a[i] * x0[i] * x0[i] - b[i] * x0[i]).sum();

        let mut x = x0;
        let solver = PanocSolver::new(PanocParams::default());
        let (mut z, mut y, mut err_z) = (vec![], vec![], vec![]);
        let stats = solver.solve(&mut problem, &mut x, &mut z, &mut y, &mut err_z, &[], 1e-7);

        prop_assert_eq!(stats.status, SolverStatus::Converged, "stats: {:?}", stats);
        let f_final: f64 = (0..3).map(|i| 0.5 * a[i] * x[i] * x[i] - b[i] * x[i]).sum();
        prop_assert!(
            f_final <= f0 + 1e-9,
            "objective increased: {} -> {}", f0, f_final
        );
    }

    #[test]
    fn specialized_lbfgs_reaches_same_minimizer(
        a in prop::array::uniform3(0.5f64..20.0),
        b in prop::array::uniform3(-5.0f64..5.0),
    ) {
        let run = |specialized: bool| {
            let bounds = BoxSet::new(vec![-1.0; 3], vec![1.0; 3]);
            let mut problem = diag_quadratic(a.to_vec(), b.to_vec(), bounds);
            let params = PanocParams { specialized_lbfgs: specialized, max_iter: 500, ..PanocParams::default() };
            let solver = PanocSolver::new(params);
            let mut x = vec![0.0; 3];
            let (mut z, mut y, mut err_z) = (vec![], vec![], vec![]);
            let stats = solver.solve(&mut problem, &mut x, &mut z, &mut y, &mut err_z, &[], 1e-8);
            (stats, x)
        };

        let (stats_std, x_std) = run(false);
        let (stats_spc, x_spc) = run(true);
        prop_assert_eq!(stats_std.status, SolverStatus::Converged);
        prop_assert_eq!(stats_spc.status, SolverStatus::Converged);
        for i in 0..3 {
            prop_assert!(
                (x_std[i] - x_spc[i]).abs() < 1e-5,
                "variants disagree at {}: {} vs {}", i, x_std[i], x_spc[i]
            );
        }
    }
}
