use std::fmt;
use std::time::Duration;

/// Why the solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SolverStatus {
    /// The stopping residual fell below the requested tolerance.
    Converged,
    /// Reached the maximum number of iterations.
    MaxIter,
    /// Exceeded the wall-clock budget.
    MaxTime,
    /// A function value, gradient or residual became NaN or infinite.
    NotFinite,
    /// The caller raised the stop signal.
    Interrupted,
}

impl fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverStatus::Converged => write!(f, "converged to tolerance"),
            SolverStatus::MaxIter => write!(f, "maximum iterations reached"),
            SolverStatus::MaxTime => write!(f, "time budget exceeded"),
            SolverStatus::NotFinite => write!(f, "non-finite value encountered"),
            SolverStatus::Interrupted => write!(f, "interrupted by stop signal"),
        }
    }
}

/// Counters and outcome of one inner solve.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Stats<F> {
    /// Termination status.
    pub status: SolverStatus,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Stopping residual ε_k at termination.
    pub eps: F,
    /// Wall-clock time spent in the solver.
    pub elapsed: Duration,
    /// Line searches that fell back to the proximal step.
    pub linesearch_failures: usize,
    /// Quasi-Newton directions discarded for non-finite entries.
    pub lbfgs_failures: usize,
    /// L-BFGS updates rejected by the curvature condition.
    pub lbfgs_rejected: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display() {
        assert_eq!(SolverStatus::Converged.to_string(), "converged to tolerance");
        assert_eq!(SolverStatus::NotFinite.to_string(), "non-finite value encountered");
    }
}
