//! Limited-memory BFGS buffers producing the quasi-Newton direction.
//!
//! [`Lbfgs`] is the plain secant-pair ring with the two-loop recursion.
//! [`SpecializedLbfgs`] derives its pairs from retained iterates and
//! gradients of the projected-gradient map, which lets it survive step-size
//! changes that would otherwise invalidate the buffer.

use crate::float::Float;
use crate::linalg::{all_finite, dot, norm};
use crate::sets::{proj_grad_step, BoxSet};

/// Ring buffer of `(s, y, ρ)` secant pairs with the two-loop recursion.
///
/// All storage is allocated at construction; `update` copies into the evicted
/// slot, so nothing allocates while the solver runs.
#[derive(Debug)]
pub struct Lbfgs<F> {
    s: Vec<Vec<F>>,
    y: Vec<Vec<F>>,
    rho: Vec<F>,
    alpha: Vec<F>,
    /// Slot the next pair is written to.
    head: usize,
    /// Number of stored pairs.
    count: usize,
}

impl<F: Float> Lbfgs<F> {
    /// Create a buffer for vectors of length `n` holding up to `mem` pairs.
    pub fn new(n: usize, mem: usize) -> Self {
        debug_assert!(mem > 0);
        Lbfgs {
            s: vec![vec![F::zero(); n]; mem],
            y: vec![vec![F::zero(); n]; mem],
            rho: vec![F::zero(); mem],
            alpha: vec![F::zero(); mem],
            head: 0,
            count: 0,
        }
    }

    /// Forget all stored pairs.
    pub fn reset(&mut self) {
        self.head = 0;
        self.count = 0;
    }

    /// Whether no pairs are stored.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of stored pairs.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Slot index of the pair `newest_offset` steps behind the newest.
    fn slot(&self, newest_offset: usize) -> usize {
        let mem = self.rho.len();
        (self.head + mem - 1 - newest_offset) % mem
    }

    /// Overwrite `q` with `H·q` via the two-loop recursion.
    ///
    /// `q` is left untouched when the buffer is empty.
    pub fn apply(&mut self, q: &mut [F]) {
        if self.count == 0 {
            return;
        }

        // Backward pass, newest to oldest: α_i = ρ_i ⟨s_i, q⟩, q ← q - α_i y_i
        for j in 0..self.count {
            let i = self.slot(j);
            let a = self.rho[i] * dot(&self.s[i], q);
            self.alpha[i] = a;
            for (qk, yk) in q.iter_mut().zip(self.y[i].iter()) {
                *qk = *qk - a * *yk;
            }
        }

        // Initial inverse-Hessian scaling ⟨s, y⟩/⟨y, y⟩ from the newest pair
        let newest = self.slot(0);
        let sy = dot(&self.s[newest], &self.y[newest]);
        let yy = dot(&self.y[newest], &self.y[newest]);
        if yy > F::zero() {
            let scale = sy / yy;
            for qk in q.iter_mut() {
                *qk = *qk * scale;
            }
        }

        // Forward pass, oldest to newest: β_i = ρ_i ⟨y_i, q⟩, q ← q + (α_i - β_i) s_i
        for j in (0..self.count).rev() {
            let i = self.slot(j);
            let b = self.rho[i] * dot(&self.y[i], q);
            let a = self.alpha[i];
            for (qk, sk) in q.iter_mut().zip(self.s[i].iter()) {
                *qk = *qk + (a - b) * *sk;
            }
        }
    }

    /// Store the pair `(s, y)` unless it fails the curvature condition.
    ///
    /// Returns `false` without storing when `⟨s, y⟩ ≤ ε_mach·‖s‖·‖y‖` or when
    /// either vector has a non-finite entry. The oldest pair is evicted when
    /// the buffer is full. Every stored pair satisfies `⟨s, y⟩ > 0`.
    pub fn update(&mut self, s: &[F], y: &[F]) -> bool {
        if !all_finite(s) || !all_finite(y) {
            return false;
        }
        let sy = dot(s, y);
        if sy <= F::epsilon() * norm(s) * norm(y) {
            return false;
        }

        let mem = self.rho.len();
        self.s[self.head].copy_from_slice(s);
        self.y[self.head].copy_from_slice(y);
        self.rho[self.head] = F::one() / sy;
        self.head = (self.head + 1) % mem;
        if self.count < mem {
            self.count += 1;
        }
        true
    }
}

/// L-BFGS variant whose pairs are derived from retained iterates and
/// gradients of the projected-gradient map.
///
/// `update` receives `(x_{k+1}, ∇ψ(x_{k+1}), x̂_{k+1}, C, γ_{k+1})` and forms
///
/// ```text
/// s_k = x_{k+1} - x_k
/// y_k = p_k - p_{k+1},    p = Π_C(x - γ∇ψ(x)) - x
/// ```
///
/// with `p_k` taken from the retained `x̂_k` while γ is unchanged, and
/// recomputed from the retained `(x_k, ∇ψ(x_k))` at the new γ otherwise.
/// That recomputation is what lets this buffer keep its pairs across step
/// size changes.
#[derive(Debug)]
pub struct SpecializedLbfgs<F> {
    inner: Lbfgs<F>,
    prev_x: Vec<F>,
    prev_grad: Vec<F>,
    prev_x_hat: Vec<F>,
    gamma: F,
    initialized: bool,
    // update scratch
    s: Vec<F>,
    y: Vec<F>,
    p_prev: Vec<F>,
}

impl<F: Float> SpecializedLbfgs<F> {
    /// Create a buffer for vectors of length `n` holding up to `mem` pairs.
    pub fn new(n: usize, mem: usize) -> Self {
        SpecializedLbfgs {
            inner: Lbfgs::new(n, mem),
            prev_x: vec![F::zero(); n],
            prev_grad: vec![F::zero(); n],
            prev_x_hat: vec![F::zero(); n],
            gamma: F::zero(),
            initialized: false,
            s: vec![F::zero(); n],
            y: vec![F::zero(); n],
            p_prev: vec![F::zero(); n],
        }
    }

    /// Seed the iterate history with the first forward-backward point.
    pub fn initialize(&mut self, x: &[F], grad: &[F], x_hat: &[F], gamma: F) {
        self.prev_x.copy_from_slice(x);
        self.prev_grad.copy_from_slice(grad);
        self.prev_x_hat.copy_from_slice(x_hat);
        self.gamma = gamma;
        self.initialized = true;
    }

    /// Forget all stored pairs. The iterate history is kept, so updating can
    /// continue without re-seeding.
    pub fn reset(&mut self) {
        self.inner.reset();
    }

    /// Whether no pairs are stored.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Overwrite `q` with `H·q` via the two-loop recursion.
    pub fn apply(&mut self, q: &mut [F]) {
        self.inner.apply(q);
    }

    /// Derive and store the next pair from the new iterate.
    ///
    /// Returns `false` when the pair fails the curvature condition; the
    /// iterate history advances either way.
    pub fn update(
        &mut self,
        x_next: &[F],
        grad_next: &[F],
        x_hat_next: &[F],
        set_c: &BoxSet<F>,
        gamma: F,
    ) -> bool {
        debug_assert!(self.initialized);

        if gamma == self.gamma {
            // p_k from the retained forward-backward point
            for i in 0..self.p_prev.len() {
                self.p_prev[i] = self.prev_x_hat[i] - self.prev_x[i];
            }
        } else {
            // Step size changed: recompute p_k at the new γ
            let _ = proj_grad_step(
                set_c,
                gamma,
                &self.prev_x,
                &self.prev_grad,
                &mut self.prev_x_hat,
                &mut self.p_prev,
            );
            self.gamma = gamma;
        }

        // s = x_{k+1} - x_k,  y = p_k - p_{k+1}
        for i in 0..self.s.len() {
            self.s[i] = x_next[i] - self.prev_x[i];
            self.y[i] = self.p_prev[i] - (x_hat_next[i] - x_next[i]);
        }
        let accepted = self.inner.update(&self.s, &self.y);

        self.prev_x.copy_from_slice(x_next);
        self.prev_grad.copy_from_slice(grad_next);
        self.prev_x_hat.copy_from_slice(x_hat_next);

        accepted
    }
}
