//! The optimization problem abstraction shared by all optimizers.

use crate::ops;
use crate::Scalar;

/// A differentiable objective over a flat vector of size `size()`.
///
/// Evaluations may mutate internal state (e.g. a stochastic problem
/// advances its mini-batch cursor on every call), hence `&mut self`.
pub trait Problem {
    /// Dimension of the optimization variable.
    fn size(&self) -> usize;

    /// Function value at `x`.
    fn value(&mut self, x: &[Scalar]) -> Scalar;

    /// Function value at `x`, with the gradient written into `g`.
    fn value_and_grad(&mut self, x: &[Scalar], g: &mut [Scalar]) -> Scalar;
}

/// The iterate of an optimizer: position, value, gradient and the current
/// descent direction, plus evaluation counters.
#[derive(Clone, Debug)]
pub struct SolverState {
    pub x: Vec<Scalar>,
    pub f: Scalar,
    pub g: Vec<Scalar>,
    pub d: Vec<Scalar>,
    pub fcalls: usize,
    pub gcalls: usize,
}

impl SolverState {
    /// Evaluates the problem at `x0` and starts from there.
    pub fn new<P: Problem + ?Sized>(problem: &mut P, x0: &[Scalar]) -> Self {
        assert_eq!(problem.size(), x0.len(), "solver: initial point size");
        let mut state = Self {
            x: x0.to_vec(),
            f: 0.0,
            g: vec![0.0; x0.len()],
            d: vec![0.0; x0.len()],
            fcalls: 0,
            gcalls: 0,
        };
        state.f = problem.value_and_grad(&state.x, &mut state.g);
        state.fcalls += 1;
        state.gcalls += 1;
        state
    }

    /// Moves to `x` and re-evaluates value and gradient there.
    pub fn update<P: Problem + ?Sized>(&mut self, problem: &mut P, x: &[Scalar]) {
        self.x.copy_from_slice(x);
        self.f = problem.value_and_grad(&self.x, &mut self.g);
        self.fcalls += 1;
        self.gcalls += 1;
    }

    /// Re-evaluates value and gradient at the current `x` (e.g. on the next
    /// mini-batch of a stochastic problem).
    pub fn reeval<P: Problem + ?Sized>(&mut self, problem: &mut P) {
        self.f = problem.value_and_grad(&self.x, &mut self.g);
        self.fcalls += 1;
        self.gcalls += 1;
    }

    /// Takes the step `x += t * d` and re-evaluates.
    pub fn step<P: Problem + ?Sized>(&mut self, problem: &mut P, t: Scalar) {
        let d = std::mem::take(&mut self.d);
        ops::axpy(t, &d, &mut self.x);
        self.d = d;
        self.f = problem.value_and_grad(&self.x, &mut self.g);
        self.fcalls += 1;
        self.gcalls += 1;
    }

    /// Relative gradient magnitude `|g|_inf / max(1, |f|)` used as the
    /// convergence criterion.
    pub fn convergence_criterion(&self) -> Scalar {
        ops::norm_inf(&self.g) / self.f.abs().max(1.0)
    }

    /// Checks convergence against a tolerance.
    pub fn converged(&self, epsilon: Scalar) -> bool {
        self.convergence_criterion() < epsilon
    }

    /// Slope of the objective along the current direction.
    pub fn dg(&self) -> Scalar {
        ops::dot(&self.d, &self.g)
    }

    /// True when value and gradient are finite.
    pub fn is_finite(&self) -> bool {
        self.f.is_finite() && ops::all_finite(&self.g)
    }
}
