//! Batch optimizers driven by line search: steepest descent, nonlinear
//! conjugate gradient and limited-memory quasi-Newton.

use crate::errors::{NanoError, NanoResult};
use crate::lsearch::{LineSearch, LsInit, StepInit, StepStrategy};
use crate::ops;
use crate::problem::{Problem, SolverState};
use crate::Scalar;
use std::collections::VecDeque;

/// The conjugate-gradient direction update rules. The last five bound the
/// update between two of the base rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CgdUpdate {
    /// Hestenes-Stiefel.
    Hs,
    /// Fletcher-Reeves.
    Fr,
    /// Polak-Ribiere, clipped at zero.
    Prp,
    /// Conjugate descent (Fletcher).
    Cd,
    /// Liu-Storey.
    Ls,
    /// Dai-Yuan.
    Dy,
    /// Hager-Zhang.
    N,
    /// Dai-Yuan bounded by conjugate descent.
    Dycd,
    /// Dai-Yuan bounded by Hestenes-Stiefel.
    Dyhs,
}

impl CgdUpdate {
    pub fn all() -> [CgdUpdate; 9] {
        [
            CgdUpdate::Hs,
            CgdUpdate::Fr,
            CgdUpdate::Prp,
            CgdUpdate::Cd,
            CgdUpdate::Ls,
            CgdUpdate::Dy,
            CgdUpdate::N,
            CgdUpdate::Dycd,
            CgdUpdate::Dyhs,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            CgdUpdate::Hs => "cgd-hs",
            CgdUpdate::Fr => "cgd-fr",
            CgdUpdate::Prp => "cgd-prp",
            CgdUpdate::Cd => "cgd-cd",
            CgdUpdate::Ls => "cgd-ls",
            CgdUpdate::Dy => "cgd-dy",
            CgdUpdate::N => "cgd-n",
            CgdUpdate::Dycd => "cgd-dycd",
            CgdUpdate::Dyhs => "cgd-dyhs",
        }
    }

    /// The update coefficient from the previous and current iterates.
    /// Degenerate denominators yield zero, which falls back to steepest
    /// descent.
    fn beta(self, prev: &SolverState, cur: &SolverState) -> Scalar {
        let safe = |num: Scalar, den: Scalar| {
            let b = num / den;
            if b.is_finite() { b } else { 0.0 }
        };
        let mut y = cur.g.clone();
        ops::axpy(-1.0, &prev.g, &mut y);
        let dy = ops::dot(&prev.d, &y);
        let gy = ops::dot(&cur.g, &y);
        let gg = ops::dot(&cur.g, &cur.g);
        let pgg = ops::dot(&prev.g, &prev.g);
        let pdg = ops::dot(&prev.d, &prev.g);
        match self {
            CgdUpdate::Hs => safe(gy, dy),
            CgdUpdate::Fr => safe(gg, pgg),
            CgdUpdate::Prp => safe(gy, pgg).max(0.0),
            CgdUpdate::Cd => safe(gg, -pdg),
            CgdUpdate::Ls => safe(gy, -pdg),
            CgdUpdate::Dy => safe(gg, dy),
            CgdUpdate::N => {
                let yy = ops::dot(&y, &y);
                let dg = ops::dot(&prev.d, &cur.g);
                safe(gy - 2.0 * dg * safe(yy, dy), dy)
            }
            CgdUpdate::Dycd => safe(gg, dy).min(safe(gg, -pdg)).max(0.0),
            CgdUpdate::Dyhs => safe(gg, dy).min(safe(gy, dy)).max(0.0),
        }
    }
}

/// Direction variants of the batch loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchMethod {
    /// Steepest (gradient) descent.
    Gd,
    /// Nonlinear conjugate gradient with the given update rule.
    Cgd(CgdUpdate),
    /// Limited-memory BFGS; the history length is clamped to `[3, 20]`.
    Lbfgs { history: usize },
}

impl BatchMethod {
    pub fn name(self) -> String {
        match self {
            BatchMethod::Gd => "gd".to_string(),
            BatchMethod::Cgd(u) => u.name().to_string(),
            BatchMethod::Lbfgs { history } => format!("lbfgs:{}", history.clamp(3, 20)),
        }
    }
}

/// Batch loop configuration.
#[derive(Clone, Copy, Debug)]
pub struct BatchParams {
    pub max_iterations: usize,
    pub epsilon: Scalar,
    pub ls_init: StepInit,
    pub ls_strategy: StepStrategy,
}

impl Default for BatchParams {
    fn default() -> Self {
        Self {
            max_iterations: 1024,
            epsilon: 1e-6,
            ls_init: StepInit::Quadratic,
            ls_strategy: StepStrategy::Interpolate,
        }
    }
}

/// Curvature-pair memory for the L-BFGS two-loop recursion.
struct LbfgsMemory {
    history: usize,
    pairs: VecDeque<(Vec<Scalar>, Vec<Scalar>)>,
}

impl LbfgsMemory {
    fn new(history: usize) -> Self {
        Self {
            history: history.clamp(3, 20),
            pairs: VecDeque::new(),
        }
    }

    fn clear(&mut self) {
        self.pairs.clear();
    }

    fn push(&mut self, prev: &SolverState, cur: &SolverState) {
        let mut s = cur.x.clone();
        ops::axpy(-1.0, &prev.x, &mut s);
        let mut y = cur.g.clone();
        ops::axpy(-1.0, &prev.g, &mut y);
        // keep the inverse-Hessian approximation positive definite
        if ops::dot(&s, &y) <= 0.0 {
            return;
        }
        if self.pairs.len() == self.history {
            self.pairs.pop_front();
        }
        self.pairs.push_back((s, y));
    }

    /// Two-loop recursion: `d = -H * g`.
    fn direction(&self, g: &[Scalar], d: &mut [Scalar]) {
        d.copy_from_slice(g);
        if self.pairs.is_empty() {
            ops::scale(-1.0, d);
            return;
        }
        let mut alphas = vec![0.0; self.pairs.len()];
        for (i, (s, y)) in self.pairs.iter().enumerate().rev() {
            let rho = 1.0 / ops::dot(y, s);
            let a = rho * ops::dot(s, d);
            alphas[i] = a;
            ops::axpy(-a, y, d);
        }
        let (s, y) = self.pairs.back().unwrap();
        ops::scale(ops::dot(s, y) / ops::dot(y, y), d);
        for (i, (s, y)) in self.pairs.iter().enumerate() {
            let rho = 1.0 / ops::dot(y, s);
            let b = rho * ops::dot(y, d);
            ops::axpy(alphas[i] - b, s, d);
        }
        ops::scale(-1.0, d);
    }
}

/// Minimizes `problem` from `x0`, reporting the current iterate to `ulog`
/// once per iteration; `ulog` returning `false` halts the loop.
///
/// Directions that fail the descent test `<d, g> < 0` reset to steepest
/// descent. A failed line search is retried once from steepest descent
/// within the same iteration and surfaced if it fails again.
///
/// # Errors
///
/// Returns `NanoError::LineSearchFailure` when no acceptable step exists
/// even along the steepest-descent direction of an unconverged iterate.
pub fn minimize<P, F>(
    method: BatchMethod,
    params: &BatchParams,
    problem: &mut P,
    x0: &[Scalar],
    mut ulog: F,
) -> NanoResult<SolverState>
where
    P: Problem + ?Sized,
    F: FnMut(&mut P, &SolverState) -> bool,
{
    let mut cstate = SolverState::new(problem, x0);
    let mut pstate = cstate.clone();
    let mut ls_init = LsInit::new(params.ls_init);
    let ls = LineSearch::new(params.ls_strategy);
    let mut memory = match method {
        BatchMethod::Lbfgs { history } => Some(LbfgsMemory::new(history)),
        _ => None,
    };

    for iteration in 0..params.max_iterations {
        if !ulog(problem, &cstate) {
            break;
        }
        if cstate.converged(params.epsilon) {
            break;
        }

        // descent direction
        match (&method, &mut memory) {
            (BatchMethod::Gd, _) => steepest(&mut cstate),
            (BatchMethod::Cgd(update), _) => {
                if iteration == 0 {
                    steepest(&mut cstate);
                } else {
                    let beta = update.beta(&pstate, &cstate);
                    for ((dv, gv), pd) in
                        cstate.d.iter_mut().zip(&cstate.g).zip(&pstate.d)
                    {
                        *dv = -gv + beta * pd;
                    }
                }
            }
            (BatchMethod::Lbfgs { .. }, Some(memory)) => {
                let mut d = std::mem::take(&mut cstate.d);
                memory.direction(&cstate.g, &mut d);
                cstate.d = d;
            }
            _ => unreachable!(),
        }
        if cstate.dg() >= 0.0 {
            steepest(&mut cstate);
            if let Some(memory) = &mut memory {
                memory.clear();
            }
        }

        pstate = cstate.clone();
        let t0 = ls_init.t0(&cstate);
        if !ls.search(problem, t0, &mut cstate) {
            if cstate.converged(params.epsilon) {
                break;
            }
            // one retry from steepest descent, then give up
            steepest(&mut cstate);
            if let Some(memory) = &mut memory {
                memory.clear();
            }
            if !ls.search(problem, 1.0, &mut cstate) {
                return Err(NanoError::LineSearchFailure(format!(
                    "no acceptable step at iteration {iteration}"
                )));
            }
        }
        if let Some(memory) = &mut memory {
            memory.push(&pstate, &cstate);
        }
    }
    Ok(cstate)
}

fn steepest(state: &mut SolverState) {
    for (dv, gv) in state.d.iter_mut().zip(&state.g) {
        *dv = -gv;
    }
}
