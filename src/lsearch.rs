//! Line-search step initialization and step-length strategies for the
//! batch optimizers.

use crate::ops;
use crate::problem::{Problem, SolverState};
use crate::Scalar;

const MAX_BACKTRACKS: usize = 64;
const MAX_BRACKETS: usize = 40;
const MAX_ZOOMS: usize = 40;
const STEP_MIN: Scalar = 1e-18;
const STEP_MAX: Scalar = 1e+9;

/// Heuristics choosing the first trial step length of an iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepInit {
    /// Always start from `t0 = 1`.
    Unit,
    /// Keep `t0 * <d, g>` consistent with the previous iteration.
    Consistent,
    /// Quadratic interpolation of the previous function decrease.
    Quadratic,
}

/// Stateful initial-step policy; tracks the previous function value, step
/// and slope the way CG_DESCENT initializes its first trial.
#[derive(Clone, Debug)]
pub struct LsInit {
    kind: StepInit,
    first: bool,
    prev_f: Scalar,
    prev_t0: Scalar,
    prev_dg: Scalar,
}

impl LsInit {
    pub fn new(kind: StepInit) -> Self {
        Self {
            kind,
            first: true,
            prev_f: 0.0,
            prev_t0: 1.0,
            prev_dg: 1.0,
        }
    }

    /// Computes the initial step length for the current iterate.
    pub fn t0(&mut self, state: &SolverState) -> Scalar {
        let mut t0 = 1.0;
        if self.first {
            // first trial, scaled off the magnitude of the starting point
            let phi0 = 0.01;
            let xnorm = ops::norm_inf(&state.x);
            let fnorm = state.f.abs();
            if xnorm > 0.0 {
                t0 = phi0 * xnorm / ops::norm_inf(&state.g);
            } else if fnorm > 0.0 {
                t0 = phi0 * fnorm / ops::dot(&state.g, &state.g);
            }
            if self.kind == StepInit::Consistent {
                self.prev_dg = state.dg();
            }
        } else {
            match self.kind {
                StepInit::Unit => t0 = 1.0,
                StepInit::Consistent => {
                    let dg = state.dg();
                    t0 = self.prev_t0 * self.prev_dg / dg;
                    self.prev_dg = dg;
                }
                StepInit::Quadratic => {
                    let dg = state.dg();
                    t0 = (1.01 * 2.0 * (state.f - self.prev_f) / dg).min(1.0);
                }
            }
        }
        if !t0.is_finite() || t0 <= 0.0 {
            t0 = 1.0;
        }
        self.first = false;
        self.prev_f = state.f;
        self.prev_t0 = t0;
        t0
    }
}

/// The step-length acceptance strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepStrategy {
    /// Backtracking with the Armijo sufficient-decrease condition.
    Backtrack,
    /// Bracketing with cubic interpolation under the strong Wolfe
    /// conditions.
    Interpolate,
    /// The CG_DESCENT variant: the same bracketing, accepting either the
    /// strong Wolfe or the approximate Wolfe conditions.
    CgDescent,
}

/// Line search along `state.d`, parameterized by the sufficient-decrease
/// and curvature constants.
#[derive(Clone, Copy, Debug)]
pub struct LineSearch {
    pub strategy: StepStrategy,
    pub c1: Scalar,
    pub c2: Scalar,
}

impl LineSearch {
    pub fn new(strategy: StepStrategy) -> Self {
        Self {
            strategy,
            c1: 1e-4,
            c2: 0.1,
        }
    }

    /// Searches for an acceptable step from the trial length `t0` and, on
    /// success, advances `state` to the accepted point (value and gradient
    /// re-evaluated there). Returns `false` if no acceptable step exists
    /// along the current direction.
    pub fn search<P: Problem + ?Sized>(
        &self,
        problem: &mut P,
        t0: Scalar,
        state: &mut SolverState,
    ) -> bool {
        let dg0 = state.dg();
        if !(dg0 < 0.0) || !t0.is_finite() || t0 <= 0.0 {
            return false;
        }
        let mut phi = Phi::new(problem, state);
        let accepted = match self.strategy {
            StepStrategy::Backtrack => self.backtrack(&mut phi, t0, state.f, dg0),
            StepStrategy::Interpolate => self.wolfe(&mut phi, t0, state.f, dg0, false),
            StepStrategy::CgDescent => self.wolfe(&mut phi, t0, state.f, dg0, true),
        };
        match accepted {
            Some((_t, f)) => {
                state.x.copy_from_slice(&phi.xt);
                state.g.copy_from_slice(&phi.gt);
                state.f = f;
                state.fcalls += phi.fcalls;
                state.gcalls += phi.gcalls;
                true
            }
            None => {
                state.fcalls += phi.fcalls;
                state.gcalls += phi.gcalls;
                false
            }
        }
    }

    fn backtrack<P: Problem + ?Sized>(
        &self,
        phi: &mut Phi<'_, P>,
        t0: Scalar,
        f0: Scalar,
        dg0: Scalar,
    ) -> Option<(Scalar, Scalar)> {
        let mut t = t0;
        for _ in 0..MAX_BACKTRACKS {
            let (ft, _) = phi.eval(t);
            if ft.is_finite() && ft <= f0 + self.c1 * t * dg0 {
                return Some((t, ft));
            }
            t *= 0.5;
            if t < STEP_MIN {
                break;
            }
        }
        None
    }

    /// Bracketing phase of the strong-Wolfe search (Nocedal & Wright,
    /// algorithm 3.5), falling into `zoom` once a bracket is found.
    fn wolfe<P: Problem + ?Sized>(
        &self,
        phi: &mut Phi<'_, P>,
        t0: Scalar,
        f0: Scalar,
        dg0: Scalar,
        approx: bool,
    ) -> Option<(Scalar, Scalar)> {
        let mut prev = Step {
            t: 0.0,
            f: f0,
            dg: dg0,
        };
        let mut t = t0;
        for iter in 0..MAX_BRACKETS {
            let (ft, dgt) = phi.eval(t);
            if !ft.is_finite() {
                // overshot into a non-finite region, pull the trial back
                return self.zoom(phi, f0, dg0, prev, Step { t, f: ft, dg: dgt }, approx);
            }
            let cur = Step { t, f: ft, dg: dgt };
            if ft > f0 + self.c1 * t * dg0 || (iter > 0 && ft >= prev.f) {
                return self.zoom(phi, f0, dg0, prev, cur, approx);
            }
            if self.acceptable(f0, dg0, &cur, approx) {
                return Some((t, ft));
            }
            if dgt >= 0.0 {
                return self.zoom(phi, f0, dg0, cur, prev, approx);
            }
            prev = cur;
            t *= 2.0;
            if t > STEP_MAX {
                break;
            }
        }
        None
    }

    /// Sectioning phase: shrinks `[lo, hi]` with safeguarded cubic
    /// interpolation until an acceptable step emerges.
    fn zoom<P: Problem + ?Sized>(
        &self,
        phi: &mut Phi<'_, P>,
        f0: Scalar,
        dg0: Scalar,
        mut lo: Step,
        mut hi: Step,
        approx: bool,
    ) -> Option<(Scalar, Scalar)> {
        for _ in 0..MAX_ZOOMS {
            if (hi.t - lo.t).abs() < STEP_MIN {
                break;
            }
            let t = cubic_step(&lo, &hi);
            let (ft, dgt) = phi.eval(t);
            let cur = Step { t, f: ft, dg: dgt };
            if !ft.is_finite() || ft > f0 + self.c1 * t * dg0 || ft >= lo.f {
                hi = cur;
            } else {
                if self.acceptable(f0, dg0, &cur, approx) {
                    return Some((t, ft));
                }
                if dgt * (hi.t - lo.t) >= 0.0 {
                    hi = lo;
                }
                lo = cur;
            }
        }
        None
    }

    fn acceptable(&self, f0: Scalar, dg0: Scalar, step: &Step, approx: bool) -> bool {
        let armijo = step.f <= f0 + self.c1 * step.t * dg0;
        let wolfe = armijo && step.dg.abs() <= -self.c2 * dg0;
        if wolfe {
            return true;
        }
        if approx {
            // approximate Wolfe: slope bracket plus a relaxed value bound
            let awolfe = (2.0 * self.c1 - 1.0) * dg0 >= step.dg
                && step.dg >= self.c2 * dg0
                && step.f <= f0 + 1e-6 * f0.abs().max(1.0);
            return awolfe;
        }
        false
    }
}

#[derive(Clone, Copy, Debug)]
struct Step {
    t: Scalar,
    f: Scalar,
    dg: Scalar,
}

/// Minimizer of the cubic interpolant through two bracketing steps,
/// safeguarded into the interior of the bracket.
fn cubic_step(lo: &Step, hi: &Step) -> Scalar {
    let (tmin, tmax) = if lo.t < hi.t {
        (lo.t, hi.t)
    } else {
        (hi.t, lo.t)
    };
    let width = tmax - tmin;
    let mut t = 0.5 * (tmin + tmax);
    if lo.f.is_finite() && hi.f.is_finite() && lo.dg.is_finite() && hi.dg.is_finite() {
        let d1 = lo.dg + hi.dg - 3.0 * (lo.f - hi.f) / (lo.t - hi.t);
        let d2sq = d1 * d1 - lo.dg * hi.dg;
        if d2sq >= 0.0 {
            let d2 = d2sq.sqrt() * (hi.t - lo.t).signum();
            let cand =
                hi.t - (hi.t - lo.t) * (hi.dg + d2 - d1) / (hi.dg - lo.dg + 2.0 * d2);
            if cand.is_finite() {
                t = cand;
            }
        }
    }
    // keep the trial strictly inside the bracket
    t.clamp(tmin + 0.1 * width, tmax - 0.1 * width)
}

/// Evaluator of the one-dimensional restriction `phi(t) = f(x + t * d)`.
struct Phi<'a, P: Problem + ?Sized> {
    problem: &'a mut P,
    x0: Vec<Scalar>,
    d: Vec<Scalar>,
    xt: Vec<Scalar>,
    gt: Vec<Scalar>,
    fcalls: usize,
    gcalls: usize,
}

impl<'a, P: Problem + ?Sized> Phi<'a, P> {
    fn new(problem: &'a mut P, state: &SolverState) -> Self {
        Self {
            problem,
            x0: state.x.clone(),
            d: state.d.clone(),
            xt: vec![0.0; state.x.len()],
            gt: vec![0.0; state.x.len()],
            fcalls: 0,
            gcalls: 0,
        }
    }

    /// `(phi(t), phi'(t))`; leaves the trial point in `self.xt`/`self.gt`.
    fn eval(&mut self, t: Scalar) -> (Scalar, Scalar) {
        self.xt.copy_from_slice(&self.x0);
        ops::axpy(t, &self.d, &mut self.xt);
        let f = self.problem.value_and_grad(&self.xt, &mut self.gt);
        self.fcalls += 1;
        self.gcalls += 1;
        (f, ops::dot(&self.gt, &self.d))
    }
}
