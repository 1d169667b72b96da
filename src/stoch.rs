//! Epoch-based stochastic optimizers with per-coordinate adaptive rates.
//!
//! Every optimizer runs `epochs` epochs of `epoch_size` iterations, each
//! iteration consuming one mini-batch (the problem advances its batch on
//! every evaluation). Once per epoch a snapshot is taken at the designated
//! iterate (the running average for ASGD, the current point otherwise) and
//! reported through the epoch callback.

use crate::errors::{NanoError, NanoResult};
use crate::ops;
use crate::problem::{Problem, SolverState};
use crate::Scalar;

/// The stochastic optimizer variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StochMethod {
    /// Plain stochastic gradient with a decaying schedule.
    Sg,
    /// Averaged stochastic gradient (momentum on the iterate).
    Asgd,
    /// Normalized gradient descent.
    Ngd,
    /// Stochastic gradient with heavy-ball momentum.
    Sgm,
    /// Nesterov's accelerated gradient, no restart.
    Ag,
    /// Accelerated gradient with function-value restart.
    Agfr,
    /// Accelerated gradient with gradient restart.
    Aggr,
    /// Per-coordinate accumulated-square scaling.
    Adagrad,
    /// RMS of past updates over RMS of past gradients.
    Adadelta,
    /// Bias-corrected first/second moment scaling.
    Adam,
}

impl StochMethod {
    pub fn all() -> [StochMethod; 10] {
        [
            StochMethod::Sg,
            StochMethod::Asgd,
            StochMethod::Ngd,
            StochMethod::Sgm,
            StochMethod::Ag,
            StochMethod::Agfr,
            StochMethod::Aggr,
            StochMethod::Adagrad,
            StochMethod::Adadelta,
            StochMethod::Adam,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            StochMethod::Sg => "sg",
            StochMethod::Asgd => "asgd",
            StochMethod::Ngd => "ngd",
            StochMethod::Sgm => "sgm",
            StochMethod::Ag => "ag",
            StochMethod::Agfr => "agfr",
            StochMethod::Aggr => "aggr",
            StochMethod::Adagrad => "adagrad",
            StochMethod::Adadelta => "adadelta",
            StochMethod::Adam => "adam",
        }
    }

    /// Resolves an identifier back to a method.
    ///
    /// # Errors
    ///
    /// Returns `NanoError::InvalidParameter` for an unknown identifier.
    pub fn parse(name: &str) -> NanoResult<Self> {
        StochMethod::all()
            .into_iter()
            .find(|m| m.name() == name)
            .ok_or_else(|| {
                NanoError::InvalidParameter(format!("unknown stochastic optimizer: {name}"))
            })
    }

    /// Sensible hyper-parameter defaults for this method.
    pub fn defaults(self, epochs: usize, epoch_size: usize) -> StochParams {
        let mut p = StochParams {
            epochs,
            epoch_size,
            ..StochParams::default()
        };
        match self {
            StochMethod::Adam => {
                p.alpha0 = 1e-3;
            }
            StochMethod::Adagrad => {
                p.alpha0 = 1e-1;
            }
            StochMethod::Adadelta => {
                p.epsilon = 1e-6;
            }
            _ => {}
        }
        p
    }

    /// The finite grid of configurations evaluated by hyper-parameter
    /// tuning, derived from a base configuration.
    pub fn tuning_grid(self, base: &StochParams) -> Vec<StochParams> {
        const ALPHAS: [Scalar; 3] = [1e-3, 1e-2, 1e-1];
        const DECAYS: [Scalar; 5] = [0.0, 0.1, 0.2, 0.5, 0.9];
        const MOMENTA: [Scalar; 4] = [0.1, 0.2, 0.5, 0.9];
        const EPSILONS: [Scalar; 3] = [1e-8, 1e-6, 1e-4];

        let mut grid = Vec::new();
        let mut push = |f: &dyn Fn(&mut StochParams)| {
            let mut p = *base;
            f(&mut p);
            grid.push(p);
        };
        match self {
            StochMethod::Sg | StochMethod::Ngd => {
                for a in ALPHAS {
                    for d in DECAYS {
                        push(&|p: &mut StochParams| {
                            p.alpha0 = a;
                            p.decay = d;
                        });
                    }
                }
            }
            StochMethod::Sgm | StochMethod::Asgd => {
                for a in ALPHAS {
                    for m in MOMENTA {
                        push(&|p: &mut StochParams| {
                            p.alpha0 = a;
                            p.momentum = m;
                        });
                    }
                }
            }
            StochMethod::Ag | StochMethod::Agfr | StochMethod::Aggr => {
                for a in ALPHAS {
                    push(&|p: &mut StochParams| p.alpha0 = a);
                }
            }
            StochMethod::Adagrad | StochMethod::Adam => {
                for a in ALPHAS {
                    for e in EPSILONS {
                        push(&|p: &mut StochParams| {
                            p.alpha0 = a;
                            p.epsilon = e;
                        });
                    }
                }
            }
            StochMethod::Adadelta => {
                for m in MOMENTA {
                    for e in EPSILONS {
                        push(&|p: &mut StochParams| {
                            p.momentum = m;
                            p.epsilon = e;
                        });
                    }
                }
            }
        }
        grid
    }

    /// Renders the hyper-parameters relevant to this method as a
    /// `key=value` list for the training report.
    pub fn describe(self, p: &StochParams) -> String {
        match self {
            StochMethod::Sg | StochMethod::Ngd => {
                format!("alpha0={:.0e},decay={:.2}", p.alpha0, p.decay)
            }
            StochMethod::Sgm | StochMethod::Asgd => {
                format!("alpha0={:.0e},momentum={:.2}", p.alpha0, p.momentum)
            }
            StochMethod::Ag | StochMethod::Agfr | StochMethod::Aggr => {
                format!("alpha0={:.0e}", p.alpha0)
            }
            StochMethod::Adagrad => {
                format!("alpha0={:.0e},epsilon={:.0e}", p.alpha0, p.epsilon)
            }
            StochMethod::Adadelta => {
                format!("momentum={:.2},epsilon={:.0e}", p.momentum, p.epsilon)
            }
            StochMethod::Adam => format!(
                "alpha0={:.0e},epsilon={:.0e},beta1={:.2},beta2={:.2}",
                p.alpha0, p.epsilon, p.beta1, p.beta2
            ),
        }
    }
}

/// Stochastic loop configuration: schedule sizes plus the union of the
/// per-method hyper-parameters.
#[derive(Clone, Copy, Debug)]
pub struct StochParams {
    pub epochs: usize,
    pub epoch_size: usize,
    /// Base learning rate.
    pub alpha0: Scalar,
    /// Decay exponent of the schedule `alpha0 / (1 + k / tnorm)^decay`.
    pub decay: Scalar,
    /// Normalization of the schedule's iteration counter.
    pub tnorm: Scalar,
    /// Heavy-ball / averaging momentum.
    pub momentum: Scalar,
    /// First-moment EMA rate (ADAM).
    pub beta1: Scalar,
    /// Second-moment EMA rate (ADAM).
    pub beta2: Scalar,
    /// Denominator guard of the adaptive scalings.
    pub epsilon: Scalar,
}

impl Default for StochParams {
    fn default() -> Self {
        Self {
            epochs: 16,
            epoch_size: 1,
            alpha0: 1e-2,
            decay: 0.5,
            tnorm: 1.0,
            momentum: 0.9,
            beta1: 0.9,
            beta2: 0.99,
            epsilon: 1e-8,
        }
    }
}

impl StochParams {
    /// The decayed learning rate at global iteration `k`.
    fn lrate(&self, k: usize) -> Scalar {
        self.alpha0 / (1.0 + k as Scalar / self.tnorm).powf(self.decay)
    }
}

/// Bias-corrected exponential moving average over a theta-shaped buffer.
#[derive(Clone, Debug)]
struct MomentumBuf {
    beta: Scalar,
    betat: Scalar,
    data: Vec<Scalar>,
}

impl MomentumBuf {
    fn new(beta: Scalar, size: usize) -> Self {
        Self {
            beta,
            betat: 1.0,
            data: vec![0.0; size],
        }
    }

    fn update_with(&mut self, values: impl Iterator<Item = Scalar>) {
        self.betat *= self.beta;
        for (d, v) in self.data.iter_mut().zip(values) {
            *d = self.beta * *d + (1.0 - self.beta) * v;
        }
    }

    /// Correction factor turning the raw accumulator into the unbiased
    /// estimate: `value_i = data_i * correction()`.
    fn correction(&self) -> Scalar {
        1.0 / (1.0 - self.betat)
    }

    fn raw(&self) -> &[Scalar] {
        &self.data
    }
}

/// Per-method iteration state: a small fixed set of theta-shaped buffers.
enum MethodState {
    Sg,
    Ngd,
    Sgm {
        m: Vec<Scalar>,
    },
    Asgd {
        xavg: MomentumBuf,
    },
    Ag {
        x1: Vec<Scalar>,
        x2: Vec<Scalar>,
        cx: Vec<Scalar>,
        k: usize,
        prev_f: Scalar,
    },
    Adagrad {
        s: Vec<Scalar>,
    },
    Adadelta {
        gavg: MomentumBuf,
        davg: MomentumBuf,
        d: Vec<Scalar>,
    },
    Adam {
        m: MomentumBuf,
        v: MomentumBuf,
    },
}

impl MethodState {
    fn new(method: StochMethod, params: &StochParams, x0: &[Scalar], f0: Scalar) -> Self {
        let n = x0.len();
        match method {
            StochMethod::Sg => MethodState::Sg,
            StochMethod::Ngd => MethodState::Ngd,
            StochMethod::Sgm => MethodState::Sgm { m: vec![0.0; n] },
            StochMethod::Asgd => MethodState::Asgd {
                xavg: MomentumBuf::new(params.momentum, n),
            },
            StochMethod::Ag | StochMethod::Agfr | StochMethod::Aggr => MethodState::Ag {
                x1: x0.to_vec(),
                x2: x0.to_vec(),
                cx: x0.to_vec(),
                k: 1,
                prev_f: f0,
            },
            StochMethod::Adagrad => MethodState::Adagrad { s: vec![0.0; n] },
            StochMethod::Adadelta => MethodState::Adadelta {
                gavg: MomentumBuf::new(params.momentum, n),
                davg: MomentumBuf::new(params.momentum, n),
                d: vec![0.0; n],
            },
            StochMethod::Adam => MethodState::Adam {
                m: MomentumBuf::new(params.beta1, n),
                v: MomentumBuf::new(params.beta2, n),
            },
        }
    }
}

/// Runs the epoch loop, reporting the per-epoch snapshot to `ulog`; `ulog`
/// returning `false` halts the schedule. Returns the best snapshot by
/// function value.
///
/// # Errors
///
/// Returns `NanoError::InvalidParameter` when the schedule is empty.
pub fn minimize<P, F>(
    method: StochMethod,
    params: &StochParams,
    problem: &mut P,
    x0: &[Scalar],
    mut ulog: F,
) -> NanoResult<SolverState>
where
    P: Problem + ?Sized,
    F: FnMut(&mut P, &SolverState) -> bool,
{
    if params.epochs == 0 || params.epoch_size == 0 {
        return Err(NanoError::InvalidParameter(
            "stochastic schedule must cover at least one iteration".into(),
        ));
    }

    let mut cstate = SolverState::new(problem, x0);
    let mut mstate = MethodState::new(method, params, x0, cstate.f);
    let mut sstate = cstate.clone();
    let mut best = cstate.clone();

    let mut k: usize = 1;
    'epochs: for _epoch in 0..params.epochs {
        for _ in 0..params.epoch_size {
            step(method, params, problem, &mut cstate, &mut mstate, k);
            k += 1;
        }

        // per-epoch snapshot at the designated iterate
        match &mstate {
            MethodState::Asgd { xavg } => {
                let c = xavg.correction();
                let at: Vec<Scalar> = xavg.raw().iter().map(|v| v * c).collect();
                sstate.update(problem, &at);
            }
            _ => {
                sstate.update(problem, &cstate.x);
            }
        }
        if sstate.f <= best.f {
            best = sstate.clone();
        }
        if !ulog(problem, &sstate) {
            break 'epochs;
        }
    }
    Ok(best)
}

/// One stochastic iteration: a pure transition of `(x, buffers)` given the
/// gradient of the current mini-batch, followed by the evaluation of the
/// next mini-batch at the new iterate.
fn step<P: Problem + ?Sized>(
    method: StochMethod,
    params: &StochParams,
    problem: &mut P,
    cstate: &mut SolverState,
    mstate: &mut MethodState,
    k: usize,
) {
    match mstate {
        MethodState::Sg => {
            let alpha = params.lrate(k);
            for (xv, gv) in cstate.x.iter_mut().zip(&cstate.g) {
                *xv -= alpha * gv;
            }
        }
        MethodState::Ngd => {
            let norm = ops::norm_l2(&cstate.g);
            if norm > 0.0 {
                let alpha = params.lrate(k) / norm;
                for (xv, gv) in cstate.x.iter_mut().zip(&cstate.g) {
                    *xv -= alpha * gv;
                }
            }
        }
        MethodState::Sgm { m } => {
            for (mv, gv) in m.iter_mut().zip(&cstate.g) {
                *mv = params.momentum * *mv + gv;
            }
            ops::axpy(-params.lrate(k), m, &mut cstate.x);
        }
        MethodState::Asgd { xavg } => {
            // average the pre-update iterate
            xavg.update_with(cstate.x.iter().copied());
            let alpha = params.lrate(k);
            for (xv, gv) in cstate.x.iter_mut().zip(&cstate.g) {
                *xv -= alpha * gv;
            }
        }
        MethodState::Ag {
            x1,
            x2,
            cx,
            k: ka,
            prev_f,
        } => {
            // lookahead: cx = x1 + m * (x1 - x2), m = (k - 1) / (k + 2)
            let m = (*ka as Scalar - 1.0) / (*ka as Scalar + 2.0);
            for ((c, a), b) in cx.iter_mut().zip(x1.iter()).zip(x2.iter()) {
                *c = a + m * (a - b);
            }
            cstate.update(problem, cx);
            let restart = match method {
                StochMethod::Agfr => cstate.f > *prev_f,
                StochMethod::Aggr => {
                    cx.iter()
                        .zip(x1.iter())
                        .zip(&cstate.g)
                        .map(|((c, a), g)| g * (c - a))
                        .sum::<Scalar>()
                        > 0.0
                }
                _ => false,
            };
            *ka = if restart { 1 } else { *ka + 1 };
            *prev_f = cstate.f;
            for (c, gv) in cx.iter_mut().zip(&cstate.g) {
                *c -= params.alpha0 * gv;
            }
            std::mem::swap(x2, x1);
            x1.copy_from_slice(cx);
            cstate.x.copy_from_slice(cx);
            // the iterate was already advanced and evaluated above
            return;
        }
        MethodState::Adagrad { s } => {
            for (sv, gv) in s.iter_mut().zip(&cstate.g) {
                *sv += gv * gv;
            }
            for ((xv, gv), sv) in cstate.x.iter_mut().zip(&cstate.g).zip(s.iter()) {
                *xv -= params.alpha0 * gv / (params.epsilon + *sv).sqrt();
            }
        }
        MethodState::Adadelta { gavg, davg, d } => {
            gavg.update_with(cstate.g.iter().map(|g| g * g));
            let gc = gavg.correction();
            let dc = davg.correction();
            for (((dv, gv), ga), da) in d
                .iter_mut()
                .zip(&cstate.g)
                .zip(gavg.raw())
                .zip(davg.raw())
            {
                *dv = -gv * (params.epsilon + (da * dc).sqrt())
                    / (params.epsilon + (ga * gc).sqrt());
            }
            davg.update_with(d.iter().map(|v| v * v));
            ops::axpy(1.0, d, &mut cstate.x);
        }
        MethodState::Adam { m, v } => {
            m.update_with(cstate.g.iter().copied());
            v.update_with(cstate.g.iter().map(|g| g * g));
            let mc = m.correction();
            let vc = v.correction();
            for ((xv, mv), vv) in cstate.x.iter_mut().zip(m.raw()).zip(v.raw()) {
                *xv -= params.alpha0 * (mv * mc) / (params.epsilon + (vv * vc).sqrt());
            }
        }
    }
    // evaluate the next mini-batch at the new iterate
    cstate.reeval(problem);
}
