//! The loss palette: classification and regression losses with analytic
//! output gradients and the associated error metrics.
//!
//! Classification losses act on class-target vectors in `{+1, -1}^O`.
//! The multi-label variants (`M*`) score every coordinate; the
//! single-label variants (`S*`) apply the inner scalar loss only at the
//! index the target marks positive, for one-hot targets. Regression
//! losses (`R*`) accept arbitrary real targets.

use crate::activations::{logistic, softplus};
use crate::errors::{NanoError, NanoResult};
use crate::Scalar;

/// Target value of the positive class.
pub fn pos_target() -> Scalar {
    1.0
}

/// Target value of the negative class.
pub fn neg_target() -> Scalar {
    -1.0
}

/// Class-target vector for single-label problems: `+1` at `label`,
/// `-1` elsewhere.
pub fn class_target(label: usize, n_labels: usize) -> Vec<Scalar> {
    let mut t = vec![neg_target(); n_labels];
    if label < n_labels {
        t[label] = pos_target();
    }
    t
}

fn argmax(x: &[Scalar]) -> usize {
    let mut best = 0;
    for (i, v) in x.iter().enumerate() {
        if *v > x[best] {
            best = i;
        }
    }
    best
}

/// A loss maps `(target, output)` of equal dimensions to a scalar value and
/// provides the gradient with respect to the output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Loss {
    /// Multiclass logistic: `sum(log(1 + exp(-t_k * s_k)))`.
    MLogistic,
    /// Multiclass exponential: `sum(exp(-t_k * s_k))`.
    MExponential,
    /// Multiclass square: `1/2 * |t - s|^2`.
    MSquare,
    /// Multiclass Cauchy: `log(1 + |t - s|^2)`.
    MCauchy,
    /// Single-label logistic.
    SLogistic,
    /// Single-label exponential.
    SExponential,
    /// Single-label square.
    SSquare,
    /// Single-label Cauchy.
    SCauchy,
    /// Regression square.
    RSquare,
    /// Regression Cauchy.
    RCauchy,
}

impl Loss {
    /// Stable identifier.
    pub fn name(self) -> &'static str {
        match self {
            Loss::MLogistic => "m-logistic",
            Loss::MExponential => "m-exponential",
            Loss::MSquare => "m-square",
            Loss::MCauchy => "m-cauchy",
            Loss::SLogistic => "s-logistic",
            Loss::SExponential => "s-exponential",
            Loss::SSquare => "s-square",
            Loss::SCauchy => "s-cauchy",
            Loss::RSquare => "square",
            Loss::RCauchy => "cauchy",
        }
    }

    /// Resolves an identifier back to a loss.
    ///
    /// # Errors
    ///
    /// Returns `NanoError::InvalidParameter` for an unknown identifier.
    pub fn parse(name: &str) -> NanoResult<Self> {
        Loss::all()
            .into_iter()
            .find(|l| l.name() == name)
            .ok_or_else(|| NanoError::InvalidParameter(format!("unknown loss: {name}")))
    }

    /// All loss variants, in a stable order.
    pub fn all() -> [Loss; 10] {
        [
            Loss::MLogistic,
            Loss::MExponential,
            Loss::MSquare,
            Loss::MCauchy,
            Loss::SLogistic,
            Loss::SExponential,
            Loss::SSquare,
            Loss::SCauchy,
            Loss::RSquare,
            Loss::RCauchy,
        ]
    }

    /// Loss value for a `(target, output)` pair of equal dimensions.
    ///
    /// # Panics
    ///
    /// Panics if the slices differ in length.
    pub fn value(self, target: &[Scalar], output: &[Scalar]) -> Scalar {
        assert_eq!(target.len(), output.len(), "loss: dimensions");
        match self {
            Loss::MLogistic => target
                .iter()
                .zip(output)
                .map(|(t, s)| softplus(-t * s))
                .sum(),
            Loss::MExponential => target
                .iter()
                .zip(output)
                .map(|(t, s)| (-t * s).exp())
                .sum(),
            Loss::MSquare | Loss::RSquare => {
                0.5 * target
                    .iter()
                    .zip(output)
                    .map(|(t, s)| (t - s) * (t - s))
                    .sum::<Scalar>()
            }
            Loss::MCauchy | Loss::RCauchy => {
                let d2 = target
                    .iter()
                    .zip(output)
                    .map(|(t, s)| (t - s) * (t - s))
                    .sum::<Scalar>();
                d2.ln_1p()
            }
            Loss::SLogistic => {
                let k = argmax(target);
                softplus(-target[k] * output[k])
            }
            Loss::SExponential => {
                let k = argmax(target);
                (-target[k] * output[k]).exp()
            }
            Loss::SSquare => {
                let k = argmax(target);
                let d = target[k] - output[k];
                0.5 * d * d
            }
            Loss::SCauchy => {
                let k = argmax(target);
                let d = target[k] - output[k];
                (d * d).ln_1p()
            }
        }
    }

    /// Gradient of the loss with respect to the output, written into `g`.
    ///
    /// # Panics
    ///
    /// Panics if the slices differ in length.
    pub fn vgrad(self, target: &[Scalar], output: &[Scalar], g: &mut [Scalar]) {
        assert_eq!(target.len(), output.len(), "loss: dimensions");
        assert_eq!(target.len(), g.len(), "loss: gradient dimensions");
        match self {
            Loss::MLogistic => {
                for ((gv, t), s) in g.iter_mut().zip(target).zip(output) {
                    *gv = -t * logistic(-t * s);
                }
            }
            Loss::MExponential => {
                for ((gv, t), s) in g.iter_mut().zip(target).zip(output) {
                    *gv = -t * (-t * s).exp();
                }
            }
            Loss::MSquare | Loss::RSquare => {
                for ((gv, t), s) in g.iter_mut().zip(target).zip(output) {
                    *gv = s - t;
                }
            }
            Loss::MCauchy | Loss::RCauchy => {
                let d2 = target
                    .iter()
                    .zip(output)
                    .map(|(t, s)| (t - s) * (t - s))
                    .sum::<Scalar>();
                for ((gv, t), s) in g.iter_mut().zip(target).zip(output) {
                    *gv = 2.0 * (s - t) / (1.0 + d2);
                }
            }
            Loss::SLogistic => {
                g.fill(0.0);
                let k = argmax(target);
                g[k] = -target[k] * logistic(-target[k] * output[k]);
            }
            Loss::SExponential => {
                g.fill(0.0);
                let k = argmax(target);
                g[k] = -target[k] * (-target[k] * output[k]).exp();
            }
            Loss::SSquare => {
                g.fill(0.0);
                let k = argmax(target);
                g[k] = output[k] - target[k];
            }
            Loss::SCauchy => {
                g.fill(0.0);
                let k = argmax(target);
                let d = target[k] - output[k];
                g[k] = 2.0 * (output[k] - target[k]) / (1.0 + d * d);
            }
        }
    }

    /// Error metric, distinct from the loss value: the 0/1 argmax indicator
    /// for single-label losses, the Hamming distance over the sign pattern
    /// for multi-label losses, and the L1 distance for regression.
    pub fn error(self, target: &[Scalar], output: &[Scalar]) -> Scalar {
        assert_eq!(target.len(), output.len(), "loss: dimensions");
        match self {
            Loss::SLogistic | Loss::SExponential | Loss::SSquare | Loss::SCauchy => {
                if argmax(output) == argmax(target) {
                    0.0
                } else {
                    1.0
                }
            }
            Loss::MLogistic | Loss::MExponential | Loss::MSquare | Loss::MCauchy => target
                .iter()
                .zip(output)
                .filter(|(t, s)| (**t > 0.0) != (**s > 0.0))
                .count() as Scalar,
            Loss::RSquare | Loss::RCauchy => target
                .iter()
                .zip(output)
                .map(|(t, s)| (t - s).abs())
                .sum(),
        }
    }
}
