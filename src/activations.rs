//! Elementwise activation functions and their derivatives.

use crate::errors::{NanoError, NanoResult};
use crate::Scalar;

/// Numerically stable logistic function $\sigma(x) = \frac{e^x}{1 + e^x}$.
pub fn logistic(x: Scalar) -> Scalar {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Numerically stable soft-plus $\log(1 + e^x)$.
pub fn softplus(x: Scalar) -> Scalar {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

/// The palette of elementwise, parameterless activation functions.
///
/// Each variant is a pair `(phi, phi')`; the backward pass multiplies the
/// output gradient by `phi'` evaluated at the cached pre-activation input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActKind {
    /// `x`
    Identity,
    /// `tanh(x)`
    Tanh,
    /// `log(1 + exp(x))`
    Softplus,
    /// `x / sqrt(1 + x^2)`
    Snorm,
    /// `exp(x) / (1 + exp(x))`
    Logistic,
    /// `sin(x)`
    Sine,
    /// `x / (1 + x^2)`
    Pwave,
}

impl ActKind {
    /// Short stable identifier, also used in serialized layer names.
    pub fn name(self) -> &'static str {
        match self {
            ActKind::Identity => "act-unit",
            ActKind::Tanh => "act-tanh",
            ActKind::Softplus => "act-splus",
            ActKind::Snorm => "act-snorm",
            ActKind::Logistic => "act-sigm",
            ActKind::Sine => "act-sin",
            ActKind::Pwave => "act-pwave",
        }
    }

    /// Resolves an identifier back to an activation.
    ///
    /// # Errors
    ///
    /// Returns `NanoError::InvalidParameter` for an unknown identifier.
    pub fn parse(name: &str) -> NanoResult<Self> {
        match name {
            "act-unit" => Ok(ActKind::Identity),
            "act-tanh" => Ok(ActKind::Tanh),
            "act-splus" => Ok(ActKind::Softplus),
            "act-snorm" => Ok(ActKind::Snorm),
            "act-sigm" => Ok(ActKind::Logistic),
            "act-sin" => Ok(ActKind::Sine),
            "act-pwave" => Ok(ActKind::Pwave),
            _ => Err(NanoError::InvalidParameter(format!(
                "unknown activation: {name}"
            ))),
        }
    }

    /// Evaluates `phi(x)`.
    pub fn eval(self, x: Scalar) -> Scalar {
        match self {
            ActKind::Identity => x,
            ActKind::Tanh => x.tanh(),
            ActKind::Softplus => softplus(x),
            ActKind::Snorm => x / (1.0 + x * x).sqrt(),
            ActKind::Logistic => logistic(x),
            ActKind::Sine => x.sin(),
            ActKind::Pwave => x / (1.0 + x * x),
        }
    }

    /// Evaluates the derivative `phi'(x)`.
    pub fn deriv(self, x: Scalar) -> Scalar {
        match self {
            ActKind::Identity => 1.0,
            ActKind::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
            ActKind::Softplus => logistic(x),
            ActKind::Snorm => {
                let d = 1.0 + x * x;
                1.0 / (d * d.sqrt())
            }
            ActKind::Logistic => {
                let s = logistic(x);
                s * (1.0 - s)
            }
            ActKind::Sine => x.cos(),
            ActKind::Pwave => {
                let d = 1.0 + x * x;
                (1.0 - x * x) / (d * d)
            }
        }
    }

    /// All activation variants, in a stable order.
    pub fn all() -> [ActKind; 7] {
        [
            ActKind::Identity,
            ActKind::Tanh,
            ActKind::Softplus,
            ActKind::Snorm,
            ActKind::Logistic,
            ActKind::Sine,
            ActKind::Pwave,
        ]
    }
}
