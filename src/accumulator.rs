//! Worker-local evaluation of a model over sample ranges.
//!
//! An accumulator binds one model clone, one loss and an optional L2
//! regularization coefficient. It tracks running sums (sample count, loss
//! value, error, squared error and optionally the parameter gradient) over
//! the sample ranges fed to [`Accumulator::update`]; two accumulators over
//! disjoint ranges can be [reduced](Accumulator::reduce) into one whose
//! normalized statistics equal a single pass over the union. This is the
//! contract that permits parallel evaluation.

use crate::loss::Loss;
use crate::model::Model;
use crate::ops;
use crate::task::{Fold, Task};
use crate::tensor::Tensor3;
use crate::Scalar;

#[derive(Clone, Debug)]
pub struct Accumulator {
    model: Model,
    loss: Loss,
    lambda: Scalar,
    grad_mode: bool,
    count: usize,
    vsum: Scalar,
    esum: Scalar,
    esum2: Scalar,
    gsum: Vec<Scalar>,
    /// Loss-gradient staging buffer, shaped like the model output.
    gout: Tensor3,
}

impl Accumulator {
    /// Builds an accumulator around a clone of `model`.
    ///
    /// With `grad_mode` disabled, `update` skips the backward pass and the
    /// accumulator only tracks values and errors.
    pub fn new(model: &Model, loss: Loss, lambda: Scalar, grad_mode: bool) -> Self {
        let psize = model.psize();
        let gout = Tensor3::from_dims(model.odims());
        Self {
            model: model.clone(),
            loss,
            lambda,
            grad_mode,
            count: 0,
            vsum: 0.0,
            esum: 0.0,
            esum2: 0.0,
            gsum: vec![0.0; psize],
            gout,
        }
    }

    /// Number of model parameters.
    pub fn psize(&self) -> usize {
        self.gsum.len()
    }

    /// The regularization coefficient.
    pub fn lambda(&self) -> Scalar {
        self.lambda
    }

    /// Broadcasts a fresh parameter vector into the model clone.
    pub fn set_params(&mut self, x: &[Scalar]) {
        self.model.set_params(x);
    }

    /// Toggles the backward pass of subsequent updates.
    pub fn set_grad_mode(&mut self, on: bool) {
        self.grad_mode = on;
    }

    /// Resets all running sums.
    pub fn clear(&mut self) {
        self.count = 0;
        self.vsum = 0.0;
        self.esum = 0.0;
        self.esum2 = 0.0;
        self.gsum.fill(0.0);
    }

    /// Accumulates the samples of `fold` with indices in `[begin, end)`.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the fold or sample dimensions disagree
    /// with the model.
    pub fn update<T: Task + ?Sized>(&mut self, task: &T, fold: Fold, begin: usize, end: usize) {
        assert!(
            begin <= end && end <= task.fold_size(fold),
            "accumulator: range [{begin}, {end}) exceeds fold"
        );
        for index in begin..end {
            let view = task.get(fold, index);
            let output = self.model.output(view.input);
            let value = self.loss.value(view.target.as_slice(), output.as_slice());
            let error = self.loss.error(view.target.as_slice(), output.as_slice());
            self.count += 1;
            self.vsum += value;
            self.esum += error;
            self.esum2 += error * error;
            if self.grad_mode {
                self.loss.vgrad(
                    view.target.as_slice(),
                    output.as_slice(),
                    self.gout.as_mut_slice(),
                );
                let (_gin, pgrad) = self.model.grad(&self.gout);
                ops::axpy(1.0, pgrad, &mut self.gsum);
            }
        }
    }

    /// Accumulates an entire fold.
    pub fn update_fold<T: Task + ?Sized>(&mut self, task: &T, fold: Fold) {
        self.update(task, fold, 0, task.fold_size(fold));
    }

    /// Merges another accumulator's running sums into this one.
    ///
    /// Valid only for accumulators over the same model configuration and
    /// loss; the normalized statistics of the result equal those of one
    /// accumulator run over the concatenated sample ranges.
    ///
    /// # Panics
    ///
    /// Panics if the parameter counts differ.
    pub fn reduce(&mut self, other: &Accumulator) {
        assert_eq!(self.psize(), other.psize(), "accumulator: reduce shape");
        self.count += other.count;
        self.vsum += other.vsum;
        self.esum += other.esum;
        self.esum2 += other.esum2;
        ops::axpy(1.0, &other.gsum, &mut self.gsum);
    }

    /// Number of accumulated samples.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Mean loss value over the accumulated samples, plus the L2 penalty
    /// `lambda / 2 * |theta|^2`.
    pub fn value(&self) -> Scalar {
        let n = self.count.max(1) as Scalar;
        let theta = self.model.get_params();
        self.vsum / n + 0.5 * self.lambda * ops::dot(theta, theta)
    }

    /// Mean error over the accumulated samples.
    pub fn avg_error(&self) -> Scalar {
        self.esum / self.count.max(1) as Scalar
    }

    /// Population variance of the error over the accumulated samples.
    pub fn var_error(&self) -> Scalar {
        let n = self.count.max(1) as Scalar;
        let avg = self.esum / n;
        (self.esum2 / n - avg * avg).max(0.0)
    }

    /// Mean parameter gradient, plus the L2 penalty gradient
    /// `lambda * theta`, written into `g`.
    ///
    /// # Panics
    ///
    /// Panics if `g.len() != self.psize()`.
    pub fn vgrad(&self, g: &mut [Scalar]) {
        assert_eq!(g.len(), self.psize(), "accumulator: gradient size");
        let n = self.count.max(1) as Scalar;
        let theta = self.model.get_params();
        for ((gv, s), t) in g.iter_mut().zip(&self.gsum).zip(theta) {
            *gv = s / n + self.lambda * t;
        }
    }
}
