//! Training loops: parallel evaluation of fold measurements, the monotone
//! best-so-far result, early stopping, and the batch and stochastic
//! trainer drivers.

use crate::accumulator::Accumulator;
use crate::batch::{self, BatchMethod, BatchParams};
use crate::errors::{NanoError, NanoResult};
use crate::loss::Loss;
use crate::lsearch::{StepInit, StepStrategy};
use crate::model::{check_compatible, Model};
use crate::ops;
use crate::problem::Problem;
use crate::random;
use crate::stoch::{self, StochMethod, StochParams};
use crate::task::{Fold, Protocol, Task};
use crate::Scalar;
use rand::rngs::StdRng;
use rayon::prelude::*;
use std::fmt;
use std::time::Instant;

/// Epochs a result may go without a validation improvement before it is
/// declared overfitting.
pub const DEFAULT_PATIENCE: usize = 32;

/// Aggregated loss statistics of one fold: mean value, mean error and the
/// population variance of the error.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Measurement {
    pub value: Scalar,
    pub error: Scalar,
    pub error_var: Scalar,
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}/{:.4}", self.value, self.error)
    }
}

/// One reporting point: the three fold measurements plus bookkeeping.
#[derive(Clone, Debug)]
pub struct EpochMeasurement {
    pub millis: u128,
    pub epoch: usize,
    pub train: Measurement,
    pub valid: Measurement,
    pub test: Measurement,
    /// Infinity norm of the training gradient at this point.
    pub gnorm: Scalar,
}

impl EpochMeasurement {
    fn is_finite(&self) -> bool {
        self.train.value.is_finite() && self.valid.value.is_finite() && self.test.value.is_finite()
    }
}

/// Verdict of a result update at a reporting point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrainerStatus {
    /// New best validation loss; the parameters were recorded.
    Updated,
    /// No improvement at this point.
    Worse,
    /// No improvement for a full patience window.
    Overfitting,
    /// A non-finite measurement was observed.
    Diverged,
}

impl TrainerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TrainerStatus::Updated => "updated",
            TrainerStatus::Worse => "worse",
            TrainerStatus::Overfitting => "overfitting",
            TrainerStatus::Diverged => "diverged",
        }
    }
}

/// How the trainer interprets reporting-point statuses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopPolicy {
    /// Halt on overfitting or divergence.
    StopEarly,
    /// Run the whole schedule; only divergence halts.
    AllEpochs,
}

/// Whether the given status halts training under the given policy.
pub fn is_done(status: TrainerStatus, policy: StopPolicy) -> bool {
    match policy {
        StopPolicy::StopEarly => {
            matches!(status, TrainerStatus::Overfitting | TrainerStatus::Diverged)
        }
        StopPolicy::AllEpochs => matches!(status, TrainerStatus::Diverged),
    }
}

#[derive(Clone, Debug)]
struct BestPoint {
    params: Vec<Scalar>,
    measurement: EpochMeasurement,
    config: String,
}

/// Monotone best-so-far record of a training run, keyed on the validation
/// loss. Created at the start of `train`, updated at every reporting
/// point, returned at the end.
#[derive(Clone, Debug)]
pub struct TrainerResult {
    patience: usize,
    best: Option<BestPoint>,
    last_epoch: usize,
    status: TrainerStatus,
}

impl TrainerResult {
    pub fn new(patience: usize) -> Self {
        Self {
            patience: patience.max(1),
            best: None,
            last_epoch: 0,
            status: TrainerStatus::Worse,
        }
    }

    /// Folds one reporting point into the record and returns its verdict.
    ///
    /// Non-finite measurements leave the recorded best untouched and mark
    /// the run as diverged.
    pub fn update(
        &mut self,
        x: &[Scalar],
        measurement: EpochMeasurement,
        config: &str,
    ) -> TrainerStatus {
        self.last_epoch = measurement.epoch;
        if !measurement.is_finite() || !ops::all_finite(x) {
            self.status = TrainerStatus::Diverged;
            return self.status;
        }
        let better = match &self.best {
            None => true,
            Some(best) => measurement.valid.value < best.measurement.valid.value,
        };
        self.status = if better {
            self.best = Some(BestPoint {
                params: x.to_vec(),
                measurement,
                config: config.to_string(),
            });
            TrainerStatus::Updated
        } else {
            let best_epoch = self.best.as_ref().unwrap().measurement.epoch;
            if measurement.epoch >= best_epoch + self.patience {
                TrainerStatus::Overfitting
            } else {
                TrainerStatus::Worse
            }
        };
        self.status
    }

    /// True when at least one finite reporting point was recorded.
    pub fn is_valid(&self) -> bool {
        self.best.is_some()
    }

    /// Parameters at the best validation-loss reporting point.
    pub fn best_params(&self) -> Option<&[Scalar]> {
        self.best.as_ref().map(|b| b.params.as_slice())
    }

    /// Epoch index of the best reporting point.
    pub fn best_epoch(&self) -> Option<usize> {
        self.best.as_ref().map(|b| b.measurement.epoch)
    }

    /// Epoch index of the last reporting point seen.
    pub fn last_epoch(&self) -> usize {
        self.last_epoch
    }

    /// The full measurement recorded at the best reporting point.
    pub fn best_measurement(&self) -> Option<&EpochMeasurement> {
        self.best.as_ref().map(|b| &b.measurement)
    }

    /// Configuration snapshot recorded at the best reporting point.
    pub fn config(&self) -> Option<&str> {
        self.best.as_ref().map(|b| b.config.as_str())
    }

    /// The verdict of the last update.
    pub fn status(&self) -> TrainerStatus {
        self.status
    }
}

impl fmt::Display for TrainerResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.best {
            None => write!(f, "invalid ({})", self.status.as_str()),
            Some(b) => write!(
                f,
                "train={}, valid={}, test={}, epoch={}, {}, {}ms ({})",
                b.measurement.train,
                b.measurement.valid,
                b.measurement.test,
                b.measurement.epoch,
                b.config,
                b.measurement.millis,
                self.status.as_str()
            ),
        }
    }
}

/// A fixed pool of worker threads, each owning an accumulator with its own
/// model clone and buffers. Evaluations partition a sample range into
/// contiguous chunks, one per worker, and reduce the partial sums on the
/// calling thread; workers touch only thread-local state in between.
pub struct Workers {
    pool: rayon::ThreadPool,
    accs: Vec<Accumulator>,
}

impl Workers {
    /// Builds `nthreads` accumulators cloned from `model` (zero means the
    /// logical CPU count).
    ///
    /// # Errors
    ///
    /// Returns `NanoError::InvalidParameter` if the thread pool cannot be
    /// created.
    pub fn new(model: &Model, loss: Loss, lambda: Scalar, nthreads: usize) -> NanoResult<Self> {
        let threads = if nthreads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            nthreads
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| NanoError::InvalidParameter(format!("thread pool: {e}")))?;
        let accs = (0..threads)
            .map(|_| Accumulator::new(model, loss, lambda, true))
            .collect();
        Ok(Self { pool, accs })
    }

    /// Number of worker threads.
    pub fn count(&self) -> usize {
        self.accs.len()
    }

    /// Number of model parameters.
    pub fn psize(&self) -> usize {
        self.accs[0].psize()
    }

    /// Broadcasts `x`, dispatches `[begin, end)` of `fold` across the
    /// workers and reduces their running sums into the first accumulator.
    pub fn eval<T: Task + ?Sized>(
        &mut self,
        task: &T,
        fold: Fold,
        begin: usize,
        end: usize,
        x: &[Scalar],
        grad: bool,
    ) {
        let chunk = (end - begin).div_ceil(self.accs.len()).max(1);
        let accs = &mut self.accs;
        self.pool.install(|| {
            accs.par_iter_mut().enumerate().for_each(|(i, acc)| {
                acc.set_grad_mode(grad);
                acc.set_params(x);
                acc.clear();
                let b = begin + i * chunk;
                let e = (b + chunk).min(end);
                if b < e {
                    acc.update(task, fold, b, e);
                }
            });
        });
        let (first, rest) = self.accs.split_first_mut().unwrap();
        for acc in rest {
            first.reduce(acc);
        }
    }

    pub fn value(&self) -> Scalar {
        self.accs[0].value()
    }

    pub fn avg_error(&self) -> Scalar {
        self.accs[0].avg_error()
    }

    pub fn var_error(&self) -> Scalar {
        self.accs[0].var_error()
    }

    pub fn vgrad(&self, g: &mut [Scalar]) {
        self.accs[0].vgrad(g);
    }

    fn measurement(&self) -> Measurement {
        Measurement {
            value: self.value(),
            error: self.avg_error(),
            error_var: self.var_error(),
        }
    }
}

/// Cursor over the training fold yielding contiguous mini-batch windows;
/// wrapping around reshuffles the fold.
#[derive(Clone, Copy, Debug)]
struct Minibatch {
    begin: usize,
    end: usize,
    size: usize,
}

/// The optimization problem seen by the optimizers: function value and
/// gradient evaluations delegate to the worker pool over either the whole
/// training fold (batch mode) or the current mini-batch window
/// (stochastic mode).
pub struct TrainProblem<'a, T: Task + ?Sized> {
    task: &'a mut T,
    fold_index: usize,
    workers: &'a mut Workers,
    batch: Option<Minibatch>,
    shuffle_rng: StdRng,
}

impl<'a, T: Task + ?Sized> TrainProblem<'a, T> {
    /// Builds a problem over fold `fold_index`; `batch_size` switches the
    /// evaluations from whole-fold to mini-batch windows.
    pub fn new(
        task: &'a mut T,
        fold_index: usize,
        workers: &'a mut Workers,
        batch_size: Option<usize>,
        shuffle_rng: StdRng,
    ) -> Self {
        Self {
            task,
            fold_index,
            workers,
            batch: batch_size.map(|size| Minibatch {
                begin: 0,
                end: 0,
                size: size.max(1),
            }),
            shuffle_rng,
        }
    }

    fn train_fold(&self) -> Fold {
        Fold::new(self.fold_index, Protocol::Train)
    }

    /// Advances the mini-batch window; the shuffle runs on the calling
    /// thread while all workers are quiescent.
    fn advance(&mut self) {
        let fold = self.train_fold();
        let size = self.task.fold_size(fold);
        if let Some(mb) = &mut self.batch {
            mb.begin = mb.end;
            if mb.begin >= size {
                self.task.shuffle(fold, &mut self.shuffle_rng);
                mb.begin = 0;
            }
            mb.end = (mb.begin + mb.size).min(size);
        }
    }

    fn train_range(&self) -> (usize, usize) {
        match &self.batch {
            Some(mb) => (mb.begin, mb.end),
            None => (0, self.task.fold_size(self.train_fold())),
        }
    }

    /// Evaluates one whole fold at `x` (no gradient).
    pub fn measure_fold(&mut self, protocol: Protocol, x: &[Scalar]) -> Measurement {
        let fold = Fold::new(self.fold_index, protocol);
        let size = self.task.fold_size(fold);
        self.workers.eval(&*self.task, fold, 0, size, x, false);
        self.workers.measurement()
    }
}

impl<'a, T: Task + ?Sized> Problem for TrainProblem<'a, T> {
    fn size(&self) -> usize {
        self.workers.psize()
    }

    fn value(&mut self, x: &[Scalar]) -> Scalar {
        self.advance();
        let (begin, end) = self.train_range();
        self.workers
            .eval(&*self.task, self.train_fold(), begin, end, x, false);
        self.workers.value()
    }

    fn value_and_grad(&mut self, x: &[Scalar], g: &mut [Scalar]) -> Scalar {
        self.advance();
        let (begin, end) = self.train_range();
        self.workers
            .eval(&*self.task, self.train_fold(), begin, end, x, true);
        self.workers.vgrad(g);
        self.workers.value()
    }
}

/// Full-batch training with a line-searched descent method.
#[derive(Clone, Debug)]
pub struct BatchTrainer {
    pub method: BatchMethod,
    pub iterations: usize,
    pub epsilon: Scalar,
    pub ls_init: StepInit,
    pub ls_strategy: StepStrategy,
    pub policy: StopPolicy,
    pub patience: usize,
    /// L2 regularization coefficient.
    pub lambda: Scalar,
    /// Worker threads; zero means the logical CPU count.
    pub nthreads: usize,
    pub seed: u64,
}

impl Default for BatchTrainer {
    fn default() -> Self {
        Self {
            method: BatchMethod::Lbfgs { history: 10 },
            iterations: 1024,
            epsilon: 1e-6,
            ls_init: StepInit::Quadratic,
            ls_strategy: StepStrategy::Interpolate,
            policy: StopPolicy::StopEarly,
            patience: DEFAULT_PATIENCE,
            lambda: 0.0,
            nthreads: 0,
            seed: 0,
        }
    }
}

impl BatchTrainer {
    /// Trains `model` on fold `fold` of `task`, reporting every iteration,
    /// and leaves the best parameters installed in the model.
    ///
    /// # Errors
    ///
    /// Returns `NanoError::DimensionMismatch` if the model and task
    /// dimensions disagree, `NanoError::InvalidParameter` for an
    /// out-of-range fold, and `NanoError::LineSearchFailure` if the line
    /// search fails twice at the same unconverged iterate.
    pub fn train<T: Task + ?Sized>(
        &self,
        task: &mut T,
        fold: usize,
        loss: Loss,
        model: &mut Model,
    ) -> NanoResult<TrainerResult> {
        check_compatible(model, task.idims(), task.odims())?;
        if fold >= task.fsize() {
            return Err(NanoError::InvalidParameter(format!(
                "fold {fold} out of range (task has {})",
                task.fsize()
            )));
        }

        let mut init_rng = random::derive(self.seed, random::STREAM_INIT);
        model.random_params(&mut init_rng);
        let mut workers = Workers::new(model, loss, self.lambda, self.nthreads)?;
        let x0 = model.get_params().to_vec();

        let timer = Instant::now();
        let iterations = self.iterations.clamp(4, 4096);
        let config = format!("lambda={:.0e}", self.lambda);
        let mut result = TrainerResult::new(self.patience);
        let mut iteration = 0usize;

        let params = BatchParams {
            max_iterations: iterations,
            epsilon: self.epsilon,
            ls_init: self.ls_init,
            ls_strategy: self.ls_strategy,
        };
        let shuffle_rng = random::derive(self.seed, random::STREAM_SHUFFLE);
        let mut problem = TrainProblem::new(task, fold, &mut workers, None, shuffle_rng);
        let outcome = batch::minimize(
            self.method,
            &params,
            &mut problem,
            &x0,
            |problem, state| {
                iteration += 1;
                let train = problem.measure_fold(Protocol::Train, &state.x);
                let valid = problem.measure_fold(Protocol::Valid, &state.x);
                let test = problem.measure_fold(Protocol::Test, &state.x);
                let measurement = EpochMeasurement {
                    millis: timer.elapsed().as_millis(),
                    epoch: iteration,
                    train,
                    valid,
                    test,
                    gnorm: ops::norm_inf(&state.g),
                };
                let status = result.update(&state.x, measurement, &config);
                log::info!(
                    "[{}/{}: train={}, valid={}|{}, test={}, |g|={:.2e}, {}, calls={}/{}] {}ms",
                    iteration,
                    iterations,
                    train,
                    valid,
                    status.as_str(),
                    test,
                    ops::norm_inf(&state.g),
                    config,
                    state.fcalls,
                    state.gcalls,
                    timer.elapsed().as_millis()
                );
                !is_done(status, self.policy)
            },
        );
        match outcome {
            Ok(_) => {}
            Err(NanoError::LineSearchFailure(reason)) => {
                log::warn!("batch-{}: line search failed ({reason})", self.method.name());
            }
            Err(e) => return Err(e),
        }

        if let Some(best) = result.best_params() {
            model.set_params(best);
        }
        log::info!("<<< batch-{}: {}", self.method.name(), result);
        Ok(result)
    }
}

/// Epoch-based stochastic training with optional hyper-parameter tuning.
#[derive(Clone, Debug)]
pub struct StochTrainer {
    pub method: StochMethod,
    pub epochs: usize,
    /// Mini-batch size; zero means `16 * threads`.
    pub batch: usize,
    /// Evaluate the method's tuning grid for one epoch each and keep the
    /// configuration with the lowest train loss.
    pub tune: bool,
    pub policy: StopPolicy,
    pub patience: usize,
    /// L2 regularization coefficient.
    pub lambda: Scalar,
    /// Worker threads; zero means the logical CPU count.
    pub nthreads: usize,
    pub seed: u64,
}

impl Default for StochTrainer {
    fn default() -> Self {
        Self {
            method: StochMethod::Sg,
            epochs: 16,
            batch: 0,
            tune: true,
            policy: StopPolicy::StopEarly,
            patience: DEFAULT_PATIENCE,
            lambda: 0.0,
            nthreads: 0,
            seed: 0,
        }
    }
}

impl StochTrainer {
    /// Trains `model` on fold `fold` of `task`, reporting every epoch, and
    /// leaves the best parameters installed in the model.
    ///
    /// # Errors
    ///
    /// Returns `NanoError::DimensionMismatch` if the model and task
    /// dimensions disagree and `NanoError::InvalidParameter` for an
    /// out-of-range fold or an empty schedule.
    pub fn train<T: Task + ?Sized>(
        &self,
        task: &mut T,
        fold: usize,
        loss: Loss,
        model: &mut Model,
    ) -> NanoResult<TrainerResult> {
        check_compatible(model, task.idims(), task.odims())?;
        if fold >= task.fsize() {
            return Err(NanoError::InvalidParameter(format!(
                "fold {fold} out of range (task has {})",
                task.fsize()
            )));
        }

        let mut init_rng = random::derive(self.seed, random::STREAM_INIT);
        model.random_params(&mut init_rng);
        let mut workers = Workers::new(model, loss, self.lambda, self.nthreads)?;
        let x0 = model.get_params().to_vec();

        let train_size = task.fold_size(Fold::new(fold, Protocol::Train));
        let batch_size = if self.batch == 0 {
            16 * workers.count()
        } else {
            self.batch
        };
        let epoch_size = train_size.div_ceil(batch_size).max(1);
        let epochs = self.epochs.clamp(1, 1024);
        let base = self.method.defaults(epochs, epoch_size);

        // pick the configuration with the lowest train loss after one pass
        let chosen = if self.tune {
            let mut best: Option<(Scalar, StochParams)> = None;
            for (i, candidate) in self.method.tuning_grid(&base).into_iter().enumerate() {
                let tune_rng = random::derive(self.seed, random::STREAM_TUNE.wrapping_add(i as u64));
                let mut problem =
                    TrainProblem::new(&mut *task, fold, &mut workers, Some(batch_size), tune_rng);
                let mut pass = candidate;
                pass.epochs = 1;
                let state = stoch::minimize(self.method, &pass, &mut problem, &x0, |_, _| false)?;
                let train = problem.measure_fold(Protocol::Train, &state.x);
                log::debug!(
                    "tune: train={}, {}",
                    train,
                    self.method.describe(&candidate)
                );
                if train.value.is_finite()
                    && best.map_or(true, |(value, _)| train.value < value)
                {
                    best = Some((train.value, candidate));
                }
            }
            best.map(|(_, p)| p).unwrap_or(base)
        } else {
            base
        };

        let timer = Instant::now();
        let config = format!(
            "{},lambda={:.0e},batch={}",
            self.method.describe(&chosen),
            self.lambda,
            batch_size
        );
        let mut result = TrainerResult::new(self.patience);
        let mut epoch = 0usize;

        let shuffle_rng = random::derive(self.seed, random::STREAM_SHUFFLE);
        let mut problem = TrainProblem::new(task, fold, &mut workers, Some(batch_size), shuffle_rng);
        stoch::minimize(self.method, &chosen, &mut problem, &x0, |problem, state| {
            epoch += 1;
            let train = problem.measure_fold(Protocol::Train, &state.x);
            let valid = problem.measure_fold(Protocol::Valid, &state.x);
            let test = problem.measure_fold(Protocol::Test, &state.x);
            let measurement = EpochMeasurement {
                millis: timer.elapsed().as_millis(),
                epoch,
                train,
                valid,
                test,
                gnorm: ops::norm_inf(&state.g),
            };
            let status = result.update(&state.x, measurement, &config);
            log::info!(
                "[{}/{}: train={}, valid={}|{}, test={}, |g|={:.2e}, {}] {}ms",
                epoch,
                epochs,
                train,
                valid,
                status.as_str(),
                test,
                ops::norm_inf(&state.g),
                config,
                timer.elapsed().as_millis()
            );
            !is_done(status, self.policy)
        })?;

        if let Some(best) = result.best_params() {
            model.set_params(best);
        }
        log::info!("<<< stoch-{}: {}", self.method.name(), result);
        Ok(result)
    }
}
