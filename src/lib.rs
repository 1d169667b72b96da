//! # A CPU-oriented machine-learning runtime
//!
//! This crate provides the core of a supervised-learning engine over dense
//! tensor inputs: a palette of differentiable layers composed into
//! feed-forward models, in-memory tasks partitioned into train/validation/
//! test folds, and training loops driving the model parameters with either
//! full-batch line-searched descent or epoch-based stochastic methods.
//!
//! Function-value and gradient evaluations fan out sample ranges to a pool
//! of worker accumulators, each holding its own model clone; the partial
//! sums are reduced on the main thread at every evaluation boundary.

pub mod accumulator;
pub mod activations;
pub mod batch;
pub mod errors;
pub mod functions;
pub mod layers;
pub mod loss;
pub mod lsearch;
pub mod model;
pub mod ops;
pub mod problem;
pub mod random;
pub mod stoch;
pub mod task;
pub mod tensor;
pub mod trainer;

pub use accumulator::Accumulator;
pub use activations::ActKind;
pub use batch::{BatchMethod, CgdUpdate};
pub use errors::{NanoError, NanoResult};
pub use layers::Layer;
pub use loss::Loss;
pub use model::Model;
pub use problem::Problem;
pub use stoch::StochMethod;
pub use task::{Fold, MemTask, Protocol, Sample, Task};
pub use tensor::{Matrix, Tensor3};
pub use trainer::{BatchTrainer, StochTrainer, StopPolicy, TrainerResult, TrainerStatus};

/// The scalar type every numeric quantity in the crate uses.
#[cfg(not(feature = "f32"))]
pub type Scalar = f64;

/// The scalar type every numeric quantity in the crate uses.
#[cfg(feature = "f32")]
pub type Scalar = f32;
