//! End-to-end training scenarios.

use nanolearn::accumulator::Accumulator;
use nanolearn::batch::BatchMethod;
use nanolearn::layers::Layer;
use nanolearn::loss::{class_target, Loss};
use nanolearn::task::{Fold, MemTask, Protocol, Sample};
use nanolearn::tensor::Tensor3;
use nanolearn::trainer::{BatchTrainer, StochTrainer, StopPolicy, TrainerStatus};
use nanolearn::{ActKind, Model, NanoError, Scalar, StochMethod};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn single_sample_task(input: Vec<Scalar>, target: Vec<Scalar>) -> MemTask {
    let idims = (input.len(), 1, 1);
    let odims = (target.len(), 1, 1);
    let mut rng = StdRng::seed_from_u64(0);
    let mut builder = MemTask::builder(idims, odims, 1);
    let sample = Sample {
        input: Tensor3::from_vec(input),
        target: Tensor3::from_vec(target),
        label: None,
    };
    for protocol in [Protocol::Train, Protocol::Valid, Protocol::Test] {
        builder
            .push(0, Some(protocol), sample.clone(), &mut rng)
            .expect("push failed");
    }
    builder.build()
}

fn xor_task() -> MemTask {
    let mut rng = StdRng::seed_from_u64(0);
    let mut builder = MemTask::builder((2, 1, 1), (2, 1, 1), 1);
    for (a, b) in [(0.0, 0.0), (0.0, 1.0), (1.0, 0.0), (1.0, 1.0)] {
        let class = (a as usize) ^ (b as usize);
        let sample = Sample {
            input: Tensor3::from_vec(vec![a, b]),
            target: Tensor3::from_vec(class_target(class, 2)),
            label: None,
        };
        for protocol in [Protocol::Train, Protocol::Valid, Protocol::Test] {
            builder
                .push(0, Some(protocol), sample.clone(), &mut rng)
                .expect("push failed");
        }
    }
    builder.build()
}

/// An identity affine model on a matching sample has zero loss, zero error
/// and zero gradient.
#[test]
fn affine_identity_is_exact() {
    let task = single_sample_task(vec![1.0, 2.0, 3.0], vec![1.0, 2.0, 3.0]);
    let mut model = Model::new(vec![Layer::affine(3)]);
    model.resize((3, 1, 1), (3, 1, 1)).expect("resize failed");

    // W = I, b = 0
    let mut theta = vec![0.0; model.psize()];
    for i in 0..3 {
        theta[i * 3 + i] = 1.0;
    }
    model.set_params(&theta);

    let mut acc = Accumulator::new(&model, Loss::RSquare, 0.0, true);
    acc.update_fold(&task, Fold::new(0, Protocol::Train));
    assert_eq!(acc.value(), 0.0);
    assert_eq!(acc.avg_error(), 0.0);
    let mut g = vec![0.0; acc.psize()];
    acc.vgrad(&mut g);
    assert!(g.iter().all(|&v| v == 0.0));
}

/// A lone tanh layer at the origin: forward zero, input-gradient zero, no
/// parameters to update.
#[test]
fn tanh_at_origin_is_inert() {
    let mut model = Model::new(vec![Layer::activation(ActKind::Tanh)]);
    model.resize((1, 1, 1), (1, 1, 1)).expect("resize failed");
    assert_eq!(model.psize(), 0);

    let input = Tensor3::from_vec(vec![0.0]);
    let out = model.output(&input).clone();
    assert_eq!(out.as_slice(), &[0.0]);

    let target = [0.0];
    assert_eq!(Loss::RSquare.value(&target, out.as_slice()), 0.0);
    let mut gout = Tensor3::from_vec(vec![0.0]);
    Loss::RSquare.vgrad(&target, out.as_slice(), gout.as_mut_slice());
    let (gin, gparam) = model.grad(&gout);
    assert_eq!(gin.as_slice(), &[0.0]);
    assert!(gparam.is_empty());
}

/// The XOR problem: affine(2 -> 4), tanh, affine(4 -> 2) trained with
/// L-BFGS reaches zero training classification error.
#[test]
fn lbfgs_solves_xor() {
    let mut task = xor_task();
    let mut model = Model::new(vec![
        Layer::affine(4),
        Layer::activation(ActKind::Tanh),
        Layer::affine(2),
    ]);
    model.resize((2, 1, 1), (2, 1, 1)).expect("resize failed");

    let trainer = BatchTrainer {
        method: BatchMethod::Lbfgs { history: 10 },
        iterations: 1000,
        epsilon: 1e-6,
        policy: StopPolicy::AllEpochs,
        nthreads: 1,
        seed: 1,
        ..BatchTrainer::default()
    };
    let result = trainer
        .train(&mut task, 0, Loss::SLogistic, &mut model)
        .expect("training failed");
    assert!(result.is_valid());

    let mut acc = Accumulator::new(&model, Loss::SLogistic, 0.0, false);
    acc.update_fold(&task, Fold::new(0, Protocol::Train));
    assert_eq!(acc.avg_error(), 0.0, "{result}");
}

/// With a fixed seed and one worker, two runs produce bitwise-identical
/// parameters.
#[test]
fn single_thread_training_is_deterministic() {
    let run = || {
        let mut task = xor_task();
        let mut model = Model::new(vec![
            Layer::affine(4),
            Layer::activation(ActKind::Tanh),
            Layer::affine(2),
        ]);
        model.resize((2, 1, 1), (2, 1, 1)).expect("resize failed");
        let trainer = BatchTrainer {
            iterations: 50,
            nthreads: 1,
            seed: 7,
            policy: StopPolicy::AllEpochs,
            ..BatchTrainer::default()
        };
        trainer
            .train(&mut task, 0, Loss::SLogistic, &mut model)
            .expect("training failed");
        model.get_params().to_vec()
    };
    assert_eq!(run(), run());
}

/// Anti-correlated validation targets force overfitting: the recorded best
/// epoch precedes the final one and the best parameters stay installed.
#[test]
fn early_stop_on_memorization() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut builder = MemTask::builder((2, 1, 1), (1, 1, 1), 1);
    for _ in 0..24 {
        let x: Vec<Scalar> = vec![rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0)];
        let y = x[0] + 0.5 * x[1];
        let train = Sample {
            input: Tensor3::from_vec(x.clone()),
            target: Tensor3::from_vec(vec![y]),
            label: None,
        };
        // the validation fold answers with the opposite sign
        let valid = Sample {
            input: Tensor3::from_vec(x),
            target: Tensor3::from_vec(vec![-y]),
            label: None,
        };
        builder
            .push(0, Some(Protocol::Train), train, &mut rng)
            .expect("push failed");
        builder
            .push(0, Some(Protocol::Valid), valid.clone(), &mut rng)
            .expect("push failed");
        builder
            .push(0, Some(Protocol::Test), valid, &mut rng)
            .expect("push failed");
    }
    let mut task = builder.build();

    let mut model = Model::new(vec![Layer::affine(1)]);
    model.resize((2, 1, 1), (1, 1, 1)).expect("resize failed");

    let trainer = BatchTrainer {
        method: BatchMethod::Gd,
        iterations: 200,
        epsilon: 1e-14,
        policy: StopPolicy::StopEarly,
        patience: 8,
        nthreads: 1,
        seed: 11,
        ..BatchTrainer::default()
    };
    let result = trainer
        .train(&mut task, 0, Loss::RSquare, &mut model)
        .expect("training failed");

    assert!(result.is_valid());
    let best_epoch = result.best_epoch().expect("no best epoch");
    assert!(
        best_epoch < result.last_epoch(),
        "best {best_epoch} vs last {}",
        result.last_epoch()
    );
    // the model carries exactly the parameters of the best epoch
    assert_eq!(model.get_params(), result.best_params().unwrap());
}

/// A non-finite measurement marks the run diverged and never displaces the
/// recorded best parameters.
#[test]
fn divergence_keeps_the_best_point() {
    use nanolearn::trainer::{is_done, EpochMeasurement, Measurement, TrainerResult};

    let finite = |value: Scalar| Measurement {
        value,
        error: 0.1,
        error_var: 0.0,
    };
    let point = |epoch: usize, valid: Scalar| EpochMeasurement {
        millis: 0,
        epoch,
        train: finite(valid),
        valid: finite(valid),
        test: finite(valid),
        gnorm: 1.0,
    };

    let mut result = TrainerResult::new(4);
    let theta = [1.0, 2.0];
    assert_eq!(result.update(&theta, point(1, 0.5), "cfg"), TrainerStatus::Updated);
    assert_eq!(result.update(&[9.0, 9.0], point(2, 0.7), "cfg"), TrainerStatus::Worse);

    // the diverged epoch leaves the best point untouched
    let status = result.update(&[8.0, 8.0], point(3, Scalar::NAN), "cfg");
    assert_eq!(status, TrainerStatus::Diverged);
    assert_eq!(result.status(), TrainerStatus::Diverged);
    assert_eq!(result.best_params().unwrap(), theta.as_slice());
    assert_eq!(result.best_epoch(), Some(1));

    // divergence halts under both policies; overfitting only when stopping early
    assert!(is_done(TrainerStatus::Diverged, StopPolicy::StopEarly));
    assert!(is_done(TrainerStatus::Diverged, StopPolicy::AllEpochs));
    assert!(is_done(TrainerStatus::Overfitting, StopPolicy::StopEarly));
    assert!(!is_done(TrainerStatus::Overfitting, StopPolicy::AllEpochs));
    assert!(!is_done(TrainerStatus::Worse, StopPolicy::StopEarly));

    // a patience-length run of worse epochs turns into overfitting
    let mut result = TrainerResult::new(3);
    result.update(&theta, point(1, 0.5), "cfg");
    assert_eq!(result.update(&theta, point(2, 0.6), "cfg"), TrainerStatus::Worse);
    assert_eq!(result.update(&theta, point(3, 0.6), "cfg"), TrainerStatus::Worse);
    assert_eq!(
        result.update(&theta, point(4, 0.6), "cfg"),
        TrainerStatus::Overfitting
    );
}

/// The trainer rejects a model whose dimensions disagree with the task.
#[test]
fn dimension_pairing_is_verified() {
    let mut task = xor_task();
    let mut model = Model::new(vec![Layer::affine(3)]);
    model.resize((2, 1, 1), (3, 1, 1)).expect("resize failed");
    let trainer = BatchTrainer {
        nthreads: 1,
        ..BatchTrainer::default()
    };
    match trainer.train(&mut task, 0, Loss::SLogistic, &mut model) {
        Err(NanoError::DimensionMismatch(_)) => {}
        other => panic!("expected a dimension mismatch, got {other:?}"),
    }
}

/// Stochastic training fits a noisy affine regression task.
#[test]
fn adam_fits_affine_regression() {
    let mut rng = StdRng::seed_from_u64(6);
    let (isize, osize) = (6, 3);
    let w: Vec<Scalar> = (0..osize * isize).map(|_| rng.random_range(-1.0..1.0)).collect();
    let b: Vec<Scalar> = (0..osize).map(|_| rng.random_range(-1.0..1.0)).collect();

    let mut builder = MemTask::builder((isize, 1, 1), (osize, 1, 1), 1);
    for _ in 0..400 {
        let x: Vec<Scalar> = (0..isize).map(|_| rng.random_range(-1.0..1.0)).collect();
        let mut y = b.clone();
        for (o, yo) in y.iter_mut().enumerate() {
            for (i, xi) in x.iter().enumerate() {
                *yo += w[o * isize + i] * xi;
            }
        }
        let sample = Sample {
            input: Tensor3::from_vec(x),
            target: Tensor3::from_vec(y),
            label: None,
        };
        builder.push(0, None, sample, &mut rng).expect("push failed");
    }
    let mut task = builder.build();

    let mut model = Model::new(vec![Layer::affine(osize)]);
    model
        .resize((isize, 1, 1), (osize, 1, 1))
        .expect("resize failed");

    let trainer = StochTrainer {
        method: StochMethod::Adam,
        epochs: 200,
        batch: 8,
        tune: false,
        policy: StopPolicy::AllEpochs,
        nthreads: 1,
        seed: 9,
        ..StochTrainer::default()
    };
    let result = trainer
        .train(&mut task, 0, Loss::RSquare, &mut model)
        .expect("training failed");
    assert!(result.is_valid());
    let best = result.best_measurement().expect("no measurement");
    assert!(
        best.train.value < 5e-2,
        "train loss {:.4} did not reach the noise floor",
        best.train.value
    );
}
