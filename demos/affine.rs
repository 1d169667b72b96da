use nanolearn::layers::Layer;
use nanolearn::loss::Loss;
use nanolearn::task::{MemTask, Sample};
use nanolearn::tensor::Tensor3;
use nanolearn::trainer::StochTrainer;
use nanolearn::{Model, Scalar, StochMethod};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Predict a noisy random affine transformation of the input.
fn main() {
    env_logger::init();

    let (isize, osize, count) = (8, 4, 600);
    let mut rng = StdRng::seed_from_u64(7);

    // ground-truth transform
    let w: Vec<Scalar> = (0..osize * isize).map(|_| rng.random_range(-1.0..1.0)).collect();
    let b: Vec<Scalar> = (0..osize).map(|_| rng.random_range(-1.0..1.0)).collect();

    let mut builder = MemTask::builder((isize, 1, 1), (osize, 1, 1), 1);
    for _ in 0..count {
        let x: Vec<Scalar> = (0..isize).map(|_| rng.random_range(-1.0..1.0)).collect();
        let mut y = b.clone();
        for (o, yo) in y.iter_mut().enumerate() {
            for (i, xi) in x.iter().enumerate() {
                *yo += w[o * isize + i] * xi;
            }
            *yo += rng.random_range(-0.01..0.01);
        }
        let sample = Sample {
            input: Tensor3::from_vec(x),
            target: Tensor3::from_vec(y),
            label: None,
        };
        builder.push(0, None, sample, &mut rng).expect("push sample");
    }
    let mut task = builder.build();

    let mut model = Model::new(vec![Layer::affine(osize)]);
    model
        .resize((isize, 1, 1), (osize, 1, 1))
        .expect("resize model");

    let trainer = StochTrainer {
        method: StochMethod::Adam,
        epochs: 64,
        ..StochTrainer::default()
    };
    let result = trainer
        .train(&mut task, 0, Loss::RSquare, &mut model)
        .expect("training failed");

    println!("result: {result}");
}
