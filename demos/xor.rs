use nanolearn::layers::Layer;
use nanolearn::loss::{class_target, Loss};
use nanolearn::task::{MemTask, Protocol, Sample, Task};
use nanolearn::tensor::Tensor3;
use nanolearn::trainer::BatchTrainer;
use nanolearn::{ActKind, Model};
use rand::SeedableRng;

fn main() {
    env_logger::init();

    // XOR truth table: inputs in {0, 1}^2, class targets in {+1, -1}^2
    let mut builder = MemTask::builder((2, 1, 1), (2, 1, 1), 1);
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    for (a, b) in [(0.0, 0.0), (0.0, 1.0), (1.0, 0.0), (1.0, 1.0)] {
        let class = (a as usize) ^ (b as usize);
        let sample = Sample {
            input: Tensor3::from_vec(vec![a, b]),
            target: Tensor3::from_vec(class_target(class, 2)),
            label: Some(format!("xor={class}")),
        };
        for protocol in [Protocol::Train, Protocol::Valid, Protocol::Test] {
            builder
                .push(0, Some(protocol), sample.clone(), &mut rng)
                .expect("push sample");
        }
    }
    let mut task = builder.build();

    // affine(2 -> 4) -> tanh -> affine(4 -> 2)
    let mut model = Model::new(vec![
        Layer::affine(4),
        Layer::activation(ActKind::Tanh),
        Layer::affine(2),
    ]);
    model.resize((2, 1, 1), (2, 1, 1)).expect("resize model");

    let trainer = BatchTrainer {
        iterations: 1000,
        nthreads: 1,
        ..BatchTrainer::default()
    };
    let result = trainer
        .train(&mut task, 0, Loss::SLogistic, &mut model)
        .expect("training failed");

    println!("result: {result}");
    for i in 0..4 {
        let view = task.get(nanolearn::Fold::new(0, Protocol::Test), i);
        let out = model.output(view.input);
        println!(
            "{:?} -> {:?} ({})",
            view.input.as_slice(),
            out.as_slice(),
            view.label.unwrap_or("?")
        );
    }
}
