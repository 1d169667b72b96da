use nanolearn::accumulator::Accumulator;
use nanolearn::layers::Layer;
use nanolearn::loss::Loss;
use nanolearn::task::{count_duplicates, count_intersection, Fold, MemTask, Protocol, Sample, Task};
use nanolearn::tensor::Tensor3;
use nanolearn::{Model, Scalar};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn sample(seed: Scalar) -> Sample {
    Sample {
        input: Tensor3::from_vec(vec![seed, seed + 1.0, seed + 2.0]),
        target: Tensor3::from_vec(vec![seed * 2.0]),
        label: None,
    }
}

fn build_task(per_protocol: usize) -> MemTask {
    let mut rng = StdRng::seed_from_u64(5);
    let mut builder = MemTask::builder((3, 1, 1), (1, 1, 1), 1);
    let mut k = 0.0;
    for protocol in [Protocol::Train, Protocol::Valid, Protocol::Test] {
        for _ in 0..per_protocol {
            builder
                .push(0, Some(protocol), sample(k), &mut rng)
                .expect("push failed");
            k += 0.1;
        }
    }
    builder.build()
}

#[test]
fn fold_ordering_is_lexicographic() {
    let a = Fold::new(0, Protocol::Test);
    let b = Fold::new(1, Protocol::Train);
    assert!(a < b);
    assert!(Fold::new(0, Protocol::Train) < Fold::new(0, Protocol::Valid));
    assert!(Fold::new(0, Protocol::Valid) < Fold::new(0, Protocol::Test));
}

#[test]
fn sizes_are_stable_under_shuffle() {
    let mut task = build_task(10);
    let fold = Fold::new(0, Protocol::Train);
    assert_eq!(task.size(), 30);
    assert_eq!(task.fold_size(fold), 10);
    let mut rng = StdRng::seed_from_u64(9);
    task.shuffle(fold, &mut rng);
    assert_eq!(task.fold_size(fold), 10);
    assert_eq!(task.size(), 30);
}

#[test]
fn hashes_are_invariant_under_shuffle() {
    let mut task = build_task(16);
    let fold = Fold::new(0, Protocol::Train);

    let mut before: Vec<(u64, u64)> = (0..task.fold_size(fold))
        .map(|i| (task.ihash(fold, i), task.ohash(fold, i)))
        .collect();
    let mut rng = StdRng::seed_from_u64(13);
    task.shuffle(fold, &mut rng);
    let mut after: Vec<(u64, u64)> = (0..task.fold_size(fold))
        .map(|i| (task.ihash(fold, i), task.ohash(fold, i)))
        .collect();

    // membership multiset is preserved
    before.sort_unstable();
    after.sort_unstable();
    assert_eq!(before, after);
}

#[test]
fn hashes_track_content() {
    let task = build_task(4);
    let fold = Fold::new(0, Protocol::Train);
    for i in 0..task.fold_size(fold) {
        let view = task.get(fold, i);
        assert_eq!(task.ihash(fold, i), nanolearn::task::content_hash(view.input));
        assert_eq!(task.ohash(fold, i), nanolearn::task::content_hash(view.target));
    }
}

#[test]
fn duplicate_and_intersection_counting() {
    let task = build_task(8);
    assert_eq!(count_duplicates(&task, 0), 0);
    assert_eq!(count_intersection(&task, 0), 0);

    // push the same sample into train and valid
    let mut rng = StdRng::seed_from_u64(17);
    let mut builder = MemTask::builder((3, 1, 1), (1, 1, 1), 1);
    for protocol in [Protocol::Train, Protocol::Valid] {
        builder
            .push(0, Some(protocol), sample(1.0), &mut rng)
            .expect("push failed");
    }
    let leaky = builder.build();
    assert_eq!(count_duplicates(&leaky, 0), 1);
    assert_eq!(count_intersection(&leaky, 0), 1);
}

#[test]
fn builder_rejects_bad_samples() {
    let mut rng = StdRng::seed_from_u64(19);
    let mut builder = MemTask::builder((3, 1, 1), (1, 1, 1), 2);
    assert!(builder.push(2, Some(Protocol::Train), sample(0.0), &mut rng).is_err());
    let bad = Sample {
        input: Tensor3::from_vec(vec![0.0; 4]),
        target: Tensor3::from_vec(vec![0.0]),
        label: None,
    };
    assert!(builder.push(0, Some(Protocol::Train), bad, &mut rng).is_err());
}

#[test]
fn random_split_covers_all_protocols() {
    let mut rng = StdRng::seed_from_u64(23);
    let mut builder = MemTask::builder((3, 1, 1), (1, 1, 1), 1);
    for i in 0..300 {
        builder
            .push(0, None, sample(i as Scalar), &mut rng)
            .expect("push failed");
    }
    let task = builder.build();
    let train = task.fold_size(Fold::new(0, Protocol::Train));
    let valid = task.fold_size(Fold::new(0, Protocol::Valid));
    let test = task.fold_size(Fold::new(0, Protocol::Test));
    assert_eq!(train + valid + test, 300);
    // roughly 60/20/20
    assert!(train > valid && train > test);
    assert!(valid > 0 && test > 0);
}

#[test]
fn accumulator_reduction_matches_single_pass() {
    let mut task = build_task(20);
    let fold = Fold::new(0, Protocol::Train);
    let mut rng = StdRng::seed_from_u64(29);
    task.shuffle(fold, &mut rng);

    let mut model = Model::new(vec![Layer::affine(1)]);
    model.resize((3, 1, 1), (1, 1, 1)).expect("resize failed");
    model.random_params(&mut rng);

    let mut whole = Accumulator::new(&model, Loss::RSquare, 1e-3, true);
    whole.update(&task, fold, 0, 20);

    let mut merged = Accumulator::new(&model, Loss::RSquare, 1e-3, true);
    for (begin, end) in [(0, 7), (7, 13), (13, 20)] {
        let mut part = Accumulator::new(&model, Loss::RSquare, 1e-3, true);
        part.update(&task, fold, begin, end);
        merged.reduce(&part);
    }

    assert_eq!(whole.count(), merged.count());
    approx::assert_relative_eq!(whole.value(), merged.value(), max_relative = 1e-12);
    approx::assert_relative_eq!(whole.avg_error(), merged.avg_error(), max_relative = 1e-12);
    approx::assert_abs_diff_eq!(whole.var_error(), merged.var_error(), epsilon = 1e-10);

    let mut gw = vec![0.0; whole.psize()];
    let mut gm = vec![0.0; merged.psize()];
    whole.vgrad(&mut gw);
    merged.vgrad(&mut gm);
    for (a, b) in gw.iter().zip(&gm) {
        approx::assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
    }
}
