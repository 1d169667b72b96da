use nanolearn::layers::Layer;
use nanolearn::tensor::Tensor3;
use nanolearn::{ActKind, Model, NanoError};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn make_model(seed: u64) -> Model {
    let mut model = Model::new(vec![
        Layer::conv(4, 3, 3, 1, 1, 2),
        Layer::activation(ActKind::Snorm),
        Layer::affine(10),
        Layer::activation(ActKind::Tanh),
        Layer::affine(3),
    ]);
    model.resize((2, 8, 8), (3, 1, 1)).expect("resize failed");
    let mut rng = StdRng::seed_from_u64(seed);
    model.random_params(&mut rng);
    model
}

#[test]
fn params_round_trip_bitwise() {
    let mut model = make_model(1);
    let theta = model.get_params().to_vec();
    model.set_params(&theta);
    assert_eq!(model.get_params(), theta.as_slice());
}

#[test]
fn serialization_round_trip_restores_output() {
    let mut model = make_model(2);
    let mut rng = StdRng::seed_from_u64(3);
    let mut input = Tensor3::new(2, 8, 8);
    input.fill_uniform(&mut rng, -1.0, 1.0);
    let before = model.output(&input).clone();

    let mut bytes = Vec::new();
    model.write_to(&mut bytes).expect("write failed");

    // load into a freshly initialized clone of the same architecture
    let mut restored = make_model(4);
    restored
        .read_from(&mut bytes.as_slice())
        .expect("read failed");
    assert_eq!(restored.get_params(), model.get_params());

    let after = restored.output(&input).clone();
    assert_eq!(before.as_slice(), after.as_slice());
}

#[test]
fn save_load_file_round_trip() {
    let mut model = make_model(5);
    let path = std::env::temp_dir().join(format!("nanolearn-io-{}.mdl", std::process::id()));
    model.save(&path).expect("save failed");

    let theta = model.get_params().to_vec();
    let mut other = make_model(6);
    other.load(&path).expect("load failed");
    assert_eq!(other.get_params(), theta.as_slice());
    std::fs::remove_file(&path).ok();
}

#[test]
fn load_rejects_corruption_and_keeps_params() {
    let model = make_model(7);
    let mut bytes = Vec::new();
    model.write_to(&mut bytes).expect("write failed");

    let mut victim = make_model(8);
    let before = victim.get_params().to_vec();

    // flipped payload byte breaks the checksum
    let mut corrupt = bytes.clone();
    let mid = corrupt.len() / 2;
    corrupt[mid] ^= 0x40;
    match victim.read_from(&mut corrupt.as_slice()) {
        Err(NanoError::SerializationError(_)) => {}
        other => panic!("expected a serialization error, got {other:?}"),
    }
    assert_eq!(victim.get_params(), before.as_slice());

    // truncation is rejected
    let short = &bytes[..bytes.len() - 9];
    assert!(victim.read_from(&mut &short[..]).is_err());
    assert_eq!(victim.get_params(), before.as_slice());

    // bad magic is rejected
    let mut bad_magic = bytes.clone();
    bad_magic[0] ^= 0xff;
    assert!(victim.read_from(&mut bad_magic.as_slice()).is_err());
    assert_eq!(victim.get_params(), before.as_slice());
}

#[test]
fn load_rejects_mismatched_architecture() {
    let model = make_model(9);
    let mut bytes = Vec::new();
    model.write_to(&mut bytes).expect("write failed");

    let mut other = Model::new(vec![Layer::affine(3)]);
    other.resize((2, 8, 8), (3, 1, 1)).expect("resize failed");
    match other.read_from(&mut bytes.as_slice()) {
        Err(NanoError::SerializationError(_)) => {}
        other => panic!("expected a serialization error, got {other:?}"),
    }
}

#[test]
fn resize_rejects_mismatched_chain() {
    // the final affine produces 4 outputs, not the declared 5
    let mut model = Model::new(vec![Layer::affine(4)]);
    match model.resize((3, 1, 1), (5, 1, 1)) {
        Err(NanoError::DimensionMismatch(_)) => {}
        other => panic!("expected a dimension mismatch, got {other:?}"),
    }

    // connectivity must divide the input planes
    let mut model = Model::new(vec![Layer::conv(2, 3, 3, 1, 1, 2)]);
    assert!(model.resize((3, 5, 5), (2, 3, 3)).is_err());
}
