//! Convergence of the stochastic optimizers on deterministic objectives.

use nanolearn::functions::Sphere;
use nanolearn::ops;
use nanolearn::problem::Problem;
use nanolearn::stoch::{self, StochMethod, StochParams};
use nanolearn::Scalar;

/// ADAM on the quadratic `f(x) = 1/2 * |x|^2` from the all-ones start:
/// 50 epochs of 100 iterations with the default rates drive the iterate
/// within 1e-3 of the origin.
#[test]
fn adam_converges_on_quadratic() {
    let mut problem = Sphere { dims: 10 };
    let params = StochParams {
        epochs: 50,
        epoch_size: 100,
        alpha0: 1e-3,
        beta1: 0.9,
        beta2: 0.99,
        epsilon: 1e-8,
        ..StochParams::default()
    };
    let x0 = vec![1.0; 10];
    let state = stoch::minimize(StochMethod::Adam, &params, &mut problem, &x0, |_, _| true)
        .expect("minimize failed");
    assert!(
        ops::norm_inf(&state.x) < 1e-3,
        "|x|_inf = {:.3e}",
        ops::norm_inf(&state.x)
    );
}

/// Every variant decreases the quadratic from the same start.
#[test]
fn all_methods_decrease_the_quadratic() {
    for method in StochMethod::all() {
        let mut problem = Sphere { dims: 5 };
        let x0 = vec![0.5; 5];
        let f0 = problem.value(&x0);
        let params = StochParams {
            epochs: 50,
            epoch_size: 100,
            ..method.defaults(50, 100)
        };
        let state = stoch::minimize(method, &params, &mut problem, &x0, |_, _| true)
            .expect("minimize failed");
        assert!(state.f.is_finite(), "{}", method.name());
        assert!(
            state.f < f0,
            "{}: f {} did not decrease from {}",
            method.name(),
            state.f,
            f0
        );
    }
}

/// The epoch callback sees exactly one snapshot per epoch and can halt the
/// schedule.
#[test]
fn epoch_snapshots_and_halting() {
    let mut problem = Sphere { dims: 3 };
    let params = StochParams {
        epochs: 20,
        epoch_size: 10,
        alpha0: 1e-2,
        ..StochParams::default()
    };
    let mut epochs = 0;
    stoch::minimize(
        StochMethod::Sg,
        &params,
        &mut problem,
        &[1.0, 1.0, 1.0],
        |_, _| {
            epochs += 1;
            epochs < 7
        },
    )
    .expect("minimize failed");
    assert_eq!(epochs, 7);
}

/// An empty schedule is a configuration error.
#[test]
fn empty_schedule_is_rejected() {
    let mut problem = Sphere { dims: 2 };
    let params = StochParams {
        epochs: 0,
        epoch_size: 10,
        ..StochParams::default()
    };
    assert!(stoch::minimize(StochMethod::Sg, &params, &mut problem, &[1.0, 1.0], |_, _| true)
        .is_err());
}

/// Tuning grids are small, finite and method-specific.
#[test]
fn tuning_grids_are_finite() {
    for method in StochMethod::all() {
        let base = method.defaults(4, 8);
        let grid = method.tuning_grid(&base);
        assert!(!grid.is_empty(), "{}", method.name());
        assert!(grid.len() <= 32, "{}: {}", method.name(), grid.len());
        for p in &grid {
            assert_eq!(p.epochs, 4);
            assert_eq!(p.epoch_size, 8);
        }
    }
}

/// The returned snapshot is the best one seen, never worse than the last.
#[test]
fn returns_best_snapshot() {
    let mut problem = Sphere { dims: 4 };
    let params = StochParams {
        epochs: 30,
        epoch_size: 50,
        alpha0: 1e-2,
        ..StochParams::default()
    };
    let mut snapshots = Vec::new();
    let state = stoch::minimize(
        StochMethod::Sgm,
        &params,
        &mut problem,
        &[1.0, -1.0, 0.5, -0.5],
        |_, s| {
            snapshots.push(s.f);
            true
        },
    )
    .expect("minimize failed");
    let min = snapshots.iter().cloned().fold(Scalar::INFINITY, Scalar::min);
    assert!(state.f <= min + 1e-12);
}
