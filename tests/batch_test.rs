//! Convergence of the batch optimizers over the analytic benchmark suite.

use nanolearn::batch::{self, BatchMethod, BatchParams, CgdUpdate};
use nanolearn::functions::{
    Cauchy, ChungReynolds, DixonPrice, Himmelblau, Rosenbrock, Sphere, StyblinskiTang,
    ThreeHumpCamel,
};
use nanolearn::lsearch::{StepInit, StepStrategy};
use nanolearn::ops;
use nanolearn::problem::Problem;
use nanolearn::Scalar;

const EPSILON: Scalar = 1e-6;

fn methods() -> Vec<BatchMethod> {
    let mut all = vec![BatchMethod::Gd, BatchMethod::Lbfgs { history: 10 }];
    all.extend(CgdUpdate::all().into_iter().map(BatchMethod::Cgd));
    all
}

fn strategies() -> [StepStrategy; 3] {
    [
        StepStrategy::Backtrack,
        StepStrategy::Interpolate,
        StepStrategy::CgDescent,
    ]
}

fn inits() -> [StepInit; 3] {
    [StepInit::Unit, StepInit::Consistent, StepInit::Quadratic]
}

fn run<P: Problem>(
    name: &str,
    problem: &mut P,
    x0: &[Scalar],
    method: BatchMethod,
    ls_init: StepInit,
    ls_strategy: StepStrategy,
) {
    let params = BatchParams {
        max_iterations: 4096,
        epsilon: EPSILON,
        ls_init,
        ls_strategy,
    };
    let state = batch::minimize(method, &params, problem, x0, |_, _| true)
        .unwrap_or_else(|e| panic!("{name} with {}: {e}", method.name()));
    let criterion = ops::norm_inf(&state.g) / state.f.abs().max(1.0);
    assert!(
        criterion < EPSILON,
        "{name} with {} ({ls_init:?}/{ls_strategy:?}): criterion {criterion:.3e}",
        method.name()
    );
}

/// Every direction and line-search combination over the convex functions.
#[test]
fn all_combinations_on_convex_functions() {
    for method in methods() {
        for strategy in strategies() {
            for init in inits() {
                run(
                    "sphere",
                    &mut Sphere { dims: 5 },
                    &[1.0, -0.5, 0.25, -1.0, 0.75],
                    method,
                    init,
                    strategy,
                );
                run(
                    "cauchy",
                    &mut Cauchy { dims: 4 },
                    &[0.8, -0.6, 0.4, -0.2],
                    method,
                    init,
                    strategy,
                );
                run(
                    "chung-reynolds",
                    &mut ChungReynolds { dims: 5 },
                    &[0.9, -0.7, 0.5, -0.3, 0.1],
                    method,
                    init,
                    strategy,
                );
            }
        }
    }
}

/// The quasi-Newton method over the full (partly non-convex) suite; the
/// criterion certifies a stationary point of whatever basin the start
/// belongs to.
#[test]
fn lbfgs_on_hard_functions() {
    for strategy in strategies() {
        run(
            "rosenbrock",
            &mut Rosenbrock { dims: 2 },
            &[-0.5, 0.8],
            BatchMethod::Lbfgs { history: 10 },
            StepInit::Quadratic,
            strategy,
        );
    }
    run(
        "dixon-price",
        &mut DixonPrice { dims: 3 },
        &[0.9, 0.4, -0.6],
        BatchMethod::Lbfgs { history: 6 },
        StepInit::Quadratic,
        StepStrategy::Interpolate,
    );
    run(
        "himmelblau",
        &mut Himmelblau,
        &[1.0, 1.0],
        BatchMethod::Lbfgs { history: 10 },
        StepInit::Quadratic,
        StepStrategy::Interpolate,
    );
    run(
        "styblinski-tang",
        &mut StyblinskiTang { dims: 4 },
        &[-1.0, 0.5, -0.5, 1.0],
        BatchMethod::Lbfgs { history: 10 },
        StepInit::Quadratic,
        StepStrategy::Interpolate,
    );
    run(
        "3hump-camel",
        &mut ThreeHumpCamel,
        &[0.5, -0.5],
        BatchMethod::Lbfgs { history: 10 },
        StepInit::Quadratic,
        StepStrategy::Interpolate,
    );
}

/// Conjugate-gradient variants on the Rosenbrock valley.
#[test]
fn cgd_on_rosenbrock() {
    for update in [CgdUpdate::Prp, CgdUpdate::N, CgdUpdate::Dyhs] {
        run(
            "rosenbrock",
            &mut Rosenbrock { dims: 2 },
            &[-0.5, 0.8],
            BatchMethod::Cgd(update),
            StepInit::Quadratic,
            StepStrategy::Interpolate,
        );
    }
}

/// Function values never increase along the reported iterates.
#[test]
fn iterates_are_monotone() {
    let mut problem = Rosenbrock { dims: 2 };
    let params = BatchParams {
        max_iterations: 512,
        epsilon: EPSILON,
        ls_init: StepInit::Quadratic,
        ls_strategy: StepStrategy::Interpolate,
    };
    let mut last = Scalar::INFINITY;
    batch::minimize(
        BatchMethod::Lbfgs { history: 10 },
        &params,
        &mut problem,
        &[-1.2, 1.0],
        |_, state| {
            assert!(state.f <= last + 1e-12, "{} after {}", state.f, last);
            last = state.f;
            true
        },
    )
    .expect("minimize failed");
}

/// The iteration cap is honored and the loop can be halted by the logger.
#[test]
fn ulog_halts_the_loop() {
    let mut problem = Sphere { dims: 3 };
    let params = BatchParams {
        max_iterations: 4096,
        epsilon: 0.0,
        ls_init: StepInit::Unit,
        ls_strategy: StepStrategy::Backtrack,
    };
    let mut calls = 0;
    let _ = batch::minimize(
        BatchMethod::Gd,
        &params,
        &mut problem,
        &[1.0, 1.0, 1.0],
        |_, _| {
            calls += 1;
            calls < 3
        },
    )
    .expect("minimize failed");
    assert_eq!(calls, 3);
}
