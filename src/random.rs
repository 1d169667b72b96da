//! Seeded random number generation with independent sub-streams.
//!
//! A training run owns a single root seed. Every randomized sub-component
//! (layer initialization, fold shuffling, hyper-parameter tuning) draws from
//! its own generator derived from the root seed, so swapping one consumer
//! does not perturb the draws seen by the others.

use crate::Scalar;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Sub-stream tag for layer parameter initialization.
pub const STREAM_INIT: u64 = 0x01;
/// Sub-stream tag for fold shuffling.
pub const STREAM_SHUFFLE: u64 = 0x02;
/// Sub-stream tag for hyper-parameter tuning draws.
pub const STREAM_TUNE: u64 = 0x03;

/// Mixes a 64-bit value through the splitmix64 finalizer.
fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Derives a seeded generator for the given sub-stream of a root seed.
pub fn derive(root: u64, stream: u64) -> StdRng {
    StdRng::seed_from_u64(splitmix64(root ^ splitmix64(stream)))
}

/// Fills a slice with values sampled uniformly from `[lo, hi)`.
pub fn fill_uniform(rng: &mut StdRng, data: &mut [Scalar], lo: Scalar, hi: Scalar) {
    for v in data.iter_mut() {
        *v = rng.random_range(lo..hi);
    }
}
