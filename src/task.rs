//! Read-only sample providers partitioned into folds and protocols.
//!
//! A task owns samples grouped by [`Fold`]; the trainer sees it through the
//! [`Task`] trait. Sample content is identified by stable 64-bit hashes so
//! that fold membership can be audited (duplicates, train/test leakage)
//! independently of the observable order, which [`Task::shuffle`] permutes.

use crate::errors::{NanoError, NanoResult};
use crate::tensor::{Dims3, Tensor3};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

/// Dataset splitting protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Protocol {
    /// Samples used to compute the training objective.
    Train,
    /// Samples used to select the best epoch and tune hyper-parameters.
    Valid,
    /// Held-out samples, only ever evaluated.
    Test,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Train => "train",
            Protocol::Valid => "valid",
            Protocol::Test => "test",
        }
    }
}

/// A fold identifier: cross-validation index plus protocol, ordered
/// lexicographically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Fold {
    pub index: usize,
    pub protocol: Protocol,
}

impl Fold {
    pub fn new(index: usize, protocol: Protocol) -> Self {
        Self { index, protocol }
    }
}

/// An owned sample: input tensor, target tensor and an optional label.
#[derive(Clone, Debug)]
pub struct Sample {
    pub input: Tensor3,
    pub target: Tensor3,
    pub label: Option<String>,
}

/// A borrowed sample handed out by [`Task::get`]; short-lived, consumed by
/// one accumulator update.
#[derive(Clone, Copy)]
pub struct SampleView<'a> {
    pub input: &'a Tensor3,
    pub target: &'a Tensor3,
    pub label: Option<&'a str>,
}

/// FNV-1a over the dimensions and the scalar bit patterns of a tensor;
/// stable across process runs for the same content.
pub fn content_hash(t: &Tensor3) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut h = OFFSET;
    let mut eat = |bytes: &[u8]| {
        for b in bytes {
            h ^= u64::from(*b);
            h = h.wrapping_mul(PRIME);
        }
    };
    eat(&(t.planes as u64).to_le_bytes());
    eat(&(t.rows as u64).to_le_bytes());
    eat(&(t.cols as u64).to_le_bytes());
    for v in t.as_slice() {
        eat(&v.to_le_bytes());
    }
    h
}

/// A read-only provider of samples partitioned into folds.
///
/// Implementations must keep `fold_size` stable between shuffles and the
/// per-sample hashes dependent only on content. `shuffle` permutes the
/// observable order within a single fold; it requires `&mut self`, so it
/// can only run while no evaluation borrows the task.
pub trait Task: Sync {
    /// Input dimensions, stable for the task's lifetime.
    fn idims(&self) -> Dims3;

    /// Target dimensions, stable for the task's lifetime.
    fn odims(&self) -> Dims3;

    /// Number of cross-validation folds.
    fn fsize(&self) -> usize;

    /// Total number of samples over all folds.
    fn size(&self) -> usize;

    /// Number of samples in one fold.
    fn fold_size(&self, fold: Fold) -> usize;

    /// Borrows the sample at the current position `index` of `fold`.
    fn get(&self, fold: Fold, index: usize) -> SampleView<'_>;

    /// Content hash of the input tensor at `(fold, index)`.
    fn ihash(&self, fold: Fold, index: usize) -> u64;

    /// Content hash of the target tensor at `(fold, index)`.
    fn ohash(&self, fold: Fold, index: usize) -> u64;

    /// Permutes the observable order within `fold` without changing
    /// membership or counts.
    fn shuffle(&mut self, fold: Fold, rng: &mut StdRng);
}

struct Stored {
    sample: Sample,
    ihash: u64,
    ohash: u64,
}

/// An in-memory task assembled by [`MemTaskBuilder`].
pub struct MemTask {
    idims: Dims3,
    odims: Dims3,
    folds: usize,
    samples: BTreeMap<Fold, Vec<Stored>>,
}

impl MemTask {
    /// Starts building an in-memory task with the given sample dimensions
    /// and fold count.
    pub fn builder(idims: Dims3, odims: Dims3, folds: usize) -> MemTaskBuilder {
        let mut samples = BTreeMap::new();
        for index in 0..folds {
            for protocol in [Protocol::Train, Protocol::Valid, Protocol::Test] {
                samples.insert(Fold::new(index, protocol), Vec::new());
            }
        }
        MemTaskBuilder {
            task: MemTask {
                idims,
                odims,
                folds,
                samples,
            },
        }
    }

    fn stored(&self, fold: Fold, index: usize) -> &Stored {
        let bucket = self.samples.get(&fold).expect("unknown fold");
        &bucket[index]
    }
}

impl Task for MemTask {
    fn idims(&self) -> Dims3 {
        self.idims
    }

    fn odims(&self) -> Dims3 {
        self.odims
    }

    fn fsize(&self) -> usize {
        self.folds
    }

    fn size(&self) -> usize {
        self.samples.values().map(Vec::len).sum()
    }

    fn fold_size(&self, fold: Fold) -> usize {
        self.samples.get(&fold).map_or(0, Vec::len)
    }

    fn get(&self, fold: Fold, index: usize) -> SampleView<'_> {
        let s = &self.stored(fold, index).sample;
        SampleView {
            input: &s.input,
            target: &s.target,
            label: s.label.as_deref(),
        }
    }

    fn ihash(&self, fold: Fold, index: usize) -> u64 {
        self.stored(fold, index).ihash
    }

    fn ohash(&self, fold: Fold, index: usize) -> u64 {
        self.stored(fold, index).ohash
    }

    fn shuffle(&mut self, fold: Fold, rng: &mut StdRng) {
        if let Some(bucket) = self.samples.get_mut(&fold) {
            bucket.shuffle(rng);
        }
    }
}

/// Builder collecting samples into a [`MemTask`].
pub struct MemTaskBuilder {
    task: MemTask,
}

impl MemTaskBuilder {
    /// Adds a sample to the given cross-validation fold.
    ///
    /// With `protocol = None` the sample is assigned randomly in the usual
    /// 60% training / 20% validation / 20% testing ratio, drawing from the
    /// provided generator.
    ///
    /// # Errors
    ///
    /// Returns `NanoError::InvalidParameter` for an out-of-range fold and
    /// `NanoError::DimensionMismatch` if the sample does not match the
    /// declared dimensions.
    pub fn push(
        &mut self,
        fold: usize,
        protocol: Option<Protocol>,
        sample: Sample,
        rng: &mut StdRng,
    ) -> NanoResult<()> {
        if fold >= self.task.folds {
            return Err(NanoError::InvalidParameter(format!(
                "fold {fold} out of range (task has {})",
                self.task.folds
            )));
        }
        if sample.input.dims() != self.task.idims || sample.target.dims() != self.task.odims {
            return Err(NanoError::DimensionMismatch(format!(
                "sample {:?} -> {:?}, task expects {:?} -> {:?}",
                sample.input.dims(),
                sample.target.dims(),
                self.task.idims,
                self.task.odims
            )));
        }
        let protocol = protocol.unwrap_or_else(|| match rng.random_range(1..=10) {
            1..=6 => Protocol::Train,
            7..=8 => Protocol::Valid,
            _ => Protocol::Test,
        });
        let stored = Stored {
            ihash: content_hash(&sample.input),
            ohash: content_hash(&sample.target),
            sample,
        };
        self.task
            .samples
            .get_mut(&Fold::new(fold, protocol))
            .expect("fold buckets are pre-populated")
            .push(stored);
        Ok(())
    }

    /// Finishes building.
    pub fn build(self) -> MemTask {
        self.task
    }
}

fn protocol_hashes<T: Task + ?Sized>(task: &T, fold: Fold) -> Vec<u64> {
    (0..task.fold_size(fold))
        .map(|i| task.ihash(fold, i))
        .collect()
}

/// Counts input-hash duplicates across the three protocols of one fold.
pub fn count_duplicates<T: Task + ?Sized>(task: &T, fold: usize) -> usize {
    let mut hashes = Vec::new();
    for protocol in [Protocol::Train, Protocol::Valid, Protocol::Test] {
        hashes.extend(protocol_hashes(task, Fold::new(fold, protocol)));
    }
    hashes.sort_unstable();
    hashes.windows(2).filter(|w| w[0] == w[1]).count()
}

/// Largest pairwise input-hash intersection between the train, validation
/// and test protocols of one fold; nonzero values indicate leakage.
pub fn count_intersection<T: Task + ?Sized>(task: &T, fold: usize) -> usize {
    let mut sets: Vec<Vec<u64>> = [Protocol::Train, Protocol::Valid, Protocol::Test]
        .into_iter()
        .map(|p| protocol_hashes(task, Fold::new(fold, p)))
        .collect();
    for s in sets.iter_mut() {
        s.sort_unstable();
    }
    let intersect = |a: &[u64], b: &[u64]| {
        let (mut i, mut j, mut n) = (0, 0, 0);
        while i < a.len() && j < b.len() {
            match a[i].cmp(&b[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    n += 1;
                    i += 1;
                    j += 1;
                }
            }
        }
        n
    };
    intersect(&sets[0], &sets[1])
        .max(intersect(&sets[1], &sets[2]))
        .max(intersect(&sets[2], &sets[0]))
}
