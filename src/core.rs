/*!
Drivers shared by the importance samplers.

- [`Sampler`]: what the drivers need from a sampler.
- [`run_rounds`] / [`run_rounds_with_progress`]: run a sequence of rounds.
- [`Replicas`] and [`ReplicaRunner`]: independent copies of one sampler, run
  in parallel with rayon; their ledgers are gathered and can be merged with
  [`pool`].

```rust
use mini_pmc::core::{pool, ReplicaRunner, Replicas};
use mini_pmc::distributions::Gaussian;
use mini_pmc::importance_sampling::DeterministicIS;
use ndarray::{arr1, arr2};

let target = Gaussian::new(arr1(&[0.0]), arr2(&[[1.0]])).unwrap();
let proposal = Gaussian::new(arr1(&[0.0]), arr2(&[[2.0]])).unwrap();
let mut replicas = Replicas::new(DeterministicIS::new(target, proposal), 4).set_seed(42);

let histories = replicas.run(&[100, 100]).unwrap();
assert_eq!(histories.len(), 4);
assert_eq!(pool(&histories).unwrap().nrows(), 800);
```
*/

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use ndarray::{concatenate, Array2, ArrayView2, Axis};
use rand::prelude::*;
use rayon::prelude::*;

use crate::error::{PmcError, Result};
use crate::history::History;

pub trait Sampler {
    /// Draws a round of `n` weighted samples into the sampler's history.
    fn run(&mut self, n: usize) -> Result<()>;

    /// The weighted samples drawn so far.
    fn history(&self) -> &History;

    /// Forgets all rounds.
    fn clear(&mut self);

    /// Resets the random number generator with a new seed.
    fn reseed(&mut self, seed: u64);
}

/// Runs one round per entry of `sizes`, stopping at the first error.
pub fn run_rounds<S: Sampler + ?Sized>(sampler: &mut S, sizes: &[usize]) -> Result<()> {
    for &n in sizes {
        sampler.run(n)?;
    }
    Ok(())
}

/// Like [`run_rounds`], advancing `pb` by the size of each finished round.
pub fn run_rounds_with_progress<S: Sampler + ?Sized>(
    sampler: &mut S,
    sizes: &[usize],
    pb: &ProgressBar,
) -> Result<()> {
    pb.set_length(sizes.iter().sum::<usize>() as u64);

    for (round, &n) in sizes.iter().enumerate() {
        pb.set_message(format!("round {round}"));
        sampler.run(n)?;
        pb.inc(n as u64);
    }

    Ok(())
}

/// Concatenates gathered ledgers into one weighted-sample matrix.
pub fn pool(histories: &[History]) -> Result<Array2<f64>> {
    let views: Vec<ArrayView2<f64>> = histories.iter().map(|h| h.all()).collect();
    let width = views.first().ok_or(PmcError::EmptyInput)?.ncols();
    if let Some(other) = views.iter().find(|v| v.ncols() != width) {
        return Err(PmcError::DimensionMismatch {
            expected: width,
            found: other.ncols(),
        });
    }
    concatenate(Axis(0), &views).map_err(|_| PmcError::DimensionMismatch {
        expected: width,
        found: width,
    })
}

/// A trait for "anything that owns multiple samplers".
pub trait HasSamplers {
    type Sampler: Sampler + Send;

    fn samplers_mut(&mut self) -> &mut Vec<Self::Sampler>;
}

pub trait ReplicaRunner: HasSamplers {
    /// Runs every replica through the same rounds in parallel and gathers a
    /// copy of each replica's history.
    fn run(&mut self, sizes: &[usize]) -> Result<Vec<History>> {
        self.samplers_mut()
            .par_iter_mut()
            .map(|sampler| -> Result<History> {
                run_rounds(sampler, sizes)?;
                Ok(sampler.history().clone())
            })
            .collect()
    }

    /// Like [`ReplicaRunner::run`], with one progress bar per replica.
    fn run_progress(&mut self, sizes: &[usize]) -> Result<Vec<History>> {
        let multi = MultiProgress::new();
        let pb_style = ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .map_err(|e| PmcError::InvalidParameter(e.to_string()))?
            .progress_chars("##-");
        let total: usize = sizes.iter().sum();

        self.samplers_mut()
            .par_iter_mut()
            .enumerate()
            .map(|(i, sampler)| {
                let pb = multi.add(ProgressBar::new(total as u64));
                pb.set_prefix(format!("Replica {i}"));
                pb.set_style(pb_style.clone());

                let result = run_rounds_with_progress(sampler, sizes, &pb);
                match &result {
                    Ok(()) => pb.finish_with_message("Done!"),
                    Err(e) => pb.abandon_with_message(format!("Failed: {e}")),
                }
                result.map(|()| sampler.history().clone())
            })
            .collect()
    }
}

impl<T: HasSamplers> ReplicaRunner for T {}

/**
Independent copies of one sampler, seeded `seed`, `seed + 1`, ...

Each replica plays the part of one process of a distributed run: it adapts and
samples on its own, and only the gathered histories are combined.
*/
#[derive(Debug, Clone)]
pub struct Replicas<S> {
    pub samplers: Vec<S>,
    pub seed: u64,
}

impl<S: Sampler + Clone> Replicas<S> {
    pub fn new(sampler: S, n_replicas: usize) -> Self {
        let seed = thread_rng().gen::<u64>();
        Self {
            samplers: vec![sampler; n_replicas],
            seed,
        }
        .set_seed(seed)
    }

    /// Sets a new seed for all replicas; replica `i` gets `seed + i`.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        for (i, sampler) in self.samplers.iter_mut().enumerate() {
            sampler.reseed(seed.wrapping_add(i as u64));
        }
        self
    }
}

impl<S: Sampler + Send> HasSamplers for Replicas<S> {
    type Sampler = S;

    fn samplers_mut(&mut self) -> &mut Vec<S> {
        &mut self.samplers
    }
}
