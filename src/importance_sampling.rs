/*!
# Importance Sampling

Two samplers that draw points from a [`Proposal`] and weight them against a
[`Target`]:

- [`ImportanceSampler`]: every point gets the one-shot weight
  `exp(log P(x) - log q(x))` under the proposal of its own run.
- [`DeterministicIS`]: every point, old and new, is weighted as if it had been
  drawn from the mixture of *all* proposals used so far, each weighted by the
  number of points it contributed (deterministic mixture weights, Cornuet et
  al. 2012, Algorithm 1). The weights of earlier runs are recomputed on every
  run.

Both keep their output in a [`History`] whose rows are
`[weight, x_0, x_1, ...]`, one run per call of `run`.

Points outside the target's support (log-density `-inf`, see
[`crate::indicator::Restricted`]) get weight zero.

## Example Usage

```rust
use mini_pmc::distributions::Gaussian;
use mini_pmc::importance_sampling::DeterministicIS;
use mini_pmc::stats;
use ndarray::{arr1, arr2};

let target = Gaussian::new(arr1(&[1.0, -1.0]), arr2(&[[1.0, 0.3], [0.3, 0.5]])).unwrap();
let wide = Gaussian::new(arr1(&[0.0, 0.0]), arr2(&[[9.0, 0.0], [0.0, 9.0]])).unwrap();

let mut sampler = DeterministicIS::new(target, wide).set_seed(42);
sampler.run(2_000).unwrap();

// move the proposal closer to the target and run again
sampler.proposal = Gaussian::new(arr1(&[1.0, -1.0]), arr2(&[[2.0, 0.0], [0.0, 1.0]])).unwrap();
sampler.run(2_000).unwrap();

assert_eq!(sampler.history.n_runs(), 2);
let mean = stats::mean(sampler.history.all()).unwrap();
assert!((mean[0] - 1.0).abs() < 0.1);
```
*/

use log::{debug, trace, warn};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::prelude::*;

use crate::core::Sampler;
use crate::distributions::{Proposal, Target};
use crate::error::{PmcError, Result};
use crate::history::History;

/// Draws `n` points and checks the shape the proposal returned.
fn propose_checked<Q: Proposal, R: Rng + ?Sized>(
    proposal: &Q,
    n: usize,
    dim: usize,
    rng: &mut R,
) -> Result<Array2<f64>> {
    let points = proposal.propose(n, rng).map_err(PmcError::proposal)?;
    check_shape(points.view(), n, dim)?;
    Ok(points)
}

fn propose_traced_checked<Q: Proposal, R: Rng + ?Sized>(
    proposal: &Q,
    n: usize,
    dim: usize,
    rng: &mut R,
) -> Result<(Array2<f64>, Array1<usize>)> {
    let (points, origin) = proposal
        .propose_traced(n, rng)
        .map_err(PmcError::proposal)?;
    check_shape(points.view(), n, dim)?;
    if origin.len() != n {
        return Err(PmcError::DimensionMismatch {
            expected: n,
            found: origin.len(),
        });
    }
    Ok((points, origin))
}

fn check_shape(points: ArrayView2<f64>, n: usize, dim: usize) -> Result<()> {
    if points.nrows() != n {
        return Err(PmcError::DimensionMismatch {
            expected: n,
            found: points.nrows(),
        });
    }
    if points.ncols() != dim {
        return Err(PmcError::DimensionMismatch {
            expected: dim,
            found: points.ncols(),
        });
    }
    Ok(())
}

/// `exp(log_target - log_proposal)`, zero outside the target's support.
fn importance_weight(log_target: f64, log_proposal: f64, index: usize) -> Result<f64> {
    if log_target.is_nan() || log_target == f64::INFINITY {
        return Err(PmcError::InvalidDensity {
            which: "target",
            index,
            value: log_target,
        });
    }
    if log_target == f64::NEG_INFINITY {
        return Ok(0.0);
    }
    if log_proposal.is_nan() || log_proposal == f64::INFINITY {
        return Err(PmcError::InvalidDensity {
            which: "proposal",
            index,
            value: log_proposal,
        });
    }
    if log_proposal == f64::NEG_INFINITY {
        return Err(PmcError::ZeroDensity { index });
    }
    Ok((log_target - log_proposal).exp())
}

/// `target / (delta / n_total)`, zero where the target vanishes.
fn mixture_weight(target: f64, delta: f64, n_total: f64, index: usize) -> Result<f64> {
    if !target.is_finite() {
        return Err(PmcError::InvalidDensity {
            which: "target",
            index,
            value: target,
        });
    }
    if !delta.is_finite() {
        return Err(PmcError::InvalidDensity {
            which: "mixture",
            index,
            value: delta,
        });
    }
    if target == 0.0 {
        return Ok(0.0);
    }
    if delta <= 0.0 {
        return Err(PmcError::ZeroDensity { index });
    }
    Ok(target / (delta / n_total))
}

/**
An importance sampler; generates weighted samples from `target` using `proposal`.

The proposal is owned by the sampler and never modified by it. It is a public
field so that an adaptation step can replace it between runs.

# Examples

```rust
use mini_pmc::distributions::{FnTarget, Gaussian};
use mini_pmc::importance_sampling::ImportanceSampler;
use ndarray::{arr1, arr2, ArrayView1};

let target = FnTarget(|x: ArrayView1<f64>| -0.5 * x.dot(&x));
let proposal = Gaussian::new(arr1(&[0.0]), arr2(&[[4.0]])).unwrap();
let mut sampler = ImportanceSampler::new(target, proposal).set_seed(7);

sampler.run(100).unwrap();
let origin = sampler.run_with_trace(50).unwrap();

assert_eq!(origin.len(), 50);
assert_eq!(sampler.history.n_runs(), 2);
assert_eq!(sampler.history.len(), 150);
```
*/
#[derive(Debug, Clone)]
pub struct ImportanceSampler<T, Q> {
    /// Log-density of the target, `-inf` outside its support.
    pub target: T,
    /// The proposal used by the next run.
    pub proposal: Q,
    /// Weighted samples, one run per call of `run`.
    pub history: History,
    /// The random seed.
    pub seed: u64,
    /// Random number generator handed to the proposal.
    pub rng: SmallRng,
}

impl<T: Target, Q: Proposal> ImportanceSampler<T, Q> {
    pub fn new(target: T, proposal: Q) -> Self {
        let seed = thread_rng().gen::<u64>();
        let history = History::new(proposal.dim() + 1, 0);
        Self {
            target,
            proposal,
            history,
            seed,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Reserves memory for `prealloc` samples, and grows by that many when it runs out.
    pub fn with_prealloc(mut self, prealloc: usize) -> Self {
        self.history = History::new(self.history.width(), prealloc);
        self
    }

    /// Sets a new seed and resets the random number generator accordingly.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.reseed(seed);
        self
    }

    fn reseed(&mut self, seed: u64) {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
    }

    /// Dimension of the sampled points.
    pub fn dim(&self) -> usize {
        self.history.width() - 1
    }

    /// Draws `n` points from the proposal, weights them and stores them as a new run.
    pub fn run(&mut self, n: usize) -> Result<()> {
        let points = propose_checked(&self.proposal, n, self.dim(), &mut self.rng)?;
        self.weigh_and_store(points)
    }

    /**
    Like [`ImportanceSampler::run`], additionally returning for each new point
    the index of the proposal's mixture component that generated it.
    */
    pub fn run_with_trace(&mut self, n: usize) -> Result<Array1<usize>> {
        let (points, origin) =
            propose_traced_checked(&self.proposal, n, self.dim(), &mut self.rng)?;
        self.weigh_and_store(points)?;
        Ok(origin)
    }

    fn weigh_and_store(&mut self, points: Array2<f64>) -> Result<()> {
        let offset = self.history.len();
        let weights = points
            .outer_iter()
            .enumerate()
            .map(|(i, x)| self.weigh(x, offset + i))
            .collect::<Result<Array1<f64>>>()?;

        let mut run = self.history.append(points.nrows());
        run.column_mut(0).assign(&weights);
        run.slice_mut(s![.., 1..]).assign(&points);
        Ok(())
    }

    fn weigh(&self, x: ArrayView1<f64>, index: usize) -> Result<f64> {
        let log_target = self.target.log_density(x).map_err(PmcError::target)?;
        if log_target == f64::NEG_INFINITY {
            return Ok(0.0);
        }
        let log_proposal = self.proposal.evaluate(x).map_err(PmcError::proposal)?;
        importance_weight(log_target, log_proposal, index)
    }
}

impl<T: Target, Q: Proposal> Sampler for ImportanceSampler<T, Q> {
    fn run(&mut self, n: usize) -> Result<()> {
        ImportanceSampler::run(self, n)
    }

    fn history(&self) -> &History {
        &self.history
    }

    fn clear(&mut self) {
        self.history.clear();
    }

    fn reseed(&mut self, seed: u64) {
        ImportanceSampler::reseed(self, seed);
    }
}

/// Everything a run adds or changes, computed before any of it is stored.
#[derive(Debug, Clone, PartialEq)]
struct RoundUpdate {
    /// `exp(log P(x))` of the new points.
    targets: Array1<f64>,
    /// `Σ_j N_j q_j(x)` of the new points over all rounds including this one.
    deltas: Array1<f64>,
    /// `N_r q_r(x)` of the points of all earlier rounds.
    increments: Array1<f64>,
    /// Weights of all points, old and new.
    weights: Array1<f64>,
}

/**
An importance sampler computing *deterministic mixture weights*.

Each run `r` draws `N_r` points from the current proposal and stores a copy of
that proposal. Afterwards, every point `x` in the history carries the weight

```text
w(x) = P(x) / ( Σ_j N_j q_j(x) / Σ_j N_j )
```

where the sums run over all runs so far and `q_j` is the proposal of run `j`.
The target is evaluated once per point; earlier proposals are evaluated at new
points, and the newest proposal at all earlier points.

Besides `history`, the sampler keeps the per-point target values and mixture
densities, and the proposal of every run. Use [`DeterministicIS::clear`] to
start over: clearing only `history` leaves the sampler inconsistent and its next
run fails with [`PmcError::LedgerMismatch`].

# Examples

```rust
use mini_pmc::distributions::Gaussian;
use mini_pmc::importance_sampling::DeterministicIS;
use ndarray::{arr1, arr2};

let target = Gaussian::new(arr1(&[0.0]), arr2(&[[1.0]])).unwrap();
let proposal = Gaussian::new(arr1(&[0.5]), arr2(&[[2.0]])).unwrap();
let mut sampler = DeterministicIS::new(target, proposal).set_seed(1);

sampler.run(10).unwrap();
let before = sampler.history.run(0).unwrap().column(0).to_owned();

sampler.proposal = Gaussian::new(arr1(&[-0.5]), arr2(&[[2.0]])).unwrap();
sampler.run(10).unwrap();
let after = sampler.history.run(0).unwrap().column(0).to_owned();

// the first run's weights now account for the second proposal
assert_ne!(before, after);
assert_eq!(sampler.proposal_history().len(), 2);

sampler.clear();
assert_eq!(sampler.n_rounds(), 0);
```
*/
#[derive(Debug, Clone)]
pub struct DeterministicIS<T, Q> {
    /// Log-density of the target, `-inf` outside its support.
    pub target: T,
    /// The proposal used by the next run.
    pub proposal: Q,
    /// Weighted samples, one run per call of `run`.
    pub history: History,
    /// The random seed.
    pub seed: u64,
    /// Random number generator handed to the proposal.
    pub rng: SmallRng,
    proposal_history: Vec<Q>,
    /// Per point: `[delta, target]`, same runs as `history`.
    deltas_targets: History,
}

impl<T: Target, Q: Proposal + Clone> From<ImportanceSampler<T, Q>> for DeterministicIS<T, Q> {
    /// Switches a plain importance sampler to deterministic mixture weights.
    /// Samples already in its history are discarded.
    fn from(sampler: ImportanceSampler<T, Q>) -> Self {
        let ImportanceSampler {
            target,
            proposal,
            mut history,
            seed,
            rng,
        } = sampler;
        history.clear();
        let deltas_targets = History::new(2, history.prealloc());
        Self {
            target,
            proposal,
            history,
            seed,
            rng,
            proposal_history: Vec::new(),
            deltas_targets,
        }
    }
}

impl<T: Target, Q: Proposal + Clone> DeterministicIS<T, Q> {
    pub fn new(target: T, proposal: Q) -> Self {
        ImportanceSampler::new(target, proposal).into()
    }

    /// Reserves memory for `prealloc` samples, and grows by that many when it runs out.
    pub fn with_prealloc(mut self, prealloc: usize) -> Self {
        self.history = History::new(self.history.width(), prealloc);
        self.deltas_targets = History::new(2, prealloc);
        self.proposal_history.clear();
        self
    }

    /// Sets a new seed and resets the random number generator accordingly.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.reseed(seed);
        self
    }

    fn reseed(&mut self, seed: u64) {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
    }

    /// Dimension of the sampled points.
    pub fn dim(&self) -> usize {
        self.history.width() - 1
    }

    /// Number of runs since construction or the last [`DeterministicIS::clear`].
    pub fn n_rounds(&self) -> usize {
        self.proposal_history.len()
    }

    /// The proposal of every run, oldest first.
    pub fn proposal_history(&self) -> &[Q] {
        &self.proposal_history
    }

    /// `Σ_j N_j q_j(x)` for every stored point.
    pub fn deltas(&self) -> ArrayView1<'_, f64> {
        self.deltas_targets.all().index_axis_move(Axis(1), 0)
    }

    /// `exp(log P(x))` for every stored point.
    pub fn target_values(&self) -> ArrayView1<'_, f64> {
        self.deltas_targets.all().index_axis_move(Axis(1), 1)
    }

    /// Deletes all samples, target values and stored proposals.
    pub fn clear(&mut self) {
        self.history.clear();
        self.deltas_targets.clear();
        self.proposal_history.clear();
    }

    /// Draws `n` points from the proposal and recomputes the weights of all points.
    pub fn run(&mut self, n: usize) -> Result<()> {
        let snapshot = self.proposal.clone();
        let points = propose_checked(&snapshot, n, self.dim(), &mut self.rng)?;
        self.run_round(points, snapshot)
    }

    /**
    Like [`DeterministicIS::run`], additionally returning for each new point
    the index of the proposal's mixture component that generated it.
    */
    pub fn run_with_trace(&mut self, n: usize) -> Result<Array1<usize>> {
        let snapshot = self.proposal.clone();
        let (points, origin) = propose_traced_checked(&snapshot, n, self.dim(), &mut self.rng)?;
        self.run_round(points, snapshot)?;
        Ok(origin)
    }

    fn run_round(&mut self, points: Array2<f64>, snapshot: Q) -> Result<()> {
        let update = self.prepare_round(points.view(), &snapshot)?;
        self.commit_round(points, update, snapshot);
        Ok(())
    }

    fn check_consistency(&self) -> Result<()> {
        if self.history.n_runs() != self.deltas_targets.n_runs() {
            return Err(PmcError::LedgerMismatch {
                samples: self.history.n_runs(),
                auxiliary: self.deltas_targets.n_runs(),
            });
        }
        if self.history.len() != self.deltas_targets.len() {
            return Err(PmcError::LedgerMismatch {
                samples: self.history.len(),
                auxiliary: self.deltas_targets.len(),
            });
        }
        if self.proposal_history.len() != self.history.n_runs() {
            return Err(PmcError::SnapshotMismatch {
                snapshots: self.proposal_history.len(),
                rounds: self.history.n_runs(),
            });
        }
        Ok(())
    }

    /// Computes the next state of the ledgers without touching the current one.
    fn prepare_round(&self, points: ArrayView2<f64>, snapshot: &Q) -> Result<RoundUpdate> {
        self.check_consistency()?;

        let round = self.proposal_history.len();
        let n_new = points.nrows();
        let sizes: Vec<usize> = self
            .history
            .run_lengths()
            .chain(std::iter::once(n_new))
            .collect();
        let n_total: usize = sizes.iter().sum();

        let snapshots: Vec<(&Q, f64)> = self
            .proposal_history
            .iter()
            .chain(std::iter::once(snapshot))
            .zip(sizes.iter().map(|&n| n as f64))
            .collect();

        let deltas = points
            .outer_iter()
            .map(|x| -> Result<f64> {
                let mut delta = 0.0;
                for &(q, n_j) in snapshots.iter().filter(|(_, n_j)| *n_j > 0.0) {
                    delta += n_j * q.evaluate(x).map_err(PmcError::proposal)?.exp();
                }
                Ok(delta)
            })
            .collect::<Result<Array1<f64>>>()?;

        // contribution of the newest proposal to all earlier points
        let old_points = self.history.all();
        let increments = if round == 0 || n_new == 0 {
            Array1::zeros(old_points.nrows())
        } else {
            trace!(
                "retroactive correction of {} samples from {} earlier rounds",
                old_points.nrows(),
                round
            );
            let n_r = n_new as f64;
            old_points
                .slice(s![.., 1..])
                .outer_iter()
                .map(|x| {
                    snapshot
                        .evaluate(x)
                        .map(|log_q| n_r * log_q.exp())
                        .map_err(PmcError::proposal)
                })
                .collect::<Result<Array1<f64>>>()?
        };

        // the expensive target is evaluated for new points only, once the proposals succeeded
        let targets = points
            .outer_iter()
            .map(|x| {
                self.target
                    .log_density(x)
                    .map(f64::exp)
                    .map_err(PmcError::target)
            })
            .collect::<Result<Array1<f64>>>()?;

        let old_aux = self.deltas_targets.all();
        let all_deltas = old_aux
            .column(0)
            .into_iter()
            .zip(increments.iter())
            .map(|(delta, inc)| delta + inc)
            .chain(deltas.iter().copied());
        let all_targets = old_aux.column(1).into_iter().chain(targets.iter()).copied();
        let n_total = n_total as f64;
        let weights = all_deltas
            .zip(all_targets)
            .enumerate()
            .map(|(index, (delta, target))| mixture_weight(target, delta, n_total, index))
            .collect::<Result<Array1<f64>>>()?;

        Ok(RoundUpdate {
            targets,
            deltas,
            increments,
            weights,
        })
    }

    fn commit_round(&mut self, points: Array2<f64>, update: RoundUpdate, snapshot: Q) {
        let n_new = points.nrows();
        let n_old = update.increments.len();

        self.history
            .append(n_new)
            .slice_mut(s![.., 1..])
            .assign(&points);

        let mut aux = self.deltas_targets.append(n_new);
        aux.column_mut(0).assign(&update.deltas);
        aux.column_mut(1).assign(&update.targets);

        let mut old_deltas = self.deltas_targets.all_mut();
        let mut old_deltas = old_deltas.slice_mut(s![..n_old, 0]);
        old_deltas += &update.increments;

        self.proposal_history.push(snapshot);
        self.history.all_mut().column_mut(0).assign(&update.weights);

        debug!(
            "deterministic mixture round {}: {} new samples, {} in total",
            self.proposal_history.len() - 1,
            n_new,
            self.history.len()
        );
        if !update.weights.is_empty() && update.weights.iter().all(|&w| w == 0.0) {
            warn!("all importance weights are zero; the proposals miss the target's support");
        }
    }
}

impl<T: Target, Q: Proposal + Clone> Sampler for DeterministicIS<T, Q> {
    fn run(&mut self, n: usize) -> Result<()> {
        DeterministicIS::run(self, n)
    }

    fn history(&self) -> &History {
        &self.history
    }

    fn clear(&mut self) {
        DeterministicIS::clear(self);
    }

    fn reseed(&mut self, seed: u64) {
        DeterministicIS::reseed(self, seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{FnTarget, Gaussian, Mixture};
    use crate::indicator::Restricted;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::{arr1, arr2};
    use thiserror::Error;

    #[derive(Error, Debug)]
    #[error("target exploded")]
    struct Exploded;

    /// A standard normal target that can be switched to fail.
    struct Flaky {
        fail: bool,
    }

    impl Target for Flaky {
        type Err = Exploded;

        fn log_density(&self, x: ArrayView1<f64>) -> std::result::Result<f64, Exploded> {
            if self.fail {
                Err(Exploded)
            } else {
                Ok(-0.5 * x.dot(&x))
            }
        }
    }

    /// Returns points of the wrong dimension.
    #[derive(Clone)]
    struct Misshapen;

    impl Proposal for Misshapen {
        type Err = std::convert::Infallible;

        fn dim(&self) -> usize {
            2
        }

        fn evaluate(&self, _x: ArrayView1<f64>) -> std::result::Result<f64, Self::Err> {
            Ok(0.0)
        }

        fn propose<R: Rng + ?Sized>(
            &self,
            n: usize,
            _rng: &mut R,
        ) -> std::result::Result<Array2<f64>, Self::Err> {
            Ok(Array2::zeros((n, 3)))
        }
    }

    /// Claims zero density everywhere, including at its own points.
    #[derive(Clone)]
    struct Vanishing;

    impl Proposal for Vanishing {
        type Err = std::convert::Infallible;

        fn dim(&self) -> usize {
            1
        }

        fn evaluate(&self, _x: ArrayView1<f64>) -> std::result::Result<f64, Self::Err> {
            Ok(f64::NEG_INFINITY)
        }

        fn propose<R: Rng + ?Sized>(
            &self,
            n: usize,
            _rng: &mut R,
        ) -> std::result::Result<Array2<f64>, Self::Err> {
            Ok(Array2::zeros((n, 1)))
        }
    }

    fn std_normal_target() -> FnTarget<impl Fn(ArrayView1<f64>) -> f64> {
        FnTarget(|x: ArrayView1<f64>| -0.5 * x.dot(&x))
    }

    fn gauss(mean: f64, var: f64) -> Gaussian {
        Gaussian::new(arr1(&[mean]), arr2(&[[var]])).unwrap()
    }

    #[test]
    fn test_plain_weights_match_formula() {
        let mut sampler = ImportanceSampler::new(std_normal_target(), gauss(0.3, 2.0)).set_seed(5);
        sampler.run(50).unwrap();
        for row in sampler.history.all().outer_iter() {
            let x = row.slice(s![1..]);
            let expected = (-0.5 * x[0] * x[0] - sampler.proposal.evaluate(x).unwrap()).exp();
            assert_relative_eq!(row[0], expected, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_plain_weights_zero_outside_support() {
        let target = Restricted::new(std_normal_target(), |x: ArrayView1<f64>| x[0] > 0.0);
        let mut sampler = ImportanceSampler::new(target, gauss(0.0, 1.0)).set_seed(11);
        sampler.run(200).unwrap();
        for row in sampler.history.all().outer_iter() {
            if row[1] > 0.0 {
                assert!(row[0] > 0.0);
            } else {
                assert_eq!(row[0], 0.0);
            }
        }
    }

    #[test]
    fn test_plain_trace() {
        let mixture = Mixture::new(vec![gauss(-5.0, 1.0), gauss(5.0, 1.0)], vec![0.5, 0.5]).unwrap();
        let mut sampler = ImportanceSampler::new(std_normal_target(), mixture).set_seed(2);
        let origin = sampler.run_with_trace(100).unwrap();
        assert_eq!(origin.len(), 100);
        for (row, &k) in sampler.history.all().outer_iter().zip(origin.iter()) {
            assert_eq!(row[1] > 0.0, k == 1);
        }
    }

    #[test]
    fn test_plain_collaborator_error_commits_nothing() {
        let mut sampler = ImportanceSampler::new(Flaky { fail: false }, gauss(0.0, 1.0)).set_seed(3);
        sampler.run(10).unwrap();
        let before = sampler.history.clone();

        sampler.target.fail = true;
        let err = sampler.run(10).unwrap_err();
        assert!(matches!(err, PmcError::Target(_)));
        assert_eq!(sampler.history, before);
    }

    #[test]
    fn test_plain_shape_is_checked() {
        let mut sampler = ImportanceSampler::new(
            FnTarget(|_: ArrayView1<f64>| 0.0),
            Misshapen,
        );
        let err = sampler.run(4).unwrap_err();
        assert!(matches!(
            err,
            PmcError::DimensionMismatch {
                expected: 2,
                found: 3
            }
        ));
        assert_eq!(sampler.history.n_runs(), 0);
    }

    #[test]
    fn test_weight_helpers() {
        assert_eq!(importance_weight(f64::NEG_INFINITY, f64::NEG_INFINITY, 0).unwrap(), 0.0);
        assert!(importance_weight(0.0, f64::NEG_INFINITY, 4)
            .unwrap_err()
            .is_degenerate());
        assert_abs_diff_eq!(importance_weight(1.0, 0.5, 0).unwrap(), 0.5f64.exp());

        assert_eq!(mixture_weight(0.0, 0.0, 10.0, 0).unwrap(), 0.0);
        assert!(matches!(
            mixture_weight(1.0, 0.0, 10.0, 7),
            Err(PmcError::ZeroDensity { index: 7 })
        ));
        assert_abs_diff_eq!(mixture_weight(2.0, 4.0, 10.0, 0).unwrap(), 5.0);
    }

    #[test]
    fn test_nan_densities_are_rejected() {
        assert!(matches!(
            importance_weight(f64::NAN, 0.0, 2),
            Err(PmcError::InvalidDensity {
                which: "target",
                index: 2,
                ..
            })
        ));
        assert!(importance_weight(f64::INFINITY, 0.0, 0).is_err());
        assert!(matches!(
            importance_weight(0.0, f64::NAN, 1),
            Err(PmcError::InvalidDensity {
                which: "proposal",
                ..
            })
        ));
        assert!(mixture_weight(f64::NAN, 1.0, 10.0, 0).unwrap_err().is_degenerate());
        assert!(matches!(
            mixture_weight(1.0, f64::NAN, 10.0, 5),
            Err(PmcError::InvalidDensity {
                which: "mixture",
                index: 5,
                ..
            })
        ));

        let nan_target = FnTarget(|x: ArrayView1<f64>| if x[0] > 0.0 { f64::NAN } else { 0.0 });
        let mut plain = ImportanceSampler::new(nan_target, gauss(0.0, 1.0)).set_seed(13);
        assert!(matches!(plain.run(50), Err(PmcError::InvalidDensity { .. })));
        assert!(plain.history.is_empty());

        let mut dmis = DeterministicIS::new(nan_target, gauss(0.0, 1.0)).set_seed(13);
        assert!(matches!(dmis.run(50), Err(PmcError::InvalidDensity { .. })));
        assert_eq!(dmis.n_rounds(), 0);
        assert!(dmis.history.is_empty());
    }

    #[test]
    fn test_target_of_other_dimension_fails_instead_of_broadcasting() {
        let target = Gaussian::new(arr1(&[0.0, 0.0]), arr2(&[[1.0, 0.0], [0.0, 1.0]])).unwrap();
        for proposal in [
            gauss(0.0, 1.0),
            Gaussian::new(arr1(&[0.0, 0.0, 0.0]), Array2::eye(3)).unwrap(),
        ] {
            let mut plain = ImportanceSampler::new(target.clone(), proposal.clone()).set_seed(1);
            assert!(matches!(plain.run(5), Err(PmcError::Target(_))));

            let mut dmis = DeterministicIS::new(target.clone(), proposal).set_seed(1);
            let err = dmis.run(5).unwrap_err();
            match &err {
                PmcError::Target(source) => assert!(matches!(
                    source.downcast_ref::<PmcError>(),
                    Some(PmcError::DimensionMismatch { expected: 2, .. })
                )),
                other => panic!("Expected a target error, got {other:?}"),
            }
            assert_eq!(dmis.n_rounds(), 0);
        }
    }

    #[test]
    fn test_dmis_detects_missing_snapshot() {
        let mut sampler = DeterministicIS::new(std_normal_target(), gauss(0.0, 1.0)).set_seed(2);
        sampler.run(5).unwrap();
        sampler.proposal_history.push(gauss(1.0, 1.0));
        assert!(matches!(
            sampler.run(5),
            Err(PmcError::SnapshotMismatch {
                snapshots: 2,
                rounds: 1
            })
        ));
        assert_eq!(sampler.history.n_runs(), 1);
    }

    #[test]
    fn test_dmis_deltas_cover_all_proposals() {
        let q0 = gauss(-1.0, 1.0);
        let q1 = gauss(1.0, 0.5);
        let mut sampler = DeterministicIS::new(std_normal_target(), q0.clone()).set_seed(9);
        sampler.run(30).unwrap();
        sampler.proposal = q1.clone();
        sampler.run(20).unwrap();

        let n_total = 50.0;
        let all = sampler.history.all();
        for (i, row) in all.outer_iter().enumerate() {
            let x = row.slice(s![1..]);
            let delta = 30.0 * q0.evaluate(x).unwrap().exp() + 20.0 * q1.evaluate(x).unwrap().exp();
            let target = (-0.5 * x[0] * x[0]).exp();
            assert_relative_eq!(sampler.deltas()[i], delta, max_relative = 1e-12);
            assert_relative_eq!(sampler.target_values()[i], target, max_relative = 1e-12);
            assert_relative_eq!(row[0], target / (delta / n_total), max_relative = 1e-12);
        }
    }

    #[test]
    fn test_dmis_snapshots_are_independent_of_live_proposal() {
        let mut sampler = DeterministicIS::new(std_normal_target(), gauss(0.0, 1.0)).set_seed(4);
        sampler.run(5).unwrap();
        sampler.proposal = gauss(3.0, 1.0);
        assert_eq!(sampler.proposal_history()[0], gauss(0.0, 1.0));
        sampler.run(5).unwrap();
        assert_eq!(sampler.proposal_history()[1], gauss(3.0, 1.0));
    }

    #[test]
    fn test_dmis_failed_round_leaves_state_untouched() {
        let mut sampler = DeterministicIS::new(Flaky { fail: false }, gauss(0.0, 2.0)).set_seed(8);
        sampler.run(15).unwrap();
        sampler.run(15).unwrap();
        let history = sampler.history.clone();
        let deltas = sampler.deltas().to_owned();

        sampler.target.fail = true;
        assert!(matches!(sampler.run(15), Err(PmcError::Target(_))));
        assert_eq!(sampler.history, history);
        assert_eq!(sampler.deltas(), deltas);
        assert_eq!(sampler.n_rounds(), 2);

        sampler.target.fail = false;
        sampler.run(15).unwrap();
        assert_eq!(sampler.n_rounds(), 3);
    }

    #[test]
    fn test_dmis_detects_partial_clear() {
        let mut sampler = DeterministicIS::new(std_normal_target(), gauss(0.0, 1.0)).set_seed(6);
        sampler.run(10).unwrap();
        sampler.history.clear();
        let err = sampler.run(10).unwrap_err();
        assert!(err.is_consistency());
        assert_eq!(sampler.n_rounds(), 1);

        sampler.clear();
        sampler.run(10).unwrap();
        assert_eq!(sampler.n_rounds(), 1);
        assert_eq!(sampler.history.len(), 10);
    }

    #[test]
    fn test_dmis_zero_density_is_degenerate() {
        let mut sampler = DeterministicIS::new(FnTarget(|_: ArrayView1<f64>| 0.0), Vanishing);
        let err = sampler.run(3).unwrap_err();
        assert!(matches!(err, PmcError::ZeroDensity { index: 0 }));
        assert!(err.is_degenerate());
        assert_eq!(sampler.n_rounds(), 0);

        // no target mass where the proposal vanishes is fine
        let target = Restricted::new(
            FnTarget(|_: ArrayView1<f64>| 0.0),
            |x: ArrayView1<f64>| x[0] > 1.0,
        );
        let mut sampler = DeterministicIS::new(target, Vanishing);
        sampler.run(3).unwrap();
        assert!(sampler.history.all().column(0).iter().all(|&w| w == 0.0));
    }

    #[test]
    fn test_dmis_empty_round() {
        let mut sampler = DeterministicIS::new(std_normal_target(), gauss(0.0, 1.0)).set_seed(12);
        sampler.run(0).unwrap();
        assert_eq!(sampler.n_rounds(), 1);
        assert!(sampler.history.is_empty());

        sampler.proposal = gauss(0.5, 1.0);
        sampler.run(8).unwrap();
        assert_eq!(sampler.history.run_lengths().collect::<Vec<_>>(), vec![0, 8]);
        assert!(sampler.history.all().column(0).iter().all(|&w| w > 0.0));
    }

    #[test]
    fn test_dmis_from_plain_sampler() {
        let mut plain = ImportanceSampler::new(std_normal_target(), gauss(0.0, 1.0))
            .with_prealloc(64)
            .set_seed(10);
        plain.run(5).unwrap();
        let mut dmis = DeterministicIS::from(plain);
        assert_eq!(dmis.n_rounds(), 0);
        assert!(dmis.history.is_empty());
        dmis.run(5).unwrap();
        assert_eq!(dmis.history.capacity(), 64);
    }
}
