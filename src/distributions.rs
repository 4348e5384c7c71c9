/*!
Target and proposal densities for importance sampling.

A **target** only needs to evaluate its (unnormalized) log-density. A
**proposal** must additionally draw batches of points, and is cloned by the
deterministic-mixture sampler to keep a snapshot of every round's proposal.

Densities shipped with the crate:

- [`Gaussian`]: multivariate normal with full covariance.
- [`StudentT`]: multivariate Student's t with full scale matrix.
- [`Mixture`]: weighted mixture of components of one type; traced proposals
  report which component produced each point.
- [`FnTarget`]: wraps a closure returning a log-density.

All of them work in `f64` and take points as [`ndarray::ArrayView1`].

# Examples

```rust
use mini_pmc::distributions::{Gaussian, Mixture, Proposal, Target};
use ndarray::{arr1, arr2};
use rand::{rngs::SmallRng, SeedableRng};

let left = Gaussian::new(arr1(&[-2.0, 0.0]), arr2(&[[1.0, 0.0], [0.0, 1.0]])).unwrap();
let right = Gaussian::new(arr1(&[2.0, 0.0]), arr2(&[[1.0, 0.5], [0.5, 1.0]])).unwrap();
let mixture = Mixture::new(vec![left, right], vec![0.3, 0.7]).unwrap();

let mut rng = SmallRng::seed_from_u64(42);
let (points, origin) = mixture.propose_traced(5, &mut rng).unwrap();
assert_eq!(points.dim(), (5, 2));
assert!(origin.iter().all(|&k| k < 2));

let logp = mixture.log_density(points.row(0)).unwrap();
assert!(logp.is_finite());
```
*/

use std::convert::Infallible;
use std::f64::consts::PI;

use nalgebra as na;
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use rand_distr::{ChiSquared, Distribution, StandardNormal};
use statrs::function::gamma::ln_gamma;

use crate::error::{PmcError, Result};

/// A density we want to approximate by weighted samples.
pub trait Target {
    type Err: std::error::Error + Send + Sync + 'static;

    /// Returns `log P(x)` up to an additive constant. Points outside the support
    /// return `f64::NEG_INFINITY`.
    fn log_density(&self, x: ArrayView1<f64>) -> std::result::Result<f64, Self::Err>;
}

/// A density we can both draw from and evaluate.
pub trait Proposal {
    type Err: std::error::Error + Send + Sync + 'static;

    /// Dimension of the points this proposal generates.
    fn dim(&self) -> usize;

    /// Returns the normalized log-density `log q(x)`.
    fn evaluate(&self, x: ArrayView1<f64>) -> std::result::Result<f64, Self::Err>;

    /// Draws `n` points, one per row.
    fn propose<R: Rng + ?Sized>(
        &self,
        n: usize,
        rng: &mut R,
    ) -> std::result::Result<Array2<f64>, Self::Err>;

    /**
    Draws `n` points and reports, for every point, the index of the mixture
    component that generated it.

    A proposal that is not a mixture is a mixture of one component, so the
    default labels every point with `0`.
    */
    fn propose_traced<R: Rng + ?Sized>(
        &self,
        n: usize,
        rng: &mut R,
    ) -> std::result::Result<(Array2<f64>, Array1<usize>), Self::Err> {
        Ok((self.propose(n, rng)?, Array1::zeros(n)))
    }
}

/**
A target given by a closure returning the log-density.

```rust
use mini_pmc::distributions::{FnTarget, Target};
use ndarray::{arr1, ArrayView1};

let target = FnTarget(|x: ArrayView1<f64>| -0.5 * x.dot(&x));
assert_eq!(target.log_density(arr1(&[0.0, 0.0]).view()).unwrap(), 0.0);
```
*/
#[derive(Debug, Clone, Copy)]
pub struct FnTarget<F>(pub F);

impl<F> Target for FnTarget<F>
where
    F: Fn(ArrayView1<f64>) -> f64,
{
    type Err = Infallible;

    fn log_density(&self, x: ArrayView1<f64>) -> std::result::Result<f64, Infallible> {
        Ok((self.0)(x))
    }
}

/// Lower Cholesky factor of `cov`, which must be `d × d` and positive definite, `d = mean.len()`.
fn lower_cholesky(mean: &Array1<f64>, cov: &Array2<f64>) -> Result<na::DMatrix<f64>> {
    let d = mean.len();
    if cov.dim() != (d, d) {
        return Err(PmcError::DimensionMismatch {
            expected: d,
            found: cov.nrows(),
        });
    }
    let cov = na::DMatrix::from_fn(d, d, |i, j| cov[[i, j]]);
    let chol = na::Cholesky::new(cov).ok_or_else(|| {
        PmcError::InvalidParameter("covariance matrix is not positive definite".to_string())
    })?;
    Ok(chol.l())
}

/// `log sqrt(det(L L^T))`
fn half_log_det(l: &na::DMatrix<f64>) -> f64 {
    l.diagonal().iter().map(|x| x.ln()).sum()
}

/// Squared Mahalanobis distance of `x` from `mean` under the covariance `L L^T`.
fn mahalanobis_sq(l: &na::DMatrix<f64>, mean: &Array1<f64>, x: ArrayView1<f64>) -> Result<f64> {
    if x.len() != mean.len() {
        return Err(PmcError::DimensionMismatch {
            expected: mean.len(),
            found: x.len(),
        });
    }
    let diff = na::DVector::from_iterator(x.len(), x.iter().zip(mean).map(|(v, m)| v - m));
    let z = l.solve_lower_triangular(&diff).ok_or_else(|| {
        PmcError::InvalidParameter("Cholesky factor has a zero on its diagonal".to_string())
    })?;
    Ok(z.norm_squared())
}

/// Draws `n` standard-normal vectors mapped through `L z`, one per row.
fn correlated_normals<R: Rng + ?Sized>(
    l: &na::DMatrix<f64>,
    n: usize,
    rng: &mut R,
) -> Array2<f64> {
    let d = l.nrows();
    let z_vec: Vec<f64> = (0..d * n).map(|_| rng.sample(StandardNormal)).collect();
    let z = na::DMatrix::from_vec(d, n, z_vec);
    let y = l * z;
    Array2::from_shape_fn((n, d), |(i, j)| y[(j, i)])
}

/**
A multivariate Gaussian distribution with full covariance matrix.

# Examples

```rust
use mini_pmc::distributions::{Gaussian, Proposal};
use ndarray::{arr1, arr2};

let gauss = Gaussian::new(arr1(&[0.0, 0.0]), arr2(&[[1.0, 0.0], [0.0, 1.0]])).unwrap();
let logp = gauss.evaluate(arr1(&[0.0, 0.0]).view()).unwrap();
assert!((logp + (2.0 * std::f64::consts::PI).ln()).abs() < 1e-12);
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct Gaussian {
    mean: Array1<f64>,
    cov: Array2<f64>,
    chol: na::DMatrix<f64>,
    log_norm: f64,
}

impl Gaussian {
    /// Fails if `cov` is not a `d × d` positive-definite matrix, `d = mean.len()`.
    pub fn new(mean: Array1<f64>, cov: Array2<f64>) -> Result<Self> {
        let chol = lower_cholesky(&mean, &cov)?;
        let d = mean.len() as f64;
        let log_norm = -0.5 * d * (2.0 * PI).ln() - half_log_det(&chol);
        Ok(Self {
            mean,
            cov,
            chol,
            log_norm,
        })
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn cov(&self) -> &Array2<f64> {
        &self.cov
    }
}

impl Proposal for Gaussian {
    type Err = PmcError;

    fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Fails with [`PmcError::DimensionMismatch`] if `x` does not have length `dim()`.
    fn evaluate(&self, x: ArrayView1<f64>) -> Result<f64> {
        Ok(self.log_norm - 0.5 * mahalanobis_sq(&self.chol, &self.mean, x)?)
    }

    fn propose<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Array2<f64>> {
        Ok(correlated_normals(&self.chol, n, rng) + &self.mean)
    }
}

impl Target for Gaussian {
    type Err = PmcError;

    fn log_density(&self, x: ArrayView1<f64>) -> Result<f64> {
        self.evaluate(x)
    }
}

/**
A multivariate Student's t distribution with location `mean`, scale matrix
`sigma` and `dof` degrees of freedom. Its heavier tails make it a safer
proposal than a Gaussian when the target's extent is uncertain.
*/
#[derive(Debug, Clone)]
pub struct StudentT {
    mean: Array1<f64>,
    sigma: Array2<f64>,
    dof: f64,
    chol: na::DMatrix<f64>,
    log_norm: f64,
    chi_sq: ChiSquared<f64>,
}

impl StudentT {
    pub fn new(mean: Array1<f64>, sigma: Array2<f64>, dof: f64) -> Result<Self> {
        if dof <= 0.0 || !dof.is_finite() {
            return Err(PmcError::InvalidParameter(format!(
                "degrees of freedom must be positive and finite, got {dof}"
            )));
        }
        let chol = lower_cholesky(&mean, &sigma)?;
        let chi_sq = ChiSquared::new(dof)
            .map_err(|e| PmcError::InvalidParameter(format!("degrees of freedom: {e}")))?;
        let d = mean.len() as f64;
        let log_norm = ln_gamma(0.5 * (dof + d)) - ln_gamma(0.5 * dof)
            - 0.5 * d * (dof * PI).ln()
            - half_log_det(&chol);
        Ok(Self {
            mean,
            sigma,
            dof,
            chol,
            log_norm,
            chi_sq,
        })
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn sigma(&self) -> &Array2<f64> {
        &self.sigma
    }

    pub fn dof(&self) -> f64 {
        self.dof
    }
}

impl Proposal for StudentT {
    type Err = PmcError;

    fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Fails with [`PmcError::DimensionMismatch`] if `x` does not have length `dim()`.
    fn evaluate(&self, x: ArrayView1<f64>) -> Result<f64> {
        let d = self.mean.len() as f64;
        let m = mahalanobis_sq(&self.chol, &self.mean, x)?;
        Ok(self.log_norm - 0.5 * (self.dof + d) * (m / self.dof).ln_1p())
    }

    fn propose<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Array2<f64>> {
        let mut out = correlated_normals(&self.chol, n, rng);
        for mut row in out.outer_iter_mut() {
            let u = self.chi_sq.sample(rng);
            let scale = (self.dof / u).sqrt();
            row.mapv_inplace(|v| v * scale);
            row += &self.mean;
        }
        Ok(out)
    }
}

impl Target for StudentT {
    type Err = PmcError;

    fn log_density(&self, x: ArrayView1<f64>) -> Result<f64> {
        self.evaluate(x)
    }
}

/**
A categorical distribution over component indices.

The probabilities in `probs` are normalized on construction.

# Examples

```rust
use mini_pmc::distributions::Categorical;
use rand::{rngs::SmallRng, SeedableRng};

let cat = Categorical::new(vec![0.2, 0.3, 0.5]).unwrap();
let mut rng = SmallRng::seed_from_u64(1);
let k = cat.sample(&mut rng);
assert!(k < 3);
assert!((cat.log_prob(2) - 0.5f64.ln()).abs() < 1e-12);
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct Categorical {
    pub probs: Vec<f64>,
}

impl Categorical {
    pub fn new(probs: Vec<f64>) -> Result<Self> {
        if probs.is_empty() {
            return Err(PmcError::EmptyInput);
        }
        if probs.iter().any(|&p| p < 0.0 || !p.is_finite()) {
            return Err(PmcError::InvalidParameter(
                "probabilities must be finite and non-negative".to_string(),
            ));
        }
        let sum: f64 = probs.iter().sum();
        if sum <= 0.0 {
            return Err(PmcError::InvalidParameter(
                "probabilities must not all be zero".to_string(),
            ));
        }
        Ok(Self {
            probs: probs.into_iter().map(|p| p / sum).collect(),
        })
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let r: f64 = rng.gen();
        let mut cum = 0.0;
        for (i, &p) in self.probs.iter().enumerate() {
            cum += p;
            if r < cum {
                return i;
            }
        }
        // rounding left `cum` slightly below one; fall back to the last non-empty category
        self.probs
            .iter()
            .rposition(|&p| p > 0.0)
            .unwrap_or(self.probs.len() - 1)
    }

    pub fn log_prob(&self, index: usize) -> f64 {
        match self.probs.get(index) {
            Some(p) => p.ln(),
            None => f64::NEG_INFINITY,
        }
    }
}

/// `log(sum(exp(values)))` without overflow.
pub(crate) fn logsumexp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if max == f64::INFINITY {
        return f64::INFINITY;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/**
A mixture `q(x) = Σ_k w_k q_k(x)` of components of the same type.

# Examples

```rust
use mini_pmc::distributions::{Gaussian, Mixture, Proposal};
use ndarray::{arr1, arr2};

let unit = arr2(&[[1.0]]);
let mixture = Mixture::new(
    vec![
        Gaussian::new(arr1(&[-1.0]), unit.clone()).unwrap(),
        Gaussian::new(arr1(&[1.0]), unit).unwrap(),
    ],
    vec![1.0, 1.0],
)
.unwrap();
assert_eq!(mixture.weights(), &[0.5, 0.5]);
assert_eq!(mixture.dim(), 1);
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct Mixture<C> {
    components: Vec<C>,
    selector: Categorical,
}

impl<C: Proposal> Mixture<C> {
    /// Builds a mixture; `weights` are normalized and must match `components` in length.
    pub fn new(components: Vec<C>, weights: Vec<f64>) -> Result<Self> {
        if components.len() != weights.len() {
            return Err(PmcError::DimensionMismatch {
                expected: components.len(),
                found: weights.len(),
            });
        }
        let dim = components.first().ok_or(PmcError::EmptyInput)?.dim();
        if let Some(other) = components.iter().find(|c| c.dim() != dim) {
            return Err(PmcError::DimensionMismatch {
                expected: dim,
                found: other.dim(),
            });
        }
        let selector = Categorical::new(weights)?;
        Ok(Self {
            components,
            selector,
        })
    }

    pub fn components(&self) -> &[C] {
        &self.components
    }

    pub fn weights(&self) -> &[f64] {
        &self.selector.probs
    }
}

impl<C: Proposal> Proposal for Mixture<C> {
    type Err = C::Err;

    fn dim(&self) -> usize {
        self.components[0].dim()
    }

    fn evaluate(&self, x: ArrayView1<f64>) -> std::result::Result<f64, C::Err> {
        let terms = self
            .components
            .iter()
            .zip(self.weights())
            .map(|(c, &w)| c.evaluate(x).map(|lp| w.ln() + lp))
            .collect::<std::result::Result<Vec<f64>, C::Err>>()?;
        Ok(logsumexp(&terms))
    }

    fn propose<R: Rng + ?Sized>(
        &self,
        n: usize,
        rng: &mut R,
    ) -> std::result::Result<Array2<f64>, C::Err> {
        Ok(self.propose_traced(n, rng)?.0)
    }

    fn propose_traced<R: Rng + ?Sized>(
        &self,
        n: usize,
        rng: &mut R,
    ) -> std::result::Result<(Array2<f64>, Array1<usize>), C::Err> {
        let origin: Array1<usize> = (0..n).map(|_| self.selector.sample(rng)).collect();
        let mut points = Array2::zeros((n, self.dim()));
        for (k, component) in self.components.iter().enumerate() {
            let rows: Vec<usize> = origin
                .iter()
                .enumerate()
                .filter_map(|(i, &o)| (o == k).then_some(i))
                .collect();
            if rows.is_empty() {
                continue;
            }
            let drawn = component.propose(rows.len(), rng)?;
            for (&row, point) in rows.iter().zip(drawn.outer_iter()) {
                points.row_mut(row).assign(&point);
            }
        }
        Ok((points, origin))
    }
}

impl<C: Proposal> Target for Mixture<C> {
    type Err = C::Err;

    fn log_density(&self, x: ArrayView1<f64>) -> std::result::Result<f64, C::Err> {
        self.evaluate(x)
    }
}
