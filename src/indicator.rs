/*!
Support indicators and the indicator-merged target.

An [`Indicator`] is a predicate on points. Merging it with a target via
[`Restricted`] yields a single [`Target`] that returns `-inf` outside the
support *without* evaluating the (possibly expensive) inner target, so those
points get zero importance weight.

# Examples

```rust
use mini_pmc::distributions::{FnTarget, Target};
use mini_pmc::indicator::{Hyperrectangle, Restricted};
use ndarray::{arr1, ArrayView1};

let target = FnTarget(|x: ArrayView1<f64>| -x.dot(&x));
let box_support = Hyperrectangle::new(arr1(&[0.0, 0.0]), arr1(&[1.0, 1.0])).unwrap();
let restricted = Restricted::new(target, box_support);

assert_eq!(restricted.log_density(arr1(&[0.5, 0.5]).view()).unwrap(), -0.5);
assert_eq!(
    restricted.log_density(arr1(&[2.0, 0.5]).view()).unwrap(),
    f64::NEG_INFINITY
);
```
*/

use ndarray::{Array1, ArrayView1};

use crate::distributions::Target;
use crate::error::{PmcError, Result};

/// A support predicate.
pub trait Indicator {
    fn contains(&self, x: ArrayView1<f64>) -> bool;
}

impl<F> Indicator for F
where
    F: Fn(ArrayView1<f64>) -> bool,
{
    fn contains(&self, x: ArrayView1<f64>) -> bool {
        self(x)
    }
}

/// The ball of radius `radius` around `center`. With `strict`, the boundary is excluded.
#[derive(Debug, Clone, PartialEq)]
pub struct Ball {
    pub center: Array1<f64>,
    pub radius: f64,
    pub strict: bool,
}

impl Ball {
    pub fn new(center: Array1<f64>, radius: f64) -> Self {
        Self {
            center,
            radius,
            strict: false,
        }
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

impl Indicator for Ball {
    fn contains(&self, x: ArrayView1<f64>) -> bool {
        if x.len() != self.center.len() {
            return false;
        }
        let diff = &x - &self.center;
        let dist_sq = diff.dot(&diff);
        let radius_sq = self.radius * self.radius;
        if self.strict {
            dist_sq < radius_sq
        } else {
            dist_sq <= radius_sq
        }
    }
}

/// The axis-aligned box `lower <= x <= upper` (boundary included). Points of
/// another dimension are outside.
#[derive(Debug, Clone, PartialEq)]
pub struct Hyperrectangle {
    lower: Array1<f64>,
    upper: Array1<f64>,
}

impl Hyperrectangle {
    pub fn new(lower: Array1<f64>, upper: Array1<f64>) -> Result<Self> {
        if lower.len() != upper.len() {
            return Err(PmcError::DimensionMismatch {
                expected: lower.len(),
                found: upper.len(),
            });
        }
        if lower.iter().zip(upper.iter()).any(|(l, u)| l > u) {
            return Err(PmcError::InvalidParameter(
                "lower corner exceeds upper corner".to_string(),
            ));
        }
        Ok(Self { lower, upper })
    }
}

impl Indicator for Hyperrectangle {
    fn contains(&self, x: ArrayView1<f64>) -> bool {
        x.len() == self.lower.len()
            && x
                .iter()
                .zip(&self.lower)
                .zip(&self.upper)
                .all(|((v, l), u)| l <= v && v <= u)
    }
}

/// A target merged with its support indicator.
#[derive(Debug, Clone)]
pub struct Restricted<T, I> {
    pub target: T,
    pub indicator: I,
}

impl<T: Target, I: Indicator> Restricted<T, I> {
    pub fn new(target: T, indicator: I) -> Self {
        Self { target, indicator }
    }
}

impl<T: Target, I: Indicator> Target for Restricted<T, I> {
    type Err = T::Err;

    fn log_density(&self, x: ArrayView1<f64>) -> std::result::Result<f64, T::Err> {
        if self.indicator.contains(x) {
            self.target.log_density(x)
        } else {
            Ok(f64::NEG_INFINITY)
        }
    }
}
