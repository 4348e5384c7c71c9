/*!
Estimators and weight diagnostics for weighted samples.

All functions take a weighted-sample matrix as stored in a
[`History`](crate::history::History): one sample per row, the weight in
column 0 and the point in the remaining columns.

```rust
use mini_pmc::stats;
use ndarray::arr2;

let samples = arr2(&[[1.0, 0.0, 2.0], [3.0, 4.0, 2.0]]);
let mean = stats::mean(samples.view()).unwrap();
assert_eq!(mean.to_vec(), vec![3.0, 2.0]);
assert_eq!(stats::effective_sample_size(samples.view()).unwrap(), 0.8);
```
*/

use ndarray::{s, Array, Array1, Array2, ArrayView1, ArrayView2, Axis, Dimension, Zip};
use ndarray_stats::errors::MultiInputError;
use ndarray_stats::SummaryStatisticsExt;

use crate::error::{PmcError, Result};

/// Splits a weighted-sample matrix into weights and points.
fn split(samples: ArrayView2<f64>) -> Result<(ArrayView1<f64>, ArrayView2<f64>)> {
    if samples.ncols() < 2 {
        return Err(PmcError::DimensionMismatch {
            expected: 2,
            found: samples.ncols(),
        });
    }
    if samples.nrows() == 0 {
        return Err(PmcError::EmptyInput);
    }
    Ok((
        samples.index_axis_move(Axis(1), 0),
        samples.slice_move(s![.., 1..]),
    ))
}

fn checked_sum(weights: ArrayView1<f64>) -> Result<f64> {
    let sum = weights.sum();
    if sum == 0.0 {
        return Err(PmcError::ZeroWeight);
    }
    Ok(sum)
}

impl From<MultiInputError> for PmcError {
    fn from(err: MultiInputError) -> Self {
        match err {
            MultiInputError::EmptyInput => PmcError::EmptyInput,
            MultiInputError::ShapeMismatch(mismatch) => PmcError::DimensionMismatch {
                expected: mismatch.first_shape.iter().product(),
                found: mismatch.second_shape.iter().product(),
            },
        }
    }
}

/**
The weighted average `Σ w_n f(x_n) / Σ w_n` of an array-valued function.

Every value of `f` must have the same shape.

```rust
use mini_pmc::stats::expectation;
use ndarray::{arr1, arr2, ArrayView1};

let samples = arr2(&[[1.0, 1.0], [1.0, 3.0]]);
let second_moment = expectation(samples.view(), |x: ArrayView1<f64>| &x * &x).unwrap();
assert_eq!(second_moment, arr1(&[5.0]));
```
*/
pub fn expectation<F, D>(samples: ArrayView2<f64>, f: F) -> Result<Array<f64, D>>
where
    F: Fn(ArrayView1<f64>) -> Array<f64, D>,
    D: Dimension,
{
    let (weights, points) = split(samples)?;
    let sum = checked_sum(weights)?;

    let mut rows = weights.iter().zip(points.outer_iter());
    let (&w, x) = rows.next().ok_or(PmcError::EmptyInput)?;
    let mut acc = f(x) * w;
    for (&w, x) in rows {
        let value = f(x);
        if value.shape() != acc.shape() {
            return Err(PmcError::DimensionMismatch {
                expected: acc.len(),
                found: value.len(),
            });
        }
        acc.scaled_add(w, &value);
    }
    Ok(acc / sum)
}

/// The weighted mean of the points.
pub fn mean(samples: ArrayView2<f64>) -> Result<Array1<f64>> {
    let (weights, points) = split(samples)?;
    checked_sum(weights)?;
    Ok(points.weighted_mean_axis(Axis(0), &weights)?)
}

/**
The weighted sample covariance of the points.

The weighted outer products about the mean are scaled by
`(Σw)² / ((Σw)² - Σw²)`, which reduces to the usual `N / (N - 1)` for equal
weights. Fails with [`PmcError::DegenerateNormalization`] if a single sample
carries all the weight.
*/
pub fn covariance(samples: ArrayView2<f64>) -> Result<Array2<f64>> {
    let (weights, points) = split(samples)?;
    let sum = checked_sum(weights)?;
    let sum_sq = weights.dot(&weights);

    let denom = sum * sum - sum_sq;
    if denom == 0.0 {
        return Err(PmcError::DegenerateNormalization);
    }
    let normalization = sum * sum / denom;

    let mu = points.weighted_mean_axis(Axis(0), &weights)?;
    let centered = &points - &mu;
    let mut weighted = centered.clone();
    Zip::from(weighted.rows_mut())
        .and(&weights)
        .for_each(|mut row, &w| row *= w);

    Ok(centered.t().dot(&weighted) * (normalization / sum))
}

/**
Normalized effective sample size `(Σw)² / (N Σw²)`.

Equals 1 for equal weights and approaches `1/N` when a single sample dominates.
*/
pub fn effective_sample_size(samples: ArrayView2<f64>) -> Result<f64> {
    let (weights, _) = split(samples)?;
    let sum = checked_sum(weights)?;
    let sum_sq = weights.dot(&weights);
    Ok(sum * sum / (weights.len() as f64 * sum_sq))
}

/// Normalized perplexity `exp(H) / N`, `H` the Shannon entropy of the normalized weights.
pub fn perplexity(samples: ArrayView2<f64>) -> Result<f64> {
    let (weights, _) = split(samples)?;
    let sum = checked_sum(weights)?;
    let entropy: f64 = weights
        .iter()
        .map(|&w| w / sum)
        .filter(|&w| w > 0.0)
        .map(|w| -w * w.ln())
        .sum();
    Ok(entropy.exp() / weights.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};
    use proptest::prelude::*;

    #[test]
    fn test_mean_and_covariance_equal_weights() {
        let samples = arr2(&[[1.0, 0.0, 1.0], [1.0, 2.0, 1.0], [1.0, 1.0, 4.0]]);
        let mean = mean(samples.view()).unwrap();
        assert_abs_diff_eq!(mean, arr1(&[1.0, 2.0]), epsilon = 1e-12);

        // equal weights give the unbiased sample covariance
        let cov = covariance(samples.view()).unwrap();
        let expected = arr2(&[[1.0, 0.0], [0.0, 3.0]]);
        assert_abs_diff_eq!(cov, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_weights_act_as_multiplicities() {
        let weighted = arr2(&[[2.0, 1.0], [1.0, 4.0]]);
        let repeated = arr2(&[[1.0, 1.0], [1.0, 1.0], [1.0, 4.0]]);
        assert_abs_diff_eq!(
            mean(weighted.view()).unwrap(),
            mean(repeated.view()).unwrap(),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            expectation(weighted.view(), |x: ArrayView1<f64>| x.mapv(|v| v * v)).unwrap(),
            arr1(&[6.0]),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_expectation_of_matrix_valued_function() {
        let samples = arr2(&[[1.0, 1.0, 0.0], [3.0, 0.0, 1.0]]);
        let outer = expectation(samples.view(), |x: ArrayView1<f64>| {
            let col = x.insert_axis(Axis(1));
            col.dot(&col.t())
        })
        .unwrap();
        assert_abs_diff_eq!(outer, arr2(&[[0.25, 0.0], [0.0, 0.75]]), epsilon = 1e-12);
    }

    #[test]
    fn test_expectation_shape_must_not_change() {
        let samples = arr2(&[[1.0, 1.0], [1.0, 2.0]]);
        let result = expectation(samples.view(), |x: ArrayView1<f64>| {
            Array1::zeros(x[0] as usize)
        });
        assert!(matches!(
            result,
            Err(PmcError::DimensionMismatch {
                expected: 1,
                found: 2
            })
        ));
    }

    #[test]
    fn test_zero_weights_are_reported() {
        let samples = arr2(&[[0.0, 1.0], [0.0, 2.0]]);
        assert!(matches!(mean(samples.view()), Err(PmcError::ZeroWeight)));
        assert!(matches!(covariance(samples.view()), Err(PmcError::ZeroWeight)));
        assert!(matches!(
            effective_sample_size(samples.view()),
            Err(PmcError::ZeroWeight)
        ));
        assert!(matches!(perplexity(samples.view()), Err(PmcError::ZeroWeight)));
    }

    #[test]
    fn test_single_dominant_sample_is_degenerate() {
        let samples = arr2(&[[0.0, 1.0], [2.5, 2.0], [0.0, 3.0]]);
        let err = covariance(samples.view()).unwrap_err();
        assert!(matches!(err, PmcError::DegenerateNormalization));
        assert!(err.is_degenerate());

        assert_abs_diff_eq!(effective_sample_size(samples.view()).unwrap(), 1.0 / 3.0);
        assert_abs_diff_eq!(perplexity(samples.view()).unwrap(), 1.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_bad_input_shapes() {
        let empty = Array2::<f64>::zeros((0, 3));
        assert!(matches!(mean(empty.view()), Err(PmcError::EmptyInput)));
        let weights_only = arr2(&[[1.0], [2.0]]);
        assert!(matches!(
            mean(weights_only.view()),
            Err(PmcError::DimensionMismatch { .. })
        ));
    }

    proptest! {
        #[test]
        fn diagnostics_lie_in_unit_interval(weights in prop::collection::vec(1e-3f64..1e3, 1..50)) {
            let mut samples = Array2::<f64>::zeros((weights.len(), 2));
            samples.column_mut(0).assign(&Array1::from(weights));
            let ess = effective_sample_size(samples.view()).unwrap();
            let perp = perplexity(samples.view()).unwrap();
            let lower = 1.0 / samples.nrows() as f64 - 1e-12;
            prop_assert!(ess >= lower && ess <= 1.0 + 1e-12);
            prop_assert!(perp >= lower && perp <= 1.0 + 1e-12);
        }
    }
}
