/*!
Contracts of the posterior's collaborators, plus a bounded prior and a
conditional Gaussian estimator implementing them.

* [`Prior`]: log-density (finite iff inside the support) and sampling.
* [`DensityEstimator`]: conditional log-density `log q(theta | x)` and sampling.
  For likelihood-based families the same contract carries `log q(x | theta)`
  or a log likelihood ratio evaluated at `(theta, x)`.
* [`LogDensity`]: an unnormalized target evaluated one point at a time, which
  is what MCMC chains consume.

Batches are `ndarray` arrays with one row per parameter vector.

# Examples

```rust
use leaky_posterior::distributions::{BoxUniform, ConditionalGaussian, DensityEstimator, Prior};
use ndarray::{arr1, arr2};
use rand::rngs::SmallRng;
use rand::SeedableRng;

let prior = BoxUniform::new(arr1(&[0.0, 0.0]), arr1(&[1.0, 1.0])).unwrap();
let lp = prior.log_prob(arr2(&[[0.5, 0.5], [1.5, 0.5]]).view());
assert_eq!(lp[0], 0.0);
assert_eq!(lp[1], f64::NEG_INFINITY);

let estimator = ConditionalGaussian::new(2, 0.3);
let mut rng = SmallRng::seed_from_u64(42);
let draws = estimator.sample(100, arr1(&[0.5, 0.5]).view(), &mut rng);
assert_eq!(draws.shape(), &[100, 2]);
```
*/

use std::f64::consts::PI;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use rand::rngs::SmallRng;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{PosteriorError, Result};

/// A prior over parameters `theta` with a (possibly bounded) support.
pub trait Prior {
    /// Dimensionality of a single parameter vector.
    fn dim(&self) -> usize;

    /// Log-density of each row of `theta`; `-inf` outside the support.
    fn log_prob(&self, theta: ArrayView2<f64>) -> Array1<f64>;

    /// Draws `n` parameter vectors, one per row.
    fn sample(&self, n: usize, rng: &mut SmallRng) -> Array2<f64>;
}

/// A trained conditional estimator. Treated as a black box.
pub trait DensityEstimator {
    /// Dimensionality of a single parameter vector.
    fn dim(&self) -> usize;

    /// Log-density of each row of `theta` given `x`. `x` holds either one row,
    /// shared by every `theta`, or one row per `theta`.
    fn log_prob(&self, theta: ArrayView2<f64>, x: ArrayView2<f64>) -> Array1<f64>;

    /// Draws `n` parameter vectors conditioned on a single observation `x`.
    fn sample(&self, n: usize, x: ArrayView1<f64>, rng: &mut SmallRng) -> Array2<f64>;
}

/// An unnormalized log-density evaluated at a single point.
pub trait LogDensity {
    fn log_density(&self, theta: ArrayView1<f64>) -> f64;
}

impl<F> LogDensity for F
where
    F: Fn(ArrayView1<f64>) -> f64,
{
    fn log_density(&self, theta: ArrayView1<f64>) -> f64 {
        self(theta)
    }
}

/// Uniform prior on the axis-aligned box `[low, high)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxUniform {
    pub low: Array1<f64>,
    pub high: Array1<f64>,
    log_volume: f64,
}

impl BoxUniform {
    /// Creates the prior. Bounds must have equal length and satisfy `low < high`.
    pub fn new(low: Array1<f64>, high: Array1<f64>) -> Result<Self> {
        if low.len() != high.len() || low.is_empty() {
            return Err(PosteriorError::Configuration(format!(
                "prior bounds must be non-empty and of equal length, got {} and {}",
                low.len(),
                high.len()
            )));
        }
        if low.iter().zip(high.iter()).any(|(l, h)| !(l < h)) {
            return Err(PosteriorError::Configuration(
                "prior bounds must satisfy low < high in every dimension".to_string(),
            ));
        }
        let log_volume = (&high - &low).mapv(f64::ln).sum();
        Ok(Self {
            low,
            high,
            log_volume,
        })
    }

    fn contains(&self, theta: ArrayView1<f64>) -> bool {
        Zip::from(&theta)
            .and(&self.low)
            .and(&self.high)
            .all(|&t, &l, &h| t >= l && t < h)
    }
}

impl Prior for BoxUniform {
    fn dim(&self) -> usize {
        self.low.len()
    }

    fn log_prob(&self, theta: ArrayView2<f64>) -> Array1<f64> {
        theta
            .axis_iter(Axis(0))
            .map(|row| {
                if row.len() == self.dim() && self.contains(row) {
                    -self.log_volume
                } else {
                    f64::NEG_INFINITY
                }
            })
            .collect()
    }

    fn sample(&self, n: usize, rng: &mut SmallRng) -> Array2<f64> {
        let width = &self.high - &self.low;
        Array2::from_shape_fn((n, self.dim()), |(_, j)| {
            self.low[j] + width[j] * rng.gen::<f64>()
        })
    }
}

/**
An isotropic Gaussian centred on the (shifted) observation:
`q(theta | x) = N(theta; x + shift, std^2 I)`.

Observations and parameters share the same dimensionality. With a bounded
prior and a large enough `std` or `shift` the estimator leaks mass outside the
prior's support, which is the situation the leakage correction exists for.
Evaluated at `(theta, x)` with zero shift it is also a symmetric Gaussian
likelihood `p(x | theta)`.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalGaussian {
    pub shift: Array1<f64>,
    pub std: f64,
}

impl ConditionalGaussian {
    /// A zero-shift estimator in `dim` dimensions.
    pub fn new(dim: usize, std: f64) -> Self {
        Self {
            shift: Array1::zeros(dim),
            std,
        }
    }

    pub fn with_shift(mut self, shift: Array1<f64>) -> Self {
        self.shift = shift;
        self
    }

    fn log_normalizer(&self) -> f64 {
        -0.5 * self.dim() as f64 * (2.0 * PI * self.std * self.std).ln()
    }
}

impl DensityEstimator for ConditionalGaussian {
    fn dim(&self) -> usize {
        self.shift.len()
    }

    fn log_prob(&self, theta: ArrayView2<f64>, x: ArrayView2<f64>) -> Array1<f64> {
        let var = self.std * self.std;
        let log_z = self.log_normalizer();
        theta
            .axis_iter(Axis(0))
            .enumerate()
            .map(|(i, t)| {
                let x_i = if x.nrows() == 1 { x.row(0) } else { x.row(i) };
                let sq: f64 = Zip::from(&t)
                    .and(&x_i)
                    .and(&self.shift)
                    .fold(0.0, |acc, &t, &x, &s| {
                        let d = t - x - s;
                        acc + d * d
                    });
                log_z - 0.5 * sq / var
            })
            .collect()
    }

    fn sample(&self, n: usize, x: ArrayView1<f64>, rng: &mut SmallRng) -> Array2<f64> {
        Array2::from_shape_fn((n, self.dim()), |(_, j)| {
            let z: f64 = rng.sample(StandardNormal);
            x[j] + self.shift[j] + self.std * z
        })
    }
}
