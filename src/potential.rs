//! The support-masked, unnormalized posterior log-density.
//!
//! The estimator is not trusted to respect the prior's support, so every
//! evaluation is masked to `-inf` wherever the prior's log-density is not
//! finite. For posterior estimators the masked estimator output is the density;
//! likelihood and ratio estimators are combined with the prior first.

use ndarray::{Array1, ArrayView1, ArrayView2, Axis, Zip};

use crate::distributions::{DensityEstimator, LogDensity, Prior};
use crate::family::MethodFamily;

/// `log q(theta | x)` (or `log q(x | theta) + log p(theta)` for likelihood and
/// ratio families), set to `-inf` outside the prior's support.
pub fn masked_log_prob<E, P>(
    family: MethodFamily,
    estimator: &E,
    prior: &P,
    theta: ArrayView2<f64>,
    x: ArrayView2<f64>,
) -> Array1<f64>
where
    E: DensityEstimator + ?Sized,
    P: Prior + ?Sized,
{
    let prior_lp = prior.log_prob(theta);
    let net_lp = estimator.log_prob(theta, x);
    let add_prior = !family.estimates_posterior();
    Zip::from(&net_lp)
        .and(&prior_lp)
        .map_collect(|&net, &prior| {
            if !prior.is_finite() {
                f64::NEG_INFINITY
            } else if add_prior {
                net + prior
            } else {
                net
            }
        })
}

/// The MCMC target at a fixed observation. Unnormalized: chains only need a
/// density proportional to the posterior, so no leakage correction applies.
pub struct PosteriorPotential<'a, E: ?Sized, P: ?Sized> {
    family: MethodFamily,
    estimator: &'a E,
    prior: &'a P,
    x: ArrayView2<'a, f64>,
}

impl<'a, E, P> PosteriorPotential<'a, E, P>
where
    E: DensityEstimator + ?Sized,
    P: Prior + ?Sized,
{
    /// `x` must hold a single observation.
    pub fn new(family: MethodFamily, estimator: &'a E, prior: &'a P, x: ArrayView2<'a, f64>) -> Self {
        Self {
            family,
            estimator,
            prior,
            x,
        }
    }

    /// Potential of each row of `theta`.
    pub fn evaluate(&self, theta: ArrayView2<f64>) -> Array1<f64> {
        masked_log_prob(self.family, self.estimator, self.prior, theta, self.x)
    }
}

impl<E, P> LogDensity for PosteriorPotential<'_, E, P>
where
    E: DensityEstimator + ?Sized,
    P: Prior + ?Sized,
{
    fn log_density(&self, theta: ArrayView1<f64>) -> f64 {
        let lp = self.evaluate(theta.insert_axis(Axis(0)))[0];
        if lp.is_nan() {
            f64::NEG_INFINITY
        } else {
            lp
        }
    }
}
