//! Rejection sampling from the estimator against the prior's support.
//!
//! Candidates are drawn from the estimator at a single observation and kept
//! iff the prior assigns them a finite log-density. The same primitive yields
//! the acceptance fraction used as the leakage correction factor.

use log::warn;
use ndarray::{Array2, ArrayView1, Axis};
use rand::rngs::SmallRng;

use crate::core::progress_bar;
use crate::distributions::{DensityEstimator, Prior};
use crate::error::{PosteriorError, Result};

/// Batching and attempt budget of rejection sampling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RejectionConfig {
    /// Largest number of candidates drawn from the estimator at once.
    pub batch_size: usize,
    /// Candidate budget per requested sample; sampling fails once
    /// `num_samples * max_draws_per_sample` candidates have been drawn.
    pub max_draws_per_sample: usize,
    /// Acceptance rate below which a warning is logged.
    pub warn_acceptance: f64,
    /// Smallest acceptance rate assumed when sizing the next batch, so that a
    /// run that has accepted nothing yet still draws full batches.
    pub min_batch_rate: f64,
}

impl Default for RejectionConfig {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            max_draws_per_sample: 10_000,
            warn_acceptance: 1e-3,
            min_batch_rate: 1e-3,
        }
    }
}

/// Accepted draws plus the acceptance statistics of the run.
#[derive(Debug, Clone)]
pub struct RejectionOutcome {
    /// Exactly the requested number of draws, one per row.
    pub samples: Array2<f64>,
    /// Accepted over drawn candidates.
    pub acceptance_rate: f64,
    /// Total candidates drawn.
    pub attempts: usize,
}

/// Number of rows of `candidates` inside the prior's support, and their mask.
fn within_support<P: Prior + ?Sized>(prior: &P, candidates: &Array2<f64>) -> (usize, Vec<bool>) {
    let mask: Vec<bool> = prior
        .log_prob(candidates.view())
        .iter()
        .map(|lp| lp.is_finite())
        .collect();
    (mask.iter().filter(|m| **m).count(), mask)
}

/// Fraction of `num_candidates` estimator draws at `x` that land inside the
/// prior's support. A Monte Carlo estimate with standard error
/// `sqrt(p (1 - p) / num_candidates)`.
pub fn acceptance_rate<E, P>(
    estimator: &E,
    prior: &P,
    x: ArrayView1<f64>,
    num_candidates: usize,
    batch_size: usize,
    show_progress: bool,
    rng: &mut SmallRng,
) -> f64
where
    E: DensityEstimator + ?Sized,
    P: Prior + ?Sized,
{
    if num_candidates == 0 {
        return 0.0;
    }
    let pb = progress_bar(num_candidates as u64, "Leakage", show_progress);
    let batch_size = batch_size.max(1);
    let mut drawn = 0;
    let mut accepted = 0;
    while drawn < num_candidates {
        let n = batch_size.min(num_candidates - drawn);
        let candidates = estimator.sample(n, x, rng);
        accepted += within_support(prior, &candidates).0;
        drawn += n;
        pb.set_position(drawn as u64);
    }
    pb.finish_and_clear();
    accepted as f64 / drawn as f64
}

/// Draws exactly `num_samples` estimator samples at `x` that lie inside the
/// prior's support.
///
/// Fails with [`PosteriorError::SamplingExhausted`] once the candidate budget
/// of `config` is used up; partial results are never returned.
pub fn sample_within_prior<E, P>(
    estimator: &E,
    prior: &P,
    x: ArrayView1<f64>,
    num_samples: usize,
    config: &RejectionConfig,
    show_progress: bool,
    rng: &mut SmallRng,
) -> Result<RejectionOutcome>
where
    E: DensityEstimator + ?Sized,
    P: Prior + ?Sized,
{
    let dim = estimator.dim();
    if num_samples == 0 {
        return Ok(RejectionOutcome {
            samples: Array2::zeros((0, dim)),
            acceptance_rate: 1.0,
            attempts: 0,
        });
    }

    let budget = num_samples
        .saturating_mul(config.max_draws_per_sample.max(1))
        .max(config.batch_size);
    let pb = progress_bar(num_samples as u64, "Rejection", show_progress);

    let mut flat: Vec<f64> = Vec::with_capacity(num_samples * dim);
    let mut kept = 0;
    let mut accepted_total = 0;
    let mut attempts = 0;
    let mut rate: f64 = 1.0;
    let mut warned = false;

    while kept < num_samples {
        if attempts >= budget {
            pb.abandon_with_message("exhausted");
            return Err(PosteriorError::SamplingExhausted {
                accepted: kept,
                requested: num_samples,
                attempts,
            });
        }

        // Size the batch from the running acceptance rate so that a single
        // batch is likely to finish the job.
        let remaining = num_samples - kept;
        let wanted = (remaining as f64 / rate.max(config.min_batch_rate)).ceil() as usize;
        let n = wanted
            .clamp(1, config.batch_size.max(1))
            .min(budget - attempts);

        let candidates = estimator.sample(n, x, rng);
        let (n_accepted, mask) = within_support(prior, &candidates);
        attempts += n;
        accepted_total += n_accepted;

        for (row, _) in candidates
            .axis_iter(Axis(0))
            .zip(mask)
            .filter(|(_, inside)| *inside)
            .take(num_samples - kept)
        {
            flat.extend(row.iter());
            kept += 1;
        }

        rate = accepted_total as f64 / attempts as f64;
        pb.set_position(kept as u64);
        pb.set_message(format!("AcceptRate={:.3}", rate));

        if !warned && rate < config.warn_acceptance {
            warn!(
                "only {:.4}% of posterior samples fall inside the prior support; \
                 rejection sampling may take very long, consider MCMC sampling",
                rate * 100.0
            );
            warned = true;
        }
    }
    pb.finish_with_message("Done!");

    Ok(RejectionOutcome {
        samples: Array2::from_shape_vec((num_samples, dim), flat)?,
        acceptance_rate: rate,
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{BoxUniform, ConditionalGaussian};
    use ndarray::arr1;
    use rand::SeedableRng;

    /// Standard deviation putting 80% of a centred Gaussian's mass in [0, 1].
    const STD_80: f64 = 0.5 / 1.281_551_565_544_601;

    #[test]
    fn test_acceptance_rate_matches_leakage() {
        let prior = BoxUniform::new(arr1(&[0.0]), arr1(&[1.0])).unwrap();
        let estimator = ConditionalGaussian::new(1, STD_80);
        let mut rng = SmallRng::seed_from_u64(42);
        let rate = acceptance_rate(
            &estimator,
            &prior,
            arr1(&[0.5]).view(),
            10_000,
            1_000,
            false,
            &mut rng,
        );
        assert!((rate - 0.8).abs() < 0.05, "rate = {rate}");
    }

    #[test]
    fn test_sample_within_prior_returns_exact_count() {
        let prior = BoxUniform::new(arr1(&[0.0, 0.0]), arr1(&[1.0, 1.0])).unwrap();
        let estimator = ConditionalGaussian::new(2, 0.5);
        let mut rng = SmallRng::seed_from_u64(3);
        let out = sample_within_prior(
            &estimator,
            &prior,
            arr1(&[0.5, 0.5]).view(),
            777,
            &RejectionConfig::default(),
            false,
            &mut rng,
        )
        .unwrap();
        assert_eq!(out.samples.shape(), &[777, 2]);
        assert!(prior
            .log_prob(out.samples.view())
            .iter()
            .all(|lp| lp.is_finite()));
        assert!(out.attempts >= 777);
        assert!(out.acceptance_rate > 0.0 && out.acceptance_rate < 1.0);
    }

    #[test]
    fn test_sample_within_prior_zero_samples() {
        let prior = BoxUniform::new(arr1(&[0.0]), arr1(&[1.0])).unwrap();
        let estimator = ConditionalGaussian::new(1, 0.1);
        let mut rng = SmallRng::seed_from_u64(0);
        let out = sample_within_prior(
            &estimator,
            &prior,
            arr1(&[0.5]).view(),
            0,
            &RejectionConfig::default(),
            false,
            &mut rng,
        )
        .unwrap();
        assert_eq!(out.samples.shape(), &[0, 1]);
        assert_eq!(out.attempts, 0);
    }

    #[test]
    fn test_sample_within_prior_exhausts_budget() {
        // All estimator mass sits far outside the support.
        let prior = BoxUniform::new(arr1(&[0.0]), arr1(&[1.0])).unwrap();
        let estimator = ConditionalGaussian::new(1, 0.01).with_shift(arr1(&[100.0]));
        let config = RejectionConfig {
            batch_size: 100,
            max_draws_per_sample: 50,
            ..RejectionConfig::default()
        };
        let mut rng = SmallRng::seed_from_u64(0);
        let err = sample_within_prior(
            &estimator,
            &prior,
            arr1(&[0.5]).view(),
            10,
            &config,
            false,
            &mut rng,
        )
        .unwrap_err();
        match err {
            PosteriorError::SamplingExhausted {
                accepted,
                requested,
                attempts,
            } => {
                assert_eq!(accepted, 0);
                assert_eq!(requested, 10);
                assert_eq!(attempts, 500);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    /// Records the size of every batch drawn from the wrapped estimator.
    struct BatchLog {
        inner: ConditionalGaussian,
        sizes: std::sync::Mutex<Vec<usize>>,
    }

    impl DensityEstimator for BatchLog {
        fn dim(&self) -> usize {
            self.inner.dim()
        }

        fn log_prob(
            &self,
            theta: ndarray::ArrayView2<f64>,
            x: ndarray::ArrayView2<f64>,
        ) -> ndarray::Array1<f64> {
            self.inner.log_prob(theta, x)
        }

        fn sample(&self, n: usize, x: ArrayView1<f64>, rng: &mut SmallRng) -> Array2<f64> {
            self.sizes.lock().unwrap().push(n);
            self.inner.sample(n, x, rng)
        }
    }

    #[test]
    fn test_batch_sizing_floor_is_separate_from_warning() {
        let prior = BoxUniform::new(arr1(&[0.0]), arr1(&[1.0])).unwrap();
        let run = |min_batch_rate: f64| {
            let estimator = BatchLog {
                inner: ConditionalGaussian::new(1, 0.01).with_shift(arr1(&[100.0])),
                sizes: std::sync::Mutex::new(Vec::new()),
            };
            let config = RejectionConfig {
                batch_size: 100,
                max_draws_per_sample: 20,
                warn_acceptance: 0.5,
                min_batch_rate,
            };
            let mut rng = SmallRng::seed_from_u64(0);
            let result = sample_within_prior(
                &estimator,
                &prior,
                arr1(&[0.5]).view(),
                5,
                &config,
                false,
                &mut rng,
            );
            assert!(result.is_err());
            estimator.sizes.into_inner().unwrap()
        };

        // Nothing accepted: the floor alone decides how large batches grow.
        let cautious = run(1.0);
        assert!(cautious.iter().all(|&n| n == 5), "sizes = {cautious:?}");
        assert_eq!(cautious.iter().sum::<usize>(), 100);

        let eager = run(1e-3);
        assert_eq!(eager, vec![5, 95]);
    }
}
