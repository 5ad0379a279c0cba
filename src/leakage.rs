/*!
Leakage correction: the fraction of the estimator's mass inside the prior's
support, estimated by rejection sampling and cached for the default context.

A density estimator trained with a bounded prior can place mass outside the
prior's support. Masking that mass away leaves a density that integrates to
the acceptance probability `Z(x) = P_q(theta in supp(prior) | x)`, so the
normalized posterior log-density is `log q(theta | x) - log Z(x)`.

The estimate is expensive, so the value computed at the default context is
stored as an explicit [`CorrectionCache`] entry. Any other context is estimated
afresh on every call and never stored.
*/

use log::debug;
use rand::rngs::SmallRng;

use crate::context::{Context, ContextStore};
use crate::distributions::{DensityEstimator, Prior};
use crate::error::{PosteriorError, Result};
use crate::rejection::acceptance_rate;

/// A correction factor and the exact default context it was estimated at.
#[derive(Debug, Clone)]
pub struct CorrectionCache {
    pub context: Context,
    pub factor: f64,
    pub num_rejection_samples: usize,
    /// [`ContextStore::generation`] at estimation time.
    pub generation: u64,
}

/// Estimates and caches the leakage correction factor.
#[derive(Debug, Clone)]
pub struct LeakageEstimator {
    cache: Option<CorrectionCache>,
    batch_size: usize,
    estimations: usize,
}

impl Default for LeakageEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl LeakageEstimator {
    pub fn new() -> Self {
        Self {
            cache: None,
            batch_size: 10_000,
            estimations: 0,
        }
    }

    /// Sets the number of candidates drawn from the estimator at once.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn cached(&self) -> Option<&CorrectionCache> {
        self.cache.as_ref()
    }

    /// Number of Monte Carlo estimations performed so far.
    pub fn estimations(&self) -> usize {
        self.estimations
    }

    /// Drops the cached factor; the next call at the default context
    /// re-estimates it. Call this when the estimator has been retrained.
    pub fn reset(&mut self) {
        if self.cache.take().is_some() {
            debug!("leakage correction cache dropped");
        }
    }

    /// Returns the correction factor at `context`.
    ///
    /// * `context` is not the default: estimated now, never cached.
    /// * `context` is the default and nothing valid is cached, or
    ///   `force_update` is set: estimated at the default context and cached.
    /// * otherwise: the cached value.
    ///
    /// Fails if no candidate lands inside the support, since the factor would
    /// be zero and its logarithm undefined.
    #[allow(clippy::too_many_arguments)]
    pub fn correction<E, P>(
        &mut self,
        estimator: &E,
        prior: &P,
        store: &ContextStore,
        context: &Context,
        num_rejection_samples: usize,
        force_update: bool,
        show_progress: bool,
        rng: &mut SmallRng,
    ) -> Result<f64>
    where
        E: DensityEstimator + ?Sized,
        P: Prior + ?Sized,
    {
        if num_rejection_samples == 0 {
            return Err(PosteriorError::Configuration(
                "num_rejection_samples must be positive".to_string(),
            ));
        }

        let default = match store.default_context() {
            Some(x_o) if store.is_default(context) => x_o,
            _ => {
                debug!("estimating leakage correction at a non-default context (not cached)");
                return self.estimate(
                    estimator,
                    prior,
                    context,
                    num_rejection_samples,
                    show_progress,
                    rng,
                );
            }
        };

        if let Some(entry) = &self.cache {
            let valid = entry.generation == store.generation() && entry.context.ptr_eq(default);
            if valid && !force_update {
                return Ok(entry.factor);
            }
        }

        let factor = self.estimate(
            estimator,
            prior,
            default,
            num_rejection_samples,
            show_progress,
            rng,
        )?;
        debug!("leakage correction at default context estimated as {factor:.4}");
        self.cache = Some(CorrectionCache {
            context: default.clone(),
            factor,
            num_rejection_samples,
            generation: store.generation(),
        });
        Ok(factor)
    }

    fn estimate<E, P>(
        &mut self,
        estimator: &E,
        prior: &P,
        context: &Context,
        num_rejection_samples: usize,
        show_progress: bool,
        rng: &mut SmallRng,
    ) -> Result<f64>
    where
        E: DensityEstimator + ?Sized,
        P: Prior + ?Sized,
    {
        if context.batch_size() == 0 {
            return Err(PosteriorError::Validation(
                "cannot estimate the leakage correction at an empty context batch".to_string(),
            ));
        }
        self.estimations += 1;
        let factor = acceptance_rate(
            estimator,
            prior,
            context.row(0),
            num_rejection_samples,
            self.batch_size,
            show_progress,
            rng,
        );
        if factor > 0.0 {
            Ok(factor)
        } else {
            Err(PosteriorError::SamplingExhausted {
                accepted: 0,
                requested: 1,
                attempts: num_rejection_samples,
            })
        }
    }
}
