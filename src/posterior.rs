/*!
The posterior object: a trained estimator and a bounded prior, plus everything
needed to evaluate and sample `p(theta | x)`.

[`Posterior`] owns the default context, the leakage correction cache, the
sampling mode and the MCMC defaults. Evaluation masks the estimator's density
to the prior's support and, on request, renormalizes it by the leaked mass.
Sampling is routed to rejection sampling or to a [`ChainRunner`].

# Examples

```rust
use leaky_posterior::context::Context;
use leaky_posterior::distributions::{BoxUniform, ConditionalGaussian};
use leaky_posterior::family::MethodFamily;
use leaky_posterior::posterior::{Posterior, SampleOptions};
use ndarray::{arr1, arr2};

let prior = BoxUniform::new(arr1(&[0.0]), arr1(&[1.0])).unwrap();
let estimator = ConditionalGaussian::new(1, 0.4);
let mut posterior = Posterior::new(MethodFamily::Snpe, estimator, prior, 1, false)
    .unwrap()
    .set_seed(42);
posterior.set_default_x(Context::from(arr1(&[0.5]))).unwrap();

let theta = arr2(&[[0.5], [1.5]]);
let lp = posterior.log_prob(theta.view(), None, true).unwrap();
assert!(lp[0].is_finite());
assert_eq!(lp[1], f64::NEG_INFINITY);

let draws = posterior
    .sample(&[3, 4], None, SampleOptions::default().show_progress_bars(false))
    .unwrap();
assert_eq!(draws.shape(), &[3, 4, 1]);
```
*/

use log::{debug, warn};
use ndarray::{Array1, Array2, ArrayD, ArrayView2, IxDyn};
use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, SeedableRng};

use crate::context::{Context, ContextStore};
use crate::core::{ChainRequest, ChainRunner};
use crate::distributions::{DensityEstimator, Prior};
use crate::error::{PosteriorError, Result};
use crate::family::{MethodFamily, SamplingMode, SamplingPolicy};
use crate::init::initial_positions;
use crate::leakage::LeakageEstimator;
use crate::mcmc::{merge, McmcMethod, McmcOverrides, McmcParameters};
use crate::potential::{masked_log_prob, PosteriorPotential};
use crate::rejection::{sample_within_prior, RejectionConfig};
use crate::slice::SliceRunner;

/// How the leakage correction is computed when a normalized density is
/// requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeakageParams {
    /// Estimator draws used to estimate the accepted fraction.
    pub num_rejection_samples: usize,
    /// Recompute even if a value is cached for the default context.
    pub force_update: bool,
    pub show_progress_bars: bool,
}

impl Default for LeakageParams {
    fn default() -> Self {
        Self {
            num_rejection_samples: 10_000,
            force_update: false,
            show_progress_bars: false,
        }
    }
}

/// Per-call overrides of [`Posterior::sample`]. Anything left `None` uses the
/// posterior's configured value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleOptions {
    pub sample_with_mcmc: Option<bool>,
    pub mcmc_method: Option<McmcMethod>,
    pub mcmc_parameters: Option<McmcOverrides>,
    pub show_progress_bars: bool,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            sample_with_mcmc: None,
            mcmc_method: None,
            mcmc_parameters: None,
            show_progress_bars: true,
        }
    }
}

impl SampleOptions {
    pub fn sample_with_mcmc(mut self, use_mcmc: bool) -> Self {
        self.sample_with_mcmc = Some(use_mcmc);
        self
    }

    pub fn mcmc_method(mut self, method: McmcMethod) -> Self {
        self.mcmc_method = Some(method);
        self
    }

    pub fn mcmc_parameters(mut self, overrides: McmcOverrides) -> Self {
        self.mcmc_parameters = Some(overrides);
        self
    }

    pub fn show_progress_bars(mut self, show: bool) -> Self {
        self.show_progress_bars = show;
        self
    }
}

/// A posterior over parameters built from a trained estimator and a prior.
pub struct Posterior<E, P> {
    estimator: E,
    prior: P,
    store: ContextStore,
    leakage: LeakageEstimator,
    leakage_params: LeakageParams,
    policy: SamplingPolicy,
    mcmc_parameters: McmcParameters,
    rejection: RejectionConfig,
    runner: Box<dyn ChainRunner + Send>,
    /// Global random seed.
    pub seed: u64,
    rng: SmallRng,
}

impl<E, P> Posterior<E, P>
where
    E: DensityEstimator + Sync,
    P: Prior + Sync,
{
    /**
    Creates a posterior for observations with `x_num_features` features.

    `sample_with_mcmc` selects the initial sampling mode; only
    [`MethodFamily::Snpe`] may start with rejection sampling. The estimator
    and the prior must agree on the parameter dimension.
    */
    pub fn new(
        family: MethodFamily,
        estimator: E,
        prior: P,
        x_num_features: usize,
        sample_with_mcmc: bool,
    ) -> Result<Self> {
        if estimator.dim() != prior.dim() {
            return Err(PosteriorError::Validation(format!(
                "estimator has {} parameters, prior has {}",
                estimator.dim(),
                prior.dim()
            )));
        }
        let policy = SamplingPolicy::new(family, SamplingMode::from_use_mcmc(sample_with_mcmc))?;
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            estimator,
            prior,
            store: ContextStore::new(x_num_features),
            leakage: LeakageEstimator::new(),
            leakage_params: LeakageParams::default(),
            policy,
            mcmc_parameters: McmcParameters::defaults_for(family),
            rejection: RejectionConfig::default(),
            runner: Box::new(SliceRunner::default()),
            seed,
            rng: SmallRng::seed_from_u64(seed),
        })
    }

    /// Sets a new seed for all randomness drawn by this posterior.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn with_mcmc_method(mut self, method: McmcMethod) -> Self {
        self.mcmc_parameters.method = method;
        self
    }

    /// Merges `overrides` into the configured MCMC defaults.
    pub fn with_mcmc_parameters(mut self, overrides: &McmcOverrides) -> Result<Self> {
        self.set_mcmc_parameters(overrides)?;
        Ok(self)
    }

    pub fn with_rejection_config(mut self, config: RejectionConfig) -> Self {
        self.rejection = config;
        self
    }

    pub fn with_leakage_params(mut self, params: LeakageParams) -> Self {
        self.leakage_params = params;
        self
    }

    /// Replaces the chain runner (the slice runner by default), e.g. to serve
    /// [`McmcMethod::Hmc`] or [`McmcMethod::Nuts`].
    pub fn with_chain_runner<R: ChainRunner + Send + 'static>(mut self, runner: R) -> Self {
        self.runner = Box::new(runner);
        self
    }

    pub fn family(&self) -> MethodFamily {
        self.policy.family()
    }

    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    pub fn prior(&self) -> &P {
        &self.prior
    }

    /// Swaps in a retrained estimator and drops the cached correction.
    pub fn set_estimator(&mut self, estimator: E) -> Result<&mut Self> {
        if estimator.dim() != self.prior.dim() {
            return Err(PosteriorError::Validation(format!(
                "estimator has {} parameters, prior has {}",
                estimator.dim(),
                self.prior.dim()
            )));
        }
        self.estimator = estimator;
        self.leakage.reset();
        Ok(self)
    }

    pub fn default_x(&self) -> Option<&Context> {
        self.store.default_context()
    }

    /// Stores `x` as the default context and drops the cached correction.
    /// On error the previous default stays in place.
    pub fn set_default_x(&mut self, x: impl Into<Context>) -> Result<&mut Self> {
        self.store.set_default(x.into())?;
        self.leakage.reset();
        Ok(self)
    }

    pub fn sample_with_mcmc(&self) -> bool {
        self.policy.uses_mcmc()
    }

    /// Switches between MCMC and rejection sampling. Fails, leaving the mode
    /// unchanged, if the family cannot sample by rejection.
    pub fn set_sample_with_mcmc(&mut self, use_mcmc: bool) -> Result<&mut Self> {
        self.policy.set_mode(use_mcmc)?;
        Ok(self)
    }

    pub fn mcmc_method(&self) -> McmcMethod {
        self.mcmc_parameters.method
    }

    pub fn set_mcmc_method(&mut self, method: McmcMethod) -> &mut Self {
        self.mcmc_parameters.method = method;
        self
    }

    pub fn mcmc_parameters(&self) -> &McmcParameters {
        &self.mcmc_parameters
    }

    pub fn set_mcmc_parameters(&mut self, overrides: &McmcOverrides) -> Result<&mut Self> {
        self.mcmc_parameters = merge(&self.mcmc_parameters, overrides)?;
        Ok(self)
    }

    pub fn rejection_config(&self) -> &RejectionConfig {
        &self.rejection
    }

    pub fn leakage(&self) -> &LeakageEstimator {
        &self.leakage
    }

    /// Drops the cached correction factor, e.g. after retraining in place.
    pub fn reset_leakage_correction(&mut self) {
        self.leakage.reset();
    }

    /// Resolves `x` to a single observation with the declared feature count.
    fn single_context(&self, x: Option<&Context>) -> Result<Context> {
        let ctx = self.store.resolve(x)?;
        if ctx.batch_size() != 1 {
            return Err(PosteriorError::Validation(format!(
                "expected a single observation, got a batch of {}",
                ctx.batch_size()
            )));
        }
        self.store.check_features(&ctx)?;
        Ok(ctx)
    }

    /**
    Fraction of the estimator's mass inside the prior's support at `x` (the
    default context if `None`).

    The value at the default context is cached and reused until a new default
    is set, the cache is reset or `force_update` is passed. Any other context
    is estimated on every call.
    */
    pub fn leakage_correction(
        &mut self,
        x: Option<&Context>,
        num_rejection_samples: usize,
        force_update: bool,
        show_progress_bars: bool,
    ) -> Result<f64> {
        let ctx = self.single_context(x)?;
        self.leakage.correction(
            &self.estimator,
            &self.prior,
            &self.store,
            &ctx,
            num_rejection_samples,
            force_update,
            show_progress_bars,
            &mut self.rng,
        )
    }

    /// Posterior log-density of each row of `theta`, using the posterior's
    /// [`LeakageParams`] when `norm_posterior` is set.
    pub fn log_prob(
        &mut self,
        theta: ArrayView2<f64>,
        x: Option<&Context>,
        norm_posterior: bool,
    ) -> Result<Array1<f64>> {
        let params = self.leakage_params;
        self.log_prob_with_leakage(theta, x, norm_posterior, &params)
    }

    /**
    Posterior log-density of each row of `theta` given `x`.

    Rows outside the prior's support get `-inf`. With `norm_posterior` the
    density is divided by the leakage correction at the first observation of
    `x`; without it no correction work is done. Likelihood and ratio families
    have no normalized form: they return the unnormalized potential
    `log q(x | theta) + log p(theta)` and log a warning if normalization was
    requested.

    `x` must be a single observation or hold one observation per row of
    `theta`.
    */
    pub fn log_prob_with_leakage(
        &mut self,
        theta: ArrayView2<f64>,
        x: Option<&Context>,
        norm_posterior: bool,
        leakage: &LeakageParams,
    ) -> Result<Array1<f64>> {
        let ctx = self.store.resolve(x)?;
        if ctx.batch_size() == 0 {
            return Err(PosteriorError::Validation(
                "context batch is empty".to_string(),
            ));
        }
        self.store.check_features(&ctx)?;
        if theta.ncols() != self.prior.dim() {
            return Err(PosteriorError::Validation(format!(
                "theta has {} columns, prior has {} parameters",
                theta.ncols(),
                self.prior.dim()
            )));
        }
        if ctx.batch_size() != 1 && ctx.batch_size() != theta.nrows() {
            return Err(PosteriorError::Validation(format!(
                "context batch of {} does not match {} parameter rows",
                ctx.batch_size(),
                theta.nrows()
            )));
        }

        let family = self.policy.family();
        let lp = masked_log_prob(family, &self.estimator, &self.prior, theta, ctx.view());
        if !norm_posterior {
            return Ok(lp);
        }
        if !family.estimates_posterior() {
            warn!(
                "{family} posteriors are only known up to a constant; \
                 returning the unnormalized log-density"
            );
            return Ok(lp);
        }

        let factor = self.leakage.correction(
            &self.estimator,
            &self.prior,
            &self.store,
            &ctx.first_of_batch(),
            leakage.num_rejection_samples,
            leakage.force_update,
            leakage.show_progress_bars,
            &mut self.rng,
        )?;
        let log_factor = factor.ln();
        Ok(lp.mapv_into(|v| v - log_factor))
    }

    /**
    Draws `prod(sample_shape)` samples from the posterior at `x` and returns
    them with shape `sample_shape ++ [dim]`. An empty shape draws one sample.

    Per-call options are validated and merged before any draws: an illegal
    mode for the family, a bad MCMC parameter or a method the chain runner
    cannot serve all fail without sampling.
    */
    pub fn sample(
        &mut self,
        sample_shape: &[usize],
        x: Option<&Context>,
        options: SampleOptions,
    ) -> Result<ArrayD<f64>> {
        let ctx = self.single_context(x)?;
        let num_samples: usize = sample_shape.iter().product();

        let mode = self.policy.resolve(options.sample_with_mcmc)?;
        let mut overrides = options.mcmc_parameters.unwrap_or_default();
        if let Some(method) = options.mcmc_method {
            overrides.method = Some(method);
        }
        let params = merge(&self.mcmc_parameters, &overrides)?;
        let show_progress = options.show_progress_bars;

        let draws = match mode {
            SamplingMode::Mcmc => self.sample_mcmc(&ctx, num_samples, &params, show_progress)?,
            SamplingMode::Rejection => {
                let outcome = sample_within_prior(
                    &self.estimator,
                    &self.prior,
                    ctx.row(0),
                    num_samples,
                    &self.rejection,
                    show_progress,
                    &mut self.rng,
                )?;
                debug!(
                    "rejection sampling accepted {num_samples} of {} candidates ({:.3})",
                    outcome.attempts, outcome.acceptance_rate
                );
                outcome.samples
            }
        };

        let mut shape = sample_shape.to_vec();
        shape.push(draws.ncols());
        let draws = if draws.is_standard_layout() {
            draws
        } else {
            draws.as_standard_layout().into_owned()
        };
        Ok(draws.into_shape_with_order(IxDyn(&shape))?)
    }

    fn sample_mcmc(
        &mut self,
        ctx: &Context,
        num_samples: usize,
        params: &McmcParameters,
        show_progress: bool,
    ) -> Result<Array2<f64>> {
        if !self.runner.supports(params.method) {
            return Err(PosteriorError::Configuration(format!(
                "MCMC method `{}` is not supported by the configured chain runner",
                params.method
            )));
        }

        let potential = PosteriorPotential::new(
            self.policy.family(),
            &self.estimator,
            &self.prior,
            ctx.view(),
        );
        let init = initial_positions(params, &self.prior, |t| potential.evaluate(t), &mut self.rng)?;
        debug!(
            "starting {} `{}` chains with {:?} initialisation",
            params.num_chains, params.method, params.init_strategy
        );

        let draws = self.runner.run(ChainRequest {
            target: &potential,
            initial_positions: init,
            num_samples,
            params,
            show_progress,
            seed: self.rng.gen(),
        })?;
        if draws.nrows() != num_samples || draws.ncols() != self.prior.dim() {
            return Err(PosteriorError::Validation(format!(
                "chain runner returned {:?} draws, expected [{num_samples}, {}]",
                draws.shape(),
                self.prior.dim()
            )));
        }
        Ok(draws)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{BoxUniform, ConditionalGaussian};
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2, Axis};

    const STD_80: f64 = 0.5 / 1.281_551_565_544_601;

    fn fixture(family: MethodFamily, use_mcmc: bool) -> Posterior<ConditionalGaussian, BoxUniform> {
        let prior = BoxUniform::new(arr1(&[0.0]), arr1(&[1.0])).unwrap();
        let estimator = ConditionalGaussian::new(1, STD_80);
        let mut posterior = Posterior::new(family, estimator, prior, 1, use_mcmc)
            .unwrap()
            .set_seed(42);
        posterior.set_default_x(arr1(&[0.5])).unwrap();
        posterior
    }

    fn quiet() -> SampleOptions {
        SampleOptions::default().show_progress_bars(false)
    }

    #[test]
    fn test_likelihood_family_cannot_start_with_rejection() {
        let prior = BoxUniform::new(arr1(&[0.0]), arr1(&[1.0])).unwrap();
        let result = Posterior::new(MethodFamily::Snl, ConditionalGaussian::new(1, 1.0), prior, 1, false);
        assert!(matches!(result, Err(PosteriorError::Configuration(_))));
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let prior = BoxUniform::new(arr1(&[0.0]), arr1(&[1.0])).unwrap();
        let result = Posterior::new(MethodFamily::Snpe, ConditionalGaussian::new(2, 1.0), prior, 1, false);
        assert!(matches!(result, Err(PosteriorError::Validation(_))));
    }

    #[test]
    fn test_empty_context_batch_is_rejected() {
        let mut posterior = fixture(MethodFamily::Snpe, false);
        let theta = Array2::<f64>::zeros((0, 1));
        let empty = Context::new(Array2::zeros((0, 1)));
        for norm in [true, false] {
            let err = posterior
                .log_prob(theta.view(), Some(&empty), norm)
                .unwrap_err();
            assert!(matches!(err, PosteriorError::Validation(_)), "norm = {norm}");
        }
        // The cached correction at the default is untouched.
        assert_eq!(posterior.leakage().estimations(), 0);
    }

    #[test]
    fn test_unnormalized_log_prob_skips_correction() {
        let mut posterior = fixture(MethodFamily::Snpe, false);
        let theta = arr2(&[[0.5], [0.2], [-0.1]]);
        let lp = posterior.log_prob(theta.view(), None, false).unwrap();
        let net = posterior
            .estimator()
            .log_prob(theta.view(), arr2(&[[0.5]]).view());
        assert_abs_diff_eq!(lp[0], net[0], epsilon = 1e-12);
        assert_abs_diff_eq!(lp[1], net[1], epsilon = 1e-12);
        assert_eq!(lp[2], f64::NEG_INFINITY);
        assert_eq!(posterior.leakage().estimations(), 0);
    }

    #[test]
    fn test_normalized_log_prob_subtracts_log_correction() {
        let mut posterior = fixture(MethodFamily::Snpe, false);
        let theta = arr2(&[[0.5], [0.9]]);
        let raw = posterior.log_prob(theta.view(), None, false).unwrap();
        let norm = posterior.log_prob(theta.view(), None, true).unwrap();
        let factor = posterior.leakage().cached().unwrap().factor;
        assert_abs_diff_eq!(factor, 0.8, epsilon = 0.02);
        assert_abs_diff_eq!(&raw - &norm, arr1(&[factor.ln(), factor.ln()]), epsilon = 1e-12);

        // A second call reuses the cached factor.
        posterior.log_prob(theta.view(), None, true).unwrap();
        assert_eq!(posterior.leakage().estimations(), 1);
    }

    #[test]
    fn test_log_prob_validates_shapes() {
        let mut posterior = fixture(MethodFamily::Snpe, false);
        let err = posterior
            .log_prob(arr2(&[[0.5, 0.5]]).view(), None, false)
            .unwrap_err();
        assert!(matches!(err, PosteriorError::Validation(_)));

        let batch = Context::from(arr2(&[[0.5], [0.4], [0.3]]));
        let err = posterior
            .log_prob(arr2(&[[0.5], [0.5]]).view(), Some(&batch), false)
            .unwrap_err();
        assert!(matches!(err, PosteriorError::Validation(_)));

        let ok = posterior
            .log_prob(arr2(&[[0.5], [0.5], [0.5]]).view(), Some(&batch), false)
            .unwrap();
        assert_eq!(ok.len(), 3);
    }

    #[test]
    fn test_likelihood_family_returns_unnormalized_potential() {
        let mut posterior = fixture(MethodFamily::SnreB, true);
        let theta = arr2(&[[0.3]]);
        let raw = posterior.log_prob(theta.view(), None, false).unwrap();
        let norm = posterior.log_prob(theta.view(), None, true).unwrap();
        assert_eq!(raw, norm);
        assert_eq!(posterior.leakage().estimations(), 0);
    }

    #[test]
    fn test_set_default_x_drops_cache() {
        let mut posterior = fixture(MethodFamily::Snpe, false);
        posterior.leakage_correction(None, 1_000, false, false).unwrap();
        assert!(posterior.leakage().cached().is_some());
        posterior.set_default_x(arr1(&[0.2])).unwrap();
        assert!(posterior.leakage().cached().is_none());
        assert_eq!(posterior.default_x().unwrap().row(0), arr1(&[0.2]));
    }

    #[test]
    fn test_mode_switch_is_checked() {
        let mut posterior = fixture(MethodFamily::Snpe, false);
        posterior.set_sample_with_mcmc(true).unwrap();
        assert!(posterior.sample_with_mcmc());
        posterior.set_sample_with_mcmc(false).unwrap();
        assert!(!posterior.sample_with_mcmc());

        let mut ratio = fixture(MethodFamily::SnreA, true);
        assert!(ratio.set_sample_with_mcmc(false).is_err());
        assert!(ratio.sample_with_mcmc());
    }

    #[test]
    fn test_rejection_sample_shape_and_support() {
        let mut posterior = fixture(MethodFamily::Snpe, false);
        let draws = posterior.sample(&[3, 4], None, quiet()).unwrap();
        assert_eq!(draws.shape(), &[3, 4, 1]);
        assert!(draws.iter().all(|v| (0.0..1.0).contains(v)));

        let single = posterior.sample(&[], None, quiet()).unwrap();
        assert_eq!(single.shape(), &[1]);
    }

    #[test]
    fn test_mcmc_sample_shape_and_support() {
        let mut posterior = fixture(MethodFamily::Snpe, false);
        let options = quiet().sample_with_mcmc(true).mcmc_parameters(
            McmcOverrides::default().num_chains(2).thin(2).warmup_steps(10),
        );
        let draws = posterior.sample(&[3, 4], None, options).unwrap();
        assert_eq!(draws.shape(), &[3, 4, 1]);
        assert!(draws.iter().all(|v| (0.0..1.0).contains(v)));
        // The per-call override leaves the stored mode alone.
        assert!(!posterior.sample_with_mcmc());
    }

    #[test]
    fn test_unsupported_method_fails_before_sampling() {
        let mut posterior = fixture(MethodFamily::Snl, true);
        let err = posterior
            .sample(&[10], None, quiet().mcmc_method(McmcMethod::Nuts))
            .unwrap_err();
        assert!(matches!(err, PosteriorError::Configuration(_)));
    }

    #[test]
    fn test_batched_context_is_rejected_for_sampling() {
        let mut posterior = fixture(MethodFamily::Snpe, false);
        let batch = Context::from(arr2(&[[0.5], [0.4]]));
        let err = posterior.sample(&[5], Some(&batch), quiet()).unwrap_err();
        assert!(matches!(err, PosteriorError::Validation(_)));
    }

    #[test]
    fn test_rejection_samples_follow_truncated_gaussian() {
        let mut posterior = fixture(MethodFamily::Snpe, false);
        let draws = posterior.sample(&[20_000], None, quiet()).unwrap();
        let draws = draws.into_dimensionality::<ndarray::Ix2>().unwrap();
        let mean = draws.mean_axis(Axis(0)).unwrap();
        // Symmetric truncation around the mean keeps it in place.
        assert_abs_diff_eq!(mean[0], 0.5, epsilon = 0.01);
    }
}
