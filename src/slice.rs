/*!
Coordinate-wise slice sampling (Neal, 2003) with stepping out and shrinkage,
and the [`SliceRunner`] that serves the posterior's `slice_np` and `slice`
methods.

During warmup each chain adapts the bracket width of every coordinate to the
running mean of its stepped-out brackets, which only needs log-density
evaluations: no gradients, no normalizing constant.

# Examples

```rust
use leaky_posterior::core::{MarkovChain, run_chain};
use leaky_posterior::slice::SliceChain;
use ndarray::ArrayView1;

let target = |x: ArrayView1<f64>| -0.5 * x.dot(&x);
let mut chain = SliceChain::new(&target, vec![0.0, 0.0], 42);
let draws = run_chain(&mut chain, 1_000, 100, 1, None);
assert_eq!(draws.shape(), &[1_000, 2]);
```
*/

use log::{debug, warn};
use ndarray::{Array2, ArrayView1, Axis};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::Exp1;

use crate::core::{concat_draws, run_chains, ChainRequest, ChainRunner, MarkovChain};
use crate::distributions::LogDensity;
use crate::error::{PosteriorError, Result};
use crate::mcmc::McmcMethod;
use crate::stats::max_rhat;

/// Shrinkage iterations before a coordinate update gives up and stays put.
const MAX_SHRINK: usize = 200;

/// A single slice-sampling chain over a borrowed target.
pub struct SliceChain<'a> {
    target: &'a (dyn LogDensity + Sync),
    state: Vec<f64>,
    log_density: f64,
    widths: Vec<f64>,
    max_step_out: usize,
    n_tuned: usize,
    pub seed: u64,
    rng: SmallRng,
}

impl<'a> SliceChain<'a> {
    /// A chain at `initial_state` with unit initial bracket widths. The
    /// target must be finite at `initial_state`, otherwise the slice is
    /// unbounded and the chain leaves the target's support; see
    /// [`SliceChain::try_new`].
    pub fn new(target: &'a (dyn LogDensity + Sync), initial_state: Vec<f64>, seed: u64) -> Self {
        let log_density = target.log_density(ArrayView1::from(&initial_state[..]));
        let widths = vec![1.0; initial_state.len()];
        Self {
            target,
            state: initial_state,
            log_density,
            widths,
            max_step_out: 32,
            n_tuned: 0,
            seed,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Like [`SliceChain::new`], but fails if the target's log-density at
    /// `initial_state` is not finite.
    pub fn try_new(
        target: &'a (dyn LogDensity + Sync),
        initial_state: Vec<f64>,
        seed: u64,
    ) -> Result<Self> {
        let chain = Self::new(target, initial_state, seed);
        if !chain.log_density.is_finite() {
            return Err(PosteriorError::Initialization(format!(
                "chain start {:?} has log-density {}",
                chain.state, chain.log_density
            )));
        }
        Ok(chain)
    }

    pub fn with_width(mut self, width: f64) -> Self {
        self.widths.iter_mut().for_each(|w| *w = width);
        self
    }

    pub fn with_max_step_out(mut self, max_step_out: usize) -> Self {
        self.max_step_out = max_step_out.max(1);
        self
    }

    pub fn widths(&self) -> &[f64] {
        &self.widths
    }

    /// Log-density with coordinate `i` replaced by `value`.
    fn log_density_at(&mut self, i: usize, value: f64) -> f64 {
        let old = self.state[i];
        self.state[i] = value;
        let lp = self.target.log_density(ArrayView1::from(&self.state[..]));
        self.state[i] = old;
        lp
    }

    /// Updates coordinate `i`; returns the width of the stepped-out bracket.
    fn update_coordinate(&mut self, i: usize) -> f64 {
        let x0 = self.state[i];
        let w = self.widths[i];
        let e: f64 = self.rng.sample(Exp1);
        let log_u = self.log_density - e;
        let below = |lp: f64| lp > log_u;

        // Step out with Neal's randomised limits.
        let mut lo = x0 - w * self.rng.gen::<f64>();
        let mut hi = lo + w;
        let mut j = (self.max_step_out as f64 * self.rng.gen::<f64>()).floor() as usize;
        let mut k = self.max_step_out - 1 - j.min(self.max_step_out - 1);
        while j > 0 && below(self.log_density_at(i, lo)) {
            lo -= w;
            j -= 1;
        }
        while k > 0 && below(self.log_density_at(i, hi)) {
            hi += w;
            k -= 1;
        }
        let bracket = hi - lo;

        for _ in 0..MAX_SHRINK {
            let x1 = lo + (hi - lo) * self.rng.gen::<f64>();
            let lp = self.log_density_at(i, x1);
            if below(lp) {
                self.state[i] = x1;
                self.log_density = lp;
                return bracket;
            }
            if x1 < x0 {
                lo = x1;
            } else {
                hi = x1;
            }
        }
        bracket
    }
}

impl MarkovChain for SliceChain<'_> {
    fn step(&mut self) -> &[f64] {
        for i in 0..self.state.len() {
            self.update_coordinate(i);
        }
        &self.state
    }

    fn current_state(&self) -> &[f64] {
        &self.state
    }

    fn tune_step(&mut self) -> &[f64] {
        self.n_tuned += 1;
        let n = self.n_tuned as f64;
        for i in 0..self.state.len() {
            let bracket = self.update_coordinate(i);
            if bracket.is_finite() && bracket > 0.0 {
                self.widths[i] += (bracket - self.widths[i]) / n;
            }
        }
        &self.state
    }
}

/// Runs independent slice-sampling chains in parallel.
#[derive(Debug, Clone)]
pub struct SliceRunner {
    /// Initial bracket width of every coordinate.
    pub initial_width: f64,
    /// Maximum number of stepping-out expansions per coordinate update.
    pub max_step_out: usize,
    /// R-hat above which a convergence warning is logged.
    pub rhat_warn: f64,
}

impl Default for SliceRunner {
    fn default() -> Self {
        Self {
            initial_width: 0.5,
            max_step_out: 32,
            rhat_warn: 1.1,
        }
    }
}

impl ChainRunner for SliceRunner {
    fn supports(&self, method: McmcMethod) -> bool {
        matches!(method, McmcMethod::SliceNp | McmcMethod::Slice)
    }

    fn run(&mut self, request: ChainRequest<'_>) -> Result<Array2<f64>> {
        let params = request.params;
        if !self.supports(params.method) {
            return Err(PosteriorError::Configuration(format!(
                "the slice runner cannot run `{}` chains",
                params.method
            )));
        }
        let num_chains = request.initial_positions.nrows();
        if num_chains == 0 {
            return Err(PosteriorError::Initialization(
                "no chain starting points given".to_string(),
            ));
        }
        let per_chain = request.num_samples.div_ceil(num_chains);

        let mut chains: Vec<SliceChain<'_>> = Vec::with_capacity(num_chains);
        for (i, start) in request.initial_positions.axis_iter(Axis(0)).enumerate() {
            let seed = request.seed.wrapping_add(i as u64);
            chains.push(
                SliceChain::try_new(request.target, start.to_vec(), seed)?
                    .with_width(self.initial_width)
                    .with_max_step_out(self.max_step_out),
            );
        }

        debug!(
            "running {num_chains} slice chains: {} warmup, {per_chain} kept draws each, thin {}",
            params.warmup_steps, params.thin
        );
        let draws = run_chains(
            &mut chains,
            per_chain,
            params.warmup_steps,
            params.thin,
            request.show_progress,
        );

        if let Some(rhat) = max_rhat(&draws) {
            debug!("max R-hat over parameters: {rhat:.3}");
            if rhat > self.rhat_warn {
                warn!(
                    "slice chains may not have converged (max R-hat {rhat:.3}); \
                     consider more warmup steps or thinning"
                );
            }
        }

        concat_draws(&draws, request.num_samples)
    }
}
