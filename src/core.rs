//! Chain abstractions: the per-chain [`MarkovChain`] trait, helpers that run
//! chains (in parallel, with optional progress bars) and the pluggable
//! [`ChainRunner`] the posterior hands its MCMC work to.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use ndarray::{Array2, Axis};
use rayon::prelude::*;

use crate::distributions::LogDensity;
use crate::error::Result;
use crate::mcmc::{McmcMethod, McmcParameters};

const BAR_TEMPLATE: &str = "{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}";

pub trait MarkovChain {
    /// Does one iteration of the chain, returning the new current state.
    fn step(&mut self) -> &[f64];

    /// Get the current state without stepping.
    fn current_state(&self) -> &[f64];

    /// Called once per warmup iteration instead of [`MarkovChain::step`].
    /// Chains that tune themselves during warmup override this.
    fn tune_step(&mut self) -> &[f64] {
        self.step()
    }
}

/// Runs `warmup` discarded tuning steps, then `n_keep * thin` steps keeping
/// every `thin`-th state. Returns an `n_keep x dim` matrix.
pub fn run_chain<M: MarkovChain>(
    chain: &mut M,
    n_keep: usize,
    warmup: usize,
    thin: usize,
    pb: Option<&ProgressBar>,
) -> Array2<f64> {
    let dim = chain.current_state().len();
    let thin = thin.max(1);
    let mut out = Array2::<f64>::zeros((n_keep, dim));

    if let Some(pb) = pb {
        pb.set_length((warmup + n_keep * thin) as u64);
    }
    for _ in 0..warmup {
        chain.tune_step();
        if let Some(pb) = pb {
            pb.inc(1);
        }
    }
    for i in 0..n_keep * thin {
        let state = chain.step();
        if (i + 1) % thin == 0 {
            out.row_mut(i / thin)
                .iter_mut()
                .zip(state)
                .for_each(|(o, s)| *o = *s);
        }
        if let Some(pb) = pb {
            pb.inc(1);
        }
    }
    out
}

/// Runs all chains in parallel and returns one draw matrix per chain.
pub fn run_chains<M: MarkovChain + Send>(
    chains: &mut [M],
    n_keep: usize,
    warmup: usize,
    thin: usize,
    show_progress: bool,
) -> Vec<Array2<f64>> {
    if !show_progress {
        return chains
            .par_iter_mut()
            .map(|chain| run_chain(chain, n_keep, warmup, thin, None))
            .collect();
    }

    let multi = MultiProgress::new();
    chains
        .par_iter_mut()
        .enumerate()
        .map(|(i, chain)| {
            let pb = multi.add(progress_bar(0, &format!("Chain {i}"), true));
            let samples = run_chain(chain, n_keep, warmup, thin, Some(&pb));
            pb.finish_with_message("Done!");
            samples
        })
        .collect()
}

/// Concatenates per-chain draws chain-major and keeps the first `n` rows.
pub fn concat_draws(per_chain: &[Array2<f64>], n: usize) -> Result<Array2<f64>> {
    let views: Vec<_> = per_chain.iter().map(|a| a.view()).collect();
    let all = ndarray::concatenate(Axis(0), &views)?;
    let n = n.min(all.nrows());
    Ok(all.slice_axis(Axis(0), (0..n).into()).to_owned())
}

/// A bar in the crate's style, or a hidden one when progress is off.
pub(crate) fn progress_bar(len: u64, prefix: &str, show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
        pb.set_style(style.progress_chars("##-"));
    }
    pb.set_prefix(prefix.to_string());
    pb
}

/// Everything a chain runner needs to produce draws from an unnormalized target.
pub struct ChainRequest<'a> {
    /// The unnormalized log-density the chains target.
    pub target: &'a (dyn LogDensity + Sync),
    /// One starting point per chain (`num_chains x dim`).
    pub initial_positions: Array2<f64>,
    /// Total number of draws to return, summed over chains.
    pub num_samples: usize,
    pub params: &'a McmcParameters,
    pub show_progress: bool,
    /// Base seed; chain `i` is seeded with `seed + i`.
    pub seed: u64,
}

/// Produces MCMC draws for the posterior. Implement this to plug in kernels
/// the crate does not ship (HMC, NUTS, ...).
pub trait ChainRunner {
    /// Whether this runner can serve `method`. Checked before any draws.
    fn supports(&self, method: McmcMethod) -> bool;

    /// Returns exactly `request.num_samples` draws (`num_samples x dim`).
    fn run(&mut self, request: ChainRequest<'_>) -> Result<Array2<f64>>;
}
