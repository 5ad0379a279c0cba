//! Chain starting points.

use log::debug;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::SmallRng;

use crate::distributions::Prior;
use crate::error::{PosteriorError, Result};
use crate::mcmc::{InitStrategy, McmcParameters};

/// One starting point per chain (`num_chains x dim`), chosen by
/// `params.init_strategy`. `potential` evaluates the unnormalized posterior
/// on a batch of parameters; every returned point has a finite potential.
pub fn initial_positions<P, F>(
    params: &McmcParameters,
    prior: &P,
    potential: F,
    rng: &mut SmallRng,
) -> Result<Array2<f64>>
where
    P: Prior + ?Sized,
    F: Fn(ArrayView2<f64>) -> Array1<f64>,
{
    match params.init_strategy {
        InitStrategy::Prior => from_prior(
            prior,
            potential,
            params.num_chains,
            params.init_strategy_num_candidates,
            rng,
        ),
        InitStrategy::Sir => sir(
            prior,
            potential,
            params.num_chains,
            params.init_strategy_num_candidates,
            rng,
        ),
    }
}

/// Prior draws with a finite potential. Candidates are drawn in batches of
/// `num_chains` until every chain has a start or `max(num_candidates,
/// num_chains)` candidates have been tried.
pub fn from_prior<P, F>(
    prior: &P,
    potential: F,
    num_chains: usize,
    num_candidates: usize,
    rng: &mut SmallRng,
) -> Result<Array2<f64>>
where
    P: Prior + ?Sized,
    F: Fn(ArrayView2<f64>) -> Array1<f64>,
{
    let budget = num_candidates.max(num_chains);
    let mut starts: Vec<Array1<f64>> = Vec::with_capacity(num_chains);
    let mut drawn = 0;
    while starts.len() < num_chains && drawn < budget {
        let n = num_chains.min(budget - drawn);
        let candidates = prior.sample(n, rng);
        drawn += n;
        let lp = potential(candidates.view());
        starts.extend(
            candidates
                .axis_iter(Axis(0))
                .zip(lp.iter())
                .filter(|(_, lp)| lp.is_finite())
                .map(|(row, _)| row.to_owned())
                .take(num_chains - starts.len()),
        );
    }
    if starts.len() < num_chains {
        return Err(PosteriorError::Initialization(format!(
            "only {} of {num_chains} chains found a prior draw with finite potential \
             in {drawn} candidates",
            starts.len()
        )));
    }
    debug!("prior initialisation used {drawn} candidates for {num_chains} chains");
    let views: Vec<_> = starts.iter().map(|s| s.view()).collect();
    Ok(ndarray::stack(Axis(0), &views)?)
}

/// Sequential importance resampling: draws `num_candidates` points from the
/// prior and resamples `num_chains` of them, with replacement, with weights
/// proportional to the exponentiated potential.
pub fn sir<P, F>(
    prior: &P,
    potential: F,
    num_chains: usize,
    num_candidates: usize,
    rng: &mut SmallRng,
) -> Result<Array2<f64>>
where
    P: Prior + ?Sized,
    F: Fn(ArrayView2<f64>) -> Array1<f64>,
{
    let candidates = prior.sample(num_candidates, rng);
    let log_weights = potential(candidates.view());

    let max = log_weights
        .iter()
        .copied()
        .filter(|w| w.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return Err(PosteriorError::Initialization(format!(
            "none of {num_candidates} prior candidates has a finite potential"
        )));
    }

    let weights: Vec<f64> = log_weights
        .iter()
        .map(|&w| if w.is_finite() { (w - max).exp() } else { 0.0 })
        .collect();
    let index = WeightedIndex::new(&weights)
        .map_err(|e| PosteriorError::Initialization(format!("invalid resampling weights: {e}")))?;

    let picks: Vec<usize> = (0..num_chains).map(|_| index.sample(rng)).collect();
    debug!("SIR picked chain starts {picks:?} out of {num_candidates} candidates");
    Ok(candidates.select(Axis(0), &picks))
}
