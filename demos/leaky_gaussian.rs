//! Corrects a Gaussian posterior estimate that leaks out of a unit-box prior,
//! then samples it by rejection and with slice-sampling chains.

use leaky_posterior::distributions::{BoxUniform, ConditionalGaussian};
use leaky_posterior::mcmc::McmcOverrides;
use leaky_posterior::{MethodFamily, Posterior, SampleOptions};
use ndarray::{arr1, arr2, Axis};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    const SEED: u64 = 42;

    let prior = BoxUniform::new(arr1(&[0.0, 0.0]), arr1(&[1.0, 1.0]))?;
    // Observations close to the boundary push mass outside the box.
    let estimator = ConditionalGaussian::new(2, 0.25);
    let mut posterior = Posterior::new(MethodFamily::Snpe, estimator, prior, 2, false)?
        .with_mcmc_parameters(&McmcOverrides::default().num_chains(4).warmup_steps(200))?
        .set_seed(SEED);
    posterior.set_default_x(arr1(&[0.9, 0.1]))?;

    let factor = posterior.leakage_correction(None, 100_000, false, true)?;
    println!("Mass inside the prior support: {factor:.4}");

    let theta = arr2(&[[0.9, 0.1], [0.5, 0.5], [1.2, 0.1]]);
    let raw = posterior.log_prob(theta.view(), None, false)?;
    let normalized = posterior.log_prob(theta.view(), None, true)?;
    for ((t, r), n) in theta.outer_iter().zip(&raw).zip(&normalized) {
        println!("log p({t}) = {n:.4} (unnormalized {r:.4})");
    }

    let rejection = posterior.sample(&[10_000], None, SampleOptions::default())?;
    let mcmc = posterior.sample(
        &[10_000],
        None,
        SampleOptions::default().sample_with_mcmc(true),
    )?;
    for (name, draws) in [("rejection", &rejection), ("slice MCMC", &mcmc)] {
        let mean = draws
            .mean_axis(Axis(0))
            .ok_or("no draws to summarize")?;
        println!("{name}: {} draws, mean {mean}", draws.len_of(Axis(0)));
    }

    #[cfg(feature = "csv")]
    {
        leaky_posterior::io::csv::save_csv(&mcmc, "/tmp/leaky_gaussian.csv")?;
        println!("Saved MCMC draws to /tmp/leaky_gaussian.csv");
    }

    Ok(())
}
