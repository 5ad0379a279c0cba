/*!
MCMC configuration: the closed set of chain algorithms, chain initialisation
strategies and the parameter record merged from per-family defaults and caller
overrides.

# Examples

```rust
use leaky_posterior::family::MethodFamily;
use leaky_posterior::mcmc::{merge, InitStrategy, McmcMethod, McmcOverrides, McmcParameters};

let defaults = McmcParameters::defaults_for(MethodFamily::Snl);
assert_eq!(defaults.init_strategy, InitStrategy::Sir);

let overrides = McmcOverrides::from_pairs([("thin", "2"), ("num_chains", "4")]).unwrap();
let params = merge(&defaults, &overrides).unwrap();
assert_eq!(params.thin, 2);
assert_eq!(params.num_chains, 4);
assert_eq!(params.method, McmcMethod::SliceNp);
assert_eq!(params.warmup_steps, defaults.warmup_steps);

assert!(McmcOverrides::from_pairs([("thinning", "2")]).is_err());
assert!("gibbs".parse::<McmcMethod>().is_err());
```
*/

use std::fmt;
use std::str::FromStr;

use crate::error::{PosteriorError, Result};
use crate::family::MethodFamily;

/// Chain algorithms a posterior may be asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum McmcMethod {
    /// Coordinate-wise slice sampling (the crate's native kernel).
    SliceNp,
    /// Slice sampling served by a (possibly external) runner.
    Slice,
    /// Hamiltonian Monte Carlo.
    Hmc,
    /// No-U-Turn sampler.
    Nuts,
}

impl McmcMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            McmcMethod::SliceNp => "slice_np",
            McmcMethod::Slice => "slice",
            McmcMethod::Hmc => "hmc",
            McmcMethod::Nuts => "nuts",
        }
    }
}

impl fmt::Display for McmcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for McmcMethod {
    type Err = PosteriorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "slice_np" | "slice-numpy" => Ok(McmcMethod::SliceNp),
            "slice" => Ok(McmcMethod::Slice),
            "hmc" | "hamiltonian" => Ok(McmcMethod::Hmc),
            "nuts" => Ok(McmcMethod::Nuts),
            other => Err(PosteriorError::Configuration(format!(
                "unknown MCMC method `{other}`; expected one of slice_np, slice, hmc, nuts"
            ))),
        }
    }
}

/// How chain starting points are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitStrategy {
    /// Draw each starting point from the prior.
    Prior,
    /// Sequential importance resampling: draw candidates from the prior and
    /// resample them in proportion to the unnormalized posterior.
    Sir,
}

impl FromStr for InitStrategy {
    type Err = PosteriorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "prior" => Ok(InitStrategy::Prior),
            "sir" => Ok(InitStrategy::Sir),
            other => Err(PosteriorError::Configuration(format!(
                "unknown init strategy `{other}`; expected `prior` or `sir`"
            ))),
        }
    }
}

/// A complete, validated MCMC configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McmcParameters {
    pub method: McmcMethod,
    /// Keep every `thin`-th state of each chain.
    pub thin: usize,
    /// Iterations discarded (and used for tuning) before collecting draws.
    pub warmup_steps: usize,
    pub num_chains: usize,
    pub init_strategy: InitStrategy,
    /// Prior candidates considered by [`InitStrategy::Sir`].
    pub init_strategy_num_candidates: usize,
}

impl McmcParameters {
    /// Defaults for a method family. Likelihood and ratio families start their
    /// chains with importance resampling since their potentials are typically
    /// far more concentrated than the prior.
    pub fn defaults_for(family: MethodFamily) -> Self {
        let init_strategy = match family {
            MethodFamily::Snpe => InitStrategy::Prior,
            MethodFamily::Snl | MethodFamily::SnreA | MethodFamily::SnreB => InitStrategy::Sir,
        };
        Self {
            method: McmcMethod::SliceNp,
            thin: 10,
            warmup_steps: 20,
            num_chains: 1,
            init_strategy,
            init_strategy_num_candidates: 10_000,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("thin", self.thin),
            ("num_chains", self.num_chains),
            (
                "init_strategy_num_candidates",
                self.init_strategy_num_candidates,
            ),
        ];
        match positive.iter().find(|(_, v)| *v == 0) {
            Some((key, _)) => Err(PosteriorError::Configuration(format!(
                "MCMC option `{key}` must be positive"
            ))),
            None => Ok(()),
        }
    }
}

impl Default for McmcParameters {
    fn default() -> Self {
        Self::defaults_for(MethodFamily::Snpe)
    }
}

/// Caller overrides; `None` keeps the configured default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct McmcOverrides {
    pub method: Option<McmcMethod>,
    pub thin: Option<usize>,
    pub warmup_steps: Option<usize>,
    pub num_chains: Option<usize>,
    pub init_strategy: Option<InitStrategy>,
    pub init_strategy_num_candidates: Option<usize>,
}

impl McmcOverrides {
    pub fn method(mut self, method: McmcMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn thin(mut self, thin: usize) -> Self {
        self.thin = Some(thin);
        self
    }

    pub fn warmup_steps(mut self, warmup_steps: usize) -> Self {
        self.warmup_steps = Some(warmup_steps);
        self
    }

    pub fn num_chains(mut self, num_chains: usize) -> Self {
        self.num_chains = Some(num_chains);
        self
    }

    pub fn init_strategy(mut self, init_strategy: InitStrategy) -> Self {
        self.init_strategy = Some(init_strategy);
        self
    }

    pub fn init_strategy_num_candidates(mut self, n: usize) -> Self {
        self.init_strategy_num_candidates = Some(n);
        self
    }

    /// Parses string-keyed options. Unknown keys and unparsable values are
    /// configuration errors.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut out = Self::default();
        for (key, value) in pairs {
            match key {
                "method" | "mcmc_method" => out.method = Some(value.parse()?),
                "thin" => out.thin = Some(parse_count(key, value)?),
                "warmup_steps" => out.warmup_steps = Some(parse_count(key, value)?),
                "num_chains" => out.num_chains = Some(parse_count(key, value)?),
                "init_strategy" => out.init_strategy = Some(value.parse()?),
                "init_strategy_num_candidates" => {
                    out.init_strategy_num_candidates = Some(parse_count(key, value)?)
                }
                other => {
                    return Err(PosteriorError::Configuration(format!(
                        "unknown MCMC option `{other}`"
                    )))
                }
            }
        }
        Ok(out)
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize> {
    value.trim().parse().map_err(|_| {
        PosteriorError::Configuration(format!(
            "MCMC option `{key}` expects a non-negative integer, got `{value}`"
        ))
    })
}

/// Applies `overrides` on top of `defaults`. Pure; the result is validated.
pub fn merge(defaults: &McmcParameters, overrides: &McmcOverrides) -> Result<McmcParameters> {
    let merged = McmcParameters {
        method: overrides.method.unwrap_or(defaults.method),
        thin: overrides.thin.unwrap_or(defaults.thin),
        warmup_steps: overrides.warmup_steps.unwrap_or(defaults.warmup_steps),
        num_chains: overrides.num_chains.unwrap_or(defaults.num_chains),
        init_strategy: overrides.init_strategy.unwrap_or(defaults.init_strategy),
        init_strategy_num_candidates: overrides
            .init_strategy_num_candidates
            .unwrap_or(defaults.init_strategy_num_candidates),
    };
    merged.validate()?;
    Ok(merged)
}
