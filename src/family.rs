/*!
Inference-method families and the sampling-mode state machine they gate.

Only density-estimation posteriors ([`MethodFamily::Snpe`]) can be sampled by
rejection: their estimator is a normalized density over parameters that can be
drawn from directly. Likelihood and ratio families only provide a potential
and are pinned to MCMC.

```rust
use leaky_posterior::family::{MethodFamily, SamplingMode, SamplingPolicy};

let mut policy = SamplingPolicy::new(MethodFamily::Snpe, SamplingMode::Mcmc).unwrap();
policy.set_mode(false).unwrap();
assert_eq!(policy.mode(), SamplingMode::Rejection);

let mut policy = SamplingPolicy::new(MethodFamily::SnreA, SamplingMode::Mcmc).unwrap();
assert!(policy.set_mode(false).is_err());
assert_eq!(policy.mode(), SamplingMode::Mcmc);
```
*/

use std::fmt;
use std::str::FromStr;

use crate::error::{PosteriorError, Result};

/// The class of inference algorithm that trained the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodFamily {
    /// Neural posterior estimation: the estimator is `q(theta | x)`.
    Snpe,
    /// Neural likelihood estimation: the estimator is `q(x | theta)`.
    Snl,
    /// Neural ratio estimation, variant A.
    SnreA,
    /// Neural ratio estimation, variant B.
    SnreB,
}

impl MethodFamily {
    pub const ALL: [MethodFamily; 4] = [
        MethodFamily::Snpe,
        MethodFamily::Snl,
        MethodFamily::SnreA,
        MethodFamily::SnreB,
    ];

    /// Sampling modes this family may use.
    pub fn legal_modes(&self) -> &'static [SamplingMode] {
        match self {
            MethodFamily::Snpe => &[SamplingMode::Rejection, SamplingMode::Mcmc],
            MethodFamily::Snl | MethodFamily::SnreA | MethodFamily::SnreB => {
                &[SamplingMode::Mcmc]
            }
        }
    }

    pub fn allows(&self, mode: SamplingMode) -> bool {
        self.legal_modes().contains(&mode)
    }

    /// True if the estimator is a normalized density over parameters.
    pub fn estimates_posterior(&self) -> bool {
        matches!(self, MethodFamily::Snpe)
    }

    /// Fails with a configuration error if `mode` is illegal for this family.
    pub fn check(&self, mode: SamplingMode) -> Result<()> {
        if self.allows(mode) {
            Ok(())
        } else {
            Err(PosteriorError::Configuration(format!(
                "{self} cannot use {mode} sampling"
            )))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MethodFamily::Snpe => "snpe",
            MethodFamily::Snl => "snl",
            MethodFamily::SnreA => "snre_a",
            MethodFamily::SnreB => "snre_b",
        }
    }
}

impl fmt::Display for MethodFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MethodFamily {
    type Err = PosteriorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "snpe" => Ok(MethodFamily::Snpe),
            "snl" => Ok(MethodFamily::Snl),
            "snre_a" => Ok(MethodFamily::SnreA),
            "snre_b" => Ok(MethodFamily::SnreB),
            other => Err(PosteriorError::Configuration(format!(
                "unknown method family `{other}`; expected snpe, snl, snre_a or snre_b"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplingMode {
    Rejection,
    Mcmc,
}

impl SamplingMode {
    pub fn from_use_mcmc(use_mcmc: bool) -> Self {
        if use_mcmc {
            SamplingMode::Mcmc
        } else {
            SamplingMode::Rejection
        }
    }
}

impl fmt::Display for SamplingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplingMode::Rejection => f.write_str("rejection"),
            SamplingMode::Mcmc => f.write_str("MCMC"),
        }
    }
}

/// The active sampling mode of a posterior, constrained by its family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingPolicy {
    family: MethodFamily,
    mode: SamplingMode,
}

impl SamplingPolicy {
    pub fn new(family: MethodFamily, mode: SamplingMode) -> Result<Self> {
        family.check(mode)?;
        Ok(Self { family, mode })
    }

    pub fn family(&self) -> MethodFamily {
        self.family
    }

    pub fn mode(&self) -> SamplingMode {
        self.mode
    }

    pub fn uses_mcmc(&self) -> bool {
        self.mode == SamplingMode::Mcmc
    }

    /// Switches between MCMC and rejection sampling. The state is left
    /// unchanged when the family does not allow the requested mode.
    pub fn set_mode(&mut self, use_mcmc: bool) -> Result<&mut Self> {
        let mode = SamplingMode::from_use_mcmc(use_mcmc);
        self.family.check(mode)?;
        self.mode = mode;
        Ok(self)
    }

    /// Resolves a per-call override against the stored mode.
    pub fn resolve(&self, use_mcmc: Option<bool>) -> Result<SamplingMode> {
        match use_mcmc {
            Some(flag) => {
                let mode = SamplingMode::from_use_mcmc(flag);
                self.family.check(mode)?;
                Ok(mode)
            }
            None => Ok(self.mode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_snpe_allows_rejection() {
        for family in MethodFamily::ALL {
            assert!(family.allows(SamplingMode::Mcmc));
            assert_eq!(
                family.allows(SamplingMode::Rejection),
                family == MethodFamily::Snpe
            );
        }
    }

    #[test]
    fn test_construction_validates_mode() {
        assert!(SamplingPolicy::new(MethodFamily::Snpe, SamplingMode::Rejection).is_ok());
        let err = SamplingPolicy::new(MethodFamily::Snl, SamplingMode::Rejection).unwrap_err();
        assert!(matches!(err, PosteriorError::Configuration(_)));
    }

    #[test]
    fn test_set_mode_flips_repeatedly() {
        let mut policy = SamplingPolicy::new(MethodFamily::Snpe, SamplingMode::Mcmc).unwrap();
        policy.set_mode(false).unwrap().set_mode(true).unwrap();
        assert!(policy.uses_mcmc());
        policy.set_mode(false).unwrap();
        assert_eq!(policy.mode(), SamplingMode::Rejection);
    }

    #[test]
    fn test_failed_transition_keeps_state() {
        for family in [MethodFamily::Snl, MethodFamily::SnreA, MethodFamily::SnreB] {
            let mut policy = SamplingPolicy::new(family, SamplingMode::Mcmc).unwrap();
            let err = policy.set_mode(false).unwrap_err();
            assert!(matches!(err, PosteriorError::Configuration(_)));
            assert_eq!(policy.mode(), SamplingMode::Mcmc);
            assert!(policy.resolve(Some(false)).is_err());
            assert_eq!(policy.resolve(None).unwrap(), SamplingMode::Mcmc);
        }
    }

    #[test]
    fn test_family_names_round_trip() {
        for family in MethodFamily::ALL {
            assert_eq!(family.as_str().parse::<MethodFamily>().unwrap(), family);
        }
        assert!("sre".parse::<MethodFamily>().is_err());
    }
}
