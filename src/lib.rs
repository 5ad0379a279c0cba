/*!
# leaky-posterior

Leakage-corrected posterior densities and rejection / MCMC sampling for
simulation-based inference.

A conditional density estimator trained against a bounded prior can put
probability mass outside the prior's support. [`posterior::Posterior`] masks
that mass away, optionally renormalizes by the estimated fraction that stays
inside ([`leakage`]), and samples either by rejection against the support or
with MCMC chains ([`slice`], or any [`core::ChainRunner`]).

## Example

```rust
use leaky_posterior::distributions::{BoxUniform, ConditionalGaussian};
use leaky_posterior::family::MethodFamily;
use leaky_posterior::posterior::{Posterior, SampleOptions};
use ndarray::arr1;

let prior = BoxUniform::new(arr1(&[0.0, 0.0]), arr1(&[1.0, 1.0])).unwrap();
let estimator = ConditionalGaussian::new(2, 0.3);
let mut posterior = Posterior::new(MethodFamily::Snpe, estimator, prior, 2, false)
    .unwrap()
    .set_seed(42);
posterior.set_default_x(arr1(&[0.5, 0.9])).unwrap();

let factor = posterior.leakage_correction(None, 10_000, false, false).unwrap();
assert!(factor < 1.0);

let draws = posterior
    .sample(&[100], None, SampleOptions::default().show_progress_bars(false))
    .unwrap();
assert_eq!(draws.shape(), &[100, 2]);
```
*/

pub mod context;
pub mod core;
pub mod distributions;
pub mod error;
pub mod family;
pub mod init;
pub mod io;
pub mod leakage;
pub mod mcmc;
pub mod posterior;
pub mod potential;
pub mod rejection;
pub mod slice;
pub mod stats;

pub use context::Context;
pub use error::{PosteriorError, Result};
pub use family::MethodFamily;
pub use posterior::{LeakageParams, Posterior, SampleOptions};
