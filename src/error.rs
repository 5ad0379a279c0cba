//! Error type shared by every operation of the posterior.

use thiserror::Error;

/// Errors raised by the posterior, its leakage estimator and its samplers.
///
/// Configuration and validation errors are raised before any draws are made
/// and leave the posterior's state untouched.
#[derive(Debug, Error)]
pub enum PosteriorError {
    /// Illegal sampling-mode transition, unknown MCMC option or method, or a
    /// missing conditioning context.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Contexts or parameters whose shape or batch size cannot be used.
    #[error("validation error: {0}")]
    Validation(String),

    /// Rejection sampling did not collect the requested number of draws within
    /// its attempt budget.
    ///
    /// Raised by the leakage correction when none of its candidates fall
    /// inside the prior's support. There `requested` is 1, the single positive
    /// acceptance estimate it needs, and `attempts` is the number of
    /// candidates drawn.
    #[error(
        "rejection sampling exhausted after {attempts} candidate draws: \
         accepted {accepted} of {requested} requested samples"
    )]
    SamplingExhausted {
        accepted: usize,
        requested: usize,
        attempts: usize,
    },

    /// No chain could be started at a point with finite potential.
    #[error("chain initialisation failed: {0}")]
    Initialization(String),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[cfg(feature = "csv")]
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "csv")]
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, PosteriorError>;
