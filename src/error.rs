//! Error type shared by the samplers, densities and estimators of this crate.

use thiserror::Error;

/// Boxed error raised by a user-supplied target or proposal.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PmcError {
    /// The sample ledger and the auxiliary ledger went out of sync.
    #[error(
        "inconsistent state: sample ledger has {samples} rows/runs but auxiliary ledger has \
         {auxiliary}; if you cleared `history` directly, use the sampler's `clear()` instead"
    )]
    LedgerMismatch { samples: usize, auxiliary: usize },

    /// The number of stored proposal snapshots does not match the number of rounds.
    #[error(
        "inconsistent state: {snapshots} proposal snapshots for {rounds} rounds; \
         if you cleared `history` directly, use the sampler's `clear()` instead"
    )]
    SnapshotMismatch { snapshots: usize, rounds: usize },

    /// The proposal (or mixture of proposals) has zero density where the target does not.
    #[error("proposal density vanishes at sample {index} where the target is positive")]
    ZeroDensity { index: usize },

    /// A log-density came out NaN or `+inf`, or a mixture density overflowed.
    #[error("{which} density at sample {index} is not a valid density value: {value}")]
    InvalidDensity {
        which: &'static str,
        index: usize,
        value: f64,
    },

    #[error("sum of weights is zero")]
    ZeroWeight,

    #[error("weights do not allow a bias-corrected normalization (a single sample carries all weight)")]
    DegenerateNormalization,

    #[error("no samples given")]
    EmptyInput,

    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("target evaluation failed")]
    Target(#[source] BoxError),

    #[error("proposal failed")]
    Proposal(#[source] BoxError),
}

impl PmcError {
    /// True for errors caused by the sampler's ledgers being desynchronized.
    pub fn is_consistency(&self) -> bool {
        matches!(
            self,
            PmcError::LedgerMismatch { .. } | PmcError::SnapshotMismatch { .. }
        )
    }

    /// True for numerical degeneracies, which a caller may answer by changing
    /// the proposal and running a fresh round.
    pub fn is_degenerate(&self) -> bool {
        matches!(
            self,
            PmcError::ZeroDensity { .. }
                | PmcError::InvalidDensity { .. }
                | PmcError::ZeroWeight
                | PmcError::DegenerateNormalization
        )
    }

    pub(crate) fn target<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        PmcError::Target(Box::new(err))
    }

    pub(crate) fn proposal<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        PmcError::Proposal(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, PmcError>;
