//! Skymatch: probabilistic N-way cross-identification of astronomical catalogues
//!
//! Given N point-source catalogues with equatorial coordinates and positional
//! uncertainties, this crate enumerates all plausible associations (one source
//! per catalogue, secondary counterparts optionally absent), scores each
//! association with a Bayesian evidence combining astrometric distances and
//! optional magnitude priors, ranks the alternatives per primary source and
//! emits the annotated join table.

use thiserror::Error;

pub mod bayes;
pub mod coordinates;
pub mod flagging;
pub mod magnitudes;
pub mod matching;
pub mod pipeline;
pub mod synthetic;
pub mod table;

// Re-export commonly used types
pub use coordinates::RaDec;
pub use matching::{CandidateTuple, MatchCache, NoCache};
pub use pipeline::{Catalogue, MatchConfig, PositionError};
pub use table::{Column, Table};

/// Main error type for the skymatch library
#[derive(Debug, Error)]
pub enum SkymatchError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Numeric error: {0}")]
    Numeric(String),

    #[error("No matches.")]
    NoMatches,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for skymatch operations
pub type Result<T> = std::result::Result<T, SkymatchError>;

/// Runs the full cross-matching pipeline without a candidate cache.
///
/// Convenience wrapper around [`pipeline::cross_match_with_cache`] for the
/// common case where no memoisation of the spatial join is wanted.
pub fn cross_match(catalogues: &[Catalogue], config: &MatchConfig) -> Result<Table> {
    pipeline::cross_match_with_cache(catalogues, config, &mut NoCache)
}
