//! Typed error kinds for the legacy surface.
//!
//! Every operation returns a [`CompatResult`]; the legacy sentinel
//! conventions (status `-1`, value `0`, untouched outputs) are produced
//! only by the thin wrappers on [`crate::CompatFitter`].

use thiserror::Error;

/// Failure kinds of the compatibility layer.
#[derive(Error, Debug)]
pub enum CompatError {
    /// A required piece of configuration is missing (e.g. no objective
    /// function attached before a minimization command).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Insufficient or invalid command arguments.
    #[error("argument error: {0}")]
    Argument(String),

    /// Out-of-range parameter index.
    #[error("{index} is an invalid parameter index (have {total} parameters)")]
    Index {
        /// The offending index as supplied by the caller.
        index: i64,
        /// Current total parameter count.
        total: usize,
    },

    /// Command string not in the legacy vocabulary.
    #[error("invalid command: {0:?}")]
    UnknownCommand(String),

    /// Operation requires a completed, valid fit result.
    #[error("invalid fit result: {0}")]
    InvalidResult(String),

    /// Incompatible container passed for confidence-interval output.
    #[error("container type mismatch: {0}")]
    TypeMismatch(String),

    /// Failure propagated from the fitting engine.
    #[error(transparent)]
    Engine(#[from] mc_core::Error),
}

/// Result type alias for the compatibility layer.
pub type CompatResult<T> = std::result::Result<T, CompatError>;
