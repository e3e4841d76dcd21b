//! # mc-compat
//!
//! Backward-compatible, command-driven fitter interface over
//! [`mc_engine`], mirroring the Fortran-Minuit command vocabulary
//! (MIGRAD, MINOS, HESSE, FIX, SET LIMIT, ...).
//!
//! The shim translates string commands and flat parameter arrays into
//! engine calls, and projects the engine's fit result back into the flat
//! output shapes legacy clients expect (covariance buffer, per-parameter
//! error bundles, statistics bundles, confidence bands written into
//! point-set or binned containers).
//!
//! A [`CompatFitter`] is single-threaded by contract: commands mutate the
//! shared fit configuration in place and the covariance buffer is an
//! unsynchronized instance-owned cache, so access from multiple threads
//! must be serialized by the caller.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Legacy command vocabulary and prefix parsing.
pub mod command;
/// Tagged data containers (point sets and binned data).
pub mod containers;
/// Typed error kinds for the legacy surface.
pub mod error;
/// Adapter for the legacy 5-argument objective callback.
pub mod fcn;
/// Confidence-interval propagation into containers.
pub mod intervals;
/// The command dispatcher, parameter store adapter and result projector.
pub mod shim;

pub use command::Command;
pub use containers::FitData;
pub use error::{CompatError, CompatResult};
pub use fcn::{LegacyFcnAdapter, LegacyFcnCallback};
pub use shim::{CompatFitter, FitStats, ParameterErrors, ParameterInfo};
