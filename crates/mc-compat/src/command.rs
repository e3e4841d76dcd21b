//! Legacy command vocabulary.
//!
//! Commands are matched by case-insensitive prefix, mirroring the
//! Fortran-Minuit conventions: "MIG" already selects MIGRAD, and the
//! two-word commands ("SET LIM", "CALL FCN") are matched before the
//! single-word ones so that "SET ..." is never mistaken for a
//! minimization command.

/// A recognized legacy command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run Migrad minimization.
    Migrad,
    /// Run the generic Minimize algorithm.
    Minimize,
    /// Run Simplex minimization.
    Simplex,
    /// Run a parameter Scan.
    Scan,
    /// Enable MINOS errors and re-run.
    Minos,
    /// Enable parabolic (HESSE) errors and re-run.
    Hesse,
    /// Fix parameters by 1-based index list.
    Fix,
    /// Set parameter bounds.
    SetLimit,
    /// Set print verbosity.
    SetPrint,
    /// Set the error-definition-related print level.
    SetError,
    /// Set the minimization strategy.
    SetStrategy,
    /// Set gradient mode (unsupported).
    SetGradient,
    /// Invoke the objective function once.
    CallFcn,
}

impl Command {
    /// Parse a command string by case-insensitive prefix. Returns `None`
    /// for anything outside the legacy vocabulary.
    pub fn parse(input: &str) -> Option<Self> {
        let upper = input.trim().to_ascii_uppercase();

        // Two-word commands first.
        if upper.starts_with("SET LIM") {
            return Some(Self::SetLimit);
        }
        if upper.starts_with("SET PRINT") {
            return Some(Self::SetPrint);
        }
        if upper.starts_with("SET ERR") {
            return Some(Self::SetError);
        }
        if upper.starts_with("SET STR") {
            return Some(Self::SetStrategy);
        }
        if upper.starts_with("SET GRA") {
            return Some(Self::SetGradient);
        }
        if upper.starts_with("CALL FCN") {
            return Some(Self::CallFcn);
        }

        // "MINI"/"MINO" need four characters to disambiguate from "MIG".
        if upper.starts_with("MINI") {
            return Some(Self::Minimize);
        }
        if upper.starts_with("MINO") {
            return Some(Self::Minos);
        }
        if upper.starts_with("MIG") {
            return Some(Self::Migrad);
        }
        if upper.starts_with("SIM") {
            return Some(Self::Simplex);
        }
        if upper.starts_with("SCA") {
            return Some(Self::Scan);
        }
        if upper.starts_with("HES") {
            return Some(Self::Hesse);
        }
        if upper.starts_with("FIX") {
            return Some(Self::Fix);
        }

        None
    }
}
