//! Error kinds (§7): user-input and subsolver failures surfaced as a typed
//! enum rather than process aborts, matching how the rest of this crate's
//! lineage reports fallible model construction.

use thiserror::Error;

use crate::IntVal;

/// Errors reported by fallible model-construction and solve entry points.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// `lb > ub` was passed to a variable constructor.
    #[error("invalid bounds: lb={lb} > ub={ub}")]
    InvalidBounds {
        /// The (invalid) requested lower bound.
        lb: IntVal,
        /// The (invalid) requested upper bound.
        ub: IntVal,
    },
    /// A linear constraint's coefficient vector length does not match its
    /// variable vector.
    #[error("coefficient vector length {coeffs} does not match variable count {vars}")]
    CoefficientLengthMismatch {
        /// Number of coefficients supplied.
        coeffs: usize,
        /// Number of variables supplied.
        vars: usize,
    },
    /// A conflict atom decoded to no known Boolean or integer variable.
    #[error("conflict atom referenced an unknown variable")]
    LostLiteral,
    /// The underlying MIP engine returned a non-recoverable error.
    #[error("MIP subsolver error: {0}")]
    Subsolver(String),
}
