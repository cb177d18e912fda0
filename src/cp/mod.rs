//! The black-box CP subsolver: domains, the trail-based engine, and the
//! propagators that realize the constraint library's CP-side encodings.

pub(crate) mod constraints;
pub(crate) mod domain;
pub(crate) mod engine;
