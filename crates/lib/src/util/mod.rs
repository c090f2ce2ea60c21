//! Shared utilities.
//!
//! Content hashing for resource checksums, plus test helpers.

pub mod hash;

#[cfg(test)]
pub mod testutil;
