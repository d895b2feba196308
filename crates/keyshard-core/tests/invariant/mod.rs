//! Invariant tests module

pub mod registry_invariant;
