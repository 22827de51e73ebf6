//! Compute module - Evolutionary search and candidate evaluation.

pub mod evolution;
