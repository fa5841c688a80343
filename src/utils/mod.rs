//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `peril` crate.
//!
//! This module centralizes the broker-level error types and the logging
//! bootstrap so every other module reports failures the same way.

pub mod error;
pub mod logging;
