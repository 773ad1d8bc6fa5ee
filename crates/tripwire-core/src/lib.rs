//! Tripwire Core
//!
//! Core domain types, error handling and expression interpolation for
//! Tripwire. This crate has minimal dependencies and defines the shared
//! vocabulary used across all other crates.

pub mod error;
pub mod ids;
pub mod interpolation;
pub mod pipeline;
pub mod run;

pub use error::{Error, Result};
pub use ids::*;
