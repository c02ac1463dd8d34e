//! Core shared library for the ad automation rule engine.
//!
//! This crate exposes the primitives every other crate depends on: the
//! canonical error type, configuration loading, database pooling and the
//! tracing setup used by the binaries.

pub mod config;
pub mod db;
pub mod errors;
pub mod logging;

pub use config::{CoreConfig, Environment};
pub use errors::{AdRulesError, ConfigError, Result as CoreResult};
