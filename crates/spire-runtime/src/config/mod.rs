//! Configuration module for the Spire runtime.
//!
//! This module provides layered configuration loading (files, environment,
//! programmatic overrides) and validation for logging, the server listener
//! and the channels broadcaster.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile};
pub use schema::{
    LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, ServerConfig, SpanEventConfig,
    SpireConfig,
};
pub use validation::validate_config;
