//! # Tempora Core
//!
//! Core types and configuration for Tempora.
//!
//! This crate provides:
//! - Stable identifiers for principals and resources
//! - Configuration loading and validation (JSON5 format)
//! - Login identifier validation and normalization

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod types;
pub mod validation;

pub use config::{AuthConfig, AuthConfigBuilder, Config, ConfigError};
pub use types::{PrincipalId, ResourceId};
pub use validation::{ValidationError, normalize_identifier};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{AuthConfig, Config};
    pub use crate::types::*;
    pub use crate::validation::normalize_identifier;
}
