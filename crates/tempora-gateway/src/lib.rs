//! # Tempora Gateway
//!
//! Authorization core and HTTP gateway: credential storage, bearer tokens,
//! refresh sessions, and role plus resource-grant checks.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Authentication and authorization.
pub mod auth;
mod rate_limit;
mod server;

pub use auth::{AuthError, AuthService};
pub use rate_limit::LoginRateLimiter;
pub use server::{Gateway, GatewayConfig, router};

/// Start the gateway server.
///
/// # Errors
///
/// Returns error if server fails to start.
pub async fn start(config: GatewayConfig) -> Result<(), GatewayError> {
    let gateway = Gateway::new(config)?;
    gateway.run().await
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Server error.
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Authorization core error.
    #[error(transparent)]
    Auth(#[from] AuthError),
}
