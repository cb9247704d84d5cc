//! Authentication and authorization for the gateway.
//!
//! This module provides:
//! - The privilege model (ordered permission levels per resource category)
//! - Per-resource grant stores for accounts and projects
//! - Signed access tokens and persisted refresh tokens
//! - The authentication pipeline and the single authorization gate
//! - Axum middleware that attaches the verified principal to a request

mod events;
mod grants;
mod jwt;
mod middleware;
mod pipeline;
mod privilege;
mod reclaimer;
mod refresh;
/// Admin seeding and secret generation helpers.
pub mod setup;
mod users;

pub use events::{AssociationBroadcaster, AssociationEvent, AssociationKind, audit_associations};
pub use grants::{GrantCategory, GrantChange, GrantStores, ResourceGrantStore};
pub use jwt::{AccessClaims, IssuedToken, TokenIssuer, VerifiedToken};
pub use middleware::{AuthContext, RequireAuth, RouteGate, authenticate, gate, guarded};
pub use pipeline::{AuthService, LoginOutcome, RefreshOutcome};
pub use privilege::{
    Capability, GrantRequirement, PermissionLevel, Privilege, PrivilegeSet, ResourceCategory,
    required_level_for, satisfies,
};
pub use reclaimer::{ExpiryReclaimer, ReclaimerHandle};
pub use refresh::{RefreshToken, RefreshTokenStore};
pub use users::{
    Argon2Hasher, CredentialStore, Principal, PrincipalStore, PublicPrincipal, SecretHasher,
};

use tempora_core::{ConfigError, ValidationError};
use thiserror::Error;

/// Authentication and authorization errors.
///
/// Authentication failures (401) and authorization failures (403) never
/// share a status code.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown identifier, disabled account, or wrong secret.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// A protected endpoint was called without a bearer token.
    #[error("Authentication required")]
    AuthenticationRequired,

    /// Malformed token or bad signature.
    #[error("Invalid token: {0}")]
    TokenInvalid(String),

    /// Well-formed token past its expiry.
    #[error("Token expired")]
    TokenExpired,

    /// Refresh token does not exist.
    #[error("Refresh token not found")]
    RefreshTokenNotFound,

    /// Refresh token existed but had expired; the row has been removed.
    #[error("Refresh token expired")]
    RefreshTokenExpired,

    /// Permission level name could not be parsed.
    #[error("Unsupported permission level: {0}")]
    UnsupportedPermissionLevel(String),

    /// Resource category name could not be parsed.
    #[error("Unknown resource category: {0}")]
    UnknownCategory(String),

    /// Role or resource check failed.
    #[error("Permission denied: {0}")]
    AuthorizationDenied(String),

    /// Principal not found.
    #[error("Principal not found: {0}")]
    PrincipalNotFound(String),

    /// Principal already exists.
    #[error("Principal already exists: {0}")]
    PrincipalExists(String),

    /// Principal is still referenced by resource grants.
    #[error("Principal still has resource grants: {0}")]
    PrincipalInUse(String),

    /// Request input failed validation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Too many login attempts.
    #[error("Too many login attempts, try again later")]
    RateLimited,

    /// Backing store timed out or could not be reached.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),
}

impl AuthError {
    /// Whether this error is an authentication failure (as opposed to an
    /// authorization, input or infrastructure failure).
    #[must_use]
    pub const fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials
                | Self::AuthenticationRequired
                | Self::TokenInvalid(_)
                | Self::TokenExpired
                | Self::RefreshTokenNotFound
                | Self::RefreshTokenExpired
        )
    }
}

impl From<ValidationError> for AuthError {
    fn from(e: ValidationError) -> Self {
        Self::InvalidInput(e.to_string())
    }
}

impl From<ConfigError> for AuthError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<sled::Error> for AuthError {
    fn from(e: sled::Error) -> Self {
        match e {
            sled::Error::Io(io) => Self::StoreUnavailable(io.to_string()),
            other => Self::Storage(other.to_string()),
        }
    }
}
