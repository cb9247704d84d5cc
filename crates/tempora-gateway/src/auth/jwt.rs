//! Signed access tokens.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use tempora_core::PrincipalId;

use super::AuthError;
use super::privilege::{PermissionLevel, Privilege, PrivilegeSet, ResourceCategory};

/// Access token claims.
///
/// Privileges are carried as compact `[category, rank]` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (login identifier).
    pub sub: String,
    /// Stable principal id.
    pub uid: u64,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration (Unix timestamp).
    pub exp: i64,
    /// Global privileges at issuance.
    #[serde(default)]
    pub privs: Vec<(ResourceCategory, u8)>,
}

/// A freshly minted access token.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    /// Encoded token.
    pub token: String,
    /// Issuance time.
    pub issued_at: DateTime<Utc>,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
}

/// Decoded contents of a verified access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    /// Login identifier.
    pub subject: String,
    /// Stable principal id.
    pub principal_id: PrincipalId,
    /// Privilege snapshot taken at issuance.
    pub privileges: PrivilegeSet,
    /// Issuance time.
    pub issued_at: DateTime<Utc>,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies HS256 access tokens.
///
/// Verification never touches storage; the embedded claims are trusted
/// until they expire.
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenIssuer {
    /// Create an issuer from a signing key.
    #[must_use]
    pub fn new(secret: &SecretBox<Vec<u8>>, ttl: Duration) -> Self {
        Self::from_secret(secret.expose_secret(), ttl)
    }

    /// Create an issuer from raw key bytes.
    #[must_use]
    pub fn from_secret(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked in verify_at so that exp == now counts as expired
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::from(["exp".to_string(), "sub".to_string()]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    /// Access token lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token valid from now.
    ///
    /// # Errors
    ///
    /// Returns error if encoding fails.
    pub fn issue(
        &self,
        subject: &str,
        principal_id: PrincipalId,
        privileges: &PrivilegeSet,
    ) -> Result<IssuedToken, AuthError> {
        self.issue_at(subject, principal_id, privileges, Utc::now())
    }

    /// Issue a token as if the current time were `now`.
    ///
    /// # Errors
    ///
    /// Returns error if the expiry overflows or encoding fails.
    pub fn issue_at(
        &self,
        subject: &str,
        principal_id: PrincipalId,
        privileges: &PrivilegeSet,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthError> {
        let expires_at = TimeDelta::from_std(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| AuthError::Config("Access token TTL out of range".to_string()))?;

        let claims = AccessClaims {
            sub: subject.to_string(),
            uid: principal_id.get(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            privs: privileges
                .iter()
                .map(|p| (p.category, p.level.rank()))
                .collect(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Config(format!("Token encoding failed: {e}")))?;

        Ok(IssuedToken {
            token,
            issued_at: now,
            expires_at,
        })
    }

    /// Verify a token against the current time.
    ///
    /// # Errors
    ///
    /// Returns `TokenInvalid` for malformed or tampered tokens and
    /// `TokenExpired` for authentic tokens past their expiry.
    pub fn verify(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify a token as if the current time were `now`.
    ///
    /// # Errors
    ///
    /// Same as [`TokenIssuer::verify`].
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<VerifiedToken, AuthError> {
        let claims = decode::<AccessClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::TokenInvalid(e.to_string()),
            })?
            .claims;

        if claims.exp <= now.timestamp() {
            return Err(AuthError::TokenExpired);
        }

        let privileges = claims
            .privs
            .iter()
            .map(|&(category, rank)| {
                PermissionLevel::from_rank(rank)
                    .map(|level| Privilege::new(category, level))
                    .ok_or_else(|| {
                        AuthError::TokenInvalid(format!("Unknown privilege rank {rank}"))
                    })
            })
            .collect::<Result<PrivilegeSet, _>>()?;

        let issued_at = DateTime::from_timestamp(claims.iat, 0)
            .ok_or_else(|| AuthError::TokenInvalid("Issued-at out of range".to_string()))?;
        let expires_at = DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| AuthError::TokenInvalid("Expiry out of range".to_string()))?;

        Ok(VerifiedToken {
            subject: claims.sub,
            principal_id: PrincipalId::new(claims.uid),
            privileges,
            issued_at,
            expires_at,
        })
    }

    /// Extract the token from an `Authorization` header value.
    ///
    /// Expects format: "Bearer <token>"
    #[must_use]
    pub fn extract_from_header(header: &str) -> Option<&str> {
        header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn issuer() -> TokenIssuer {
        TokenIssuer::from_secret(SECRET, Duration::from_secs(900))
    }

    fn privileges() -> PrivilegeSet {
        [
            Privilege::new(ResourceCategory::Project, PermissionLevel::Write),
            Privilege::new(ResourceCategory::Post, PermissionLevel::Read),
        ]
        .into_iter()
        .collect()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_issue_then_verify_returns_claims() {
        let issuer = issuer();
        let issued = issuer
            .issue("alice@example.com", PrincipalId::new(7), &privileges())
            .unwrap();

        let verified = issuer.verify(&issued.token).unwrap();
        assert_eq!(verified.subject, "alice@example.com");
        assert_eq!(verified.principal_id, PrincipalId::new(7));
        assert_eq!(verified.privileges, privileges());
        assert_eq!(verified.expires_at.timestamp(), issued.expires_at.timestamp());
    }

    #[test]
    fn test_expiry_boundary_is_strict() {
        let issuer = issuer();
        let now = at(1_700_000_000);
        let issued = issuer
            .issue_at("alice", PrincipalId::new(1), &PrivilegeSet::new(), now)
            .unwrap();

        let just_before = now + TimeDelta::seconds(899);
        let exactly = now + TimeDelta::seconds(900);
        let after = now + TimeDelta::seconds(901);

        assert!(issuer.verify_at(&issued.token, just_before).is_ok());
        assert!(matches!(
            issuer.verify_at(&issued.token, exactly),
            Err(AuthError::TokenExpired)
        ));
        assert!(matches!(
            issuer.verify_at(&issued.token, after),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn test_expired_and_invalid_are_distinct() {
        let issuer = issuer();
        let issued = issuer
            .issue_at("alice", PrincipalId::new(1), &PrivilegeSet::new(), at(1_000))
            .unwrap();

        assert!(matches!(
            issuer.verify(&issued.token),
            Err(AuthError::TokenExpired)
        ));
        assert!(matches!(
            issuer.verify("invalid.token.here"),
            Err(AuthError::TokenInvalid(_))
        ));
    }

    #[test]
    fn test_issue_failures_are_config_errors() {
        let issuer = TokenIssuer::from_secret(SECRET, Duration::MAX);
        let err = issuer
            .issue_at("alice", PrincipalId::new(1), &PrivilegeSet::new(), at(1_000))
            .unwrap_err();
        assert!(matches!(err, AuthError::Config(_)));
    }

    #[test]
    fn test_wrong_key_is_invalid_not_expired() {
        let issued = issuer()
            .issue_at("alice", PrincipalId::new(1), &PrivilegeSet::new(), at(1_000))
            .unwrap();
        let other = TokenIssuer::from_secret(
            b"another-key-another-key-another!!",
            Duration::from_secs(900),
        );

        // Signature is checked before expiry
        assert!(matches!(
            other.verify(&issued.token),
            Err(AuthError::TokenInvalid(_))
        ));
    }

    #[test]
    fn test_tampered_payload_is_invalid() {
        let issuer = issuer();
        let issued = issuer
            .issue("alice", PrincipalId::new(1), &privileges())
            .unwrap();

        let mut parts: Vec<String> = issued.token.split('.').map(String::from).collect();
        parts[1].insert(0, 'A');
        let tampered = parts.join(".");

        assert!(matches!(
            issuer.verify(&tampered),
            Err(AuthError::TokenInvalid(_))
        ));
    }

    #[test]
    fn test_claims_use_compact_privileges() {
        let issuer = issuer();
        let issued = issuer
            .issue("alice", PrincipalId::new(3), &privileges())
            .unwrap();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        let raw = decode::<serde_json::Value>(
            &issued.token,
            &DecodingKey::from_secret(SECRET),
            &validation,
        )
        .unwrap()
        .claims;

        assert_eq!(raw["sub"], "alice");
        assert_eq!(raw["uid"], 3);
        assert_eq!(raw["privs"], serde_json::json!([["project", 3], ["post", 1]]));
    }

    #[test]
    fn test_issue_is_deterministic_for_fixed_clock() {
        let issuer = issuer();
        let now = at(1_700_000_000);
        let a = issuer
            .issue_at("alice", PrincipalId::new(1), &privileges(), now)
            .unwrap();
        let b = issuer
            .issue_at("alice", PrincipalId::new(1), &privileges(), now)
            .unwrap();
        assert_eq!(a.token, b.token);
    }

    #[test]
    fn test_extract_from_header() {
        assert_eq!(TokenIssuer::extract_from_header("Bearer abc123"), Some("abc123"));
        assert_eq!(TokenIssuer::extract_from_header("bearer abc123"), Some("abc123"));
        assert_eq!(TokenIssuer::extract_from_header("Bearer   "), None);
        assert_eq!(TokenIssuer::extract_from_header("abc123"), None);
    }

    #[test]
    fn test_debug_hides_keys() {
        let debug = format!("{:?}", issuer());
        assert!(!debug.contains("0123456789abcdef"));
        assert!(debug.contains("ttl"));
    }
}
