//! Authentication pipeline and the authorization gate.
//!
//! Every store call runs on the blocking pool under the configured store
//! timeout. A call that times out or whose task dies surfaces as
//! `StoreUnavailable`, never as a credential failure.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use tempora_core::validation::validate_secret;
use tempora_core::{AuthConfig, PrincipalId, ResourceId, normalize_identifier};
use tokio::sync::Mutex;

use super::AuthError;
use super::events::AssociationBroadcaster;
use super::grants::{GrantCategory, GrantChange, GrantStores};
use super::jwt::{IssuedToken, TokenIssuer};
use super::middleware::AuthContext;
use super::privilege::{Capability, PermissionLevel, PrivilegeSet, satisfies};
use super::reclaimer::ExpiryReclaimer;
use super::refresh::{RefreshToken, RefreshTokenStore};
use super::users::{
    Argon2Hasher, CredentialStore, Principal, PrincipalStore, PublicPrincipal, SecretHasher,
};
use crate::rate_limit::LoginRateLimiter;

/// Secret whose hash stands in for principals that cannot log in.
const DECOY_SECRET: &str = "tempora-decoy-secret";

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    /// Access token for the `Authorization` header.
    pub access: IssuedToken,
    /// Refresh token for the response body.
    pub refresh: RefreshToken,
    /// The logged-in principal.
    pub principal: PublicPrincipal,
}

/// Result of a successful refresh.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    /// New access token.
    pub access: IssuedToken,
    /// Replacement refresh token, when rotation is enabled.
    pub refresh: Option<RefreshToken>,
}

/// Orchestrates login, verification, refresh and logout, and owns the
/// single authorization check.
pub struct AuthService {
    principals: Arc<dyn CredentialStore>,
    hasher: Arc<dyn SecretHasher>,
    decoy_hash: Arc<OnceLock<String>>,
    issuer: TokenIssuer,
    refresh_tokens: RefreshTokenStore,
    grants: GrantStores,
    events: AssociationBroadcaster,
    limiter: LoginRateLimiter,
    membership: Arc<Mutex<()>>,
    token_header: String,
    store_timeout: Duration,
    reclaim_interval: Duration,
    rotate_refresh_tokens: bool,
    recheck_principal: bool,
}

impl AuthService {
    /// Build the service over an open database.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or a table cannot be
    /// opened.
    pub fn new(config: &AuthConfig, db: &sled::Db) -> Result<Self, AuthError> {
        config.validate()?;
        let signing_key = config.signing_key()?;
        let events = AssociationBroadcaster::new();

        Ok(Self {
            principals: Arc::new(PrincipalStore::open(db)?),
            hasher: Arc::new(Argon2Hasher),
            decoy_hash: Arc::new(OnceLock::new()),
            issuer: TokenIssuer::new(&signing_key, config.access_token_ttl()),
            refresh_tokens: RefreshTokenStore::open(db, config.refresh_token_ttl())?,
            grants: GrantStores::open(db, &events)?,
            events,
            limiter: LoginRateLimiter::new(config.login_attempts_per_minute),
            membership: Arc::new(Mutex::new(())),
            token_header: config.token_header.to_ascii_lowercase(),
            store_timeout: config.store_timeout(),
            reclaim_interval: config.reclaim_interval(),
            rotate_refresh_tokens: config.rotate_refresh_tokens,
            recheck_principal: config.recheck_principal,
        })
    }

    /// Replace the secret hasher.
    #[must_use]
    pub fn with_hasher(mut self, hasher: Arc<dyn SecretHasher>) -> Self {
        self.hasher = hasher;
        self.decoy_hash = Arc::new(OnceLock::new());
        self
    }

    /// Replace the credential store.
    #[must_use]
    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.principals = store;
        self
    }

    /// Header carrying the bearer token (lowercase).
    #[must_use]
    pub fn token_header(&self) -> &str {
        &self.token_header
    }

    /// Association event channel.
    #[must_use]
    pub const fn events(&self) -> &AssociationBroadcaster {
        &self.events
    }

    /// Credential store.
    #[must_use]
    pub fn principals(&self) -> &Arc<dyn CredentialStore> {
        &self.principals
    }

    /// Refresh token store.
    #[must_use]
    pub const fn refresh_tokens(&self) -> &RefreshTokenStore {
        &self.refresh_tokens
    }

    /// Token issuer.
    #[must_use]
    pub const fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Reclaimer for this service's refresh tokens.
    #[must_use]
    pub fn reclaimer(&self) -> ExpiryReclaimer {
        ExpiryReclaimer::new(self.refresh_tokens.clone(), self.reclaim_interval)
    }

    // ------------------------------------------------------------------
    // Authentication
    // ------------------------------------------------------------------

    /// Check credentials and mint an access token and a refresh token.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredentials` for an unknown identifier, a disabled
    /// principal or a wrong secret alike, and `RateLimited` when the
    /// identifier has exhausted its attempts. The secret is checked against
    /// a stored or a decoy hash in every case, so all three failures cost
    /// the same.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<LoginOutcome, AuthError> {
        let Ok(identifier) = normalize_identifier(identifier) else {
            return Err(AuthError::InvalidCredentials);
        };

        if !self.limiter.check(&identifier) {
            tracing::warn!(identifier = %identifier, "Login rate limited");
            return Err(AuthError::RateLimited);
        }

        let store = Arc::clone(&self.principals);
        let lookup = identifier.clone();
        let principal = self
            .store_call(move || store.lookup(&lookup))
            .await?
            .filter(|p| p.enabled);

        let verified = self
            .verify_secret(
                SecretString::from(secret),
                principal.as_ref().map(|p| p.password_hash.clone()),
            )
            .await?;

        let Some(mut principal) = principal.filter(|_| verified) else {
            tracing::info!(identifier = %identifier, "Login rejected");
            return Err(AuthError::InvalidCredentials);
        };

        let access = self
            .issuer
            .issue(&principal.identifier, principal.id, &principal.privileges)?;

        principal.last_login = Some(Utc::now());
        let store = Arc::clone(&self.principals);
        let refresh_tokens = self.refresh_tokens.clone();
        let (principal, refresh) = self
            .store_call(move || {
                store.update(&principal)?;
                let refresh = refresh_tokens.issue(&principal.identifier)?;
                Ok((principal, refresh))
            })
            .await?;

        tracing::info!(
            identifier = %principal.identifier,
            principal_id = %principal.id,
            "Login succeeded"
        );

        Ok(LoginOutcome {
            access,
            refresh,
            principal: principal.to_public(),
        })
    }

    /// Verify a bearer token and build the request context.
    ///
    /// # Errors
    ///
    /// Returns `TokenInvalid` or `TokenExpired`. With principal rechecks
    /// enabled, a missing or disabled principal is `TokenInvalid`.
    pub async fn authenticate(&self, token: &str) -> Result<AuthContext, AuthError> {
        let verified = self.issuer.verify(token)?;
        let mut context = AuthContext::from(verified);

        if self.recheck_principal {
            let store = Arc::clone(&self.principals);
            let id = context.principal_id;
            match self.store_call(move || store.get(id)).await? {
                Some(principal) if principal.enabled => context.privileges = principal.privileges,
                _ => {
                    return Err(AuthError::TokenInvalid(
                        "Principal is no longer active".to_string(),
                    ));
                }
            }
        }

        Ok(context)
    }

    /// Authenticate from a raw header value.
    ///
    /// An absent header means an unauthenticated request, not an error.
    ///
    /// # Errors
    ///
    /// Returns `TokenInvalid` if the header is not a bearer token, otherwise
    /// the errors of [`AuthService::authenticate`].
    pub async fn authenticate_header(
        &self,
        header: Option<&str>,
    ) -> Result<Option<AuthContext>, AuthError> {
        let Some(value) = header else {
            return Ok(None);
        };

        let token = TokenIssuer::extract_from_header(value)
            .ok_or_else(|| AuthError::TokenInvalid("Malformed authorization header".to_string()))?;

        self.authenticate(token).await.map(Some)
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// # Errors
    ///
    /// Returns `RefreshTokenNotFound` or `RefreshTokenExpired` for a bad
    /// token and `InvalidCredentials` if the owner is gone or disabled.
    pub async fn refresh(&self, token: &str) -> Result<RefreshOutcome, AuthError> {
        let refresh_tokens = self.refresh_tokens.clone();
        let presented = token.to_string();
        let record = self
            .store_call(move || refresh_tokens.validate(&presented))
            .await?;

        let store = Arc::clone(&self.principals);
        let owner = record.owner.clone();
        let Some(principal) = self
            .store_call(move || store.lookup(&owner))
            .await?
            .filter(|p| p.enabled)
        else {
            tracing::info!(identifier = %record.owner, "Refresh rejected for inactive principal");
            return Err(AuthError::InvalidCredentials);
        };

        let access = self
            .issuer
            .issue(&principal.identifier, principal.id, &principal.privileges)?;

        let refresh = if self.rotate_refresh_tokens {
            let refresh_tokens = self.refresh_tokens.clone();
            let owner = principal.identifier.clone();
            let rotated = self
                .store_call(move || {
                    // Only one concurrent refresh may rotate a token
                    if !refresh_tokens.revoke(&record.token)? {
                        return Err(AuthError::RefreshTokenNotFound);
                    }
                    refresh_tokens.issue(&owner)
                })
                .await?;
            Some(rotated)
        } else {
            None
        };

        tracing::info!(
            identifier = %principal.identifier,
            rotated = refresh.is_some(),
            "Access token refreshed"
        );

        Ok(RefreshOutcome { access, refresh })
    }

    /// Revoke a refresh token. Revoking an unknown token succeeds.
    ///
    /// # Errors
    ///
    /// Returns error only if the store is unavailable.
    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        let refresh_tokens = self.refresh_tokens.clone();
        let token = token.to_string();
        let removed = self
            .store_call(move || refresh_tokens.revoke(&token))
            .await?;
        tracing::info!(removed, "Logout");
        Ok(())
    }

    /// Revoke every refresh token of the caller.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable.
    pub async fn logout_all(&self, ctx: &AuthContext) -> Result<usize, AuthError> {
        let removed = self.revoke_sessions(ctx.subject.clone()).await?;
        tracing::info!(identifier = %ctx.subject, removed, "Logged out everywhere");
        Ok(removed)
    }

    /// Change the caller's secret and revoke their refresh tokens.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredentials` if `current` is wrong and `InvalidInput`
    /// if `new_secret` fails validation.
    pub async fn change_password(
        &self,
        ctx: &AuthContext,
        current: &str,
        new_secret: &str,
    ) -> Result<(), AuthError> {
        validate_secret(new_secret)?;

        let store = Arc::clone(&self.principals);
        let id = ctx.principal_id;
        let mut principal = self
            .store_call(move || store.get(id))
            .await?
            .ok_or_else(|| AuthError::PrincipalNotFound(ctx.subject.clone()))?;

        if !self
            .verify_secret(
                SecretString::from(current),
                Some(principal.password_hash.clone()),
            )
            .await?
        {
            return Err(AuthError::InvalidCredentials);
        }

        principal.password_hash = self.hash_secret(SecretString::from(new_secret)).await?;
        let identifier = principal.identifier.clone();
        self.save_and_revoke(principal).await?;

        tracing::info!(identifier = %identifier, "Secret changed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Authorization
    // ------------------------------------------------------------------

    /// The single gatekeeping check.
    ///
    /// The global privilege must cover the capability's category and level.
    /// If the capability also carries a grant requirement, the principal's
    /// grant on `resource` must satisfy it as well.
    ///
    /// # Errors
    ///
    /// Returns `AuthorizationDenied` when either check fails.
    pub async fn authorize(
        &self,
        ctx: &AuthContext,
        capability: &Capability,
        resource: Option<ResourceId>,
    ) -> Result<(), AuthError> {
        if !satisfies(&ctx.privileges, capability.category, capability.level) {
            tracing::debug!(
                principal_id = %ctx.principal_id,
                category = %capability.category,
                level = %capability.level,
                "Role check failed"
            );
            return Err(AuthError::AuthorizationDenied(format!(
                "requires {}:{}",
                capability.category, capability.level
            )));
        }

        let Some(requirement) = capability.grant else {
            return Ok(());
        };

        let resource = resource.ok_or_else(|| {
            AuthError::InvalidInput(format!("Missing {} id", requirement.category))
        })?;

        let store = self.grants.get(requirement.category).clone();
        let principal = ctx.principal_id;
        let granted = self
            .store_call(move || store.level_of(resource, principal))
            .await?;

        match granted {
            Some(level) if level.satisfies(requirement.level) => Ok(()),
            _ => {
                tracing::debug!(
                    principal_id = %ctx.principal_id,
                    resource_id = %resource,
                    category = %requirement.category,
                    "Grant check failed"
                );
                Err(AuthError::AuthorizationDenied(format!(
                    "requires {} on {} {resource}",
                    requirement.level, requirement.category
                )))
            }
        }
    }

    /// Resources of a category the caller holds any grant on.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable.
    pub async fn visible_resources(
        &self,
        ctx: &AuthContext,
        category: GrantCategory,
    ) -> Result<BTreeSet<ResourceId>, AuthError> {
        let store = self.grants.get(category).clone();
        let principal = ctx.principal_id;
        self.store_call(move || store.resource_ids_visible_to(principal))
            .await
    }

    // ------------------------------------------------------------------
    // Memberships
    // ------------------------------------------------------------------

    /// Associate a principal with a resource.
    ///
    /// # Errors
    ///
    /// Returns `PrincipalNotFound` if the principal does not exist.
    pub async fn grant_member(
        &self,
        category: GrantCategory,
        resource: ResourceId,
        principal: PrincipalId,
        level: PermissionLevel,
    ) -> Result<GrantChange, AuthError> {
        let principals = Arc::clone(&self.principals);
        let store = self.grants.get(category).clone();
        // Held until the blocking task finishes, even if the caller times out
        let guard = Arc::clone(&self.membership).lock_owned().await;
        self.store_call(move || {
            let _guard = guard;
            if principals.get(principal)?.is_none() {
                return Err(AuthError::PrincipalNotFound(principal.to_string()));
            }
            store.grant(resource, principal, level)
        })
        .await
    }

    /// Remove an association. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable.
    pub async fn revoke_member(
        &self,
        category: GrantCategory,
        resource: ResourceId,
        principal: PrincipalId,
    ) -> Result<bool, AuthError> {
        let store = self.grants.get(category).clone();
        self.store_call(move || store.revoke(resource, principal))
            .await
    }

    /// Level a principal holds on a resource.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable.
    pub async fn member_level(
        &self,
        category: GrantCategory,
        resource: ResourceId,
        principal: PrincipalId,
    ) -> Result<Option<PermissionLevel>, AuthError> {
        let store = self.grants.get(category).clone();
        self.store_call(move || store.level_of(resource, principal))
            .await
    }

    /// Every association on a resource.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable.
    pub async fn members(
        &self,
        category: GrantCategory,
        resource: ResourceId,
    ) -> Result<Vec<(PrincipalId, PermissionLevel)>, AuthError> {
        let store = self.grants.get(category).clone();
        self.store_call(move || store.members_of(resource)).await
    }

    /// Drop every association on a deleted resource.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable.
    pub async fn delete_resource(
        &self,
        category: GrantCategory,
        resource: ResourceId,
    ) -> Result<usize, AuthError> {
        let store = self.grants.get(category).clone();
        let removed = self
            .store_call(move || store.revoke_resource(resource))
            .await?;
        tracing::info!(%category, resource_id = %resource, removed, "Resource grants removed");
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Principal administration
    // ------------------------------------------------------------------

    /// Create a principal.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a bad identifier or secret and
    /// `PrincipalExists` if the identifier is taken.
    pub async fn create_principal(
        &self,
        identifier: &str,
        secret: &str,
        privileges: PrivilegeSet,
    ) -> Result<PublicPrincipal, AuthError> {
        let identifier = normalize_identifier(identifier)?;
        validate_secret(secret)?;

        let hash = self.hash_secret(SecretString::from(secret)).await?;
        let store = Arc::clone(&self.principals);
        let principal = self
            .store_call(move || store.create(&identifier, hash, privileges))
            .await?;

        tracing::info!(
            identifier = %principal.identifier,
            principal_id = %principal.id,
            "Principal created"
        );
        Ok(principal.to_public())
    }

    /// All principals.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable.
    pub async fn list_principals(&self) -> Result<Vec<PublicPrincipal>, AuthError> {
        let store = Arc::clone(&self.principals);
        let principals = self.store_call(move || store.list()).await?;
        Ok(principals.iter().map(Principal::to_public).collect())
    }

    /// Look up one principal.
    ///
    /// # Errors
    ///
    /// Returns `PrincipalNotFound` if absent.
    pub async fn get_principal(&self, identifier: &str) -> Result<PublicPrincipal, AuthError> {
        Ok(self.principal_by_identifier(identifier).await?.to_public())
    }

    /// Enable or disable a principal. Disabling revokes its refresh tokens.
    ///
    /// # Errors
    ///
    /// Returns `PrincipalNotFound` if absent.
    pub async fn set_enabled(
        &self,
        identifier: &str,
        enabled: bool,
    ) -> Result<PublicPrincipal, AuthError> {
        let mut principal = self.principal_by_identifier(identifier).await?;
        principal.enabled = enabled;
        let public = principal.to_public();

        if enabled {
            let store = Arc::clone(&self.principals);
            self.store_call(move || store.update(&principal)).await?;
        } else {
            self.save_and_revoke(principal).await?;
        }

        tracing::info!(identifier = %public.identifier, enabled, "Principal enabled flag changed");
        Ok(public)
    }

    /// Replace a principal's global privileges.
    ///
    /// Tokens already issued keep their snapshot until they expire.
    ///
    /// # Errors
    ///
    /// Returns `PrincipalNotFound` if absent.
    pub async fn set_privileges(
        &self,
        identifier: &str,
        privileges: PrivilegeSet,
    ) -> Result<PublicPrincipal, AuthError> {
        let mut principal = self.principal_by_identifier(identifier).await?;
        principal.privileges = privileges;
        let public = principal.to_public();

        let store = Arc::clone(&self.principals);
        self.store_call(move || store.update(&principal)).await?;

        tracing::info!(identifier = %public.identifier, "Principal privileges replaced");
        Ok(public)
    }

    /// Set a new secret without the current one and revoke refresh tokens.
    ///
    /// # Errors
    ///
    /// Returns `PrincipalNotFound` if absent, `InvalidInput` for a weak
    /// secret.
    pub async fn reset_secret(&self, identifier: &str, new_secret: &str) -> Result<(), AuthError> {
        validate_secret(new_secret)?;
        let mut principal = self.principal_by_identifier(identifier).await?;
        principal.password_hash = self.hash_secret(SecretString::from(new_secret)).await?;
        let identifier = principal.identifier.clone();
        let revoked = self.save_and_revoke(principal).await?;

        tracing::info!(identifier = %identifier, revoked, "Secret reset");
        Ok(())
    }

    /// Delete a principal.
    ///
    /// With `cascade` the principal's account and project grants are
    /// removed first. Returns the number of grants removed.
    ///
    /// # Errors
    ///
    /// Returns `PrincipalInUse` without `cascade` while any account or
    /// project grant references it.
    pub async fn delete_principal(
        &self,
        identifier: &str,
        cascade: bool,
    ) -> Result<usize, AuthError> {
        let principal = self.principal_by_identifier(identifier).await?;

        let principals = Arc::clone(&self.principals);
        let refresh_tokens = self.refresh_tokens.clone();
        let grants = self.grants.clone();
        let guard = Arc::clone(&self.membership).lock_owned().await;
        self.store_call(move || {
            let _guard = guard;
            let mut removed = 0;
            for category in GrantCategory::ALL {
                let store = grants.get(category);
                if cascade {
                    removed += store.revoke_principal(principal.id)?;
                } else if !store.resource_ids_visible_to(principal.id)?.is_empty() {
                    return Err(AuthError::PrincipalInUse(principal.identifier));
                }
            }
            refresh_tokens.revoke_all(&principal.identifier)?;
            principals.delete(principal.id)?;
            tracing::info!(
                identifier = %principal.identifier,
                grants_removed = removed,
                "Principal deleted"
            );
            Ok(removed)
        })
        .await
    }

    /// Revoke every refresh token of a principal.
    ///
    /// # Errors
    ///
    /// Returns `PrincipalNotFound` if absent.
    pub async fn revoke_all_for(&self, identifier: &str) -> Result<usize, AuthError> {
        let principal = self.principal_by_identifier(identifier).await?;
        let revoked = self.revoke_sessions(principal.identifier.clone()).await?;
        tracing::info!(identifier = %principal.identifier, revoked, "Refresh tokens revoked");
        Ok(revoked)
    }

    /// Run one reclamation pass now.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable.
    pub async fn reclaim_expired(&self) -> Result<usize, AuthError> {
        let reclaimer = self.reclaimer();
        self.store_call(move || reclaimer.run_once()).await
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn principal_by_identifier(&self, identifier: &str) -> Result<Principal, AuthError> {
        let store = Arc::clone(&self.principals);
        let lookup = identifier.to_string();
        self.store_call(move || store.lookup(&lookup))
            .await?
            .ok_or_else(|| AuthError::PrincipalNotFound(identifier.to_string()))
    }

    async fn revoke_sessions(&self, owner: String) -> Result<usize, AuthError> {
        let refresh_tokens = self.refresh_tokens.clone();
        self.store_call(move || refresh_tokens.revoke_all(&owner))
            .await
    }

    async fn save_and_revoke(&self, principal: Principal) -> Result<usize, AuthError> {
        let store = Arc::clone(&self.principals);
        let refresh_tokens = self.refresh_tokens.clone();
        self.store_call(move || {
            store.update(&principal)?;
            refresh_tokens.revoke_all(&principal.identifier)
        })
        .await
    }

    /// Check `secret` against `hash`, or against the decoy hash when there
    /// is no principal to check against. The decoy check always fails.
    async fn verify_secret(
        &self,
        secret: SecretString,
        hash: Option<String>,
    ) -> Result<bool, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        let decoy_hash = Arc::clone(&self.decoy_hash);
        tokio::task::spawn_blocking(move || match hash {
            Some(hash) => hasher.verify(secret.expose_secret(), &hash),
            None => {
                let decoy =
                    decoy_hash.get_or_init(|| hasher.hash(DECOY_SECRET).unwrap_or_default());
                let _ = hasher.verify(secret.expose_secret(), decoy);
                false
            }
        })
        .await
            .map_err(|e| AuthError::Storage(format!("Hash task failed: {e}")))
    }

    async fn hash_secret(&self, secret: SecretString) -> Result<String, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || hasher.hash(secret.expose_secret()))
            .await
            .map_err(|e| AuthError::Storage(format!("Hash task failed: {e}")))?
    }

    /// Run a blocking store operation under the store deadline.
    async fn store_call<T, F>(&self, op: F) -> Result<T, AuthError>
    where
        F: FnOnce() -> Result<T, AuthError> + Send + 'static,
        T: Send + 'static,
    {
        match tokio::time::timeout(self.store_timeout, tokio::task::spawn_blocking(op)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(AuthError::StoreUnavailable(format!("Store task failed: {e}"))),
            Err(_) => {
                tracing::warn!(timeout_ms = self.store_timeout.as_millis(), "Store call timed out");
                Err(AuthError::StoreUnavailable("Store call timed out".to_string()))
            }
        }
    }
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("issuer", &self.issuer)
            .field("token_header", &self.token_header)
            .field("store_timeout", &self.store_timeout)
            .field("rotate_refresh_tokens", &self.rotate_refresh_tokens)
            .field("recheck_principal", &self.recheck_principal)
            .finish_non_exhaustive()
    }
}
