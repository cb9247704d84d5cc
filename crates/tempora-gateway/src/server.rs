//! Gateway server.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header::AUTHORIZATION},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempora_core::{AuthConfig, Config, PrincipalId, ResourceId};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::GatewayError;
use crate::auth::{
    AuthContext, AuthError, AuthService, Capability, GrantCategory, GrantChange, PermissionLevel,
    Privilege, PrivilegeSet, PublicPrincipal, RequireAuth, ResourceCategory, RouteGate,
    audit_associations, authenticate, gate, guarded, required_level_for,
    setup::auto_setup_from_env,
};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Port to listen on.
    pub port: u16,
    /// Bind address.
    pub bind_address: String,
    /// Enable CORS.
    pub cors: bool,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Data directory for persistent storage.
    pub data_dir: PathBuf,
    /// Authentication configuration.
    pub auth: AuthConfig,
}

impl GatewayConfig {
    /// Build from a loaded configuration file.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            port: config.gateway.port,
            bind_address: config.gateway.bind_address(),
            cors: config.gateway.cors,
            request_timeout: Duration::from_secs(config.gateway.timeout_secs),
            data_dir: config.data_dir(),
            auth: config.auth.clone(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Gateway server.
pub struct Gateway {
    config: GatewayConfig,
    auth: Arc<AuthService>,
}

impl Gateway {
    /// Open storage and build the authentication service.
    ///
    /// # Errors
    ///
    /// Returns error if the data directory cannot be created, the database
    /// cannot be opened, or the auth configuration is invalid.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| GatewayError::Config(format!("Failed to create data dir: {e}")))?;

        let db = sled::open(config.data_dir.join("auth"))
            .map_err(|e| GatewayError::Server(format!("Failed to open auth database: {e}")))?;

        let auth_config = config.auth.clone().with_env_overrides();
        let auth = AuthService::new(&auth_config, &db)
            .map_err(|e| GatewayError::Config(format!("Auth init failed: {e}")))?;

        Ok(Self::with_auth(config, Arc::new(auth)))
    }

    /// Build around an existing authentication service.
    #[must_use]
    pub const fn with_auth(config: GatewayConfig, auth: Arc<AuthService>) -> Self {
        Self { config, auth }
    }

    /// The authentication service.
    #[must_use]
    pub const fn auth(&self) -> &Arc<AuthService> {
        &self.auth
    }

    /// Run until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot be bound or the server fails.
    pub async fn run(&self) -> Result<(), GatewayError> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` resolves.
    ///
    /// Seeds an admin from the environment, then starts the association
    /// audit log and the expiry reclaimer alongside the API server.
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot be bound or the server fails.
    pub async fn run_until(
        &self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), GatewayError> {
        if let Err(e) = auto_setup_from_env(&self.auth).await {
            tracing::warn!("Auto-setup from env failed: {}", e);
        }
        if self.auth.principals().is_empty() {
            tracing::warn!(
                "No principals configured. Run `tempora admin create` or set \
                 TEMPORA_ADMIN_IDENTIFIER and TEMPORA_ADMIN_SECRET"
            );
        }

        let audit = tokio::spawn(audit_associations(self.auth.events().subscribe()));
        let reclaimer = self.auth.reclaimer().spawn();

        let app = router(Arc::clone(&self.auth), &self.config);

        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| GatewayError::Config(format!("Invalid address: {e}")))?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Gateway API listening on http://{}", addr);

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        reclaimer.stop().await;
        audit.abort();

        result.map_err(|e| GatewayError::Server(e.to_string()))
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("auth", &self.auth)
            .finish()
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Build the HTTP router.
///
/// Token verification wraps every route; capabilities are attached per
/// route when it is registered.
pub fn router(auth: Arc<AuthService>, config: &GatewayConfig) -> Router {
    let user_admin = Capability::new(ResourceCategory::User, PermissionLevel::Admin);

    let admin = Router::new()
        .route(
            "/admin/principals",
            get(list_principals).post(create_principal),
        )
        .route("/admin/principals/{identifier}", delete(delete_principal))
        .route(
            "/admin/principals/{identifier}/privileges",
            put(set_privileges),
        )
        .route("/admin/principals/{identifier}/enabled", put(set_enabled))
        .route_layer(middleware::from_fn_with_state(
            RouteGate::new(Arc::clone(&auth), user_admin),
            gate,
        ));

    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/refresh", post(refresh_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/auth/me", get(me_handler))
        .route("/auth/logout-all", post(logout_all_handler))
        .route("/auth/password", post(change_password_handler))
        .merge(admin)
        .merge(scoped_routes(&auth, GrantCategory::Project, "projects"))
        .merge(scoped_routes(&auth, GrantCategory::Account, "accounts"))
        .layer(middleware::from_fn_with_state(Arc::clone(&auth), authenticate))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(config.request_timeout));

    if config.cors {
        app = app.layer(CorsLayer::permissive());
    }

    app.with_state(auth)
}

/// State for routes scoped to one grant category.
#[derive(Clone)]
struct ScopedState {
    auth: Arc<AuthService>,
    category: GrantCategory,
}

fn scoped_routes(
    auth: &Arc<AuthService>,
    category: GrantCategory,
    plural: &str,
) -> Router<Arc<AuthService>> {
    let kind = category.resource_category();
    let list = Capability::new(kind, PermissionLevel::Read);
    let read = Capability::new(kind, PermissionLevel::Read)
        .with_grant(category, PermissionLevel::Read);
    let manage = Capability::new(kind, PermissionLevel::Manage)
        .with_grant(category, PermissionLevel::Manage);
    let remove = Capability::new(kind, PermissionLevel::Admin)
        .with_grant(category, PermissionLevel::Admin);

    Router::new()
        .route(&format!("/{plural}"), guarded(auth, list, get(list_visible)))
        .route(
            &format!("/{plural}/{{id}}"),
            guarded(auth, remove, delete(delete_resource)),
        )
        .route(
            &format!("/{plural}/{{id}}/members"),
            guarded(auth, read, get(list_members)),
        )
        .route(
            &format!("/{plural}/{{id}}/members/{{principal}}"),
            guarded(auth, read, get(get_member))
                .merge(guarded(auth, manage, put(put_member)))
                .merge(guarded(auth, manage, delete(delete_member))),
        )
        .with_state(ScopedState {
            auth: Arc::clone(auth),
            category,
        })
}

async fn health_handler() -> &'static str {
    "OK"
}

// ============================================================================
// Auth Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
struct LoginRequest {
    identifier: String,
    secret: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    refresh_token: String,
    refresh_expires_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    principal: PublicPrincipal,
}

async fn login_handler(
    State(auth): State<Arc<AuthService>>,
    Json(body): Json<LoginRequest>,
) -> Result<Response, AuthError> {
    let outcome = auth.login(&body.identifier, &body.secret).await?;

    let bearer = HeaderValue::from_str(&format!("Bearer {}", outcome.access.token))
        .map_err(|e| AuthError::Storage(format!("Unencodable token: {e}")))?;

    let body = LoginResponse {
        refresh_token: outcome.refresh.token,
        refresh_expires_at: outcome.refresh.expires_at,
        expires_at: outcome.access.expires_at,
        principal: outcome.principal,
    };

    Ok(([(AUTHORIZATION, bearer)], Json(body)).into_response())
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Debug, Serialize)]
struct RefreshResponse {
    access_token: String,
    expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

async fn refresh_handler(
    State(auth): State<Arc<AuthService>>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, AuthError> {
    let outcome = auth.refresh(&body.refresh_token).await?;

    Ok(Json(RefreshResponse {
        access_token: outcome.access.token,
        expires_at: outcome.access.expires_at,
        refresh_token: outcome.refresh.map(|r| r.token),
    }))
}

async fn logout_handler(
    State(auth): State<Arc<AuthService>>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<serde_json::Value>, AuthError> {
    auth.logout(&body.refresh_token).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn me_handler(RequireAuth(ctx): RequireAuth) -> Json<AuthContext> {
    Json(ctx)
}

async fn logout_all_handler(
    State(auth): State<Arc<AuthService>>,
    RequireAuth(ctx): RequireAuth,
) -> Result<Json<serde_json::Value>, AuthError> {
    let revoked = auth.logout_all(&ctx).await?;
    Ok(Json(serde_json::json!({ "revoked": revoked })))
}

#[derive(Debug, Deserialize)]
struct ChangePasswordRequest {
    current_secret: String,
    new_secret: String,
}

async fn change_password_handler(
    State(auth): State<Arc<AuthService>>,
    RequireAuth(ctx): RequireAuth,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<StatusCode, AuthError> {
    auth.change_password(&ctx, &body.current_secret, &body.new_secret)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Membership Handlers
// ============================================================================

async fn list_visible(
    State(scope): State<ScopedState>,
    RequireAuth(ctx): RequireAuth,
) -> Result<Json<serde_json::Value>, AuthError> {
    let ids = scope.auth.visible_resources(&ctx, scope.category).await?;
    Ok(Json(serde_json::json!({ "ids": ids })))
}

async fn delete_resource(
    State(scope): State<ScopedState>,
    Path(id): Path<ResourceId>,
) -> Result<Json<serde_json::Value>, AuthError> {
    let removed = scope.auth.delete_resource(scope.category, id).await?;
    Ok(Json(serde_json::json!({ "removed_grants": removed })))
}

#[derive(Debug, Serialize)]
struct MemberResponse {
    principal_id: PrincipalId,
    level: PermissionLevel,
}

async fn list_members(
    State(scope): State<ScopedState>,
    Path(id): Path<ResourceId>,
) -> Result<Json<Vec<MemberResponse>>, AuthError> {
    let members = scope.auth.members(scope.category, id).await?;
    Ok(Json(
        members
            .into_iter()
            .map(|(principal_id, level)| MemberResponse {
                principal_id,
                level,
            })
            .collect(),
    ))
}

async fn get_member(
    State(scope): State<ScopedState>,
    Path((id, principal)): Path<(ResourceId, PrincipalId)>,
) -> Result<Response, AuthError> {
    match scope.auth.member_level(scope.category, id, principal).await? {
        Some(level) => Ok(Json(MemberResponse {
            principal_id: principal,
            level,
        })
        .into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

#[derive(Debug, Deserialize)]
struct GrantRequest {
    level: String,
}

async fn put_member(
    State(scope): State<ScopedState>,
    Path((id, principal)): Path<(ResourceId, PrincipalId)>,
    Json(body): Json<GrantRequest>,
) -> Result<Json<serde_json::Value>, AuthError> {
    let level = required_level_for(scope.category.resource_category(), &body.level)?;
    let change = scope
        .auth
        .grant_member(scope.category, id, principal, level)
        .await?;

    let change = match change {
        GrantChange::Created => "created",
        GrantChange::Updated { .. } => "updated",
        GrantChange::Unchanged => "unchanged",
    };
    Ok(Json(serde_json::json!({ "change": change, "level": level })))
}

async fn delete_member(
    State(scope): State<ScopedState>,
    Path((id, principal)): Path<(ResourceId, PrincipalId)>,
) -> Result<Json<serde_json::Value>, AuthError> {
    let removed = scope.auth.revoke_member(scope.category, id, principal).await?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

// ============================================================================
// Admin Handlers
// ============================================================================

/// Privilege as sent by clients; parsed strictly so that bad level names
/// surface as `UnsupportedPermissionLevel`.
#[derive(Debug, Deserialize)]
struct PrivilegeInput {
    category: String,
    level: String,
}

fn parse_privileges(input: &[PrivilegeInput]) -> Result<PrivilegeSet, AuthError> {
    input
        .iter()
        .map(|p| {
            let category: ResourceCategory = p.category.parse()?;
            let level = required_level_for(category, &p.level)?;
            Ok(Privilege::new(category, level))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct CreatePrincipalRequest {
    identifier: String,
    secret: String,
    #[serde(default)]
    privileges: Vec<PrivilegeInput>,
}

async fn list_principals(
    State(auth): State<Arc<AuthService>>,
) -> Result<Json<Vec<PublicPrincipal>>, AuthError> {
    Ok(Json(auth.list_principals().await?))
}

async fn create_principal(
    State(auth): State<Arc<AuthService>>,
    Json(body): Json<CreatePrincipalRequest>,
) -> Result<(StatusCode, Json<PublicPrincipal>), AuthError> {
    let privileges = parse_privileges(&body.privileges)?;
    let principal = auth
        .create_principal(&body.identifier, &body.secret, privileges)
        .await?;
    Ok((StatusCode::CREATED, Json(principal)))
}

#[derive(Debug, Default, Deserialize)]
struct DeletePrincipalQuery {
    #[serde(default)]
    cascade: bool,
}

async fn delete_principal(
    State(auth): State<Arc<AuthService>>,
    Path(identifier): Path<String>,
    Query(query): Query<DeletePrincipalQuery>,
) -> Result<StatusCode, AuthError> {
    auth.delete_principal(&identifier, query.cascade).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct PrivilegesRequest {
    privileges: Vec<PrivilegeInput>,
}

async fn set_privileges(
    State(auth): State<Arc<AuthService>>,
    Path(identifier): Path<String>,
    Json(body): Json<PrivilegesRequest>,
) -> Result<Json<PublicPrincipal>, AuthError> {
    let privileges = parse_privileges(&body.privileges)?;
    Ok(Json(auth.set_privileges(&identifier, privileges).await?))
}

#[derive(Debug, Deserialize)]
struct EnabledRequest {
    enabled: bool,
}

async fn set_enabled(
    State(auth): State<Arc<AuthService>>,
    Path(identifier): Path<String>,
    Json(body): Json<EnabledRequest>,
) -> Result<Json<PublicPrincipal>, AuthError> {
    Ok(Json(auth.set_enabled(&identifier, body.enabled).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{SecretHasher, setup::admin_privileges};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct PlainHasher;

    impl SecretHasher for PlainHasher {
        fn hash(&self, secret: &str) -> Result<String, AuthError> {
            Ok(format!("plain:{secret}"))
        }

        fn verify(&self, secret: &str, hash: &str) -> bool {
            hash.strip_prefix("plain:") == Some(secret)
        }
    }

    struct Harness {
        _dir: TempDir,
        auth: Arc<AuthService>,
        app: Router,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let db = sled::open(dir.path()).unwrap();
            let config = GatewayConfig {
                auth: AuthConfig::builder()
                    .jwt_secret(crate::auth::setup::generate_hex_secret())
                    .build(),
                ..GatewayConfig::default()
            };
            let auth = Arc::new(
                AuthService::new(&config.auth, &db)
                    .unwrap()
                    .with_hasher(Arc::new(PlainHasher)),
            );
            let app = router(Arc::clone(&auth), &config);
            Self { _dir: dir, auth, app }
        }

        async fn principal(&self, identifier: &str, privileges: PrivilegeSet) -> PrincipalId {
            self.auth
                .create_principal(identifier, "password123", privileges)
                .await
                .unwrap()
                .id
        }

        async fn token(&self, identifier: &str) -> String {
            let outcome = self.auth.login(identifier, "password123").await.unwrap();
            outcome.access.token
        }

        async fn send(
            &self,
            method: Method,
            uri: &str,
            token: Option<&str>,
            body: Option<serde_json::Value>,
        ) -> (StatusCode, Option<HeaderValue>, serde_json::Value) {
            let mut request = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                request = request.header(AUTHORIZATION, format!("Bearer {token}"));
            }
            let request = match body {
                Some(body) => request
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => request.body(Body::empty()).unwrap(),
            };

            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let header = response.headers().get(AUTHORIZATION).cloned();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
            (status, header, json)
        }
    }

    fn privs(items: &[(ResourceCategory, PermissionLevel)]) -> PrivilegeSet {
        items
            .iter()
            .map(|&(category, level)| Privilege::new(category, level))
            .collect()
    }

    #[tokio::test]
    async fn test_health() {
        let harness = Harness::new();
        let response = harness
            .app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_login_returns_bearer_header_and_refresh_body() {
        let harness = Harness::new();
        harness.principal("alice", PrivilegeSet::new()).await;

        let (status, header, body) = harness
            .send(
                Method::POST,
                "/auth/login",
                None,
                Some(serde_json::json!({ "identifier": "alice", "secret": "password123" })),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        let header = header.unwrap();
        assert!(header.to_str().unwrap().starts_with("Bearer "));
        assert!(body["refresh_token"].as_str().is_some());
        assert_eq!(body["principal"]["identifier"], "alice");
        assert!(body["principal"].get("password_hash").is_none());
    }

    #[tokio::test]
    async fn test_bad_login_has_no_identifier_hint() {
        let harness = Harness::new();
        harness.principal("alice", PrivilegeSet::new()).await;

        let (unknown_status, _, unknown) = harness
            .send(
                Method::POST,
                "/auth/login",
                None,
                Some(serde_json::json!({ "identifier": "nobody", "secret": "password123" })),
            )
            .await;
        let (wrong_status, _, wrong) = harness
            .send(
                Method::POST,
                "/auth/login",
                None,
                Some(serde_json::json!({ "identifier": "alice", "secret": "nope-nope" })),
            )
            .await;

        assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
        assert_eq!(unknown, wrong);
        assert_eq!(wrong["code"], "invalid_credentials");
    }

    #[tokio::test]
    async fn test_me_requires_authentication() {
        let harness = Harness::new();

        let (status, _, body) = harness.send(Method::GET, "/auth/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "authentication_required");

        let (status, _, body) = harness
            .send(Method::GET, "/auth/me", Some("not-a-token"), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "token_invalid");
    }

    #[tokio::test]
    async fn test_bad_token_rejected_even_on_public_route() {
        let harness = Harness::new();
        let (status, _, body) = harness
            .send(Method::GET, "/health", Some("garbage"), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "token_invalid");
    }

    #[tokio::test]
    async fn test_me_returns_claims() {
        let harness = Harness::new();
        harness
            .principal(
                "bob",
                privs(&[(ResourceCategory::Project, PermissionLevel::Write)]),
            )
            .await;
        let token = harness.token("bob").await;

        let (status, _, body) = harness.send(Method::GET, "/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subject"], "bob");
        assert_eq!(
            body["privileges"],
            serde_json::json!([{ "category": "project", "level": "WRITE" }])
        );
    }

    #[tokio::test]
    async fn test_role_gate_is_forbidden_not_unauthorized() {
        let harness = Harness::new();
        harness.principal("carol", PrivilegeSet::new()).await;
        let token = harness.token("carol").await;

        let (status, _, body) = harness.send(Method::GET, "/projects", Some(&token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "permission_denied");
    }

    #[tokio::test]
    async fn test_membership_lifecycle() {
        let harness = Harness::new();
        let project_manager = privs(&[(ResourceCategory::Project, PermissionLevel::Manage)]);
        let owner = harness.principal("owner", project_manager.clone()).await;
        let member = harness
            .principal(
                "member",
                privs(&[(ResourceCategory::Project, PermissionLevel::Read)]),
            )
            .await;
        harness
            .auth
            .grant_member(
                GrantCategory::Project,
                ResourceId::new(7),
                owner,
                PermissionLevel::Manage,
            )
            .await
            .unwrap();
        let owner_token = harness.token("owner").await;
        let member_token = harness.token("member").await;
        let uri = format!("/projects/7/members/{member}");

        let (status, _, body) = harness
            .send(
                Method::PUT,
                &uri,
                Some(&owner_token),
                Some(serde_json::json!({ "level": "read" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["change"], "created");

        let (_, _, body) = harness
            .send(
                Method::PUT,
                &uri,
                Some(&owner_token),
                Some(serde_json::json!({ "level": "READ" })),
            )
            .await;
        assert_eq!(body["change"], "unchanged");

        // Member sees the project but cannot manage it
        let (_, _, body) = harness.send(Method::GET, "/projects", Some(&member_token), None).await;
        assert_eq!(body["ids"], serde_json::json!([7]));
        let (status, _, _) = harness.send(Method::GET, &uri, Some(&member_token), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _, _) = harness
            .send(Method::DELETE, &uri, Some(&member_token), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // Owner's grant on 7 does not extend to 8
        let (status, _, _) = harness
            .send(
                Method::PUT,
                &format!("/projects/8/members/{member}"),
                Some(&owner_token),
                Some(serde_json::json!({ "level": "READ" })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _, body) = harness
            .send(Method::DELETE, &uri, Some(&owner_token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], true);

        let (_, _, body) = harness.send(Method::GET, "/projects", Some(&member_token), None).await;
        assert_eq!(body["ids"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_unknown_level_is_bad_request() {
        let harness = Harness::new();
        let owner = harness
            .principal(
                "owner",
                privs(&[(ResourceCategory::Account, PermissionLevel::Admin)]),
            )
            .await;
        harness
            .auth
            .grant_member(GrantCategory::Account, ResourceId::new(1), owner, PermissionLevel::Admin)
            .await
            .unwrap();
        let token = harness.token("owner").await;

        let (status, _, body) = harness
            .send(
                Method::PUT,
                &format!("/accounts/1/members/{owner}"),
                Some(&token),
                Some(serde_json::json!({ "level": "superuser" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "unsupported_permission_level");
    }

    #[tokio::test]
    async fn test_refresh_and_logout() {
        let harness = Harness::new();
        harness.principal("dave", PrivilegeSet::new()).await;
        let outcome = harness.auth.login("dave", "password123").await.unwrap();
        let refresh = serde_json::json!({ "refresh_token": outcome.refresh.token });

        let (status, _, body) = harness
            .send(Method::POST, "/auth/refresh", None, Some(refresh.clone()))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["access_token"].as_str().is_some());
        assert!(body.get("refresh_token").is_none());

        for _ in 0..2 {
            let (status, _, _) = harness
                .send(Method::POST, "/auth/logout", None, Some(refresh.clone()))
                .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, _, body) = harness
            .send(Method::POST, "/auth/refresh", None, Some(refresh))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "refresh_token_not_found");
    }

    #[tokio::test]
    async fn test_admin_routes() {
        let harness = Harness::new();
        harness.principal("root", admin_privileges()).await;
        harness.principal("user", PrivilegeSet::new()).await;
        let root = harness.token("root").await;
        let user = harness.token("user").await;

        let (status, _, _) = harness
            .send(Method::GET, "/admin/principals", Some(&user), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _, body) = harness
            .send(
                Method::POST,
                "/admin/principals",
                Some(&root),
                Some(serde_json::json!({
                    "identifier": "Erin@Example.com",
                    "secret": "password123",
                    "privileges": [{ "category": "post", "level": "write" }],
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["identifier"], "erin@example.com");
        let erin = PrincipalId::new(body["id"].as_u64().unwrap());

        let (status, _, body) = harness
            .send(
                Method::PUT,
                "/admin/principals/erin@example.com/privileges",
                Some(&root),
                Some(serde_json::json!({
                    "privileges": [{ "category": "post", "level": "owner" }],
                })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "unsupported_permission_level");

        let (status, _, body) = harness
            .send(
                Method::PUT,
                "/admin/principals/erin@example.com/enabled",
                Some(&root),
                Some(serde_json::json!({ "enabled": false })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enabled"], false);

        let (status, _, body) = harness
            .send(Method::GET, "/admin/principals", Some(&root), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 3);

        harness
            .auth
            .grant_member(
                GrantCategory::Account,
                ResourceId::new(3),
                erin,
                PermissionLevel::Read,
            )
            .await
            .unwrap();

        let (status, _, body) = harness
            .send(
                Method::DELETE,
                "/admin/principals/erin@example.com",
                Some(&root),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "principal_in_use");

        let (status, _, _) = harness
            .send(
                Method::DELETE,
                "/admin/principals/erin@example.com?cascade=true",
                Some(&root),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(harness
            .auth
            .members(GrantCategory::Account, ResourceId::new(3))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_password_change_over_http() {
        let harness = Harness::new();
        harness.principal("faye", PrivilegeSet::new()).await;
        let token = harness.token("faye").await;

        let (status, _, _) = harness
            .send(
                Method::POST,
                "/auth/password",
                Some(&token),
                Some(serde_json::json!({
                    "current_secret": "password123",
                    "new_secret": "another-secret",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(harness.auth.login("faye", "another-secret").await.is_ok());
    }

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, 18790);
        assert_eq!(config.bind_address, "127.0.0.1");
    }
}
