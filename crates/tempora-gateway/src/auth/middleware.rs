//! Authentication middleware for axum.
//!
//! [`authenticate`] runs on every request and attaches an [`AuthContext`]
//! when a valid bearer token is present. [`gate`] runs per route and checks
//! the route's [`Capability`] against that context.

use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRequestParts, RawPathParams, Request, State},
    http::{StatusCode, request::Parts},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::MethodRouter,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tempora_core::{PrincipalId, ResourceId};

use super::AuthError;
use super::jwt::VerifiedToken;
use super::pipeline::AuthService;
use super::privilege::{Capability, PrivilegeSet};

/// The verified principal of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    /// Stable principal id.
    pub principal_id: PrincipalId,
    /// Login identifier.
    pub subject: String,
    /// Privileges the request is evaluated against.
    pub privileges: PrivilegeSet,
    /// When the presented token expires.
    pub expires_at: DateTime<Utc>,
}

impl From<VerifiedToken> for AuthContext {
    fn from(token: VerifiedToken) -> Self {
        Self {
            principal_id: token.principal_id,
            subject: token.subject,
            privileges: token.privileges,
            expires_at: token.expires_at,
        }
    }
}

/// Extractor for authenticated requests.
///
/// Use this in handler parameters to require authentication.
#[derive(Debug, Clone)]
pub struct RequireAuth(pub AuthContext);

impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(Self)
            .ok_or(AuthError::AuthenticationRequired)
    }
}

/// Verify the bearer token, if any, and attach the context.
///
/// Requests without the token header pass through unauthenticated. A
/// present but bad token is rejected before any handler runs.
pub async fn authenticate(
    State(auth): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Response {
    // Never trust a context that did not come from this middleware
    request.extensions_mut().remove::<AuthContext>();

    let header = match request.headers().get(auth.token_header()) {
        None => None,
        Some(value) => match value.to_str() {
            Ok(value) => Some(value.to_string()),
            Err(_) => {
                return AuthError::TokenInvalid("Header is not valid ASCII".to_string())
                    .into_response();
            }
        },
    };

    match auth.authenticate_header(header.as_deref()).await {
        Ok(Some(context)) => {
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Ok(None) => next.run(request).await,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected bearer token");
            e.into_response()
        }
    }
}

/// State for [`gate`]: the service and the route's capability.
#[derive(Debug, Clone)]
pub struct RouteGate {
    auth: Arc<AuthService>,
    capability: Capability,
}

impl RouteGate {
    /// Gate for one capability.
    #[must_use]
    pub const fn new(auth: Arc<AuthService>, capability: Capability) -> Self {
        Self { auth, capability }
    }
}

/// Enforce a route's capability.
///
/// Unauthenticated requests get `AuthenticationRequired`; authenticated
/// ones that fail the check get `AuthorizationDenied`.
pub async fn gate(State(gate): State<RouteGate>, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();

    let Some(context) = parts.extensions.get::<AuthContext>().cloned() else {
        return AuthError::AuthenticationRequired.into_response();
    };

    let resource = match gate.capability.grant {
        Some(requirement) => match resource_param(&mut parts, requirement.path_param).await {
            Ok(resource) => Some(resource),
            Err(e) => return e.into_response(),
        },
        None => None,
    };

    if let Err(e) = gate
        .auth
        .authorize(&context, &gate.capability, resource)
        .await
    {
        return e.into_response();
    }

    next.run(Request::from_parts(parts, body)).await
}

/// Attach a capability to a method router.
pub fn guarded<S>(
    auth: &Arc<AuthService>,
    capability: Capability,
    route: MethodRouter<S>,
) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    route.route_layer(middleware::from_fn_with_state(
        RouteGate::new(Arc::clone(auth), capability),
        gate,
    ))
}

async fn resource_param(parts: &mut Parts, name: &str) -> Result<ResourceId, AuthError> {
    let params = RawPathParams::from_request_parts(parts, &())
        .await
        .map_err(|e| AuthError::InvalidInput(e.body_text()))?;

    params
        .iter()
        .find(|(key, _)| *key == name)
        .ok_or_else(|| AuthError::InvalidInput(format!("Missing path parameter {name}")))?
        .1
        .parse()
        .map_err(|_| AuthError::InvalidInput(format!("Invalid {name}")))
}

/// Error response for auth failures.
#[derive(Debug, Serialize)]
struct AuthErrorResponse {
    error: String,
    code: &'static str,
}

impl AuthError {
    /// HTTP status and stable error code.
    #[must_use]
    pub const fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
            Self::AuthenticationRequired => (StatusCode::UNAUTHORIZED, "authentication_required"),
            Self::TokenInvalid(_) => (StatusCode::UNAUTHORIZED, "token_invalid"),
            Self::TokenExpired => (StatusCode::UNAUTHORIZED, "token_expired"),
            Self::RefreshTokenNotFound => (StatusCode::UNAUTHORIZED, "refresh_token_not_found"),
            Self::RefreshTokenExpired => (StatusCode::UNAUTHORIZED, "refresh_token_expired"),
            Self::UnsupportedPermissionLevel(_) => {
                (StatusCode::BAD_REQUEST, "unsupported_permission_level")
            }
            Self::UnknownCategory(_) => (StatusCode::BAD_REQUEST, "unknown_category"),
            Self::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            Self::AuthorizationDenied(_) => (StatusCode::FORBIDDEN, "permission_denied"),
            Self::PrincipalNotFound(_) => (StatusCode::NOT_FOUND, "principal_not_found"),
            Self::PrincipalExists(_) => (StatusCode::CONFLICT, "principal_exists"),
            Self::PrincipalInUse(_) => (StatusCode::CONFLICT, "principal_in_use"),
            Self::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            Self::StoreUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
            Self::Storage(_) | Self::Config(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Internal details stay in the log
        let error = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            match status {
                StatusCode::SERVICE_UNAVAILABLE => "Service temporarily unavailable".to_string(),
                _ => "Internal error".to_string(),
            }
        } else {
            self.to_string()
        };

        (status, Json(AuthErrorResponse { error, code })).into_response()
    }
}
