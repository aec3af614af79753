//! Request authentication middleware
//!
//! [`authenticate`] runs on every request. It never rejects: a request with a
//! missing, invalid, expired or revoked bearer token simply proceeds without
//! an identity. A valid token places an [`AuthenticatedUser`] in the request
//! extensions, where handlers and the [`require_auth`] / [`require_role`]
//! guards read it. The identity lives and dies with the request.

use axum::{
    extract::{OriginalUri, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use shopauth_core::{CredentialStore, Principal, PrincipalId};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use utoipa::ToSchema;

use super::jwt::{AccessTokenCodec, TokenError};
use super::revocation::RevocationRegistry;
use crate::audit::{audit_log, AuditEvent, ClientInfo};
use crate::error::ApiError;

/// Identity attached to an authenticated request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedUser {
    pub id: PrincipalId,
    pub username: String,
    pub roles: Vec<String>,
}

impl AuthenticatedUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

impl From<Principal> for AuthenticatedUser {
    fn from(principal: Principal) -> Self {
        Self {
            id: principal.id,
            username: principal.username,
            roles: principal.roles,
        }
    }
}

/// Why a presented bearer token did not authenticate
#[derive(Debug)]
pub enum Rejection {
    Invalid(TokenError),
    Revoked { username: String },
    UnknownSubject { username: String },
    StoreUnavailable(String),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Invalid(e) => write!(f, "{e}"),
            Rejection::Revoked { .. } => write!(f, "token has been revoked"),
            Rejection::UnknownSubject { username } => write!(f, "unknown subject '{username}'"),
            Rejection::StoreUnavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

/// Outcome of authenticating one request
#[derive(Debug)]
pub enum Authentication {
    /// No bearer token presented
    Anonymous,
    Rejected(Rejection),
    Authenticated(AuthenticatedUser),
}

/// Resolves bearer tokens into request identities
#[derive(Clone)]
pub struct RequestAuthenticator {
    codec: AccessTokenCodec,
    revocations: RevocationRegistry,
    credentials: Arc<dyn CredentialStore>,
}

impl RequestAuthenticator {
    pub fn new(
        codec: AccessTokenCodec,
        revocations: RevocationRegistry,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            codec,
            revocations,
            credentials,
        }
    }

    /// Verify the token, then check revocation, then resolve the subject
    pub async fn authenticate_token(&self, token: &str) -> Authentication {
        let username = match self.codec.verify(token) {
            Ok(username) => username,
            Err(e) => return Authentication::Rejected(Rejection::Invalid(e)),
        };

        match self.revocations.is_revoked(token).await {
            Ok(false) => {}
            Ok(true) => return Authentication::Rejected(Rejection::Revoked { username }),
            Err(e) => return Authentication::Rejected(Rejection::StoreUnavailable(e.to_string())),
        }

        match self.credentials.find_by_username(&username).await {
            Ok(Some(principal)) => Authentication::Authenticated(principal.into()),
            Ok(None) => Authentication::Rejected(Rejection::UnknownSubject { username }),
            Err(e) => Authentication::Rejected(Rejection::StoreUnavailable(e.to_string())),
        }
    }

    pub async fn authenticate_headers(&self, headers: &HeaderMap) -> Authentication {
        match bearer_token(headers) {
            Some(token) => self.authenticate_token(token).await,
            None => Authentication::Anonymous,
        }
    }
}

/// Extract the token from `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Authentication middleware. Attaches an identity when the bearer token is valid.
///
/// # Example
///
/// ```ignore
/// use axum::{middleware, Router};
/// use shopauth_api::auth::middleware::authenticate;
///
/// let app = Router::new()
///     .merge(routes)
///     .layer(middleware::from_fn_with_state(authenticator, authenticate));
/// ```
pub async fn authenticate(
    State(authenticator): State<RequestAuthenticator>,
    mut request: Request,
    next: Next,
) -> Response {
    let outcome = authenticator.authenticate_headers(request.headers()).await;
    match outcome {
        Authentication::Authenticated(user) => {
            tracing::debug!(username = %user.username, "Request authenticated");
            request.extensions_mut().insert(user);
        }
        Authentication::Rejected(rejection) => {
            let client = ClientInfo::from_headers(request.headers());
            match &rejection {
                Rejection::Revoked { username } => audit_log(&AuditEvent::RevokedTokenUsed {
                    username: username.clone(),
                    client,
                }),
                Rejection::StoreUnavailable(e) => {
                    tracing::error!("Cannot authenticate request: {}", e);
                }
                _ => audit_log(&AuditEvent::InvalidToken {
                    reason: rejection.to_string(),
                    client,
                }),
            }
            tracing::debug!("Proceeding unauthenticated: {}", rejection);
        }
        Authentication::Anonymous => {}
    }

    next.run(request).await
}

/// Path as the client sent it, before any `nest` stripped its prefix
fn request_path(request: &Request) -> String {
    request
        .extensions()
        .get::<OriginalUri>()
        .map(|OriginalUri(uri)| uri.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string())
}

fn guard_response(status: StatusCode, message: &str, request: &Request) -> Response {
    let body = ApiError::new(status, message).with_path(request_path(request));
    (status, Json(body)).into_response()
}

/// Guard rejecting requests without an identity with 401
pub async fn require_auth(request: Request, next: Next) -> Response {
    if request.extensions().get::<AuthenticatedUser>().is_none() {
        return guard_response(
            StatusCode::UNAUTHORIZED,
            "Full authentication is required to access this resource",
            &request,
        );
    }
    next.run(request).await
}

type GuardFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// Guard requiring a role: 401 without an identity, 403 without the role
///
/// # Example
///
/// ```ignore
/// let admin = Router::new()
///     .route("/admin", get(admin_handler))
///     .route_layer(middleware::from_fn(require_role("ROLE_ADMIN")));
/// ```
pub fn require_role(
    required_role: &'static str,
) -> impl Fn(Request, Next) -> GuardFuture + Clone + Send + Sync + 'static {
    move |request: Request, next: Next| -> GuardFuture {
        Box::pin(async move {
            let user = match request.extensions().get::<AuthenticatedUser>() {
                Some(user) => user.clone(),
                None => {
                    return guard_response(
                        StatusCode::UNAUTHORIZED,
                        "Full authentication is required to access this resource",
                        &request,
                    )
                }
            };

            if !user.has_role(required_role) {
                audit_log(&AuditEvent::AccessDenied {
                    username: Some(user.username),
                    resource: request_path(&request),
                    required_role: Some(required_role.to_string()),
                    client: ClientInfo::from_headers(request.headers()),
                });
                return guard_response(StatusCode::FORBIDDEN, "Access Denied", &request);
            }

            next.run(request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::get, Extension, Router};
    use chrono::{Duration, Utc};
    use shopauth_core::{MemoryStore, NewPrincipal, ROLE_ADMIN, ROLE_USER};
    use tower::ServiceExt;

    async fn setup() -> (RequestAuthenticator, AccessTokenCodec, RevocationRegistry) {
        let backend = Arc::new(MemoryStore::new());
        backend
            .save(NewPrincipal {
                username: "alice".to_string(),
                password_hash: "unused".to_string(),
                roles: vec![ROLE_USER.to_string()],
            })
            .await
            .unwrap();

        let codec = AccessTokenCodec::new("middleware-secret", Duration::hours(1)).unwrap();
        let revocations = RevocationRegistry::new(backend.clone());
        let authenticator = RequestAuthenticator::new(codec.clone(), revocations.clone(), backend);
        (authenticator, codec, revocations)
    }

    async fn whoami(user: Option<Extension<AuthenticatedUser>>) -> String {
        user.map(|Extension(u)| u.username)
            .unwrap_or_else(|| "anonymous".to_string())
    }

    fn app(authenticator: RequestAuthenticator) -> Router {
        let admin = Router::new()
            .route("/admin", get(|| async { "admin" }))
            .route_layer(middleware::from_fn(require_role(ROLE_ADMIN)));
        let private = Router::new()
            .route("/private", get(whoami))
            .route_layer(middleware::from_fn(require_auth));

        Router::new()
            .route("/whoami", get(whoami))
            .merge(private)
            .merge(admin)
            .layer(middleware::from_fn_with_state(authenticator, authenticate))
    }

    async fn call(app: Router, uri: &str, token: Option<&str>) -> (StatusCode, String) {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = app
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }

    #[tokio::test]
    async fn test_valid_token_attaches_identity() {
        let (authenticator, codec, _) = setup().await;
        let token = codec.issue("alice").unwrap();

        let (status, body) = call(app(authenticator), "/whoami", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "alice");
    }

    #[tokio::test]
    async fn test_bad_tokens_proceed_unauthenticated() {
        let (authenticator, codec, _) = setup().await;
        let expired = codec
            .issue_at("alice", Utc::now() - Duration::hours(3))
            .unwrap();
        let unknown_subject = codec.issue("mallory").unwrap();

        for token in [None, Some("garbage"), Some(expired.as_str()), Some(unknown_subject.as_str())] {
            let (status, body) = call(app(authenticator.clone()), "/whoami", token).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, "anonymous");
        }
    }

    #[tokio::test]
    async fn test_revoked_token_is_unauthenticated() {
        let (authenticator, codec, revocations) = setup().await;
        let token = codec.issue("alice").unwrap();
        revocations
            .revoke(&token, Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        assert!(matches!(
            authenticator.authenticate_token(&token).await,
            Authentication::Rejected(Rejection::Revoked { .. })
        ));
        let (_, body) = call(app(authenticator), "/whoami", Some(&token)).await;
        assert_eq!(body, "anonymous");
    }

    #[tokio::test]
    async fn test_revocation_survives_prune_in_final_second() {
        let (authenticator, codec, revocations) = setup().await;
        // exp lands on the current whole second
        let token = codec
            .issue_at("alice", Utc::now() - Duration::hours(1))
            .unwrap();
        let exp = codec.expiration_of(&token).unwrap();
        revocations.revoke(&token, exp).await.unwrap();

        revocations.prune_expired(Utc::now()).await.unwrap();

        assert!(!matches!(
            authenticator.authenticate_token(&token).await,
            Authentication::Authenticated(_)
        ));
    }

    #[tokio::test]
    async fn test_require_auth_guard() {
        let (authenticator, codec, _) = setup().await;
        let token = codec.issue("alice").unwrap();

        let (status, body) = call(app(authenticator.clone()), "/private", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], 401);
        assert_eq!(json["path"], "/private");

        let (status, _) = call(app(authenticator), "/private", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_require_role_guard() {
        let (authenticator, codec, _) = setup().await;
        let token = codec.issue("alice").unwrap();

        let (status, _) = call(app(authenticator.clone()), "/admin", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(app(authenticator), "/admin", Some(&token)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["error"], "Forbidden");
    }
}
