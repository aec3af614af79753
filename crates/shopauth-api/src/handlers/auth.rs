//! Authentication API handlers
//!
//! Login, registration, refresh and logout under `/api/auth`. Login and
//! refresh also deliver the refresh token as an `HttpOnly` cookie scoped to
//! the refresh endpoint; refresh and logout accept it from that cookie when
//! the body does not carry one.
//!
//! Author: hephaex@gmail.com

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, OriginalUri, State},
    http::HeaderMap,
    response::IntoResponse,
    Extension, Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shopauth_core::AuthConfig;
use std::future::Future;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::audit::{audit_log, AuditEvent, ClientInfo};
use crate::auth::{bearer_token, AuthError, AuthenticatedUser, LoginRequest, RegisterRequest};
use crate::error::{AppError, ErrorAt};
use crate::state::AppState;

const TOKEN_TYPE: &str = "Bearer";

/// Login response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JwtResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub id: i64,
    pub username: String,
    pub roles: Vec<String>,
}

/// Refresh request. The token may come from the `refreshtoken` cookie instead.
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenRefreshRequest {
    pub refresh_token: Option<String>,
}

/// Refresh response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenRefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
}

/// Optional logout body
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// Run issuance or rotation on its own task so a dropped connection cannot cancel it halfway
async fn run_to_completion<F, T>(future: F) -> Result<T, AppError>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(future)
        .await
        .map_err(|e| AppError::Internal(format!("auth task failed: {e}")))
}

fn json_body<T: DeserializeOwned>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

/// Optional JSON body; an empty body yields the default
fn optional_json_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {e}")))
}

/// `HttpOnly` refresh cookie scoped to the refresh endpoint, living as long as the token
fn refresh_cookie(config: &AuthConfig, token: String) -> Cookie<'static> {
    Cookie::build((config.refresh_cookie_name.clone(), token))
        .path(config.refresh_cookie_path.clone())
        .http_only(true)
        .secure(config.secure_cookie)
        .max_age(time::Duration::seconds(
            config.refresh_token_ttl().num_seconds(),
        ))
        .build()
}

/// Expired, empty refresh cookie with the same name and path
fn cleared_refresh_cookie(config: &AuthConfig) -> Cookie<'static> {
    let mut cookie = refresh_cookie(config, String::new());
    cookie.make_removal();
    cookie
}

fn cookie_token(jar: &CookieJar, config: &AuthConfig) -> Option<String> {
    jar.get(&config.refresh_cookie_name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// Log in with username and password
///
/// Returns an access token and a refresh token, and sets the refresh cookie.
/// Other sessions of the same user stay valid.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = JwtResponse),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ErrorAt> {
    let path = uri.path();
    let request = json_body(payload).map_err(|e| e.at(path))?;
    let username = request.username.clone();
    let client = ClientInfo::from_headers(&headers);

    let auth = state.auth.clone();
    let result = run_to_completion(async move { auth.login(request).await })
        .await
        .map_err(|e| e.at(path))?;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            audit_log(&AuditEvent::LoginFailure {
                username,
                reason: e.to_string(),
                client,
            });
            return Err(AppError::from(e).at(path));
        }
    };

    audit_log(&AuditEvent::LoginSuccess {
        principal_id: outcome.principal.id,
        username: outcome.principal.username.clone(),
        client,
    });

    let jar = jar.add(refresh_cookie(
        &state.config.auth,
        outcome.refresh_token.clone(),
    ));
    let body = JwtResponse {
        access_token: outcome.access_token,
        refresh_token: outcome.refresh_token,
        token_type: TOKEN_TYPE.to_string(),
        id: outcome.principal.id,
        username: outcome.principal.username,
        roles: outcome.principal.roles,
    };

    Ok((jar, Json(body)))
}

/// Register a new user
///
/// The user receives the default role.
#[utoipa::path(
    post,
    path = "/api/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "User registered", body = MessageResponse),
        (status = 400, description = "Invalid input or username already in use", body = crate::error::ApiError),
        (status = 500, description = "Default role missing", body = crate::error::ApiError),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ErrorAt> {
    let path = uri.path();
    let request = json_body(payload).map_err(|e| e.at(path))?;
    let username = request.username.clone();
    let client = ClientInfo::from_headers(&headers);

    match state.auth.register(request).await {
        Ok(principal) => {
            audit_log(&AuditEvent::RegistrationSuccess {
                principal_id: principal.id,
                username: principal.username,
                role: principal.roles.join(","),
                client,
            });
            Ok(Json(MessageResponse::new("User registered successfully!")))
        }
        Err(e) => {
            audit_log(&AuditEvent::RegistrationFailure {
                username,
                reason: e.to_string(),
                client,
            });
            Err(AppError::from(e).at(path))
        }
    }
}

/// Exchange a refresh token for a new token pair
///
/// The presented refresh token is consumed, and every other refresh token of
/// the user is deleted.
#[utoipa::path(
    post,
    path = "/api/auth/refreshtoken",
    tag = "auth",
    request_body(content = TokenRefreshRequest, description = "Optional when the refresh cookie is sent"),
    responses(
        (status = 200, description = "New token pair", body = TokenRefreshResponse),
        (status = 400, description = "No refresh token presented", body = crate::error::ApiError),
        (status = 403, description = "Refresh token not found or expired", body = crate::error::ApiError),
    )
)]
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    jar: CookieJar,
    body: Bytes,
) -> Result<impl IntoResponse, ErrorAt> {
    let path = uri.path();
    let request: TokenRefreshRequest = optional_json_body(&body).map_err(|e| e.at(path))?;
    let client = ClientInfo::from_headers(&headers);

    let token = request
        .refresh_token
        .filter(|t| !t.is_empty())
        .or_else(|| cookie_token(&jar, &state.config.auth))
        .ok_or_else(|| AppError::BadRequest("Refresh token is required".to_string()).at(path))?;

    let auth = state.auth.clone();
    let result = run_to_completion(async move { auth.refresh(&token).await })
        .await
        .map_err(|e| e.at(path))?;

    let pair = match result {
        Ok(pair) => pair,
        Err(e) => {
            if matches!(
                e,
                AuthError::RefreshTokenNotFound | AuthError::RefreshTokenExpired
            ) {
                audit_log(&AuditEvent::RefreshRejected {
                    reason: e.to_string(),
                    client,
                });
            }
            return Err(AppError::from(e).at(path));
        }
    };

    audit_log(&AuditEvent::TokenRefresh { client });

    let jar = jar.add(refresh_cookie(&state.config.auth, pair.refresh_token.clone()));
    let body = TokenRefreshResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        token_type: TOKEN_TYPE.to_string(),
    };

    Ok((jar, Json(body)))
}

/// Log out
///
/// Revokes the bearer access token and deletes the user's refresh tokens.
/// Always succeeds and clears the refresh cookie.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "auth",
    request_body(content = LogoutRequest, description = "Optional when the refresh cookie is sent"),
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
    ),
    security(("bearer_auth" = []))
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    jar: CookieJar,
    user: Option<Extension<AuthenticatedUser>>,
    body: Bytes,
) -> Result<impl IntoResponse, ErrorAt> {
    let path = uri.path();
    // A malformed body only loses the body token; logout still proceeds
    let request: LogoutRequest = optional_json_body(&body).unwrap_or_default();

    let access_token = bearer_token(&headers).map(str::to_string);
    let refresh_token = request
        .refresh_token
        .filter(|t| !t.is_empty())
        .or_else(|| cookie_token(&jar, &state.config.auth));

    let auth = state.auth.clone();
    let summary = run_to_completion(async move {
        auth.logout(access_token.as_deref(), refresh_token.as_deref())
            .await
    })
    .await
    .map_err(|e| e.at(path))?;

    audit_log(&AuditEvent::Logout {
        username: user.map(|Extension(u)| u.username),
        access_token_revoked: summary.access_token_revoked,
        refresh_tokens_deleted: summary.refresh_tokens_deleted,
        client: ClientInfo::from_headers(&headers),
    });

    let jar = jar.add(cleared_refresh_cookie(&state.config.auth));
    Ok((jar, Json(MessageResponse::new("Log out successful!"))))
}

/// Current identity
#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Authenticated identity", body = AuthenticatedUser),
        (status = 401, description = "Not authenticated", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn me_handler(Extension(user): Extension<AuthenticatedUser>) -> impl IntoResponse {
    Json(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_cookie_attributes() {
        let config = AuthConfig::default();
        let cookie = refresh_cookie(&config, "abc".to_string());

        assert_eq!(cookie.name(), "refreshtoken");
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.path(), Some("/api/auth/refreshtoken"));
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(604_800)));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));

        let rendered = cookie.to_string();
        assert!(rendered.starts_with("refreshtoken=abc;"));
        assert!(rendered.contains("Max-Age=604800"));
    }

    #[test]
    fn test_cleared_cookie() {
        let config = AuthConfig {
            secure_cookie: false,
            ..AuthConfig::default()
        };
        let cookie = cleared_refresh_cookie(&config);
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.path(), Some("/api/auth/refreshtoken"));
        assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));

        let rendered = cookie.to_string();
        assert!(rendered.starts_with("refreshtoken=;"));
        assert!(rendered.contains("Max-Age=0"));
        assert!(!rendered.contains("Secure"));
    }

    #[test]
    fn test_cookie_value_cannot_inject_attributes() {
        let config = AuthConfig::default();
        let cookie = refresh_cookie(&config, "abc; Domain=evil.example".to_string());
        let rendered = cookie.encoded().to_string();
        assert!(!rendered.contains("Domain=evil.example"));
        assert_eq!(cookie.domain(), None);
    }

    #[tokio::test]
    async fn test_jar_emits_single_set_cookie() {
        let config = AuthConfig::default();
        let jar = CookieJar::new().add(refresh_cookie(&config, "abc".to_string()));
        let response = (jar, Json(MessageResponse::new("ok"))).into_response();

        let cookies: Vec<_> = response
            .headers()
            .get_all(axum::http::header::SET_COOKIE)
            .iter()
            .collect();
        assert_eq!(cookies.len(), 1);
        let value = cookies[0].to_str().unwrap();
        assert!(value.starts_with("refreshtoken=abc;"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("Path=/api/auth/refreshtoken"));
    }

    #[test]
    fn test_optional_json_body() {
        let empty: LogoutRequest = optional_json_body(&Bytes::from_static(b"  ")).unwrap();
        assert!(empty.refresh_token.is_none());

        let parsed: TokenRefreshRequest =
            optional_json_body(&Bytes::from_static(br#"{"refreshToken":"xyz"}"#)).unwrap();
        assert_eq!(parsed.refresh_token.as_deref(), Some("xyz"));

        let bad: Result<TokenRefreshRequest, _> = optional_json_body(&Bytes::from_static(b"{"));
        assert!(matches!(bad, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_jwt_response_is_camel_case() {
        let json = serde_json::to_value(JwtResponse {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            token_type: TOKEN_TYPE.to_string(),
            id: 1,
            username: "alice".to_string(),
            roles: vec!["ROLE_USER".to_string()],
        })
        .unwrap();
        assert_eq!(json["accessToken"], "a");
        assert_eq!(json["refreshToken"], "r");
        assert_eq!(json["tokenType"], "Bearer");
    }
}
