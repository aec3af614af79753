//! Security audit logging for authentication events
//!
//! Every audit event is logged at INFO level on the `audit` target, so
//! security monitoring can route it separately from application logs.
//! Token values never appear in audit records.
//!
//! # Example
//!
//! ```ignore
//! use shopauth_api::audit::{audit_log, AuditEvent, ClientInfo};
//!
//! audit_log(&AuditEvent::LoginSuccess {
//!     principal_id: 1,
//!     username: "alice".to_string(),
//!     client: ClientInfo::from_headers(request.headers()),
//! });
//! ```
//!
//! Author: hephaex@gmail.com

use axum::http::HeaderMap;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shopauth_core::PrincipalId;
use tracing::info;

/// Request origin recorded with each event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            ip_address: extract_ip_address(headers),
            user_agent: extract_user_agent(headers),
        }
    }
}

/// Security audit events for authentication and authorization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    LoginSuccess {
        principal_id: PrincipalId,
        username: String,
        #[serde(flatten)]
        client: ClientInfo,
    },

    LoginFailure {
        username: String,
        reason: String,
        #[serde(flatten)]
        client: ClientInfo,
    },

    RegistrationSuccess {
        principal_id: PrincipalId,
        username: String,
        role: String,
        #[serde(flatten)]
        client: ClientInfo,
    },

    RegistrationFailure {
        username: String,
        reason: String,
        #[serde(flatten)]
        client: ClientInfo,
    },

    /// Refresh token exchanged for a new pair
    TokenRefresh {
        #[serde(flatten)]
        client: ClientInfo,
    },

    /// Refresh token not found or expired
    RefreshRejected {
        reason: String,
        #[serde(flatten)]
        client: ClientInfo,
    },

    Logout {
        username: Option<String>,
        access_token_revoked: bool,
        refresh_tokens_deleted: u64,
        #[serde(flatten)]
        client: ClientInfo,
    },

    /// Bearer token failed verification
    InvalidToken {
        reason: String,
        #[serde(flatten)]
        client: ClientInfo,
    },

    /// Authentic bearer token found in the revocation registry
    RevokedTokenUsed {
        username: String,
        #[serde(flatten)]
        client: ClientInfo,
    },

    AccessDenied {
        username: Option<String>,
        resource: String,
        required_role: Option<String>,
        #[serde(flatten)]
        client: ClientInfo,
    },
}

impl AuditEvent {
    fn summary(&self) -> &'static str {
        match self {
            AuditEvent::LoginSuccess { .. } => "Login successful",
            AuditEvent::LoginFailure { .. } => "Login failed",
            AuditEvent::RegistrationSuccess { .. } => "Registration successful",
            AuditEvent::RegistrationFailure { .. } => "Registration failed",
            AuditEvent::TokenRefresh { .. } => "Token refresh",
            AuditEvent::RefreshRejected { .. } => "Token refresh rejected",
            AuditEvent::Logout { .. } => "User logout",
            AuditEvent::InvalidToken { .. } => "Invalid token",
            AuditEvent::RevokedTokenUsed { .. } => "Revoked token used",
            AuditEvent::AccessDenied { .. } => "Access denied",
        }
    }

    fn client(&self) -> &ClientInfo {
        match self {
            AuditEvent::LoginSuccess { client, .. }
            | AuditEvent::LoginFailure { client, .. }
            | AuditEvent::RegistrationSuccess { client, .. }
            | AuditEvent::RegistrationFailure { client, .. }
            | AuditEvent::TokenRefresh { client }
            | AuditEvent::RefreshRejected { client, .. }
            | AuditEvent::Logout { client, .. }
            | AuditEvent::InvalidToken { client, .. }
            | AuditEvent::RevokedTokenUsed { client, .. }
            | AuditEvent::AccessDenied { client, .. } => client,
        }
    }
}

/// Log a security audit event with structured fields.
///
/// The full event is attached as JSON in the `event` field.
pub fn audit_log(event: &AuditEvent) {
    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));
    let client = event.client();

    info!(
        target: "audit",
        timestamp = %Utc::now(),
        event = %event_json,
        ip_address = ?client.ip_address,
        user_agent = ?client.user_agent,
        "{}",
        event.summary()
    );
}

/// Client IP from `X-Forwarded-For` (first hop) or `X-Real-IP`
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first_ip) = xff.split(',').next() {
            let first_ip = first_ip.trim();
            if !first_ip.is_empty() {
                return Some(first_ip.to_string());
            }
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
}

pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::LoginSuccess {
            principal_id: 42,
            username: "alice".to_string(),
            client: ClientInfo {
                ip_address: Some("192.168.1.1".to_string()),
                user_agent: None,
            },
        };

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "login_success");
        assert_eq!(json["username"], "alice");
        assert_eq!(json["ip_address"], "192.168.1.1");
    }

    #[test]
    fn test_audit_log_does_not_panic() {
        audit_log(&AuditEvent::LoginFailure {
            username: "alice".to_string(),
            reason: "Invalid username or password".to_string(),
            client: ClientInfo::default(),
        });
        audit_log(&AuditEvent::Logout {
            username: None,
            access_token_revoked: false,
            refresh_tokens_deleted: 0,
            client: ClientInfo::default(),
        });
    }

    #[test]
    fn test_extract_ip_from_x_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.1, 198.51.100.1".parse().unwrap(),
        );
        assert_eq!(extract_ip_address(&headers), Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_extract_ip_from_x_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "203.0.113.9".parse().unwrap());
        assert_eq!(extract_ip_address(&headers), Some("203.0.113.9".to_string()));
    }

    #[test]
    fn test_client_info_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::USER_AGENT,
            "Mozilla/5.0 (Test)".parse().unwrap(),
        );

        let client = ClientInfo::from_headers(&headers);
        assert_eq!(client.user_agent, Some("Mozilla/5.0 (Test)".to_string()));
        assert_eq!(client.ip_address, None);
    }
}
