//! JWT auth middleware for the API routes.
//!
//! Extracts the JWT from the `Authorization: Bearer <token>` header, decodes
//! it, and looks up the caller's role from `profiles`. The identity is handed
//! to handlers through the `RequireAuth` extractor; admin-only routes use
//! `RequireAdmin` to gate access.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::AppState;

/// JWT claims from an auth-provider-issued token.
#[allow(dead_code)]
#[derive(Debug, Deserialize)]
struct Claims {
    /// Subject, the auth user ID (UUID).
    sub: String,
    /// Role claim from the provider (e.g. "authenticated").
    #[serde(default)]
    role: String,
}

/// Authenticated user info, resolved per request.
#[derive(Debug, Clone, Serialize)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: String,
}

/// Decode and optionally verify a bearer JWT.
///
/// With a configured secret, performs full HS256 verification. Without one,
/// decodes without signature validation (development mode).
fn decode_jwt(token: &str, secret: Option<&str>) -> Result<Claims, String> {
    if let Some(secret) = secret {
        let key = DecodingKey::from_secret(secret.as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&["authenticated"]);
        let data = decode::<Claims>(token, &key, &validation)
            .map_err(|e| format!("JWT verification failed: {}", e))?;
        Ok(data.claims)
    } else {
        // Development mode: decode without verification
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.set_audience(&["authenticated"]);
        validation.validate_exp = false;
        let data = decode::<Claims>(token, &DecodingKey::from_secret(b""), &validation)
            .map_err(|e| format!("JWT decode failed: {}", e))?;
        Ok(data.claims)
    }
}

/// Resolve the caller from request parts, or `None` if the token is missing,
/// malformed, or carries a non-UUID subject.
pub async fn extract_auth_user(state: &Arc<AppState>, parts: &Parts) -> Option<AuthUser> {
    let auth_header = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;

    let token = auth_header.strip_prefix("Bearer ")?;
    let claims = decode_jwt(token, state.jwt_secret.as_deref()).ok()?;
    let user_id = Uuid::parse_str(&claims.sub).ok()?;

    // Role comes from profiles, not the token (defaults to "user" pre-registration)
    let role = state
        .db
        .get_user_role(user_id)
        .await
        .unwrap_or_else(|_| "user".to_string());

    Some(AuthUser { user_id, role })
}

/// Axum extractor that requires any authenticated user.
///
/// Returns 401 if no valid JWT is present.
pub struct RequireAuth(pub AuthUser);

impl FromRequestParts<Arc<AppState>> for RequireAuth {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_user = extract_auth_user(state, parts).await.ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "Authentication required"})),
            )
                .into_response()
        })?;

        Ok(RequireAuth(auth_user))
    }
}

/// Axum extractor that requires an authenticated admin user.
///
/// Returns 401 if no valid JWT is present, 403 if the user is not an admin.
pub struct RequireAdmin(pub AuthUser);

impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_user = extract_auth_user(state, parts).await.ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "Authentication required"})),
            )
                .into_response()
        })?;

        if auth_user.role != "admin" {
            return Err((
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({"error": "Admin access required"})),
            )
                .into_response());
        }

        Ok(RequireAdmin(auth_user))
    }
}
