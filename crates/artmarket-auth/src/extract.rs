//! Request authentication
//!
//! [`AuthUser`] is the handler-side identity: an axum extractor that reads
//! `Authorization: Bearer <token>`, validates it against the app's
//! [`JwtService`] and hands the handler a typed user.

use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header, request::Parts, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::debug;

use artmarket_types::{Role, UserId};

use crate::error::AuthError;
use crate::jwt::JwtService;

/// Authenticated marketplace user
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: UserId,
    pub username: String,
    pub role: Role,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    JwtService: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::MissingToken)?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::MissingToken)?;

        let jwt = JwtService::from_ref(state);
        let claims = jwt.validate(token).map_err(|e| {
            debug!(error = %e, "bearer token rejected");
            e
        })?;

        Ok(AuthUser {
            id: claims.user_id()?,
            username: claims.username,
            role: claims.role,
        })
    }
}

impl<S> FromRef<std::sync::Arc<S>> for JwtService
where
    JwtService: FromRef<S>,
{
    fn from_ref(state: &std::sync::Arc<S>) -> Self {
        JwtService::from_ref(&**state)
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": self.client_message(),
        });
        (status, Json(body)).into_response()
    }
}
