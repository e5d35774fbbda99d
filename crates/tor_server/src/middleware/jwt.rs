//! JWT authentication. Accepts `Authorization: Bearer <token>` or the
//! `auth-token` cookie, and puts the resulting [`Session`] into request
//! extensions for handlers.

use axum::extract::Request;
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use axum::Extension;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use tor_core::error::TorError;
use tor_core::principal::{Session, SessionClaims};
use tracing::debug;

use crate::error::AppError;

pub const SESSION_COOKIE: &str = "auth-token";

#[derive(Clone)]
pub struct JwtConfig {
    key: DecodingKey,
    validation: Validation,
}

impl JwtConfig {
    /// HS256 with a shared secret. `exp` is checked when present.
    pub fn from_secret(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn decode_session(&self, token: &str) -> Result<Session, TorError> {
        let data = decode::<SessionClaims>(token, &self.key, &self.validation).map_err(|e| {
            debug!(error = %e, "rejected session token");
            TorError::Unauthenticated("invalid or expired session token".into())
        })?;
        Session::from_claims(&data.claims)
    }
}

/// Bearer header wins over the cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if bearer.is_some() {
        return bearer;
    }
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value)
}

pub async fn jwt_auth(
    Extension(config): Extension<JwtConfig>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(req.headers())
        .ok_or_else(|| TorError::Unauthenticated("no session token".into()))?;
    let session = config.decode_session(token)?;
    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}
