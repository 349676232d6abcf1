//! Bearer-token authentication for REST handlers and the relay `join`.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use ojas_shared::clock;
use ojas_shared::models::User;
use ojas_store::StoreError;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::error::ServerError;

/// The user behind a valid session token.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ServerError::Auth("Missing bearer token".into()))?;
        authenticate(state, token).await.map(AuthUser)
    }
}

/// Verify a session token and load the account it names.
pub async fn authenticate(state: &AppState, token: &str) -> Result<User, ServerError> {
    let claims = state.sessions.verify(token, clock::now())?;

    let db = state.db.lock().await;
    db.get_user(&claims.user_id).map_err(|e| match e {
        StoreError::NotFound => ServerError::Auth("Unknown user".into()),
        other => other.into(),
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let token = bearer_token(headers).unwrap_or("");

    // Constant-time comparison to prevent timing attacks on admin token.
    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(auth).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(&headers_with("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers_with("Basic abc")), None);
        assert_eq!(bearer_token(&headers_with("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_admin_token() {
        let mut config = ServerConfig::default();
        assert!(matches!(
            verify_admin_token(&headers_with("Bearer x"), &config),
            Err(ServerError::Forbidden(_))
        ));

        config.admin_token = Some("s3cret".into());
        assert!(verify_admin_token(&headers_with("Bearer s3cret"), &config).is_ok());
        assert!(verify_admin_token(&headers_with("Bearer s3cre"), &config).is_err());
        assert!(verify_admin_token(&HeaderMap::new(), &config).is_err());
    }
}
