//! Authentication extractor.
//!
//! With `AUTH_SECRET` configured every sync request must carry it as a Bearer
//! token. Without it, requests are anonymous unless they send a malformed
//! header.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
};

use crate::AppState;

/// Header naming the user the request's mutations are attributed to.
pub const USER_HEADER: &str = "x-matchsync-user";

/// Authenticated caller extracted from request.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    /// The bearer token, or "anonymous"
    pub token: String,
    /// User from the attribution header, if sent
    pub user: Option<String>,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = attributed_user(&parts.headers);
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let token = match auth_header {
            Some(header) if header.starts_with("Bearer ") => {
                let token = header.trim_start_matches("Bearer ").to_string();
                if token.is_empty() {
                    return Err((StatusCode::UNAUTHORIZED, "Empty bearer token"));
                }
                if let Some(secret) = &state.config.auth_secret {
                    if token != *secret {
                        tracing::warn!(user = ?user, "rejected bearer token");
                        return Err((StatusCode::UNAUTHORIZED, "Invalid bearer token"));
                    }
                }
                token
            }
            Some(_) => {
                return Err((
                    StatusCode::UNAUTHORIZED,
                    "Invalid authorization header format",
                ))
            }
            None if state.config.auth_secret.is_none() => "anonymous".to_string(),
            None => return Err((StatusCode::UNAUTHORIZED, "Missing authorization header")),
        };

        Ok(AuthUser { token, user })
    }
}

fn attributed_user(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|user| !user.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn attribution_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(attributed_user(&headers), None);

        headers.insert(USER_HEADER, HeaderValue::from_static("  "));
        assert_eq!(attributed_user(&headers), None);

        headers.insert(USER_HEADER, HeaderValue::from_static("alice"));
        assert_eq!(attributed_user(&headers).as_deref(), Some("alice"));
    }
}
