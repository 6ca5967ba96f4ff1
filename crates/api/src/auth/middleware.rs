//! Authentication middleware for Axum

use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, COOKIE},
        StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use super::jwt::JwtManager;

/// Cookie the auth provider stores its session token in
pub const SESSION_COOKIE: &str = "__session";

/// Authenticated user information extracted from the session token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
    pub email: Option<String>,
}

/// State needed for authentication
#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: JwtManager,
}

fn extract_token_from_cookie(request: &Request) -> Option<String> {
    request
        .headers()
        .get(COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|cookie| {
                cookie
                    .trim()
                    .strip_prefix(SESSION_COOKIE)
                    .and_then(|rest| rest.strip_prefix('='))
                    .filter(|token| !token.is_empty())
                    .map(str::to_string)
            })
        })
}

/// Extract bearer token from Authorization header, falling back to the session cookie
fn extract_bearer_token(request: &Request) -> Option<String> {
    if let Some(header) = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        if let Some(token) = header.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }

    extract_token_from_cookie(request)
}

fn authenticate(auth_state: &AuthState, token: &str) -> Result<AuthUser, AuthError> {
    let claims = auth_state.jwt_manager.validate(token).map_err(|e| {
        tracing::debug!(error = %e, "Token validation failed");
        AuthError::InvalidToken
    })?;

    Ok(AuthUser {
        user_id: claims.sub,
        email: claims
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty()),
    })
}

/// Middleware that requires authentication
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let auth_result = match extract_bearer_token(&request) {
        Some(token) => authenticate(&auth_state, &token),
        None => Err(AuthError::MissingAuth),
    };

    match auth_result {
        Ok(auth_user) => {
            tracing::debug!(path = %path, user_id = %auth_user.user_id, "require_auth: authenticated");
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(path = %path, error = ?err, "require_auth: authentication failed");
            err.into_response()
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,
    #[error("Invalid or expired token")]
    InvalidToken,
}

impl IntoResponse for AuthError {
    /// Every failure looks the same to the caller.
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Unauthorized" })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::issue_token;
    use axum::{body::Body, routing::get, Extension, Router};
    use tower::ServiceExt;

    const SECRET: &str = "test-jwt-secret-key-for-testing-only";

    fn app() -> Router {
        let auth_state = AuthState {
            jwt_manager: JwtManager::new(SECRET),
        };
        Router::new()
            .route(
                "/whoami",
                get(|Extension(user): Extension<AuthUser>| async move {
                    format!("{}|{}", user.user_id, user.email.unwrap_or_default())
                }),
            )
            .layer(axum::middleware::from_fn_with_state(auth_state, require_auth))
    }

    async fn call(request: axum::http::Request<Body>) -> (StatusCode, String) {
        let response = app().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn request() -> axum::http::request::Builder {
        axum::http::Request::builder().uri("/whoami")
    }

    #[tokio::test]
    async fn test_bearer_token_accepted() {
        let token = issue_token(SECRET, "user_1", Some("a@example.com"), 3600);
        let (status, body) = call(
            request()
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "user_1|a@example.com");
    }

    #[tokio::test]
    async fn test_session_cookie_accepted() {
        let token = issue_token(SECRET, "user_2", None, 3600);
        let (status, body) = call(
            request()
                .header(COOKIE, format!("theme=dark; {SESSION_COOKIE}={token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "user_2|");
    }

    #[tokio::test]
    async fn test_missing_and_invalid_look_the_same() {
        let (missing_status, missing_body) = call(request().body(Body::empty()).unwrap()).await;
        let (invalid_status, invalid_body) = call(
            request()
                .header(AUTHORIZATION, "Bearer nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(missing_status, StatusCode::UNAUTHORIZED);
        assert_eq!(invalid_status, StatusCode::UNAUTHORIZED);
        assert_eq!(missing_body, invalid_body);
    }

    #[tokio::test]
    async fn test_cookie_with_similar_name_ignored() {
        let token = issue_token(SECRET, "user_3", None, 3600);
        let (status, _) = call(
            request()
                .header(COOKIE, format!("{SESSION_COOKIE}_other={token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
