//! Bearer-token authentication for the file API.
//!
//! Tokens are HS256 JWTs issued elsewhere; the gateway only verifies the
//! signature and expiry, then exposes the claims to handlers as a request
//! extension.

use crate::errors::AppError;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Caller identity.
    pub sub: String,
    /// Expiration timestamp (seconds since epoch).
    pub exp: u64,
}

#[derive(Clone)]
pub struct AuthState {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl AuthState {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

/// Reject requests without a valid `Authorization: Bearer <jwt>` header.
pub async fn require_bearer(
    State(auth): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::unauthorized("missing bearer token"))?;

    let claims = decode::<Claims>(token, &auth.decoding_key, &auth.validation)
        .map_err(|err| {
            tracing::debug!("token validation failed: {}", err);
            AppError::unauthorized("invalid or expired token")
        })?
        .claims;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{
        Extension, Router,
        body::Body,
        http::{Request, StatusCode},
        middleware,
        routing::get,
    };
    use jsonwebtoken::{EncodingKey, Header, encode};
    use tower::util::ServiceExt;

    pub(crate) const SECRET: &str = "test-secret-key-for-testing-only";

    pub(crate) fn token_with(secret: &str, exp_offset_secs: i64) -> String {
        let exp = (chrono::Utc::now().timestamp() + exp_offset_secs) as u64;
        let claims = Claims {
            sub: "tester".into(),
            exp,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    pub(crate) fn valid_token() -> String {
        token_with(SECRET, 3600)
    }

    async fn whoami(Extension(claims): Extension<Claims>) -> String {
        claims.sub
    }

    fn app() -> Router {
        Router::new()
            .route("/", get(whoami))
            .layer(middleware::from_fn_with_state(
                Arc::new(AuthState::new(SECRET)),
                require_bearer,
            ))
    }

    async fn status_with(auth: Option<String>) -> StatusCode {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = auth {
            builder = builder.header(AUTHORIZATION, value);
        }
        app()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn valid_token_passes_claims_through() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(AUTHORIZATION, format!("Bearer {}", valid_token()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(&body[..], b"tester");
    }

    #[tokio::test]
    async fn missing_or_bad_tokens_are_unauthorized() {
        assert_eq!(status_with(None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_with(Some("Basic dXNlcjpwYXNz".into())).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_with(Some(format!("Bearer {}", token_with("other-secret", 3600)))).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_with(Some(format!("Bearer {}", token_with(SECRET, -3600)))).await,
            StatusCode::UNAUTHORIZED
        );
    }
}
