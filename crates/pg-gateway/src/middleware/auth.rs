//! JWT authentication middleware.
//!
//! Verifies `Authorization: Bearer <token>` with the gateway's HS256 secret
//! and attaches the verified claims ([`TokenClaims`]) and, when the token
//! names a user, an [`AuthenticatedUser`] to the request extensions. Requests
//! without the header pass through anonymously; a present but invalid token
//! is rejected with 401.

use crate::domain::identity::{AuthenticatedUser, TokenClaims};
use crate::domain::ApiError;
use axum::{
    body::Body,
    http::{header, Request},
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{debug, warn};

/// Why a bearer token was refused
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authorization header is not of the correct bearer scheme format")]
    MalformedHeader,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::unauthenticated(e.to_string())
    }
}

/// HS256 token verifier
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &SecretString, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Tokens minted by database functions often carry no `exp`
        validation.required_spec_claims.clear();
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        Self {
            key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
        }
    }

    /// Verify a compact JWT and return its payload
    pub fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let data = decode::<Map<String, Value>>(token, &self.key, &self.validation)?;
        Ok(TokenClaims(data.claims))
    }
}

/// Extract the bearer token, if the request carries an Authorization header
fn bearer_token<B>(req: &Request<B>) -> Option<Result<&str, AuthError>> {
    let value = req.headers().get(header::AUTHORIZATION)?;
    let parsed = value
        .to_str()
        .ok()
        .and_then(|v| v.split_once(' '))
        .filter(|(scheme, token)| scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty())
        .map(|(_, token)| token.trim())
        .ok_or(AuthError::MalformedHeader);
    Some(parsed)
}

/// Authenticate `req` in place. `Ok` means the request may proceed.
fn authenticate(verifier: &JwtVerifier, req: &mut Request<Body>) -> Result<(), AuthError> {
    let claims = match bearer_token(req) {
        None => return Ok(()),
        Some(token) => verifier.verify(token?)?,
    };

    if let Some(id) = claims.user_id() {
        debug!(user_id = %id, "Authenticated request");
        let user = AuthenticatedUser {
            id,
            role: claims.role().map(str::to_string),
        };
        req.extensions_mut().insert(user);
    }
    req.extensions_mut().insert(claims);
    Ok(())
}

/// Authentication layer
#[derive(Clone)]
pub struct JwtAuthLayer {
    verifier: Arc<JwtVerifier>,
}

impl JwtAuthLayer {
    pub fn new(verifier: JwtVerifier) -> Self {
        Self {
            verifier: Arc::new(verifier),
        }
    }
}

impl<S> Layer<S> for JwtAuthLayer {
    type Service = JwtAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        JwtAuthService {
            inner,
            verifier: Arc::clone(&self.verifier),
        }
    }
}

/// Authentication service
#[derive(Clone)]
pub struct JwtAuthService<S> {
    inner: S,
    verifier: Arc<JwtVerifier>,
}

impl<S> Service<Request<Body>> for JwtAuthService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let verifier = Arc::clone(&self.verifier);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if let Err(e) = authenticate(&verifier, &mut req) {
                warn!(error = %e, "Rejected bearer token");
                return Ok(ApiError::from(e).into_response());
            }
            inner.call(req).await
        })
    }
}
