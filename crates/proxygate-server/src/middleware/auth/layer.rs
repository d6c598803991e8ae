//! Authentication middleware layer.

use super::{
    jwt::TokenService,
    types::{AuthUser, TokenType},
};
use crate::error::{ApiError, AuthError};
use crate::store::CredentialStore;
use axum::{
    extract::Request,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::debug;

/// Authentication layer: bearer token plus a live identity re-check.
#[derive(Clone)]
pub struct AuthLayer {
    tokens: TokenService,
    store: Arc<dyn CredentialStore>,
}

impl AuthLayer {
    /// Gate validating bearer tokens and re-reading the identity from `store`.
    pub fn new(tokens: TokenService, store: Arc<dyn CredentialStore>) -> Self {
        Self { tokens, store }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            tokens: self.tokens.clone(),
            store: self.store.clone(),
        }
    }
}

/// Authentication middleware service.
#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    tokens: TokenService,
    store: Arc<dyn CredentialStore>,
}

impl<S> Service<Request> for AuthMiddleware<S>
where
    S: Service<Request, Response = Response, Error = std::convert::Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let tokens = self.tokens.clone();
        let store = self.store.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let user = match authenticate(&tokens, store.as_ref(), req.headers()).await {
                Ok(user) => user,
                Err(err) => return Ok(err.into_response()),
            };

            req.extensions_mut().insert(user.clone());
            let mut response = inner.call(req).await?;
            // Lets outer layers attribute the request.
            response.extensions_mut().insert(user);
            Ok(response)
        })
    }
}

/// Resolve the bearer token in `headers` to a live identity.
///
/// Signature and expiry are checked first, then the identity is re-read
/// from the store so deactivation takes effect before the token expires.
pub async fn authenticate(
    tokens: &TokenService,
    store: &dyn CredentialStore,
    headers: &HeaderMap,
) -> Result<AuthUser, ApiError> {
    let token = extract_token(headers)?;

    let claims = tokens.validate(token)?;
    if claims.token_type != TokenType::Access {
        debug!(user_id = claims.user_id, "Refresh token presented as access token");
        return Err(ApiError::InvalidToken);
    }

    let user = store
        .find_user_by_id(claims.user_id)
        .await
        .map_err(AuthError::from)?
        .ok_or(AuthError::IdentityNotFound)?;

    if !user.is_active {
        return Err(AuthError::IdentityInactive.into());
    }

    Ok(AuthUser::new(&user, claims))
}

fn extract_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(ApiError::Unauthorized)?
        .to_str()
        .map_err(|_| ApiError::Unauthorized)?;

    match value.split_once(' ') {
        Some((scheme, token)) if scheme == "Bearer" && !token.trim().is_empty() => {
            Ok(token.trim())
        }
        _ => Err(ApiError::Unauthorized),
    }
}
