//! Authorization middleware layer.

use crate::{error::ApiError, middleware::auth::types::AuthUser, store::Role};
use axum::{
    extract::Request,
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::warn;

/// Role gate. Runs after [`AuthLayer`](crate::middleware::auth::AuthLayer).
#[derive(Clone, Copy)]
pub struct RequireRoleLayer {
    role: Role,
}

impl RequireRoleLayer {
    /// Require `role` of the attached identity.
    pub fn new(role: Role) -> Self {
        Self { role }
    }

    /// Shorthand for `RequireRoleLayer::new(Role::Admin)`.
    pub fn admin() -> Self {
        Self::new(Role::Admin)
    }
}

impl<S> Layer<S> for RequireRoleLayer {
    type Service = RequireRoleMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequireRoleMiddleware {
            inner,
            role: self.role,
        }
    }
}

/// Service produced by [`RequireRoleLayer`].
#[derive(Clone)]
pub struct RequireRoleMiddleware<S> {
    inner: S,
    role: Role,
}

impl<S> Service<Request> for RequireRoleMiddleware<S>
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

    fn call(&mut self, req: Request) -> Self::Future {
        let required = self.role;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if let Err(err) = check_role(req.extensions().get::<AuthUser>(), required) {
                return Ok(err.into_response());
            }
            inner.call(req).await
        })
    }
}

/// Missing identity and wrong role are both forbidden.
pub fn check_role(user: Option<&AuthUser>, required: Role) -> Result<(), ApiError> {
    match user {
        Some(user) if user.role == required => Ok(()),
        Some(user) => {
            warn!(
                user_id = user.id,
                role = %user.role,
                required = %required,
                "Access denied: insufficient role"
            );
            Err(ApiError::Forbidden)
        }
        None => {
            warn!(required = %required, "Access denied: no authenticated identity");
            Err(ApiError::Forbidden)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::auth::types::{Claims, TokenType};
    use axum::{body::Body, http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    fn user(role: Role) -> AuthUser {
        AuthUser {
            id: 1,
            username: "u".into(),
            role,
            claims: Claims::new(1, "u", role, TokenType::Access, 0, 60),
        }
    }

    #[test]
    fn test_check_role() {
        assert!(check_role(Some(&user(Role::Admin)), Role::Admin).is_ok());
        assert!(matches!(
            check_role(Some(&user(Role::User)), Role::Admin),
            Err(ApiError::Forbidden)
        ));
        assert!(matches!(check_role(None, Role::Admin), Err(ApiError::Forbidden)));
    }

    #[tokio::test]
    async fn test_layer_blocks_non_admin() {
        let app = Router::new()
            .route("/", get(|| async { "secret" }))
            .layer(RequireRoleLayer::admin());

        let mut req = Request::builder().uri("/").body(Body::empty()).unwrap();
        req.extensions_mut().insert(user(Role::User));
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let mut req = Request::builder().uri("/").body(Body::empty()).unwrap();
        req.extensions_mut().insert(user(Role::Admin));
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
