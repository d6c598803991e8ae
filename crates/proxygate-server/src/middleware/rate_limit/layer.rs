//! Rate limit middleware layer.

use super::{
    store::SlidingWindowLimiter,
    types::{RateLimitResult, WindowConfig},
};
use crate::{error::ApiError, middleware::auth::types::AuthUser, proxy::AllowList};
use axum::{
    extract::{ConnectInfo, Request},
    http::{header::HeaderName, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::debug;

/// Rate limit layer over a shared limiter.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<SlidingWindowLimiter>,
    trusted_proxies: Arc<AllowList>,
}

impl RateLimitLayer {
    /// Limit by peer address; forwarded headers are ignored.
    pub fn new(limiter: Arc<SlidingWindowLimiter>) -> Self {
        Self {
            limiter,
            trusted_proxies: Arc::new(AllowList::default()),
        }
    }

    /// Build a layer with a private limiter.
    pub fn from_config(config: WindowConfig) -> Self {
        Self::new(Arc::new(SlidingWindowLimiter::new(config)))
    }

    /// Honour `X-Forwarded-For` / `X-Real-IP` from these peers only.
    pub fn with_trusted_proxies(mut self, trusted_proxies: Arc<AllowList>) -> Self {
        self.trusted_proxies = trusted_proxies;
        self
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitMiddleware {
            inner,
            limiter: self.limiter.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Service produced by [`RateLimitLayer`].
#[derive(Clone)]
pub struct RateLimitMiddleware<S> {
    inner: S,
    limiter: Arc<SlidingWindowLimiter>,
    trusted_proxies: Arc<AllowList>,
}

impl<S> Service<Request> for RateLimitMiddleware<S>
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
        let limiter = self.limiter.clone();
        let mut inner = self.inner.clone();
        let key = rate_limit_key(&req, &self.trusted_proxies);

        Box::pin(async move {
            let result = limiter.check(&key);

            let admitted = match result.into_result() {
                Ok(admitted) => admitted,
                Err(exceeded) => {
                    let mut response = ApiError::from(exceeded).into_response();
                    add_rate_limit_headers(response.headers_mut(), &result);
                    return Ok(response);
                }
            };

            let mut response = inner.call(req).await?;
            add_rate_limit_headers(response.headers_mut(), &admitted);
            Ok(response)
        })
    }
}

fn add_rate_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert(
        HeaderName::from_static("x-ratelimit-limit"),
        HeaderValue::from(result.limit),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-remaining"),
        HeaderValue::from(result.remaining),
    );
}

/// Limiter key: the authenticated identity when one is already attached,
/// else the client IP.
///
/// The identity branch only applies when the limiter is stacked inside the
/// authentication layer. The admin API mounts it outside, so there every
/// key is an address.
pub fn rate_limit_key(req: &Request, trusted_proxies: &AllowList) -> String {
    if let Some(user) = req.extensions().get::<AuthUser>() {
        return format!("user:{}", user.id);
    }

    match client_ip(req, trusted_proxies) {
        Some(ip) => format!("ip:{ip}"),
        None => "ip:unknown".to_string(),
    }
}

/// Client address for a request.
///
/// The direct peer from `ConnectInfo` is authoritative. Only when that peer
/// is a trusted proxy are the first `X-Forwarded-For` hop and then
/// `X-Real-IP` used instead; unparseable header values fall back to the peer.
pub fn client_ip(req: &Request, trusted_proxies: &AllowList) -> Option<IpAddr> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())?;

    if !trusted_proxies.contains(peer) {
        return Some(peer);
    }

    let headers = req.headers();
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<IpAddr>().ok())
        });

    if let Some(ip) = forwarded {
        debug!(%peer, client = %ip, "Client address from trusted proxy");
    }
    Some(forwarded.unwrap_or(peer))
}
