//! Request logging middleware.

use crate::audit::AuditSink;
use crate::middleware::{auth::types::AuthUser, rate_limit::client_ip};
use crate::proxy::AllowList;
use crate::store::RequestLog;
use axum::{
    body::HttpBody,
    extract::Request,
    http::header,
    response::Response,
};
use futures::future::BoxFuture;
use std::{
    sync::Arc,
    task::{Context, Poll},
    time::Instant,
};
use tower::{Layer, Service};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Logs each request and forwards a record to the audit sink.
#[derive(Clone)]
pub struct RequestLogLayer {
    sink: AuditSink,
    trusted_proxies: Arc<AllowList>,
}

impl RequestLogLayer {
    /// Record the peer address of each request into `sink`.
    pub fn new(sink: AuditSink) -> Self {
        Self {
            sink,
            trusted_proxies: Arc::new(AllowList::default()),
        }
    }

    /// Resolve the client address through these proxies, as the limiter does.
    pub fn with_trusted_proxies(mut self, trusted_proxies: Arc<AllowList>) -> Self {
        self.trusted_proxies = trusted_proxies;
        self
    }
}

impl<S> Layer<S> for RequestLogLayer {
    type Service = RequestLogMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLogMiddleware {
            inner,
            sink: self.sink.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Service produced by [`RequestLogLayer`].
#[derive(Clone)]
pub struct RequestLogMiddleware<S> {
    inner: S,
    sink: AuditSink,
    trusted_proxies: Arc<AllowList>,
}

impl<S> Service<Request> for RequestLogMiddleware<S>
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
        let sink = self.sink.clone();
        let mut inner = self.inner.clone();

        let request_id = req
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let method = req.method().to_string();
        let url = req.uri().to_string();
        let remote_addr = client_ip(&req, &self.trusted_proxies)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .or_else(|| req.uri().host().map(String::from))
            .unwrap_or_default();
        let user_agent = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_default();

        let span = info_span!(
            "request",
            request_id = %request_id,
            method = %method,
            path = %req.uri().path(),
            client_ip = %remote_addr,
        );

        Box::pin(
            async move {
                let started = Instant::now();
                let timestamp = chrono::Utc::now();
                info!(event = "request_started", uri = %url, user_agent = %user_agent);

                let response = inner.call(req).await?;

                let duration = started.elapsed();
                let status = response.status();
                let user_id = response.extensions().get::<AuthUser>().map(|u| u.id);

                info!(
                    event = "request_completed",
                    status = status.as_u16(),
                    duration_ms = duration.as_millis() as u64,
                    user_id,
                );

                sink.record(RequestLog {
                    user_id,
                    remote_addr,
                    method,
                    url,
                    host,
                    user_agent,
                    status_code: status.as_u16(),
                    response_size: response_size(&response),
                    duration_ms: duration.as_millis() as i64,
                    timestamp,
                });

                Ok(response)
            }
            .instrument(span),
        )
    }
}

/// Declared body length, zero when streaming or unknown.
fn response_size(response: &Response) -> i64 {
    response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .or_else(|| {
            response
                .body()
                .size_hint()
                .exact()
                .and_then(|n| i64::try_from(n).ok())
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::auth::types::{Claims, TokenType};
    use crate::store::Role;
    use axum::{body::Body, extract::ConnectInfo, http::StatusCode, routing::get, Router};
    use std::net::SocketAddr;
    use tower::ServiceExt;

    async fn attach_user(mut res: Response) -> Response {
        let claims = Claims::new(42, "eve", Role::User, TokenType::Access, 0, 60);
        res.extensions_mut().insert(AuthUser {
            id: 42,
            username: "eve".into(),
            role: Role::User,
            claims,
        });
        res
    }

    #[tokio::test]
    async fn test_records_request() {
        let (sink, mut rx) = AuditSink::new(8);
        let app = Router::new()
            .route("/hello", get(|| async { "hello" }))
            .layer(
                RequestLogLayer::new(sink)
                    .with_trusted_proxies(Arc::new(AllowList::from_entries(&["127.0.0.1"]))),
            );

        let mut req = Request::builder()
            .uri("/hello?x=1")
            .header("host", "gate.local")
            .header("user-agent", "curl/8")
            .header("x-forwarded-for", "198.51.100.4")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 5000))));
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let log = rx.recv().await.unwrap();
        assert_eq!(log.method, "GET");
        assert_eq!(log.url, "/hello?x=1");
        assert_eq!(log.host, "gate.local");
        assert_eq!(log.user_agent, "curl/8");
        assert_eq!(log.remote_addr, "198.51.100.4");
        assert_eq!(log.status_code, 200);
        assert_eq!(log.response_size, 5);
        assert_eq!(log.user_id, None);
    }

    #[tokio::test]
    async fn test_attributes_authenticated_user() {
        let (sink, mut rx) = AuditSink::new(8);
        let app = Router::new()
            .route("/me", get(|| async { StatusCode::NO_CONTENT }))
            .layer(axum::middleware::map_response(attach_user))
            .layer(RequestLogLayer::new(sink));

        app.oneshot(Request::builder().uri("/me").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let log = rx.recv().await.unwrap();
        assert_eq!(log.user_id, Some(42));
        assert_eq!(log.status_code, 204);
        assert_eq!(log.remote_addr, "unknown");
    }
}
