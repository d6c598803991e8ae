//! CONNECT tunnel listener.

use super::access::{AccessDecision, AccessPolicy, Grant};
use crate::audit::AuditSink;
use crate::config::ProxyConfig;
use crate::shutdown::ShutdownCoordinator;
use crate::store::RequestLog;
use axum::body::Body;
use hyper::{
    body::Incoming,
    header::{self, HeaderValue},
    server::conn::http1,
    service::service_fn,
    upgrade::OnUpgrade,
    Method, Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use std::{
    convert::Infallible,
    io,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, info_span, warn, Instrument};

/// Tunnel failures surfaced to the client as an HTTP status.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to bind tunnel listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("CONNECT request without a host:port target")]
    MissingTarget,

    #[error("upstream {target} unreachable: {source}")]
    Upstream {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("upstream {0} did not accept within the connect timeout")]
    UpstreamTimeout(String),
}

impl ProxyError {
    /// Status sent to the client for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Bind { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MissingTarget => StatusCode::BAD_REQUEST,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

struct TunnelContext {
    policy: AccessPolicy,
    challenge: HeaderValue,
    connect_timeout: Duration,
    audit: AuditSink,
    shutdown: ShutdownCoordinator,
}

/// Accepts CONNECT requests, applies the access policy and splices
/// admitted clients to their destination.
pub struct TunnelServer {
    listener: TcpListener,
    ctx: Arc<TunnelContext>,
}

impl TunnelServer {
    /// Bind the tunnel listener on `addr`.
    pub async fn bind(
        config: &ProxyConfig,
        policy: AccessPolicy,
        audit: AuditSink,
        shutdown: ShutdownCoordinator,
    ) -> Result<Self, ProxyError> {
        let addr = config.socket_addr().map_err(|e| ProxyError::Bind {
            addr: SocketAddr::from(([0, 0, 0, 0], config.port)),
            source: io::Error::new(io::ErrorKind::InvalidInput, e),
        })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ProxyError::Bind { addr, source })?;

        Ok(Self::from_listener(listener, config, policy, audit, shutdown))
    }

    /// Serve on an already bound listener.
    pub fn from_listener(
        listener: TcpListener,
        config: &ProxyConfig,
        policy: AccessPolicy,
        audit: AuditSink,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        let challenge = HeaderValue::from_str(&format!("Basic realm=\"{}\"", config.realm))
            .unwrap_or_else(|_| {
                warn!(realm = %config.realm, "Realm is not a valid header value, using default");
                HeaderValue::from_static("Basic realm=\"proxygate\"")
            });

        Self {
            listener,
            ctx: Arc::new(TunnelContext {
                policy,
                challenge,
                connect_timeout: config.connect_timeout(),
                audit,
                shutdown,
            }),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown.
    pub async fn run(self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "Tunnel listener accepting connections");
        }

        loop {
            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept tunnel connection");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                },
                _ = self.ctx.shutdown.cancelled() => break,
            };

            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| handle(req, peer, ctx.clone()));
                let conn = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .with_upgrades();

                if let Err(e) = conn.await {
                    debug!(%peer, error = %e, "Tunnel connection ended with error");
                }
            });
        }

        info!("Tunnel listener stopped");
    }
}

async fn handle(
    mut req: Request<Incoming>,
    peer: SocketAddr,
    ctx: Arc<TunnelContext>,
) -> Result<Response<Body>, Infallible> {
    let started = Instant::now();
    let timestamp = chrono::Utc::now();
    let target = req.uri().authority().map(|a| a.to_string());
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let span = info_span!(
        "tunnel",
        method = %req.method(),
        target = target.as_deref().unwrap_or("-"),
        origin = %peer,
    );

    let (response, user_id) = async {
        if req.method() != Method::CONNECT {
            debug!("Non-CONNECT request on tunnel listener");
            let mut res = status_response(StatusCode::METHOD_NOT_ALLOWED);
            res.headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("CONNECT"));
            return (res, None);
        }

        let Some(target) = target.clone() else {
            return (status_response(ProxyError::MissingTarget.status_code()), None);
        };

        let proxy_authorization = req
            .headers()
            .get(header::PROXY_AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        match ctx.policy.decide(&peer.to_string(), proxy_authorization).await {
            AccessDecision::Allow(grant) => {
                let upstream = match dial(&target, ctx.connect_timeout).await {
                    Ok(upstream) => upstream,
                    Err(e) => {
                        warn!(error = %e, "Upstream connect failed");
                        return (status_response(e.status_code()), grant.user_id());
                    }
                };

                match &grant {
                    Grant::TrustedNetwork => info!("Tunnel admitted from trusted network"),
                    Grant::Credentials(identity) => {
                        info!(username = %identity.username, "Tunnel admitted with credentials")
                    }
                }

                let upgrade = hyper::upgrade::on(&mut req);
                tokio::spawn(
                    splice(upgrade, upstream, ctx.shutdown.clone()).in_current_span(),
                );
                (status_response(StatusCode::OK), grant.user_id())
            }
            AccessDecision::Challenge => {
                info!("Tunnel challenged");
                let mut res = status_response(StatusCode::PROXY_AUTHENTICATION_REQUIRED);
                res.headers_mut()
                    .insert(header::PROXY_AUTHENTICATE, ctx.challenge.clone());
                (res, None)
            }
        }
    }
    .instrument(span)
    .await;

    let host = target.clone().unwrap_or_default();
    ctx.audit.record(RequestLog {
        user_id,
        remote_addr: peer.ip().to_string(),
        method: req.method().to_string(),
        url: target.unwrap_or_else(|| req.uri().to_string()),
        host,
        user_agent,
        status_code: response.status().as_u16(),
        response_size: 0,
        duration_ms: started.elapsed().as_millis() as i64,
        timestamp,
    });

    Ok(response)
}

fn status_response(status: StatusCode) -> Response<Body> {
    let mut res = Response::new(Body::empty());
    *res.status_mut() = status;
    res
}

async fn dial(target: &str, timeout: Duration) -> Result<TcpStream, ProxyError> {
    match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(ProxyError::Upstream {
            target: target.to_string(),
            source,
        }),
        Err(_) => Err(ProxyError::UpstreamTimeout(target.to_string())),
    }
}

/// Relay bytes both ways until either side closes or shutdown starts.
async fn splice(upgrade: OnUpgrade, mut upstream: TcpStream, shutdown: ShutdownCoordinator) {
    let upgraded = match upgrade.await {
        Ok(upgraded) => upgraded,
        Err(e) => {
            warn!(error = %e, "Tunnel upgrade failed");
            return;
        }
    };
    let mut client = TokioIo::new(upgraded);

    tokio::select! {
        copied = tokio::io::copy_bidirectional(&mut client, &mut upstream) => match copied {
            Ok((sent, received)) => debug!(sent, received, "Tunnel closed"),
            Err(e) => debug!(error = %e, "Tunnel closed with error"),
        },
        _ = shutdown.cancelled() => debug!("Tunnel closed by shutdown"),
    }
}
