//! HTTP-01 through a short-lived local listener
//!
//! The listener answers exactly one path, `/.well-known/acme-challenge/<token>`,
//! and only to `GET`. It is torn down through a [`CancellationToken`] in
//! cleanup; cleanup waits for the accept loop to exit so the port is free
//! when it returns.

use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{well_known_path, SolveChallenge};
use crate::error::AcmeError;

/// Port the listener binds unless configured otherwise
pub const DEFAULT_HTTP_PORT: u16 = 9999;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSolverOptions {
    /// Address the listener binds; all interfaces by default
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Must be reachable from the CA as port 80 of the domain
    #[serde(default = "default_port")]
    pub port: u16,
    /// Pause after bind before the CA is told to validate
    #[serde(default = "default_settle_delay", with = "crate::config::duration_secs")]
    pub settle_delay: Duration,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_settle_delay() -> Duration {
    Duration::from_secs(1)
}

impl Default for HttpSolverOptions {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            settle_delay: default_settle_delay(),
        }
    }
}

/// Status and body for one challenge request
pub fn respond(
    method: &Method,
    path: &str,
    token: &str,
    key_authorization: &str,
) -> (StatusCode, String) {
    if method != Method::GET {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            "Method Not Allowed".to_string(),
        );
    }
    if path != well_known_path(token) {
        return (StatusCode::NOT_FOUND, "Not Found".to_string());
    }
    (StatusCode::OK, key_authorization.to_string())
}

struct RunningListener {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

pub struct HttpSolver {
    domain: String,
    token: String,
    options: HttpSolverOptions,
    listener: Option<RunningListener>,
}

impl std::fmt::Debug for HttpSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSolver")
            .field("domain", &self.domain)
            .field("token", &self.token)
            .field("options", &self.options)
            .field("listening", &self.local_addr())
            .finish()
    }
}

impl HttpSolver {
    pub fn new(domain: &str, token: &str, options: HttpSolverOptions) -> Self {
        Self {
            domain: domain.to_string(),
            token: token.to_string(),
            options,
            listener: None,
        }
    }

    /// Bound address while the listener is up
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(|l| l.local_addr)
    }
}

#[async_trait]
impl SolveChallenge for HttpSolver {
    async fn solve_challenge(&mut self, key_authorization: &str) -> Result<(), AcmeError> {
        if self.listener.is_some() {
            debug!(domain = %self.domain, "HTTP challenge listener already running");
            return Ok(());
        }

        let addr = SocketAddr::new(self.options.bind_address, self.options.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AcmeError::Solver {
                domain: self.domain.clone(),
                message: format!("failed to bind {addr}: {e}"),
            })?;
        let local_addr = listener.local_addr().map_err(|e| AcmeError::Solver {
            domain: self.domain.clone(),
            message: e.to_string(),
        })?;

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve(
            listener,
            shutdown.clone(),
            Arc::from(self.token.as_str()),
            Arc::from(key_authorization),
        ));
        self.listener = Some(RunningListener {
            local_addr,
            shutdown,
            task,
        });

        info!(domain = %self.domain, addr = %local_addr, "Started HTTP server for HTTP challenge");

        // Give the accept loop time to come up before the CA fetches
        tokio::time::sleep(self.options.settle_delay).await;
        Ok(())
    }

    async fn cleanup_challenge(&mut self, _key_authorization: &str) -> Result<(), AcmeError> {
        let Some(listener) = self.listener.take() else {
            return Ok(());
        };

        listener.shutdown.cancel();
        if let Err(e) = listener.task.await {
            warn!(domain = %self.domain, error = %e, "HTTP challenge server task failed");
        }

        info!(domain = %self.domain, addr = %listener.local_addr, "HTTP server for HTTP challenge is closed");
        Ok(())
    }
}

/// Pause after a failed accept (EMFILE and the like) before the next one
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Wait out [`ACCEPT_RETRY_DELAY`]; false when shutdown fired meanwhile
async fn back_off(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => true,
    }
}

async fn serve(
    listener: TcpListener,
    shutdown: CancellationToken,
    token: Arc<str>,
    key_authorization: Arc<str>,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, retry_in = ?ACCEPT_RETRY_DELAY, "Failed to accept HTTP challenge connection");
                if back_off(&shutdown).await {
                    continue;
                }
                break;
            }
        };

        let token = token.clone();
        let key_authorization = key_authorization.clone();
        let shutdown = shutdown.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let (status, body) =
                    respond(req.method(), req.uri().path(), &token, &key_authorization);
                debug!(
                    peer = %peer,
                    method = %req.method(),
                    path = %req.uri().path(),
                    status = status.as_u16(),
                    "HTTP challenge request"
                );

                let mut response = Response::new(Full::new(Bytes::from(body)));
                *response.status_mut() = status;
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                );
                async move { Ok::<_, Infallible>(response) }
            });

            let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
            tokio::select! {
                result = connection => {
                    if let Err(e) = result {
                        trace!(peer = %peer, error = %e, "HTTP challenge connection ended with error");
                    }
                }
                _ = shutdown.cancelled() => {}
            }
        });
    }
}
