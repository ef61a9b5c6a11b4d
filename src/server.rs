//! The lifecycle controller: owns the listening socket and the
//! TLS-terminating server.
//!
//! `Gateway::start` binds the listener and returns once serving has begun on
//! background tasks; `GatewayHandle::stop` drains in-flight connections
//! under a bounded deadline. Each accepted connection is handled on its own
//! task: the ClientHello is read first (via `LazyConfigAcceptor`), the
//! certificate provisioner is consulted for the presented hostname, and only
//! then does the handshake complete and the request pipeline run.

use crate::acme::{application_tls_config, challenge_tls_config, CertManager, ACME_TLS_ALPN_NAME};
use crate::config::Config;
use crate::error::{empty_response, Error, GatewayBody, Result};
use crate::gate::{AccessGate, GateDecision};
use crate::proxy::{apply_forwarding_headers, Dispatcher};
use crate::routes::RoutingTable;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::{SocketAddr, ToSocketAddrs};
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_rustls::LazyConfigAcceptor;
use tracing::{debug, error, info, warn};

/// How long `stop` waits for in-flight connections before giving up.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// A listener returning this many accept errors in a row is treated as dead.
const MAX_ACCEPT_FAILURES: u32 = 5;

/// The request pipeline behind a completed handshake: access gate, then
/// proxy dispatch.
pub struct Pipeline {
    gate: AccessGate,
    dispatcher: Dispatcher,
}

impl Pipeline {
    pub fn new(gate: AccessGate, dispatcher: Dispatcher) -> Self {
        Self { gate, dispatcher }
    }

    pub async fn handle(
        &self,
        mut req: Request<GatewayBody>,
        remote: SocketAddr,
    ) -> Response<GatewayBody> {
        match self.gate.evaluate(&req, remote) {
            GateDecision::IssueCookie => self.gate.bootstrap_response(),
            GateDecision::Deny => empty_response(StatusCode::UNAUTHORIZED),
            GateDecision::Allow => {
                apply_forwarding_headers(&mut req, remote);
                self.dispatcher.dispatch(req).await
            }
        }
    }
}

/// The gateway before it starts serving.
pub struct Gateway {
    config: Config,
    certs: Arc<CertManager>,
    pipeline: Arc<Pipeline>,
}

impl Gateway {
    /// Wire the components from a validated configuration. The routing
    /// table, skip set, and certificate manager are built exactly once here
    /// and shared read-only with every connection task.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let routes = Arc::new(RoutingTable::build(&config.endpoints));
        if routes.is_empty() {
            warn!("routing table is empty; all requests will 404 and no certificate can be issued");
        }

        let certs = Arc::new(CertManager::new(Arc::clone(&routes), &config)?);
        let gate = AccessGate::new(&config);
        let dispatcher = Dispatcher::new(routes);
        let pipeline = Arc::new(Pipeline::new(gate, dispatcher));

        Ok(Self {
            config,
            certs,
            pipeline,
        })
    }

    /// Bind the IPv4 listener and begin serving on background tasks.
    ///
    /// Returns as soon as the listener is bound. Serving faults after that
    /// point are reported through the handle's fault channel, not here.
    pub async fn start(self) -> Result<GatewayHandle> {
        let addr = resolve_ipv4(&self.config.address)?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| Error::Bind { addr, source })?;
        info!(addr = %local_addr, "listening for TLS connections");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (fault_tx, fault_rx) = watch::channel(None::<String>);
        let (done_tx, done_rx) = mpsc::channel::<()>(1);

        let renewal_certs = Arc::clone(&self.certs);
        let renewal_shutdown = shutdown_rx.clone();
        tokio::spawn(async move { renewal_certs.run_renewal(renewal_shutdown).await });

        let certs = self.certs;
        let pipeline = self.pipeline;
        tokio::spawn(async move {
            if let Err(e) = accept_loop(listener, certs, pipeline, shutdown_rx, done_tx).await {
                error!(error = %e, "accept loop terminated");
                let _ = fault_tx.send(Some(e.to_string()));
            }
        });

        Ok(GatewayHandle {
            shutdown_tx,
            done_rx,
            fault_rx,
            local_addr,
        })
    }
}

/// Handle to a running gateway, held by the supervisor.
#[derive(Debug)]
pub struct GatewayHandle {
    shutdown_tx: watch::Sender<bool>,
    done_rx: mpsc::Receiver<()>,
    fault_rx: watch::Receiver<Option<String>>,
    local_addr: SocketAddr,
}

impl GatewayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A fault that terminated the accept loop, if one occurred.
    pub fn fault(&self) -> Option<String> {
        self.fault_rx.borrow().clone()
    }

    /// Graceful shutdown: stop accepting, let in-flight requests finish,
    /// release the listener. Fails with `ShutdownTimeout` if connections
    /// are still draining when the deadline passes; the supervisor is
    /// expected to treat that as fatal.
    pub async fn stop(mut self) -> Result<()> {
        info!("shutdown requested, draining connections");
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + SHUTDOWN_DEADLINE;
        loop {
            match tokio::time::timeout_at(deadline, self.done_rx.recv()).await {
                // All senders dropped: accept loop and every connection ended.
                Ok(None) => {
                    info!("shutdown complete");
                    return Ok(());
                }
                Ok(Some(())) => continue,
                Err(_) => return Err(Error::ShutdownTimeout),
            }
        }
    }
}

/// Resolves once shutdown is signalled, or the sender side is gone.
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Resolve the configured listen address to an IPv4 socket address.
fn resolve_ipv4(address: &str) -> Result<SocketAddr> {
    let mut addrs = address
        .to_socket_addrs()
        .map_err(|e| Error::InvalidAddress {
            addr: address.to_string(),
            reason: e.to_string(),
        })?;
    addrs
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| Error::InvalidAddress {
            addr: address.to_string(),
            reason: "does not resolve to an IPv4 address".to_string(),
        })
}

async fn accept_loop(
    listener: TcpListener,
    certs: Arc<CertManager>,
    pipeline: Arc<Pipeline>,
    mut shutdown_rx: watch::Receiver<bool>,
    done_tx: mpsc::Sender<()>,
) -> std::io::Result<()> {
    let mut consecutive_failures = 0u32;

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, remote)) => {
                    consecutive_failures = 0;
                    let certs = Arc::clone(&certs);
                    let pipeline = Arc::clone(&pipeline);
                    let conn_shutdown = shutdown_rx.clone();
                    let conn_done = done_tx.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, remote, certs, pipeline, conn_shutdown).await;
                        // conn_done is dropped here, marking this connection drained
                        drop(conn_done);
                    });
                }
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    consecutive_failures += 1;
                    if consecutive_failures >= MAX_ACCEPT_FAILURES {
                        return Err(e);
                    }
                }
            },
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("no longer accepting connections");
                    return Ok(());
                }
            }
        }
    }
}

/// Read the ClientHello, obtain a certificate for the presented hostname,
/// complete the handshake, and serve requests on the connection.
async fn handle_connection(
    stream: TcpStream,
    remote: SocketAddr,
    certs: Arc<CertManager>,
    pipeline: Arc<Pipeline>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let acceptor = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), stream);

    // A connection with no ClientHello yet has nothing in flight; don't let
    // it hold up the drain.
    let start = tokio::select! {
        result = acceptor => match result {
            Ok(start) => start,
            Err(e) => {
                debug!(remote = %remote, error = %e, "failed to read ClientHello");
                return;
            }
        },
        _ = shutdown_signalled(&mut shutdown_rx) => {
            debug!(remote = %remote, "shutdown before handshake, dropping connection");
            return;
        }
    };

    let (server_name, is_challenge) = {
        let hello = start.client_hello();
        let name = hello.server_name().map(str::to_string);
        let challenge = hello
            .alpn()
            .map(|mut protos| protos.any(|p| p == ACME_TLS_ALPN_NAME))
            .unwrap_or(false);
        (name, challenge)
    };

    // A validation probe from the certificate authority: answer with the
    // pending challenge certificate and close. No HTTP ever flows here.
    if is_challenge {
        let Some(name) = server_name else {
            debug!(remote = %remote, "challenge handshake without SNI");
            return;
        };
        let Some(cert) = certs.challenge_cert(&name) else {
            debug!(host = %name, "no pending challenge for host");
            return;
        };
        debug!(host = %name, "answering tls-alpn-01 validation handshake");
        match start.into_stream(challenge_tls_config(cert)).await {
            Ok(mut tls) => {
                let _ = tls.shutdown().await;
            }
            Err(e) => debug!(host = %name, error = %e, "challenge handshake failed"),
        }
        return;
    }

    let Some(name) = server_name else {
        debug!(remote = %remote, "no SNI in ClientHello, aborting handshake");
        return;
    };

    let cert = match certs.certificate_for(&name).await {
        Ok(cert) => cert,
        Err(e) => {
            warn!(host = %name, remote = %remote, error = %e, "aborting handshake");
            return;
        }
    };

    let tls = match start.into_stream(application_tls_config(cert)).await {
        Ok(tls) => tls,
        Err(e) => {
            debug!(remote = %remote, error = %e, "TLS handshake failed");
            return;
        }
    };

    serve_requests(tls, remote, pipeline, shutdown_rx).await;
}

/// Serve HTTP/1.1 and HTTP/2 on one established connection until it closes
/// or shutdown drains it.
async fn serve_requests<S>(
    stream: S,
    remote: SocketAddr,
    pipeline: Arc<Pipeline>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |req: Request<Incoming>| {
        let pipeline = Arc::clone(&pipeline);
        async move {
            let req = req.map(|body| body.boxed());
            Ok::<_, hyper::Error>(pipeline.handle(req, remote).await)
        }
    });

    // Auto-detect HTTP/1.1 vs HTTP/2 per connection; upgrades keep
    // WebSocket-style backends working through the relay.
    let mut builder = AutoBuilder::new(TokioExecutor::new());
    builder.http1().preserve_header_case(true);
    builder.http2().max_concurrent_streams(250);

    let mut conn = pin!(builder.serve_connection_with_upgrades(io, service));

    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!(remote = %remote, error = %e, "connection error");
                }
                return;
            }
            changed = shutdown_rx.changed() => {
                if changed.is_ok() && !*shutdown_rx.borrow() {
                    continue;
                }
                // Finish in-flight requests, then close.
                conn.as_mut().graceful_shutdown();
                if let Err(e) = conn.as_mut().await {
                    debug!(remote = %remote, error = %e, "connection error during drain");
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_ipv4() {
        let addr = resolve_ipv4("127.0.0.1:8443").unwrap();
        assert!(addr.is_ipv4());
        assert_eq!(addr.port(), 8443);
    }

    #[test]
    fn test_resolve_ipv4_rejects_garbage() {
        assert!(resolve_ipv4("not an address").is_err());
        assert!(resolve_ipv4("[::1]:8443").is_err());
    }
}
