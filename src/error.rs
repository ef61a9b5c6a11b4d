//! Error taxonomy and minimal HTTP error responses

use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};

/// Body type used on both legs of the proxy. Boxing keeps request and
/// response bodies streaming end to end regardless of their concrete type.
pub type GatewayBody = BoxBody<Bytes, hyper::Error>;

/// Errors that can affect process state. Per-request failures (missing
/// cookie, unknown host, backend errors) never surface here; they are
/// converted to HTTP statuses at the point they occur.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required configuration value is missing or empty. Fatal at startup.
    #[error("required configuration value {0} is not set")]
    MissingConfig(&'static str),

    /// The listen address could not be parsed as an IPv4 socket address.
    #[error("invalid listen address {addr:?}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    /// SNI named a host outside the routing table. Aborts that handshake.
    #[error("host {0:?} is not configured in the routing table")]
    HostNotWhitelisted(String),

    /// Certificate issuance failed for a whitelisted host. Aborts that
    /// handshake; the next connection attempt retries independently.
    #[error("certificate issuance for {host:?} failed: {source}")]
    Issuance {
        host: String,
        #[source]
        source: anyhow::Error,
    },

    /// Certificate cache directory could not be prepared or used.
    #[error("certificate cache error: {0}")]
    CertCache(#[from] std::io::Error),

    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    /// In-flight connections did not drain within the shutdown deadline.
    /// The binary translates this into a non-zero process exit.
    #[error("shutdown deadline exceeded with connections still in flight")]
    ShutdownTimeout,
}

pub type Result<T> = std::result::Result<T, Error>;

/// An empty streaming body.
pub fn empty_body() -> GatewayBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

/// A fully-buffered body, for the few gateway-generated responses.
pub fn full_body(bytes: impl Into<Bytes>) -> GatewayBody {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed()
}

/// A status-only response with no body, the shape of every response the
/// gateway produces itself (401, 404, 502).
pub fn empty_response(status: StatusCode) -> Response<GatewayBody> {
    Response::builder()
        .status(status)
        .body(empty_body())
        .expect("valid response with StatusCode enum and no headers")
}
