//! The proxy dispatcher: forwards an admitted request to the backend origin
//! mapped from its hostname, relaying the response back unmodified.
//!
//! The dispatcher is a transparent relay. Each hostname maps to exactly one
//! backend origin; there is no load balancing and no retry of failed
//! backend calls, so a backend error reaches the client as-is.

use crate::error::{empty_response, GatewayBody};
use crate::gate::request_host;
use crate::routes::RoutingTable;
use http_body_util::BodyExt;
use hyper::header::HeaderValue;
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

/// Marker header identifying a request as having passed through the gateway.
pub const FORWARDED_MARKER: &str = "x-frontgate-forwarded";

/// Header name for request ID
const X_REQUEST_ID: &str = "x-request-id";
/// Header name for forwarded-for
const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Header name for forwarded host
const X_FORWARDED_HOST: &str = "x-forwarded-host";
/// Header name for forwarded proto
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Keep up to this many idle upstream connections per backend.
const POOL_MAX_IDLE_PER_HOST: usize = 10;
/// Close idle upstream connections after this long.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

pub struct Dispatcher {
    routes: Arc<RoutingTable>,
    client: Client<HttpConnector, GatewayBody>,
}

impl Dispatcher {
    pub fn new(routes: Arc<RoutingTable>) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build(connector);

        Self { routes, client }
    }

    /// Forward a request to the backend resolved from its hostname.
    ///
    /// Unknown host -> 404, empty body. Otherwise the request keeps its
    /// method, headers, and streaming body; only scheme and authority are
    /// rewritten to the backend origin, and the marker header is injected.
    pub async fn dispatch(&self, mut req: Request<GatewayBody>) -> Response<GatewayBody> {
        let Some(hostname) = request_host(&req) else {
            return empty_response(StatusCode::NOT_FOUND);
        };

        let Some(endpoint) = self.routes.lookup(&hostname) else {
            debug!(host = %hostname, "no endpoint for host");
            return empty_response(StatusCode::NOT_FOUND);
        };

        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let uri = Uri::builder()
            .scheme(endpoint.origin.scheme().expect("validated at build").clone())
            .authority(endpoint.origin.authority().expect("validated at build").clone())
            .path_and_query(path_and_query)
            .build()
            .expect("origin and path validated");

        *req.uri_mut() = uri;
        req.headers_mut()
            .insert(FORWARDED_MARKER, HeaderValue::from_static("true"));

        match self.client.request(req).await {
            Ok(response) => response.map(|body| body.boxed()),
            Err(e) => {
                error!(host = %hostname, origin = %endpoint.origin, error = %e, "backend request failed");
                empty_response(StatusCode::BAD_GATEWAY)
            }
        }
    }
}

/// Stamp the proxy-added headers on an admitted request before dispatch.
///
/// X-Forwarded-* values are overwritten rather than appended: this gateway
/// is the first trusted hop, and a client-supplied value must not survive.
pub fn apply_forwarding_headers<B>(req: &mut Request<B>, client_addr: SocketAddr) {
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let original_host = req.headers().get(hyper::header::HOST).cloned();
    let headers = req.headers_mut();

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(X_REQUEST_ID, value);
    }

    if let Ok(value) = HeaderValue::from_str(&client_addr.ip().to_string()) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    if let Some(host) = original_host {
        headers.insert(X_FORWARDED_HOST, host);
    }

    // The gateway only ever terminates TLS.
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("https"));
}
