//! The access gate: decides, per request, whether to issue the session
//! cookie, deny, or let the request through to the dispatcher.
//!
//! The gate is stateless across requests. The only credential is the shared
//! secret token, carried either in the bootstrap URL path (once, out of
//! band) or in the session cookie on every subsequent request. A single
//! shared token is a deliberate simplicity trade-off for a small
//! trusted-operator deployment; it is not multi-tenant-safe.

use crate::config::Config;
use crate::error::{empty_body, GatewayBody};
use crate::routes::{normalize_host, SkipTokenHosts};
use chrono::Utc;
use hyper::header::{COOKIE, LOCATION, SET_COOKIE};
use hyper::{Request, Response, StatusCode};
use std::net::SocketAddr;
use tracing::info;

/// Name of the session cookie.
pub const TOKEN_COOKIE: &str = "frontgate-token";

/// How long an issued session cookie stays valid.
const COOKIE_VALIDITY_DAYS: i64 = 365;

/// Per-request outcome of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Request hit the bootstrap path: set the cookie and redirect to `/`.
    IssueCookie,
    /// Cookie missing or mismatched: respond 401, empty body.
    Deny,
    /// Admitted; hand over to the dispatcher.
    Allow,
}

pub struct AccessGate {
    token: String,
    /// `/` + token, the only unauthenticated entry point.
    bootstrap_path: String,
    cookie_domain: String,
    skip_hosts: SkipTokenHosts,
}

impl AccessGate {
    pub fn new(config: &Config) -> Self {
        Self {
            bootstrap_path: format!("/{}", config.token),
            token: config.token.clone(),
            cookie_domain: config.cookie_domain.clone(),
            skip_hosts: SkipTokenHosts::new(&config.skip_token_hosts),
        }
    }

    /// Classify a request. Emits the ALLOW/DENIED observability events as a
    /// side effect; response construction is left to the caller.
    pub fn evaluate<B>(&self, req: &Request<B>, remote: SocketAddr) -> GateDecision {
        if req.uri().path() == self.bootstrap_path {
            return GateDecision::IssueCookie;
        }

        let host = request_host(req).unwrap_or_default();

        if !self.skip_hosts.contains(&host) {
            let presented = cookie_value(req, TOKEN_COOKIE);
            if presented.as_deref() != Some(self.token.as_str()) {
                info!(
                    event = "DENIED",
                    remote = %remote,
                    host = %host,
                    uri = %req.uri(),
                    "request denied"
                );
                return GateDecision::Deny;
            }
        }

        info!(
            event = "ALLOW",
            remote = %remote,
            host = %host,
            uri = %req.uri(),
            "request allowed"
        );
        GateDecision::Allow
    }

    /// The bootstrap response: session cookie plus a temporary redirect to
    /// the site root, so the token never stays visible in the address bar.
    pub fn bootstrap_response(&self) -> Response<GatewayBody> {
        Response::builder()
            .status(StatusCode::TEMPORARY_REDIRECT)
            .header(SET_COOKIE, self.session_cookie())
            .header(LOCATION, "/")
            .body(empty_body())
            .expect("valid response with static headers")
    }

    fn session_cookie(&self) -> String {
        let expires = (Utc::now() + chrono::Duration::days(COOKIE_VALIDITY_DAYS))
            .format("%a, %d %b %Y %H:%M:%S GMT");
        format!(
            "{}={}; Path=/; Domain={}; Expires={}; Secure; HttpOnly",
            TOKEN_COOKIE, self.token, self.cookie_domain, expires
        )
    }
}

/// Normalized request host: `Host` header for HTTP/1.1, URI authority for
/// HTTP/2 (where the header is usually absent).
pub fn request_host<B>(req: &Request<B>) -> Option<String> {
    let raw = req
        .headers()
        .get(hyper::header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().host());
    raw.and_then(normalize_host)
}

/// Value of the named cookie, searching every `Cookie` header.
fn cookie_value<B>(req: &Request<B>, name: &str) -> Option<String> {
    for header in req.headers().get_all(COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((k, v)) = pair.split_once('=') {
                if k.trim() == name {
                    return Some(v.trim().to_string());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Empty;
    use hyper::body::Bytes;
    use std::collections::{HashMap, HashSet};

    fn gate(skip: &[&str]) -> AccessGate {
        let config = Config {
            address: "0.0.0.0:443".into(),
            cookie_domain: "example.com".into(),
            token: "s3cr3t".into(),
            endpoints: HashMap::new(),
            skip_token_hosts: skip.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
            cert_dir: "certs".into(),
            acme_contact: None,
            acme_directory: None,
        };
        AccessGate::new(&config)
    }

    fn remote() -> SocketAddr {
        "203.0.113.9:54321".parse().unwrap()
    }

    fn request(path: &str, host: &str, cookie: Option<&str>) -> Request<Empty<Bytes>> {
        let mut builder = Request::builder()
            .uri(path)
            .header(hyper::header::HOST, host);
        if let Some(c) = cookie {
            builder = builder.header(COOKIE, c);
        }
        builder.body(Empty::new()).unwrap()
    }

    #[test]
    fn test_bootstrap_path_issues_cookie() {
        let gate = gate(&[]);
        let req = request("/s3cr3t", "app.example.com", None);
        assert_eq!(gate.evaluate(&req, remote()), GateDecision::IssueCookie);
    }

    #[test]
    fn test_bootstrap_path_must_match_exactly() {
        let gate = gate(&[]);
        for path in ["/s3cr3t/", "/s3cr3tx", "/x/s3cr3t", "/"] {
            let req = request(path, "app.example.com", None);
            assert_ne!(gate.evaluate(&req, remote()), GateDecision::IssueCookie, "{path}");
        }
    }

    #[test]
    fn test_missing_cookie_denied() {
        let gate = gate(&[]);
        let req = request("/page", "app.example.com", None);
        assert_eq!(gate.evaluate(&req, remote()), GateDecision::Deny);
    }

    #[test]
    fn test_wrong_cookie_denied() {
        let gate = gate(&[]);
        let req = request("/page", "app.example.com", Some("frontgate-token=wrong"));
        assert_eq!(gate.evaluate(&req, remote()), GateDecision::Deny);
    }

    #[test]
    fn test_valid_cookie_allowed() {
        let gate = gate(&[]);
        let req = request("/page", "app.example.com", Some("frontgate-token=s3cr3t"));
        assert_eq!(gate.evaluate(&req, remote()), GateDecision::Allow);
    }

    #[test]
    fn test_cookie_found_among_others() {
        let gate = gate(&[]);
        let req = request(
            "/page",
            "app.example.com",
            Some("theme=dark; frontgate-token=s3cr3t; lang=en"),
        );
        assert_eq!(gate.evaluate(&req, remote()), GateDecision::Allow);
    }

    #[test]
    fn test_skip_host_bypasses_cookie_check() {
        let gate = gate(&["public.example.com"]);
        let req = request("/page", "public.example.com", None);
        assert_eq!(gate.evaluate(&req, remote()), GateDecision::Allow);

        let req = request("/page", "public.example.com:8443", None);
        assert_eq!(gate.evaluate(&req, remote()), GateDecision::Allow);
    }

    #[test]
    fn test_skip_host_lookalike_still_checked() {
        let gate = gate(&["public.example.com"]);
        let req = request("/page", "public.example.com.evil.com", None);
        assert_eq!(gate.evaluate(&req, remote()), GateDecision::Deny);
    }

    #[test]
    fn test_bootstrap_response_attributes() {
        let gate = gate(&[]);
        let response = gate.bootstrap_response();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers().get(LOCATION).unwrap(), "/");

        let cookie = response
            .headers()
            .get(SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(cookie.starts_with("frontgate-token=s3cr3t"));
        assert!(cookie.contains("Path=/"));
        assert!(cookie.contains("Domain=example.com"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Expires="));

        // Roughly one year out.
        let expires = cookie
            .split("Expires=")
            .nth(1)
            .unwrap()
            .split(';')
            .next()
            .unwrap();
        let parsed = chrono::NaiveDateTime::parse_from_str(expires, "%a, %d %b %Y %H:%M:%S GMT")
            .unwrap()
            .and_utc();
        let days = (parsed - Utc::now()).num_days();
        assert!((360..=366).contains(&days), "cookie expiry {days} days out");
    }

    #[test]
    fn test_request_host_prefers_header_and_normalizes() {
        let req = request("/page", "App.Example.COM:8443", None);
        assert_eq!(request_host(&req), Some("app.example.com".to_string()));
    }

    #[test]
    fn test_request_host_falls_back_to_uri() {
        let req = Request::builder()
            .uri("https://app.example.com/page")
            .body(Empty::<Bytes>::new())
            .unwrap();
        assert_eq!(request_host(&req), Some("app.example.com".to_string()));
    }
}
