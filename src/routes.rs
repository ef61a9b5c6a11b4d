//! Hostname routing: the immutable table mapping hostnames to backend
//! origins, and the skip-token host set.
//!
//! The routing table is built once from configuration and shared read-only
//! for the process lifetime. Its key set doubles as the ACME host whitelist:
//! a certificate is only ever procured for a hostname that routes somewhere.

use hyper::Uri;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// Maximum hostname length per DNS specification
const MAX_HOSTNAME_LEN: usize = 253;

/// A single hostname -> backend origin mapping.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub hostname: String,
    /// Backend origin; guaranteed to be `http://` with an authority.
    pub origin: Uri,
}

/// Immutable hostname -> endpoint map with unique keys.
#[derive(Debug, Default)]
pub struct RoutingTable {
    by_host: HashMap<String, Endpoint>,
}

impl RoutingTable {
    /// Build the table from configured `hostname -> origin URL` pairs.
    ///
    /// Entries whose hostname or URL does not parse are logged and skipped;
    /// a bad entry must not take down the process, only itself.
    pub fn build(endpoints: &HashMap<String, String>) -> Self {
        let mut by_host = HashMap::new();

        for (raw_host, raw_origin) in endpoints {
            let Some(hostname) = normalize_host(raw_host) else {
                warn!(host = %raw_host, "skipping endpoint with invalid hostname");
                continue;
            };

            let origin: Uri = match raw_origin.parse() {
                Ok(uri) => uri,
                Err(e) => {
                    warn!(host = %hostname, url = %raw_origin, error = %e, "skipping unparsable endpoint URL");
                    continue;
                }
            };

            if origin.authority().is_none() || origin.scheme_str() != Some("http") {
                warn!(host = %hostname, url = %raw_origin, "skipping endpoint URL; backend origins must be plain http:// with an authority");
                continue;
            }

            info!(host = %hostname, origin = %origin, "added endpoint");
            by_host.insert(hostname.clone(), Endpoint { hostname, origin });
        }

        Self { by_host }
    }

    /// Look up the endpoint for an already-normalized hostname.
    pub fn lookup(&self, hostname: &str) -> Option<&Endpoint> {
        self.by_host.get(hostname)
    }

    /// Host policy for certificate issuance: only hostnames that route
    /// somewhere may have certificates procured for them.
    pub fn is_whitelisted(&self, hostname: &str) -> bool {
        self.by_host.contains_key(hostname)
    }

    pub fn hostnames(&self) -> impl Iterator<Item = &str> {
        self.by_host.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_host.is_empty()
    }
}

/// Normalize a hostname: strip any `:port` suffix, lowercase, and reject
/// names that are overlong or carry characters outside the DNS alphabet
/// (keeps hostile values out of lookups and logs).
pub fn normalize_host(raw: &str) -> Option<String> {
    let hostname = raw.split(':').next()?;

    if hostname.is_empty() || hostname.len() > MAX_HOSTNAME_LEN {
        return None;
    }

    if !hostname
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return None;
    }

    Some(hostname.to_lowercase())
}

/// Hostnames exempt from the cookie check. Membership is exact on the
/// normalized hostname; substring matching would let `example.com` also
/// admit `notexample.com.evil.com`.
#[derive(Debug, Default, Clone)]
pub struct SkipTokenHosts {
    hosts: HashSet<String>,
}

impl SkipTokenHosts {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .filter_map(|h| normalize_host(h.as_ref()))
                .collect(),
        }
    }

    /// Whether an already-normalized hostname is exempt.
    pub fn contains(&self, hostname: &str) -> bool {
        self.hosts.contains(hostname)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
