//! Per-hostname certificate provisioning via ACME (Let's Encrypt).
//!
//! Certificates are procured on demand, the first time a handshake presents
//! a hostname, and only for hostnames present in the routing table. Domain
//! validation uses the TLS-ALPN-01 challenge, so challenge responses and
//! regular traffic share the single TLS listener.
//!
//! # Security Considerations
//!
//! The ACME account key and certificate private keys are stored in the
//! cache directory with restrictive file permissions (0600 on Unix), but
//! unencrypted. For production deployments:
//!
//! - Restrict access to the cache directory to the service user only
//! - Back up the cache directory securely (it contains your account key)
//!
//! The cache directory must survive restarts: repeated reissuance on every
//! start would exhaust the certificate authority's rate limits.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::routes::{normalize_host, RoutingTable};
use dashmap::DashMap;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, LetsEncrypt,
    NewAccount, NewOrder, OrderStatus,
};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_ECDSA_P256_SHA256};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::ResolvesServerCert;
use rustls::sign::CertifiedKey;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, OnceCell};
use tracing::{debug, error, info, warn};

/// ALPN protocol identifier reserved for TLS-ALPN-01 validation handshakes.
pub const ACME_TLS_ALPN_NAME: &[u8] = b"acme-tls/1";
/// OID of the acmeIdentifier certificate extension (id-pe-31).
const ACME_ALPN_OID: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 1, 31];

/// Reissue certificates with less than this much validity remaining.
const RENEW_BEFORE_DAYS: u64 = 30;
/// A cached certificate is still served down to this much remaining
/// validity; the renewal task reissues long before it gets here.
const MIN_SERVE_DAYS: u64 = 1;
/// How often the renewal task re-checks every issued certificate.
const RENEWAL_CHECK_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

/// Per-hostname certificate manager.
///
/// The in-memory store is the only mutable state shared between
/// connections. Issuance for the same hostname is serialized through a
/// per-host async lock; different hostnames proceed independently.
pub struct CertManager {
    routes: Arc<RoutingTable>,
    cache_dir: PathBuf,
    contact: Option<String>,
    directory_url: Option<String>,
    store: DashMap<String, Arc<CertifiedKey>>,
    challenge_certs: DashMap<String, Arc<CertifiedKey>>,
    issuance_locks: DashMap<String, Arc<Mutex<()>>>,
    account: OnceCell<Account>,
}

impl CertManager {
    /// Create the manager and its cache directory.
    pub fn new(routes: Arc<RoutingTable>, config: &Config) -> Result<Self> {
        let cache_dir = validate_cache_dir(&config.cert_dir)?;
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            routes,
            cache_dir,
            contact: config.acme_contact.clone(),
            directory_url: config.acme_directory.clone(),
            store: DashMap::new(),
            challenge_certs: DashMap::new(),
            issuance_locks: DashMap::new(),
            account: OnceCell::new(),
        })
    }

    /// Supply a certificate for the hostname a handshake presented.
    ///
    /// Awaited between ClientHello and handshake completion. Refuses any
    /// hostname outside the routing table before touching the certificate
    /// authority: this is the boundary that keeps an attacker's SNI from
    /// triggering issuance for arbitrary names.
    pub async fn certificate_for(&self, server_name: &str) -> Result<Arc<CertifiedKey>> {
        let host = normalize_host(server_name)
            .ok_or_else(|| Error::HostNotWhitelisted(server_name.to_string()))?;
        if !self.routes.is_whitelisted(&host) {
            return Err(Error::HostNotWhitelisted(host));
        }

        if let Some(cert) = self.cached(&host) {
            return Ok(cert);
        }

        let lock = {
            let entry = self.issuance_locks.entry(host.clone()).or_default();
            Arc::clone(entry.value())
        };
        let _guard = lock.lock().await;

        // Another handshake may have finished issuance while we waited.
        if let Some(cert) = self.cached(&host) {
            return Ok(cert);
        }
        if let Some(cert) = self.load_cached(&host) {
            self.store.insert(host.clone(), Arc::clone(&cert));
            return Ok(cert);
        }

        info!(host = %host, "no cached certificate, requesting issuance");
        self.issue(&host).await.map_err(|source| Error::Issuance {
            host: host.clone(),
            source,
        })
    }

    /// Challenge certificate for an in-flight TLS-ALPN-01 validation, if any.
    pub fn challenge_cert(&self, server_name: &str) -> Option<Arc<CertifiedKey>> {
        let host = normalize_host(server_name)?;
        self.challenge_certs.get(&host).map(|c| Arc::clone(&c))
    }

    fn cached(&self, host: &str) -> Option<Arc<CertifiedKey>> {
        let cert = self.store.get(host).map(|c| Arc::clone(&c))?;
        let still_valid = cert
            .cert
            .first()
            .is_some_and(|der| cert_valid_for_days(der, MIN_SERVE_DAYS));
        if !still_valid {
            self.store.remove(host);
            return None;
        }
        Some(cert)
    }

    async fn account(&self) -> anyhow::Result<&Account> {
        self.account
            .get_or_try_init(|| self.load_or_create_account())
            .await
    }

    /// Load the persisted ACME account, or register one and persist its
    /// credentials for future runs.
    async fn load_or_create_account(&self) -> anyhow::Result<Account> {
        let account_path = self.cache_dir.join("account.json");

        if account_path.exists() {
            debug!(path = %account_path.display(), "loading existing ACME account");
            let data = std::fs::read_to_string(&account_path)?;
            let credentials: AccountCredentials = serde_json::from_str(&data)?;
            return Ok(Account::from_credentials(credentials).await?);
        }

        info!("registering new ACME account");
        let directory_url = self
            .directory_url
            .as_deref()
            .unwrap_or(LetsEncrypt::Production.url());
        let contact: Vec<String> = self.contact.iter().map(|c| format!("mailto:{c}")).collect();
        let contact_refs: Vec<&str> = contact.iter().map(String::as_str).collect();

        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &contact_refs,
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            directory_url,
            None,
        )
        .await?;

        let data = serde_json::to_string_pretty(&credentials)?;
        std::fs::write(&account_path, data)?;
        info!(path = %account_path.display(), "ACME account credentials saved");

        Ok(account)
    }

    fn host_dir(&self, host: &str) -> PathBuf {
        // `host` passed normalize_host, so it cannot contain path separators.
        self.cache_dir.join(host)
    }

    /// Load a hostname's certificate from durable storage, if present and
    /// not about to expire.
    fn load_cached(&self, host: &str) -> Option<Arc<CertifiedKey>> {
        let dir = self.host_dir(host);
        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");

        if !cert_path.exists() || !key_path.exists() {
            return None;
        }

        let cert_data = std::fs::read(&cert_path).ok()?;
        let key_data = std::fs::read(&key_path).ok()?;

        let certs: Vec<CertificateDer<'static>> =
            rustls_pemfile::certs(&mut BufReader::new(&cert_data[..]))
                .filter_map(|c| c.ok())
                .collect();
        if certs.is_empty() {
            return None;
        }

        if !cert_valid_for_days(certs.first()?, MIN_SERVE_DAYS) {
            info!(host = %host, "cached certificate expired, will reissue");
            return None;
        }

        let key = read_private_key(&key_data)?;
        let certified = certified_key(certs, key).ok()?;
        info!(host = %host, path = %cert_path.display(), "loaded cached certificate");
        Some(certified)
    }

    /// Persist a hostname's certificate with a restricted-permission key.
    fn save_cert(&self, host: &str, cert_chain_pem: &str, private_key_pem: &str) -> anyhow::Result<()> {
        let dir = self.host_dir(host);
        std::fs::create_dir_all(&dir)?;

        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");

        std::fs::write(&cert_path, cert_chain_pem)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&key_path)?;
            std::io::Write::write_all(&mut file, private_key_pem.as_bytes())?;
        }
        #[cfg(not(unix))]
        {
            std::fs::write(&key_path, private_key_pem)?;
        }

        info!(host = %host, path = %cert_path.display(), "certificate saved to cache");
        Ok(())
    }

    /// Run a full order for one hostname, install the result, persist it.
    async fn issue(&self, host: &str) -> anyhow::Result<Arc<CertifiedKey>> {
        let result = self.run_order(host).await;
        // The challenge certificate must not outlive the order, success or not.
        self.challenge_certs.remove(host);

        let (certs, key, chain_pem, key_pem) = result?;
        let certified = certified_key(certs, key)?;

        if let Err(e) = self.save_cert(host, &chain_pem, &key_pem) {
            warn!(host = %host, error = %e, "failed to persist certificate; a restart will reissue");
        }

        self.store.insert(host.to_string(), Arc::clone(&certified));
        info!(host = %host, "certificate obtained");
        Ok(certified)
    }

    /// Drive one ACME order through authorization, finalization, and
    /// certificate download.
    async fn run_order(
        &self,
        host: &str,
    ) -> anyhow::Result<(
        Vec<CertificateDer<'static>>,
        PrivateKeyDer<'static>,
        String,
        String,
    )> {
        let account = self.account().await?;

        let identifiers = [Identifier::Dns(host.to_string())];
        let mut order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await?;

        let authorizations = order.authorizations().await?;
        for authz in authorizations {
            if authz.status == AuthorizationStatus::Valid {
                continue;
            }

            let challenge = authz
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::TlsAlpn01)
                .ok_or_else(|| anyhow::anyhow!("tls-alpn-01 challenge not offered for {}", host))?;

            let key_auth = order.key_authorization(challenge);
            let digest: Vec<u8> = key_auth.digest().as_ref().to_vec();

            debug!(host = %host, "placing tls-alpn-01 challenge certificate");
            let challenge_cert = create_challenge_cert(host, &digest)?;
            self.challenge_certs.insert(host.to_string(), challenge_cert);

            order.set_challenge_ready(&challenge.url).await?;

            let mut attempts = 0;
            loop {
                tokio::time::sleep(Duration::from_secs(2)).await;

                order.refresh().await?;
                let auths = order.authorizations().await?;
                let status = auths
                    .iter()
                    .find(|a| matches!(&a.identifier, Identifier::Dns(d) if d.as_str() == host))
                    .map(|a| &a.status);

                match status {
                    Some(AuthorizationStatus::Valid) => {
                        info!(host = %host, "authorization valid");
                        break;
                    }
                    Some(AuthorizationStatus::Pending) => {
                        attempts += 1;
                        if attempts > 30 {
                            anyhow::bail!("authorization timeout for {}", host);
                        }
                        debug!(host = %host, attempt = attempts, "waiting for authorization");
                    }
                    Some(AuthorizationStatus::Invalid) => {
                        anyhow::bail!("authorization failed for {}", host);
                    }
                    Some(status) => {
                        debug!(host = %host, status = ?status, "authorization status");
                    }
                    None => {
                        anyhow::bail!("authorization not found for {}", host);
                    }
                }
            }
        }

        let mut attempts = 0;
        loop {
            let state = order.state();
            match state.status {
                OrderStatus::Ready | OrderStatus::Valid => break,
                OrderStatus::Pending | OrderStatus::Processing => {
                    attempts += 1;
                    if attempts > 30 {
                        anyhow::bail!("order timeout for {}", host);
                    }
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    order.refresh().await?;
                }
                OrderStatus::Invalid => {
                    anyhow::bail!("order invalid for {}", host);
                }
            }
        }

        let mut params = CertificateParams::new(vec![host.to_string()])?;
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, host.to_string());

        let private_key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)?;
        let csr = params.serialize_request(&private_key)?;

        order.finalize(csr.der()).await?;

        let mut attempts = 0;
        let cert_chain_pem: String = loop {
            order.refresh().await?;
            match order.state().status {
                OrderStatus::Valid => {
                    if let Some(cert) = order.certificate().await? {
                        break cert;
                    }
                    anyhow::bail!("order valid but no certificate returned for {}", host);
                }
                OrderStatus::Processing => {
                    attempts += 1;
                    if attempts > 30 {
                        anyhow::bail!("certificate timeout for {}", host);
                    }
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
                status => anyhow::bail!("unexpected order status {:?} for {}", status, host),
            }
        };

        let certs: Vec<CertificateDer<'static>> =
            rustls_pemfile::certs(&mut BufReader::new(cert_chain_pem.as_bytes()))
                .filter_map(|c| c.ok())
                .collect();

        let key = PrivateKeyDer::try_from(private_key.serialize_der())
            .map_err(|e| anyhow::anyhow!("failed to encode private key: {}", e))?;

        Ok((certs, key, cert_chain_pem, private_key.serialize_pem()))
    }

    /// Time-triggered renewal: reissue every stored certificate approaching
    /// expiry, transparently to clients.
    pub async fn run_renewal(&self, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(RENEWAL_CHECK_INTERVAL) => {
                    for host in self.hosts_needing_renewal() {
                        info!(host = %host, "certificate renewal needed");
                        let lock = {
                            let entry = self.issuance_locks.entry(host.clone()).or_default();
                            Arc::clone(entry.value())
                        };
                        let _guard = lock.lock().await;
                        match self.issue(&host).await {
                            Ok(_) => info!(host = %host, "certificate renewed"),
                            Err(e) => error!(host = %host, error = %e, "failed to renew certificate"),
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("certificate manager shutting down");
                        break;
                    }
                }
            }
        }
    }

    fn hosts_needing_renewal(&self) -> Vec<String> {
        self.store
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .cert
                    .first()
                    .map(|der| !cert_valid_for_days(der, RENEW_BEFORE_DAYS))
                    .unwrap_or(true)
            })
            .map(|entry| entry.key().clone())
            .collect()
    }
}

/// rustls server config for application traffic with a fixed certificate.
pub fn application_tls_config(cert: Arc<CertifiedKey>) -> Arc<rustls::ServerConfig> {
    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SingleCertResolver(cert)));
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Arc::new(config)
}

/// rustls server config answering a TLS-ALPN-01 validation handshake.
pub fn challenge_tls_config(cert: Arc<CertifiedKey>) -> Arc<rustls::ServerConfig> {
    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SingleCertResolver(cert)));
    config.alpn_protocols = vec![ACME_TLS_ALPN_NAME.to_vec()];
    Arc::new(config)
}

#[derive(Debug)]
struct SingleCertResolver(Arc<CertifiedKey>);

impl ResolvesServerCert for SingleCertResolver {
    fn resolve(
        &self,
        _client_hello: rustls::server::ClientHello<'_>,
    ) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.0))
    }
}

fn certified_key(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> anyhow::Result<Arc<CertifiedKey>> {
    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key)
        .map_err(|e| anyhow::anyhow!("unsupported private key: {}", e))?;
    Ok(Arc::new(CertifiedKey::new(certs, signing_key)))
}

/// Self-signed certificate carrying the acmeIdentifier extension, presented
/// only to validation connections for this hostname.
fn create_challenge_cert(host: &str, digest: &[u8]) -> anyhow::Result<Arc<CertifiedKey>> {
    use rcgen::{CustomExtension, IsCa, KeyUsagePurpose};

    let mut params = CertificateParams::new(vec![host.to_string()])?;
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];

    // acmeIdentifier: OCTET STRING of the 32-byte key authorization digest
    let mut ext_value = vec![0x04, 0x20];
    ext_value.extend_from_slice(digest);
    params
        .custom_extensions
        .push(CustomExtension::from_oid_content(ACME_ALPN_OID, ext_value));

    let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)?;
    let cert = params.self_signed(&key_pair)?;

    let cert_der = CertificateDer::from(cert.der().to_vec());
    let key_der = PrivateKeyDer::try_from(key_pair.serialize_der())
        .map_err(|e| anyhow::anyhow!("failed to encode private key: {}", e))?;

    certified_key(vec![cert_der], key_der)
}

fn read_private_key(data: &[u8]) -> Option<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(data);

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(rustls_pemfile::Item::Pkcs1Key(key))) => return Some(key.into()),
            Ok(Some(rustls_pemfile::Item::Pkcs8Key(key))) => return Some(key.into()),
            Ok(Some(rustls_pemfile::Item::Sec1Key(key))) => return Some(key.into()),
            Ok(None) => return None,
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

/// Whether a certificate stays valid for at least the given number of days.
fn cert_valid_for_days(cert: &CertificateDer<'_>, days: u64) -> bool {
    use x509_parser::prelude::*;

    let (_, parsed) = match X509Certificate::from_der(cert.as_ref()) {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "failed to parse X.509 certificate");
            return false;
        }
    };

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let expiry = parsed.validity().not_after.timestamp();

    let remaining_secs = expiry - now;
    if remaining_secs < 0 {
        return false;
    }

    remaining_secs as u64 / (24 * 60 * 60) >= days
}

/// Validate and canonicalize the certificate cache directory path.
fn validate_cache_dir(path: &str) -> Result<PathBuf> {
    if path.is_empty() || path.contains("..") {
        return Err(Error::CertCache(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("certificate cache directory {path:?} must be a plain path without '..'"),
        )));
    }

    let path_buf = PathBuf::from(path);

    if path_buf.exists() {
        let canonical = path_buf.canonicalize()?;
        if !canonical.is_dir() {
            return Err(Error::CertCache(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("certificate cache path {path:?} exists but is not a directory"),
            )));
        }
        return Ok(canonical);
    }

    if let Some(parent) = path_buf.parent() {
        if !parent.as_os_str().is_empty() && parent.exists() {
            let canonical_parent = parent.canonicalize()?;
            if let Some(file_name) = path_buf.file_name() {
                return Ok(canonical_parent.join(file_name));
            }
        }
    }

    Ok(path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_config(cert_dir: &str) -> Config {
        Config {
            address: "127.0.0.1:8443".into(),
            cookie_domain: "example.com".into(),
            token: "s3cr3t".into(),
            endpoints: HashMap::new(),
            skip_token_hosts: Default::default(),
            cert_dir: cert_dir.into(),
            acme_contact: None,
            acme_directory: None,
        }
    }

    fn manager_with_hosts(dir: &std::path::Path, hosts: &[&str]) -> CertManager {
        let endpoints = hosts
            .iter()
            .map(|h| (h.to_string(), "http://127.0.0.1:9001".to_string()))
            .collect();
        let routes = Arc::new(RoutingTable::build(&endpoints));
        CertManager::new(routes, &test_config(dir.to_str().unwrap())).unwrap()
    }

    #[test]
    fn test_validate_cache_dir_rejects_traversal() {
        assert!(validate_cache_dir("../etc/passwd").is_err());
        assert!(validate_cache_dir("/tmp/../etc").is_err());
        assert!(validate_cache_dir("").is_err());
    }

    #[test]
    fn test_validate_cache_dir_accepts_valid_paths() {
        assert!(validate_cache_dir("/tmp/frontgate-certs").is_ok());
        assert!(validate_cache_dir("certs").is_ok());
    }

    #[tokio::test]
    async fn test_certificate_refused_outside_whitelist() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_hosts(dir.path(), &["app.example.com"]);

        let err = manager.certificate_for("evil.example.com").await.unwrap_err();
        assert!(matches!(err, Error::HostNotWhitelisted(h) if h == "evil.example.com"));

        let err = manager.certificate_for("bad host!").await.unwrap_err();
        assert!(matches!(err, Error::HostNotWhitelisted(_)));
    }

    #[tokio::test]
    async fn test_whitelist_check_normalizes_host() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_hosts(dir.path(), &["app.example.com"]);

        // Not whitelisted even with decoration that normalizes away
        let err = manager
            .certificate_for("Other.Example.COM:443")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HostNotWhitelisted(h) if h == "other.example.com"));
    }

    #[test]
    fn test_challenge_cert_creation() {
        let digest = [0x42u8; 32];
        let cert = create_challenge_cert("app.example.com", &digest).unwrap();
        assert_eq!(cert.cert.len(), 1);
    }

    #[test]
    fn test_challenge_cert_lookup_is_host_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_hosts(dir.path(), &["app.example.com"]);

        let cert = create_challenge_cert("app.example.com", &[1u8; 32]).unwrap();
        manager
            .challenge_certs
            .insert("app.example.com".to_string(), cert);

        assert!(manager.challenge_cert("app.example.com").is_some());
        assert!(manager.challenge_cert("App.Example.Com:443").is_some());
        assert!(manager.challenge_cert("other.example.com").is_none());
    }

    #[test]
    fn test_self_signed_cert_validity_window() {
        let signed = rcgen::generate_simple_self_signed(vec!["app.example.com".into()]).unwrap();
        let der = CertificateDer::from(signed.cert.der().to_vec());
        // rcgen's default validity extends far into the future
        assert!(cert_valid_for_days(&der, RENEW_BEFORE_DAYS));
    }

    #[test]
    fn test_cert_valid_for_days_rejects_garbage() {
        let der = CertificateDer::from(vec![0u8; 16]);
        assert!(!cert_valid_for_days(&der, 1));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_hosts(dir.path(), &["app.example.com"]);

        let signed = rcgen::generate_simple_self_signed(vec!["app.example.com".into()]).unwrap();
        let chain_pem = signed.cert.pem();
        let key_pem = signed.key_pair.serialize_pem();

        manager
            .save_cert("app.example.com", &chain_pem, &key_pem)
            .unwrap();

        let loaded = manager.load_cached("app.example.com").unwrap();
        assert_eq!(loaded.cert.len(), 1);

        assert!(manager.load_cached("other.example.com").is_none());
    }

    #[test]
    fn test_key_file_permissions() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let dir = tempfile::tempdir().unwrap();
            let manager = manager_with_hosts(dir.path(), &["app.example.com"]);

            let signed =
                rcgen::generate_simple_self_signed(vec!["app.example.com".into()]).unwrap();
            manager
                .save_cert("app.example.com", &signed.cert.pem(), &signed.key_pair.serialize_pem())
                .unwrap();

            let key_path = dir.path().join("app.example.com").join("key.pem");
            let mode = std::fs::metadata(&key_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
