use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Environment variable holding the `host:port` listen address.
pub const ENV_ADDRESS: &str = "FRONTGATE_ADDRESS";
/// Environment variable holding the domain the session cookie is scoped to.
pub const ENV_COOKIE_DOMAIN: &str = "FRONTGATE_COOKIE_DOMAIN";
/// Environment variable holding the shared secret token.
pub const ENV_TOKEN: &str = "FRONTGATE_TOKEN";
/// Prefix for backend endpoint entries. The suffix, with `_` replaced by
/// `.`, is the hostname; the value is the backend origin URL.
pub const ENV_ENDPOINT_PREFIX: &str = "FRONTGATE_ENDPOINT_";
/// Environment variable holding a comma-separated list of hostnames exempt
/// from the cookie check.
pub const ENV_SKIP_TOKEN_HOSTS: &str = "FRONTGATE_SKIP_TOKEN_HOSTS";
/// Environment variable overriding the certificate cache directory.
pub const ENV_CERT_DIR: &str = "FRONTGATE_CERT_DIR";
/// Environment variable holding the ACME contact email.
pub const ENV_ACME_CONTACT: &str = "FRONTGATE_ACME_CONTACT";
/// Environment variable overriding the ACME directory URL.
pub const ENV_ACME_DIRECTORY: &str = "FRONTGATE_ACME_DIRECTORY";

/// Global configuration for the gateway.
///
/// Built once at startup, validated, and never re-read afterwards. Every
/// component receives its slice of this object at construction time.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// `host:port` for the IPv4 listener
    pub address: String,

    /// Domain the session cookie is scoped to
    pub cookie_domain: String,

    /// Shared secret token: bootstrap path segment and cookie value
    pub token: String,

    /// Hostname -> backend origin URL. Keys double as the ACME whitelist.
    #[serde(default)]
    pub endpoints: HashMap<String, String>,

    /// Hostnames exempt from the cookie check (e.g. hosts with their own auth)
    #[serde(default)]
    pub skip_token_hosts: HashSet<String>,

    /// Directory for cached certificates and the ACME account
    #[serde(default = "default_cert_dir")]
    pub cert_dir: String,

    /// Contact email registered with the ACME account
    pub acme_contact: Option<String>,

    /// ACME directory URL (defaults to Let's Encrypt production)
    /// Use "https://acme-staging-v02.api.letsencrypt.org/directory" for testing
    pub acme_directory: Option<String>,
}

fn default_cert_dir() -> String {
    "certs".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_env_iter(std::env::vars())
    }

    /// Build configuration from an arbitrary set of environment pairs.
    ///
    /// Endpoint entries use prefix-keyed variables: the key suffix with `_`
    /// replaced by `.` is the hostname, the value is the backend origin URL.
    /// `FRONTGATE_ENDPOINT_app_example_com=http://127.0.0.1:9001` maps
    /// `app.example.com` to that origin.
    pub fn from_env_iter(vars: impl Iterator<Item = (String, String)>) -> Result<Self> {
        let mut config = Config {
            address: String::new(),
            cookie_domain: String::new(),
            token: String::new(),
            endpoints: HashMap::new(),
            skip_token_hosts: HashSet::new(),
            cert_dir: default_cert_dir(),
            acme_contact: None,
            acme_directory: None,
        };

        for (key, value) in vars {
            match key.as_str() {
                ENV_ADDRESS => config.address = value,
                ENV_COOKIE_DOMAIN => config.cookie_domain = value,
                ENV_TOKEN => config.token = value,
                ENV_CERT_DIR => config.cert_dir = value,
                ENV_ACME_CONTACT => config.acme_contact = Some(value),
                ENV_ACME_DIRECTORY => config.acme_directory = Some(value),
                ENV_SKIP_TOKEN_HOSTS => {
                    config.skip_token_hosts = value
                        .split(',')
                        .map(str::trim)
                        .filter(|h| !h.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                _ => {
                    if let Some(suffix) = key.strip_prefix(ENV_ENDPOINT_PREFIX) {
                        let hostname = suffix.replace('_', ".").to_lowercase();
                        config.endpoints.insert(hostname, value);
                    }
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Fail fast on missing required values. Endpoint URLs are not checked
    /// here; unparsable entries are logged and skipped when the routing
    /// table is built.
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(Error::MissingConfig(ENV_ADDRESS));
        }
        if self.cookie_domain.is_empty() {
            return Err(Error::MissingConfig(ENV_COOKIE_DOMAIN));
        }
        if self.token.is_empty() {
            return Err(Error::MissingConfig(ENV_TOKEN));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_vars() -> Vec<(String, String)> {
        vec![
            (ENV_ADDRESS.into(), "0.0.0.0:443".into()),
            (ENV_COOKIE_DOMAIN.into(), "example.com".into()),
            (ENV_TOKEN.into(), "s3cr3t".into()),
        ]
    }

    #[test]
    fn test_from_env_minimal() {
        let config = Config::from_env_iter(base_vars().into_iter()).unwrap();
        assert_eq!(config.address, "0.0.0.0:443");
        assert_eq!(config.cookie_domain, "example.com");
        assert_eq!(config.token, "s3cr3t");
        assert!(config.endpoints.is_empty());
        assert!(config.skip_token_hosts.is_empty());
        assert_eq!(config.cert_dir, "certs");
    }

    #[test]
    fn test_endpoint_prefix_maps_underscores_to_dots() {
        let mut vars = base_vars();
        vars.push((
            format!("{}app_example_com", ENV_ENDPOINT_PREFIX),
            "http://127.0.0.1:9001".into(),
        ));
        vars.push((
            format!("{}grafana_example_com", ENV_ENDPOINT_PREFIX),
            "http://127.0.0.1:3000".into(),
        ));

        let config = Config::from_env_iter(vars.into_iter()).unwrap();
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(
            config.endpoints.get("app.example.com"),
            Some(&"http://127.0.0.1:9001".to_string())
        );
        assert_eq!(
            config.endpoints.get("grafana.example.com"),
            Some(&"http://127.0.0.1:3000".to_string())
        );
    }

    #[test]
    fn test_skip_token_hosts_parsing() {
        let mut vars = base_vars();
        vars.push((
            ENV_SKIP_TOKEN_HOSTS.into(),
            "public.example.com, api.example.com,".into(),
        ));

        let config = Config::from_env_iter(vars.into_iter()).unwrap();
        assert_eq!(config.skip_token_hosts.len(), 2);
        assert!(config.skip_token_hosts.contains("public.example.com"));
        assert!(config.skip_token_hosts.contains("api.example.com"));
    }

    #[test]
    fn test_missing_required_values() {
        for missing in [ENV_ADDRESS, ENV_COOKIE_DOMAIN, ENV_TOKEN] {
            let vars = base_vars()
                .into_iter()
                .filter(|(k, _)| k != missing)
                .collect::<Vec<_>>();
            let err = Config::from_env_iter(vars.into_iter()).unwrap_err();
            assert!(err.to_string().contains(missing), "expected {missing} in {err}");
        }
    }

    #[test]
    fn test_empty_required_value_rejected() {
        let mut vars = base_vars();
        vars[2].1 = String::new();
        assert!(Config::from_env_iter(vars.into_iter()).is_err());
    }

    #[test]
    fn test_acme_overrides() {
        let mut vars = base_vars();
        vars.push((ENV_ACME_CONTACT.into(), "admin@example.com".into()));
        vars.push((
            ENV_ACME_DIRECTORY.into(),
            "https://acme-staging-v02.api.letsencrypt.org/directory".into(),
        ));
        vars.push((ENV_CERT_DIR.into(), "/var/lib/frontgate/certs".into()));

        let config = Config::from_env_iter(vars.into_iter()).unwrap();
        assert_eq!(config.acme_contact, Some("admin@example.com".to_string()));
        assert_eq!(
            config.acme_directory,
            Some("https://acme-staging-v02.api.letsencrypt.org/directory".to_string())
        );
        assert_eq!(config.cert_dir, "/var/lib/frontgate/certs");
    }

    #[test]
    fn test_parse_toml_config() {
        let toml = r#"
address = "0.0.0.0:8443"
cookie_domain = "example.com"
token = "s3cr3t"
cert_dir = "/var/lib/frontgate/certs"
acme_contact = "admin@example.com"
skip_token_hosts = ["public.example.com"]

[endpoints]
"app.example.com" = "http://127.0.0.1:9001"
"grafana.example.com" = "http://127.0.0.1:3000"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.address, "0.0.0.0:8443");
        assert_eq!(config.endpoints.len(), 2);
        assert!(config.skip_token_hosts.contains("public.example.com"));
    }

    #[test]
    fn test_toml_defaults() {
        let toml = r#"
address = "0.0.0.0:443"
cookie_domain = "example.com"
token = "s3cr3t"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.cert_dir, "certs");
        assert!(config.acme_contact.is_none());
        assert!(config.acme_directory.is_none());
        assert!(config.endpoints.is_empty());
    }
}
