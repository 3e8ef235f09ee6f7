//! Configuration types for the registry client and the access layer.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// URL scheme used to reach a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    /// TLS (the default).
    #[default]
    Https,
    /// Plain HTTP, for local development registries.
    Http,
}

impl Scheme {
    /// Returns the scheme string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Https => "https",
            Self::Http => "http",
        }
    }
}

/// Configuration for a [`Registry`](crate::Registry).
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Registry host, optionally with a port (e.g. `localhost:5000`).
    pub host: String,

    /// Repository namespace served by this registry handle (e.g. `library/app`).
    pub namespace: String,

    /// URL scheme.
    pub scheme: Scheme,

    /// Request timeout.
    pub timeout: Duration,

    /// Maximum number of same-host redirects the HTTP layer follows.
    pub max_redirects: usize,

    /// TLS configuration for mTLS.
    pub tls: Option<TlsConfig>,

    /// User agent string.
    pub user_agent: String,
}

impl RegistryConfig {
    /// Creates a configuration for the given host and namespace.
    ///
    /// # Examples
    ///
    /// ```
    /// use oras_remotes::RegistryConfig;
    ///
    /// let config = RegistryConfig::new("registry.example.com", "library/app");
    /// assert_eq!(config.base_url(), "https://registry.example.com");
    /// ```
    #[must_use]
    pub fn new(host: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            namespace: namespace.into(),
            scheme: Scheme::Https,
            timeout: Duration::from_secs(30),
            max_redirects: 10,
            tls: None,
            user_agent: format!("oras-remotes/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Talks plain HTTP instead of HTTPS.
    ///
    /// # Examples
    ///
    /// ```
    /// use oras_remotes::RegistryConfig;
    ///
    /// let config = RegistryConfig::new("localhost:5000", "oras").with_plain_http();
    /// assert_eq!(config.base_url(), "http://localhost:5000");
    /// ```
    #[must_use]
    pub const fn with_plain_http(mut self) -> Self {
        self.scheme = Scheme::Http;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the maximum number of same-host redirects.
    #[must_use]
    pub const fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Sets the TLS configuration.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Sets the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Returns `scheme://host`.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme.as_str(), self.host)
    }
}

/// Trust and identity material for registry connections.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// PEM bundle added to the trusted roots, for registries behind a
    /// private CA.
    pub ca_cert: Option<PathBuf>,

    /// PEM client certificate presented to registries requiring mutual TLS.
    pub client_cert: Option<PathBuf>,

    /// PEM private key matching `client_cert`.
    pub client_key: Option<PathBuf>,

    /// Accept any server certificate.
    pub insecure_skip_verify: bool,
}

impl TlsConfig {
    /// Verifying TLS with the platform roots only.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ca_cert: None,
            client_cert: None,
            client_key: None,
            insecure_skip_verify: false,
        }
    }

    /// Trusts the CA bundle at `path` in addition to the platform roots.
    #[must_use]
    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert = Some(path.into());
        self
    }

    /// Presents `cert` and `key` to the registry.
    #[must_use]
    pub fn with_client_cert(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.client_cert = Some(cert.into());
        self.client_key = Some(key.into());
        self
    }

    /// Skips server certificate verification. Only meant for local
    /// registries with self-signed certificates.
    #[must_use]
    pub const fn insecure(mut self) -> Self {
        self.insecure_skip_verify = true;
        self
    }
}

/// Directories the access layer falls back to.
///
/// These used to be read from the process environment at the point of use;
/// [`AccessConfig::from_env`] is now the only place that happens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessConfig {
    /// Root of the session environment (`ORAS_BEGIN_ENV`).
    pub begin_env: Option<PathBuf>,

    /// Content store directory (`ORAS_STORE_DIR`).
    pub store_dir: Option<PathBuf>,

    /// Login directory holding the `loginrc` helper (`ORAS_LOGIN_DIR`).
    pub login_dir: Option<PathBuf>,

    /// Namespace of the session (`ORAS_NAMESPACE`).
    pub namespace: Option<String>,
}

impl AccessConfig {
    /// Environment variable naming the session root.
    pub const BEGIN_ENV: &'static str = "ORAS_BEGIN_ENV";
    /// Environment variable naming the store directory.
    pub const STORE_DIR: &'static str = "ORAS_STORE_DIR";
    /// Environment variable naming the login directory.
    pub const LOGIN_DIR: &'static str = "ORAS_LOGIN_DIR";
    /// Environment variable naming the session namespace.
    pub const NAMESPACE: &'static str = "ORAS_NAMESPACE";

    /// Reads the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Empty values
    /// count as unset.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        Self {
            begin_env: get(Self::BEGIN_ENV).map(PathBuf::from),
            store_dir: get(Self::STORE_DIR).map(PathBuf::from),
            login_dir: get(Self::LOGIN_DIR).map(PathBuf::from),
            namespace: get(Self::NAMESPACE),
        }
    }

    /// Sets the session root.
    #[must_use]
    pub fn with_begin_env(mut self, dir: impl Into<PathBuf>) -> Self {
        self.begin_env = Some(dir.into());
        self
    }

    /// Sets the session namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Returns `<begin_env>/<namespace>/access`, if either part is configured.
    #[must_use]
    pub fn access_root(&self) -> Option<PathBuf> {
        if self.begin_env.is_none() && self.namespace.is_none() {
            return None;
        }
        let mut root = self.begin_env.clone().unwrap_or_default();
        if let Some(ns) = &self.namespace {
            root.push(ns);
        }
        root.push("access");
        Some(root)
    }

    /// Returns the path of the login helper inside `login_dir`.
    #[must_use]
    pub fn login_helper(&self) -> Option<PathBuf> {
        self.login_dir.as_deref().map(|dir| Path::new(dir).join("loginrc"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_new() {
        let config = RegistryConfig::new("registry.example.com", "library/app");
        assert_eq!(config.host, "registry.example.com");
        assert_eq!(config.namespace, "library/app");
        assert_eq!(config.scheme, Scheme::Https);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.user_agent.starts_with("oras-remotes/"));
    }

    #[test]
    fn test_plain_http_base_url() {
        let config = RegistryConfig::new("127.0.0.1:5000", "oras").with_plain_http();
        assert_eq!(config.base_url(), "http://127.0.0.1:5000");
    }

    #[test]
    fn test_tls_material_for_private_registry() {
        let config = RegistryConfig::new("registry.internal:5443", "team/app").with_tls(
            TlsConfig::new()
                .with_ca_cert("/etc/oras/ca.pem")
                .with_client_cert("/etc/oras/client.pem", "/etc/oras/client-key.pem"),
        );

        let tls = config.tls.expect("tls configured");
        assert_eq!(tls.ca_cert.as_deref(), Some(std::path::Path::new("/etc/oras/ca.pem")));
        assert_eq!(tls.client_key, Some(PathBuf::from("/etc/oras/client-key.pem")));
        assert!(!tls.insecure_skip_verify);
        assert!(TlsConfig::new().insecure().insecure_skip_verify);
    }

    #[test]
    fn test_access_config_from_lookup() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("ORAS_BEGIN_ENV", "/tmp/session"),
            ("ORAS_NAMESPACE", "team"),
            ("ORAS_LOGIN_DIR", "/tmp/login"),
            ("ORAS_STORE_DIR", ""),
        ]);
        let config = AccessConfig::from_lookup(|k| env.get(k).map(ToString::to_string));

        assert_eq!(config.store_dir, None);
        assert_eq!(config.access_root(), Some(PathBuf::from("/tmp/session/team/access")));
        assert_eq!(config.login_helper(), Some(PathBuf::from("/tmp/login/loginrc")));
    }

    #[test]
    fn test_access_root_requires_configuration() {
        assert_eq!(AccessConfig::default().access_root(), None);
    }
}
