//! The request/recovery engine every registry operation goes through.
//!
//! Per request:
//!
//! ```text
//!   send ──► accepted status ───────────────────────────────► response
//!     │
//!     ├──► 401 + WWW-Authenticate ──► provider.get_access ──► swap client ──► send again
//!     │
//!     ├──► 3xx to another host ──► send again on the anonymous client
//!     │                            (Authorization never crosses hosts)
//!     │
//!     └──► anything else ──► UnexpectedStatus
//! ```
//!
//! Each recovery runs at most once per request. Same-host redirects are
//! followed by the HTTP layer itself.

use crate::access::AccessProvider;
use crate::challenge::AuthChallenge;
use crate::config::RegistryConfig;
use crate::error::{RemoteError, Result};
use crate::service::RegistryRequest;
use parking_lot::RwLock;
use reqwest::header::{HeaderValue, AUTHORIZATION, LOCATION, WWW_AUTHENTICATE};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// An HTTP client, optionally pre-configured to authenticate.
///
/// Instances are immutable. Renewing access builds a new one and swaps it in.
#[derive(Debug, Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    authorization: Option<HeaderValue>,
}

impl HttpClient {
    /// A client that sends no credentials.
    #[must_use]
    pub const fn anonymous(http: reqwest::Client) -> Self {
        Self {
            http,
            authorization: None,
        }
    }

    /// A client that sends `authorization` with every request.
    #[must_use]
    pub const fn authorized(http: reqwest::Client, authorization: HeaderValue) -> Self {
        Self {
            http,
            authorization: Some(authorization),
        }
    }

    /// Returns true if this client sends credentials.
    #[must_use]
    pub const fn is_authorized(&self) -> bool {
        self.authorization.is_some()
    }

    /// Sends one attempt of `request`.
    pub(crate) async fn execute(&self, request: &RegistryRequest) -> Result<reqwest::Response> {
        let mut builder = self
            .http
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(authorization) = &self.authorization {
            builder = builder.header(AUTHORIZATION, authorization.clone());
        }
        if let Some(body) = request.body.take()? {
            builder = builder.body(body);
        }
        Ok(builder.send().await?)
    }
}

/// Builds the client registry requests go out on. It follows redirects only
/// while they stay on the same host.
///
/// # Errors
///
/// Returns an error if TLS material cannot be read or the client cannot be
/// built.
pub fn build_http_client(config: &RegistryConfig) -> Result<reqwest::Client> {
    client_builder(config)?
        .redirect(same_host_redirects(config.max_redirects))
        .build()
        .map_err(|e| RemoteError::ConnectionFailed {
            url: config.base_url(),
            source: e,
        })
}

/// Builds the credential-free client a cross-host redirect is retried on.
/// Further hops are followed up to the configured bound.
///
/// # Errors
///
/// Same as [`build_http_client`].
pub fn build_redirect_client(config: &RegistryConfig) -> Result<reqwest::Client> {
    client_builder(config)?
        .redirect(Policy::limited(config.max_redirects))
        .build()
        .map_err(|e| RemoteError::ConnectionFailed {
            url: config.base_url(),
            source: e,
        })
}

fn client_builder(config: &RegistryConfig) -> Result<reqwest::ClientBuilder> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.timeout)
        .user_agent(&config.user_agent);

    if let Some(ref tls) = config.tls {
        if tls.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(ref ca_cert) = tls.ca_cert {
            let cert_pem = std::fs::read(ca_cert).map_err(|e| RemoteError::io(ca_cert, e))?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&cert_pem)?);
        }

        if let (Some(ref cert_path), Some(ref key_path)) = (&tls.client_cert, &tls.client_key) {
            let mut identity_pem =
                std::fs::read(cert_path).map_err(|e| RemoteError::io(cert_path, e))?;
            let key_pem = std::fs::read(key_path).map_err(|e| RemoteError::io(key_path, e))?;
            identity_pem.extend_from_slice(&key_pem);
            builder = builder.identity(reqwest::Identity::from_pem(&identity_pem)?);
        }
    }

    Ok(builder)
}

/// Follows redirects that stay on the same host and port; stops on any
/// other so the transport can retry without credentials.
fn same_host_redirects(max_redirects: usize) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() > max_redirects {
            return attempt.error("too many redirects");
        }
        let same_host = attempt
            .previous()
            .last()
            .is_some_and(|previous| same_origin_host(previous, attempt.url()));
        if same_host {
            attempt.follow()
        } else {
            attempt.stop()
        }
    })
}

fn same_origin_host(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

/// Conditions the transport recovers from. Never seen by callers.
enum Recovery {
    Challenge(AuthChallenge),
    Redirect(Url),
}

/// Owns the current client and drives recovery.
#[derive(Debug)]
pub struct Transport {
    http: reqwest::Client,
    redirect_http: reqwest::Client,
    current: RwLock<Option<Arc<HttpClient>>>,
    provider: AccessProvider,
}

impl Transport {
    /// Creates a transport. No client exists until the first request.
    ///
    /// `http` carries registry requests and must not follow cross-host
    /// redirects. `redirect_http` retries those redirects anonymously.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        redirect_http: reqwest::Client,
        provider: AccessProvider,
    ) -> Self {
        Self {
            http,
            redirect_http,
            current: RwLock::new(None),
            provider,
        }
    }

    /// The access provider consulted on challenges.
    #[must_use]
    pub const fn provider(&self) -> &AccessProvider {
        &self.provider
    }

    /// The client requests currently go out on, created on first use.
    pub fn current(&self) -> Arc<HttpClient> {
        if let Some(client) = self.current.read().as_ref() {
            return Arc::clone(client);
        }
        let mut slot = self.current.write();
        Arc::clone(slot.get_or_insert_with(|| Arc::new(HttpClient::anonymous(self.http.clone()))))
    }

    /// Swaps in a client that sends `authorization` over this transport's
    /// own HTTP client.
    pub fn authorize(&self, authorization: HeaderValue) -> Arc<HttpClient> {
        self.swap(HttpClient::authorized(self.http.clone(), authorization))
    }

    /// Replaces the current client. Requests already in flight keep the
    /// client they started with.
    pub fn swap(&self, client: HttpClient) -> Arc<HttpClient> {
        let client = Arc::new(client);
        *self.current.write() = Some(Arc::clone(&client));
        client
    }

    /// Sends `request`, accepting only `200 OK`.
    ///
    /// # Errors
    ///
    /// See [`Transport::send_expecting`].
    pub async fn send(&self, request: &RegistryRequest) -> Result<reqwest::Response> {
        self.send_expecting(request, &[StatusCode::OK]).await
    }

    /// Sends `request`, recovering from one challenge and one cross-host
    /// redirect, and returns the first response whose status is in
    /// `accepted`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::UnexpectedStatus`] for any other status, the
    /// provider's error if access cannot be renewed, or the HTTP error of
    /// the failing attempt.
    pub async fn send_expecting(
        &self,
        request: &RegistryRequest,
        accepted: &[StatusCode],
    ) -> Result<reqwest::Response> {
        let mut client = self.current();
        let mut pending = request.clone();
        let mut challenged = false;
        let mut redirected = false;

        loop {
            debug!(
                method = %pending.method,
                url = %pending.url,
                authorized = client.is_authorized(),
                "Sending registry request"
            );
            let response = client.execute(&pending).await?;
            let status = response.status();

            if accepted.contains(&status) {
                return Ok(response);
            }

            match Self::inspect(&response)? {
                Some(Recovery::Challenge(challenge)) if !challenged && !redirected => {
                    challenged = true;
                    info!(
                        realm = %challenge.realm,
                        service = %challenge.service,
                        scope = %challenge.scope,
                        "Renewing registry access"
                    );
                    let access = self.provider.get_access(&challenge, &self.http).await?;
                    client = self.authorize(access.authorization().await?);
                }
                Some(Recovery::Redirect(location)) if !redirected => {
                    redirected = true;
                    debug!(
                        from = %pending.url,
                        to = %location,
                        "Retrying cross-host redirect without credentials"
                    );
                    pending = pending.redirected(location);
                    client = Arc::new(HttpClient::anonymous(self.redirect_http.clone()));
                }
                _ => return Err(RemoteError::unexpected(&response)),
            }
        }
    }

    fn inspect(response: &reqwest::Response) -> Result<Option<Recovery>> {
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            let values: Vec<&str> = response
                .headers()
                .get_all(WWW_AUTHENTICATE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect();
            if values.is_empty() {
                return Ok(None);
            }
            return AuthChallenge::parse(&values.join(",")).map(|c| Some(Recovery::Challenge(c)));
        }

        if status.is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| response.url().join(v).ok());
            if let Some(location) = location {
                if !same_origin_host(response.url(), &location) {
                    return Ok(Some(Recovery::Redirect(location)));
                }
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_origin_host() {
        let a = Url::parse("https://registry.example.com/v2/").unwrap();
        let b = Url::parse("https://registry.example.com:443/v2/blobs").unwrap();
        let c = Url::parse("https://cdn.example.net/v2/").unwrap();
        let d = Url::parse("http://registry.example.com:5000/v2/").unwrap();
        assert!(same_origin_host(&a, &b));
        assert!(!same_origin_host(&a, &c));
        assert!(!same_origin_host(&a, &d));
    }

    #[test]
    fn test_current_client_is_lazy_and_swappable() {
        let transport = Transport::new(
            reqwest::Client::new(),
            reqwest::Client::new(),
            AccessProvider::anonymous(),
        );
        assert!(transport.current.read().is_none());

        let first = transport.current();
        assert!(!first.is_authorized());
        assert!(Arc::ptr_eq(&first, &transport.current()));

        let swapped = transport.swap(HttpClient::authorized(
            reqwest::Client::new(),
            HeaderValue::from_static("Bearer t"),
        ));
        assert!(swapped.is_authorized());
        assert!(transport.current().is_authorized());
        assert!(!first.is_authorized());
    }

    #[test]
    fn test_build_http_client_reports_missing_ca() {
        let config = crate::RegistryConfig::new("registry.example.com", "library/app")
            .with_tls(crate::TlsConfig::new().with_ca_cert("/nonexistent/ca.pem"));
        assert!(matches!(
            build_http_client(&config),
            Err(RemoteError::Io { .. })
        ));
        assert!(matches!(
            build_redirect_client(&config),
            Err(RemoteError::Io { .. })
        ));
    }
}
