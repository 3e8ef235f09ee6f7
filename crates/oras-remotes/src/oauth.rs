//! Bearer token sources.
//!
//! A [`TokenSource`] hands out tokens; [`ReuseTokenSource`] caches one until
//! shortly before it expires and refreshes lazily on the next call. There is
//! no background refresh.

use crate::error::{RemoteError, Result};
use crate::transport::HttpClient;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::header::HeaderValue;
use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN: i64 = 60;

/// How long before expiry a cached token stops being handed out.
const EXPIRY_SKEW: i64 = 10;

/// A bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    /// The opaque token value.
    pub access_token: String,
    /// When the token stops being valid; `None` never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Token {
    /// Creates a token that never expires.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: None,
        }
    }

    /// Returns true if the token can still be used at `now`.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map_or(true, |at| now + Duration::seconds(EXPIRY_SKEW) < at)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Something that can produce a bearer token.
#[async_trait]
pub trait TokenSource: Send + Sync + fmt::Debug {
    /// Returns a token, fetching one if needed.
    async fn token(&self) -> Result<Token>;
}

/// Always returns the same token.
#[derive(Clone)]
pub struct StaticTokenSource {
    token: Token,
}

impl StaticTokenSource {
    /// Wraps a fixed token value.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Token::new(token),
        }
    }
}

impl fmt::Debug for StaticTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<Token> {
        Ok(self.token.clone())
    }
}

/// Exchanges basic credentials for a bearer token at a token realm.
///
/// Every call to [`TokenSource::token`] performs one exchange; wrap it with
/// [`BasicAuthTokenSource::reusable`] to cache the result.
#[derive(Clone)]
pub struct BasicAuthTokenSource {
    realm: String,
    service: String,
    username: String,
    password: String,
    scope: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl BasicAuthTokenSource {
    /// Creates a source for the given realm, service and scope. Empty
    /// username and password mean an anonymous exchange.
    #[must_use]
    pub fn new(
        realm: impl Into<String>,
        service: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        scope: impl Into<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            realm: realm.into(),
            service: service.into(),
            username: username.into(),
            password: password.into(),
            scope: scope.into(),
            http,
        }
    }

    /// Wraps the source in a cache that reuses the token until it expires.
    #[must_use]
    pub fn reusable(self) -> ReuseTokenSource {
        ReuseTokenSource::new(Arc::new(self))
    }

    fn failed(&self, reason: impl Into<String>) -> RemoteError {
        RemoteError::TokenExchangeFailed {
            realm: self.realm.clone(),
            reason: reason.into(),
        }
    }
}

impl fmt::Debug for BasicAuthTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuthTokenSource")
            .field("realm", &self.realm)
            .field("service", &self.service)
            .field("scope", &self.scope)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenSource for BasicAuthTokenSource {
    async fn token(&self) -> Result<Token> {
        let mut url = url::Url::parse(&self.realm).map_err(|e| self.failed(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("service", &self.service);
            if !self.scope.is_empty() {
                query.append_pair("scope", &self.scope);
            }
        }

        let mut request = self.http.get(url);
        if !self.username.is_empty() || !self.password.is_empty() {
            request = request.basic_auth(&self.username, Some(&self.password));
        }

        debug!(
            realm = %self.realm,
            service = %self.service,
            scope = %self.scope,
            "Exchanging token"
        );

        let response = request.send().await.map_err(|e| self.failed(e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(self.failed(format!("status {}", response.status().as_u16())));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| self.failed(format!("decoding response: {e}")))?;

        let access_token = body
            .token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| self.failed("response carries no token"))?;
        let expires_in = body
            .expires_in
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_EXPIRES_IN);

        Ok(Token {
            access_token,
            expires_at: Some(Utc::now() + Duration::seconds(expires_in)),
        })
    }
}

/// Caches the token of an inner source until it is no longer fresh.
pub struct ReuseTokenSource {
    inner: Arc<dyn TokenSource>,
    cached: tokio::sync::Mutex<Option<Token>>,
}

impl ReuseTokenSource {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn TokenSource>) -> Self {
        Self {
            inner,
            cached: tokio::sync::Mutex::new(None),
        }
    }
}

impl fmt::Debug for ReuseTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReuseTokenSource")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenSource for ReuseTokenSource {
    async fn token(&self) -> Result<Token> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.clone());
        }

        let token = self.inner.token().await?;
        *cached = Some(token.clone());
        Ok(token)
    }
}

/// A usable credential for one (namespace, scope) pair.
///
/// There is no expiry tracking here; the registry finds out through the
/// next 401 and asks its provider again.
#[derive(Clone)]
pub struct Access {
    source: Arc<dyn TokenSource>,
    http: reqwest::Client,
}

impl Access {
    /// Creates an access from a token source and the HTTP client to use.
    #[must_use]
    pub fn new(source: Arc<dyn TokenSource>, http: reqwest::Client) -> Self {
        Self { source, http }
    }

    /// Creates an access around a fixed bearer token.
    #[must_use]
    pub fn bearer(token: impl Into<String>, http: reqwest::Client) -> Self {
        Self::new(Arc::new(StaticTokenSource::new(token)), http)
    }

    /// The `Authorization: Bearer <token>` value for the current token,
    /// marked sensitive.
    ///
    /// # Errors
    ///
    /// Returns whatever the token source returns, or
    /// [`RemoteError::TokenExchangeFailed`] if the token cannot be sent as a
    /// header.
    pub async fn authorization(&self) -> Result<HeaderValue> {
        let token = self.source.token().await?;
        let mut value =
            HeaderValue::from_str(&format!("Bearer {}", token.access_token)).map_err(|_| {
                RemoteError::TokenExchangeFailed {
                    realm: String::new(),
                    reason: "token is not a valid header value".to_string(),
                }
            })?;
        value.set_sensitive(true);
        Ok(value)
    }

    /// Produces an HTTP client that sends the bearer token with every
    /// request.
    ///
    /// # Errors
    ///
    /// See [`Access::authorization`].
    pub async fn client(&self) -> Result<HttpClient> {
        Ok(HttpClient::authorized(self.http.clone(), self.authorization().await?))
    }
}

impl fmt::Debug for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Access")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct CountingSource {
        calls: AtomicUsize,
        lifetime: i64,
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn token(&self) -> Result<Token> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Token {
                access_token: format!("token-{n}"),
                expires_at: Some(Utc::now() + Duration::seconds(self.lifetime)),
            })
        }
    }

    #[test]
    fn test_token_freshness() {
        let now = Utc::now();
        assert!(Token::new("t").is_fresh(now));

        let soon = Token {
            access_token: "t".to_string(),
            expires_at: Some(now + Duration::seconds(5)),
        };
        assert!(!soon.is_fresh(now));

        let later = Token {
            access_token: "t".to_string(),
            expires_at: Some(now + Duration::seconds(60)),
        };
        assert!(later.is_fresh(now));
    }

    #[test]
    fn test_token_debug_redacts() {
        let debug = format!("{:?}", Token::new("super-secret"));
        assert!(!debug.contains("super-secret"));
    }

    #[tokio::test]
    async fn test_reuse_token_source_caches_fresh_token() {
        let inner = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            lifetime: 300,
        });
        let source = ReuseTokenSource::new(inner.clone());

        assert_eq!(source.token().await.unwrap().access_token, "token-0");
        assert_eq!(source.token().await.unwrap().access_token, "token-0");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reuse_token_source_refreshes_stale_token() {
        let inner = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            lifetime: 1,
        });
        let source = ReuseTokenSource::new(inner.clone());

        assert_eq!(source.token().await.unwrap().access_token, "token-0");
        assert_eq!(source.token().await.unwrap().access_token, "token-1");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_access_client_carries_bearer() {
        let access = Access::bearer("abc", reqwest::Client::new());
        let client = access.client().await.unwrap();
        assert!(client.is_authorized());
    }
}
