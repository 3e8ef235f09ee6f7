//! Service addressing for the OCI Distribution API.
//!
//! A [`Service`] is fixed to one repository and optionally one locator,
//! digest and media type. It only formats URLs and builds
//! [`RegistryRequest`]s; it never performs I/O.
//!
//! | Endpoint      | Method      | Path                                                   |
//! |---------------|-------------|--------------------------------------------------------|
//! | base          | GET         | `/v2/`                                                 |
//! | blobs         | GET / HEAD  | `/v2/<name>/blobs/<digest>`                            |
//! | blob uploads  | POST        | `/v2/<name>/blobs/uploads/[?digest=<digest>]`          |
//! | blob mount    | POST        | `/v2/<name>/blobs/uploads/?mount=<digest>&from=<name>` |
//! | manifests     | GET / HEAD / PUT | `/v2/<name>/manifests/<reference>`                |
//! | tags          | GET         | `/v2/<name>/tags/list[?n=<n>&last=<last>]`             |

use crate::config::Scheme;
use crate::digest::Digest;
use crate::error::{RemoteError, Result};
use crate::oci::MediaType;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use std::sync::Arc;
use url::Url;

/// What an extension URL builder gets to work with.
#[derive(Debug, Clone, Copy)]
pub struct ExtensionTarget<'a> {
    /// URL scheme of the registry.
    pub scheme: Scheme,
    /// Registry host.
    pub host: &'a str,
    /// Repository namespace.
    pub namespace: &'a str,
    /// Tag or digest locator, if any.
    pub locator: Option<&'a str>,
    /// Media type of the target content, if known.
    pub media_type: Option<&'a MediaType>,
    /// Digest of the target content, if known.
    pub digest: Option<&'a Digest>,
}

/// Builds the URL of a non-standard API for a target. May borrow from the
/// caller for `'a`.
pub type ExtensionApi<'a> = dyn Fn(&ExtensionTarget<'_>) -> Result<Url> + Send + Sync + 'a;

/// Addressing handle for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    scheme: Scheme,
    host: String,
    namespace: String,
    locator: Option<String>,
    digest: Option<Digest>,
    media_type: Option<MediaType>,
}

impl Service {
    /// Creates a handle for `namespace` on `host`.
    #[must_use]
    pub fn new(scheme: Scheme, host: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            scheme,
            host: host.into(),
            namespace: namespace.into(),
            locator: None,
            digest: None,
            media_type: None,
        }
    }

    /// Sets the tag or digest used in manifest URLs.
    #[must_use]
    pub fn with_locator(mut self, locator: impl Into<String>) -> Self {
        self.locator = Some(locator.into());
        self
    }

    /// Sets the content digest.
    #[must_use]
    pub fn with_digest(mut self, digest: Digest) -> Self {
        self.digest = Some(digest);
        self
    }

    /// Sets the media type sent as `Accept` or `Content-Type`.
    #[must_use]
    pub fn with_media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = Some(media_type);
        self
    }

    /// Registry host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Repository namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Tag or digest locator, if set.
    #[must_use]
    pub fn locator(&self) -> Option<&str> {
        self.locator.as_deref()
    }

    /// Content digest, if set.
    #[must_use]
    pub const fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    /// Media type, if set.
    #[must_use]
    pub const fn media_type(&self) -> Option<&MediaType> {
        self.media_type.as_ref()
    }

    /// `/v2/`
    ///
    /// # Errors
    ///
    /// Returns an error if the host does not form a valid URL.
    pub fn base(&self) -> Result<Url> {
        self.url("/v2/")
    }

    /// `/v2/<name>/manifests/<reference>`, using the locator or else the digest.
    ///
    /// # Errors
    ///
    /// Returns an error if neither a locator nor a digest is set.
    pub fn manifests(&self) -> Result<Url> {
        let reference = self
            .locator
            .as_deref()
            .or_else(|| self.digest.as_ref().map(Digest::as_str))
            .ok_or_else(|| self.missing("manifests", "locator"))?;
        self.url(&format!("/v2/{}/manifests/{reference}", self.namespace))
    }

    /// `/v2/<name>/blobs/<digest>`
    ///
    /// # Errors
    ///
    /// Returns an error if no digest is set.
    pub fn blobs(&self) -> Result<Url> {
        let digest = self.digest.as_ref().ok_or_else(|| self.missing("blobs", "digest"))?;
        self.url(&format!("/v2/{}/blobs/{digest}", self.namespace))
    }

    /// `/v2/<name>/blobs/uploads/`, with `?digest=` when a digest is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the host does not form a valid URL.
    pub fn blob_uploads(&self) -> Result<Url> {
        let mut url = self.url(&format!("/v2/{}/blobs/uploads/", self.namespace))?;
        if let Some(digest) = &self.digest {
            url.query_pairs_mut().append_pair("digest", digest.as_str());
        }
        Ok(url)
    }

    /// `/v2/<name>/blobs/uploads/?mount=<digest>&from=<other_name>`
    ///
    /// # Errors
    ///
    /// Returns an error if the host does not form a valid URL.
    pub fn blob_upload_mount_from(&self, mount: &Digest, from: &str) -> Result<Url> {
        let mut url = self.url(&format!("/v2/{}/blobs/uploads/", self.namespace))?;
        url.query_pairs_mut()
            .append_pair("mount", mount.as_str())
            .append_pair("from", from);
        Ok(url)
    }

    /// `/v2/<name>/tags/list`
    ///
    /// # Errors
    ///
    /// Returns an error if the host does not form a valid URL.
    pub fn tags(&self) -> Result<Url> {
        self.url(&format!("/v2/{}/tags/list", self.namespace))
    }

    /// `/v2/<name>/tags/list?n=<n>&last=<last>`
    ///
    /// # Errors
    ///
    /// Returns an error if the host does not form a valid URL.
    pub fn tags_filter(&self, n: usize, last: Option<&str>) -> Result<Url> {
        let mut url = self.tags()?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("n", &n.to_string());
            if let Some(last) = last {
                query.append_pair("last", last);
            }
        }
        Ok(url)
    }

    /// Builds a request, setting `Accept` for reads and `Content-Type` for
    /// writes from the handle's media type.
    #[must_use]
    pub fn request(&self, method: Method, url: Url, body: RequestBody) -> RegistryRequest {
        let mut request = RegistryRequest::new(method, url);
        if let Some(media_type) = &self.media_type {
            let header = if body.is_empty() { ACCEPT } else { CONTENT_TYPE };
            if let Ok(value) = HeaderValue::from_str(media_type.as_str()) {
                request.headers.insert(header, value);
            }
        }
        request.body = body;
        request
    }

    /// Builds a request against a URL produced by an extension builder.
    ///
    /// # Errors
    ///
    /// Returns whatever the extension builder returns.
    pub fn extension(
        &self,
        method: Method,
        body: RequestBody,
        extension: &ExtensionApi<'_>,
    ) -> Result<RegistryRequest> {
        let url = extension(&ExtensionTarget {
            scheme: self.scheme,
            host: &self.host,
            namespace: &self.namespace,
            locator: self.locator.as_deref(),
            media_type: self.media_type.as_ref(),
            digest: self.digest.as_ref(),
        })?;
        Ok(self.request(method, url, body))
    }

    fn url(&self, path: &str) -> Result<Url> {
        let raw = format!("{}://{}{path}", self.scheme.as_str(), self.host);
        Url::parse(&raw).map_err(|_| RemoteError::InvalidUrl { url: raw })
    }

    fn missing(&self, endpoint: &str, what: &str) -> RemoteError {
        RemoteError::InvalidUrl {
            url: format!(
                "{}://{}/v2/{}/{endpoint}/<missing {what}>",
                self.scheme.as_str(),
                self.host,
                self.namespace
            ),
        }
    }
}

/// Body of a [`RegistryRequest`].
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// A buffered body that can be replayed.
    Bytes(Bytes),
    /// A streamed body that can be sent exactly once.
    Stream(Arc<Mutex<Option<reqwest::Body>>>),
}

impl RequestBody {
    /// Wraps a single-use streaming body.
    #[must_use]
    pub fn stream(body: reqwest::Body) -> Self {
        Self::Stream(Arc::new(Mutex::new(Some(body))))
    }

    /// Returns true if there is no body.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Produces the body for one send attempt.
    pub(crate) fn take(&self) -> Result<Option<reqwest::Body>> {
        match self {
            Self::Empty => Ok(None),
            Self::Bytes(bytes) => Ok(Some(reqwest::Body::from(bytes.clone()))),
            Self::Stream(slot) => slot.lock().take().map(Some).ok_or(RemoteError::StreamConsumed),
        }
    }
}

/// A request to a registry, kept independent of any HTTP client so the
/// transport can re-issue it after recovery.
#[derive(Debug, Clone)]
pub struct RegistryRequest {
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) headers: HeaderMap,
    pub(crate) body: RequestBody,
}

impl RegistryRequest {
    /// Creates a request with no headers and no body.
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// HTTP method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Target URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Request headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The same request aimed at `location`, with any Authorization header removed.
    #[must_use]
    pub(crate) fn redirected(&self, location: Url) -> Self {
        let mut headers = self.headers.clone();
        headers.remove(AUTHORIZATION);
        Self {
            method: self.method.clone(),
            url: location,
            headers,
            body: self.body.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest() -> Digest {
        Digest::parse(&format!("sha256:{}", "a".repeat(64))).unwrap()
    }

    fn service() -> Service {
        Service::new(Scheme::Https, "registry.example.com", "library/app")
    }

    #[test]
    fn test_manifests_url() {
        let url = service().with_locator("v1").manifests().unwrap();
        assert_eq!(url.as_str(), "https://registry.example.com/v2/library/app/manifests/v1");

        let by_digest = service().with_digest(digest()).manifests().unwrap();
        assert!(by_digest.path().ends_with(&format!("/manifests/{}", digest())));

        assert!(service().manifests().is_err());
    }

    #[test]
    fn test_blobs_url() {
        let url = service().with_digest(digest()).blobs().unwrap();
        assert_eq!(url.path(), format!("/v2/library/app/blobs/{}", digest()));
        assert!(service().blobs().is_err());
    }

    #[test]
    fn test_blob_uploads_urls() {
        let plain = service().blob_uploads().unwrap();
        assert_eq!(plain.as_str(), "https://registry.example.com/v2/library/app/blobs/uploads/");

        let with_digest = service().with_digest(digest()).blob_uploads().unwrap();
        let expected = format!("digest=sha256%3A{}", "a".repeat(64));
        assert_eq!(with_digest.query(), Some(expected.as_str()));

        let mount = service().blob_upload_mount_from(&digest(), "library/base").unwrap();
        let pairs: Vec<(String, String)> = mount.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("mount".to_string(), digest().to_string()),
                ("from".to_string(), "library/base".to_string()),
            ]
        );
    }

    #[test]
    fn test_tags_urls() {
        assert_eq!(service().tags().unwrap().path(), "/v2/library/app/tags/list");
        let filtered = service().tags_filter(50, Some("v1")).unwrap();
        assert_eq!(filtered.query(), Some("n=50&last=v1"));
        assert_eq!(service().tags_filter(10, None).unwrap().query(), Some("n=10"));
    }

    #[test]
    fn test_request_sets_accept_for_reads_and_content_type_for_writes() {
        let svc = service()
            .with_locator("v1")
            .with_media_type(MediaType::new(MediaType::OCI_MANIFEST));
        let url = svc.manifests().unwrap();

        let read = svc.request(Method::GET, url.clone(), RequestBody::Empty);
        assert_eq!(read.headers().get(ACCEPT).unwrap(), MediaType::OCI_MANIFEST);
        assert!(read.headers().get(CONTENT_TYPE).is_none());

        let write = svc.request(Method::PUT, url, RequestBody::Bytes(Bytes::from_static(b"{}")));
        assert_eq!(write.headers().get(CONTENT_TYPE).unwrap(), MediaType::OCI_MANIFEST);
        assert!(write.headers().get(ACCEPT).is_none());
    }

    #[test]
    fn test_extension_receives_target() {
        fn api(target: &ExtensionTarget<'_>) -> Result<Url> {
            let url = Url::parse(&format!(
                "{}://{}/ext/{}/{}",
                target.scheme.as_str(),
                target.host,
                target.namespace,
                target.digest.map(Digest::encoded).unwrap_or_default()
            ))?;
            Ok(url)
        }

        let svc = service().with_digest(digest());
        let request = svc.extension(Method::GET, RequestBody::Empty, &api).unwrap();
        assert_eq!(
            request.url().as_str(),
            format!("https://registry.example.com/ext/library/app/{}", "a".repeat(64))
        );
    }

    #[test]
    fn test_extension_may_borrow_caller_state() {
        let suffix = String::from("referrers");
        let api = |target: &ExtensionTarget<'_>| -> Result<Url> {
            Ok(Url::parse(&format!(
                "https://{}/ext/{}/{suffix}",
                target.host, target.namespace
            ))?)
        };

        let request = service().extension(Method::GET, RequestBody::Empty, &api).unwrap();
        assert_eq!(
            request.url().as_str(),
            "https://registry.example.com/ext/library/app/referrers"
        );
    }

    #[test]
    fn test_stream_body_is_single_use() {
        let body = RequestBody::stream(reqwest::Body::from("x"));
        assert!(body.take().unwrap().is_some());
        assert!(matches!(body.take(), Err(RemoteError::StreamConsumed)));

        let bytes = RequestBody::Bytes(Bytes::from_static(b"x"));
        assert!(bytes.take().unwrap().is_some());
        assert!(bytes.take().unwrap().is_some());
    }

    #[test]
    fn test_redirected_strips_authorization() {
        let request = RegistryRequest::new(Method::GET, service().base().unwrap())
            .header(AUTHORIZATION, HeaderValue::from_static("Bearer secret"))
            .header(ACCEPT, HeaderValue::from_static("*/*"));
        let moved = request.redirected(Url::parse("https://cdn.example.net/blob").unwrap());
        assert!(moved.headers().get(AUTHORIZATION).is_none());
        assert!(moved.headers().get(ACCEPT).is_some());
        assert_eq!(moved.url().host_str(), Some("cdn.example.net"));
    }
}
