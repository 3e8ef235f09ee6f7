//! Manifest verbs: HEAD for descriptors, GET for bodies.
//!
//! The `Docker-Content-Digest` response header is authoritative. Digests
//! are never recomputed from fetched bytes.

use crate::digest::Digest;
use crate::error::{RemoteError, Result};
use crate::oci::{Descriptor, Manifest, MediaType};
use crate::service::{RegistryRequest, RequestBody, Service};
use crate::transport::Transport;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use tracing::debug;

/// Response header carrying the digest the registry computed.
pub const DOCKER_CONTENT_DIGEST: HeaderName = HeaderName::from_static("docker-content-digest");

/// Builds a manifest request, accepting every manifest type unless the
/// service pins one.
pub(crate) fn manifest_request(service: &Service, method: Method) -> Result<RegistryRequest> {
    let request = service.request(method, service.manifests()?, RequestBody::Empty);
    if service.media_type().is_some() {
        return Ok(request);
    }
    let accept = HeaderValue::from_str(&MediaType::manifest_accept())
        .map_err(|_| RemoteError::InvalidUrl {
            url: request.url().to_string(),
        })?;
    Ok(request.header(ACCEPT, accept))
}

/// Parses the `Docker-Content-Digest` header.
pub(crate) fn content_digest(headers: &HeaderMap) -> Result<Digest> {
    let value = headers
        .get(DOCKER_CONTENT_DIGEST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    Digest::parse(value.trim())
}

/// `Content-Type` without parameters, falling back when absent.
fn content_type(headers: &HeaderMap, fallback: Option<&MediaType>) -> MediaType {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map_or_else(
            || fallback.cloned().unwrap_or_else(|| MediaType::new(MediaType::OCI_MANIFEST)),
            MediaType::new,
        )
}

fn content_length(headers: &HeaderMap) -> u64 {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Builds a descriptor from the headers of a manifest response.
///
/// # Errors
///
/// Returns [`RemoteError::InvalidDigest`] if the digest header is missing
/// or does not validate.
pub fn descriptor_from_headers(
    headers: &HeaderMap,
    fallback: Option<&MediaType>,
) -> Result<Descriptor> {
    Ok(Descriptor::new(
        content_type(headers, fallback),
        content_digest(headers)?,
        content_length(headers),
    ))
}

/// HEAD the manifest and describe it from the response headers alone.
pub(crate) async fn get_descriptor(transport: &Transport, service: &Service) -> Result<Descriptor> {
    let request = manifest_request(service, Method::HEAD)?;
    let response = transport.send(&request).await?;
    let descriptor = descriptor_from_headers(response.headers(), service.media_type())?;
    debug!(digest = %descriptor.digest, size = descriptor.size, "Resolved manifest descriptor");
    Ok(descriptor)
}

/// GET the manifest, returning its descriptor and decoded body.
pub(crate) async fn get_descriptor_with_manifest(
    transport: &Transport,
    service: &Service,
) -> Result<(Descriptor, Manifest)> {
    let request = manifest_request(service, Method::GET)?;
    let response = transport.send(&request).await?;

    let media_type = content_type(response.headers(), service.media_type());
    let digest = content_digest(response.headers())?;
    let body = response.bytes().await?;
    let manifest: Manifest = serde_json::from_slice(&body)?;

    Ok((Descriptor::new(media_type, digest, body.len() as u64), manifest))
}

/// HEAD the manifest location a push would write to. Returns true when
/// the registry already serves `expected` there.
///
/// A digest location answering with any other digest is an error. A tag
/// answering with another digest is about to be moved and returns false.
pub(crate) async fn check_manifest(
    transport: &Transport,
    service: &Service,
    expected: &Digest,
) -> Result<bool> {
    let request = manifest_request(service, Method::HEAD)?;
    let response = transport
        .send_expecting(&request, &[StatusCode::OK, StatusCode::NOT_FOUND])
        .await?;

    if response.status() == StatusCode::NOT_FOUND {
        return Ok(false);
    }

    let served = content_digest(response.headers()).ok();
    if served.as_ref() == Some(expected) {
        return Ok(true);
    }

    let by_digest = service.locator().is_none_or(|l| Digest::parse(l).is_ok());
    if by_digest {
        debug!(
            url = %response.url(),
            expected = %expected,
            served = ?served.as_ref().map(Digest::as_str),
            "Registry serves different content at digest location"
        );
        return Err(RemoteError::unexpected(&response));
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(HeaderName::from_static(*name), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_descriptor_from_headers() {
        let digest = format!("sha256:{}", "4".repeat(64));
        let map = headers(&[
            ("docker-content-digest", digest.as_str()),
            ("content-type", "application/vnd.oci.image.manifest.v1+json; charset=utf-8"),
            ("content-length", "512"),
        ]);

        let desc = descriptor_from_headers(&map, None).unwrap();
        assert_eq!(desc.digest.as_str(), digest);
        assert_eq!(desc.media_type.as_str(), MediaType::OCI_MANIFEST);
        assert_eq!(desc.size, 512);
    }

    #[test]
    fn test_descriptor_from_headers_rejects_bad_digest() {
        let missing = headers(&[("content-length", "512")]);
        assert!(matches!(
            descriptor_from_headers(&missing, None),
            Err(RemoteError::InvalidDigest { .. })
        ));

        let bad = headers(&[("docker-content-digest", "sha256:nothex")]);
        assert!(matches!(
            descriptor_from_headers(&bad, None),
            Err(RemoteError::InvalidDigest { .. })
        ));
    }

    #[test]
    fn test_content_type_fallback() {
        let digest = format!("sha256:{}", "4".repeat(64));
        let map = headers(&[("docker-content-digest", digest.as_str())]);
        let index = MediaType::new(MediaType::OCI_INDEX);
        assert_eq!(descriptor_from_headers(&map, Some(&index)).unwrap().media_type, index);
        assert_eq!(descriptor_from_headers(&map, None).unwrap().size, 0);
    }

    #[test]
    fn test_manifest_request_accepts_all_manifest_types() {
        let service = Service::new(crate::Scheme::Https, "registry.example.com", "library/app")
            .with_locator("v1");
        let request = manifest_request(&service, Method::HEAD).unwrap();
        let accept = request.headers().get(ACCEPT).unwrap().to_str().unwrap();
        assert!(accept.contains(MediaType::OCI_INDEX));
        assert!(accept.contains(MediaType::DOCKER_MANIFEST));
    }
}
