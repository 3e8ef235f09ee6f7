//! Referrers discovery through the ORAS artifacts extension.
//!
//! `GET /oras/artifacts/v1/<name>/manifests/<digest>/referrers?artifactType=<type>`
//!
//! A registry without the extension answers 404, which reaches the caller
//! as [`RemoteError::UnexpectedStatus`](crate::RemoteError::UnexpectedStatus);
//! check [`RemoteError::is_not_found`](crate::RemoteError::is_not_found).

use crate::error::{RemoteError, Result};
use crate::oci::Artifacts;
use crate::service::{ExtensionTarget, RequestBody, Service};
use crate::transport::Transport;
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::Method;
use tracing::debug;
use url::Url;

/// Builds the referrers URL for `target`, filtered by `artifact_type` when
/// one is given.
///
/// # Errors
///
/// Returns [`RemoteError::InvalidUrl`] if the target has neither a digest nor
/// a locator, or the pieces do not form a URL.
pub fn referrers_url(target: &ExtensionTarget<'_>, artifact_type: Option<&str>) -> Result<Url> {
    let subject = target
        .digest
        .map(crate::digest::Digest::as_str)
        .or(target.locator)
        .ok_or_else(|| RemoteError::InvalidUrl {
            url: format!(
                "{}://{}/oras/artifacts/v1/{}/manifests/<missing digest>/referrers",
                target.scheme.as_str(),
                target.host,
                target.namespace
            ),
        })?;

    let mut url = Url::parse(&format!(
        "{}://{}/oras/artifacts/v1/{}/manifests/{subject}/referrers",
        target.scheme.as_str(),
        target.host,
        target.namespace
    ))?;
    if let Some(artifact_type) = artifact_type.filter(|t| !t.is_empty()) {
        url.query_pairs_mut().append_pair("artifactType", artifact_type);
    }
    Ok(url)
}

/// Lists the artifacts that refer to the service's digest.
pub(crate) async fn discover(
    transport: &Transport,
    service: &Service,
    artifact_type: Option<&str>,
) -> Result<Artifacts> {
    let request = service
        .extension(Method::GET, RequestBody::Empty, &|target: &ExtensionTarget<'_>| {
            referrers_url(target, artifact_type)
        })?
        .header(ACCEPT, HeaderValue::from_static("application/json"));

    debug!(url = %request.url(), "Discovering referrers");
    let response = transport.send(&request).await?;
    let artifacts: Artifacts = serde_json::from_slice(&response.bytes().await?)?;
    debug!(count = artifacts.references.len(), "Discovered referrers");
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Scheme;
    use crate::digest::Digest;

    #[test]
    fn test_referrers_url() {
        let digest = Digest::parse(&format!("sha256:{}", "c".repeat(64))).unwrap();
        let target = ExtensionTarget {
            scheme: Scheme::Https,
            host: "registry.example.com",
            namespace: "library/app",
            locator: Some("v1"),
            media_type: None,
            digest: Some(&digest),
        };

        let url = referrers_url(&target, Some("sbom/example")).unwrap();
        assert_eq!(
            url.as_str(),
            format!(
                "https://registry.example.com/oras/artifacts/v1/library/app/manifests/{digest}/referrers?artifactType=sbom%2Fexample"
            )
        );

        let unfiltered = referrers_url(&target, None).unwrap();
        assert!(unfiltered.query().is_none());
    }

    #[test]
    fn test_referrers_url_falls_back_to_locator() {
        let target = ExtensionTarget {
            scheme: Scheme::Http,
            host: "localhost:5000",
            namespace: "oras",
            locator: Some("v1"),
            media_type: None,
            digest: None,
        };
        let url = referrers_url(&target, Some("")).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:5000/oras/artifacts/v1/oras/manifests/v1/referrers"
        );

        let bare = ExtensionTarget { locator: None, ..target };
        assert!(referrers_url(&bare, None).is_err());
    }
}
