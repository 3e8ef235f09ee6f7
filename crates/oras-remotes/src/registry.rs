//! The registry handle callers work with.

use crate::access::{AccessProvider, AccessStatus};
use crate::artifacts;
use crate::blobs::{self, BlobReader};
use crate::cache::ResolveCache;
use crate::challenge::AuthChallenge;
use crate::config::RegistryConfig;
use crate::digest::Digest;
use crate::error::{RemoteError, Result};
use crate::manifests;
use crate::oauth::Access;
use crate::oci::{Artifacts, Descriptor, Manifest, MediaType, TagList};
use crate::reference::{Locator, Reference};
use crate::service::{RequestBody, Service};
use crate::store::{self, ContentStore};
use crate::transport::{build_http_client, build_redirect_client, Transport};
use crate::writer::{ManifestWriter, StatusTracker, UploadStatus};
use bytes::Bytes;
use reqwest::Method;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Buffer size used when streaming stored content into a push.
const COPY_BUFFER: usize = 32 * 1024;

/// A client for one repository on one registry.
///
/// Cloning is cheap; clones share the HTTP client, caches and upload
/// statuses.
///
/// # Examples
///
/// ```no_run
/// use oras_remotes::{AccessProvider, Registry, RegistryConfig};
///
/// # async fn example() -> oras_remotes::Result<()> {
/// let config = RegistryConfig::new("registry.example.com", "library/app");
/// let registry = Registry::new(config, AccessProvider::anonymous())?;
///
/// let (name, descriptor) = registry.resolve("registry.example.com/library/app:v1").await?;
/// println!("{name} -> {}", descriptor.digest);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug)]
struct RegistryInner {
    config: RegistryConfig,
    transport: Arc<Transport>,
    cache: ResolveCache,
    tracker: StatusTracker,
}

impl Registry {
    /// Creates a registry handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: RegistryConfig, provider: impl Into<AccessProvider>) -> Result<Self> {
        let http = build_http_client(&config)?;
        let redirect_http = build_redirect_client(&config)?;
        Ok(Self {
            inner: Arc::new(RegistryInner {
                config,
                transport: Arc::new(Transport::new(http, redirect_http, provider.into())),
                cache: ResolveCache::new(),
                tracker: StatusTracker::new(),
            }),
        })
    }

    /// Bootstraps a registry from a raw `WWW-Authenticate` challenge.
    ///
    /// Providers are tried in order; the first that grants access wins. The
    /// registry is built for the challenge's service and the namespace named
    /// by its `repository:<ns>:` scope.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidChallenge`] for an unparseable header,
    /// or the last provider's error if none grants access.
    pub async fn from_challenge(challenge: &str, providers: Vec<AccessProvider>) -> Result<Self> {
        let challenge = AuthChallenge::parse(challenge)?;
        let config = RegistryConfig::new(&challenge.service, &challenge.namespace);
        let http = build_http_client(&config)?;

        let mut last_error = RemoteError::AccessDenied {
            realm: challenge.realm.clone(),
            service: challenge.service.clone(),
            scope: challenge.scope.clone(),
            reason: "no access provider configured".to_string(),
        };

        for provider in providers {
            match provider.get_access(&challenge, &http).await {
                Ok(access) => {
                    let registry = Self::new(config, provider)?;
                    registry.authorize(&access).await?;
                    return Ok(registry);
                }
                Err(e) => {
                    debug!(error = %e, "Access provider declined challenge");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    /// Registry host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.inner.config.host
    }

    /// Repository namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.inner.config.namespace
    }

    /// Configuration this handle was built with.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// The access provider consulted on challenges.
    #[must_use]
    pub fn provider(&self) -> &AccessProvider {
        self.inner.transport.provider()
    }

    /// Resolved descriptors and manifests.
    #[must_use]
    pub fn cache(&self) -> &ResolveCache {
        &self.inner.cache
    }

    /// Upload status of a push started through this handle.
    #[must_use]
    pub fn status(&self, reference: &str) -> Option<UploadStatus> {
        self.inner.tracker.status(reference)
    }

    /// Forgets the upload status of `reference` and returns it.
    pub fn remove_status(&self, reference: &str) -> Option<UploadStatus> {
        self.inner.tracker.remove(reference)
    }

    /// Forgets every committed upload status. Returns how many were removed.
    pub fn prune_committed(&self) -> usize {
        self.inner.tracker.prune_committed()
    }

    /// Addressing handle for this repository.
    #[must_use]
    pub fn service(&self) -> Service {
        Service::new(self.inner.config.scheme, self.host(), self.namespace())
    }

    /// A reference into this repository.
    #[must_use]
    pub fn reference(&self, locator: Locator) -> Reference {
        Reference::from_parts(self.host(), self.namespace(), locator)
    }

    /// Checks that `reference` belongs to this registry and returns the
    /// addressing handle for it. Never touches the network.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::HostMismatch`] or
    /// [`RemoteError::NamespaceMismatch`].
    pub fn locate(
        &self,
        reference: &Reference,
        media_type: Option<MediaType>,
        digest: Option<Digest>,
    ) -> Result<Service> {
        if reference.host() != self.host() {
            return Err(RemoteError::HostMismatch {
                expected: self.host().to_string(),
                actual: reference.host().to_string(),
            });
        }
        if reference.namespace() != self.namespace() {
            return Err(RemoteError::NamespaceMismatch {
                expected: self.namespace().to_string(),
                actual: reference.namespace().to_string(),
            });
        }

        let mut service = self.service().with_locator(reference.locator().as_str());
        if let Some(digest) = digest.or_else(|| reference.locator().digest().cloned()) {
            service = service.with_digest(digest);
        }
        if let Some(media_type) = media_type {
            service = service.with_media_type(media_type);
        }
        Ok(service)
    }

    /// Swaps in an authorized client using the token of `access`. Requests
    /// keep going out on this registry's HTTP client, whichever client
    /// `access` was built with.
    ///
    /// # Errors
    ///
    /// Returns the token source's error.
    pub async fn authorize(&self, access: &Access) -> Result<()> {
        let authorization = access.authorization().await?;
        self.inner.transport.authorize(authorization);
        info!(host = %self.host(), namespace = %self.namespace(), "Registry access renewed");
        Ok(())
    }

    /// Standing credential of `username` at this host.
    ///
    /// # Errors
    ///
    /// See [`AccessProvider::check_access`].
    pub async fn check_access(&self, username: &str) -> Result<AccessStatus> {
        self.provider().check_access(self.host(), username).await
    }

    /// Revokes the standing credential of `username` at this host.
    ///
    /// # Errors
    ///
    /// See [`AccessProvider::revoke_access`].
    pub async fn revoke_access(&self, username: &str) -> Result<AccessStatus> {
        self.provider().revoke_access(self.host(), username).await
    }

    /// `GET /v2/`.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry does not answer 200 after recovery.
    pub async fn ping(&self) -> Result<()> {
        let service = self.service();
        let request = service.request(Method::GET, service.base()?, RequestBody::Empty);
        self.inner.transport.send(&request).await?;
        Ok(())
    }

    /// Resolves a reference to its descriptor with a HEAD request.
    ///
    /// Digest references are answered from the cache when possible; tags
    /// always go to the registry.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::MalformedReference`],
    /// [`RemoteError::HostMismatch`] or [`RemoteError::NamespaceMismatch`]
    /// before any request, then any transport error.
    pub async fn resolve(&self, reference: &str) -> Result<(String, Descriptor)> {
        let reference = Reference::parse(reference)?;
        let service = self.locate(&reference, None, None)?;

        if reference.locator().digest().is_some() {
            if let Some(descriptor) = self.inner.cache.descriptor(&reference) {
                debug!(reference = %reference, "Resolved from cache");
                return Ok((reference.to_string(), descriptor));
            }
        }

        let descriptor = manifests::get_descriptor(&self.inner.transport, &service).await?;
        self.inner.cache.put_descriptor(&reference, &descriptor);
        Ok((reference.to_string(), descriptor))
    }

    /// Fetches and decodes the manifest behind a reference.
    ///
    /// # Errors
    ///
    /// Same as [`Registry::resolve`], plus JSON decoding errors.
    pub async fn manifest(&self, reference: &str) -> Result<(Descriptor, Manifest)> {
        let reference = Reference::parse(reference)?;
        let service = self.locate(&reference, None, None)?;

        if reference.locator().digest().is_some() {
            let cached = self
                .inner
                .cache
                .descriptor(&reference)
                .zip(self.inner.cache.manifest(&reference));
            if let Some(found) = cached {
                return Ok(found);
            }
        }

        let (descriptor, manifest) =
            manifests::get_descriptor_with_manifest(&self.inner.transport, &service).await?;
        self.inner.cache.put_manifest(&reference, &descriptor, &manifest);
        Ok((descriptor, manifest))
    }

    /// Fetches only the decoded manifest behind a reference.
    ///
    /// # Errors
    ///
    /// See [`Registry::manifest`].
    pub async fn get_manifest(&self, reference: &str) -> Result<Manifest> {
        self.manifest(reference).await.map(|(_, manifest)| manifest)
    }

    /// Opens a forward-only stream over the content of `descriptor`.
    /// Manifest media types are read from the manifests endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::SizeMismatch`] if the registry advertises a
    /// different size, or any transport error.
    pub async fn fetch(&self, descriptor: &Descriptor) -> Result<BlobReader> {
        let service = self
            .service()
            .with_digest(descriptor.digest.clone())
            .with_media_type(descriptor.media_type.clone());
        blobs::fetch(&self.inner.transport, &service, descriptor).await
    }

    /// Returns true if the registry holds the blob.
    ///
    /// # Errors
    ///
    /// Returns any transport error other than a 404.
    pub async fn blob_exists(&self, digest: &Digest) -> Result<bool> {
        let service = self.service().with_digest(digest.clone());
        blobs::blob_exists(&self.inner.transport, &service).await
    }

    /// Lists tags, optionally paginated.
    ///
    /// # Errors
    ///
    /// Returns any transport or decoding error.
    pub async fn list_tags(&self, n: Option<usize>, last: Option<&str>) -> Result<TagList> {
        let service = self.service();
        let url = match n {
            Some(n) => service.tags_filter(n, last)?,
            None => service.tags()?,
        };
        let request = service.request(Method::GET, url, RequestBody::Empty);
        let response = self.inner.transport.send(&request).await?;
        Ok(serde_json::from_slice(&response.bytes().await?)?)
    }

    /// Lists artifacts referring to `descriptor`, filtered by type.
    ///
    /// # Errors
    ///
    /// A registry without the referrers extension yields an error for which
    /// [`RemoteError::is_not_found`] is true.
    pub async fn discover(
        &self,
        descriptor: &Descriptor,
        artifact_type: Option<&str>,
    ) -> Result<Artifacts> {
        let service = self
            .service()
            .with_digest(descriptor.digest.clone())
            .with_media_type(descriptor.media_type.clone());
        artifacts::discover(&self.inner.transport, &service, artifact_type).await
    }

    /// Opens a streaming push of a manifest, addressed by its digest.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::NotImplemented`] for non-manifest content and
    /// [`RemoteError::AlreadyExists`] if the registry already holds it.
    pub async fn push(&self, descriptor: &Descriptor) -> Result<ManifestWriter> {
        let reference = self.reference(Locator::Digest(descriptor.digest.clone()));
        self.open_writer(reference, descriptor).await
    }

    /// Opens a streaming push of a manifest under a tag reference.
    ///
    /// # Errors
    ///
    /// As [`Registry::push`], plus reference validation errors.
    pub async fn push_tagged(
        &self,
        reference: &str,
        descriptor: &Descriptor,
    ) -> Result<ManifestWriter> {
        let reference = Reference::parse(reference)?;
        self.open_writer(reference, descriptor).await
    }

    async fn open_writer(
        &self,
        reference: Reference,
        descriptor: &Descriptor,
    ) -> Result<ManifestWriter> {
        if !descriptor.media_type.is_manifest() {
            return Err(RemoteError::NotImplemented {
                operation: format!("push of {}", descriptor.media_type),
            });
        }

        let service = self.locate(
            &reference,
            Some(descriptor.media_type.clone()),
            Some(descriptor.digest.clone()),
        )?;

        if manifests::check_manifest(&self.inner.transport, &service, &descriptor.digest).await? {
            let reference = reference.to_string();
            self.inner.tracker.record_existing(&reference, descriptor);
            return Err(RemoteError::AlreadyExists { reference });
        }

        ManifestWriter::start(
            Arc::clone(&self.inner.transport),
            &service,
            reference.to_string(),
            descriptor.clone(),
            self.inner.tracker.clone(),
        )
    }

    /// Copies a manifest, its config and its layers into `store`, then tags
    /// and indexes it. Content the store already holds is skipped.
    ///
    /// # Errors
    ///
    /// Returns any fetch or store error.
    pub async fn pull_into(&self, reference: &str, store: &dyn ContentStore) -> Result<Descriptor> {
        let (descriptor, manifest) = self.manifest(reference).await?;
        let reference = Reference::parse(reference)?;

        for content in manifest.content() {
            if store.exists(content).await? {
                debug!(digest = %content.digest, "Already in store");
                continue;
            }
            copy_into(self.fetch(content).await?, store).await?;
        }

        if !store.exists(&descriptor).await? {
            copy_into(self.fetch(&descriptor).await?, store).await?;
        }

        store.tag(&reference, &descriptor).await?;
        let mut index = store.load_index().await?;
        store::index_entry(&mut index, &reference, &descriptor);
        store.persist_index(&index).await?;

        info!(reference = %reference, digest = %descriptor.digest, "Pulled into store");
        Ok(descriptor)
    }

    /// Streams a stored manifest to the registry by digest and commits it.
    /// A manifest the registry already holds counts as pushed.
    ///
    /// # Errors
    ///
    /// Returns any store, transport or commit verification error.
    pub async fn push_from(&self, store: &dyn ContentStore, descriptor: &Descriptor) -> Result<()> {
        let mut writer = match self.push(descriptor).await {
            Ok(writer) => writer,
            Err(RemoteError::AlreadyExists { reference }) => {
                info!(reference = %reference, "Manifest already present");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut reader = store.open(descriptor).await?;
        let mut buf = vec![0u8; COPY_BUFFER];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write(Bytes::copy_from_slice(&buf[..n])).await?;
        }

        writer
            .commit(descriptor.size, &descriptor.digest, std::future::pending::<()>())
            .await
    }
}

async fn copy_into(mut reader: BlobReader, store: &dyn ContentStore) -> Result<()> {
    let descriptor = reader.descriptor().clone();
    let mut writer = store.create(&descriptor).await?;
    while let Some(chunk) = reader.chunk().await? {
        writer.write_all(&chunk).await?;
    }
    if let Err(e) = writer.shutdown().await {
        warn!(digest = %descriptor.digest, error = %e, "Store writer failed to finish");
        return Err(e.into());
    }
    Ok(())
}
