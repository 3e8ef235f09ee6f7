//! The content-store boundary used by pull and push.
//!
//! The store itself lives outside this crate; it only has to hand out
//! readers and writers per descriptor and keep an OCI index.

use crate::error::Result;
use crate::oci::{Descriptor, Manifest};
use crate::reference::Reference;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Annotation naming the reference an index entry was tagged with.
pub const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

/// A content-addressable store.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Returns true if the store already holds `descriptor`.
    async fn exists(&self, descriptor: &Descriptor) -> Result<bool>;

    /// Opens stored content for reading.
    async fn open(&self, descriptor: &Descriptor) -> Result<Box<dyn AsyncRead + Send + Unpin>>;

    /// Opens a writer for new content. The content is stored once the writer
    /// is shut down.
    async fn create(&self, descriptor: &Descriptor) -> Result<Box<dyn AsyncWrite + Send + Unpin>>;

    /// Records `reference` as a name for `descriptor`.
    async fn tag(&self, reference: &Reference, descriptor: &Descriptor) -> Result<()>;

    /// Loads the store's index.
    async fn load_index(&self) -> Result<Manifest>;

    /// Persists the store's index.
    async fn persist_index(&self, index: &Manifest) -> Result<()>;
}

/// Adds `descriptor` to `index` under `reference`, replacing any entry that
/// carried the same name.
pub fn index_entry(index: &mut Manifest, reference: &Reference, descriptor: &Descriptor) {
    let name = reference.to_string();
    index.manifests.retain(|entry| {
        entry
            .annotations
            .as_ref()
            .and_then(|a| a.get(REF_NAME_ANNOTATION))
            .map_or(true, |existing| existing != &name)
    });
    index
        .manifests
        .push(descriptor.clone().with_annotation(REF_NAME_ANNOTATION, name));
}
