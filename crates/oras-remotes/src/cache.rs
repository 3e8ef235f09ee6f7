//! In-memory memo of resolved descriptors and fetched manifests.
//!
//! Entries are populated on resolve and never treated as authoritative: a
//! miss is always answered by the network.

use crate::oci::{Descriptor, Manifest};
use crate::reference::{Locator, Reference};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Descriptor and manifest caches keyed by fully-qualified reference.
#[derive(Debug, Default)]
pub struct ResolveCache {
    descriptors: RwLock<HashMap<Reference, Descriptor>>,
    manifests: RwLock<HashMap<Reference, Manifest>>,
}

impl ResolveCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached descriptor for `reference`.
    #[must_use]
    pub fn descriptor(&self, reference: &Reference) -> Option<Descriptor> {
        self.descriptors.read().get(reference).cloned()
    }

    /// Returns the cached manifest for `reference`.
    #[must_use]
    pub fn manifest(&self, reference: &Reference) -> Option<Manifest> {
        self.manifests.read().get(reference).cloned()
    }

    /// Records a descriptor under `reference` and under its digest form.
    pub fn put_descriptor(&self, reference: &Reference, descriptor: &Descriptor) {
        let by_digest = Self::digest_form(reference, descriptor);
        let mut descriptors = self.descriptors.write();
        descriptors.insert(reference.clone(), descriptor.clone());
        descriptors.insert(by_digest, descriptor.clone());
    }

    /// Records a manifest (and its descriptor) under `reference` and under
    /// its digest form.
    pub fn put_manifest(
        &self,
        reference: &Reference,
        descriptor: &Descriptor,
        manifest: &Manifest,
    ) {
        self.put_descriptor(reference, descriptor);
        let by_digest = Self::digest_form(reference, descriptor);
        let mut manifests = self.manifests.write();
        manifests.insert(reference.clone(), manifest.clone());
        manifests.insert(by_digest, manifest.clone());
    }

    /// Drops everything known about `reference`.
    pub fn invalidate(&self, reference: &Reference) {
        self.descriptors.write().remove(reference);
        self.manifests.write().remove(reference);
    }

    /// Drops all entries.
    pub fn clear(&self) {
        self.descriptors.write().clear();
        self.manifests.write().clear();
    }

    /// Number of cached descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.read().len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.read().is_empty()
    }

    fn digest_form(reference: &Reference, descriptor: &Descriptor) -> Reference {
        Reference::from_parts(
            reference.host(),
            reference.namespace(),
            Locator::Digest(descriptor.digest.clone()),
        )
    }
}
