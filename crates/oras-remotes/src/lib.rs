//! # ORAS Remotes
//!
//! OCI Distribution registry client with challenge-driven access.
//!
//! This crate resolves references to descriptors, fetches blobs and
//! manifests, discovers referrer artifacts and streams manifest pushes to
//! OCI-compatible registries (Docker Registry, Harbor, ACR, GHCR, etc.).
//!
//! ## Features
//!
//! - **Reactive authentication**: a 401 challenge is resolved through a
//!   pluggable [`AccessProvider`] and the request retried once
//! - **Redirect safety**: credentials never follow a redirect to another host
//! - **Streaming push**: manifest bytes are piped into a background PUT and
//!   verified against `Docker-Content-Digest` on commit
//! - **Referrers discovery**: the ORAS artifacts extension
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use oras_remotes::{AccessProvider, OAuth2Provider, Registry, RegistryConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RegistryConfig::new("registry.example.com", "library/app");
//!     let registry = Registry::new(config, OAuth2Provider::new("user", "password"))?;
//!
//!     let (_, descriptor) = registry.resolve("registry.example.com/library/app:v1").await?;
//!     let manifest = registry.fetch(&descriptor).await?.bytes().await?;
//!     println!("{} bytes", manifest.len());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Registry                            │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │  Reference  │  │   Service   │  │   ResolveCache      │  │
//! │  │  (parse)    │  │   (URLs)    │  │   (memo)            │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! │  ┌──────────────────────────────┐  ┌─────────────────────┐  │
//! │  │  Transport                   │  │  ManifestWriter     │  │
//! │  │  (challenge + redirect)      │◄─┤  (pipe + task)      │  │
//! │  └──────────────┬───────────────┘  └─────────────────────┘  │
//! └─────────────────┼───────────────────────────────────────────┘
//!                   │ 401
//!                   ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  AccessProvider: CredentialStore | Helper | OAuth2          │
//! │        └──► TokenSource (basic → bearer exchange)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod access;
mod artifacts;
mod blobs;
mod cache;
mod challenge;
mod config;
mod digest;
mod error;
mod manifests;
mod oauth;
mod oci;
mod reference;
mod registry;
mod service;
mod store;
mod transport;
mod writer;

#[cfg(test)]
mod proptest_tests;

pub use access::{AccessProvider, AccessStatus, CredentialStore, HelperProvider, OAuth2Provider};
pub use artifacts::referrers_url;
pub use blobs::BlobReader;
pub use cache::ResolveCache;
pub use challenge::AuthChallenge;
pub use config::{AccessConfig, RegistryConfig, Scheme, TlsConfig};
pub use digest::Digest;
pub use error::{RemoteError, Result};
pub use manifests::{descriptor_from_headers, DOCKER_CONTENT_DIGEST};
pub use oauth::{
    Access, BasicAuthTokenSource, ReuseTokenSource, StaticTokenSource, Token, TokenSource,
};
pub use oci::{Artifacts, Descriptor, Manifest, MediaType, TagList};
pub use reference::{validate_reference, Locator, Reference};
pub use registry::Registry;
pub use service::{ExtensionApi, ExtensionTarget, RegistryRequest, RequestBody, Service};
pub use store::{index_entry, ContentStore, REF_NAME_ANNOTATION};
pub use transport::HttpClient;
pub use writer::{ManifestWriter, StatusTracker, UploadStatus};
