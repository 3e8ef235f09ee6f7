//! Blob verbs and the fetch stream.

use crate::error::{RemoteError, Result};
use crate::oci::Descriptor;
use crate::service::{RequestBody, Service};
use crate::transport::Transport;
use bytes::{Bytes, BytesMut};
use futures::Stream;
use reqwest::header::{ACCEPT, CONTENT_LENGTH};
use reqwest::{Method, StatusCode};
use tracing::debug;

/// A single forward pass over a fetched body.
///
/// It cannot be restarted; fetch again to re-read. When the descriptor
/// carries a size, reaching the end checks it.
#[derive(Debug)]
pub struct BlobReader {
    descriptor: Descriptor,
    response: reqwest::Response,
    read: u64,
}

impl BlobReader {
    pub(crate) const fn new(descriptor: Descriptor, response: reqwest::Response) -> Self {
        Self {
            descriptor,
            response,
            read: 0,
        }
    }

    /// The descriptor being read.
    #[must_use]
    pub const fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Bytes read so far.
    #[must_use]
    pub const fn bytes_read(&self) -> u64 {
        self.read
    }

    /// Reads the next chunk, or `None` at the end of the body.
    ///
    /// # Errors
    ///
    /// Returns an HTTP error if the body read fails, or
    /// [`RemoteError::SizeMismatch`] at the end if the byte count disagrees
    /// with the descriptor.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        match self.response.chunk().await? {
            Some(chunk) => {
                self.read += chunk.len() as u64;
                Ok(Some(chunk))
            }
            None => {
                if self.descriptor.size > 0 && self.read != self.descriptor.size {
                    return Err(RemoteError::SizeMismatch {
                        expected: self.descriptor.size,
                        actual: self.read,
                    });
                }
                Ok(None)
            }
        }
    }

    /// Reads the whole body into memory.
    ///
    /// # Errors
    ///
    /// See [`BlobReader::chunk`].
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// Turns the reader into a stream of chunks.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes>> + Send {
        futures::stream::try_unfold(self, |mut reader| async move {
            Ok(reader.chunk().await?.map(|chunk| (chunk, reader)))
        })
    }
}

/// HEAD then GET. The HEAD surfaces a 404 (or a size disagreement) before
/// any body is read.
pub(crate) async fn fetch(
    transport: &Transport,
    service: &Service,
    descriptor: &Descriptor,
) -> Result<BlobReader> {
    let url = if descriptor.media_type.is_manifest() {
        service.manifests()?
    } else {
        service.blobs()?
    };

    let head = service.request(Method::HEAD, url.clone(), RequestBody::Empty);
    let response = transport.send(&head).await?;

    let advertised = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if let Some(advertised) = advertised {
        if descriptor.size > 0 && advertised != descriptor.size {
            return Err(RemoteError::SizeMismatch {
                expected: descriptor.size,
                actual: advertised,
            });
        }
    }

    debug!(digest = %descriptor.digest, url = %url, "Fetching content");
    let get = service.request(Method::GET, url, RequestBody::Empty);
    let response = transport.send(&get).await?;
    Ok(BlobReader::new(descriptor.clone(), response))
}

/// HEAD the blob; a 404 means absent.
pub(crate) async fn blob_exists(transport: &Transport, service: &Service) -> Result<bool> {
    let request = service
        .request(Method::HEAD, service.blobs()?, RequestBody::Empty)
        .header(ACCEPT, reqwest::header::HeaderValue::from_static("*/*"));
    let response = transport
        .send_expecting(&request, &[StatusCode::OK, StatusCode::NOT_FOUND])
        .await?;
    Ok(response.status() == StatusCode::OK)
}
