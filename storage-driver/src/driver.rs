use std::{fmt, ops::Deref, sync::Arc};

use bytes::Bytes;
use tokio::io;

use crate::digest::Digest;
use crate::error::StorageError;
use crate::list::ListOptions;

/// A reader stream for uploaded content.
pub type Reader<'r> = dyn io::AsyncBufRead + Unpin + Send + 'r;

/// A lazy, single-pass reader over stored blob content.
pub type BlobReader = Box<dyn io::AsyncRead + Unpin + Send + 'static>;

/// A manifest as stored: its exact bytes and the digest they hash to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// The stored manifest bytes.
    pub content: Bytes,

    /// Digest of `content`.
    pub digest: Digest,
}

/// A registry storage driver: the contract every storage backend provides.
///
/// Lookups of absent blobs, manifests, tags and links return `Ok(None)` or
/// `Ok(false)`; `Err` is reserved for malformed arguments, digest mismatches
/// and failures of the medium. Drivers never log-and-swallow an error.
///
/// `put_manifest` with a tag reference performs two independently atomic
/// steps (store content, then replace the tag pointer). A failure between them
/// leaves the manifest stored while the tag still names its previous target.
#[async_trait::async_trait]
pub trait Driver: fmt::Debug {
    /// The name of the driver.
    fn name(&self) -> &'static str;

    /// Whether a blob with this digest is stored.
    async fn has_blob(&self, digest: &Digest) -> Result<bool, StorageError>;

    /// Open a stored blob for reading.
    async fn get_blob(&self, digest: &Digest) -> Result<Option<BlobReader>, StorageError>;

    /// Size of a stored blob in bytes, without reading it.
    async fn blob_size(&self, digest: &Digest) -> Result<Option<u64>, StorageError>;

    /// Store a blob under the digest the caller expects it to have.
    ///
    /// The content is verified against `digest` before it becomes visible;
    /// a mismatch fails with `DigestMismatch` and persists nothing. Storing a
    /// digest that is already present succeeds.
    async fn put_blob(&self, digest: &Digest, reader: &mut Reader<'_>) -> Result<(), StorageError>;

    /// Remove a blob's physical storage. Links to it are left in place.
    async fn delete_blob(&self, digest: &Digest) -> Result<bool, StorageError>;

    /// Record that `repository` uses the blob `digest`. Idempotent.
    async fn link_blob(&self, repository: &str, digest: &Digest) -> Result<(), StorageError>;

    /// Remove the link between `repository` and `digest`. Idempotent.
    async fn unlink_blob(&self, repository: &str, digest: &Digest) -> Result<(), StorageError>;

    /// Whether `repository` links the blob `digest`.
    async fn has_layer_link(&self, repository: &str, digest: &Digest)
        -> Result<bool, StorageError>;

    /// Resolve a tag or digest reference to a stored manifest.
    async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<Option<Manifest>, StorageError>;

    /// Store manifest bytes under `digest`, and point `reference` at it when
    /// `reference` is a tag.
    async fn put_manifest(
        &self,
        repository: &str,
        reference: &str,
        content: Bytes,
        digest: &Digest,
    ) -> Result<(), StorageError>;

    /// Delete a tag pointer (tag reference) or manifest content (digest reference).
    async fn delete_manifest(&self, repository: &str, reference: &str)
        -> Result<bool, StorageError>;

    /// Tag names in `repository`, ascending by byte value.
    async fn list_tags(
        &self,
        repository: &str,
        options: &ListOptions,
    ) -> Result<Vec<String>, StorageError>;

    /// Repository names, ascending by byte value.
    async fn list_repositories(&self, options: &ListOptions) -> Result<Vec<String>, StorageError>;

    /// Check that the medium is present and writable.
    async fn probe(&self) -> Result<(), StorageError>;
}

#[async_trait::async_trait]
impl<D> Driver for Arc<D>
where
    D: ?Sized + Driver + Sync + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.deref().name()
    }

    async fn has_blob(&self, digest: &Digest) -> Result<bool, StorageError> {
        self.deref().has_blob(digest).await
    }

    async fn get_blob(&self, digest: &Digest) -> Result<Option<BlobReader>, StorageError> {
        self.deref().get_blob(digest).await
    }

    async fn blob_size(&self, digest: &Digest) -> Result<Option<u64>, StorageError> {
        self.deref().blob_size(digest).await
    }

    async fn put_blob(&self, digest: &Digest, reader: &mut Reader<'_>) -> Result<(), StorageError> {
        self.deref().put_blob(digest, reader).await
    }

    async fn delete_blob(&self, digest: &Digest) -> Result<bool, StorageError> {
        self.deref().delete_blob(digest).await
    }

    async fn link_blob(&self, repository: &str, digest: &Digest) -> Result<(), StorageError> {
        self.deref().link_blob(repository, digest).await
    }

    async fn unlink_blob(&self, repository: &str, digest: &Digest) -> Result<(), StorageError> {
        self.deref().unlink_blob(repository, digest).await
    }

    async fn has_layer_link(
        &self,
        repository: &str,
        digest: &Digest,
    ) -> Result<bool, StorageError> {
        self.deref().has_layer_link(repository, digest).await
    }

    async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<Option<Manifest>, StorageError> {
        self.deref().get_manifest(repository, reference).await
    }

    async fn put_manifest(
        &self,
        repository: &str,
        reference: &str,
        content: Bytes,
        digest: &Digest,
    ) -> Result<(), StorageError> {
        self.deref()
            .put_manifest(repository, reference, content, digest)
            .await
    }

    async fn delete_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<bool, StorageError> {
        self.deref().delete_manifest(repository, reference).await
    }

    async fn list_tags(
        &self,
        repository: &str,
        options: &ListOptions,
    ) -> Result<Vec<String>, StorageError> {
        self.deref().list_tags(repository, options).await
    }

    async fn list_repositories(&self, options: &ListOptions) -> Result<Vec<String>, StorageError> {
        self.deref().list_repositories(options).await
    }

    async fn probe(&self) -> Result<(), StorageError> {
        self.deref().probe().await
    }
}
