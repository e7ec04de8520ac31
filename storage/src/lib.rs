//! # Storage backends
//!
//! Configuration and unification for the registry storage backends.

use std::sync::Arc;

use bytes::Bytes;
#[cfg(feature = "local")]
use camino::Utf8PathBuf;
use serde::Deserialize;

#[cfg(feature = "local")]
pub(crate) mod local;

pub(crate) mod memory;
#[cfg(feature = "tmp")]
pub(crate) mod temp;

#[cfg(feature = "local")]
#[doc(inline)]
pub use local::LocalDriver;

#[doc(inline)]
pub use memory::MemoryStorage;

#[cfg(feature = "tmp")]
#[doc(inline)]
pub use temp::TempDriver;

#[doc(inline)]
pub use storage_driver::{
    validate_repository, validate_tag, BlobReader, Digest, DigestAlgorithm, Driver, ListOptions,
    Manifest, Reference, StorageError, StorageErrorKind,
};

/// Which backend to build, as read from configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "driver")]
pub enum StorageConfig {
    /// Keep everything in memory.
    Memory,

    /// The filesystem engine rooted at `path`.
    #[cfg(feature = "local")]
    Local {
        /// Storage root directory.
        path: Utf8PathBuf,
    },

    /// The filesystem engine in a throwaway temporary directory.
    #[cfg(feature = "tmp")]
    Temp,
}

impl StorageConfig {
    /// Construct the configured backend.
    ///
    /// The local root directory is created if it does not exist yet.
    #[tracing::instrument]
    pub async fn build(self) -> Result<Storage, StorageError> {
        let client: Storage = match self {
            StorageConfig::Memory => MemoryStorage::new().into(),
            #[cfg(feature = "local")]
            StorageConfig::Local { path } => {
                tokio::fs::create_dir_all(&path)
                    .await
                    .map_err(|err| StorageError::from_io("local", err).at(path.as_str()))?;
                LocalDriver::new(path).into()
            }
            #[cfg(feature = "tmp")]
            StorageConfig::Temp => TempDriver::new()
                .map_err(|err| StorageError::from_io("temp", err))?
                .into(),
        };
        Ok(client)
    }
}

use tokio::io;

pub(crate) type ArcDriver = Arc<dyn Driver + Send + Sync>;

/// A cheaply cloneable handle to a storage backend.
///
/// Every call is recorded in a tracing span carrying the driver name.
#[derive(Debug, Clone)]
pub struct Storage {
    driver: ArcDriver,
}

impl<D> From<D> for Storage
where
    D: Driver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        Storage::new(value)
    }
}

impl Storage {
    /// Wrap a driver.
    pub fn new<D: Driver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// The name of the underlying driver.
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// Whether a blob is stored.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn has_blob(&self, digest: &Digest) -> Result<bool, StorageError> {
        self.driver.has_blob(digest).await
    }

    /// Open a blob for reading.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn get_blob(&self, digest: &Digest) -> Result<Option<BlobReader>, StorageError> {
        self.driver.get_blob(digest).await
    }

    /// Size of a blob in bytes.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn blob_size(&self, digest: &Digest) -> Result<Option<u64>, StorageError> {
        self.driver.blob_size(digest).await
    }

    /// Store a blob, verifying it hashes to `digest`.
    #[tracing::instrument(skip(self, reader), fields(driver=self.driver.name()))]
    pub async fn put_blob<'d, R>(&'d self, digest: &Digest, reader: &mut R) -> Result<(), StorageError>
    where
        R: io::AsyncBufRead + Unpin + Send + 'd,
    {
        tracing::trace!("Uploading blob {digest}");
        self.driver.put_blob(digest, reader).await
    }

    /// Remove a blob's physical storage.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn delete_blob(&self, digest: &Digest) -> Result<bool, StorageError> {
        self.driver.delete_blob(digest).await
    }

    /// Link a blob into a repository.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn link_blob(&self, repository: &str, digest: &Digest) -> Result<(), StorageError> {
        self.driver.link_blob(repository, digest).await
    }

    /// Unlink a blob from a repository.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn unlink_blob(&self, repository: &str, digest: &Digest) -> Result<(), StorageError> {
        self.driver.unlink_blob(repository, digest).await
    }

    /// Whether a repository links a blob.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn has_layer_link(
        &self,
        repository: &str,
        digest: &Digest,
    ) -> Result<bool, StorageError> {
        self.driver.has_layer_link(repository, digest).await
    }

    /// Resolve a manifest by tag or digest.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<Option<Manifest>, StorageError> {
        self.driver.get_manifest(repository, reference).await
    }

    /// Store a manifest, moving the tag when `reference` is one.
    #[tracing::instrument(skip(self, content), fields(driver=self.driver.name(), size=content.len()))]
    pub async fn put_manifest(
        &self,
        repository: &str,
        reference: &str,
        content: Bytes,
        digest: &Digest,
    ) -> Result<(), StorageError> {
        self.driver
            .put_manifest(repository, reference, content, digest)
            .await
    }

    /// Delete a tag or a manifest.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn delete_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<bool, StorageError> {
        self.driver.delete_manifest(repository, reference).await
    }

    /// Tags in a repository.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn list_tags(
        &self,
        repository: &str,
        options: &ListOptions,
    ) -> Result<Vec<String>, StorageError> {
        self.driver.list_tags(repository, options).await
    }

    /// Repository names.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn list_repositories(
        &self,
        options: &ListOptions,
    ) -> Result<Vec<String>, StorageError> {
        self.driver.list_repositories(options).await
    }

    /// Check that the backend is reachable and writable.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn probe(&self) -> Result<(), StorageError> {
        self.driver.probe().await
    }
}
