use std::io;

use bytes::Bytes;
use camino::Utf8Path;
use tempfile::TempDir;

use crate::local::LocalDriver;
use storage_driver::{
    BlobReader, Digest, Driver, ListOptions, Manifest, Reader, StorageError,
};

/// A filesystem storage engine rooted in a temporary directory, which is
/// removed when the driver is dropped.
#[derive(Debug)]
pub struct TempDriver {
    #[allow(unused)]
    dir: TempDir,
    driver: LocalDriver,
}

impl TempDriver {
    /// Create a new `TempDriver` instance, storing files in a temporary directory.
    pub fn new() -> io::Result<Self> {
        let tmp = TempDir::new()?;
        let root = Utf8Path::from_path(tmp.path())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "non utf-8 temp dir"))?
            .to_owned();

        Ok(Self {
            dir: tmp,
            driver: LocalDriver::new(root),
        })
    }

    /// The temporary storage root.
    pub fn root(&self) -> &Utf8Path {
        self.driver.root()
    }
}

#[async_trait::async_trait]
impl Driver for TempDriver {
    fn name(&self) -> &'static str {
        "temp"
    }

    async fn has_blob(&self, digest: &Digest) -> Result<bool, StorageError> {
        self.driver.has_blob(digest).await
    }

    async fn get_blob(&self, digest: &Digest) -> Result<Option<BlobReader>, StorageError> {
        self.driver.get_blob(digest).await
    }

    async fn blob_size(&self, digest: &Digest) -> Result<Option<u64>, StorageError> {
        self.driver.blob_size(digest).await
    }

    async fn put_blob(&self, digest: &Digest, reader: &mut Reader<'_>) -> Result<(), StorageError> {
        self.driver.put_blob(digest, reader).await
    }

    async fn delete_blob(&self, digest: &Digest) -> Result<bool, StorageError> {
        self.driver.delete_blob(digest).await
    }

    async fn link_blob(&self, repository: &str, digest: &Digest) -> Result<(), StorageError> {
        self.driver.link_blob(repository, digest).await
    }

    async fn unlink_blob(&self, repository: &str, digest: &Digest) -> Result<(), StorageError> {
        self.driver.unlink_blob(repository, digest).await
    }

    async fn has_layer_link(
        &self,
        repository: &str,
        digest: &Digest,
    ) -> Result<bool, StorageError> {
        self.driver.has_layer_link(repository, digest).await
    }

    async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<Option<Manifest>, StorageError> {
        self.driver.get_manifest(repository, reference).await
    }

    async fn put_manifest(
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

    async fn delete_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<bool, StorageError> {
        self.driver.delete_manifest(repository, reference).await
    }

    async fn list_tags(
        &self,
        repository: &str,
        options: &ListOptions,
    ) -> Result<Vec<String>, StorageError> {
        self.driver.list_tags(repository, options).await
    }

    async fn list_repositories(&self, options: &ListOptions) -> Result<Vec<String>, StorageError> {
        self.driver.list_repositories(options).await
    }

    async fn probe(&self) -> Result<(), StorageError> {
        self.driver.probe().await
    }
}
