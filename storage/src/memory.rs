use std::collections::{BTreeMap, HashMap, HashSet};

use bytes::Bytes;
use tokio::{io::AsyncReadExt, sync::RwLock};

use storage_driver::{
    validate_repository, BlobReader, Digest, Driver, ListOptions, Manifest, Reader, Reference,
    StorageError,
};

#[derive(Debug, Default)]
struct Repository {
    manifests: HashMap<Digest, Bytes>,
    tags: BTreeMap<String, Digest>,
    layers: HashSet<Digest>,
}

impl Repository {
    /// A repository exists while it holds a manifest or a layer link.
    fn exists(&self) -> bool {
        !self.manifests.is_empty() || !self.layers.is_empty()
    }

    fn is_empty(&self) -> bool {
        self.manifests.is_empty() && self.layers.is_empty() && self.tags.is_empty()
    }
}

#[derive(Debug, Default)]
struct State {
    blobs: HashMap<Digest, Bytes>,
    repositories: HashMap<String, Repository>,
}

impl State {
    fn forget_if_empty(&mut self, repository: &str) {
        if self
            .repositories
            .get(repository)
            .is_some_and(Repository::is_empty)
        {
            self.repositories.remove(repository);
        }
    }
}

/// Storage driver that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: RwLock<State>,
}

impl MemoryStorage {
    /// Create a new, empty `MemoryStorage` instance.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Driver for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn has_blob(&self, digest: &Digest) -> Result<bool, StorageError> {
        Ok(self.state.read().await.blobs.contains_key(digest))
    }

    async fn get_blob(&self, digest: &Digest) -> Result<Option<BlobReader>, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .blobs
            .get(digest)
            .map(|data| Box::new(std::io::Cursor::new(data.clone())) as BlobReader))
    }

    async fn blob_size(&self, digest: &Digest) -> Result<Option<u64>, StorageError> {
        let state = self.state.read().await;
        Ok(state.blobs.get(digest).map(|data| data.len() as u64))
    }

    async fn put_blob(&self, digest: &Digest, reader: &mut Reader<'_>) -> Result<(), StorageError> {
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|err| StorageError::from_io(self.name(), err))?;
        digest.verify(&buf)?;

        let mut state = self.state.write().await;
        state.blobs.insert(digest.clone(), buf.into());
        Ok(())
    }

    async fn delete_blob(&self, digest: &Digest) -> Result<bool, StorageError> {
        let mut state = self.state.write().await;
        Ok(state.blobs.remove(digest).is_some())
    }

    async fn link_blob(&self, repository: &str, digest: &Digest) -> Result<(), StorageError> {
        validate_repository(repository)?;
        let mut state = self.state.write().await;
        state
            .repositories
            .entry(repository.to_owned())
            .or_default()
            .layers
            .insert(digest.clone());
        Ok(())
    }

    async fn unlink_blob(&self, repository: &str, digest: &Digest) -> Result<(), StorageError> {
        validate_repository(repository)?;
        let mut state = self.state.write().await;
        if let Some(repo) = state.repositories.get_mut(repository) {
            repo.layers.remove(digest);
        }
        state.forget_if_empty(repository);
        Ok(())
    }

    async fn has_layer_link(
        &self,
        repository: &str,
        digest: &Digest,
    ) -> Result<bool, StorageError> {
        validate_repository(repository)?;
        let state = self.state.read().await;
        Ok(state
            .repositories
            .get(repository)
            .is_some_and(|repo| repo.layers.contains(digest)))
    }

    async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<Option<Manifest>, StorageError> {
        validate_repository(repository)?;
        let reference = Reference::parse(reference)?;

        let state = self.state.read().await;
        let Some(repo) = state.repositories.get(repository) else {
            return Ok(None);
        };

        let digest = match reference {
            Reference::Digest(digest) => digest,
            Reference::Tag(tag) => match repo.tags.get(&tag) {
                Some(digest) => digest.clone(),
                None => return Ok(None),
            },
        };

        Ok(repo.manifests.get(&digest).map(|content| Manifest {
            content: content.clone(),
            digest,
        }))
    }

    async fn put_manifest(
        &self,
        repository: &str,
        reference: &str,
        content: Bytes,
        digest: &Digest,
    ) -> Result<(), StorageError> {
        validate_repository(repository)?;
        let reference = Reference::parse(reference)?;
        if let Reference::Digest(named) = &reference {
            if named != digest {
                return Err(StorageError::digest_mismatch(named, digest));
            }
        }
        digest.verify(&content)?;

        let mut state = self.state.write().await;
        let repo = state.repositories.entry(repository.to_owned()).or_default();
        repo.manifests.insert(digest.clone(), content);
        if let Reference::Tag(tag) = reference {
            repo.tags.insert(tag, digest.clone());
        }
        Ok(())
    }

    async fn delete_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<bool, StorageError> {
        validate_repository(repository)?;
        let reference = Reference::parse(reference)?;

        let mut state = self.state.write().await;
        let Some(repo) = state.repositories.get_mut(repository) else {
            return Ok(false);
        };
        let removed = match reference {
            Reference::Tag(tag) => repo.tags.remove(&tag).is_some(),
            Reference::Digest(digest) => repo.manifests.remove(&digest).is_some(),
        };
        state.forget_if_empty(repository);
        Ok(removed)
    }

    async fn list_tags(
        &self,
        repository: &str,
        options: &ListOptions,
    ) -> Result<Vec<String>, StorageError> {
        validate_repository(repository)?;
        let state = self.state.read().await;
        let tags = state
            .repositories
            .get(repository)
            .map(|repo| repo.tags.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        Ok(options.apply(tags))
    }

    async fn list_repositories(&self, options: &ListOptions) -> Result<Vec<String>, StorageError> {
        let state = self.state.read().await;
        let names = state
            .repositories
            .iter()
            .filter(|(_, repo)| repo.exists())
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();

        tracing::trace!("Found {} repositories", names.len());
        Ok(options.apply(names))
    }

    async fn probe(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage_driver::StorageErrorKind;

    async fn put(storage: &MemoryStorage, data: &'static [u8]) -> Digest {
        let digest = Digest::sha256(data);
        let mut reader = data;
        storage.put_blob(&digest, &mut reader).await.unwrap();
        digest
    }

    #[tokio::test]
    async fn blob_round_trip() {
        let storage = MemoryStorage::new();
        let digest = put(&storage, b"test data").await;

        assert!(storage.has_blob(&digest).await.unwrap());
        assert_eq!(storage.blob_size(&digest).await.unwrap(), Some(9));

        let mut buf = Vec::new();
        let mut reader = storage.get_blob(&digest).await.unwrap().unwrap();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(Digest::sha256(&buf), digest);

        assert!(storage.delete_blob(&digest).await.unwrap());
        assert!(!storage.has_blob(&digest).await.unwrap());
    }

    #[tokio::test]
    async fn blob_digest_verification() {
        let storage = MemoryStorage::new();
        let wrong = Digest::sha256(b"something else");
        let mut reader: &[u8] = b"test data";

        let err = storage.put_blob(&wrong, &mut reader).await.unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::DigestMismatch);
        assert!(!storage.has_blob(&wrong).await.unwrap());
    }

    #[tokio::test]
    async fn link_twice_unlink_once() {
        let storage = MemoryStorage::new();
        let digest = put(&storage, b"layer").await;

        storage.link_blob("repo", &digest).await.unwrap();
        storage.link_blob("repo", &digest).await.unwrap();
        storage.unlink_blob("repo", &digest).await.unwrap();
        assert!(!storage.has_layer_link("repo", &digest).await.unwrap());
        assert!(storage
            .list_repositories(&ListOptions::all())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn tag_moves_manifest_stays() {
        let storage = MemoryStorage::new();
        let m1 = Bytes::from_static(b"one");
        let m2 = Bytes::from_static(b"two");
        let d1 = Digest::sha256(&m1);
        let d2 = Digest::sha256(&m2);

        storage.put_manifest("repo", "t", m1.clone(), &d1).await.unwrap();
        storage.put_manifest("repo", "t", m2.clone(), &d2).await.unwrap();

        let old = storage.get_manifest("repo", &d1.to_string()).await.unwrap().unwrap();
        assert_eq!(old.content, m1);
        let current = storage.get_manifest("repo", "t").await.unwrap().unwrap();
        assert_eq!(current.content, m2);
        assert_eq!(current.digest, d2);
    }

    #[tokio::test]
    async fn tag_only_repository_is_not_listed() {
        let storage = MemoryStorage::new();
        let content = Bytes::from_static(b"manifest");
        let digest = Digest::sha256(&content);
        storage.put_manifest("repo", "latest", content, &digest).await.unwrap();
        storage.delete_manifest("repo", &digest.to_string()).await.unwrap();

        // The dangling tag remains but resolves to nothing.
        assert_eq!(
            storage.list_tags("repo", &ListOptions::all()).await.unwrap(),
            ["latest"]
        );
        assert!(storage.get_manifest("repo", "latest").await.unwrap().is_none());
        assert!(storage
            .list_repositories(&ListOptions::all())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn list_repositories_sorted() {
        let storage = MemoryStorage::new();
        let content = Bytes::from_static(b"manifest");
        let digest = Digest::sha256(&content);
        for repo in ["myorg/frontend", "alpine", "myorg/backend"] {
            storage
                .put_manifest(repo, "latest", content.clone(), &digest)
                .await
                .unwrap();
        }

        let repos = storage.list_repositories(&ListOptions::all()).await.unwrap();
        assert_eq!(repos, ["alpine", "myorg/backend", "myorg/frontend"]);
    }
}
