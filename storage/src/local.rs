use std::io;

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tracing::Instrument;

use storage_driver::{
    validate_repository, validate_tag, BlobReader, Digest, DigestAlgorithm, Digester, Driver,
    ListOptions, Manifest, Reader, Reference, StorageError, StorageErrorKind,
};

const ENGINE: &str = "local";

const BLOBS: &str = "blobs";
const REPOSITORIES: &str = "repositories";
const UPLOADS: &str = "_uploads";
const MANIFESTS: &str = "_manifests";
const TAGS: &str = "_tags";
const LAYERS: &str = "_layers";

/// Attempts at moving a staged file into place. A concurrent prune can remove
/// the freshly created parent directory between `create_dir_all` and `rename`.
const COMMIT_ATTEMPTS: usize = 3;

/// Filesystem storage engine.
///
/// Layout under the root:
///
/// ```text
/// blobs/<alg>/<hex>                                  blob content
/// repositories/<name>/_manifests/<alg>/<hex>         manifest content
/// repositories/<name>/_tags/<tag>                    digest the tag points to
/// repositories/<name>/_layers/<alg>/<hex>            layer link
/// _uploads/<uuid>                                    staged writes
/// ```
///
/// Every file is written to `_uploads` first and renamed into place, so a
/// path under `blobs/` or `repositories/` is either absent or complete.
#[derive(Debug, Clone)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

/// A file in `_uploads`, removed on drop unless it was renamed into place.
#[derive(Debug)]
struct Staged {
    path: Utf8PathBuf,
    committed: bool,
}

impl Drop for Staged {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn io_err<'p>(
    path: &'p Utf8Path,
    context: &'static str,
) -> impl FnOnce(io::Error) -> StorageError + 'p {
    move |err| {
        StorageError::from_io(ENGINE, err)
            .at(path.as_str())
            .during(context)
    }
}

/// Tag an error with the repository whose files were being touched.
fn scoped(repository: &str) -> impl FnOnce(StorageError) -> StorageError + '_ {
    move |err| err.in_repository(repository)
}

/// Turn `NotFound` into `None`.
fn absent<T>(result: io::Result<T>) -> io::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

impl LocalDriver {
    /// Create a driver rooted at `root`. Nothing is created on disk until the
    /// first write.
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    /// The storage root directory.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn blob_path(&self, digest: &Digest) -> Utf8PathBuf {
        let mut path = self.root.join(BLOBS);
        path.push(digest.algorithm().as_str());
        path.push(digest.hex());
        path
    }

    fn repositories(&self) -> Utf8PathBuf {
        self.root.join(REPOSITORIES)
    }

    fn repository_path(&self, repository: &str) -> Utf8PathBuf {
        let mut path = self.repositories();
        for component in repository.split('/') {
            path.push(component);
        }
        path
    }

    fn manifest_path(&self, repository: &str, digest: &Digest) -> Utf8PathBuf {
        let mut path = self.repository_path(repository);
        path.push(MANIFESTS);
        path.push(digest.algorithm().as_str());
        path.push(digest.hex());
        path
    }

    fn tag_path(&self, repository: &str, tag: &str) -> Utf8PathBuf {
        let mut path = self.repository_path(repository);
        path.push(TAGS);
        path.push(tag);
        path
    }

    fn link_path(&self, repository: &str, digest: &Digest) -> Utf8PathBuf {
        let mut path = self.repository_path(repository);
        path.push(LAYERS);
        path.push(digest.algorithm().as_str());
        path.push(digest.hex());
        path
    }

    /// Stream `reader` into a fresh file under `_uploads`, hashing as it goes.
    async fn stage(
        &self,
        reader: &mut Reader<'_>,
        algorithm: DigestAlgorithm,
    ) -> Result<(Staged, Digest), StorageError> {
        let uploads = self.root.join(UPLOADS);
        tokio::fs::create_dir_all(&uploads)
            .await
            .map_err(io_err(&uploads, "create uploads directory"))?;

        let staged = Staged {
            path: uploads.join(uuid::Uuid::new_v4().to_string()),
            committed: false,
        };

        let file = tokio::fs::File::create(&staged.path)
            .await
            .map_err(io_err(&staged.path, "create staged file"))?;
        let mut writer = tokio::io::BufWriter::new(file);
        let mut digester = Digester::new(algorithm);

        loop {
            let chunk = reader
                .fill_buf()
                .await
                .map_err(io_err(&staged.path, "read upload"))?;
            if chunk.is_empty() {
                break;
            }
            digester.update(chunk);
            writer
                .write_all(chunk)
                .await
                .map_err(io_err(&staged.path, "write staged file"))?;
            let n = chunk.len();
            reader.consume(n);
        }

        writer
            .flush()
            .await
            .map_err(io_err(&staged.path, "flush staged file"))?;
        writer
            .get_ref()
            .sync_all()
            .await
            .map_err(io_err(&staged.path, "sync staged file"))?;

        tracing::trace!(path = %staged.path, bytes = digester.written(), "staged upload");
        Ok((staged, digester.finish()))
    }

    async fn stage_bytes(&self, data: &[u8]) -> Result<(Staged, Digest), StorageError> {
        let mut reader = data;
        self.stage(&mut reader, DigestAlgorithm::Sha256).await
    }

    /// Atomically move a staged file to `target`, replacing whatever is there.
    async fn commit(&self, mut staged: Staged, target: &Utf8Path) -> Result<(), StorageError> {
        let parent = target.parent().unwrap_or(&self.root);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let step = match tokio::fs::create_dir_all(parent).await {
                Ok(()) => tokio::fs::rename(&staged.path, target)
                    .await
                    .map_err(|err| (err, target, "rename staged file")),
                Err(err) => Err((err, parent, "create parent directory")),
            };

            match step {
                Ok(()) => break,
                Err((err, _, _))
                    if err.kind() == io::ErrorKind::NotFound && attempt < COMMIT_ATTEMPTS =>
                {
                    tracing::trace!(%target, attempt, "parent directory vanished, retrying");
                }
                Err((err, path, context)) => return Err(io_err(path, context)(err)),
            }
        }

        staged.committed = true;
        Ok(())
    }

    async fn write_pointer(&self, target: &Utf8Path, digest: &Digest) -> Result<(), StorageError> {
        let (staged, _) = self.stage_bytes(digest.to_string().as_bytes()).await?;
        self.commit(staged, target).await
    }

    async fn read_pointer(&self, path: &Utf8Path) -> Result<Option<Digest>, StorageError> {
        let Some(text) = absent(tokio::fs::read_to_string(path).await)
            .map_err(io_err(path, "read pointer"))?
        else {
            return Ok(None);
        };

        let digest = text.trim().parse::<Digest>().map_err(|err| {
            StorageError::builder(ENGINE, StorageErrorKind::Other, err)
                .path(path.as_str())
                .context("corrupt pointer")
                .build()
        })?;
        Ok(Some(digest))
    }

    async fn read_manifest(
        &self,
        repository: &str,
        digest: Digest,
    ) -> Result<Option<Manifest>, StorageError> {
        let path = self.manifest_path(repository, &digest);
        let Some(content) =
            absent(tokio::fs::read(&path).await).map_err(io_err(&path, "read manifest"))?
        else {
            return Ok(None);
        };

        digest
            .verify(&content)
            .map_err(|err| err.at(path.as_str()).during("verify stored manifest"))?;

        Ok(Some(Manifest {
            content: Bytes::from(content),
            digest,
        }))
    }

    /// Remove a file inside a repository, then any directories it leaves empty.
    async fn remove_from_repository(&self, path: &Utf8Path) -> Result<bool, StorageError> {
        let removed = absent(tokio::fs::remove_file(path).await)
            .map_err(io_err(path, "remove file"))?
            .is_some();

        if removed {
            self.prune(path).await;
        }
        Ok(removed)
    }

    /// Remove empty directories from `path`'s parent up to `repositories/`.
    /// Stops at the first directory that is not empty.
    async fn prune(&self, path: &Utf8Path) {
        let stop = self.repositories();
        let mut dir = path.parent();

        while let Some(current) = dir {
            if current == stop || !current.starts_with(&stop) {
                break;
            }
            match tokio::fs::remove_dir(current).await {
                Ok(()) => {}
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::DirectoryNotEmpty | io::ErrorKind::NotFound
                    ) =>
                {
                    break;
                }
                Err(err) => {
                    tracing::debug!(dir = %current, error = %err, "stopped pruning");
                    break;
                }
            }
            tracing::trace!(dir = %current, "pruned empty directory");
            dir = current.parent();
        }
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        ENGINE
    }

    async fn has_blob(&self, digest: &Digest) -> Result<bool, StorageError> {
        Ok(self.blob_size(digest).await?.is_some())
    }

    async fn get_blob(&self, digest: &Digest) -> Result<Option<BlobReader>, StorageError> {
        let path = self.blob_path(digest);
        let file = absent(tokio::fs::File::open(&path).await).map_err(io_err(&path, "open blob"))?;

        Ok(file.map(|file| Box::new(tokio::io::BufReader::new(file)) as BlobReader))
    }

    async fn blob_size(&self, digest: &Digest) -> Result<Option<u64>, StorageError> {
        let path = self.blob_path(digest);
        let metadata =
            absent(tokio::fs::metadata(&path).await).map_err(io_err(&path, "blob metadata"))?;

        Ok(metadata.filter(|m| m.is_file()).map(|m| m.len()))
    }

    async fn put_blob(&self, digest: &Digest, reader: &mut Reader<'_>) -> Result<(), StorageError> {
        let (staged, actual) = self.stage(reader, digest.algorithm()).await?;
        if actual != *digest {
            return Err(StorageError::digest_mismatch(digest, &actual));
        }

        let target = self.blob_path(digest);
        self.commit(staged, &target).await?;

        tracing::debug!(%digest, "stored blob");
        Ok(())
    }

    async fn delete_blob(&self, digest: &Digest) -> Result<bool, StorageError> {
        let path = self.blob_path(digest);
        let removed = absent(tokio::fs::remove_file(&path).await)
            .map_err(io_err(&path, "remove blob"))?
            .is_some();

        tracing::debug!(%digest, removed, "delete blob");
        Ok(removed)
    }

    async fn link_blob(&self, repository: &str, digest: &Digest) -> Result<(), StorageError> {
        validate_repository(repository)?;
        let path = self.link_path(repository, digest);
        self.write_pointer(&path, digest)
            .await
            .map_err(scoped(repository))?;

        tracing::debug!(%repository, %digest, "linked blob");
        Ok(())
    }

    async fn unlink_blob(&self, repository: &str, digest: &Digest) -> Result<(), StorageError> {
        validate_repository(repository)?;
        let path = self.link_path(repository, digest);
        let removed = self
            .remove_from_repository(&path)
            .await
            .map_err(scoped(repository))?;

        tracing::debug!(%repository, %digest, removed, "unlinked blob");
        Ok(())
    }

    async fn has_layer_link(
        &self,
        repository: &str,
        digest: &Digest,
    ) -> Result<bool, StorageError> {
        validate_repository(repository)?;
        let path = self.link_path(repository, digest);
        let metadata = absent(tokio::fs::metadata(&path).await)
            .map_err(io_err(&path, "link metadata"))
            .map_err(scoped(repository))?;
        Ok(metadata.is_some())
    }

    async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<Option<Manifest>, StorageError> {
        validate_repository(repository)?;

        let digest = match Reference::parse(reference)? {
            Reference::Digest(digest) => digest,
            Reference::Tag(tag) => {
                let path = self.tag_path(repository, &tag);
                match self.read_pointer(&path).await.map_err(scoped(repository))? {
                    Some(digest) => digest,
                    None => return Ok(None),
                }
            }
        };

        self.read_manifest(repository, digest)
            .await
            .map_err(scoped(repository))
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

        let mut reader: &[u8] = &content;
        let (staged, actual) = self.stage(&mut reader, digest.algorithm()).await?;
        if actual != *digest {
            return Err(StorageError::digest_mismatch(digest, &actual).in_repository(repository));
        }
        let target = self.manifest_path(repository, digest);
        self.commit(staged, &target)
            .await
            .map_err(scoped(repository))?;

        // Second, independent step: the manifest is already stored even if
        // moving the tag fails.
        if let Reference::Tag(tag) = &reference {
            let path = self.tag_path(repository, tag);
            self.write_pointer(&path, digest)
                .await
                .map_err(scoped(repository))?;
        }

        tracing::debug!(%repository, %reference, %digest, "stored manifest");
        Ok(())
    }

    async fn delete_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<bool, StorageError> {
        validate_repository(repository)?;
        let path = match Reference::parse(reference)? {
            Reference::Tag(tag) => self.tag_path(repository, &tag),
            Reference::Digest(digest) => self.manifest_path(repository, &digest),
        };

        let removed = self
            .remove_from_repository(&path)
            .await
            .map_err(scoped(repository))?;
        tracing::debug!(%repository, %reference, removed, "delete manifest");
        Ok(removed)
    }

    async fn list_tags(
        &self,
        repository: &str,
        options: &ListOptions,
    ) -> Result<Vec<String>, StorageError> {
        validate_repository(repository)?;
        let dir = self.repository_path(repository).join(TAGS);

        let Some(mut entries) = absent(tokio::fs::read_dir(&dir).await)
            .map_err(io_err(&dir, "read tags"))
            .map_err(scoped(repository))?
        else {
            return Ok(Vec::new());
        };

        let mut tags = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(io_err(&dir, "read tags"))
            .map_err(scoped(repository))?
        {
            if let Ok(name) = entry.file_name().into_string() {
                if validate_tag(&name).is_ok() {
                    tags.push(name);
                }
            }
        }

        Ok(options.apply(tags))
    }

    async fn list_repositories(&self, options: &ListOptions) -> Result<Vec<String>, StorageError> {
        let root = self.repositories();

        let names = tokio::task::spawn_blocking(move || collect_repositories(&root))
            .in_current_span()
            .await
            .map_err(StorageError::with(ENGINE, StorageErrorKind::Other))?
            .map_err(|err| StorageError::from_io(ENGINE, err).during("walk repositories"))?;

        tracing::debug!("Found {} repositories", names.len());
        Ok(options.apply(names))
    }

    async fn probe(&self) -> Result<(), StorageError> {
        let metadata = tokio::fs::metadata(&self.root)
            .await
            .map_err(io_err(&self.root, "stat storage root"))?;
        if !metadata.is_dir() {
            return Err(StorageError::builder(
                ENGINE,
                StorageErrorKind::NotFound,
                io::Error::new(io::ErrorKind::NotFound, "storage root is not a directory"),
            )
            .path(self.root.as_str())
            .build());
        }

        let probe = self.root.join(format!(".probe-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&probe, b"ok")
            .await
            .map_err(io_err(&probe, "write probe"))?;
        tokio::fs::remove_file(&probe)
            .await
            .map_err(io_err(&probe, "remove probe"))?;
        Ok(())
    }
}

/// Walk `repositories/` for directories holding manifests or layer links.
#[tracing::instrument]
fn collect_repositories(root: &Utf8Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    visit(root, root, &mut names)?;
    Ok(names)
}

fn visit(root: &Utf8Path, dir: &Utf8Path, names: &mut Vec<String>) -> io::Result<()> {
    // Directories can vanish under a concurrent delete; treat them as empty.
    let Some(entries) = absent(dir.read_dir_utf8())? else {
        return Ok(());
    };

    let mut is_repository = false;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        match entry.file_name() {
            MANIFESTS | LAYERS => is_repository |= contains_file(entry.path())?,
            name if name.starts_with('_') || name.starts_with('.') => {}
            _ => visit(root, entry.path(), names)?,
        }
    }

    if is_repository {
        if let Ok(relative) = dir.strip_prefix(root) {
            let name: Vec<&str> = relative.components().map(|c| c.as_str()).collect();
            if !name.is_empty() {
                names.push(name.join("/"));
            }
        }
    }

    Ok(())
}

fn contains_file(dir: &Utf8Path) -> io::Result<bool> {
    let Some(entries) = absent(dir.read_dir_utf8())? else {
        return Ok(false);
    };

    for entry in entries {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_file() || (file_type.is_dir() && contains_file(entry.path())?) {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn driver() -> (tempfile::TempDir, LocalDriver) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_owned();
        (dir, LocalDriver::new(root))
    }

    async fn read_all(mut reader: BlobReader) -> Vec<u8> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        buf
    }

    async fn put(driver: &LocalDriver, data: &[u8]) -> Digest {
        let digest = Digest::sha256(data);
        let mut reader = data;
        driver.put_blob(&digest, &mut reader).await.unwrap();
        digest
    }

    fn uploads_is_empty(driver: &LocalDriver) -> bool {
        match std::fs::read_dir(driver.root().join(UPLOADS)) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }

    #[tokio::test]
    async fn blob_round_trip() {
        let (_dir, driver) = driver();
        let data = b"layer contents";
        let digest = put(&driver, data).await;

        assert!(driver.has_blob(&digest).await.unwrap());
        assert_eq!(driver.blob_size(&digest).await.unwrap(), Some(data.len() as u64));

        let reader = driver.get_blob(&digest).await.unwrap().unwrap();
        let read = read_all(reader).await;
        assert_eq!(Digest::sha256(&read), digest);

        assert!(driver.root().join("blobs/sha256").join(digest.hex()).is_file());
        assert!(uploads_is_empty(&driver));
    }

    #[tokio::test]
    async fn absent_blob_is_not_an_error() {
        let (_dir, driver) = driver();
        let digest = Digest::sha256(b"never stored");

        assert!(!driver.has_blob(&digest).await.unwrap());
        assert!(driver.get_blob(&digest).await.unwrap().is_none());
        assert_eq!(driver.blob_size(&digest).await.unwrap(), None);
        assert!(!driver.delete_blob(&digest).await.unwrap());
    }

    #[tokio::test]
    async fn digest_mismatch_persists_nothing() {
        let (_dir, driver) = driver();
        let claimed = Digest::sha256(b"what the client promised");
        let mut reader: &[u8] = b"what the client sent";

        let err = driver.put_blob(&claimed, &mut reader).await.unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::DigestMismatch);
        assert!(!driver.has_blob(&claimed).await.unwrap());
        assert!(!driver.has_blob(&Digest::sha256(b"what the client sent")).await.unwrap());
        assert!(uploads_is_empty(&driver));
    }

    #[tokio::test]
    async fn put_blob_is_idempotent() {
        let (_dir, driver) = driver();
        let digest = put(&driver, b"same").await;
        assert_eq!(put(&driver, b"same").await, digest);
        assert_eq!(driver.blob_size(&digest).await.unwrap(), Some(4));

        assert!(driver.delete_blob(&digest).await.unwrap());
        assert!(!driver.has_blob(&digest).await.unwrap());
    }

    #[tokio::test]
    async fn links_are_idempotent_and_scoped() {
        let (_dir, driver) = driver();
        let digest = put(&driver, b"shared layer").await;

        driver.link_blob("alpine", &digest).await.unwrap();
        driver.link_blob("alpine", &digest).await.unwrap();
        driver.link_blob("myorg/backend", &digest).await.unwrap();
        assert!(driver.has_layer_link("alpine", &digest).await.unwrap());
        assert!(!driver.has_layer_link("debian", &digest).await.unwrap());

        driver.unlink_blob("alpine", &digest).await.unwrap();
        driver.unlink_blob("alpine", &digest).await.unwrap();
        assert!(!driver.has_layer_link("alpine", &digest).await.unwrap());
        assert!(driver.has_layer_link("myorg/backend", &digest).await.unwrap());

        // Physical storage is shared, not duplicated.
        assert!(driver.has_blob(&digest).await.unwrap());
        assert!(!driver.root().join("repositories/alpine").exists());
    }

    #[tokio::test]
    async fn deleting_a_linked_blob_leaves_the_link() {
        let (_dir, driver) = driver();
        let digest = put(&driver, b"dangling").await;
        driver.link_blob("alpine", &digest).await.unwrap();

        assert!(driver.delete_blob(&digest).await.unwrap());
        assert!(driver.has_layer_link("alpine", &digest).await.unwrap());
        assert!(driver.get_blob(&digest).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tags_move_manifests_stay() {
        let (_dir, driver) = driver();
        let m1 = Bytes::from_static(b"{\"manifest\":1}");
        let m2 = Bytes::from_static(b"{\"manifest\":2}");
        let d1 = Digest::sha256(&m1);
        let d2 = Digest::sha256(&m2);

        driver.put_manifest("repo", "t", m1.clone(), &d1).await.unwrap();
        driver.put_manifest("repo", "t", m2.clone(), &d2).await.unwrap();

        let by_digest = driver.get_manifest("repo", &d1.to_string()).await.unwrap().unwrap();
        assert_eq!(by_digest.content, m1);
        assert_eq!(by_digest.digest, d1);

        let by_tag = driver.get_manifest("repo", "t").await.unwrap().unwrap();
        assert_eq!(by_tag.content, m2);
        assert_eq!(by_tag.digest, d2);
    }

    #[tokio::test]
    async fn manifest_lookups_that_miss_are_absent() {
        let (_dir, driver) = driver();
        let missing = Digest::sha256(b"missing");
        assert!(driver.get_manifest("repo", "latest").await.unwrap().is_none());
        assert!(driver.get_manifest("repo", &missing.to_string()).await.unwrap().is_none());

        let err = driver.get_manifest("repo", "bad tag!").await.unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::InvalidArgument);
        let err = driver.get_manifest("../etc", "latest").await.unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn manifest_digest_must_match() {
        let (_dir, driver) = driver();
        let content = Bytes::from_static(b"manifest");
        let wrong = Digest::sha256(b"other");

        let err = driver
            .put_manifest("repo", "latest", content.clone(), &wrong)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::DigestMismatch);
        assert!(driver.get_manifest("repo", "latest").await.unwrap().is_none());

        let digest = Digest::sha256(&content);
        let err = driver
            .put_manifest("repo", &wrong.to_string(), content.clone(), &digest)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::DigestMismatch);

        driver
            .put_manifest("repo", &digest.to_string(), content.clone(), &digest)
            .await
            .unwrap();
        assert!(driver.list_tags("repo", &ListOptions::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_manifest_is_not_served() {
        let (_dir, driver) = driver();
        let content = Bytes::from_static(b"manifest");
        let digest = Digest::sha256(&content);
        driver.put_manifest("repo", "latest", content, &digest).await.unwrap();

        std::fs::write(driver.manifest_path("repo", &digest), b"tampered").unwrap();
        let err = driver.get_manifest("repo", "latest").await.unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::DigestMismatch);
        assert_eq!(err.repository(), Some("repo"));
    }

    #[tokio::test]
    async fn corrupt_tag_names_its_repository() {
        let (_dir, driver) = driver();
        let content = Bytes::from_static(b"manifest");
        let digest = Digest::sha256(&content);
        driver.put_manifest("myorg/backend", "latest", content, &digest).await.unwrap();

        std::fs::write(driver.tag_path("myorg/backend", "latest"), b"not a digest").unwrap();
        let err = driver.get_manifest("myorg/backend", "latest").await.unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::Other);
        assert_eq!(err.repository(), Some("myorg/backend"));
        assert_eq!(err.context(), Some("corrupt pointer"));
    }

    #[tokio::test]
    async fn prune_stops_at_first_non_empty_directory() {
        let (_dir, driver) = driver();
        let content = Bytes::from_static(b"manifest");
        let digest = Digest::sha256(&content);
        driver.put_manifest("repo", "a", content.clone(), &digest).await.unwrap();
        driver.put_manifest("repo", "b", content, &digest).await.unwrap();

        assert!(driver.delete_manifest("repo", "a").await.unwrap());
        assert!(driver.root().join("repositories/repo/_tags/b").is_file());
        assert_eq!(driver.list_tags("repo", &ListOptions::all()).await.unwrap(), ["b"]);
    }

    #[tokio::test]
    async fn cancelled_upload_leaves_no_debris() {
        let (_dir, driver) = driver();
        let digest = Digest::sha256(b"the full layer that never arrives");
        let (mut tx, rx) = tokio::io::duplex(64);
        tx.write_all(b"the full").await.unwrap();

        let upload = tokio::spawn({
            let driver = driver.clone();
            let digest = digest.clone();
            async move {
                let mut reader = tokio::io::BufReader::new(rx);
                driver.put_blob(&digest, &mut reader).await
            }
        });

        // Wait for the staged file to appear, then drop the upload mid-stream.
        for _ in 0..10_000 {
            if !uploads_is_empty(&driver) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!uploads_is_empty(&driver), "upload never started staging");

        upload.abort();
        assert!(upload.await.unwrap_err().is_cancelled());
        drop(tx);

        assert!(uploads_is_empty(&driver));
        assert!(!driver.has_blob(&digest).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_prune_and_commit() {
        let (_dir, driver) = driver();
        let layer = put(&driver, b"layer").await;
        let content = Bytes::from_static(b"manifest");
        let digest = Digest::sha256(&content);

        for _ in 0..200 {
            let (linked, unlinked, stored) = tokio::join!(
                driver.link_blob("org/repo", &layer),
                driver.unlink_blob("org/repo", &layer),
                driver.put_manifest("org/repo", "latest", content.clone(), &digest),
            );
            linked.unwrap();
            unlinked.unwrap();
            stored.unwrap();

            assert!(driver.delete_manifest("org/repo", "latest").await.unwrap());
            assert!(driver.delete_manifest("org/repo", &digest.to_string()).await.unwrap());
            driver.unlink_blob("org/repo", &layer).await.unwrap();
        }

        assert!(uploads_is_empty(&driver));
        assert!(driver.list_repositories(&ListOptions::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_tag_keeps_manifest() {
        let (_dir, driver) = driver();
        let content = Bytes::from_static(b"manifest");
        let digest = Digest::sha256(&content);
        driver.put_manifest("repo", "latest", content, &digest).await.unwrap();

        assert!(driver.delete_manifest("repo", "latest").await.unwrap());
        assert!(!driver.delete_manifest("repo", "latest").await.unwrap());
        assert!(driver.get_manifest("repo", "latest").await.unwrap().is_none());
        assert!(driver.get_manifest("repo", &digest.to_string()).await.unwrap().is_some());

        assert!(driver.delete_manifest("repo", &digest.to_string()).await.unwrap());
        assert!(driver.get_manifest("repo", &digest.to_string()).await.unwrap().is_none());
        assert!(driver.list_repositories(&ListOptions::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_tags_sorted_and_windowed() {
        let (_dir, driver) = driver();
        let content = Bytes::from_static(b"manifest");
        let digest = Digest::sha256(&content);
        for tag in ["v1.1", "latest", "v1.0", "V2"] {
            driver.put_manifest("repo", tag, content.clone(), &digest).await.unwrap();
        }

        let tags = driver.list_tags("repo", &ListOptions::all()).await.unwrap();
        assert_eq!(tags, ["V2", "latest", "v1.0", "v1.1"]);

        let tags = driver
            .list_tags("repo", &ListOptions::all().after("latest").limit(1))
            .await
            .unwrap();
        assert_eq!(tags, ["v1.0"]);

        assert!(driver.list_tags("nothing", &ListOptions::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_repositories_recurses_without_prefixes() {
        let (_dir, driver) = driver();
        let content = Bytes::from_static(b"manifest");
        let digest = Digest::sha256(&content);
        for repo in ["myorg/frontend", "alpine", "myorg/backend"] {
            driver.put_manifest(repo, "latest", content.clone(), &digest).await.unwrap();
        }
        let layer = put(&driver, b"layer").await;
        driver.link_blob("org/team/image", &layer).await.unwrap();
        // A repository whose only content is nested below another repository.
        driver.put_manifest("myorg/backend/api", "v1", content.clone(), &digest).await.unwrap();

        let repos = driver.list_repositories(&ListOptions::all()).await.unwrap();
        assert_eq!(
            repos,
            [
                "alpine",
                "myorg/backend",
                "myorg/backend/api",
                "myorg/frontend",
                "org/team/image"
            ]
        );

        let page = driver
            .list_repositories(&ListOptions::all().after("alpine").limit(2))
            .await
            .unwrap();
        assert_eq!(page, ["myorg/backend", "myorg/backend/api"]);
    }

    #[tokio::test]
    async fn list_repositories_on_empty_root() {
        let (_dir, driver) = driver();
        assert!(driver.list_repositories(&ListOptions::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn probe_reports_missing_root() {
        let (dir, driver) = driver();
        driver.probe().await.unwrap();

        let missing = LocalDriver::new(driver.root().join("does-not-exist"));
        let err = missing.probe().await.unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::NotFound);

        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 0, "probe must clean up after itself");
    }
}
