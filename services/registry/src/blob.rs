//! Blob operations for the registry
//!
//! Blobs are served per repository: `/v2/<name>/blobs/<digest>` answers only
//! when `<name>` links the blob, even though the bytes are stored once.

use axum::body::Body;
use axum::extract::Query;
use axum::http::{HeaderMap, HeaderName, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use serde::Deserialize;
use storage::{Digest, Storage};
use tokio_util::io::{ReaderStream, StreamReader};

use crate::api::{parse_digest, validate_repository};
use crate::error::{RegistryError, RegistryResult};

pub(crate) const DOCKER_CONTENT_DIGEST: HeaderName =
    HeaderName::from_static("docker-content-digest");

const DOCKER_UPLOAD_UUID: HeaderName = HeaderName::from_static("docker-upload-uuid");

/// Query parameters accepted on upload endpoints.
#[derive(Debug, Default, Deserialize)]
struct UploadParams {
    digest: Option<String>,
    mount: Option<String>,
    from: Option<String>,
}

impl UploadParams {
    fn from_uri(uri: &Uri) -> RegistryResult<Self> {
        Query::<UploadParams>::try_from_uri(uri)
            .map(|Query(params)| params)
            .map_err(|err| RegistryError::BlobUploadInvalid(err.body_text()))
    }
}

/// Size of a blob as seen from `name`: absent unless linked.
async fn linked_blob_size(storage: &Storage, name: &str, digest: &Digest) -> RegistryResult<u64> {
    if !storage.has_layer_link(name, digest).await? {
        return Err(RegistryError::BlobNotFound(digest.to_string()));
    }

    storage
        .blob_size(digest)
        .await?
        .ok_or_else(|| RegistryError::BlobNotFound(digest.to_string()))
}

/// Get a blob
pub(crate) async fn get_blob(storage: &Storage, name: &str, digest: &str) -> RegistryResult<Response> {
    validate_repository(name)?;
    let digest = parse_digest(digest)?;

    let size = linked_blob_size(storage, name, &digest).await?;
    let reader = storage
        .get_blob(&digest)
        .await?
        .ok_or_else(|| RegistryError::BlobNotFound(digest.to_string()))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
            (DOCKER_CONTENT_DIGEST, digest.to_string()),
        ],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response())
}

/// Check if a blob exists
pub(crate) async fn head_blob(storage: &Storage, name: &str, digest: &str) -> RegistryResult<Response> {
    validate_repository(name)?;
    let digest = parse_digest(digest)?;

    let size = linked_blob_size(storage, name, &digest).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
            (DOCKER_CONTENT_DIGEST, digest.to_string()),
        ],
    )
        .into_response())
}

/// Delete a blob from a repository.
///
/// Only the repository's link goes; the bytes stay for other repositories.
pub(crate) async fn delete_blob(storage: &Storage, name: &str, digest: &str) -> RegistryResult<Response> {
    validate_repository(name)?;
    let digest = parse_digest(digest)?;

    if !storage.has_layer_link(name, &digest).await? {
        return Err(RegistryError::BlobNotFound(digest.to_string()));
    }
    storage.unlink_blob(name, &digest).await?;

    Ok(StatusCode::ACCEPTED.into_response())
}

/// Start a blob upload.
///
/// `?digest=` uploads the body in one request, `?mount=&from=` links a blob
/// another repository already holds. Otherwise the client gets a location to
/// `PUT` the content to.
pub(crate) async fn start_blob_upload(
    storage: &Storage,
    name: &str,
    uri: &Uri,
    body: Body,
) -> RegistryResult<Response> {
    validate_repository(name)?;
    let params = UploadParams::from_uri(uri)?;

    if let Some(digest) = params.digest.as_deref() {
        return store_upload(storage, name, digest, body).await;
    }

    if let (Some(mount), Some(from)) = (params.mount.as_deref(), params.from.as_deref()) {
        let digest = parse_digest(mount)?;
        validate_repository(from)?;

        if storage.has_layer_link(from, &digest).await? && storage.has_blob(&digest).await? {
            storage.link_blob(name, &digest).await?;
            tracing::debug!(%name, %from, %digest, "mounted blob");
            return Ok(created(name, &digest));
        }
    }

    let uuid = uuid::Uuid::new_v4().to_string();
    let location = format!("/v2/{}/blobs/uploads/{}", name, uuid);

    Ok((
        StatusCode::ACCEPTED,
        [
            (header::LOCATION, location),
            (header::RANGE, "0-0".to_string()),
            (DOCKER_UPLOAD_UUID, uuid),
        ],
    )
        .into_response())
}

/// Complete a blob upload
pub(crate) async fn complete_blob_upload(
    storage: &Storage,
    name: &str,
    uri: &Uri,
    headers: &HeaderMap,
    body: Body,
) -> RegistryResult<Response> {
    validate_repository(name)?;
    let params = UploadParams::from_uri(uri)?;

    // Get the digest from query parameter or header
    let digest = params
        .digest
        .or_else(|| {
            headers
                .get("digest")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        })
        .ok_or_else(|| RegistryError::BlobUploadInvalid("missing digest".to_string()))?;

    store_upload(storage, name, &digest, body).await
}

/// Cancel a blob upload
pub(crate) async fn cancel_blob_upload(name: &str) -> RegistryResult<Response> {
    validate_repository(name)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Stream the request body into storage and link the blob into `name`.
async fn store_upload(
    storage: &Storage,
    name: &str,
    digest: &str,
    body: Body,
) -> RegistryResult<Response> {
    let digest = parse_digest(digest)?;

    let stream = body.into_data_stream().map_err(std::io::Error::other);
    let mut reader = StreamReader::new(stream);
    storage.put_blob(&digest, &mut reader).await?;
    storage.link_blob(name, &digest).await?;

    Ok(created(name, &digest))
}

fn created(name: &str, digest: &Digest) -> Response {
    let location = format!("/v2/{}/blobs/{}", name, digest);

    (
        StatusCode::CREATED,
        [
            (header::LOCATION, location),
            (header::CONTENT_LENGTH, "0".to_string()),
            (DOCKER_CONTENT_DIGEST, digest.to_string()),
        ],
    )
        .into_response()
}
