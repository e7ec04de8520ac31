//! Manifest operations for the registry

use axum::Json;
use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use storage::{Digest, Manifest, Reference, Storage};

use crate::api::validate_repository;
use crate::blob::DOCKER_CONTENT_DIGEST;
use crate::error::{RegistryError, RegistryResult};
use crate::pagination::{Page, PageParams};

/// Largest manifest body accepted.
const MAX_MANIFEST_SIZE: usize = 4 * 1024 * 1024;

/// Get a manifest
pub(crate) async fn get_manifest(
    storage: &Storage,
    name: &str,
    reference: &str,
) -> RegistryResult<Response> {
    let manifest = fetch_manifest(storage, name, reference).await?;
    let content_type = detect_manifest_type(&manifest.content);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (DOCKER_CONTENT_DIGEST, manifest.digest.to_string()),
        ],
        manifest.content,
    )
        .into_response())
}

/// Check if a manifest exists
pub(crate) async fn head_manifest(
    storage: &Storage,
    name: &str,
    reference: &str,
) -> RegistryResult<Response> {
    let manifest = fetch_manifest(storage, name, reference).await?;
    let content_type = detect_manifest_type(&manifest.content);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (DOCKER_CONTENT_DIGEST, manifest.digest.to_string()),
            (header::CONTENT_LENGTH, manifest.content.len().to_string()),
        ],
    )
        .into_response())
}

/// Put a manifest
pub(crate) async fn put_manifest(
    storage: &Storage,
    name: &str,
    reference: &str,
    headers: &HeaderMap,
    body: Body,
) -> RegistryResult<Response> {
    validate_repository(name)?;
    let reference = parse_reference(reference)?;

    // Get content type
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/vnd.docker.distribution.manifest.v2+json");

    // Validate manifest type
    validate_manifest_type(content_type)?;

    let content = axum::body::to_bytes(body, MAX_MANIFEST_SIZE)
        .await
        .map_err(|err| RegistryError::InvalidManifest(err.to_string()))?;

    let digest = match &reference {
        Reference::Digest(expected) => {
            let actual = Digest::compute(expected.algorithm(), &content);
            if actual != *expected {
                return Err(RegistryError::DigestMismatch {
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
            actual
        }
        Reference::Tag(_) => Digest::sha256(&content),
    };

    storage
        .put_manifest(name, &reference.to_string(), content, &digest)
        .await?;

    let location = format!("/v2/{}/manifests/{}", name, digest);

    Ok((
        StatusCode::CREATED,
        [
            (header::LOCATION, location),
            (DOCKER_CONTENT_DIGEST, digest.to_string()),
        ],
    )
        .into_response())
}

/// Delete a manifest, or untag it when `reference` is a tag
pub(crate) async fn delete_manifest(
    storage: &Storage,
    name: &str,
    reference: &str,
) -> RegistryResult<Response> {
    validate_repository(name)?;
    parse_reference(reference)?;

    if !storage.delete_manifest(name, reference).await? {
        return Err(RegistryError::ManifestNotFound(format!(
            "{}/{}",
            name, reference
        )));
    }
    Ok(StatusCode::ACCEPTED.into_response())
}

/// List tags for a repository
pub(crate) async fn list_tags(storage: &Storage, name: &str, uri: &Uri) -> RegistryResult<Response> {
    validate_repository(name)?;

    let params = PageParams::from_uri(uri);
    let fetched = storage.list_tags(name, &params.fetch_options()).await?;
    let page = Page::from_fetched(fetched, params.limit());
    let link = page.next_link(&format!("/v2/{name}/tags/list"), &params);

    let mut response = Json(TagList {
        name: name.to_string(),
        tags: page.items,
    })
    .into_response();

    if let Some(link) = link {
        response.headers_mut().insert(header::LINK, link);
    }
    Ok(response)
}

/// Tag list response
#[derive(Debug, serde::Serialize)]
struct TagList {
    name: String,
    tags: Vec<String>,
}

async fn fetch_manifest(storage: &Storage, name: &str, reference: &str) -> RegistryResult<Manifest> {
    validate_repository(name)?;
    parse_reference(reference)?;

    storage
        .get_manifest(name, reference)
        .await?
        .ok_or_else(|| RegistryError::ManifestNotFound(format!("{}/{}", name, reference)))
}

/// Anything with a `:` must be a digest; otherwise a tag.
fn parse_reference(reference: &str) -> RegistryResult<Reference> {
    if reference.contains(':') && !Digest::is_digest(reference) {
        return Err(RegistryError::InvalidDigest(reference.to_string()));
    }

    Reference::parse(reference).map_err(|_| RegistryError::InvalidTag(reference.to_string()))
}

/// Detect manifest type from content
fn detect_manifest_type(data: &[u8]) -> String {
    // Try to parse as JSON and detect the schemaVersion or mediaType
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(data) {
        if let Some(media_type) = json.get("mediaType").and_then(|v| v.as_str()) {
            return media_type.to_string();
        }

        if let Some(schema_version) = json.get("schemaVersion").and_then(|v| v.as_u64()) {
            return match schema_version {
                1 => "application/vnd.docker.distribution.manifest.v1+json".to_string(),
                2 if json.get("manifests").is_some() => {
                    "application/vnd.oci.image.index.v1+json".to_string()
                }
                _ => "application/vnd.oci.image.manifest.v1+json".to_string(),
            };
        }
    }

    // Default to OCI manifest
    "application/vnd.oci.image.manifest.v1+json".to_string()
}

/// Validate manifest type
fn validate_manifest_type(content_type: &str) -> RegistryResult<()> {
    match content_type {
        "application/vnd.docker.distribution.manifest.v1+json"
        | "application/vnd.docker.distribution.manifest.v1+prettyjws"
        | "application/vnd.docker.distribution.manifest.v2+json"
        | "application/vnd.docker.distribution.manifest.list.v2+json"
        | "application/vnd.oci.image.manifest.v1+json"
        | "application/vnd.oci.image.index.v1+json" => Ok(()),
        _ => Err(RegistryError::UnsupportedManifestType(
            content_type.to_string(),
        )),
    }
}
