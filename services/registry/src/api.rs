//! API server builder and router

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{Json, Response};
use axum::routing::{any, get};
use serde_json::json;
use storage::Storage;

use crate::error::{RegistryError, RegistryResult};
use crate::route::Endpoint;

/// Registry builder for configuring and creating the OCI registry service
#[derive(Debug)]
pub struct RegistryBuilder {
    storage: Option<Storage>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// Create a new registry builder
    pub fn new() -> Self {
        Self { storage: None }
    }

    /// Set the storage backend
    pub fn storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Build the registry service
    ///
    /// Returns a Router that can be served with any tower-compatible server
    ///
    /// # Panics
    ///
    /// If no storage backend was configured.
    pub fn build(self) -> Router {
        let storage = self.storage.expect("storage backend must be configured");

        Router::new()
            .route("/v2/", get(api_version_check))
            .merge(crate::catalog::router())
            .merge(crate::health::router())
            .route("/v2/{*path}", any(dispatch))
            .with_state(storage)
    }
}

/// API version check endpoint
///
/// Returns 200 OK to indicate the registry is available
async fn api_version_check() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({})))
}

/// Route a `/v2/<name>/...` request to its handler.
async fn dispatch(
    State(storage): State<Storage>,
    Path(path): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> RegistryResult<Response> {
    let Some(endpoint) = Endpoint::parse(&path) else {
        return Err(RegistryError::EndpointNotFound(uri.path().to_owned()));
    };

    match (endpoint, &method) {
        (Endpoint::Manifest { name, reference }, &Method::GET) => {
            crate::manifest::get_manifest(&storage, &name, &reference).await
        }
        (Endpoint::Manifest { name, reference }, &Method::HEAD) => {
            crate::manifest::head_manifest(&storage, &name, &reference).await
        }
        (Endpoint::Manifest { name, reference }, &Method::PUT) => {
            crate::manifest::put_manifest(&storage, &name, &reference, &headers, body).await
        }
        (Endpoint::Manifest { name, reference }, &Method::DELETE) => {
            crate::manifest::delete_manifest(&storage, &name, &reference).await
        }
        (Endpoint::Tags { name }, &Method::GET) => {
            crate::manifest::list_tags(&storage, &name, &uri).await
        }
        (Endpoint::Blob { name, digest }, &Method::GET) => {
            crate::blob::get_blob(&storage, &name, &digest).await
        }
        (Endpoint::Blob { name, digest }, &Method::HEAD) => {
            crate::blob::head_blob(&storage, &name, &digest).await
        }
        (Endpoint::Blob { name, digest }, &Method::DELETE) => {
            crate::blob::delete_blob(&storage, &name, &digest).await
        }
        (Endpoint::Uploads { name }, &Method::POST) => {
            crate::blob::start_blob_upload(&storage, &name, &uri, body).await
        }
        (Endpoint::Upload { name, .. }, &Method::PUT) => {
            crate::blob::complete_blob_upload(&storage, &name, &uri, &headers, body).await
        }
        (Endpoint::Upload { name, .. }, &Method::DELETE) => {
            crate::blob::cancel_blob_upload(&name).await
        }
        _ => Err(RegistryError::MethodNotAllowed {
            method: method.to_string(),
            path: uri.path().to_owned(),
        }),
    }
}

/// Validate repository name
pub(crate) fn validate_repository(name: &str) -> RegistryResult<()> {
    storage::validate_repository(name)
        .map_err(|_| RegistryError::InvalidRepository(name.to_string()))
}

/// Validate digest format
pub(crate) fn parse_digest(digest: &str) -> RegistryResult<storage::Digest> {
    digest
        .parse()
        .map_err(|_| RegistryError::InvalidDigest(digest.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let storage = storage::MemoryStorage::new();
        let _registry = RegistryBuilder::new().storage(storage.into()).build();
    }

    #[test]
    fn test_parse_digest() {
        let digest = storage::Digest::sha256(b"x");
        assert_eq!(parse_digest(&digest.to_string()).unwrap(), digest);
        assert!(matches!(
            parse_digest("sha256:nonexistent"),
            Err(RegistryError::InvalidDigest(_))
        ));
    }
}
