//! Liveness and readiness probes.
//!
//! `/health` only says the process is serving. `/health/ready` asks the
//! storage driver to prove it can be written to.

use std::collections::BTreeMap;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use serde::Serialize;
use storage::{Storage, StorageError, StorageErrorKind};

/// Body of a health response
#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    checks: BTreeMap<&'static str, String>,
}

pub(crate) fn router() -> Router<Storage> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "healthy",
        checks: BTreeMap::new(),
    })
}

async fn ready(State(storage): State<Storage>) -> (StatusCode, Json<Health>) {
    let mut checks = BTreeMap::new();

    match storage.probe().await {
        Ok(()) => {
            checks.insert("storage", "ok".to_string());
            (
                StatusCode::OK,
                Json(Health {
                    status: "ready",
                    checks,
                }),
            )
        }
        Err(err) => {
            tracing::warn!(driver = storage.name(), error = %err, "storage not ready");
            checks.insert("storage", format!("error: {}", probe_failure(&err)));
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Health {
                    status: "not ready",
                    checks,
                }),
            )
        }
    }
}

fn probe_failure(err: &StorageError) -> String {
    match err.kind() {
        StorageErrorKind::NotFound => "storage directory not found".to_string(),
        StorageErrorKind::PermissionDenied => "permission denied".to_string(),
        _ => err.to_string(),
    }
}
