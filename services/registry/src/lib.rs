//! # OCI Container Registry
//!
//! This crate implements a container registry server following
//! the [OCI Distribution Specification](https://github.com/opencontainers/distribution-spec).
//!
//! ## Features
//!
//! - Blob upload, download and cross-repository mounting
//! - Manifest operations by tag or digest (upload, download, delete)
//! - Repository catalog and tag listing with `Link` header pagination
//! - Nested repository names (`org/team/image`)
//! - Liveness and readiness probes
//! - Pluggable storage backend via the `storage` crate
//!
//! ## Example
//!
//! ```no_run
//! use registry::RegistryBuilder;
//! use storage::MemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = RegistryBuilder::new()
//!     .storage(MemoryStorage::new().into())
//!     .build();
//!
//! // Use the registry service with axum or any tower-compatible server
//! # Ok(())
//! # }
//! ```

mod api;
mod blob;
mod catalog;
mod config;
mod error;
mod health;
mod manifest;
pub mod pagination;
mod route;

pub use api::RegistryBuilder;
pub use config::{ConfigError, RegistryConfig};
pub use error::{RegistryError, RegistryResult};
