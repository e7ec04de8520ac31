//! # Registry storage contract
//!
//! The capability set every registry storage backend provides: content
//! addressed blobs, per-repository manifests, tags and layer links, and
//! lexicographic listings that page with a `last` cursor.

mod digest;
mod driver;
mod error;
mod list;
mod name;

pub use digest::{Digest, DigestAlgorithm, DigestError, Digester};
pub use driver::BlobReader;
pub use driver::Driver;
pub use driver::Manifest;
pub use driver::Reader;
pub use error::{StorageError, StorageErrorBuilder, StorageErrorKind};
pub use list::ListOptions;
pub use name::{validate_repository, validate_tag, Reference};
