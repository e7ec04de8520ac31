//! Repository and tag name grammar.
//!
//! Names end up as path segments in filesystem backends, so everything is
//! checked here before a backend touches the medium.

use std::fmt;

use crate::digest::Digest;
use crate::error::{StorageError, StorageErrorKind};

const MAX_REPOSITORY_LEN: usize = 255;
const MAX_TAG_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
enum NameError {
    #[error("invalid repository name {0:?}")]
    Repository(String),

    #[error("invalid tag {0:?}")]
    Tag(String),
}

/// Check a repository name against the distribution grammar.
///
/// A name is one or more `/` separated components, each matching
/// `[a-z0-9]+((\.|_|__|-+)[a-z0-9]+)*`.
pub fn validate_repository(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_REPOSITORY_LEN
        && name.split('/').all(valid_component);

    if valid {
        Ok(())
    } else {
        Err(invalid(NameError::Repository(name.to_owned())))
    }
}

/// Check a tag name: `[A-Za-z0-9_][A-Za-z0-9._-]{0,127}`.
pub fn validate_tag(tag: &str) -> Result<(), StorageError> {
    let mut bytes = tag.bytes();
    let valid = tag.len() <= MAX_TAG_LEN
        && bytes
            .next()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        && bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'));

    if valid {
        Ok(())
    } else {
        Err(invalid(NameError::Tag(tag.to_owned())))
    }
}

/// A manifest reference: a tag name or a digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// A mutable tag pointer.
    Tag(String),

    /// A content digest.
    Digest(Digest),
}

impl Reference {
    /// Classify a reference. Anything that parses as a digest is a digest;
    /// everything else must be a valid tag.
    pub fn parse(reference: &str) -> Result<Self, StorageError> {
        if Digest::is_digest(reference) {
            return Ok(Reference::Digest(reference.parse()?));
        }
        validate_tag(reference)?;
        Ok(Reference::Tag(reference.to_owned()))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Tag(tag) => f.write_str(tag),
            Reference::Digest(digest) => digest.fmt(f),
        }
    }
}

fn invalid(error: NameError) -> StorageError {
    StorageError::new("name", StorageErrorKind::InvalidArgument, error)
}

fn is_alnum(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit()
}

fn valid_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    let (Some(&first), Some(&last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    if !is_alnum(first) || !is_alnum(last) {
        return false;
    }

    let mut i = 0;
    while i < bytes.len() {
        if is_alnum(bytes[i]) {
            i += 1;
            continue;
        }

        // Separator run: ".", "_", "__" or one or more "-".
        let start = i;
        while i < bytes.len() && !is_alnum(bytes[i]) {
            i += 1;
        }
        let ok = match &component[start..i] {
            "." | "_" | "__" => true,
            sep => sep.bytes().all(|b| b == b'-'),
        };
        if !ok {
            return false;
        }
    }

    true
}
