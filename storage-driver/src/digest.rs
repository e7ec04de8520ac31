//! Content digests, textually `<algorithm>:<hex>`.

use std::fmt;
use std::str::FromStr;

use sha2::Digest as _;

use crate::error::{StorageError, StorageErrorKind};

/// Hash algorithms accepted in digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DigestAlgorithm {
    /// SHA-256, the registry default.
    Sha256,

    /// SHA-512.
    Sha512,
}

impl DigestAlgorithm {
    /// The algorithm prefix used in the textual digest form.
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }

    /// Length of the hex-encoded hash for this algorithm.
    pub fn hex_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 64,
            DigestAlgorithm::Sha512 => 128,
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            other => Err(DigestError::UnsupportedAlgorithm(other.to_owned())),
        }
    }
}

/// Reasons a string is not a valid digest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DigestError {
    /// No `:` separator between algorithm and hash.
    #[error("missing algorithm separator in {0:?}")]
    MissingSeparator(String),

    /// The algorithm prefix is not one we can compute.
    #[error("unsupported digest algorithm {0:?}")]
    UnsupportedAlgorithm(String),

    /// The hash part has the wrong length or non lowercase-hex characters.
    #[error("invalid {algorithm} hash {hex:?}")]
    InvalidHex {
        /// Algorithm named by the digest.
        algorithm: DigestAlgorithm,
        /// The offending hash text.
        hex: String,
    },
}

impl From<DigestError> for StorageError {
    fn from(error: DigestError) -> Self {
        StorageError::new("digest", StorageErrorKind::InvalidArgument, error)
    }
}

/// A content digest: the algorithm and the lowercase hex hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: DigestAlgorithm,
    hex: String,
}

impl Digest {
    /// Compute the SHA-256 digest of a payload.
    pub fn sha256(data: impl AsRef<[u8]>) -> Self {
        Self {
            algorithm: DigestAlgorithm::Sha256,
            hex: hex::encode(sha2::Sha256::digest(data.as_ref())),
        }
    }

    /// Compute the digest of a payload using the given algorithm.
    pub fn compute(algorithm: DigestAlgorithm, data: impl AsRef<[u8]>) -> Self {
        let mut digester = Digester::new(algorithm);
        digester.update(data.as_ref());
        digester.finish()
    }

    /// Whether `reference` is syntactically a digest rather than a tag name.
    pub fn is_digest(reference: &str) -> bool {
        reference.parse::<Digest>().is_ok()
    }

    /// The hash algorithm.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// The lowercase hex encoded hash.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Check that `data` hashes to this digest.
    pub fn verify(&self, data: impl AsRef<[u8]>) -> Result<(), StorageError> {
        let actual = Digest::compute(self.algorithm, data);
        if actual == *self {
            Ok(())
        } else {
            Err(StorageError::digest_mismatch(self, &actual))
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| DigestError::MissingSeparator(s.to_owned()))?;
        let algorithm: DigestAlgorithm = algorithm.parse()?;

        let valid = hex.len() == algorithm.hex_len()
            && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !valid {
            return Err(DigestError::InvalidHex {
                algorithm,
                hex: hex.to_owned(),
            });
        }

        Ok(Self {
            algorithm,
            hex: hex.to_owned(),
        })
    }
}

#[derive(Debug, Clone)]
enum Hasher {
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
}

/// Incrementally computes a digest over a stream of chunks.
#[derive(Debug, Clone)]
pub struct Digester {
    hasher: Hasher,
    written: u64,
}

impl Digester {
    /// Start a new digest computation.
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        let hasher = match algorithm {
            DigestAlgorithm::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
            DigestAlgorithm::Sha512 => Hasher::Sha512(sha2::Sha512::new()),
        };
        Self { hasher, written: 0 }
    }

    /// Feed the next chunk.
    pub fn update(&mut self, chunk: &[u8]) {
        self.written += chunk.len() as u64;
        match &mut self.hasher {
            Hasher::Sha256(h) => h.update(chunk),
            Hasher::Sha512(h) => h.update(chunk),
        }
    }

    /// Number of bytes fed so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Finish the computation.
    pub fn finish(self) -> Digest {
        let digest = match self.hasher {
            Hasher::Sha256(h) => Digest {
                algorithm: DigestAlgorithm::Sha256,
                hex: hex::encode(h.finalize()),
            },
            Hasher::Sha512(h) => Digest {
                algorithm: DigestAlgorithm::Sha512,
                hex: hex::encode(h.finalize()),
            },
        };
        tracing::trace!(%digest, bytes = self.written, "computed digest");
        digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn sha256_of_known_payload() {
        let digest = Digest::sha256(b"hello");
        assert_eq!(digest.to_string(), HELLO);
        assert_eq!(digest.algorithm(), DigestAlgorithm::Sha256);
    }

    #[test]
    fn parse_and_display() {
        let digest: Digest = HELLO.parse().unwrap();
        assert_eq!(digest, Digest::sha256(b"hello"));
        assert_eq!(digest.to_string(), HELLO);
    }

    #[test]
    fn reject_malformed() {
        assert!(matches!(
            "latest".parse::<Digest>(),
            Err(DigestError::MissingSeparator(_))
        ));
        assert!(matches!(
            "md5:abcdef".parse::<Digest>(),
            Err(DigestError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            "sha256:abc".parse::<Digest>(),
            Err(DigestError::InvalidHex { .. })
        ));
        let upper = HELLO.to_uppercase().replace("SHA256", "sha256");
        assert!(upper.parse::<Digest>().is_err());
    }

    #[test]
    fn is_digest_distinguishes_tags() {
        assert!(Digest::is_digest(HELLO));
        assert!(!Digest::is_digest("v1.0"));
        assert!(!Digest::is_digest("sha256:short"));
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut digester = Digester::new(DigestAlgorithm::Sha256);
        digester.update(b"hel");
        digester.update(b"lo");
        assert_eq!(digester.written(), 5);
        assert_eq!(digester.finish(), Digest::sha256(b"hello"));

        let sha512 = Digest::compute(DigestAlgorithm::Sha512, b"hello");
        assert_eq!(sha512.hex().len(), 128);
        assert_eq!(sha512.to_string().parse::<Digest>().unwrap(), sha512);
    }

    #[test]
    fn verify_reports_mismatch() {
        let digest = Digest::sha256(b"hello");
        assert!(digest.verify(b"hello").is_ok());

        let err = digest.verify(b"goodbye").unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::DigestMismatch);
    }
}
