//! Path parsing for `/v2/<name>/...` endpoints.
//!
//! Repository names contain `/`, so they cannot be matched by a single path
//! parameter. Everything below `/v2/` is captured and split on the last
//! endpoint marker instead.

/// An endpoint below `/v2/`, with the repository name split out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Endpoint {
    /// `<name>/manifests/<reference>`
    Manifest { name: String, reference: String },

    /// `<name>/blobs/<digest>`
    Blob { name: String, digest: String },

    /// `<name>/blobs/uploads/`
    Uploads { name: String },

    /// `<name>/blobs/uploads/<id>`
    Upload { name: String, id: String },

    /// `<name>/tags/list`
    Tags { name: String },
}

impl Endpoint {
    /// Parse the part of the path following `/v2/`.
    pub(crate) fn parse(path: &str) -> Option<Self> {
        let path = path.trim_start_matches('/');

        if let Some(name) = path.strip_suffix("/tags/list") {
            return non_empty(name).map(|name| Endpoint::Tags { name });
        }

        if let Some((name, reference)) = path.rsplit_once("/manifests/") {
            if is_segment(reference) {
                return non_empty(name).map(|name| Endpoint::Manifest {
                    name,
                    reference: reference.to_owned(),
                });
            }
        }

        if let Some(name) = path
            .strip_suffix("/blobs/uploads/")
            .or_else(|| path.strip_suffix("/blobs/uploads"))
        {
            return non_empty(name).map(|name| Endpoint::Uploads { name });
        }

        if let Some((name, id)) = path.rsplit_once("/blobs/uploads/") {
            if is_segment(id) {
                return non_empty(name).map(|name| Endpoint::Upload {
                    name,
                    id: id.to_owned(),
                });
            }
        }

        if let Some((name, digest)) = path.rsplit_once("/blobs/") {
            if is_segment(digest) {
                return non_empty(name).map(|name| Endpoint::Blob {
                    name,
                    digest: digest.to_owned(),
                });
            }
        }

        None
    }
}

fn is_segment(s: &str) -> bool {
    !s.is_empty() && !s.contains('/')
}

fn non_empty(name: &str) -> Option<String> {
    (!name.is_empty()).then(|| name.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_names() {
        assert_eq!(
            Endpoint::parse("myorg/backend/manifests/latest"),
            Some(Endpoint::Manifest {
                name: "myorg/backend".into(),
                reference: "latest".into()
            })
        );
        assert_eq!(
            Endpoint::parse("org/team/image/tags/list"),
            Some(Endpoint::Tags {
                name: "org/team/image".into()
            })
        );
    }

    #[test]
    fn blob_endpoints() {
        assert_eq!(
            Endpoint::parse("alpine/blobs/sha256:abc"),
            Some(Endpoint::Blob {
                name: "alpine".into(),
                digest: "sha256:abc".into()
            })
        );
        assert_eq!(
            Endpoint::parse("a/b/blobs/uploads/"),
            Some(Endpoint::Uploads { name: "a/b".into() })
        );
        assert_eq!(
            Endpoint::parse("a/b/blobs/uploads/1234"),
            Some(Endpoint::Upload {
                name: "a/b".into(),
                id: "1234".into()
            })
        );
    }

    #[test]
    fn repository_named_like_an_endpoint() {
        assert_eq!(
            Endpoint::parse("blobs/manifests/v1"),
            Some(Endpoint::Manifest {
                name: "blobs".into(),
                reference: "v1".into()
            })
        );
    }

    #[test]
    fn unknown_paths() {
        assert_eq!(Endpoint::parse("alpine"), None);
        assert_eq!(Endpoint::parse("/manifests/latest"), None);
        assert_eq!(Endpoint::parse("alpine/manifests/"), None);
        assert_eq!(Endpoint::parse("tags/list"), None);
    }
}
