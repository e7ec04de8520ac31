//! Cursor pagination for `_catalog` and `tags/list`.
//!
//! Clients send `n` (page size) and `last` (the final name of the previous
//! page). The route asks storage for `n + 1` names after `last`; the extra
//! name only tells us whether another page exists. When it does, a `Link`
//! header points at the next page; its absence marks the end.

use axum::extract::Query;
use axum::http::{HeaderValue, Uri};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use storage::ListOptions;

/// Page size used when the client sends no usable `n`.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Upper bound on `n`.
pub const MAX_PAGE_SIZE: usize = 1000;

const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const PATH: &AsciiSet = &QUERY_VALUE.remove(b'/');

/// Pagination query parameters.
///
/// `n` is kept as text so a malformed value falls back to the default
/// instead of failing the request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageParams {
    /// Requested page size.
    pub n: Option<String>,

    /// Exclusive cursor.
    pub last: Option<String>,
}

impl PageParams {
    /// Read the parameters from a request URI, ignoring anything malformed.
    pub fn from_uri(uri: &Uri) -> Self {
        Query::<PageParams>::try_from_uri(uri)
            .map(|Query(params)| params)
            .unwrap_or_default()
    }

    /// The effective page size.
    pub fn limit(&self) -> usize {
        self.n
            .as_deref()
            .and_then(|n| n.trim().parse::<usize>().ok())
            .map(|n| n.min(MAX_PAGE_SIZE))
            .unwrap_or(DEFAULT_PAGE_SIZE)
    }

    /// The cursor, if one was sent.
    pub fn last(&self) -> Option<&str> {
        self.last.as_deref().filter(|last| !last.is_empty())
    }

    /// Storage options fetching one more name than the page holds.
    pub fn fetch_options(&self) -> ListOptions {
        ListOptions {
            limit: Some(self.limit().saturating_add(1)),
            last: self.last().map(str::to_owned),
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items on this page, at most `limit`.
    pub items: Vec<T>,

    /// Whether more items follow this page.
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Trim a `limit + 1` fetch down to a page.
    pub fn from_fetched(mut fetched: Vec<T>, limit: usize) -> Self {
        let has_more = fetched.len() > limit;
        fetched.truncate(limit);
        Self {
            items: fetched,
            has_more,
        }
    }
}

impl Page<String> {
    /// The `Link` header for the next page, if there is one.
    ///
    /// An empty page (`n=0`) carries the request's own cursor forward.
    pub fn next_link(&self, path: &str, params: &PageParams) -> Option<HeaderValue> {
        if !self.has_more {
            return None;
        }
        let cursor = self.items.last().map(String::as_str).or(params.last());
        next_link(path, params.limit(), cursor)
    }
}

/// Build `<path?n=limit&last=cursor>; rel="next"`.
pub fn next_link(path: &str, limit: usize, cursor: Option<&str>) -> Option<HeaderValue> {
    let mut link = format!("<{}?n={limit}", utf8_percent_encode(path, PATH));
    if let Some(cursor) = cursor {
        link.push_str("&last=");
        link.extend(utf8_percent_encode(cursor, QUERY_VALUE));
    }
    link.push_str(">; rel=\"next\"");

    HeaderValue::from_str(&link).ok()
}
