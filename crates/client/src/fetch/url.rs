//! Request key canonicalization.
//!
//! A request key is the canonical URL of a book query. It addresses both the
//! HTTP response cache and the network fetch target, so two queries that
//! canonicalize to the same key share one cache entry.

use std::fmt;

use url::form_urlencoded;

/// Path of the field-filtered book search endpoint.
pub const BOOK_PATH: &str = "/book";

/// Fields requested for every book record.
pub const BOOK_FIELDS: &str = "id,title,image,author,publisher,price";

/// Error type for request key building failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty query")]
    EmptyQuery,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Canonical URL of a book query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(url::Url);

impl RequestKey {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Normalize a query into its request key.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace of the query (empty is rejected)
/// 2. Parse `base`, requiring http(s); the host is lowercased by the parser
/// 3. Drop any fragment and existing query of `base`
/// 4. Append `/book` to the base path
/// 5. Set the query to `q=<form-encoded query>&fields=<fixed field list>`
pub fn request_key(base: &str, query: &str) -> Result<RequestKey, UrlError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(UrlError::EmptyQuery);
    }

    let mut url = url::Url::parse(base.trim()).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    url.set_fragment(None);
    let path = format!("{}{}", url.path().trim_end_matches('/'), BOOK_PATH);
    url.set_path(&path);

    let encoded: String = form_urlencoded::byte_serialize(query.as_bytes()).collect();
    url.set_query(Some(&format!("q={encoded}&fields={BOOK_FIELDS}")));

    Ok(RequestKey(url))
}
