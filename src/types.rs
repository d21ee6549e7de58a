//! Core types: credentials, headers, listing entries, object info, errors

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::sign::parse_http_date;

/// Client errors
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP 404 on any operation; carries the requested key.
    #[error("key not found: {key:?}")]
    NotFound {
        /// The key the request targeted (empty for bucket-level operations)
        key: String,
    },

    /// Any non-2xx status other than 404 and the retried 500s.
    #[error("S3 error: HTTP {status} {reason} for {url}")]
    Remote {
        /// HTTP status code
        status: u16,
        /// HTTP reason phrase
        reason: String,
        /// The request URL
        url: String,
        /// Best-effort `<Message>` extracted from the response body,
        /// truncated to 100 characters with `...` appended.
        message: Option<String>,
        /// Set when reading the error response body itself failed.
        /// Diagnostic only; never replaces the primary error.
        read_error: Option<String>,
    },

    /// All retry attempts hit HTTP 500. Should not normally occur.
    #[error("gave up after {attempts} attempts, S3 kept returning HTTP 500")]
    RetriesExhausted {
        /// Number of requests issued before giving up
        attempts: u32,
    },

    /// Listing or body content did not match the expected shape.
    #[error("XML parse error: {0}")]
    Parse(String),

    /// A signed operation was attempted on a bucket constructed
    /// without credentials.
    #[error("operation requires credentials with a secret key")]
    MissingCredentials,

    /// The underlying transport failed to complete the exchange.
    #[error("transport error: {0}")]
    Transport(Box<dyn std::error::Error + Send + Sync>),

    /// I/O failure while hashing or streaming a payload or response.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Status code for `Remote` errors, `None` otherwise.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// AWS credentials: access key identifier plus opaque signing key.
///
/// Immutable once the bucket is constructed.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }
}

/// An order-preserving header list with case-insensitive lookup.
///
/// Supply order matters: repeated `x-amz-*` headers are comma-joined
/// in the order they were inserted before canonicalization sorts the
/// resulting names.
#[derive(Debug, Clone, Default)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Append a header, keeping any existing values for the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        )
    }
}

/// One object from a bucket listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    /// Object key
    pub key: String,
    /// Last modified timestamp
    pub last_modified: DateTime<Utc>,
    /// ETag, quoted, with `&quot;` entities decoded
    pub etag: String,
    /// Object size in bytes
    pub size: u64,
}

/// Object metadata derived from HEAD/GET response headers
#[derive(Debug, Clone, Default)]
pub struct ObjectInfo {
    /// `Content-Length`
    pub size: Option<u64>,
    /// `Content-Type`
    pub mimetype: Option<String>,
    /// Server `Date` header
    pub date: Option<DateTime<Utc>>,
    /// `Last-Modified` header
    pub last_modified: Option<DateTime<Utc>>,
    /// `x-amz-meta-*` headers with the prefix stripped, names lower-cased
    pub metadata: BTreeMap<String, String>,
    /// Raw response headers, names lower-cased
    pub headers: BTreeMap<String, String>,
}

impl ObjectInfo {
    /// Build from a response header map (names already lower-cased).
    pub fn from_headers(headers: &BTreeMap<String, String>) -> Self {
        let mut metadata = BTreeMap::new();
        for (name, value) in headers {
            if let Some(suffix) = name.strip_prefix("x-amz-meta-") {
                metadata.insert(suffix.to_string(), value.clone());
            }
        }
        Self {
            size: headers.get("content-length").and_then(|v| v.parse().ok()),
            mimetype: headers.get("content-type").cloned(),
            date: headers.get("date").and_then(|v| parse_http_date(v)),
            last_modified: headers
                .get("last-modified")
                .and_then(|v| parse_http_date(v)),
            metadata,
            headers: headers.clone(),
        }
    }
}
