//! S3 bucket client: request building, retry, object operations
//!
//! [`Bucket`] assembles signed requests from immutable credentials and
//! pure inputs, sends them through the injected [`Transport`], retries
//! HTTP 500 a bounded number of times, and classifies every other
//! non-2xx status into a typed [`Error`].

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::list::ListDir;
use crate::sign::{aws_urlquote, canonicalized_resource, http_date, sign, string_to_sign, url_encode};
use crate::transport::{HttpTransport, Payload, Transport, TransportResponse};
use crate::types::{Credentials, Error, Headers, ObjectInfo, Result};

const AMAZON_S3_BASE: &str = "https://s3.amazonaws.com";
const DEFAULT_MIMETYPE: &str = "application/octet-stream";

/// Retry bound for HTTP 500 responses
const MAX_ATTEMPTS: u32 = 10;

/// Raw expiry values below this many seconds are read as durations
/// from now rather than absolute Unix timestamps (roughly ten years;
/// no real pre-signed URL sits on the wrong side of it).
const EXPIRY_EPOCH_CUTOFF: i64 = 10 * 365 * 24 * 60 * 60;

/// When a pre-signed URL stops working.
#[derive(Debug, Clone, Copy)]
pub enum Expiry {
    /// An absolute point in time.
    At(DateTime<Utc>),
    /// A duration added to now.
    In(Duration),
    /// Raw seconds: below the disambiguation cutoff treated as a
    /// duration from now, otherwise as seconds since the Unix epoch.
    Seconds(i64),
}

impl Expiry {
    fn resolve(self, now: DateTime<Utc>) -> i64 {
        match self {
            Expiry::At(t) => t.timestamp(),
            Expiry::In(d) => (now + d).timestamp(),
            Expiry::Seconds(s) if s < EXPIRY_EPOCH_CUTOFF => (now + Duration::seconds(s)).timestamp(),
            Expiry::Seconds(s) => s,
        }
    }
}

impl Default for Expiry {
    /// Five minutes from now.
    fn default() -> Self {
        Expiry::In(Duration::minutes(5))
    }
}

/// Options for [`Bucket::put`]
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// `X-AMZ-ACL` value (e.g. `public-read`)
    pub acl: Option<String>,
    /// `Content-Type`; defaults to `application/octet-stream`
    pub mimetype: Option<String>,
    /// Becomes one `X-AMZ-Meta-<name>` header per entry
    pub metadata: BTreeMap<String, String>,
    /// Extra headers passed through verbatim
    pub headers: Headers,
}

/// Options for [`Bucket::copy`]
#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    /// `X-AMZ-ACL` value; S3 defaults the copy to `private` when unset
    pub acl: Option<String>,
    /// `Content-Type` for the copy
    pub mimetype: Option<String>,
    /// `Some` replaces the metadata wholesale (directive `REPLACE`);
    /// `None` copies the source's metadata (directive `COPY`).
    pub metadata: Option<BTreeMap<String, String>>,
}

/// Query options for [`Bucket::listdir`]
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Only keys starting with this prefix
    pub prefix: Option<String>,
    /// Only keys lexicographically after this marker
    pub marker: Option<String>,
    /// Maximum number of keys (`max-keys`)
    pub limit: Option<u32>,
    /// Delimiter for common-prefix grouping
    pub delimiter: Option<String>,
}

/// A fully built and signed request, ready for the transport.
///
/// Built fresh per attempt and never mutated after signing: the body
/// hash and date are part of what got signed.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub method: String,
    pub url: String,
    pub headers: Headers,
}

/// A fetched object: parsed header info plus the body stream.
pub struct Object {
    pub info: ObjectInfo,
    pub body: Box<dyn Read + Send>,
}

impl Object {
    /// Drain the body into a buffer.
    pub fn bytes(mut self) -> Result<Vec<u8>> {
        let mut buf = match self.info.size {
            Some(size) => Vec::with_capacity(size as usize),
            None => Vec::new(),
        };
        self.body.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Synchronous S3 bucket client with AWS Signature V2 signing.
///
/// Clone is cheap: the transport is shared behind an `Arc` and the
/// rest is immutable configuration.
#[derive(Clone)]
pub struct Bucket {
    name: String,
    base_url: String,
    credentials: Option<Credentials>,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("signed", &self.credentials.is_some())
            .finish_non_exhaustive()
    }
}

impl Bucket {
    /// Create a bucket client against `https://s3.amazonaws.com` using
    /// the default blocking HTTP transport. Pass `None` for
    /// credentials to build an unsigned client (public objects and
    /// plain URL generation only).
    pub fn new(name: impl Into<String>, credentials: Option<Credentials>) -> Self {
        Self::with_transport(name, credentials, Arc::new(HttpTransport::new()))
    }

    /// Create a bucket client with an injected transport.
    pub fn with_transport(
        name: impl Into<String>,
        credentials: Option<Credentials>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let name = name.into();
        let base_url = format!("{}/{}", AMAZON_S3_BASE, aws_urlquote(&name));
        Self {
            name,
            base_url,
            credentials,
            transport,
        }
    }

    /// Override the base URL (scheme + host prefix, e.g.
    /// `http://johnsmith.s3.amazonaws.com`). A trailing slash is
    /// stripped; key paths always join with exactly one `/`.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Bucket name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build the target URL for a key and query args.
    ///
    /// `arg_sep` separates the query pairs: `;` for listing-style
    /// calls, `&` for authenticated URLs. Names and values are
    /// query-encoded; the key keeps its `/` separators.
    pub fn make_url(&self, key: Option<&str>, args: &[(&str, String)], arg_sep: char) -> String {
        let mut url = String::with_capacity(self.base_url.len() + 64);
        url.push_str(&self.base_url);
        url.push('/');
        if let Some(key) = key {
            url.push_str(&aws_urlquote(key));
        }
        if !args.is_empty() {
            url.push('?');
            let mut first = true;
            for (name, value) in args {
                if !first {
                    url.push(arg_sep);
                }
                first = false;
                url.push_str(&url_encode(name));
                url.push('=');
                url.push_str(&url_encode(value));
            }
        }
        url
    }

    /// Assemble a signed request.
    ///
    /// The caller's header map is never mutated; the copy gains, in
    /// order: `Content-MD5` (when a payload is present and the header
    /// absent), `Date` (RFC-1123 GMT), and `Authorization` (unless
    /// supplied). Reader payloads are hashed in bounded chunks and
    /// rewound.
    pub fn new_request(
        &self,
        method: &str,
        key: Option<&str>,
        args: &[(&str, String)],
        payload: Option<&mut Payload>,
        headers: &Headers,
        subresource: Option<&str>,
    ) -> Result<SignedRequest> {
        let mut headers = headers.clone();
        if let Some(payload) = payload {
            if !headers.contains("Content-MD5") {
                headers.insert("Content-MD5", payload.content_md5()?);
            }
        }
        if !headers.contains("Date") {
            headers.insert("Date", http_date(Utc::now()));
        }
        if !headers.contains("Authorization") {
            let creds = self.credentials.as_ref().ok_or(Error::MissingCredentials)?;
            let mut resource = canonicalized_resource(&self.name, key);
            if let Some(sub) = subresource {
                resource.push('?');
                resource.push_str(sub);
            }
            let description = string_to_sign(method, &headers, &resource);
            let signature = sign(&description, &creds.secret_key);
            headers.insert(
                "Authorization",
                format!("AWS {}:{}", creds.access_key, signature),
            );
        }
        Ok(SignedRequest {
            method: method.to_string(),
            url: self.make_url(key, args, ';'),
            headers,
        })
    }

    /// Send a request, retrying only on HTTP 500.
    ///
    /// Each attempt rebuilds and re-signs the request (the date
    /// changes) and rewinds reader payloads. 404 maps to
    /// [`Error::NotFound`]; any other non-2xx maps to
    /// [`Error::Remote`] with a best-effort message extracted from the
    /// body. All attempts returning 500 is an internal-invariant
    /// failure surfaced as [`Error::RetriesExhausted`].
    pub fn request(
        &self,
        method: &str,
        key: Option<&str>,
        args: &[(&str, String)],
        mut payload: Option<Payload>,
        headers: &Headers,
    ) -> Result<TransportResponse> {
        for attempt in 1..=MAX_ATTEMPTS {
            let req = self.new_request(method, key, args, payload.as_mut(), headers, None)?;
            tracing::debug!(method, url = %req.url, attempt, "sending request");
            let response =
                self.transport
                    .send(&req.method, &req.url, &req.headers, payload.as_mut())?;
            if response.status == 500 {
                tracing::warn!(url = %req.url, attempt, "S3 returned HTTP 500, retrying");
                continue;
            }
            if (200..300).contains(&response.status) {
                return Ok(response);
            }
            if response.status == 404 {
                return Err(Error::NotFound {
                    key: key.unwrap_or_default().to_string(),
                });
            }
            return Err(remote_error(response, &req.url));
        }
        Err(Error::RetriesExhausted {
            attempts: MAX_ATTEMPTS,
        })
    }

    /// Fetch an object. The body is a stream; header-derived info is
    /// parsed eagerly.
    pub fn get(&self, key: &str) -> Result<Object> {
        let response = self.request("GET", Some(key), &[], None, &Headers::new())?;
        Ok(Object {
            info: ObjectInfo::from_headers(&response.headers),
            body: response.body,
        })
    }

    /// HEAD an object and parse its headers.
    pub fn info(&self, key: &str) -> Result<ObjectInfo> {
        let response = self.request("HEAD", Some(key), &[], None, &Headers::new())?;
        Ok(ObjectInfo::from_headers(&response.headers))
    }

    /// Whether the key exists (HEAD with 404 mapped to `false`).
    pub fn exists(&self, key: &str) -> Result<bool> {
        match self.info(key) {
            Ok(_) => Ok(true),
            Err(Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Store an object.
    pub fn put(&self, key: &str, payload: impl Into<Payload>, options: &PutOptions) -> Result<()> {
        let payload = payload.into();
        let mut headers = options.headers.clone();
        headers.insert(
            "Content-Type",
            options
                .mimetype
                .clone()
                .unwrap_or_else(|| DEFAULT_MIMETYPE.to_string()),
        );
        for (name, value) in &options.metadata {
            headers.insert(format!("X-AMZ-Meta-{name}"), value.clone());
        }
        if let Some(acl) = &options.acl {
            headers.insert("X-AMZ-ACL", acl.clone());
        }
        headers.insert("Content-Length", payload.len().to_string());
        self.request("PUT", Some(key), &[], Some(payload), &headers)?;
        Ok(())
    }

    /// Server-side copy `source` (`<bucket>/<key>` form) to `key` in
    /// this bucket.
    pub fn copy(&self, source: &str, key: &str, options: &CopyOptions) -> Result<()> {
        let mut headers = Headers::new();
        headers.insert(
            "Content-Type",
            options
                .mimetype
                .clone()
                .unwrap_or_else(|| DEFAULT_MIMETYPE.to_string()),
        );
        headers.insert("X-AMZ-Copy-Source", source);
        if let Some(acl) = &options.acl {
            headers.insert("X-AMZ-ACL", acl.clone());
        }
        match &options.metadata {
            Some(metadata) => {
                headers.insert("X-AMZ-Metadata-Directive", "REPLACE");
                for (name, value) in metadata {
                    headers.insert(format!("X-AMZ-Meta-{name}"), value.clone());
                }
            }
            None => headers.insert("X-AMZ-Metadata-Directive", "COPY"),
        }
        self.request("PUT", Some(key), &[], None, &headers)?;
        Ok(())
    }

    /// Delete an object. Any 2xx counts as success (S3 answers with
    /// 204 No Content); 404 surfaces as [`Error::NotFound`].
    pub fn delete(&self, key: &str) -> Result<()> {
        self.request("DELETE", Some(key), &[], None, &Headers::new())?;
        Ok(())
    }

    /// Create this bucket, optionally with a location configuration
    /// document and a canned ACL.
    pub fn put_bucket(&self, config_xml: Option<&str>, acl: Option<&str>) -> Result<()> {
        let mut headers = Headers::new();
        let payload = match config_xml {
            Some(xml) => {
                headers.insert("Content-Type", "text/xml");
                headers.insert("Content-Length", xml.len().to_string());
                Some(Payload::from(xml.to_string()))
            }
            None => {
                headers.insert("Content-Length", "0");
                None
            }
        };
        if let Some(acl) = acl {
            headers.insert("X-AMZ-ACL", acl);
        }
        self.request("PUT", None, &[], payload, &headers)?;
        Ok(())
    }

    /// Delete this bucket (must be empty).
    pub fn delete_bucket(&self) -> Result<()> {
        self.request("DELETE", None, &[], None, &Headers::new())?;
        Ok(())
    }

    /// List bucket contents lazily.
    ///
    /// Issues one GET with the present options as query parameters and
    /// returns an iterator that parses `<Contents>` blocks from the
    /// response stream as they arrive. The iterator is finite and
    /// restartable per call, not resumable mid-iteration.
    pub fn listdir(&self, options: &ListOptions) -> Result<ListDir> {
        let mut args: Vec<(&str, String)> = Vec::new();
        if let Some(prefix) = &options.prefix {
            args.push(("prefix", prefix.clone()));
        }
        if let Some(marker) = &options.marker {
            args.push(("marker", marker.clone()));
        }
        if let Some(limit) = options.limit {
            args.push(("max-keys", limit.to_string()));
        }
        if let Some(delimiter) = &options.delimiter {
            args.push(("delimiter", delimiter.clone()));
        }
        let response = self.request("GET", None, &args, None, &Headers::new())?;
        Ok(ListDir::new(response.body))
    }

    /// Public (unauthenticated) URL for a key.
    pub fn url_for(&self, key: &str) -> String {
        self.make_url(Some(key), &[], ';')
    }

    /// Time-limited, query-string-authenticated URL for a key.
    ///
    /// Signs the reduced description `GET\n\n\n<expires>\n<resource>`
    /// (no AMZ block, no subresource, no trailing newline) and appends
    /// the `AWSAccessKeyId`/`Expires`/`Signature` triple joined by `&`.
    pub fn url_for_authed(&self, key: &str, expiry: Expiry) -> Result<String> {
        self.url_for_authed_at(key, expiry, Utc::now())
    }

    pub(crate) fn url_for_authed_at(
        &self,
        key: &str,
        expiry: Expiry,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let creds = self.credentials.as_ref().ok_or(Error::MissingCredentials)?;
        let expires = expiry.resolve(now).to_string();
        let description = format!(
            "GET\n\n\n{}\n{}",
            expires,
            canonicalized_resource(&self.name, Some(key)),
        );
        let signature = sign(&description, &creds.secret_key);
        let args = [
            ("AWSAccessKeyId", creds.access_key.clone()),
            ("Expires", expires),
            ("Signature", signature),
        ];
        Ok(self.make_url(Some(key), &args, '&'))
    }
}

/// Build a `Remote` error from a non-2xx response, extracting the S3
/// `<Message>` element from the body when it reads as text. A body
/// read failure becomes the `read_error` diagnostic rather than
/// replacing the error.
fn remote_error(mut response: TransportResponse, url: &str) -> Error {
    let mut body = String::new();
    let mut message = None;
    let mut read_error = None;
    match response.body.read_to_string(&mut body) {
        Ok(_) => message = extract_message(&body),
        Err(e) => read_error = Some(e.to_string()),
    }
    Error::Remote {
        status: response.status,
        reason: response.reason,
        url: url.to_string(),
        message,
        read_error,
    }
}

/// First 100 characters of the `<Message>` element, `...` appended
/// when truncated.
fn extract_message(body: &str) -> Option<String> {
    let begin = body.find("<Message>")? + "<Message>".len();
    let end = body.find("</Message>")?;
    if end < begin {
        return None;
    }
    let full = &body[begin..end];
    let mut message: String = full.chars().take(100).collect();
    if full.chars().count() > 100 {
        message.push_str("...");
    }
    Some(message)
}
