//! Transport capability and the default blocking HTTP implementation
//!
//! The client core never talks HTTP directly: it hands a fully signed
//! request to a [`Transport`] injected at construction time and gets
//! back a status, headers, and a readable body stream. The bundled
//! [`HttpTransport`] wraps `reqwest::blocking`; tests and restricted
//! environments supply their own implementation instead.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};
use std::time::Duration;

use bytes::Bytes;

use crate::sign::{aws_md5, aws_md5_reader};
use crate::types::{Error, Headers, Result};

/// A rewindable reader, suitable for re-sending across retries.
pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// Adapter so a `dyn ReadSeek` can feed generic `Read + Seek` helpers.
struct DynReader<'a>(&'a mut dyn ReadSeek);

impl Read for DynReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl Seek for DynReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.0.seek(pos)
    }
}

/// A request body: either a fixed byte buffer or a streaming,
/// re-readable source with a known length.
pub enum Payload {
    /// Fixed buffer; cheap to clone per attempt.
    Bytes(Bytes),
    /// Rewindable stream, hashed and sent in bounded chunks.
    Reader {
        reader: Box<dyn ReadSeek>,
        len: u64,
    },
}

impl Payload {
    /// Wrap a rewindable reader with its total length.
    pub fn from_reader(reader: impl ReadSeek + 'static, len: u64) -> Self {
        Payload::Reader {
            reader: Box::new(reader),
            len,
        }
    }

    /// Body length in bytes.
    pub fn len(&self) -> u64 {
        match self {
            Payload::Bytes(b) => b.len() as u64,
            Payload::Reader { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// AWS-style Content-MD5 of the body. Reader payloads are hashed in
    /// 8 KiB chunks and rewound to the start afterwards.
    pub fn content_md5(&mut self) -> std::io::Result<String> {
        match self {
            Payload::Bytes(b) => Ok(aws_md5(b)),
            Payload::Reader { reader, .. } => aws_md5_reader(&mut DynReader(reader.as_mut())),
        }
    }

    /// Seek reader payloads back to the start so the body can be sent
    /// (again). Buffer payloads need no rewinding.
    pub fn rewind(&mut self) -> std::io::Result<()> {
        match self {
            Payload::Bytes(_) => Ok(()),
            Payload::Reader { reader, .. } => reader.seek(SeekFrom::Start(0)).map(|_| ()),
        }
    }

    /// Materialize the body as bytes. For buffers this is a cheap
    /// clone; reader payloads are drained (callers rewind first).
    pub fn to_bytes(&mut self) -> std::io::Result<Bytes> {
        match self {
            Payload::Bytes(b) => Ok(b.clone()),
            Payload::Reader { reader, len } => {
                let mut buf = Vec::with_capacity(*len as usize);
                reader.read_to_end(&mut buf)?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Payload::Reader { len, .. } => f.debug_struct("Reader").field("len", len).finish(),
        }
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Payload::Bytes(b)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(v))
    }
}

impl From<&'static [u8]> for Payload {
    fn from(s: &'static [u8]) -> Self {
        Payload::Bytes(Bytes::from_static(s))
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Bytes(Bytes::from(s))
    }
}

/// What a transport hands back: status line pieces, lower-cased
/// headers, and the body as a stream the caller reads incrementally.
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// HTTP reason phrase (may be empty)
    pub reason: String,
    /// Response headers, names lower-cased
    pub headers: BTreeMap<String, String>,
    /// Response body stream
    pub body: Box<dyn Read + Send>,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// The capability the client core consumes: one blocking HTTP exchange.
///
/// Implementations must support at least GET, HEAD, PUT and DELETE, and
/// must be reentrant if the client is shared between call sites.
pub trait Transport: Send + Sync {
    /// Perform one exchange. A non-2xx status is a normal return, not
    /// an error; `Err` is reserved for failures to complete the
    /// exchange at all.
    fn send(
        &self,
        method: &str,
        url: &str,
        headers: &Headers,
        body: Option<&mut Payload>,
    ) -> Result<TransportResponse>;
}

/// Default transport backed by `reqwest::blocking`.
///
/// Reader payloads are buffered into memory per attempt; supply a
/// custom transport if true streaming uploads are required.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Build with a 300 second request timeout.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(300))
    }

    /// Build with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client");
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        method: &str,
        url: &str,
        headers: &Headers,
        body: Option<&mut Payload>,
    ) -> Result<TransportResponse> {
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|e| Error::Transport(Box::new(e)))?;

        let mut req = self.client.request(method, url);
        for (name, value) in headers.iter() {
            req = req.header(name, value);
        }
        if let Some(payload) = body {
            payload.rewind()?;
            let len = payload.len();
            let bytes = payload.to_bytes()?;
            req = req.body(reqwest::blocking::Body::sized(
                std::io::Cursor::new(bytes),
                len,
            ));
        }

        let response = req.send().map_err(|e| Error::Transport(Box::new(e)))?;

        let status = response.status();
        let reason = status.canonical_reason().unwrap_or_default().to_string();
        let mut header_map = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                header_map.insert(name.as_str().to_ascii_lowercase(), v.to_string());
            }
        }

        Ok(TransportResponse {
            status: status.as_u16(),
            reason,
            headers: header_map,
            body: Box::new(response),
        })
    }
}
