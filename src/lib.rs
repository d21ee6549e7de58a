//! s3lite - minimal synchronous Amazon S3 client
//!
//! Builds AWS Signature V2 signed requests, sends them through an
//! injected blocking [`Transport`], and parses XML/header responses
//! into simple typed values. One request at a time, no background
//! work; bucket listings stream lazily instead of buffering the whole
//! response.
//!
//! ```no_run
//! use s3lite::{Bucket, Credentials, ListOptions, PutOptions};
//!
//! let bucket = Bucket::new("my-bucket", Some(Credentials::new("AKIA...", "secret")));
//!
//! bucket.put("hello.txt", b"Hello!".as_slice(), &PutOptions::default())?;
//! for entry in bucket.listdir(&ListOptions::default())? {
//!     let entry = entry?;
//!     println!("{} {} bytes", entry.key, entry.size);
//! }
//! bucket.delete("hello.txt")?;
//! # Ok::<(), s3lite::Error>(())
//! ```

pub mod bucket;
pub mod list;
pub mod sign;
pub mod transport;
pub mod types;

pub use bucket::{Bucket, CopyOptions, Expiry, ListOptions, Object, PutOptions, SignedRequest};
pub use list::ListDir;
pub use transport::{HttpTransport, Payload, Transport, TransportResponse};
pub use types::{Credentials, Error, Headers, ListingEntry, ObjectInfo, Result};
