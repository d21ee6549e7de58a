//! AWS Signature V2 canonicalization and signing
//!
//! Pure helpers shared by header-based request signing and query-string
//! (pre-signed URL) authentication: AMZ header canonicalization, the
//! string-to-sign layout, HMAC-SHA1 + base64 signatures, AWS-style MD5
//! digests, and URL quoting.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::types::Headers;

type HmacSha1 = Hmac<Sha1>;

/// Hex lookup table for percent encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// RFC-1123 date layout with a literal GMT zone, as S3 expects it
pub const HTTP_DATE_FMT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Listing timestamp layout: ISO-8601 with `.000Z` milliseconds-and-zone
const ISO8601_FMT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Canonicalize AMZ headers in that certain AWS way.
///
/// Header names are lower-cased and only `x-amz-*` ones kept; repeated
/// headers have their values comma-joined in supply order; the resulting
/// names are sorted bytewise ascending and emitted as `name:value\n`
/// lines. No `x-amz-*` headers at all yields the empty string.
pub fn amz_canonicalize(headers: &Headers) -> String {
    let mut grouped: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for (name, value) in headers.iter() {
        let name = name.to_ascii_lowercase();
        if name.starts_with("x-amz-") {
            grouped.entry(name).or_default().push(value);
        }
    }
    let mut out = String::new();
    for (name, values) in &grouped {
        out.push_str(name);
        out.push(':');
        out.push_str(&values.join(","));
        out.push('\n');
    }
    out
}

/// The resource part of the string-to-sign: `/<bucket>/<key-or-empty>`,
/// both URL-quoted. An absent key leaves the trailing slash, which is
/// what bucket-level operations sign.
pub fn canonicalized_resource(bucket: &str, key: Option<&str>) -> String {
    let mut res = String::from("/");
    res.push_str(&aws_urlquote(bucket));
    res.push('/');
    if let Some(key) = key {
        res.push_str(&aws_urlquote(key));
    }
    res
}

/// Build the full SigV2 string-to-sign for a header-authenticated
/// request. `resource` is the canonicalized resource, with any
/// `?subresource` suffix already appended by the caller.
///
/// The Content-MD5, Content-Type and Date lines are empty strings when
/// the header is absent; the newline count never varies.
pub fn string_to_sign(method: &str, headers: &Headers, resource: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}{}",
        method,
        headers.get("Content-MD5").unwrap_or(""),
        headers.get("Content-Type").unwrap_or(""),
        headers.get("Date").unwrap_or(""),
        amz_canonicalize(headers),
        resource,
    )
}

/// AWS-style sign data: HMAC-SHA1 over the UTF-8 description, keyed by
/// the secret key, base64-encoded. The base64 engine emits no line
/// breaks, so the signature is a single line as S3 requires.
pub fn sign(description: &str, secret_key: &str) -> String {
    let mut mac =
        HmacSha1::new_from_slice(secret_key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(description.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// AWS-style MD5 hash: raw digest, base64, no trailing newline.
pub fn aws_md5(data: &[u8]) -> String {
    let digest = md5::compute(data);
    BASE64.encode(&digest[..])
}

/// AWS-style MD5 of a rewindable reader.
///
/// Hashes in 8 KiB chunks so the payload is never materialized just for
/// the digest, then seeks back to the start so the same reader can be
/// sent as the request body.
pub fn aws_md5_reader<R: Read + Seek + ?Sized>(reader: &mut R) -> std::io::Result<String> {
    let mut ctx = md5::Context::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        ctx.consume(&chunk[..n]);
    }
    reader.seek(SeekFrom::Start(0))?;
    Ok(BASE64.encode(&ctx.compute()[..]))
}

/// AWS-style quote a URL path part, preserving forward slashes.
///
/// Returns `Cow::Borrowed` when nothing needs encoding (the common
/// case, zero allocation).
pub fn aws_urlquote(value: &str) -> Cow<'_, str> {
    let needs_encoding = value
        .bytes()
        .any(|b| !matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/'));

    if !needs_encoding {
        return Cow::Borrowed(value);
    }

    let mut result = String::with_capacity(value.len() + 32);
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                result.push(byte as char);
            }
            _ => {
                result.push('%');
                result.push(HEX_UPPER[(byte >> 4) as usize] as char);
                result.push(HEX_UPPER[(byte & 0xf) as usize] as char);
            }
        }
    }
    Cow::Owned(result)
}

/// Encode a string for use as a URL query parameter name or value
/// (RFC 3986; encodes `/` too, unlike [`aws_urlquote`]).
pub fn url_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 16);
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push('%');
                result.push(HEX_UPPER[(byte >> 4) as usize] as char);
                result.push(HEX_UPPER[(byte & 0xf) as usize] as char);
            }
        }
    }
    result
}

/// Format a timestamp as an RFC-1123 `Date` header value in GMT.
pub fn http_date(t: DateTime<Utc>) -> String {
    t.format(HTTP_DATE_FMT).to_string()
}

/// Parse an RFC-1123 header value (`Date`, `Last-Modified`).
pub fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Parse a listing `<LastModified>` timestamp.
pub fn parse_iso8601(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, ISO8601_FMT)
        .ok()
        .map(|n| n.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs.iter().map(|&(n, v)| (n, v)).collect()
    }

    #[test]
    fn canonicalize_sorts_and_lowercases() {
        let h = headers(&[
            ("X-AMZ-Second", "hello"),
            ("x-amz-first", "test"),
            ("Content-Type", "text/plain"),
        ]);
        assert_eq!(
            amz_canonicalize(&h),
            "x-amz-first:test\nx-amz-second:hello\n"
        );
    }

    #[test]
    fn canonicalize_joins_repeated_values_in_supply_order() {
        let h = headers(&[("x-amz-meta-tag", "b"), ("X-AMZ-Meta-Tag", "a")]);
        assert_eq!(amz_canonicalize(&h), "x-amz-meta-tag:b,a\n");
    }

    #[test]
    fn canonicalize_empty_input_yields_empty_string() {
        assert_eq!(amz_canonicalize(&Headers::new()), "");
        let h = headers(&[("Content-Type", "text/plain")]);
        assert_eq!(amz_canonicalize(&h), "");
    }

    #[test]
    fn canonicalize_is_idempotent_under_recanonicalization() {
        let h = headers(&[("x-amz-b", "2"), ("x-amz-a", "1")]);
        let once = amz_canonicalize(&h);
        let again: Headers = once
            .lines()
            .map(|line| {
                let (n, v) = line.split_once(':').unwrap();
                (n, v)
            })
            .collect();
        assert_eq!(amz_canonicalize(&again), once);
    }

    #[test]
    fn canonicalized_resource_shapes() {
        assert_eq!(canonicalized_resource("b", None), "/b/");
        assert_eq!(canonicalized_resource("b", Some("k")), "/b/k");
        assert_eq!(
            canonicalized_resource("bucket", Some("a key")),
            "/bucket/a%20key"
        );
    }

    #[test]
    fn string_to_sign_has_fixed_newline_count() {
        let desc = string_to_sign("GET", &Headers::new(), "/b/");
        assert_eq!(desc, "GET\n\n\n\n/b/");
        let h = headers(&[("Date", "Tue, 27 Mar 2007 19:36:42 +0000")]);
        let desc = string_to_sign("GET", &h, "/johnsmith/photos/puppy.jpg");
        assert_eq!(desc.matches('\n').count(), 4);
    }

    #[test]
    fn sign_matches_aws_documentation_fixture() {
        // Example Object GET from the S3 Developer Guide.
        let desc = "GET\n\n\nTue, 27 Mar 2007 19:36:42 +0000\n/johnsmith/photos/puppy.jpg";
        let sig = sign(desc, "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY");
        assert_eq!(sig, "bWq2s1WEIj+Ydj0vQ697zp+IXMU=");
    }

    #[test]
    fn sign_is_deterministic_and_newline_free() {
        let a = sign("GET\n\n\n\n/b/", "secret");
        let b = sign("GET\n\n\n\n/b/", "secret");
        assert_eq!(a, b);
        assert!(!a.contains('\n'));
    }

    #[test]
    fn aws_md5_fixture() {
        assert_eq!(aws_md5(b"Hello!"), "lS0sVtBIWVgzZ0e83ZhZDQ==");
        assert!(!aws_md5(b"Hello!").ends_with('\n'));
    }

    #[test]
    fn aws_md5_reader_matches_buffer_and_rewinds() {
        let mut cursor = std::io::Cursor::new(b"Hello!".to_vec());
        let digest = aws_md5_reader(&mut cursor).unwrap();
        assert_eq!(digest, aws_md5(b"Hello!"));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn urlquote_preserves_slashes() {
        assert_eq!(aws_urlquote("/bucket/a key"), "/bucket/a%20key");
        assert_eq!(aws_urlquote("/bucket/\u{e5}der"), "/bucket/%C3%A5der");
        assert!(matches!(aws_urlquote("plain/path"), Cow::Borrowed(_)));
    }

    #[test]
    fn url_encode_encodes_slash_and_equals() {
        assert_eq!(url_encode("a/b=c"), "a%2Fb%3Dc");
        assert_eq!(url_encode("rucSbH0yNEcP9oM2XNlouVI3BH4="), "rucSbH0yNEcP9oM2XNlouVI3BH4%3D");
    }

    #[test]
    fn http_date_round_trip() {
        let t = Utc.with_ymd_and_hms(2007, 3, 27, 19, 36, 42).unwrap();
        let formatted = http_date(t);
        assert_eq!(formatted, "Tue, 27 Mar 2007 19:36:42 GMT");
        assert_eq!(parse_http_date(&formatted), Some(t));
    }

    #[test]
    fn iso8601_listing_timestamp() {
        let t = parse_iso8601("2009-10-12T17:50:30.000Z").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2009, 10, 12, 17, 50, 30).unwrap());
        assert!(parse_iso8601("not a date").is_none());
    }
}
