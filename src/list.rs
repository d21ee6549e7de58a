//! Streaming parser for `ListBucketResult` responses
//!
//! Reads the response body incrementally through a buffered quick-xml
//! reader and yields one [`ListingEntry`] per complete `<Contents>`
//! block, so arbitrarily large listings never sit in memory at once.
//! `<Contents>` blocks may span read boundaries; `<Owner>` sub-blocks
//! are skipped.

use std::io::{BufReader, Read};

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::sign::parse_iso8601;
use crate::types::{Error, ListingEntry, Result};

/// Read chunk size for the response stream
const READ_BUF_SIZE: usize = 4096;

/// Lazy iterator over bucket listing entries.
///
/// Finite: ends when the response stream does. A malformed
/// `<Contents>` block is a fatal parse error and stops iteration;
/// entries yielded before the failure remain valid.
pub struct ListDir {
    reader: Reader<BufReader<Box<dyn Read + Send>>>,
    buf: Vec<u8>,
    done: bool,
}

impl ListDir {
    pub(crate) fn new(body: Box<dyn Read + Send>) -> Self {
        let mut reader = Reader::from_reader(BufReader::with_capacity(READ_BUF_SIZE, body));
        reader.config_mut().trim_text_start = true;
        reader.config_mut().trim_text_end = true;
        Self {
            reader,
            buf: Vec::with_capacity(READ_BUF_SIZE),
            done: false,
        }
    }

    /// Parse events until one `<Contents>` block completes or the
    /// document ends.
    fn read_entry(&mut self) -> Result<Option<ListingEntry>> {
        let mut in_contents = false;
        let mut in_owner = false;
        let mut key: Option<String> = None;
        let mut last_modified = None;
        let mut etag: Option<String> = None;
        let mut size: Option<u64> = None;
        let mut text = String::with_capacity(256);

        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf) {
                Ok(Event::Start(e)) => match e.local_name().as_ref() {
                    b"Contents" => in_contents = true,
                    b"Owner" if in_contents => in_owner = true,
                    _ => {}
                },
                Ok(Event::Text(e)) => {
                    let unescaped = e
                        .unescape()
                        .map_err(|e| Error::Parse(format!("bad character data: {e}")))?;
                    text.clear();
                    text.push_str(&unescaped);
                }
                Ok(Event::End(e)) => {
                    match e.local_name().as_ref() {
                        b"Owner" => in_owner = false,
                        b"Key" if in_contents && !in_owner => {
                            key = Some(std::mem::take(&mut text));
                        }
                        b"LastModified" if in_contents && !in_owner => {
                            last_modified = Some(parse_iso8601(&text).ok_or_else(|| {
                                Error::Parse(format!("bad LastModified timestamp: {text:?}"))
                            })?);
                        }
                        b"ETag" if in_contents && !in_owner => {
                            etag = Some(std::mem::take(&mut text));
                        }
                        b"Size" if in_contents && !in_owner => {
                            size = Some(text.parse().map_err(|_| {
                                Error::Parse(format!("bad Size value: {text:?}"))
                            })?);
                        }
                        b"Contents" => {
                            return match (key.take(), last_modified.take(), etag.take(), size.take()) {
                                (Some(key), Some(last_modified), Some(etag), Some(size)) => {
                                    Ok(Some(ListingEntry {
                                        key,
                                        last_modified,
                                        etag,
                                        size,
                                    }))
                                }
                                _ => Err(Error::Parse(
                                    "incomplete <Contents> block in listing".to_string(),
                                )),
                            };
                        }
                        _ => {}
                    }
                    text.clear();
                }
                Ok(Event::Eof) => return Ok(None),
                Err(e) => return Err(Error::Parse(e.to_string())),
                _ => {}
            }
        }
    }
}

impl Iterator for ListDir {
    type Item = Result<ListingEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl std::fmt::Debug for ListDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListDir")
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
