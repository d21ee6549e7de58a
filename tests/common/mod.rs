//! Scripted mock transport shared by the integration tests
#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::io::{Cursor, Read};
use std::sync::Mutex;

use s3lite::{Headers, Payload, Result, Transport, TransportResponse};

/// One canned response, dequeued per request in script order.
pub struct CannedResponse {
    pub status: u16,
    pub reason: &'static str,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl CannedResponse {
    pub fn new(status: u16, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }
}

/// What the client actually sent, for assertions.
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Transport that replays a response script and records every request.
pub struct MockTransport {
    responses: Mutex<VecDeque<CannedResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new(script: Vec<CannedResponse>) -> Self {
        Self {
            responses: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> std::sync::MutexGuard<'_, Vec<RecordedRequest>> {
        self.requests.lock().unwrap()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Transport for MockTransport {
    fn send(
        &self,
        method: &str,
        url: &str,
        headers: &Headers,
        body: Option<&mut Payload>,
    ) -> Result<TransportResponse> {
        let recorded_body = match body {
            Some(payload) => {
                payload.rewind()?;
                Some(payload.to_bytes()?.to_vec())
            }
            None => None,
        };
        self.requests.lock().unwrap().push(RecordedRequest {
            method: method.to_string(),
            url: url.to_string(),
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            body: recorded_body,
        });

        let canned = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("mock transport script exhausted");
        Ok(TransportResponse {
            status: canned.status,
            reason: canned.reason.to_string(),
            headers: canned.headers,
            body: Box::new(Cursor::new(canned.body)),
        })
    }
}

/// A response body whose read calls always fail, for exercising the
/// read-error diagnostic path.
pub struct FailingBody;

impl Read for FailingBody {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset while reading body",
        ))
    }
}

/// Transport that answers every request with the given status and an
/// unreadable body.
pub struct BrokenBodyTransport {
    pub status: u16,
    pub reason: &'static str,
}

impl Transport for BrokenBodyTransport {
    fn send(
        &self,
        _method: &str,
        _url: &str,
        _headers: &Headers,
        _body: Option<&mut Payload>,
    ) -> Result<TransportResponse> {
        Ok(TransportResponse {
            status: self.status,
            reason: self.reason.to_string(),
            headers: BTreeMap::new(),
            body: Box::new(FailingBody),
        })
    }
}
