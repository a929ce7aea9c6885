//! Plain HTTP/1.1 client with `Content-Length` framed bodies
//!
//! Response heads are parsed with `httparse` once the blank line ending
//! them is buffered; nothing is drained until the whole body has arrived.

use super::buffer::{drain, find, lossy, parse_decimal};
use super::{ParseResult, Protocol};
use crate::ProtocolError;
use crate::metrics::StatsSink;
use crate::operation::Operation;
use bytes::BytesMut;
use itoa::Buffer;

/// Read state of the HTTP parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpState {
    Idle,
    WaitingForHttp,
    /// Status line buffered, waiting for the rest of the head
    WaitingForHttpLen,
    /// Head parsed, waiting for `total` bytes (head plus body)
    WaitingForHttpBody { content_length: usize, total: usize },
}

impl HttpState {
    pub fn name(self) -> &'static str {
        match self {
            HttpState::Idle => "IDLE",
            HttpState::WaitingForHttp => "WAITING_FOR_HTTP",
            HttpState::WaitingForHttpLen => "WAITING_FOR_HTTP_LEN",
            HttpState::WaitingForHttpBody { .. } => "WAITING_FOR_HTTP_BODY",
        }
    }
}

/// Generic HTTP GET/POST protocol
#[derive(Debug)]
pub struct HttpProtocol {
    state: HttpState,
}

impl HttpProtocol {
    pub fn new() -> Self {
        Self {
            state: HttpState::Idle,
        }
    }

    pub fn state(&self) -> HttpState {
        self.state
    }
}

impl Default for HttpProtocol {
    fn default() -> Self {
        Self::new()
    }
}

const MAX_HEADERS: usize = 64;

/// Status and one looked-up header of a complete response head
#[derive(Debug)]
pub(crate) struct ResponseHead<'a> {
    /// Bytes up to and including the blank line
    pub len: usize,
    pub code: u16,
    pub reason: &'a str,
    pub value: Option<&'a [u8]>,
}

impl ResponseHead<'_> {
    /// `code reason`, for error messages
    pub fn status(&self) -> String {
        format!("{} {}", self.code, self.reason)
    }
}

/// Parse the response head at the front of `buf`, looking up `header`.
///
/// Returns `None` until the blank line ending the head is buffered.
pub(crate) fn parse_head<'a>(
    buf: &'a [u8],
    header: &str,
) -> Result<Option<ResponseHead<'a>>, ProtocolError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    let httparse::Status::Complete(len) = response.parse(buf)? else {
        return Ok(None);
    };

    let value = response
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(header))
        .map(|h| h.value);
    Ok(Some(ResponseHead {
        len,
        code: response.code.unwrap_or(0),
        reason: response.reason.unwrap_or(""),
        value,
    }))
}

impl Protocol for HttpProtocol {
    fn encode_get(
        &mut self,
        out: &mut BytesMut,
        key: &str,
        _value_len: usize,
        _op: &mut Operation,
    ) -> Result<usize, ProtocolError> {
        let start = out.len();
        out.extend_from_slice(b"GET /");
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(b" HTTP/1.1\r\n\r\n");

        if self.state == HttpState::Idle {
            self.state = HttpState::WaitingForHttp;
        }
        Ok(out.len() - start)
    }

    fn encode_set(
        &mut self,
        out: &mut BytesMut,
        key: &str,
        value: &[u8],
        _op: &mut Operation,
    ) -> Result<usize, ProtocolError> {
        let start = out.len();
        let mut itoa_buf = Buffer::new();
        out.extend_from_slice(b"POST /");
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(b" HTTP/1.1\r\nContent-Length: ");
        out.extend_from_slice(itoa_buf.format(value.len() + 6).as_bytes());
        out.extend_from_slice(
            b"\r\nContent-Type: application/x-www-form-urlencoded\r\n\r\nvalue=",
        );
        out.extend_from_slice(value);

        if self.state == HttpState::Idle {
            self.state = HttpState::WaitingForHttp;
        }
        Ok(out.len() - start)
    }

    fn resume_parse(
        &mut self,
        input: &mut BytesMut,
        _op: &mut Operation,
        stats: &dyn StatsSink,
    ) -> Result<ParseResult, ProtocolError> {
        loop {
            match self.state {
                HttpState::Idle => {
                    if input.is_empty() {
                        return Ok(ParseResult::NeedMoreData);
                    }
                    return Err(ProtocolError::UnsolicitedData(self.state.name()));
                }
                HttpState::WaitingForHttp => {
                    if find(input, b"\r\n").is_none() {
                        return Ok(ParseResult::NeedMoreData);
                    }
                    self.state = HttpState::WaitingForHttpLen;
                }
                HttpState::WaitingForHttpLen => {
                    let Some(head) = parse_head(input, "content-length")? else {
                        return Ok(ParseResult::NeedMoreData);
                    };
                    let miss = match head.code {
                        200 => false,
                        404 => true,
                        _ => return Err(ProtocolError::UnexpectedStatus(head.status())),
                    };

                    let value = head.value.ok_or(ProtocolError::MissingContentLength)?;
                    let content_length: usize = parse_decimal(value)
                        .ok_or_else(|| ProtocolError::InvalidLength(lossy(value)))?;
                    let total = head.len.checked_add(content_length).ok_or_else(|| {
                        ProtocolError::InvalidLength(format!("body of {content_length} bytes"))
                    })?;

                    if miss {
                        stats.inc_get_misses();
                    }
                    self.state = HttpState::WaitingForHttpBody {
                        content_length,
                        total,
                    };
                }
                HttpState::WaitingForHttpBody { total, .. } => {
                    if input.len() < total {
                        return Ok(ParseResult::NeedMoreData);
                    }
                    drain(input, total, stats);
                    self.state = HttpState::WaitingForHttp;
                    return Ok(ParseResult::Complete);
                }
            }
        }
    }

    fn state_name(&self) -> &'static str {
        self.state.name()
    }

    fn name(&self) -> &'static str {
        "http"
    }

    fn reset(&mut self) {
        self.state = HttpState::Idle;
    }
}
