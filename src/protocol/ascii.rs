//! Memcached ASCII protocol client
//!
//! Requests: `get <key>\r\n` and `set <key> 0 0 <len>\r\n<value>\r\n`.
//! Responses: `VALUE <key> <flags> <len>\r\n<data>\r\n`, `END\r\n`, `STORED\r\n`.

use super::buffer::{drain, lossy, parse_decimal, take_line};
use super::{ParseResult, Protocol};
use crate::ProtocolError;
use crate::metrics::StatsSink;
use crate::operation::Operation;
use bytes::BytesMut;
use itoa::Buffer;
use tracing::trace;

/// Read state of the ASCII parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsciiState {
    Idle,
    WaitingForGet,
    WaitingForEnd,
    /// A `VALUE` line announced `len` bytes of data
    WaitingForGetData { len: usize },
}

impl AsciiState {
    pub fn name(self) -> &'static str {
        match self {
            AsciiState::Idle => "IDLE",
            AsciiState::WaitingForGet => "WAITING_FOR_GET",
            AsciiState::WaitingForEnd => "WAITING_FOR_END",
            AsciiState::WaitingForGetData { .. } => "WAITING_FOR_GET_DATA",
        }
    }
}

/// Memcached text protocol
#[derive(Debug)]
pub struct AsciiProtocol {
    state: AsciiState,
}

impl AsciiProtocol {
    pub fn new() -> Self {
        Self {
            state: AsciiState::Idle,
        }
    }

    pub fn state(&self) -> AsciiState {
        self.state
    }
}

impl Default for AsciiProtocol {
    fn default() -> Self {
        Self::new()
    }
}

/// Data length from `VALUE <key> <flags> <bytes> [<cas>]`
fn value_length(line: &[u8]) -> Result<usize, ProtocolError> {
    line.split(|&b| b == b' ')
        .filter(|part| !part.is_empty())
        .nth(3)
        .and_then(parse_decimal)
        .ok_or_else(|| ProtocolError::InvalidLength(lossy(line)))
}

impl Protocol for AsciiProtocol {
    fn encode_get(
        &mut self,
        out: &mut BytesMut,
        key: &str,
        _value_len: usize,
        _op: &mut Operation,
    ) -> Result<usize, ProtocolError> {
        let start = out.len();
        out.extend_from_slice(b"get ");
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(b"\r\n");

        if self.state == AsciiState::Idle {
            self.state = AsciiState::WaitingForGet;
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
        out.extend_from_slice(b"set ");
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(b" 0 0 ");
        out.extend_from_slice(itoa_buf.format(value.len()).as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(value);
        out.extend_from_slice(b"\r\n");

        if self.state == AsciiState::Idle {
            self.state = AsciiState::WaitingForEnd;
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
                AsciiState::Idle => {
                    if input.is_empty() {
                        return Ok(ParseResult::NeedMoreData);
                    }
                    return Err(ProtocolError::UnsolicitedData(self.state.name()));
                }
                AsciiState::WaitingForGet | AsciiState::WaitingForEnd => {
                    let Some(line) = take_line(input, stats) else {
                        return Ok(ParseResult::NeedMoreData);
                    };

                    if &line[..] == b"END" {
                        if self.state == AsciiState::WaitingForGet {
                            stats.inc_get_misses();
                        }
                        self.state = AsciiState::WaitingForGet;
                        return Ok(ParseResult::Complete);
                    } else if &line[..] == b"STORED" {
                        self.state = AsciiState::WaitingForGet;
                        return Ok(ParseResult::Complete);
                    } else if line.starts_with(b"VALUE ") {
                        let len = value_length(&line)?;
                        trace!(len, "VALUE announced");
                        self.state = AsciiState::WaitingForGetData { len };
                    } else {
                        return Err(ProtocolError::UnexpectedLine(lossy(&line)));
                    }
                }
                AsciiState::WaitingForGetData { len } => {
                    // Payload plus trailing \r\n
                    let total = len.checked_add(2).ok_or_else(|| {
                        ProtocolError::InvalidLength(format!("value data of {len} bytes"))
                    })?;
                    if input.len() < total {
                        return Ok(ParseResult::NeedMoreData);
                    }
                    if &input[len..total] != b"\r\n" {
                        return Err(ProtocolError::InvalidLength(format!(
                            "value data of {len} bytes not terminated by CRLF"
                        )));
                    }
                    drain(input, total, stats);
                    self.state = AsciiState::WaitingForEnd;
                }
            }
        }
    }

    fn state_name(&self) -> &'static str {
        self.state.name()
    }

    fn name(&self) -> &'static str {
        "memcached-ascii"
    }

    fn reset(&mut self) {
        self.state = AsciiState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ConnectionStats;
    use crate::operation::OpKind;
    use crate::protocol::testing::feed;

    fn pending_get() -> (AsciiProtocol, Operation) {
        let mut proto = AsciiProtocol::new();
        let mut op = Operation::new(OpKind::Get, "foo");
        let mut out = BytesMut::new();
        proto.encode_get(&mut out, "foo", 0, &mut op).unwrap();
        (proto, op)
    }

    #[test]
    fn test_encode_get() {
        let mut proto = AsciiProtocol::new();
        let mut op = Operation::new(OpKind::Get, "foo");
        let mut out = BytesMut::new();

        let n = proto.encode_get(&mut out, "foo", 0, &mut op).unwrap();
        assert_eq!(&out[..], b"get foo\r\n");
        assert_eq!(n, out.len());
        assert_eq!(proto.state(), AsciiState::WaitingForGet);
    }

    #[test]
    fn test_encode_set() {
        let mut proto = AsciiProtocol::new();
        let mut op = Operation::new(OpKind::Set, "foo");
        let mut out = BytesMut::new();

        let n = proto.encode_set(&mut out, "foo", b"hello", &mut op).unwrap();
        assert_eq!(&out[..], b"set foo 0 0 5\r\nhello\r\n");
        assert_eq!(n, out.len());
        assert_eq!(proto.state(), AsciiState::WaitingForEnd);
    }

    #[test]
    fn test_pipelined_encode_keeps_pending_state() {
        let (mut proto, mut op) = pending_get();
        let mut out = BytesMut::new();
        proto.encode_set(&mut out, "bar", b"x", &mut op).unwrap();
        assert_eq!(proto.state(), AsciiState::WaitingForGet);
    }

    #[test]
    fn test_value_then_end() {
        let (mut proto, mut op) = pending_get();
        let stats = ConnectionStats::new();
        let mut input = BytesMut::from(&b"VALUE k 0 3\r\nabc\r\nEND\r\n"[..]);

        let result = proto.resume_parse(&mut input, &mut op, &stats).unwrap();
        assert_eq!(result, ParseResult::Complete);
        assert_eq!(proto.state(), AsciiState::WaitingForGet);
        assert!(input.is_empty());
        assert_eq!(stats.get_misses(), 0);
        assert_eq!(stats.rx_bytes(), 23);
    }

    #[test]
    fn test_end_alone_is_a_miss() {
        let (mut proto, mut op) = pending_get();
        let stats = ConnectionStats::new();
        let mut input = BytesMut::from(&b"END\r\n"[..]);

        let result = proto.resume_parse(&mut input, &mut op, &stats).unwrap();
        assert_eq!(result, ParseResult::Complete);
        assert_eq!(stats.get_misses(), 1);
    }

    #[test]
    fn test_stored() {
        let mut proto = AsciiProtocol::new();
        let mut op = Operation::new(OpKind::Set, "foo");
        let mut out = BytesMut::new();
        proto.encode_set(&mut out, "foo", b"v", &mut op).unwrap();

        let stats = ConnectionStats::new();
        let mut input = BytesMut::from(&b"STORED\r\n"[..]);
        let result = proto.resume_parse(&mut input, &mut op, &stats).unwrap();
        assert_eq!(result, ParseResult::Complete);
        assert_eq!(proto.state(), AsciiState::WaitingForGet);
        assert_eq!(stats.get_misses(), 0);
    }

    #[test]
    fn test_multi_value_get() {
        let (mut proto, mut op) = pending_get();
        let stats = ConnectionStats::new();
        let mut input =
            BytesMut::from(&b"VALUE a 0 1\r\nx\r\nVALUE b 5 2\r\nyz\r\nEND\r\n"[..]);

        let result = proto.resume_parse(&mut input, &mut op, &stats).unwrap();
        assert_eq!(result, ParseResult::Complete);
        assert!(input.is_empty());
        assert_eq!(stats.get_misses(), 0);
    }

    #[test]
    fn test_byte_at_a_time_matches_whole() {
        let wire = b"VALUE k 0 3\r\nabc\r\nEND\r\nEND\r\n";

        let (mut whole, mut op) = pending_get();
        let whole_stats = ConnectionStats::new();
        let expected = feed(&mut whole, wire, wire.len(), &mut op, &whole_stats);

        let (mut split, mut op) = pending_get();
        let split_stats = ConnectionStats::new();
        let actual = feed(&mut split, wire, 1, &mut op, &split_stats);

        assert_eq!(expected, vec![ParseResult::Complete, ParseResult::Complete]);
        assert_eq!(actual, expected);
        assert_eq!(split_stats.rx_bytes(), whole_stats.rx_bytes());
        assert_eq!(split_stats.rx_bytes(), wire.len() as u64);
        assert_eq!(split_stats.get_misses(), 1);
    }

    #[test]
    fn test_partial_data_preserves_state() {
        let (mut proto, mut op) = pending_get();
        let stats = ConnectionStats::new();
        let mut input = BytesMut::from(&b"VALUE k 0 3\r\nab"[..]);

        let result = proto.resume_parse(&mut input, &mut op, &stats).unwrap();
        assert_eq!(result, ParseResult::NeedMoreData);
        assert_eq!(proto.state(), AsciiState::WaitingForGetData { len: 3 });
        assert_eq!(&input[..], b"ab");
    }

    #[test]
    fn test_empty_buffer_after_completion() {
        let (mut proto, mut op) = pending_get();
        let stats = ConnectionStats::new();
        let mut input = BytesMut::from(&b"END\r\n"[..]);
        proto.resume_parse(&mut input, &mut op, &stats).unwrap();

        let result = proto.resume_parse(&mut input, &mut op, &stats).unwrap();
        assert_eq!(result, ParseResult::NeedMoreData);
        assert_eq!(proto.state(), AsciiState::WaitingForGet);
        assert_eq!(stats.rx_bytes(), 5);
    }

    #[test]
    fn test_unknown_line_is_fatal() {
        let (mut proto, mut op) = pending_get();
        let stats = ConnectionStats::new();
        let mut input = BytesMut::from(&b"SERVER_ERROR out of memory\r\n"[..]);

        match proto.resume_parse(&mut input, &mut op, &stats) {
            Err(ProtocolError::UnexpectedLine(line)) => {
                assert_eq!(line, "SERVER_ERROR out of memory");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_value_line() {
        let (mut proto, mut op) = pending_get();
        let stats = ConnectionStats::new();
        let mut input = BytesMut::from(&b"VALUE k 0\r\n"[..]);

        assert!(matches!(
            proto.resume_parse(&mut input, &mut op, &stats),
            Err(ProtocolError::InvalidLength(_))
        ));
    }

    #[test]
    fn test_value_length_overflow() {
        let (mut proto, mut op) = pending_get();
        let stats = ConnectionStats::new();
        let wire = format!("VALUE k 0 {}\r\nabc", usize::MAX);
        let mut input = BytesMut::from(wire.as_bytes());

        assert!(matches!(
            proto.resume_parse(&mut input, &mut op, &stats),
            Err(ProtocolError::InvalidLength(_))
        ));
        assert_eq!(&input[..], b"abc");
    }

    #[test]
    fn test_unsolicited_data_when_idle() {
        let mut proto = AsciiProtocol::new();
        let mut op = Operation::new(OpKind::Get, "foo");
        let stats = ConnectionStats::new();

        let mut empty = BytesMut::new();
        assert_eq!(
            proto.resume_parse(&mut empty, &mut op, &stats).unwrap(),
            ParseResult::NeedMoreData
        );

        let mut input = BytesMut::from(&b"END\r\n"[..]);
        assert!(matches!(
            proto.resume_parse(&mut input, &mut op, &stats),
            Err(ProtocolError::UnsolicitedData("IDLE"))
        ));
    }
}
