//! Backend protocols
//!
//! Each protocol encodes requests into an outbound buffer and decodes
//! responses incrementally from a receive buffer. Parsing is resumable:
//! when a response is incomplete the parser returns
//! [`ParseResult::NeedMoreData`] and picks up exactly where it stopped on
//! the next call, never re-reading bytes it already drained.

pub mod ascii;
pub mod binary;
pub(crate) mod buffer;
pub mod etcd;
pub mod http;
pub mod wire;

pub use ascii::{AsciiProtocol, AsciiState};
pub use binary::{BinaryProtocol, HandleTable};
pub use etcd::{EtcdProtocol, EtcdState};
pub use http::{HttpProtocol, HttpState};

use crate::ProtocolError;
use crate::config::{Config, ProtocolKind};
use crate::group::ServerHandle;
use crate::metrics::StatsSink;
use crate::operation::{Operation, RequestHandle};
use bytes::BytesMut;

/// Outcome of one resume-parse call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseResult {
    /// Response incomplete; state preserved
    NeedMoreData,
    /// One response consumed for the operation at the head of the queue
    Complete,
    /// One response consumed for the operation holding this handle
    Matched(RequestHandle),
}

impl ParseResult {
    pub fn is_complete(self) -> bool {
        !matches!(self, ParseResult::NeedMoreData)
    }
}

/// Capability contract shared by every backend protocol
pub trait Protocol {
    /// Append a get request to `out`, returning the bytes written
    fn encode_get(
        &mut self,
        out: &mut BytesMut,
        key: &str,
        value_len: usize,
        op: &mut Operation,
    ) -> Result<usize, ProtocolError>;

    /// Append a set request to `out`, returning the bytes written
    fn encode_set(
        &mut self,
        out: &mut BytesMut,
        key: &str,
        value: &[u8],
        op: &mut Operation,
    ) -> Result<usize, ProtocolError>;

    /// Write the connection handshake, if any.
    ///
    /// Returns true when no handshake is outstanding.
    fn setup_connection(&mut self, _out: &mut BytesMut) -> bool {
        true
    }

    /// Consume the handshake reply. Returns `Ok(false)` until it is complete.
    fn finish_setup(
        &mut self,
        _input: &mut BytesMut,
        _stats: &dyn StatsSink,
    ) -> Result<bool, ProtocolError> {
        Ok(true)
    }

    /// Try to consume exactly one complete response from `input`
    fn resume_parse(
        &mut self,
        input: &mut BytesMut,
        op: &mut Operation,
        stats: &dyn StatsSink,
    ) -> Result<ParseResult, ProtocolError>;

    /// Current read state, for diagnostics
    fn state_name(&self) -> &'static str;

    /// Protocol name
    fn name(&self) -> &'static str;

    /// Return to the idle state, forgetting any pending response
    fn reset(&mut self);
}

/// The closed set of supported protocols
#[derive(Debug)]
pub enum AnyProtocol {
    Ascii(AsciiProtocol),
    Binary(BinaryProtocol),
    Etcd(EtcdProtocol),
    Http(HttpProtocol),
}

impl AnyProtocol {
    /// Build the protocol selected by `config` for a connection to `server`
    pub fn from_config(config: &Config, server: ServerHandle) -> Self {
        match config.protocol.kind {
            ProtocolKind::Ascii => AnyProtocol::Ascii(AsciiProtocol::new()),
            ProtocolKind::Binary => {
                AnyProtocol::Binary(BinaryProtocol::new(&config.binary, config.sasl.clone()))
            }
            ProtocolKind::Etcd => {
                AnyProtocol::Etcd(EtcdProtocol::new(server, config.etcd.linearizable))
            }
            ProtocolKind::Http => AnyProtocol::Http(HttpProtocol::new()),
        }
    }
}

macro_rules! dispatch {
    ($self:expr, $p:ident => $call:expr) => {
        match $self {
            AnyProtocol::Ascii($p) => $call,
            AnyProtocol::Binary($p) => $call,
            AnyProtocol::Etcd($p) => $call,
            AnyProtocol::Http($p) => $call,
        }
    };
}

impl Protocol for AnyProtocol {
    fn encode_get(
        &mut self,
        out: &mut BytesMut,
        key: &str,
        value_len: usize,
        op: &mut Operation,
    ) -> Result<usize, ProtocolError> {
        dispatch!(self, p => p.encode_get(out, key, value_len, op))
    }

    fn encode_set(
        &mut self,
        out: &mut BytesMut,
        key: &str,
        value: &[u8],
        op: &mut Operation,
    ) -> Result<usize, ProtocolError> {
        dispatch!(self, p => p.encode_set(out, key, value, op))
    }

    fn setup_connection(&mut self, out: &mut BytesMut) -> bool {
        dispatch!(self, p => p.setup_connection(out))
    }

    fn finish_setup(
        &mut self,
        input: &mut BytesMut,
        stats: &dyn StatsSink,
    ) -> Result<bool, ProtocolError> {
        dispatch!(self, p => p.finish_setup(input, stats))
    }

    fn resume_parse(
        &mut self,
        input: &mut BytesMut,
        op: &mut Operation,
        stats: &dyn StatsSink,
    ) -> Result<ParseResult, ProtocolError> {
        dispatch!(self, p => p.resume_parse(input, op, stats))
    }

    fn state_name(&self) -> &'static str {
        dispatch!(self, p => p.state_name())
    }

    fn name(&self) -> &'static str {
        dispatch!(self, p => p.name())
    }

    fn reset(&mut self) {
        dispatch!(self, p => p.reset())
    }
}
