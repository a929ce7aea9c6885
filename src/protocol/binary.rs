//! Binary protocol client
//!
//! The default framing issues block-storage commands: a [`BlockHeader`]
//! carrying a logical block address and block count, followed by the
//! payload for writes. Responses echo a correlation token that identifies
//! the originating request, so they may complete out of order.
//!
//! The classic memcached binary framing is available as an alternative and
//! is also what the optional SASL PLAIN handshake speaks.

use super::buffer::drain;
use super::wire::{
    BLK_CMD_GET, BLK_CMD_SET, BlockHeader, CMD_GET, CMD_SASL_AUTH, CMD_SET, McHeader, RESP_OK,
    RESPONSE_MAGIC,
};
use super::{ParseResult, Protocol};
use crate::ProtocolError;
use crate::config::{BinaryConfig, BinaryFraming, SaslConfig};
use crate::metrics::StatsSink;
use crate::operation::{Operation, RequestHandle};
use bytes::{BufMut, BytesMut};
use tracing::{debug, info, warn};

/// Per-connection allocator of correlation handles.
///
/// Handles are slot indices recycled through a free list; at most
/// `capacity` can be live at once.
#[derive(Debug)]
pub struct HandleTable {
    live: Vec<bool>,
    free: Vec<u32>,
    capacity: usize,
    in_use: usize,
}

impl HandleTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            live: Vec::new(),
            free: Vec::new(),
            capacity,
            in_use: 0,
        }
    }

    /// Take a free handle, or `None` when `capacity` handles are live
    pub fn allocate(&mut self) -> Option<RequestHandle> {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None if self.live.len() < self.capacity => {
                self.live.push(false);
                (self.live.len() - 1) as u32
            }
            None => return None,
        };
        self.live[slot as usize] = true;
        self.in_use += 1;
        Some(RequestHandle(slot))
    }

    /// Return the handle carried by `token` to the free list.
    ///
    /// Returns `None` if the token does not name a live handle.
    pub fn release(&mut self, token: u64) -> Option<RequestHandle> {
        let slot = u32::try_from(token).ok()?;
        let live = self.live.get_mut(slot as usize)?;
        if !*live {
            return None;
        }
        *live = false;
        self.free.push(slot);
        self.in_use -= 1;
        Some(RequestHandle(slot))
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn clear(&mut self) {
        self.live.clear();
        self.free.clear();
        self.in_use = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handshake {
    NotStarted,
    AwaitingReply,
    Done,
}

/// Binary protocol (block-storage or classic memcached framing)
#[derive(Debug)]
pub struct BinaryProtocol {
    framing: BinaryFraming,
    sector_size: usize,
    bvec_handle: bool,
    handles: HandleTable,
    sasl: Option<SaslConfig>,
    handshake: Handshake,
    /// Classic framing responses still expected
    outstanding: usize,
}

impl BinaryProtocol {
    pub fn new(config: &BinaryConfig, sasl: Option<SaslConfig>) -> Self {
        Self {
            framing: config.framing,
            sector_size: config.sector_size.max(1),
            bvec_handle: config.bvec_handle,
            handles: HandleTable::new(config.max_in_flight),
            sasl,
            handshake: Handshake::NotStarted,
            outstanding: 0,
        }
    }

    pub fn framing(&self) -> BinaryFraming {
        self.framing
    }

    /// Block header size this connection sends and expects
    fn header_size(&self) -> usize {
        if self.bvec_handle {
            BlockHeader::SIZE_WITH_BVEC
        } else {
            BlockHeader::SIZE
        }
    }

    /// Handles currently awaiting a response
    pub fn handles_in_use(&self) -> usize {
        self.handles.in_use()
    }

    fn encode_block(
        &mut self,
        out: &mut BytesMut,
        opcode: u16,
        key: &str,
        len: usize,
        op: &mut Operation,
    ) -> Result<(), ProtocolError> {
        let lba: u64 = key
            .trim()
            .parse()
            .map_err(|_| ProtocolError::InvalidBlockKey(key.to_string()))?;
        let block_count = u32::try_from(len / self.sector_size)
            .map_err(|_| ProtocolError::InvalidLength(format!("{len} bytes")))?;

        let Some(handle) = self.handles.allocate() else {
            warn!(capacity = self.handles.capacity, "out of request handles");
            return Err(ProtocolError::HandlesExhausted(self.handles.in_use()));
        };
        op.request_handle = Some(handle);

        let header = BlockHeader::new(opcode, handle.token(), lba, block_count);
        if self.bvec_handle {
            header.with_bvec_handle().encode(out);
        } else {
            header.encode(out);
        }
        Ok(())
    }

    fn encode_classic(
        &mut self,
        out: &mut BytesMut,
        opcode: u8,
        key: &str,
        value: Option<&[u8]>,
    ) -> Result<(), ProtocolError> {
        let key_len = u16::try_from(key.len())
            .map_err(|_| ProtocolError::InvalidLength(format!("key of {} bytes", key.len())))?;
        // flags + exptime precede the key on writes
        let extra_len: u8 = if value.is_some() { 8 } else { 0 };
        let body_len = key.len() + usize::from(extra_len) + value.map_or(0, <[u8]>::len);
        let body_len = u32::try_from(body_len)
            .map_err(|_| ProtocolError::InvalidLength(format!("body of {body_len} bytes")))?;

        McHeader::request(opcode, key_len, extra_len, body_len).encode(out);
        if value.is_some() {
            out.put_u64(0);
        }
        out.extend_from_slice(key.as_bytes());
        if let Some(value) = value {
            out.extend_from_slice(value);
        }
        self.outstanding += 1;
        Ok(())
    }

    fn parse_block(
        &mut self,
        input: &mut BytesMut,
        stats: &dyn StatsSink,
    ) -> Result<ParseResult, ProtocolError> {
        let Some(header) = BlockHeader::decode(input) else {
            return Ok(ParseResult::NeedMoreData);
        };

        let header_size = self.header_size();
        if usize::from(header.magic) != header_size {
            return Err(ProtocolError::BadMagic {
                expected: header_size as u16,
                found: header.magic,
            });
        }

        let target = match header.opcode {
            // Reads carry the requested blocks back
            BLK_CMD_GET => usize::try_from(header.block_count)
                .ok()
                .and_then(|count| count.checked_mul(self.sector_size))
                .and_then(|payload| payload.checked_add(header_size))
                .ok_or_else(|| {
                    ProtocolError::InvalidLength(format!(
                        "{} blocks of {} bytes",
                        header.block_count, self.sector_size
                    ))
                })?,
            BLK_CMD_SET => header_size,
            other => return Err(ProtocolError::UnknownOpcode(other)),
        };
        if input.len() < target {
            return Ok(ParseResult::NeedMoreData);
        }

        let handle = self
            .handles
            .release(header.request_token)
            .ok_or(ProtocolError::UnknownHandle(header.request_token))?;
        drain(input, target, stats);
        Ok(ParseResult::Matched(handle))
    }

    /// Consume one complete classic response, if buffered
    fn take_classic_response(
        &mut self,
        input: &mut BytesMut,
        stats: &dyn StatsSink,
    ) -> Result<Option<McHeader>, ProtocolError> {
        let Some(header) = McHeader::decode(input) else {
            return Ok(None);
        };
        if header.magic != RESPONSE_MAGIC {
            return Err(ProtocolError::BadMagic {
                expected: u16::from(RESPONSE_MAGIC),
                found: u16::from(header.magic),
            });
        }

        let target = McHeader::SIZE + header.body_len as usize;
        if input.len() < target {
            return Ok(None);
        }
        drain(input, target, stats);
        Ok(Some(header))
    }

    fn parse_classic(
        &mut self,
        input: &mut BytesMut,
        stats: &dyn StatsSink,
    ) -> Result<ParseResult, ProtocolError> {
        if self.outstanding == 0 {
            if input.is_empty() {
                return Ok(ParseResult::NeedMoreData);
            }
            return Err(ProtocolError::UnsolicitedData(self.state_name()));
        }

        let Some(header) = self.take_classic_response(input, stats)? else {
            return Ok(ParseResult::NeedMoreData);
        };
        match header.opcode {
            CMD_GET => {
                if header.status() != RESP_OK {
                    stats.inc_get_misses();
                }
            }
            CMD_SET => {}
            other => return Err(ProtocolError::UnknownOpcode(u16::from(other))),
        }
        self.outstanding -= 1;
        Ok(ParseResult::Complete)
    }
}

impl Protocol for BinaryProtocol {
    fn encode_get(
        &mut self,
        out: &mut BytesMut,
        key: &str,
        value_len: usize,
        op: &mut Operation,
    ) -> Result<usize, ProtocolError> {
        let start = out.len();
        match self.framing {
            BinaryFraming::Block => self.encode_block(out, BLK_CMD_GET, key, value_len, op)?,
            BinaryFraming::Memcached => self.encode_classic(out, CMD_GET, key, None)?,
        }
        Ok(out.len() - start)
    }

    fn encode_set(
        &mut self,
        out: &mut BytesMut,
        key: &str,
        value: &[u8],
        op: &mut Operation,
    ) -> Result<usize, ProtocolError> {
        let start = out.len();
        match self.framing {
            BinaryFraming::Block => {
                self.encode_block(out, BLK_CMD_SET, key, value.len(), op)?;
                out.extend_from_slice(value);
            }
            BinaryFraming::Memcached => self.encode_classic(out, CMD_SET, key, Some(value))?,
        }
        Ok(out.len() - start)
    }

    fn setup_connection(&mut self, out: &mut BytesMut) -> bool {
        let Some(sasl) = &self.sasl else {
            return true;
        };
        if self.handshake == Handshake::Done {
            return true;
        }

        let user = sasl.username.as_bytes();
        let pass = sasl.password.as_bytes();
        // "PLAIN\0" + user + "\0" + pass
        let body_len = (6 + user.len() + 1 + pass.len()) as u32;

        McHeader::request(CMD_SASL_AUTH, 5, 0, body_len).encode(out);
        out.extend_from_slice(b"PLAIN\0");
        out.extend_from_slice(user);
        out.put_u8(0);
        out.extend_from_slice(pass);

        debug!(username = %sasl.username, "sent SASL PLAIN auth");
        self.handshake = Handshake::AwaitingReply;
        false
    }

    fn finish_setup(
        &mut self,
        input: &mut BytesMut,
        stats: &dyn StatsSink,
    ) -> Result<bool, ProtocolError> {
        if self.sasl.is_none() || self.handshake == Handshake::Done {
            return Ok(true);
        }

        let Some(header) = self.take_classic_response(input, stats)? else {
            return Ok(false);
        };
        if header.opcode != CMD_SASL_AUTH {
            return Err(ProtocolError::UnknownOpcode(u16::from(header.opcode)));
        }
        if header.status() != RESP_OK {
            return Err(ProtocolError::SaslFailed(header.status()));
        }

        info!("SASL authentication succeeded");
        self.handshake = Handshake::Done;
        Ok(true)
    }

    fn resume_parse(
        &mut self,
        input: &mut BytesMut,
        _op: &mut Operation,
        stats: &dyn StatsSink,
    ) -> Result<ParseResult, ProtocolError> {
        match self.framing {
            BinaryFraming::Block => self.parse_block(input, stats),
            BinaryFraming::Memcached => self.parse_classic(input, stats),
        }
    }

    fn state_name(&self) -> &'static str {
        let pending = match self.framing {
            BinaryFraming::Block => self.handles.in_use(),
            BinaryFraming::Memcached => self.outstanding,
        };
        if pending == 0 {
            "IDLE"
        } else {
            "WAITING_FOR_RESPONSE"
        }
    }

    fn name(&self) -> &'static str {
        match self.framing {
            BinaryFraming::Block => "block-binary",
            BinaryFraming::Memcached => "memcached-binary",
        }
    }

    fn reset(&mut self) {
        self.handles.clear();
        self.outstanding = 0;
        self.handshake = Handshake::NotStarted;
    }
}
