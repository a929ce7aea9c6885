//! Fixed-layout binary headers
//!
//! Two layouts are used by the binary protocol:
//!
//! - [`BlockHeader`]: block-storage command framing, host byte order, whose
//!   `magic` field carries the header's own size. Servers that pack a
//!   kernel `bio_vec` after the token use the 40-byte variant.
//! - [`McHeader`]: the 24-byte memcached binary header, network byte order,
//!   used for the classic framing and the SASL handshake.

use bytes::{Buf, BufMut};

/// Block protocol opcodes
pub const BLK_CMD_GET: u16 = 0x00;
pub const BLK_CMD_SET: u16 = 0x01;

/// Memcached binary opcodes
pub const CMD_GET: u8 = 0x00;
pub const CMD_SET: u8 = 0x01;
pub const CMD_SASL_AUTH: u8 = 0x21;

/// Memcached binary response status codes
pub const RESP_OK: u16 = 0x00;
pub const RESP_SASL_ERR: u16 = 0x20;

pub const REQUEST_MAGIC: u8 = 0x80;
pub const RESPONSE_MAGIC: u8 = 0x81;

/// Opaque kernel `bio_vec` slot some servers reserve after the token
pub const BVEC_HANDLE_SIZE: usize = 16;

/// Block-storage command header, shared by requests and responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub magic: u16,
    pub opcode: u16,
    pub request_token: u64,
    pub lba: u64,
    pub block_count: u32,
}

impl BlockHeader {
    /// Packed size on the wire
    pub const SIZE: usize = 2 + 2 + 8 + 8 + 4;

    /// Packed size with the reserved `bio_vec` slot
    pub const SIZE_WITH_BVEC: usize = Self::SIZE + BVEC_HANDLE_SIZE;

    pub fn new(opcode: u16, request_token: u64, lba: u64, block_count: u32) -> Self {
        Self {
            magic: Self::SIZE as u16,
            opcode,
            request_token,
            lba,
            block_count,
        }
    }

    /// Reserve the `bio_vec` slot; `magic` grows to match
    #[must_use]
    pub fn with_bvec_handle(mut self) -> Self {
        self.magic = Self::SIZE_WITH_BVEC as u16;
        self
    }

    pub fn has_bvec_handle(&self) -> bool {
        usize::from(self.magic) == Self::SIZE_WITH_BVEC
    }

    /// Encoded size of this header
    pub fn wire_size(&self) -> usize {
        if self.has_bvec_handle() {
            Self::SIZE_WITH_BVEC
        } else {
            Self::SIZE
        }
    }

    pub fn encode(&self, out: &mut impl BufMut) {
        out.put_u16_ne(self.magic);
        out.put_u16_ne(self.opcode);
        out.put_u64_ne(self.request_token);
        if self.has_bvec_handle() {
            out.put_bytes(0, BVEC_HANDLE_SIZE);
        }
        out.put_u64_ne(self.lba);
        out.put_u32_ne(self.block_count);
    }

    /// Decode a header from the front of `buf`, if enough bytes are present.
    ///
    /// The layout follows `magic`: a magic equal to [`Self::SIZE_WITH_BVEC`]
    /// means the `bio_vec` slot is present; anything else is read as the
    /// packed layout and left for the caller to reject.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < 2 {
            return None;
        }
        let magic = u16::from_ne_bytes([buf[0], buf[1]]);
        let size = if usize::from(magic) == Self::SIZE_WITH_BVEC {
            Self::SIZE_WITH_BVEC
        } else {
            Self::SIZE
        };
        if buf.len() < size {
            return None;
        }

        let mut b = &buf[2..size];
        let opcode = b.get_u16_ne();
        let request_token = b.get_u64_ne();
        if size == Self::SIZE_WITH_BVEC {
            b.advance(BVEC_HANDLE_SIZE);
        }
        Some(Self {
            magic,
            opcode,
            request_token,
            lba: b.get_u64_ne(),
            block_count: b.get_u32_ne(),
        })
    }
}

/// Memcached binary protocol header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct McHeader {
    pub magic: u8,
    pub opcode: u8,
    pub key_len: u16,
    pub extra_len: u8,
    pub data_type: u8,
    /// vbucket id in requests, status in responses
    pub vbucket_or_status: u16,
    pub body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl McHeader {
    pub const SIZE: usize = 24;

    pub fn request(opcode: u8, key_len: u16, extra_len: u8, body_len: u32) -> Self {
        Self {
            magic: REQUEST_MAGIC,
            opcode,
            key_len,
            extra_len,
            body_len,
            ..Self::default()
        }
    }

    pub fn status(&self) -> u16 {
        self.vbucket_or_status
    }

    pub fn encode(&self, out: &mut impl BufMut) {
        out.put_u8(self.magic);
        out.put_u8(self.opcode);
        out.put_u16(self.key_len);
        out.put_u8(self.extra_len);
        out.put_u8(self.data_type);
        out.put_u16(self.vbucket_or_status);
        out.put_u32(self.body_len);
        out.put_u32(self.opaque);
        out.put_u64(self.cas);
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        let mut b = &buf[..Self::SIZE];
        Some(Self {
            magic: b.get_u8(),
            opcode: b.get_u8(),
            key_len: b.get_u16(),
            extra_len: b.get_u8(),
            data_type: b.get_u8(),
            vbucket_or_status: b.get_u16(),
            body_len: b.get_u32(),
            opaque: b.get_u32(),
            cas: b.get_u64(),
        })
    }
}
