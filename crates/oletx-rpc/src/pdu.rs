//! Proxy RPC protocol data units
//!
//! Every PDU is a fixed 20-byte little-endian header followed by the body:
//!
//! ```text
//!  0      1      2      3      4             8             12     14     16            20
//! ┌──────┬──────┬──────┬──────┬─────────────┬─────────────┬──────┬──────┬─────────────┐
//! │ vers │ type │flags │ rsvd │ frag_length │   call_id   │opnum │ rsvd │   status    │
//! └──────┴──────┴──────┴──────┴─────────────┴─────────────┴──────┴──────┴─────────────┘
//! ```
//!
//! `frag_length` counts the header and the body. `status` is non-zero only
//! in fault PDUs.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, RpcError};

/// Protocol version carried in every header
pub const PROTOCOL_VERSION: u8 = 1;

/// Packet flags
pub mod flags {
    /// First fragment
    pub const FIRST_FRAG: u8 = 0x01;
    /// Last fragment
    pub const LAST_FRAG: u8 = 0x02;
    /// Unfragmented PDU
    pub const COMPLETE: u8 = FIRST_FRAG | LAST_FRAG;
}

/// Fault status codes raised by the RPC layer itself
pub mod fault {
    /// Operation number out of range
    pub const OP_RNG_ERROR: u32 = 0x1c010002;
    /// Request body could not be decoded
    pub const BAD_STUB_DATA: u32 = 0x000006f7;
}

/// PDU types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PduType {
    Request = 0,
    Response = 2,
    Fault = 3,
}

impl PduType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Request),
            2 => Some(Self::Response),
            3 => Some(Self::Fault),
            _ => None,
        }
    }
}

/// Fixed PDU header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduHeader {
    pub version: u8,
    pub pdu_type: PduType,
    pub flags: u8,
    /// Total length of the PDU, header included
    pub frag_length: u32,
    pub call_id: u32,
    pub opnum: u16,
    /// Fault status, zero otherwise
    pub status: u32,
}

impl PduHeader {
    /// Header size in bytes
    pub const SIZE: usize = 20;

    pub fn new(pdu_type: PduType, call_id: u32, opnum: u16) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            pdu_type,
            flags: flags::COMPLETE,
            frag_length: 0,
            call_id,
            opnum,
            status: 0,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.pdu_type as u8);
        buf.put_u8(self.flags);
        buf.put_u8(0);
        buf.put_u32_le(self.frag_length);
        buf.put_u32_le(self.call_id);
        buf.put_u16_le(self.opnum);
        buf.put_u16_le(0);
        buf.put_u32_le(self.status);
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(RpcError::BufferUnderflow {
                needed: Self::SIZE,
                have: data.len(),
            });
        }

        let mut buf = data;
        let version = buf.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(RpcError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }

        let raw_type = buf.get_u8();
        let pdu_type = PduType::from_u8(raw_type).ok_or(RpcError::UnknownPduType(raw_type))?;
        let flags = buf.get_u8();
        let _reserved = buf.get_u8();
        let frag_length = buf.get_u32_le();
        let call_id = buf.get_u32_le();
        let opnum = buf.get_u16_le();
        let _reserved = buf.get_u16_le();
        let status = buf.get_u32_le();

        Ok(Self {
            version,
            pdu_type,
            flags,
            frag_length,
            call_id,
            opnum,
            status,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.flags & flags::COMPLETE == flags::COMPLETE
    }
}

/// A complete PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub header: PduHeader,
    pub body: Bytes,
}

impl Pdu {
    pub fn request(call_id: u32, opnum: u16, body: Bytes) -> Self {
        Self {
            header: PduHeader::new(PduType::Request, call_id, opnum),
            body,
        }
    }

    pub fn response(call_id: u32, opnum: u16, body: Bytes) -> Self {
        Self {
            header: PduHeader::new(PduType::Response, call_id, opnum),
            body,
        }
    }

    pub fn fault(call_id: u32, opnum: u16, status: u32) -> Self {
        let mut header = PduHeader::new(PduType::Fault, call_id, opnum);
        header.status = status;
        Self {
            header,
            body: Bytes::new(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PduHeader::SIZE + self.body.len());
        let mut header = self.header.clone();
        header.frag_length = (PduHeader::SIZE + self.body.len()) as u32;
        header.encode(&mut buf);
        buf.put_slice(&self.body);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = PduHeader::decode(data)?;
        let frag_length = header.frag_length as usize;
        if frag_length < PduHeader::SIZE || frag_length > data.len() {
            return Err(RpcError::InvalidPdu(format!(
                "fragment length {} does not match {} bytes",
                frag_length,
                data.len()
            )));
        }
        if !header.is_complete() {
            return Err(RpcError::InvalidPdu(format!(
                "fragmented PDUs are not supported (flags 0x{:02x})",
                header.flags
            )));
        }

        let body = Bytes::copy_from_slice(&data[PduHeader::SIZE..frag_length]);
        Ok(Self { header, body })
    }
}
