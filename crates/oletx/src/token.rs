//! Propagation token layout
//!
//! ```text
//! offset  size  field
//!      0     4  dwVersionMin
//!      4     4  dwVersionMax
//!      8    16  guidTx (COM byte order)
//!     24     *  provider-specific continuation data
//! ```
//!
//! Tokens are produced by the resource that promoted the transaction and
//! are only ever read here.

use bytes::Buf;
use uuid::Uuid;

use crate::error::{OletxError, Result};

/// Minimum length of a propagation token
pub const TOKEN_HEADER_SIZE: usize = 24;

/// Offset of the transaction identifier inside a token
pub const TRANSACTION_ID_OFFSET: usize = 8;

/// Read a GUID stored in COM byte order (little-endian first three fields)
pub fn decode_guid<B: Buf>(buf: &mut B) -> Uuid {
    let data1 = buf.get_u32_le();
    let data2 = buf.get_u16_le();
    let data3 = buf.get_u16_le();
    let mut data4 = [0u8; 8];
    buf.copy_to_slice(&mut data4);
    Uuid::from_fields(data1, data2, data3, &data4)
}

/// Fixed header of a propagation token
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenHeader {
    /// Minimum supported protocol version
    pub version_min: u32,
    /// Maximum supported protocol version
    pub version_max: u32,
    /// Distributed transaction identifier
    pub transaction_id: Uuid,
}

impl TokenHeader {
    /// Parse the fixed header of a token
    pub fn parse(token: &[u8]) -> Result<Self> {
        if token.len() < TOKEN_HEADER_SIZE {
            return Err(OletxError::MalformedToken {
                needed: TOKEN_HEADER_SIZE,
                have: token.len(),
            });
        }

        let mut buf = &token[..TOKEN_HEADER_SIZE];
        let version_min = buf.get_u32_le();
        let version_max = buf.get_u32_le();
        let transaction_id = decode_guid(&mut buf);

        Ok(Self {
            version_min,
            version_max,
            transaction_id,
        })
    }
}

/// Extract the distributed transaction identifier from a propagation token
pub fn extract_transaction_id(token: &[u8]) -> Result<Uuid> {
    TokenHeader::parse(token).map(|header| header.transaction_id)
}
