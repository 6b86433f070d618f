//! Framed stream transport
//!
//! PDUs are self-delimiting via the `frag_length` field of the header, so
//! any ordered byte stream carries them.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, RpcError};
use crate::pdu::{Pdu, PduHeader};

/// Default maximum PDU size
pub const DEFAULT_MAX_PDU_SIZE: usize = 65536;

/// Offset of `frag_length` in the header
const FRAG_LENGTH_OFFSET: usize = 4;

/// Reads and writes whole PDUs over a byte stream
pub struct FrameTransport<T> {
    inner: T,
    max_pdu_size: usize,
    read_buf: BytesMut,
}

impl<T> FrameTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            max_pdu_size: DEFAULT_MAX_PDU_SIZE,
            read_buf: BytesMut::with_capacity(8192),
        }
    }

    pub fn with_max_pdu_size(mut self, max_size: usize) -> Self {
        self.max_pdu_size = max_size;
        self
    }

    pub fn max_pdu_size(&self) -> usize {
        self.max_pdu_size
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: AsyncRead + Unpin> FrameTransport<T> {
    /// Read the raw bytes of one PDU
    pub async fn read_frame(&mut self) -> Result<Bytes> {
        // First, read enough for the header
        while self.read_buf.len() < PduHeader::SIZE {
            if self.fill_buf().await? == 0 {
                if self.read_buf.is_empty() {
                    return Err(RpcError::ConnectionClosed);
                }
                return Err(RpcError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "incomplete PDU header",
                )));
            }
        }

        // Peek the total length without consuming the header
        let frag_length = (&self.read_buf[FRAG_LENGTH_OFFSET..]).get_u32_le() as usize;
        if frag_length < PduHeader::SIZE {
            return Err(RpcError::InvalidPdu(format!(
                "fragment length {} is shorter than the header",
                frag_length
            )));
        }
        if frag_length > self.max_pdu_size {
            return Err(RpcError::PduTooLarge {
                size: frag_length,
                max: self.max_pdu_size,
            });
        }

        // Read the rest of the PDU; later PDUs stay buffered
        while self.read_buf.len() < frag_length {
            if self.fill_buf().await? == 0 {
                return Err(RpcError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "incomplete PDU: expected {} bytes, got {}",
                        frag_length,
                        self.read_buf.len()
                    ),
                )));
            }
        }

        Ok(self.read_buf.split_to(frag_length).freeze())
    }

    /// Read and decode one PDU
    pub async fn read_pdu(&mut self) -> Result<Pdu> {
        let frame = self.read_frame().await?;
        Pdu::decode(&frame)
    }

    async fn fill_buf(&mut self) -> Result<usize> {
        if self.read_buf.capacity() - self.read_buf.len() < 4096 {
            self.read_buf.reserve(8192);
        }
        Ok(self.inner.read_buf(&mut self.read_buf).await?)
    }
}

impl<T: AsyncWrite + Unpin> FrameTransport<T> {
    /// Encode and write one PDU
    pub async fn write_pdu(&mut self, pdu: &Pdu) -> Result<()> {
        let data = pdu.encode();
        if data.len() > self.max_pdu_size {
            return Err(RpcError::PduTooLarge {
                size: data.len(),
                max: self.max_pdu_size,
            });
        }
        self.inner.write_all(&data).await?;
        self.inner.flush().await?;
        Ok(())
    }
}
