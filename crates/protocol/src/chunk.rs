//! Encoded video chunks as exposed by insertable streams, and the single-byte
//! bitrate-model opcode.
//!
//! An insertable-streams frame carries `type` ("key" | "delta" | "empty"),
//! a timestamp and the encoded payload. The opcode is a raw binary message of
//! exactly one byte:
//! ```text
//! [0]  mode (u8) -- 0x01 standard model, 0x05 low-latency model, others raw
//! ```

use bytes::Bytes;

pub const OPCODE_LEN: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Key,
    Delta,
    /// Placeholder frame with no payload; never decoded.
    Empty,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Key => "key",
            Self::Delta => "delta",
            Self::Empty => "empty",
        }
    }
}

/// One encoded video frame pulled from a receiver stream.
///
/// The payload is reference counted so teeing a stream into two branches
/// never copies frame data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub kind: ChunkKind,
    pub timestamp_us: u64,
    pub data: Bytes,
}

impl EncodedChunk {
    pub fn new(kind: ChunkKind, timestamp_us: u64, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            timestamp_us,
            data: data.into(),
        }
    }

    pub fn key(timestamp_us: u64, data: impl Into<Bytes>) -> Self {
        Self::new(ChunkKind::Key, timestamp_us, data)
    }

    pub fn delta(timestamp_us: u64, data: impl Into<Bytes>) -> Self {
        Self::new(ChunkKind::Delta, timestamp_us, data)
    }

    pub fn is_key(&self) -> bool {
        self.kind == ChunkKind::Key
    }

    /// Validate that a chunk is decodable: non-empty kinds need a payload.
    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.kind != ChunkKind::Empty && self.data.is_empty() {
            return Err(ChunkError::EmptyPayload(self.kind.as_str()));
        }
        Ok(())
    }
}

/// Hint for the network-layer bitrate model on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitrateModel(pub u8);

impl BitrateModel {
    /// Restores the standard model after congestion clears.
    pub const STANDARD: Self = Self(0x01);
    /// Low-bitrate model used while the decoder is under pressure.
    pub const LOW_LATENCY: Self = Self(0x05);

    /// Build from an arbitrary integer; only the low 8 bits are kept.
    pub fn from_raw(mode: u32) -> Self {
        Self((mode & 0xFF) as u8)
    }

    pub fn serialize(&self) -> [u8; OPCODE_LEN] {
        [self.0]
    }
}

impl std::fmt::Display for BitrateModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("{0} chunk has an empty payload")]
    EmptyPayload(&'static str),
}
