//! Meta page structure and serialization.
//!
//! The meta page is the payload of the chunk stored in the reserved region at
//! offset 0. It identifies the file and records where the current root node
//! lives. It is rewritten in place on every flush.

use crate::storage::chunk::META_REGION_SIZE;
use crate::storage::codec::{CodecError, Decoder, Encoder};

/// Magic number identifying a tickdb file.
pub const MAGIC: u64 = 0xEF5D_2BCA;

/// Current format version.
pub const FORMAT_VERSION: u16 = 1;

/// Encoded size of the meta payload: magic, version, root position.
pub const META_PAYLOAD_SIZE: usize = 8 + 2 + 8;

/// Contents of the meta page.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Meta {
    /// Format version number.
    pub version: u16,
    /// File offset of the root node's chunk.
    pub root_position: u64,
}

impl Meta {
    /// Meta page for a fresh database whose root leaf sits right after the
    /// reserved region.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            version: FORMAT_VERSION,
            root_position: META_REGION_SIZE,
        }
    }

    /// Serialize to the meta chunk payload.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::with_capacity(META_PAYLOAD_SIZE);
        enc.put_u64(MAGIC);
        enc.put_u16(self.version);
        // Stored signed on disk; file offsets never approach i64::MAX.
        enc.put_i64(self.root_position as i64);
        enc.into_bytes()
    }

    /// Deserialize and validate a meta chunk payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, MetaError> {
        let mut dec = Decoder::new(bytes);

        let magic = dec.u64()?;
        if magic != MAGIC {
            return Err(MetaError::InvalidMagic(magic));
        }

        let version = dec.u16()?;
        if version != FORMAT_VERSION {
            return Err(MetaError::UnsupportedVersion(version));
        }

        let raw_root = dec.i64()?;
        let root_position = u64::try_from(raw_root)
            .ok()
            .filter(|pos| *pos >= META_REGION_SIZE)
            .ok_or(MetaError::InvalidRootPosition(raw_root))?;

        Ok(Self {
            version,
            root_position,
        })
    }
}

impl Default for Meta {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur when reading the meta page.
#[derive(Debug)]
pub enum MetaError {
    /// Invalid magic number.
    InvalidMagic(u64),
    /// Unsupported format version.
    UnsupportedVersion(u16),
    /// Root position points inside the meta region or is negative.
    InvalidRootPosition(i64),
    /// Payload too short.
    Codec(CodecError),
}

impl std::fmt::Display for MetaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagic(magic) => write!(f, "invalid magic number: 0x{magic:016x}"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::InvalidRootPosition(pos) => write!(f, "invalid root position: {pos}"),
            Self::Codec(e) => write!(f, "malformed meta page: {e}"),
        }
    }
}

impl std::error::Error for MetaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CodecError> for MetaError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}
