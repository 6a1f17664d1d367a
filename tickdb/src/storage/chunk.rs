//! Checksummed chunk I/O over the database file.
//!
//! Every record in the file is a chunk:
//!
//! ```text
//! +--------+--------------------------------------------+
//! | 0-3    | length (u32 BE) = payload length + 4       |
//! | 4-7    | CRC32 (u32 BE, IEEE) of the payload        |
//! | 8-N    | payload                                    |
//! +--------+--------------------------------------------+
//! ```
//!
//! Chunks are appended at the write offset and never rewritten, with one
//! exception: the meta chunk lives in a fixed 512-byte region at offset 0 and
//! is overwritten in place on every flush.
//!
//! Reads use positional I/O (`pread`) so they only need `&self` and can run
//! concurrently with each other.

// Chunk lengths are checked against u32::MAX before narrowing.
#![allow(clippy::cast_possible_truncation)]

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Size of the reserved meta region at the start of the file.
pub const META_REGION_SIZE: u64 = 512;

/// Length + CRC prefix size.
pub const CHUNK_HEADER_SIZE: usize = 8;

/// Size of the CRC field, which the length field also covers.
const CRC_SIZE: u32 = 4;

/// A database file addressed as a sequence of checksummed chunks.
#[derive(Debug)]
pub struct ChunkFile {
    file: File,
    /// Next append offset. Never below `META_REGION_SIZE`.
    pos: u64,
    /// File length at open time; zero means a brand new file.
    initial_len: u64,
}

impl ChunkFile {
    /// Open the file at `path`, creating it if it does not exist.
    ///
    /// The write offset starts at the end of the file, or just past the meta
    /// region for a new file.
    pub fn open(path: &Path) -> Result<Self, ChunkError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(ChunkError::Io)?;

        let initial_len = file.metadata().map_err(ChunkError::Io)?.len();

        Ok(Self {
            file,
            pos: initial_len.max(META_REGION_SIZE),
            initial_len,
        })
    }

    /// Whether the file was empty when it was opened.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.initial_len == 0
    }

    /// Current append offset.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.pos
    }

    /// Read and validate the chunk starting at `offset`.
    ///
    /// Returns the payload bytes. A declared length that runs past the end of
    /// the file is a short read; a payload whose CRC does not match is a
    /// checksum mismatch. Both are corruption.
    pub fn read_chunk_at(&self, offset: u64) -> Result<Vec<u8>, ChunkError> {
        let file_len = self.file.metadata().map_err(ChunkError::Io)?.len();
        let available = file_len.saturating_sub(offset);

        let mut header = [0u8; CHUNK_HEADER_SIZE];
        if available < CHUNK_HEADER_SIZE as u64 {
            return Err(ChunkError::ShortRead {
                offset,
                expected: CHUNK_HEADER_SIZE as u64,
                available,
            });
        }
        read_exact_at(&self.file, &mut header, offset).map_err(ChunkError::Io)?;

        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let stored_crc = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

        if length < CRC_SIZE {
            return Err(ChunkError::InvalidLength { offset, length });
        }
        let payload_len = u64::from(length - CRC_SIZE);
        let payload_available = available - CHUNK_HEADER_SIZE as u64;
        if payload_len > payload_available {
            return Err(ChunkError::ShortRead {
                offset,
                expected: payload_len,
                available: payload_available,
            });
        }

        let mut payload = vec![0u8; payload_len as usize];
        read_exact_at(
            &self.file,
            &mut payload,
            offset + CHUNK_HEADER_SIZE as u64,
        )
        .map_err(ChunkError::Io)?;

        let actual_crc = crc32fast::hash(&payload);
        if actual_crc != stored_crc {
            return Err(ChunkError::ChecksumMismatch {
                offset,
                expected: stored_crc,
                actual: actual_crc,
            });
        }

        Ok(payload)
    }

    /// Append a chunk at the write offset.
    ///
    /// Returns `(start_offset, total_bytes_written)`; the start offset is what
    /// callers record as the chunk's disk position.
    pub fn write_chunk(&mut self, payload: &[u8]) -> Result<(u64, u64), ChunkError> {
        let framed = frame(payload)?;
        let start = self.pos;
        write_all_at(&self.file, &framed, start).map_err(ChunkError::Io)?;
        let written = framed.len() as u64;
        self.pos += written;
        Ok((start, written))
    }

    /// Overwrite the meta chunk at offset 0.
    ///
    /// Does not move the append offset. The framed chunk must fit inside the
    /// reserved meta region.
    pub fn write_meta(&mut self, payload: &[u8]) -> Result<(), ChunkError> {
        let framed = frame(payload)?;
        if framed.len() as u64 > META_REGION_SIZE {
            return Err(ChunkError::MetaOverflow { len: framed.len() });
        }
        write_all_at(&self.file, &framed, 0).map_err(ChunkError::Io)
    }

    /// Flush file contents and metadata to disk.
    pub fn sync(&self) -> Result<(), ChunkError> {
        self.file.sync_all().map_err(ChunkError::Io)
    }
}

/// Prefix a payload with its length and CRC32.
fn frame(payload: &[u8]) -> Result<Vec<u8>, ChunkError> {
    let length = u32::try_from(payload.len())
        .ok()
        .and_then(|len| len.checked_add(CRC_SIZE))
        .ok_or(ChunkError::TooLarge { len: payload.len() })?;

    let mut framed = Vec::with_capacity(CHUNK_HEADER_SIZE + payload.len());
    framed.extend_from_slice(&length.to_be_bytes());
    framed.extend_from_slice(&crc32fast::hash(payload).to_be_bytes());
    framed.extend_from_slice(payload);
    Ok(framed)
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::write_all_at(file, buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut std::mem::take(&mut buf)[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Errors that can occur during chunk I/O.
#[derive(Debug)]
pub enum ChunkError {
    /// I/O error.
    Io(io::Error),
    /// Fewer bytes on disk than the chunk declares.
    ShortRead {
        offset: u64,
        expected: u64,
        available: u64,
    },
    /// Stored CRC does not match the payload.
    ChecksumMismatch {
        offset: u64,
        expected: u32,
        actual: u32,
    },
    /// Length field smaller than the CRC it must cover.
    InvalidLength { offset: u64, length: u32 },
    /// Payload too large for a `u32` length field.
    TooLarge { len: usize },
    /// Meta chunk does not fit the reserved meta region.
    MetaOverflow { len: usize },
}

impl ChunkError {
    /// Whether this error means the bytes on disk are damaged.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::ShortRead { .. } | Self::ChecksumMismatch { .. } | Self::InvalidLength { .. }
        )
    }
}

impl std::fmt::Display for ChunkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::ShortRead {
                offset,
                expected,
                available,
            } => write!(
                f,
                "short read at offset {offset}: expected {expected} bytes, {available} available"
            ),
            Self::ChecksumMismatch {
                offset,
                expected,
                actual,
            } => write!(
                f,
                "checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}"
            ),
            Self::InvalidLength { offset, length } => {
                write!(f, "invalid chunk length {length} at offset {offset}")
            }
            Self::TooLarge { len } => write!(f, "chunk payload of {len} bytes is too large"),
            Self::MetaOverflow { len } => write!(
                f,
                "meta chunk of {len} bytes exceeds the {META_REGION_SIZE}-byte meta region"
            ),
        }
    }
}

impl std::error::Error for ChunkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}
