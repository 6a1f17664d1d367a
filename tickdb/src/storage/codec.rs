//! Fixed-width big-endian encoding primitives.
//!
//! Every on-disk structure (meta page, node payloads, points, node pointers)
//! is built from these helpers. Integers and floats are always big-endian;
//! variable-length data is prefixed with a `u16` byte length.

// Lengths are checked against u16::MAX before narrowing.
#![allow(clippy::cast_possible_truncation)]

/// Maximum length of any `u16`-prefixed byte string.
pub const MAX_PREFIXED_LEN: usize = u16::MAX as usize;

/// Growable big-endian write buffer.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    /// Create an empty encoder.
    #[must_use]
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Create an encoder with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_bits().to_be_bytes());
    }

    /// Append a `u16` length followed by the bytes.
    ///
    /// Fails if the bytes do not fit a `u16` length.
    pub fn put_prefixed(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if bytes.len() > MAX_PREFIXED_LEN {
            return Err(CodecError::TooLong {
                len: bytes.len(),
                max: MAX_PREFIXED_LEN,
            });
        }
        self.put_u16(bytes.len() as u16);
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Number of bytes written so far.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume the encoder and return the encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Big-endian reader over a borrowed byte slice.
///
/// Every read is bounds-checked; running off the end is reported as
/// `CodecError::UnexpectedEnd` rather than panicking, since the bytes come
/// from disk and may be corrupt.
#[derive(Debug)]
pub struct Decoder<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Decoder<'a> {
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Current read offset from the start of the slice.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Consume exactly `len` bytes.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if len > self.remaining() {
            return Err(CodecError::UnexpectedEnd {
                offset: self.offset,
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    pub fn i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    pub fn f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_bits(u64::from_be_bytes(self.take_array()?)))
    }

    /// Read a `u16` length followed by that many bytes.
    pub fn prefixed(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u16()? as usize;
        self.take(len)
    }

    /// Read a `u16`-prefixed UTF-8 string.
    pub fn prefixed_str(&mut self) -> Result<String, CodecError> {
        let start = self.offset;
        let bytes = self.prefixed()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8 { offset: start })
    }
}

/// Errors produced while encoding or decoding on-disk structures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before a fixed-width field or declared length.
    UnexpectedEnd {
        offset: usize,
        needed: usize,
        remaining: usize,
    },
    /// A field name was not valid UTF-8.
    InvalidUtf8 { offset: usize },
    /// A byte string was too long for its `u16` length prefix.
    TooLong { len: usize, max: usize },
    /// A node header carried an unknown level or kind.
    InvalidNodeHeader(u16),
    /// A node pointer carried a negative or reserved disk position.
    InvalidPosition(i64),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnexpectedEnd {
                offset,
                needed,
                remaining,
            } => write!(
                f,
                "unexpected end of data at offset {offset}: needed {needed} bytes, {remaining} remaining"
            ),
            Self::InvalidUtf8 { offset } => write!(f, "invalid UTF-8 string at offset {offset}"),
            Self::TooLong { len, max } => {
                write!(f, "encoded length {len} exceeds maximum of {max}")
            }
            Self::InvalidNodeHeader(flags) => write!(f, "invalid node header: 0x{flags:04x}"),
            Self::InvalidPosition(pos) => write!(f, "invalid child position: {pos}"),
        }
    }
}

impl std::error::Error for CodecError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_big_endian() {
        let mut enc = Encoder::new();
        enc.put_u16(0x0102);
        enc.put_u32(0x0304_0506);
        enc.put_i64(-2);
        let bytes = enc.into_bytes();

        assert_eq!(&bytes[..6], &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(&bytes[6..], &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE]);

        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.u16().expect("u16"), 0x0102);
        assert_eq!(dec.u32().expect("u32"), 0x0304_0506);
        assert_eq!(dec.i64().expect("i64"), -2);
        assert!(dec.is_empty());
    }

    #[test]
    fn test_float_bits_preserved() {
        let mut enc = Encoder::new();
        enc.put_f64(-0.0);
        enc.put_f64(f64::INFINITY);
        enc.put_f64(1.5);
        let bytes = enc.into_bytes();

        let mut dec = Decoder::new(&bytes);
        assert!(dec.f64().expect("f64").is_sign_negative());
        assert_eq!(dec.f64().expect("f64"), f64::INFINITY);
        assert!((dec.f64().expect("f64") - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_prefixed_string() {
        let mut enc = Encoder::new();
        enc.put_prefixed(b"open").expect("fits");
        let bytes = enc.into_bytes();
        assert_eq!(&bytes[..2], &[0, 4]);

        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.prefixed_str().expect("str"), "open");
    }

    #[test]
    fn test_prefixed_too_long() {
        let mut enc = Encoder::new();
        let big = vec![0u8; MAX_PREFIXED_LEN + 1];
        let err = enc.put_prefixed(&big).expect_err("should reject");
        assert!(matches!(err, CodecError::TooLong { .. }));
        assert!(enc.is_empty());
    }

    #[test]
    fn test_short_input_is_an_error() {
        let mut dec = Decoder::new(&[0x00, 0x01, 0x02]);
        let err = dec.u32().expect_err("not enough bytes");
        assert_eq!(
            err,
            CodecError::UnexpectedEnd {
                offset: 0,
                needed: 4,
                remaining: 3
            }
        );
    }

    #[test]
    fn test_invalid_utf8() {
        let mut dec = Decoder::new(&[0x00, 0x02, 0xC3, 0x28]);
        assert!(matches!(
            dec.prefixed_str(),
            Err(CodecError::InvalidUtf8 { offset: 0 })
        ));
    }
}
