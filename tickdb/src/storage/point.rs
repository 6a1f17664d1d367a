//! Raw samples stored in leaf nodes.

use std::collections::BTreeMap;

use crate::storage::codec::{CodecError, Decoder, Encoder, MAX_PREFIXED_LEN};

/// Metric name to sample value.
pub type Fields = BTreeMap<String, f64>;

/// A single sample: a nanosecond timestamp and its metric values.
///
/// Encoded as `{ts i64, repeated {name_len u16, name, value f64}}`. Fields are
/// written in name order.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub timestamp: i64,
    pub fields: Fields,
}

impl Point {
    #[must_use]
    pub const fn new(timestamp: i64, fields: Fields) -> Self {
        Self { timestamp, fields }
    }

    /// Size of the encoded point in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        8 + self
            .fields
            .keys()
            .map(|name| 2 + name.len() + 8)
            .sum::<usize>()
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let len = self.encoded_len();
        if len > MAX_PREFIXED_LEN {
            return Err(CodecError::TooLong {
                len,
                max: MAX_PREFIXED_LEN,
            });
        }

        let mut enc = Encoder::with_capacity(len);
        enc.put_i64(self.timestamp);
        for (name, value) in &self.fields {
            enc.put_prefixed(name.as_bytes())?;
            enc.put_f64(*value);
        }
        Ok(enc.into_bytes())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut dec = Decoder::new(bytes);
        let timestamp = dec.i64()?;

        let mut fields = Fields::new();
        while !dec.is_empty() {
            let name = dec.prefixed_str()?;
            let value = dec.f64()?;
            fields.insert(name, value);
        }

        Ok(Self { timestamp, fields })
    }
}
