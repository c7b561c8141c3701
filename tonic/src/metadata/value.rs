use super::encoding::{Ascii, Binary, InvalidMetadataValueBytes, ValueEncoding};
use std::{fmt, marker::PhantomData, str::FromStr};

/// A metadata value, generic over its [`super::encoding::ValueEncoding`]
/// (plain ASCII text, or base64-on-the-wire binary).
///
/// The in-memory representation is always the *wire* representation: for
/// `Binary` that means already base64-encoded, so that writing a value onto
/// an outgoing `http::HeaderMap` is always a cheap clone of an
/// `http::HeaderValue`, never a fresh encode. Binary values are encoded once,
/// at construction time ([`MetadataValue::from_bytes`]), and decoded lazily
/// on read ([`MetadataValue::to_bytes`]).
#[derive(Clone, Eq, PartialEq)]
#[repr(transparent)]
pub struct MetadataValue<VE: ValueEncoding> {
    pub(crate) inner: http::header::HeaderValue,
    pub(crate) phantom: PhantomData<VE>,
}

/// A possible error when converting a `MetadataValue` from another type.
#[derive(Debug)]
pub struct InvalidMetadataValue(());

impl InvalidMetadataValue {
    pub(crate) fn new() -> Self {
        InvalidMetadataValue(())
    }
}

impl fmt::Display for InvalidMetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid metadata value")
    }
}

impl std::error::Error for InvalidMetadataValue {}

impl From<InvalidMetadataValueBytes> for InvalidMetadataValue {
    fn from(_: InvalidMetadataValueBytes) -> Self {
        InvalidMetadataValue::new()
    }
}

impl<VE: ValueEncoding> MetadataValue<VE> {
    pub(crate) fn unchecked_from_header_value(inner: http::header::HeaderValue) -> Self {
        MetadataValue {
            inner,
            phantom: PhantomData,
        }
    }

    pub(crate) fn into_header_value(self) -> http::header::HeaderValue {
        self.inner
    }

    pub(crate) fn as_header_value(&self) -> &http::header::HeaderValue {
        &self.inner
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl MetadataValue<Ascii> {
    /// Converts a static string to a `MetadataValue`.
    pub fn from_static(s: &'static str) -> Self {
        MetadataValue {
            inner: http::header::HeaderValue::from_static(s),
            phantom: PhantomData,
        }
    }

    /// Converts a byte slice to a `MetadataValue` (must be valid ASCII).
    pub fn from_bytes(src: &[u8]) -> Result<Self, InvalidMetadataValue> {
        Ascii::from_bytes(src)?;
        let value = http::header::HeaderValue::from_bytes(src)
            .map_err(|_| InvalidMetadataValue::new())?;
        Ok(MetadataValue {
            inner: value,
            phantom: PhantomData,
        })
    }

    /// Yields this value as a string slice.
    pub fn to_str(&self) -> Result<&str, InvalidMetadataValue> {
        self.inner.to_str().map_err(|_| InvalidMetadataValue::new())
    }

    pub(crate) fn from_header_value(v: http::header::HeaderValue) -> Self {
        Self::unchecked_from_header_value(v)
    }
}

impl MetadataValue<Binary> {
    /// Wraps raw bytes as a binary metadata value, eagerly base64-encoding
    /// them into the wire representation (`spec.md` §3, "binary metadata
    /// entries are base64-encoded").
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let wire = Binary::encode(bytes);
        MetadataValue {
            // SAFETY: base64 output is always valid header-value ASCII.
            inner: http::header::HeaderValue::from_bytes(&wire)
                .expect("base64 output is a valid header value"),
            phantom: PhantomData,
        }
    }

    /// Decodes the base64 wire representation back into raw bytes.
    /// Tolerant of missing padding (lengths mod 4 of 0/2/3 accepted; 1 is a
    /// format error), per `spec.md` §3/§8.
    pub fn to_bytes(&self) -> Result<bytes::Bytes, InvalidMetadataValue> {
        Binary::decode(self.inner.as_bytes())
            .map(bytes::Bytes::from)
            .map_err(|_| InvalidMetadataValue::new())
    }

    pub(crate) fn from_wire_header_value(v: http::header::HeaderValue) -> Self {
        Self::unchecked_from_header_value(v)
    }
}

impl FromStr for MetadataValue<Ascii> {
    type Err = InvalidMetadataValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value =
            http::header::HeaderValue::from_str(s).map_err(|_| InvalidMetadataValue::new())?;
        Ok(MetadataValue::from_header_value(value))
    }
}

impl fmt::Debug for MetadataValue<Ascii> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

impl fmt::Debug for MetadataValue<Binary> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_bytes() {
            Ok(b) => write!(f, "{b:?}"),
            Err(_) => f.write_str("<invalid base64>"),
        }
    }
}

impl PartialEq<str> for MetadataValue<Ascii> {
    fn eq(&self, other: &str) -> bool {
        self.to_str().map(|s| s == other).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_round_trips_through_wire_encoding() {
        let value = MetadataValue::<Binary>::from_bytes(&[0, 1, 2, 250, 255]);
        let wire = value.as_header_value().clone();
        let parsed = MetadataValue::<Binary>::from_wire_header_value(wire);
        assert_eq!(parsed.to_bytes().unwrap().as_ref(), &[0, 1, 2, 250, 255]);
    }

    #[quickcheck_macros::quickcheck]
    fn binary_round_trips_any_bytes(bytes: Vec<u8>) -> bool {
        let value = MetadataValue::<Binary>::from_bytes(&bytes);
        value.to_bytes().unwrap().as_ref() == bytes.as_slice()
    }
}
