use super::encoding::{Ascii, Binary, ValueEncoding};
use std::{fmt, marker::PhantomData, str::FromStr};

/// Represents a custom metadata field name.
///
/// `MetadataKey` is parameterized over [`Ascii`] or [`Binary`] so that the
/// `-bin` suffix convention (binary values, base64-encoded on the wire) is
/// enforced at the type level rather than re-checked at every call site.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct MetadataKey<VE: ValueEncoding> {
    pub(crate) inner: http::header::HeaderName,
    pub(crate) phantom: PhantomData<VE>,
}

/// A possible error when converting a `MetadataKey` from another type.
#[derive(Debug)]
pub struct InvalidMetadataKey(());

impl fmt::Display for InvalidMetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid metadata key")
    }
}

impl std::error::Error for InvalidMetadataKey {}

impl InvalidMetadataKey {
    pub(crate) fn new() -> Self {
        InvalidMetadataKey(())
    }
}

impl MetadataKey<Ascii> {
    /// Returns a view of this key as a string slice.
    pub fn as_str(&self) -> &str {
        self.inner.as_str()
    }
}

impl MetadataKey<Binary> {
    /// Returns a view of this key as a string slice, `-bin` suffix included.
    pub fn as_str(&self) -> &str {
        self.inner.as_str()
    }
}

impl<VE: ValueEncoding> MetadataKey<VE> {
    /// Whether this is a binary key (ends with `-bin`).
    pub(crate) fn is_binary() -> bool {
        VE::is_binary()
    }

    pub(crate) fn unchecked_from_header_name(inner: http::header::HeaderName) -> Self {
        MetadataKey {
            inner,
            phantom: PhantomData,
        }
    }

    pub(crate) fn into_header_name(self) -> http::header::HeaderName {
        self.inner
    }

    pub(crate) fn as_header_name(&self) -> &http::header::HeaderName {
        &self.inner
    }

    /// Converts a static string to a `MetadataKey`, validating the value
    /// encoding suffix (`-bin` iff `VE::is_binary()`).
    pub fn from_static(s: &'static str) -> Self {
        Self::from_bytes(s.as_bytes()).unwrap_or_else(|_| {
            panic!("invalid metadata key static string: {s:?}");
        })
    }

    /// Converts a slice of bytes to a `MetadataKey`.
    pub fn from_bytes(src: &[u8]) -> Result<Self, InvalidMetadataKey> {
        let name =
            http::header::HeaderName::from_bytes(src).map_err(|_| InvalidMetadataKey::new())?;
        if !VE::is_valid_key(name.as_str()) {
            return Err(InvalidMetadataKey::new());
        }
        Ok(MetadataKey {
            inner: name,
            phantom: PhantomData,
        })
    }
}

impl<VE: ValueEncoding> FromStr for MetadataKey<VE> {
    type Err = InvalidMetadataKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetadataKey::from_bytes(s.as_bytes())
    }
}

impl<VE: ValueEncoding> AsRef<str> for MetadataKey<VE> {
    fn as_ref(&self) -> &str {
        self.inner.as_str()
    }
}

impl<VE: ValueEncoding> AsRef<[u8]> for MetadataKey<VE> {
    fn as_ref(&self) -> &[u8] {
        self.inner.as_str().as_bytes()
    }
}

impl<VE: ValueEncoding> fmt::Debug for MetadataKey<VE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

impl<VE: ValueEncoding> fmt::Display for MetadataKey<VE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl<VE: ValueEncoding> PartialEq<str> for MetadataKey<VE> {
    fn eq(&self, other: &str) -> bool {
        self.inner.as_str().eq_ignore_ascii_case(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{AsciiMetadataKey, BinaryMetadataKey};

    #[test]
    fn ascii_key_rejects_bin_suffix() {
        assert!(AsciiMetadataKey::from_bytes(b"x-trace-bin").is_err());
        assert!(AsciiMetadataKey::from_bytes(b"x-trace").is_ok());
    }

    #[test]
    fn binary_key_requires_bin_suffix() {
        assert!(BinaryMetadataKey::from_bytes(b"x-trace").is_err());
        assert!(BinaryMetadataKey::from_bytes(b"x-trace-bin").is_ok());
    }

    #[test]
    fn key_is_case_insensitive() {
        let key = AsciiMetadataKey::from_bytes(b"X-Trace-Id").unwrap();
        assert_eq!(key, "x-trace-id");
    }
}
