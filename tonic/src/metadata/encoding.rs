use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};

/// A marker trait selecting how a [`super::MetadataKey`]/[`super::MetadataValue`]
/// pair is represented: plain ASCII text, or base64-encoded binary (`-bin`
/// suffixed keys).
pub trait ValueEncoding: Clone + Eq + PartialEq + private::Sealed {
    #[doc(hidden)]
    fn is_binary() -> bool;

    #[doc(hidden)]
    fn is_valid_key(key: &str) -> bool {
        key.ends_with(Binary::KEY_SUFFIX) == Self::is_binary()
    }

    #[doc(hidden)]
    fn decode(value: &[u8]) -> Result<Vec<u8>, DecodeError>;

    #[doc(hidden)]
    fn encode(value: &[u8]) -> Vec<u8>;

    #[doc(hidden)]
    fn from_bytes(value: &[u8]) -> Result<(), InvalidMetadataValueBytes>;
}

mod private {
    pub trait Sealed {}
    impl Sealed for super::Ascii {}
    impl Sealed for super::Binary {}
}

/// Plain ASCII-text metadata values (any key not ending in `-bin`).
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct Ascii;

/// Base64-encoded binary metadata values (keys ending in `-bin`).
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct Binary;

impl Binary {
    pub(crate) const KEY_SUFFIX: &'static str = "-bin";
}

/// Error produced when decoding a base64 binary metadata value fails.
#[derive(Debug)]
pub struct DecodeError {
    _priv: (),
}

impl DecodeError {
    fn new() -> Self {
        DecodeError { _priv: () }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to decode base64 metadata value")
    }
}

impl std::error::Error for DecodeError {}

/// Error produced when a raw byte sequence is not a valid value for its
/// encoding (non-ASCII text for [`Ascii`]; note [`Binary`] values accept any
/// bytes once decoded, so this only fires for `Ascii`).
#[derive(Debug)]
pub struct InvalidMetadataValueBytes(());

impl InvalidMetadataValueBytes {
    pub(crate) fn new() -> Self {
        InvalidMetadataValueBytes(())
    }
}

impl fmt::Display for InvalidMetadataValueBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid metadata value bytes")
    }
}

impl std::error::Error for InvalidMetadataValueBytes {}

impl ValueEncoding for Ascii {
    fn is_binary() -> bool {
        false
    }

    fn decode(value: &[u8]) -> Result<Vec<u8>, DecodeError> {
        Ok(value.to_vec())
    }

    fn encode(value: &[u8]) -> Vec<u8> {
        value.to_vec()
    }

    fn from_bytes(value: &[u8]) -> Result<(), InvalidMetadataValueBytes> {
        if value.is_ascii() {
            Ok(())
        } else {
            Err(InvalidMetadataValueBytes::new())
        }
    }
}

impl ValueEncoding for Binary {
    fn is_binary() -> bool {
        true
    }

    /// Decodes a base64 payload. Tolerant of padding: lengths `mod 4` of
    /// `0`, `2`, or `3` are accepted (the latter two by having the engine
    /// reject strict padding and fall back to an unpadded decode); a
    /// remainder of `1` byte is never a valid base64 length and is rejected.
    fn decode(value: &[u8]) -> Result<Vec<u8>, DecodeError> {
        if value.len() % 4 == 1 {
            return Err(DecodeError::new());
        }

        STANDARD
            .decode(value)
            .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(value))
            .map_err(|_| DecodeError::new())
    }

    fn encode(value: &[u8]) -> Vec<u8> {
        STANDARD.encode(value).into_bytes()
    }

    fn from_bytes(_value: &[u8]) -> Result<(), InvalidMetadataValueBytes> {
        // Any byte sequence is a valid pre-encoding binary value; validity is
        // enforced at decode time against the *wire* (base64) representation.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_round_trips_arbitrary_bytes() {
        for len in [0usize, 1, 2, 3, 4, 5, 16, 17] {
            let bytes: Vec<u8> = (0..len as u8).collect();
            let encoded = Binary::encode(&bytes);
            let decoded = Binary::decode(&encoded).unwrap();
            assert_eq!(decoded, bytes);
        }
    }

    #[test]
    fn binary_accepts_tolerant_padding() {
        // "Zg" (len 2, remainder 2) and "Zg8" (len 3, remainder 3) are both
        // valid unpadded base64 fragments per the tolerant decode rule.
        assert!(Binary::decode(b"Zg").is_ok());
        assert!(Binary::decode(b"Zg8").is_ok());
    }

    #[test]
    fn binary_rejects_remainder_one() {
        assert!(Binary::decode(b"Z").is_err());
        assert!(Binary::decode(b"Zgodo").is_err());
    }
}
