//! Compression negotiation: `grpc-encoding` / `grpc-accept-encoding`
//! (`spec.md` §2, Framing Codec; §8 "unsupported grpc-encoding").

use std::fmt;
use std::io::{self, Read, Write};

/// A single named compression algorithm this core knows how to apply.
///
/// Variants are feature-gated the same way the underlying crate dependency
/// is: `gzip`, `deflate`, `zstd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CompressionEncoding {
    #[cfg(feature = "gzip")]
    Gzip,
    #[cfg(feature = "deflate")]
    Deflate,
    #[cfg(feature = "zstd")]
    Zstd,
}

impl CompressionEncoding {
    /// The wire name as sent in `grpc-encoding`/`grpc-accept-encoding`.
    pub fn as_str(&self) -> &'static str {
        match self {
            #[cfg(feature = "gzip")]
            CompressionEncoding::Gzip => "gzip",
            #[cfg(feature = "deflate")]
            CompressionEncoding::Deflate => "deflate",
            #[cfg(feature = "zstd")]
            CompressionEncoding::Zstd => "zstd",
        }
    }

    /// Parses a single wire name, ignoring anything this build wasn't
    /// compiled to support (callers are expected to fall through the
    /// `grpc-accept-encoding` list until one parses).
    pub fn from_str(name: &str) -> Option<Self> {
        #[cfg(feature = "gzip")]
        if name == "gzip" {
            return Some(CompressionEncoding::Gzip);
        }
        #[cfg(feature = "deflate")]
        if name == "deflate" {
            return Some(CompressionEncoding::Deflate);
        }
        #[cfg(feature = "zstd")]
        if name == "zstd" {
            return Some(CompressionEncoding::Zstd);
        }
        let _ = name;
        None
    }

    pub(crate) const ALL: &'static [CompressionEncoding] = &[
        #[cfg(feature = "gzip")]
        CompressionEncoding::Gzip,
        #[cfg(feature = "deflate")]
        CompressionEncoding::Deflate,
        #[cfg(feature = "zstd")]
        CompressionEncoding::Zstd,
    ];
}

impl fmt::Display for CompressionEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the request's `grpc-encoding` header declared, threaded through to
/// the framing decoder so it can tell apart the three distinct protocol
/// violations `spec.md` §4.1 calls out for a compressed-flag frame: no
/// header at all, an explicit `identity` declaration, or (once past
/// negotiation) a real algorithm.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RequestEncoding {
    /// No `grpc-encoding` header was present on the request.
    Absent,
    /// `grpc-encoding: identity` was sent explicitly.
    Identity,
    /// A real compression algorithm was negotiated for this call's frames.
    Compressed(CompressionEncoding),
}

impl RequestEncoding {
    /// The negotiated algorithm, if any.
    pub(crate) fn compression(&self) -> Option<CompressionEncoding> {
        match self {
            RequestEncoding::Compressed(encoding) => Some(*encoding),
            RequestEncoding::Absent | RequestEncoding::Identity => None,
        }
    }
}

/// The set of encodings a service/method has been configured to accept and
/// produce, tracked as a small bitset so `Grpc::accept_compressed` /
/// `send_compressed` stay cheap `Copy` values threaded through the
/// dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnabledCompressionEncodings {
    bits: u8,
}

fn bit(encoding: CompressionEncoding) -> u8 {
    match encoding {
        #[cfg(feature = "gzip")]
        CompressionEncoding::Gzip => 0b001,
        #[cfg(feature = "deflate")]
        CompressionEncoding::Deflate => 0b010,
        #[cfg(feature = "zstd")]
        CompressionEncoding::Zstd => 0b100,
    }
}

impl EnabledCompressionEncodings {
    /// Enables `encoding`.
    pub fn enable(&mut self, encoding: CompressionEncoding) {
        self.bits |= bit(encoding);
    }

    /// Whether `encoding` has been enabled.
    pub fn is_enabled(&self, encoding: CompressionEncoding) -> bool {
        self.bits & bit(encoding) != 0
    }

    /// Iterates the enabled encodings in a stable order, for building the
    /// `grpc-accept-encoding` response header.
    pub fn iter(&self) -> impl Iterator<Item = CompressionEncoding> + '_ {
        CompressionEncoding::ALL
            .iter()
            .copied()
            .filter(move |e| self.is_enabled(*e))
    }

    /// Renders the comma-separated `grpc-accept-encoding` value. Always
    /// includes `identity` ahead of whatever compressed encodings are
    /// enabled, per `spec.md` §4.1's "always including identity".
    pub(crate) fn accept_encoding_header(&self) -> String {
        self.iter().fold("identity".to_owned(), |mut acc, n| {
            acc.push(',');
            acc.push_str(n.as_str());
            acc
        })
    }
}

/// Decompresses exactly `len` bytes from the front of `input` into `out`,
/// per the algorithm named by `encoding`.
pub(crate) fn decompress(
    encoding: CompressionEncoding,
    input: &mut bytes::BytesMut,
    out: &mut bytes::BytesMut,
    len: usize,
) -> io::Result<()> {
    let compressed = input.split_to(len);

    match encoding {
        #[cfg(feature = "gzip")]
        CompressionEncoding::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
            let mut decoded = Vec::new();
            decoder.read_to_end(&mut decoded)?;
            out.extend_from_slice(&decoded);
        }
        #[cfg(feature = "deflate")]
        CompressionEncoding::Deflate => {
            let mut decoder = flate2::read::DeflateDecoder::new(&compressed[..]);
            let mut decoded = Vec::new();
            decoder.read_to_end(&mut decoded)?;
            out.extend_from_slice(&decoded);
        }
        #[cfg(feature = "zstd")]
        CompressionEncoding::Zstd => {
            let decoded = zstd::stream::decode_all(&compressed[..])?;
            out.extend_from_slice(&decoded);
        }
    }

    Ok(())
}

/// Compresses `input` onto the end of `out`, per `encoding`. Used when
/// emitting a response frame with `grpc-encoding` set.
pub(crate) fn compress(
    encoding: CompressionEncoding,
    input: &[u8],
    out: &mut Vec<u8>,
) -> io::Result<()> {
    match encoding {
        #[cfg(feature = "gzip")]
        CompressionEncoding::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(out, flate2::Compression::default());
            encoder.write_all(input)?;
            encoder.finish()?;
        }
        #[cfg(feature = "deflate")]
        CompressionEncoding::Deflate => {
            let mut encoder =
                flate2::write::DeflateEncoder::new(out, flate2::Compression::default());
            encoder.write_all(input)?;
            encoder.finish()?;
        }
        #[cfg(feature = "zstd")]
        CompressionEncoding::Zstd => {
            let encoded = zstd::stream::encode_all(input, 0)?;
            out.extend_from_slice(&encoded);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "gzip")]
    #[test]
    fn gzip_round_trips() {
        let mut compressed = Vec::new();
        compress(CompressionEncoding::Gzip, b"hello world", &mut compressed).unwrap();

        let mut input = bytes::BytesMut::from(&compressed[..]);
        let len = input.len();
        let mut out = bytes::BytesMut::new();
        decompress(CompressionEncoding::Gzip, &mut input, &mut out, len).unwrap();
        assert_eq!(&out[..], b"hello world");
    }

    #[test]
    fn enabled_set_tracks_membership() {
        let mut set = EnabledCompressionEncodings::default();
        assert_eq!(set.accept_encoding_header(), "identity");

        #[cfg(feature = "gzip")]
        {
            set.enable(CompressionEncoding::Gzip);
            assert!(set.is_enabled(CompressionEncoding::Gzip));
            assert_eq!(set.accept_encoding_header(), "identity,gzip");
        }
    }
}
