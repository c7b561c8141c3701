//! Message framing: turning typed request/response values into the
//! length-prefixed `application/grpc` wire frames and back.
//!
//! A [`Codec`] is a pair of an [`Encoder`] and a [`Decoder`] for a single
//! message type. Generated service code provides one codec per method (via
//! `tonic-prost`/`tonic-protobuf`); this module owns everything downstream of
//! that: framing, compression negotiation, and the streaming decode state
//! machine.

mod buffer;
mod compression;
mod decode;
mod encode;

pub use buffer::BufferSettings;
pub use compression::{CompressionEncoding, EnabledCompressionEncodings};
pub(crate) use compression::RequestEncoding;
pub use decode::Streaming;
pub(crate) use decode::decode_body;
pub(crate) use encode::encode_server;

use bytes::{Buf, BufMut};
use std::io;

/// The five-byte frame header: a compression flag byte followed by a
/// big-endian `u32` message length (`spec.md` §2, Framing Codec).
pub(crate) const HEADER_SIZE: usize = 5;

/// Encodes a single message of type `T` into its wire bytes.
pub trait Encoder {
    /// The message type this encoder accepts.
    type Item;
    /// The error produced on encode failure.
    type Error;

    /// Encodes `item` into `dst`, without framing (the caller applies the
    /// length-prefix and compression).
    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error>;
}

/// Decodes a single message of type `T` from its wire bytes.
pub trait Decoder {
    /// The message type this decoder produces.
    type Item;
    /// The error produced on decode failure.
    type Error;

    /// Decodes one message from `src`. `src` contains exactly one message's
    /// worth of (already decompressed) bytes.
    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error>;
}

/// A `Codec` is the `(Encoder, Decoder)` pair generated service code supplies
/// for one message type, plus the buffer-settings hook codecs use to tune
/// allocation for their wire format.
pub trait Codec: Default {
    /// The type encoded (the method's response type on the server side).
    type Encode;
    /// The type decoded (the method's request type on the server side).
    type Decode;

    /// The concrete encoder this codec hands out.
    type Encoder: Encoder<Item = Self::Encode, Error = crate::Status> + Send + 'static;
    /// The concrete decoder this codec hands out.
    type Decoder: Decoder<Item = Self::Decode, Error = crate::Status> + Send + 'static;

    /// Builds an encoder.
    fn encoder(&mut self) -> Self::Encoder;
    /// Builds a decoder.
    fn decoder(&mut self) -> Self::Decoder;
}

/// Write-only cursor into the growable buffer an [`Encoder`] fills.
pub struct EncodeBuf<'a> {
    bytes: &'a mut Vec<u8>,
}

impl<'a> EncodeBuf<'a> {
    /// Wraps a growable buffer for an [`Encoder`] to write into. Exposed so
    /// third-party codecs (`tonic-prost`, `tonic-protobuf`) can unit test
    /// their `Encoder` impls without going through a full dispatch.
    pub fn new(bytes: &'a mut Vec<u8>) -> Self {
        EncodeBuf { bytes }
    }
}

impl BufMut for EncodeBuf<'_> {
    fn remaining_mut(&self) -> usize {
        self.bytes.remaining_mut()
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        unsafe { self.bytes.advance_mut(cnt) }
    }

    fn chunk_mut(&mut self) -> &mut bytes::buf::UninitSlice {
        self.bytes.chunk_mut()
    }
}

/// Read-only cursor over one message's decompressed bytes, handed to a
/// [`Decoder`].
pub struct DecodeBuf<'a> {
    bytes: &'a mut bytes::BytesMut,
}

impl<'a> DecodeBuf<'a> {
    /// Wraps one message's decompressed bytes for a [`Decoder`] to read.
    /// Exposed for the same reason as [`EncodeBuf::new`].
    pub fn new(bytes: &'a mut bytes::BytesMut) -> Self {
        DecodeBuf { bytes }
    }
}

impl Buf for DecodeBuf<'_> {
    fn remaining(&self) -> usize {
        Buf::remaining(&*self.bytes)
    }

    fn chunk(&self) -> &[u8] {
        Buf::chunk(&*self.bytes)
    }

    fn advance(&mut self, cnt: usize) {
        Buf::advance(&mut *self.bytes, cnt)
    }
}

pub(crate) fn frame_header(compressed: bool, len: u32) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0] = compressed as u8;
    header[1..5].copy_from_slice(&len.to_be_bytes());
    header
}

pub(crate) fn io_error(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::Other, message.into())
}
