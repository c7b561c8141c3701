//! A [`tonic::codec::Codec`] for messages generated by `rust-protobuf`,
//! offered as an alternative to `tonic-prost` for services whose message
//! types come from that code generator instead.

use std::marker::PhantomData;

use bytes::{Buf, BufMut};
use protobuf::Message;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::Status;

/// A [`Codec`] for any pair of `protobuf::Message` request/response types.
pub struct ProtobufCodec<T, U> {
    _marker: PhantomData<(T, U)>,
}

impl<T, U> Default for ProtobufCodec<T, U> {
    fn default() -> Self {
        ProtobufCodec {
            _marker: PhantomData,
        }
    }
}

impl<T, U> Codec for ProtobufCodec<T, U>
where
    T: Message + Send + 'static,
    U: Message + Send + 'static,
{
    type Encode = T;
    type Decode = U;
    type Encoder = ProtobufEncoder<T>;
    type Decoder = ProtobufDecoder<U>;

    fn encoder(&mut self) -> Self::Encoder {
        ProtobufEncoder(PhantomData)
    }

    fn decoder(&mut self) -> Self::Decoder {
        ProtobufDecoder(PhantomData)
    }
}

/// Encodes a `protobuf::Message` by serializing it to bytes and copying
/// those into the frame buffer.
#[derive(Default)]
pub struct ProtobufEncoder<T>(PhantomData<T>);

impl<T: Message> Encoder for ProtobufEncoder<T> {
    type Item = T;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        let bytes = item
            .write_to_bytes()
            .map_err(|err| Status::internal(format!("error encoding protobuf message: {err}")))?;
        dst.put_slice(&bytes);
        Ok(())
    }
}

/// Decodes a `protobuf::Message` from one message's worth of
/// already-decompressed bytes.
#[derive(Default)]
pub struct ProtobufDecoder<U>(PhantomData<U>);

impl<U: Message> Decoder for ProtobufDecoder<U> {
    type Item = U;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        if !src.has_remaining() {
            return Ok(None);
        }

        let message = U::parse_from_bytes(src.chunk())
            .map_err(|err| Status::internal(format!("error decoding protobuf message: {err}")))?;
        let remaining = src.remaining();
        src.advance(remaining);
        Ok(Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use protobuf::Message as _;

    #[test]
    fn round_trips_a_message_through_the_codec() {
        // `protobuf::Message` requires generated types, which this crate
        // doesn't depend on .proto tooling to produce; the empty message
        // `protobuf::well_known_types::empty::Empty` exercises the same
        // encode/decode path without needing a schema of our own.
        let mut codec = ProtobufCodec::<
            protobuf::well_known_types::empty::Empty,
            protobuf::well_known_types::empty::Empty,
        >::default();

        let mut buf = Vec::new();
        codec
            .encoder()
            .encode(Default::default(), &mut EncodeBuf::new(&mut buf))
            .unwrap();

        let mut bytes = BytesMut::from(&buf[..]);
        let decoded = codec
            .decoder()
            .decode(&mut DecodeBuf::new(&mut bytes))
            .unwrap();
        assert!(decoded.is_some());
    }
}
