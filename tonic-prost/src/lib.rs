//! A [`tonic::codec::Codec`] for `prost`-generated messages, i.e. the
//! conventional output of compiling `.proto` files with `prost-build`.
//!
//! This crate deliberately knows nothing about `.proto` compilation itself:
//! it only turns `T: prost::Message` values into wire frames and back, the
//! same split `tonic` itself draws between "decode a request" and "generate
//! code from an IDL."

#![allow(clippy::type_complexity)]

use std::marker::PhantomData;

use prost::Message;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::Status;

/// A [`Codec`] for any pair of `prost::Message` request/response types.
///
/// Generated server code instantiates one of these per method, parameterized
/// over the method's request and response message types.
pub struct ProstCodec<T, U> {
    _marker: PhantomData<(T, U)>,
}

impl<T, U> Default for ProstCodec<T, U> {
    fn default() -> Self {
        ProstCodec {
            _marker: PhantomData,
        }
    }
}

impl<T, U> Codec for ProstCodec<T, U>
where
    T: Message + Send + 'static,
    U: Message + Default + Send + 'static,
{
    type Encode = T;
    type Decode = U;
    type Encoder = ProstEncoder<T>;
    type Decoder = ProstDecoder<U>;

    fn encoder(&mut self) -> Self::Encoder {
        ProstEncoder(PhantomData)
    }

    fn decoder(&mut self) -> Self::Decoder {
        ProstDecoder(PhantomData)
    }
}

/// Encodes a `prost::Message` using its own `encode_raw`, writing straight
/// into the frame buffer the core codec supplies rather than through an
/// intermediate `Vec`.
#[derive(Default)]
pub struct ProstEncoder<T>(PhantomData<T>);

impl<T: Message> Encoder for ProstEncoder<T> {
    type Item = T;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        item.encode(dst)
            .map_err(|err| Status::internal(format!("error encoding protobuf message: {err}")))
    }
}

/// Decodes a `prost::Message` from the already-length-delimited,
/// already-decompressed bytes the core codec hands to every [`Decoder`].
#[derive(Default)]
pub struct ProstDecoder<U>(PhantomData<U>);

impl<U: Message + Default> Decoder for ProstDecoder<U> {
    type Item = U;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let item = Message::decode(src)
            .map(Option::Some)
            .map_err(from_decode_error)?;
        Ok(item)
    }
}

fn from_decode_error(error: prost::DecodeError) -> Status {
    // A malformed message body is the caller's fault, not ours.
    Status::internal(format!("error decoding protobuf message: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[derive(Clone, PartialEq, Message)]
    struct Greeting {
        #[prost(string, tag = "1")]
        name: String,
    }

    #[test]
    fn round_trips_a_message_through_the_codec() {
        let mut codec = ProstCodec::<Greeting, Greeting>::default();
        let mut buf = Vec::new();
        codec
            .encoder()
            .encode(
                Greeting {
                    name: "ferris".into(),
                },
                &mut EncodeBuf::new(&mut buf),
            )
            .unwrap();

        let mut bytes = BytesMut::from(&buf[..]);
        let decoded = codec
            .decoder()
            .decode(&mut DecodeBuf::new(&mut bytes))
            .unwrap()
            .unwrap();

        assert_eq!(decoded.name, "ferris");
    }

    #[test]
    fn decode_error_becomes_internal_status() {
        let mut codec = ProstCodec::<Greeting, Greeting>::default();
        let mut garbage = BytesMut::from(&b"\xff\xff\xff"[..]);
        let err = codec
            .decoder()
            .decode(&mut DecodeBuf::new(&mut garbage))
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Internal);
    }
}
