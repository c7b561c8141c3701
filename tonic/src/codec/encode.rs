use super::{CompressionEncoding, EncodeBuf, Encoder};
use crate::Status;
use bytes::{BufMut, Bytes, BytesMut};
use futures_core::Stream;
use http::HeaderMap;
use http_body::{Body, Frame};
use std::{
    pin::Pin,
    task::{Context, Poll},
};

/// Wraps a stream of response messages into an `http_body::Body` that emits
/// length-prefixed gRPC frames, followed by the `grpc-status`/`grpc-message`
/// trailer once the stream ends or errors (`spec.md` §2, Framing Codec;
/// §4.1, Dispatcher: "on handler completion, produce trailers").
pub(crate) fn encode_server<T, E, S>(
    encoder: E,
    source: S,
    compression: Option<CompressionEncoding>,
    max_message_size: Option<usize>,
) -> EncodeBody<T, E, S>
where
    E: Encoder<Item = T, Error = Status>,
    S: Stream<Item = Result<T, Status>>,
{
    EncodeBody {
        encoder,
        source,
        compression,
        max_message_size,
        done: false,
        _item: std::marker::PhantomData,
    }
}

pub(crate) struct EncodeBody<T, E, S> {
    encoder: E,
    source: S,
    compression: Option<CompressionEncoding>,
    max_message_size: Option<usize>,
    done: bool,
    _item: std::marker::PhantomData<fn() -> T>,
}

impl<T, E, S> Unpin for EncodeBody<T, E, S> where S: Unpin {}

impl<T, E, S> EncodeBody<T, E, S>
where
    E: Encoder<Item = T, Error = Status>,
{
    fn encode_item(&mut self, item: T) -> Result<Bytes, Status> {
        let mut payload = BytesMut::new();
        self.encoder.encode(item, &mut EncodeBuf::new(&mut payload))?;

        if let Some(max) = self.max_message_size {
            if payload.len() > max {
                return Err(Status::resource_exhausted(
                    "Sending message exceeds the maximum configured message size.",
                ));
            }
        }

        let (compressed_flag, body) = match self.compression {
            Some(encoding) => {
                let mut compressed = Vec::new();
                super::compression::compress(encoding, &payload, &mut compressed)
                    .map_err(|e| Status::internal(format!("error compressing message: {e}")))?;
                (true, Bytes::from(compressed))
            }
            None => (false, payload.freeze()),
        };

        let mut framed = BytesMut::with_capacity(super::HEADER_SIZE + body.len());
        framed.put_slice(&super::frame_header(compressed_flag, body.len() as u32));
        framed.put_slice(&body);
        Ok(framed.freeze())
    }

    fn trailers_for(status: &Status) -> HeaderMap {
        let mut trailers = HeaderMap::new();
        status
            .add_header(&mut trailers)
            .expect("status header values are always valid");
        trailers
    }
}

impl<T, E, S> Body for EncodeBody<T, E, S>
where
    E: Encoder<Item = T, Error = Status> + Unpin,
    S: Stream<Item = Result<T, Status>> + Unpin,
{
    type Data = Bytes;
    type Error = std::convert::Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        if this.done {
            return Poll::Ready(None);
        }

        match Pin::new(&mut this.source).poll_next(cx) {
            Poll::Ready(Some(Ok(item))) => match this.encode_item(item) {
                Ok(bytes) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
                Err(status) => {
                    this.done = true;
                    Poll::Ready(Some(Ok(Frame::trailers(Self::trailers_for(&status)))))
                }
            },
            Poll::Ready(Some(Err(status))) => {
                this.done = true;
                Poll::Ready(Some(Ok(Frame::trailers(Self::trailers_for(&status)))))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(Some(Ok(Frame::trailers(Self::trailers_for(&Status::ok())))))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DecodeBuf, Decoder};
    use bytes::{Buf, BufMut};
    use futures_util::stream;
    use http_body_util::BodyExt;

    #[derive(Default)]
    struct IdentityEncoder;

    impl Encoder for IdentityEncoder {
        type Item = Bytes;
        type Error = Status;

        fn encode(&mut self, item: Bytes, dst: &mut EncodeBuf<'_>) -> Result<(), Status> {
            dst.put_slice(&item);
            Ok(())
        }
    }

    impl Decoder for IdentityEncoder {
        type Item = Bytes;
        type Error = Status;

        fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Bytes>, Status> {
            Ok(Some(src.copy_to_bytes(src.remaining())))
        }
    }

    #[tokio::test]
    async fn encodes_frame_then_ok_trailer() {
        let source = stream::iter(vec![Ok(Bytes::from_static(b"hi"))]);
        let body = encode_server(IdentityEncoder, source, None, None);
        let collected = body.collect().await.unwrap();
        let trailers = collected.trailers().unwrap();
        assert_eq!(trailers.get("grpc-status").unwrap(), "0");
    }

    #[tokio::test]
    async fn oversized_message_fails_before_writing_anything() {
        let source = stream::iter(vec![Ok(Bytes::from_static(b"this is too long"))]);
        let body = encode_server(IdentityEncoder, source, None, Some(4));
        let collected = body.collect().await.unwrap();
        let trailers = collected.trailers().unwrap();
        assert_eq!(trailers.get("grpc-status").unwrap(), "8");
        assert_eq!(
            trailers.get("grpc-message").unwrap(),
            "Sending message exceeds the maximum configured message size."
        );
        assert!(collected.to_bytes().is_empty(), "no frame should have been written");
    }
}
