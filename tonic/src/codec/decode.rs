use super::{DecodeBuf, Decoder, RequestEncoding, HEADER_SIZE};
use crate::{metadata::MetadataMap, Code, Status};
use bytes::{Buf, BufMut, BytesMut};
use futures_core::Stream;
use futures_util::{future, ready};
use http_body::Body;
use std::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};
use tracing::trace;

const BUFFER_SIZE: usize = 8 * 1024;

/// A decoded stream of request messages, wrapping the incoming request body.
///
/// Generated unary/streaming handlers never see this type directly; the
/// [`crate::server::Grpc`] dispatcher drives it internally and hands the
/// handler plain values or a `Stream` of them, but it's exposed for
/// handwritten services that want to read message-by-message (`spec.md`
/// §4.2, Framing Codec; §4.1, Dispatcher).
pub struct Streaming<T> {
    decoder: Box<dyn Decoder<Item = T, Error = Status> + Send + 'static>,
    body: crate::body::BoxBody,
    state: State,
    buf: BytesMut,
    trailers: Option<MetadataMap>,
    decompress_buf: BytesMut,
    encoding: RequestEncoding,
    max_message_size: Option<usize>,
    cancellation: Option<Box<dyn Fn() -> bool + Send + Sync>>,
}

impl<T> Unpin for Streaming<T> {}

#[derive(Debug)]
enum State {
    ReadHeader,
    ReadBody { compression: bool, len: usize },
    Error,
}

impl<T> Streaming<T> {
    pub(crate) fn new<B, D>(
        decoder: D,
        body: B,
        encoding: RequestEncoding,
        max_message_size: Option<usize>,
    ) -> Self
    where
        B: Body + Send + 'static,
        B::Error: Into<crate::BoxError>,
        D: Decoder<Item = T, Error = Status> + Send + 'static,
    {
        Streaming {
            decoder: Box::new(decoder),
            body: crate::body::boxed(body),
            state: State::ReadHeader,
            buf: BytesMut::with_capacity(BUFFER_SIZE),
            trailers: None,
            decompress_buf: BytesMut::new(),
            encoding,
            max_message_size,
            cancellation: None,
        }
    }

    /// Wires a cancellation source (typically a call's deadline/abort
    /// token) so a read blocked on more body frames fails fast with
    /// `Internal("Incoming message cancelled.")` instead of hanging until
    /// the transport itself gives up (`spec.md` §4.1, Framing Codec read
    /// contract).
    pub(crate) fn with_cancellation(
        mut self,
        is_cancelled: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        self.cancellation = Some(Box::new(is_cancelled));
        self
    }

    /// Fetches the next message, or `None` once the stream is exhausted.
    pub async fn message(&mut self) -> Result<Option<T>, Status> {
        match future::poll_fn(|cx| Pin::new(&mut *self).poll_next(cx)).await {
            Some(Ok(m)) => Ok(Some(m)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    /// Trailing metadata the client sent after the last message, if any.
    /// Draining [`Streaming::message`] to completion first is required for
    /// this to observe anything (`http2` only delivers trailers after the
    /// body is fully read).
    pub async fn trailers(&mut self) -> Result<Option<MetadataMap>, Status> {
        if let Some(trailers) = self.trailers.take() {
            return Ok(Some(trailers));
        }
        while self.message().await?.is_some() {}
        Ok(self.trailers.take())
    }

    fn decode_chunk(&mut self) -> Result<Option<T>, Status> {
        if let State::ReadHeader = self.state {
            if self.buf.remaining() < HEADER_SIZE {
                return Ok(None);
            }

            let is_compressed = match self.buf.get_u8() {
                0 => false,
                1 => {
                    match self.encoding {
                        RequestEncoding::Absent => {
                            return Err(Status::internal(
                                "Request did not include grpc-encoding value with compressed message.",
                            ));
                        }
                        RequestEncoding::Identity => {
                            return Err(Status::internal(
                                "Request sent 'identity' grpc-encoding value with compressed message.",
                            ));
                        }
                        RequestEncoding::Compressed(_) => {}
                    }
                    true
                }
                f => {
                    return Err(Status::internal(format!(
                        "protocol error: received message with invalid compression flag: {f} (valid flags are 0 and 1)"
                    )));
                }
            };

            let len = self.buf.get_u32() as usize;

            if let Some(max) = self.max_message_size {
                if len > max {
                    return Err(Status::resource_exhausted(
                        "Received message exceeds the maximum configured message size.",
                    ));
                }
            }

            self.buf.reserve(len);
            self.state = State::ReadBody {
                compression: is_compressed,
                len,
            };
        }

        if let State::ReadBody { len, compression } = &self.state {
            if self.buf.remaining() < *len {
                return Ok(None);
            }

            let decoding_result = if *compression {
                self.decompress_buf.clear();
                super::compression::decompress(
                    self.encoding.compression().expect("checked in ReadHeader"),
                    &mut self.buf,
                    &mut self.decompress_buf,
                    *len,
                )
                .map_err(|err| {
                    Status::internal(format!("error decompressing message: {err}"))
                })?;
                let mut decompressed = std::mem::take(&mut self.decompress_buf);
                let result = self
                    .decoder
                    .decode(&mut DecodeBuf::new(&mut decompressed));
                self.decompress_buf = decompressed;
                result
            } else {
                let mut body = self.buf.split_to(*len);
                self.decoder.decode(&mut DecodeBuf::new(&mut body))
            };

            return match decoding_result {
                Ok(Some(msg)) => {
                    self.state = State::ReadHeader;
                    Ok(Some(msg))
                }
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            };
        }

        Ok(None)
    }
}

impl<T> Stream for Streaming<T> {
    type Item = Result<T, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let State::Error = &self.state {
                return Poll::Ready(None);
            }

            if let Some(item) = self.decode_chunk()? {
                return Poll::Ready(Some(Ok(item)));
            }

            if self.cancellation.as_ref().is_some_and(|is_cancelled| is_cancelled()) {
                self.state = State::Error;
                return Poll::Ready(Some(Err(Status::internal(
                    "Incoming message cancelled.",
                ))));
            }

            let chunk = match ready!(Pin::new(&mut self.body).poll_frame(cx)) {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => Some(data),
                    Err(frame) => {
                        if let Ok(trailers) = frame.into_trailers() {
                            self.trailers = Some(MetadataMap::from_headers(trailers));
                        }
                        None
                    }
                },
                Some(Err(e)) => {
                    self.state = State::Error;
                    let status = Status::from_error(e.into());
                    return Poll::Ready(Some(Err(status)));
                }
                None => None,
            };

            if let Some(mut data) = chunk {
                self.buf.put(data.copy_to_bytes(data.remaining()));
            } else if self.buf.has_remaining() {
                trace!("unexpected EOF decoding stream");
                self.state = State::Error;
                return Poll::Ready(Some(Err(Status::internal("Incomplete message."))));
            } else {
                return Poll::Ready(None);
            }
        }
    }
}

impl<T> fmt::Debug for Streaming<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Streaming").finish()
    }
}

pub(crate) fn decode_body<B>(body: B) -> crate::body::BoxBody
where
    B: Body + Send + 'static,
    B::Error: Into<crate::BoxError>,
{
    crate::body::boxed(body)
}

#[cfg(test)]
static_assertions::assert_impl_all!(Streaming<()>: Send);
