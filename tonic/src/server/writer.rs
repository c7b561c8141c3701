//! Pushing response messages to a streaming call one at a time: the write
//! half of Module 7's reader/writer pair (`spec.md` §4.4, Server Call
//! Context: Writer operations).
//!
//! [`crate::codec::Streaming`] is the read half; generated streaming
//! handlers that would rather push messages imperatively than build a
//! [`futures_core::Stream`] by hand use [`writer_channel`] instead, which
//! hands back a [`Writer`] plus the `Stream` [`ServerStreamingService`] and
//! [`StreamingService`] expect.
//!
//! [`ServerStreamingService`]: crate::server::ServerStreamingService
//! [`StreamingService`]: crate::server::StreamingService

use crate::Status;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Per-write knobs, passed through to the framing codec (`spec.md` §4.4,
/// `write_options`). Neither field changes what's sent over the wire today
/// (there's no write coalescing or per-message compression override yet);
/// they exist so a handler can express intent and a future transport layer
/// can act on it without another API break.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Hints that another write is coming soon, so the transport may delay
    /// flushing this one onto the wire.
    pub buffer_hint: bool,
    /// Skips compression for this one message even if the call negotiated
    /// an encoding.
    pub no_compress: bool,
}

struct Shared {
    in_flight: AtomicBool,
    complete: AtomicBool,
    cancellation: CancellationToken,
}

/// A handle for pushing response messages to a single streaming call.
/// Enforces at most one write in flight and refuses writes once the call
/// has completed or its cancellation token has fired (`spec.md` §4.4,
/// Writer concurrency contract).
pub struct Writer<T> {
    sender: mpsc::Sender<Result<T, Status>>,
    shared: Arc<Shared>,
}

impl<T> Clone for Writer<T> {
    fn clone(&self) -> Self {
        Writer {
            sender: self.sender.clone(),
            shared: self.shared.clone(),
        }
    }
}

/// Builds a [`Writer`] paired with the `Stream` the dispatcher drains into
/// the wire. `buffer` bounds how many written-but-not-yet-drained messages
/// may queue up before a write blocks.
pub fn writer_channel<T: Send + 'static>(
    buffer: usize,
    cancellation: CancellationToken,
) -> (Writer<T>, ReceiverStream<Result<T, Status>>) {
    let (tx, rx) = mpsc::channel(buffer);
    let writer = Writer {
        sender: tx,
        shared: Arc::new(Shared {
            in_flight: AtomicBool::new(false),
            complete: AtomicBool::new(false),
            cancellation,
        }),
    };
    (writer, ReceiverStream::new(rx))
}

impl<T> Writer<T> {
    /// Writes one message with default [`WriteOptions`].
    pub async fn write(&self, message: T) -> Result<(), Status> {
        self.write_with(message, WriteOptions::default()).await
    }

    /// Writes one error status, ending the stream with it once drained.
    pub async fn write_error(&self, status: Status) -> Result<(), Status> {
        self.begin_write()?;
        let sent = self.sender.send(Err(status)).await.is_ok();
        self.shared.in_flight.store(false, Ordering::SeqCst);
        self.shared.complete.store(true, Ordering::SeqCst);
        if sent {
            Ok(())
        } else {
            Err(Status::internal(
                "Can't write the message because the request is complete.",
            ))
        }
    }

    /// Writes one message, applying `options`.
    pub async fn write_with(&self, message: T, _options: WriteOptions) -> Result<(), Status> {
        self.begin_write()?;
        let sent = self.sender.send(Ok(message)).await.is_ok();
        self.shared.in_flight.store(false, Ordering::SeqCst);
        if sent {
            Ok(())
        } else {
            self.shared.complete.store(true, Ordering::SeqCst);
            Err(Status::internal(
                "Can't write the message because the request is complete.",
            ))
        }
    }

    fn begin_write(&self) -> Result<(), Status> {
        if self.shared.complete.load(Ordering::SeqCst) || self.shared.cancellation.is_cancelled() {
            return Err(Status::internal(
                "Can't write the message because the request is complete.",
            ));
        }
        if self.shared.in_flight.swap(true, Ordering::SeqCst) {
            return Err(Status::internal(
                "Can't write the message because the previous write is in progress.",
            ));
        }
        Ok(())
    }

    /// Marks the call complete: further writes fail with
    /// `Internal("Can't write the message because the request is complete.")`.
    pub fn complete(&self) {
        self.shared.complete.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_write_fails_while_the_first_is_in_flight() {
        let (writer, _stream) = writer_channel::<u32>(0, CancellationToken::new());

        let first = writer.clone();
        let first_write = tokio::spawn(async move { first.write(1).await });

        // The channel has no buffer, so `first_write` is parked on `send`
        // until something reads from `_stream`; a concurrent write must
        // observe `in_flight` and fail immediately.
        tokio::task::yield_now().await;
        let err = writer.write(2).await.unwrap_err();
        assert_eq!(
            err.message(),
            "Can't write the message because the previous write is in progress."
        );

        drop(_stream);
        let _ = first_write.await;
    }

    #[tokio::test]
    async fn write_after_complete_fails() {
        let (writer, _stream) = writer_channel::<u32>(4, CancellationToken::new());
        writer.complete();
        let err = writer.write(1).await.unwrap_err();
        assert_eq!(
            err.message(),
            "Can't write the message because the request is complete."
        );
    }

    #[tokio::test]
    async fn write_after_cancellation_fails() {
        let cancellation = CancellationToken::new();
        let (writer, _stream) = writer_channel::<u32>(4, cancellation.clone());
        cancellation.cancel();
        let err = writer.write(1).await.unwrap_err();
        assert_eq!(
            err.message(),
            "Can't write the message because the request is complete."
        );
    }

    #[tokio::test]
    async fn write_after_stream_is_dropped_reports_complete() {
        let (writer, stream) = writer_channel::<u32>(4, CancellationToken::new());
        drop(stream);
        let err = writer.write(1).await.unwrap_err();
        assert_eq!(
            err.message(),
            "Can't write the message because the request is complete."
        );
    }
}
