use crate::{
    body::BoxBody,
    codec::{
        CompressionEncoding, Codec, EnabledCompressionEncodings, RequestEncoding, Streaming,
        encode_server,
    },
    metadata::{GRPC_CONTENT_TYPE, GRPC_ENCODING_HEADER},
    server::deadline::DeadlineManager,
    server::observability::Metrics,
    server::service::{ClientStreamingService, ServerStreamingService, StreamingService, UnaryService},
    Code, Request, Status,
};
use futures_core::Stream;
use futures_util::{future, stream, TryStreamExt};
use http::StatusCode;
use http_body::Body;
use std::fmt;
use std::time::Duration;

/// The dispatcher: decodes one request body into typed message(s), calls
/// into a generated handler trait, and re-encodes whatever it returns back
/// into an `http::Response<BoxBody>` with gRPC framing and trailers
/// (`spec.md` §4.1, Dispatcher).
///
/// One `Grpc<T>` is built per method by generated service registration code,
/// parameterized by that method's [`Codec`].
pub struct Grpc<T> {
    codec: T,
    accept_compression_encodings: EnabledCompressionEncodings,
    send_compression_encodings: EnabledCompressionEncodings,
    max_decoding_message_size: Option<usize>,
    max_encoding_message_size: Option<usize>,
    server_timeout: Option<Duration>,
    detailed_errors: bool,
    metrics: Metrics,
}

impl<T> Grpc<T>
where
    T: Codec,
{
    /// Creates a dispatcher for `codec`, with no compression and no size
    /// limit configured.
    pub fn new(codec: T) -> Self {
        Grpc {
            codec,
            accept_compression_encodings: EnabledCompressionEncodings::default(),
            send_compression_encodings: EnabledCompressionEncodings::default(),
            max_decoding_message_size: None,
            max_encoding_message_size: None,
            server_timeout: None,
            detailed_errors: false,
            metrics: Metrics::default(),
        }
    }

    /// Enables accepting `encoding`-compressed requests.
    pub fn accept_compressed(mut self, encoding: CompressionEncoding) -> Self {
        self.accept_compression_encodings.enable(encoding);
        self
    }

    /// Enables sending `encoding`-compressed responses.
    pub fn send_compressed(mut self, encoding: CompressionEncoding) -> Self {
        self.send_compression_encodings.enable(encoding);
        self
    }

    /// Caps the decoded message size (before the length prefix, after
    /// decompression); requests exceeding it fail with
    /// `Code::ResourceExhausted` (`spec.md` §8, "message too large").
    pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
        self.max_decoding_message_size = Some(limit);
        self
    }

    /// Caps the encoded response message size (before compression, before
    /// framing); responses exceeding it fail with `Code::ResourceExhausted`
    /// instead of writing anything (`spec.md` §4.1, Framing Codec write
    /// contract).
    pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
        self.max_encoding_message_size = Some(limit);
        self
    }

    /// A ceiling applied regardless of what the client requests via
    /// `grpc-timeout`; the call's effective deadline is the shorter of the
    /// two (`spec.md` §4.3, Deadline Manager).
    pub fn server_timeout(mut self, timeout: Duration) -> Self {
        self.server_timeout = Some(timeout);
        self
    }

    /// Shares a process-wide [`Metrics`] handle across every call this
    /// dispatcher serves, instead of each `Grpc<T>` tracking its own
    /// isolated counters (`spec.md` §4.11, Observability).
    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Whether a status the error mapper produced from an opaque failure
    /// (as opposed to one a handler built deliberately) reports its real
    /// message or a fixed placeholder (`spec.md` §4.7/§4.8, `detailed_errors`).
    pub fn detailed_errors(mut self, enabled: bool) -> Self {
        self.detailed_errors = enabled;
        self
    }

    fn deadline_manager<B>(&self, req: &http::Request<B>) -> DeadlineManager {
        DeadlineManager::from_headers(req.headers(), self.server_timeout)
    }

    /// The shared transport/content-type precondition gate every call kind
    /// runs through before a context is even created (`spec.md` §4.5, Call
    /// Handlers, "shared invariants"). Rejects with a bare HTTP status
    /// (415/426) plus `grpc-status: Internal`, never reaching the handler.
    fn validate_transport<B>(&self, req: &http::Request<B>) -> Result<(), http::Response<BoxBody>> {
        if req.version() != http::Version::HTTP_2 && req.version() != http::Version::HTTP_3 {
            tracing::info!(version = ?req.version(), "rejecting call: unsupported protocol version");
            return Err(Status::internal("Protocol Error")
                .to_http_with_status(StatusCode::UPGRADE_REQUIRED));
        }

        let content_type_ok = req
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(crate::metadata::is_grpc_content_type);

        if !content_type_ok {
            tracing::info!("rejecting call: unsupported or missing content-type");
            return Err(Status::internal("Content-Type must be \"application/grpc\"")
                .to_http_with_status(StatusCode::UNSUPPORTED_MEDIA_TYPE));
        }

        Ok(())
    }

    fn request_compression<B>(&self, req: &http::Request<B>) -> Result<RequestEncoding, Status> {
        let Some(value) = req.headers().get(GRPC_ENCODING_HEADER) else {
            return Ok(RequestEncoding::Absent);
        };
        let name = value.to_str().unwrap_or_default();
        if name == "identity" {
            return Ok(RequestEncoding::Identity);
        }
        match CompressionEncoding::from_str(name) {
            Some(encoding) if self.accept_compression_encodings.is_enabled(encoding) => {
                Ok(RequestEncoding::Compressed(encoding))
            }
            _ => Err(Status::unimplemented(format!(
                "Unsupported grpc-encoding value '{name}'. Supported encodings: {}",
                self.accept_compression_encodings.accept_encoding_header()
            ))),
        }
    }

    fn response_compression<B>(&self, req: &http::Request<B>) -> Option<CompressionEncoding> {
        // `grpc-internal-encoding-request` forces the response encoding
        // regardless of what the client advertised via
        // `grpc-accept-encoding`; it's consumed here and never copied
        // verbatim onto the response (`spec.md` §3, "Response" metadata).
        if let Some(forced) = req
            .headers()
            .get(crate::metadata::GRPC_INTERNAL_ENCODING_REQUEST)
            .and_then(|v| v.to_str().ok())
            .and_then(CompressionEncoding::from_str)
            .filter(|encoding| self.send_compression_encodings.is_enabled(*encoding))
        {
            return Some(forced);
        }

        let accept = req.headers().get(crate::metadata::GRPC_ACCEPT_ENCODING_HEADER)?;
        let accept = accept.to_str().ok()?;
        accept
            .split(',')
            .filter_map(|name| CompressionEncoding::from_str(name.trim()))
            .find(|encoding| self.send_compression_encodings.is_enabled(*encoding))
    }

    /// Finishes a call after racing the handler against `deadline`: builds
    /// the `http::Response` (which is the point the trailers carrying
    /// `DeadlineExceeded`, if any, are committed), resets the transport
    /// stream if the deadline fired, and waits out any in-flight firing
    /// before returning (`spec.md` §4.3, "trailers written, body completed,
    /// stream reset" ordering; `dispose`).
    async fn finish<S>(
        &mut self,
        deadline: &DeadlineManager,
        response: Result<crate::Response<S>, Status>,
        send_encoding: Option<CompressionEncoding>,
    ) -> http::Response<BoxBody>
    where
        S: Stream<Item = Result<T::Encode, Status>> + Send + 'static,
    {
        let deadline_exceeded =
            matches!(response.as_ref(), Err(status) if status.code() == Code::DeadlineExceeded);
        let http_response = self.map_response(response, send_encoding);
        if deadline_exceeded {
            deadline.cancel_request();
        }
        deadline.dispose().await;
        http_response
    }

    /// Handles a single unary call.
    pub async fn unary<S, B>(&mut self, mut service: S, req: http::Request<B>) -> http::Response<BoxBody>
    where
        S: UnaryService<T::Decode, Response = T::Encode>,
        B: Body + Send + 'static,
        B::Error: Into<crate::BoxError>,
    {
        if let Err(rejection) = self.validate_transport(&req) {
            return rejection;
        }
        let mut guard = self.metrics.call_started();

        let send_encoding = self.response_compression(&req);
        let deadline = self.deadline_manager(&req);

        let request = match self.map_request_unary(req, deadline.cancellation_token()).await {
            Ok(r) => {
                self.metrics.message_received();
                r
            }
            Err(status) => {
                guard.record_outcome(status.code());
                deadline.try_set_complete();
                return self.map_response::<stream::Once<future::Ready<Result<T::Encode, Status>>>>(Err(status), send_encoding);
            }
        };

        let response = deadline
            .race(async { service.call(request).await })
            .await
            .map(|r| r.map(|m| stream::once(future::ok(m))));

        guard.record_outcome(response.as_ref().map_or_else(|s| s.code(), |_| Code::Ok));
        if response.is_ok() {
            self.metrics.message_sent();
        }
        self.finish(&deadline, response, send_encoding).await
    }

    /// Handles a single server-streaming call.
    pub async fn server_streaming<S, B>(
        &mut self,
        mut service: S,
        req: http::Request<B>,
    ) -> http::Response<BoxBody>
    where
        S: ServerStreamingService<T::Decode, Response = T::Encode>,
        S::ResponseStream: Send + 'static,
        B: Body + Send + 'static,
        B::Error: Into<crate::BoxError>,
    {
        if let Err(rejection) = self.validate_transport(&req) {
            return rejection;
        }
        let mut guard = self.metrics.call_started();

        let send_encoding = self.response_compression(&req);
        let deadline = self.deadline_manager(&req);

        let request = match self.map_request_unary(req, deadline.cancellation_token()).await {
            Ok(r) => {
                self.metrics.message_received();
                r
            }
            Err(status) => {
                guard.record_outcome(status.code());
                deadline.try_set_complete();
                return self.map_response::<S::ResponseStream>(Err(status), send_encoding);
            }
        };

        let response = deadline.race(async { service.call(request).await }).await;
        guard.record_outcome(response.as_ref().map_or_else(|s| s.code(), |_| Code::Ok));
        self.finish(&deadline, response, send_encoding).await
    }

    /// Handles a single client-streaming call.
    pub async fn client_streaming<S, B>(
        &mut self,
        mut service: S,
        req: http::Request<B>,
    ) -> http::Response<BoxBody>
    where
        S: ClientStreamingService<T::Decode, Response = T::Encode>,
        B: Body + Send + 'static,
        B::Error: Into<crate::BoxError>,
    {
        if let Err(rejection) = self.validate_transport(&req) {
            return rejection;
        }
        let mut guard = self.metrics.call_started();

        let send_encoding = self.response_compression(&req);
        let deadline = self.deadline_manager(&req);

        let request = match self.map_request_streaming(req, deadline.cancellation_token()) {
            Ok(r) => r,
            Err(status) => {
                guard.record_outcome(status.code());
                deadline.try_set_complete();
                return self.map_response::<stream::Once<future::Ready<Result<T::Encode, Status>>>>(Err(status), send_encoding);
            }
        };

        let response = deadline
            .race(async { service.call(request).await })
            .await
            .map(|r| r.map(|m| stream::once(future::ok(m))));

        guard.record_outcome(response.as_ref().map_or_else(|s| s.code(), |_| Code::Ok));
        if response.is_ok() {
            self.metrics.message_sent();
        }
        self.finish(&deadline, response, send_encoding).await
    }

    /// Handles a single bidirectional-streaming call.
    pub async fn streaming<S, B>(&mut self, mut service: S, req: http::Request<B>) -> http::Response<BoxBody>
    where
        S: StreamingService<T::Decode, Response = T::Encode>,
        S::ResponseStream: Send + 'static,
        B: Body + Send + 'static,
        B::Error: Into<crate::BoxError>,
    {
        if let Err(rejection) = self.validate_transport(&req) {
            return rejection;
        }
        let mut guard = self.metrics.call_started();

        let send_encoding = self.response_compression(&req);
        let deadline = self.deadline_manager(&req);

        let request = match self.map_request_streaming(req, deadline.cancellation_token()) {
            Ok(r) => r,
            Err(status) => {
                guard.record_outcome(status.code());
                deadline.try_set_complete();
                return self.map_response::<S::ResponseStream>(Err(status), send_encoding);
            }
        };

        let response = deadline.race(async { service.call(request).await }).await;
        guard.record_outcome(response.as_ref().map_or_else(|s| s.code(), |_| Code::Ok));
        self.finish(&deadline, response, send_encoding).await
    }

    async fn map_request_unary<B>(
        &mut self,
        request: http::Request<B>,
        cancellation: tokio_util::sync::CancellationToken,
    ) -> Result<Request<T::Decode>, Status>
    where
        B: Body + Send + 'static,
        B::Error: Into<crate::BoxError>,
    {
        let encoding = self.request_compression(&request)?;
        let (parts, body) = request.into_parts();
        let stream = Streaming::new(
            self.codec.decoder(),
            body,
            encoding,
            self.max_decoding_message_size,
        )
        .with_cancellation(move || cancellation.is_cancelled());
        futures_util::pin_mut!(stream);

        let message = stream
            .try_next()
            .await?
            .ok_or_else(|| Status::new(Code::Internal, "missing request message"))?;

        if stream.try_next().await?.is_some() {
            return Err(Status::internal(
                "Additional data after the message received.",
            ));
        }

        let mut req = Request::from_http_parts(parts, message);
        if let Some(trailers) = stream.trailers().await? {
            req.metadata_mut().merge(trailers);
        }
        Ok(req)
    }

    fn map_request_streaming<B>(
        &mut self,
        request: http::Request<B>,
        cancellation: tokio_util::sync::CancellationToken,
    ) -> Result<Request<Streaming<T::Decode>>, Status>
    where
        B: Body + Send + 'static,
        B::Error: Into<crate::BoxError>,
    {
        let encoding = self.request_compression(&request)?;
        let max = self.max_decoding_message_size;
        let decoder = self.codec.decoder();
        Ok(Request::from_http(request.map(|body| {
            Streaming::new(decoder, body, encoding, max)
                .with_cancellation(move || cancellation.is_cancelled())
        })))
    }

    fn map_response<S>(
        &mut self,
        response: Result<crate::Response<S>, Status>,
        encoding: Option<CompressionEncoding>,
    ) -> http::Response<BoxBody>
    where
        S: Stream<Item = Result<T::Encode, Status>> + Send + 'static,
    {
        let response = match response {
            Ok(r) => r,
            Err(status) => {
                let mut rejection = status.redact_unless_detailed(self.detailed_errors).to_http();
                if let Ok(value) = http::HeaderValue::from_str(
                    &self.accept_compression_encodings.accept_encoding_header(),
                ) {
                    rejection
                        .headers_mut()
                        .insert(crate::metadata::GRPC_ACCEPT_ENCODING_HEADER, value);
                }
                return rejection;
            }
        };

        let (mut parts, body) = response.into_http().into_parts();

        parts.headers.insert(
            http::header::CONTENT_TYPE,
            http::header::HeaderValue::from_static(GRPC_CONTENT_TYPE),
        );

        if let Some(encoding) = encoding {
            parts.headers.insert(
                GRPC_ENCODING_HEADER,
                http::HeaderValue::from_static(encoding.as_str()),
            );
        }

        if let Ok(value) =
            http::HeaderValue::from_str(&self.accept_compression_encodings.accept_encoding_header())
        {
            parts
                .headers
                .insert(crate::metadata::GRPC_ACCEPT_ENCODING_HEADER, value);
        }

        let encoded = encode_server(
            self.codec.encoder(),
            Box::pin(body),
            encoding,
            self.max_encoding_message_size,
        );

        http::Response::from_parts(parts, crate::body::boxed(encoded))
    }
}

impl<T: fmt::Debug> fmt::Debug for Grpc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grpc").field("codec", &self.codec).finish()
    }
}
