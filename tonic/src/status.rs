use crate::metadata::MetadataMap;
use crate::percent_encoding::{percent_decode, percent_encode};
use http::{
    header::{HeaderMap, HeaderValue},
    StatusCode,
};
use std::{borrow::Cow, error::Error, fmt};

pub(crate) const GRPC_STATUS_HEADER_CODE: &str = "grpc-status";
const GRPC_STATUS_MESSAGE_HEADER: &str = "grpc-message";

/// A gRPC status code, the set of canonical values a handler or the runtime
/// itself may terminate a call with. See the [gRPC status code
/// documentation] for the exact semantics of each variant.
///
/// [gRPC status code documentation]: https://github.com/grpc/grpc/blob/master/doc/statuscodes.md
#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash)]
#[non_exhaustive]
pub enum Code {
    /// The operation completed successfully.
    Ok = 0,
    /// The operation was cancelled.
    Cancelled = 1,
    /// Unknown error.
    Unknown = 2,
    /// Client specified an invalid argument.
    InvalidArgument = 3,
    /// Deadline expired before operation could complete.
    DeadlineExceeded = 4,
    /// Some requested entity was not found.
    NotFound = 5,
    /// Some entity that we attempted to create already exists.
    AlreadyExists = 6,
    /// The caller does not have permission to execute the specified operation.
    PermissionDenied = 7,
    /// Some resource has been exhausted.
    ResourceExhausted = 8,
    /// The system is not in a state required for the operation's execution.
    FailedPrecondition = 9,
    /// The operation was aborted.
    Aborted = 10,
    /// Operation was attempted past the valid range.
    OutOfRange = 11,
    /// Operation is not implemented or not supported.
    Unimplemented = 12,
    /// Internal error.
    Internal = 13,
    /// The service is currently unavailable.
    Unavailable = 14,
    /// Unrecoverable data loss or corruption.
    DataLoss = 15,
    /// The request does not have valid authentication credentials.
    Unauthenticated = 16,
    /// A code that isn't part of the canonical set, preserved verbatim so
    /// that a numeric `grpc-status` we don't recognize still round-trips.
    Other(i32),
}

impl Code {
    /// Get the `Code` that represents the integer, if any.
    pub const fn from_i32(i: i32) -> Code {
        match i {
            0 => Code::Ok,
            1 => Code::Cancelled,
            2 => Code::Unknown,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            other => Code::Other(other),
        }
    }

    /// Get the value of this `Code` as its canonical integer value.
    pub const fn to_i32(self) -> i32 {
        match self {
            Code::Ok => 0,
            Code::Cancelled => 1,
            Code::Unknown => 2,
            Code::InvalidArgument => 3,
            Code::DeadlineExceeded => 4,
            Code::NotFound => 5,
            Code::AlreadyExists => 6,
            Code::PermissionDenied => 7,
            Code::ResourceExhausted => 8,
            Code::FailedPrecondition => 9,
            Code::Aborted => 10,
            Code::OutOfRange => 11,
            Code::Unimplemented => 12,
            Code::Internal => 13,
            Code::Unavailable => 14,
            Code::DataLoss => 15,
            Code::Unauthenticated => 16,
            Code::Other(other) => other,
        }
    }

    fn to_header_value(self) -> HeaderValue {
        match self {
            Code::Ok => HeaderValue::from_static("0"),
            Code::Cancelled => HeaderValue::from_static("1"),
            Code::Unknown => HeaderValue::from_static("2"),
            Code::InvalidArgument => HeaderValue::from_static("3"),
            Code::DeadlineExceeded => HeaderValue::from_static("4"),
            Code::NotFound => HeaderValue::from_static("5"),
            Code::AlreadyExists => HeaderValue::from_static("6"),
            Code::PermissionDenied => HeaderValue::from_static("7"),
            Code::ResourceExhausted => HeaderValue::from_static("8"),
            Code::FailedPrecondition => HeaderValue::from_static("9"),
            Code::Aborted => HeaderValue::from_static("10"),
            Code::OutOfRange => HeaderValue::from_static("11"),
            Code::Unimplemented => HeaderValue::from_static("12"),
            Code::Internal => HeaderValue::from_static("13"),
            Code::Unavailable => HeaderValue::from_static("14"),
            Code::DataLoss => HeaderValue::from_static("15"),
            Code::Unauthenticated => HeaderValue::from_static("16"),
            Code::Other(other) => HeaderValue::from_str(&other.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("2")),
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Code::Ok => "The operation completed successfully",
            Code::Cancelled => "The operation was cancelled",
            Code::Unknown => "Unknown error",
            Code::InvalidArgument => "Client specified an invalid argument",
            Code::DeadlineExceeded => "Deadline expired before operation could complete",
            Code::NotFound => "Some requested entity was not found",
            Code::AlreadyExists => "Some entity that we attempted to create already exists",
            Code::PermissionDenied => {
                "The caller does not have permission to execute the specified operation"
            }
            Code::ResourceExhausted => "Some resource has been exhausted",
            Code::FailedPrecondition => {
                "The system is not in a state required for the operation's execution"
            }
            Code::Aborted => "The operation was aborted",
            Code::OutOfRange => "Operation was attempted past the valid range",
            Code::Unimplemented => "Operation is not implemented or not supported",
            Code::Internal => "Internal error",
            Code::Unavailable => "The service is currently unavailable",
            Code::DataLoss => "Unrecoverable data loss or corruption",
            Code::Unauthenticated => "The request does not have valid authentication credentials",
            Code::Other(_) => "Unknown status code",
        }
    }

    fn parse_header(value: &HeaderValue) -> Code {
        value
            .to_str()
            .ok()
            .and_then(|s| s.parse::<i32>().ok())
            .map(Code::from_i32)
            .unwrap_or(Code::Unknown)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl From<i32> for Code {
    fn from(i: i32) -> Self {
        Code::from_i32(i)
    }
}

/// A gRPC status describing the result of an RPC call, carried in the
/// response trailers as `grpc-status` (+ `grpc-message` when non-OK).
///
/// `Status` is both the type handlers return to fail a call and the type the
/// error mapper (see [`Status::from_error`]) produces for failures that
/// didn't originate as an explicit `Status`.
#[derive(Clone)]
pub struct Status {
    code: Code,
    message: Cow<'static, str>,
    metadata: MetadataMap,
    /// The underlying cause, when this status was produced by the error
    /// mapper from an opaque failure rather than authored directly by
    /// handler code. Never transmitted; also the signal
    /// [`Status::redact_unless_detailed`] uses to tell the two apart.
    source: Option<std::sync::Arc<dyn Error + Send + Sync + 'static>>,
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("Status");
        builder.field("code", &self.code);
        if !self.message.is_empty() {
            builder.field("message", &self.message);
        }
        if !self.metadata.is_empty() {
            builder.field("metadata", &self.metadata);
        }
        if let Some(source) = &self.source {
            builder.field("source", source);
        }
        builder.finish()
    }
}

impl Status {
    /// Create a new `Status` with the given code and message.
    pub fn new(code: Code, message: impl Into<Cow<'static, str>>) -> Status {
        Status {
            code,
            message: message.into(),
            metadata: MetadataMap::new(),
            source: None,
        }
    }

    /// The `Ok` status, used to indicate a call completed with no error.
    pub fn ok() -> Status {
        Status::new(Code::Ok, "")
    }

    /// Create a `Status` with `Code::Cancelled`.
    pub fn cancelled(message: impl Into<Cow<'static, str>>) -> Status {
        Status::new(Code::Cancelled, message)
    }

    /// Create a `Status` with `Code::Unknown`.
    pub fn unknown(message: impl Into<Cow<'static, str>>) -> Status {
        Status::new(Code::Unknown, message)
    }

    /// Create a `Status` with `Code::InvalidArgument`.
    pub fn invalid_argument(message: impl Into<Cow<'static, str>>) -> Status {
        Status::new(Code::InvalidArgument, message)
    }

    /// Create a `Status` with `Code::DeadlineExceeded`.
    pub fn deadline_exceeded(message: impl Into<Cow<'static, str>>) -> Status {
        Status::new(Code::DeadlineExceeded, message)
    }

    /// Create a `Status` with `Code::NotFound`.
    pub fn not_found(message: impl Into<Cow<'static, str>>) -> Status {
        Status::new(Code::NotFound, message)
    }

    /// Create a `Status` with `Code::AlreadyExists`.
    pub fn already_exists(message: impl Into<Cow<'static, str>>) -> Status {
        Status::new(Code::AlreadyExists, message)
    }

    /// Create a `Status` with `Code::PermissionDenied`.
    pub fn permission_denied(message: impl Into<Cow<'static, str>>) -> Status {
        Status::new(Code::PermissionDenied, message)
    }

    /// Create a `Status` with `Code::ResourceExhausted`.
    pub fn resource_exhausted(message: impl Into<Cow<'static, str>>) -> Status {
        Status::new(Code::ResourceExhausted, message)
    }

    /// Create a `Status` with `Code::FailedPrecondition`.
    pub fn failed_precondition(message: impl Into<Cow<'static, str>>) -> Status {
        Status::new(Code::FailedPrecondition, message)
    }

    /// Create a `Status` with `Code::Aborted`.
    pub fn aborted(message: impl Into<Cow<'static, str>>) -> Status {
        Status::new(Code::Aborted, message)
    }

    /// Create a `Status` with `Code::OutOfRange`.
    pub fn out_of_range(message: impl Into<Cow<'static, str>>) -> Status {
        Status::new(Code::OutOfRange, message)
    }

    /// Create a `Status` with `Code::Unimplemented`.
    pub fn unimplemented(message: impl Into<Cow<'static, str>>) -> Status {
        Status::new(Code::Unimplemented, message)
    }

    /// Create a `Status` with `Code::Internal`.
    pub fn internal(message: impl Into<Cow<'static, str>>) -> Status {
        Status::new(Code::Internal, message)
    }

    /// Create a `Status` with `Code::Unavailable`.
    pub fn unavailable(message: impl Into<Cow<'static, str>>) -> Status {
        Status::new(Code::Unavailable, message)
    }

    /// Create a `Status` with `Code::DataLoss`.
    pub fn data_loss(message: impl Into<Cow<'static, str>>) -> Status {
        Status::new(Code::DataLoss, message)
    }

    /// Create a `Status` with `Code::Unauthenticated`.
    pub fn unauthenticated(message: impl Into<Cow<'static, str>>) -> Status {
        Status::new(Code::Unauthenticated, message)
    }

    /// Attach a source error to this status. Not transmitted over the wire;
    /// useful for local logging/observability.
    pub fn with_source(
        mut self,
        source: impl Error + Send + Sync + 'static,
    ) -> Status {
        self.source = Some(std::sync::Arc::new(source));
        self
    }

    /// Strips the message down to a fixed, non-identifying placeholder
    /// unless `detailed_errors` is enabled. Applied only to statuses the
    /// error mapper itself produced from an opaque failure (those carrying
    /// a `source`), never to a `Status` a handler constructed and returned
    /// deliberately (`spec.md` §4.8, Error Mapper: "message body is
    /// ... the exception's type/message when `detailed_errors` is
    /// enabled").
    pub(crate) fn redact_unless_detailed(self, detailed_errors: bool) -> Status {
        if detailed_errors || self.source.is_none() {
            return self;
        }
        Status {
            code: self.code,
            message: Cow::Borrowed("Exception was thrown by handler."),
            metadata: self.metadata,
            source: self.source,
        }
    }

    /// Get the gRPC `Code` of this `Status`.
    pub fn code(&self) -> Code {
        self.code
    }

    /// Get the human readable message of this `Status`.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns a reference to the custom metadata attached to this status,
    /// merged into the response trailers alongside `grpc-status`/`grpc-message`.
    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    /// Returns a mutable reference to the custom metadata.
    pub fn metadata_mut(&mut self) -> &mut MetadataMap {
        &mut self.metadata
    }

    /// The underlying cause of this status, if any was attached.
    pub fn source(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// True if this is the `Ok` status.
    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    /// Build a `Status` from a generic boxed error, used by the error mapper
    /// for exceptions that aren't already a `Status`. Maps to `Unknown`
    /// unless the error chain contains an I/O `TimedOut`/`Cancelled`-shaped
    /// error, in which case it's reported as `Cancelled`.
    pub fn from_error(err: crate::BoxError) -> Status {
        Status::try_from_error(err).unwrap_or_else(|err| {
            let mut status = Status::new(Code::Unknown, err.to_string());
            status.source = Some(std::sync::Arc::from(err));
            status
        })
    }

    fn try_from_error(err: crate::BoxError) -> Result<Status, crate::BoxError> {
        let mut source = Some(err.as_ref() as &(dyn Error + 'static));

        while let Some(err) = source {
            if let Some(status) = err.downcast_ref::<Status>() {
                return Ok(status.clone());
            }

            if let Some(h2) = err.downcast_ref::<h2::Error>() {
                return Ok(Status::from_h2_error(h2));
            }

            source = err.source();
        }

        Err(err)
    }

    fn from_h2_error(err: &h2::Error) -> Status {
        // https://github.com/grpc/grpc/blob/3977c30/doc/PROTOCOL-HTTP2.md#errors
        let code = match err.reason() {
            Some(h2::Reason::NO_ERROR)
            | Some(h2::Reason::PROTOCOL_ERROR)
            | Some(h2::Reason::INTERNAL_ERROR)
            | Some(h2::Reason::FLOW_CONTROL_ERROR)
            | Some(h2::Reason::SETTINGS_TIMEOUT)
            | Some(h2::Reason::COMPRESSION_ERROR)
            | Some(h2::Reason::CONNECT_ERROR) => Code::Internal,
            Some(h2::Reason::REFUSED_STREAM) => Code::Unavailable,
            Some(h2::Reason::CANCEL) => Code::Cancelled,
            Some(h2::Reason::ENHANCE_YOUR_CALM) => Code::ResourceExhausted,
            Some(h2::Reason::INADEQUATE_SECURITY) => Code::PermissionDenied,
            _ => Code::Internal,
        };

        Status::new(code, format!("h2 protocol error: {err}")).with_source(err.clone())
    }

    /// Parse a `Status` out of the response trailers of a completed call
    /// (used by tests that round-trip requests through an in-process
    /// transport double; mirrors [`Status::to_http`] in reverse).
    pub fn from_header_map(headers: &HeaderMap) -> Option<Status> {
        let code = Code::parse_header(headers.get(GRPC_STATUS_HEADER_CODE)?);
        let error_message = headers
            .get(GRPC_STATUS_MESSAGE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(percent_decode)
            .unwrap_or_default();

        let mut status = Status::new(code, error_message);
        status.metadata = MetadataMap::from_headers(headers.clone());
        Some(status)
    }

    /// Render this `Status` into an `http::Response` suitable for a
    /// call that never produced response headers (e.g. a transport-level
    /// rejection such as bad content-type). Emits `grpc-status`/`grpc-message`
    /// as trailers of an otherwise empty body, per [`crate::server::grpc::Grpc`].
    pub(crate) fn to_header_map(&self) -> Result<HeaderMap, ()> {
        let mut header_map = HeaderMap::with_capacity(2 + self.metadata.len());
        header_map.insert(GRPC_STATUS_HEADER_CODE, self.code.to_header_value());

        if !self.message.is_empty() {
            let encoded = percent_encode(&self.message);
            let value = HeaderValue::from_str(&encoded).map_err(|_| ())?;
            header_map.insert(GRPC_STATUS_MESSAGE_HEADER, value);
        }

        header_map.extend(self.metadata.clone().into_headers());

        Ok(header_map)
    }

    /// Apply this status's trailer encoding onto an existing trailer map,
    /// used when the call already has other user-set trailers that must be
    /// preserved alongside `grpc-status`/`grpc-message`.
    pub(crate) fn add_header(&self, header_map: &mut HeaderMap) -> Result<(), ()> {
        header_map.insert(GRPC_STATUS_HEADER_CODE, self.code.to_header_value());

        if !self.message.is_empty() {
            let encoded = percent_encode(&self.message);
            let value = HeaderValue::from_str(&encoded).map_err(|_| ())?;
            header_map.insert(GRPC_STATUS_MESSAGE_HEADER, value);
        }

        Ok(())
    }

    /// A full HTTP response carrying only this status, used for rejections
    /// that never reach a real call context (protocol/content-type gate).
    pub(crate) fn to_http(&self) -> http::Response<crate::body::BoxBody> {
        self.to_http_with_status(StatusCode::OK)
    }

    /// Same as [`Status::to_http`], but with an explicit non-200 HTTP status
    /// line, used by the transport/content-type gate, which must reject a
    /// request before a real gRPC response has even started (`spec.md` §4.5,
    /// "Unsupported content-type → HTTP 415 ... Non-HTTP/2 → HTTP 426").
    pub(crate) fn to_http_with_status(
        &self,
        http_status: StatusCode,
    ) -> http::Response<crate::body::BoxBody> {
        let mut response = http::Response::new(crate::body::empty_body());
        *response.status_mut() = http_status;
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static(crate::metadata::GRPC_CONTENT_TYPE),
        );
        if let Ok(headers) = self.to_header_map() {
            response.headers_mut().extend(headers);
        }
        response
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status: {:?}, message: {:?}", self.code, self.message)
    }
}

impl Error for Status {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|source| {
            let source: &(dyn Error + 'static) = source.as_ref();
            source
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips_through_header() {
        for i in 0..=16 {
            let code = Code::from_i32(i);
            assert_eq!(code.to_i32(), i);
        }
    }

    #[test]
    fn unknown_numeric_code_round_trips() {
        let code = Code::from_i32(42);
        assert_eq!(code, Code::Other(42));
        assert_eq!(code.to_i32(), 42);
    }

    #[test]
    fn message_percent_encodes_and_decodes() {
        let status = Status::new(Code::Internal, "bad \"thing\" happened");
        let headers = status.to_header_map().unwrap();
        let round_tripped = Status::from_header_map(&headers).unwrap();
        assert_eq!(round_tripped.code(), Code::Internal);
        assert_eq!(round_tripped.message(), "bad \"thing\" happened");
    }

    #[test]
    fn ok_status_has_no_message_header() {
        let status = Status::ok();
        let headers = status.to_header_map().unwrap();
        assert!(!headers.contains_key(GRPC_STATUS_MESSAGE_HEADER));
        assert_eq!(headers.get(GRPC_STATUS_HEADER_CODE).unwrap(), "0");
    }
}
