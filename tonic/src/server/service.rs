//! The per-method service traits [`crate::server::Grpc`] dispatches to, and
//! [`NamedService`], which ties a generated service impl to the route path
//! the registry (`spec.md` §4.7, Service Binder & Registry) binds it under.

use crate::{Request, Response, Status};
use futures_core::Stream;
use std::future::Future;

/// A unary method: one request message in, one response message out.
pub trait UnaryService<R> {
    /// The response message type.
    type Response;
    /// The future a call to this method returns.
    type Future: Future<Output = Result<Response<Self::Response>, Status>>;

    /// Handles a single call.
    fn call(&mut self, request: Request<R>) -> Self::Future;
}

/// A server-streaming method: one request message in, a stream of response
/// messages out.
pub trait ServerStreamingService<R> {
    /// The response message type.
    type Response;
    /// The stream of response messages this method produces.
    type ResponseStream: Stream<Item = Result<Self::Response, Status>>;
    /// The future a call to this method returns.
    type Future: Future<Output = Result<Response<Self::ResponseStream>, Status>>;

    /// Handles a single call.
    fn call(&mut self, request: Request<R>) -> Self::Future;
}

/// A client-streaming method: a stream of request messages in, one response
/// message out.
pub trait ClientStreamingService<R> {
    /// The response message type.
    type Response;
    /// The future a call to this method returns.
    type Future: Future<Output = Result<Response<Self::Response>, Status>>;

    /// Handles a single call.
    fn call(&mut self, request: Request<crate::codec::Streaming<R>>) -> Self::Future;
}

/// A bidirectional-streaming method: a stream of request messages in, a
/// stream of response messages out.
pub trait StreamingService<R> {
    /// The response message type.
    type Response;
    /// The stream of response messages this method produces.
    type ResponseStream: Stream<Item = Result<Self::Response, Status>>;
    /// The future a call to this method returns.
    type Future: Future<Output = Result<Response<Self::ResponseStream>, Status>>;

    /// Handles a single call.
    fn call(&mut self, request: Request<crate::codec::Streaming<R>>) -> Self::Future;
}

/// Associates a generated service implementation with the gRPC service name
/// it was generated for (`package.Service`), so the registry can build the
/// `/package.Service/Method` route path without the caller repeating the
/// name by hand.
pub trait NamedService {
    /// The fully-qualified service name, e.g. `"helloworld.Greeter"`.
    const NAME: &'static str;
}
