//! Request interceptors: functions run before a call reaches its handler,
//! able to inspect/modify metadata or reject the call outright (`spec.md`
//! §4.6, Interceptors, e.g. authentication, request logging).

use crate::{Request, Status};
use std::task::{Context, Poll};
use tower_service::Service;

/// A function (or closure) that inspects/rewrites an incoming request before
/// it reaches a handler, and may reject the call by returning `Err`.
///
/// Implemented for any `FnMut(Request<()>) -> Result<Request<()>, Status>`,
/// mirroring how generated client code's interceptors work, so the same
/// closures read naturally on either side.
pub trait Interceptor: Send + Sync + 'static {
    /// Inspects/rewrites `request`, or rejects the call.
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status>;
}

impl<F> Interceptor for F
where
    F: FnMut(Request<()>) -> Result<Request<()>, Status> + Send + Sync + 'static,
{
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        self(request)
    }
}

/// Wraps a `tower::Service` so every call first runs through an
/// [`Interceptor`]; a rejection short-circuits straight to a `Status`
/// response without invoking the inner service at all.
#[derive(Clone)]
pub struct InterceptedService<S, I> {
    inner: S,
    interceptor: I,
}

impl<S, I> InterceptedService<S, I> {
    /// Wraps `inner`, running `interceptor` ahead of every call.
    pub fn new(inner: S, interceptor: I) -> Self {
        InterceptedService { inner, interceptor }
    }
}

impl<S, I, ReqBody> Service<http::Request<ReqBody>> for InterceptedService<S, I>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<crate::body::BoxBody>>,
    S::Future: Send + 'static,
    S::Error: Into<crate::BoxError>,
    I: Interceptor,
{
    type Response = http::Response<crate::body::BoxBody>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        let (parts, body) = req.into_parts();
        let method = parts.method.clone();
        let uri = parts.uri.clone();
        let version = parts.version;
        let metadata_request = Request::from_http_parts(parts, ());

        match self.interceptor.call(metadata_request) {
            Ok(checked) => {
                let (metadata, extensions, ()) = checked.into_parts();
                let mut builder = http::Request::builder()
                    .method(method)
                    .uri(uri)
                    .version(version);
                *builder.headers_mut().expect("builder not yet errored") = metadata.into_headers();
                *builder.extensions_mut().expect("builder not yet errored") = extensions;
                let req = builder.body(body).expect("parts assembled from a valid request");
                let fut = self.inner.call(req);
                Box::pin(fut)
            }
            Err(status) => Box::pin(async move { Ok(status.to_http()) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_implements_interceptor() {
        let mut interceptor = |req: Request<()>| -> Result<Request<()>, Status> { Ok(req) };
        let result = Interceptor::call(&mut interceptor, Request::new(()));
        assert!(result.is_ok());
    }

    #[test]
    fn rejecting_interceptor_returns_status() {
        let mut interceptor =
            |_: Request<()>| -> Result<Request<()>, Status> { Err(Status::unauthenticated("no token")) };
        let result = Interceptor::call(&mut interceptor, Request::new(()));
        assert_eq!(result.unwrap_err().code(), crate::Code::Unauthenticated);
    }
}
