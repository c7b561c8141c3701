//! The single boxed body type used for request/response bodies throughout
//! the core, so handler and transport code don't need to name the concrete
//! `hyper`/`h2` body type.

use bytes::Bytes;
use http_body::Body;
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Empty};
use std::convert::Infallible;

/// A type-erased HTTP body carrying `Bytes` frames and never failing on its
/// own (errors are reported as gRPC trailers rather than body errors, once
/// past the framing codec).
pub type BoxBody = UnsyncBoxBody<Bytes, crate::Status>;

/// Boxes any `http_body::Body` whose error converts into [`crate::BoxError`]
/// into a [`BoxBody`], mapping body-level errors through the same error
/// mapper a handler panic or application error goes through (`spec.md` §5,
/// Error Mapper).
pub(crate) fn boxed<B>(body: B) -> BoxBody
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<crate::BoxError>,
{
    body.map_err(|e| crate::Status::from_error(e.into()))
        .boxed_unsync()
}

/// An empty body, used for responses that terminate before any message is
/// written (e.g. a rejected call that never reaches a handler).
pub(crate) fn empty_body() -> BoxBody {
    Empty::new()
        .map_err(|_: Infallible| unreachable!("Empty body never errors"))
        .boxed_unsync()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt as _;

    #[tokio::test]
    async fn empty_body_has_no_frames() {
        let body = empty_body();
        let collected = body.collect().await.unwrap();
        assert!(collected.to_bytes().is_empty());
    }
}
