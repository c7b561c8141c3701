//! A gRPC-over-HTTP/2 server runtime: request framing, deadline
//! enforcement, metadata, and dispatch from a decoded request to a
//! generated service implementation (`spec.md` §1, Purpose & Scope).
//!
//! Generating service code from `.proto` files is handled by `tonic-prost`
//! (prost-generated messages) or `tonic-protobuf` (protobuf-generated
//! messages); this crate owns everything downstream of "here is a decoded
//! request, here is a handler"; it does not depend on either.

#![allow(clippy::type_complexity)]

#[cfg(feature = "codegen")]
pub mod codegen;

pub mod body;
pub mod codec;
pub mod extensions;
pub mod metadata;
mod percent_encoding;
pub mod request;
pub mod response;
#[cfg(feature = "router")]
pub mod server;
#[cfg(feature = "router")]
pub mod service;
mod status;
#[cfg(feature = "transport")]
pub mod transport;

pub use request::Request;
pub use response::Response;
pub use status::{Code, Status};

/// Type-erased error used at module boundaries that don't care about the
/// concrete failure (transport body errors, handler panics surfaced as
/// errors). Never sent over the wire directly; the error mapper
/// ([`Status::from_error`]) turns one into a [`Status`] (`spec.md` §5, Error
/// Mapper).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A `Result` whose error is always a gRPC [`Status`], the type every
/// generated unary/streaming handler method returns.
pub type Result<T> = std::result::Result<T, Status>;

#[cfg(feature = "codegen")]
#[doc(hidden)]
pub mod codegen {
    //! Re-exports used by code generated from `.proto` files, so generated
    //! code only needs `tonic::codegen::*` rather than naming every
    //! dependency crate directly.

    pub use async_trait::async_trait;
    pub use http;
    pub use std::sync::Arc;
    pub use std::task::{Context, Poll};
    pub use tower_service::Service;

    pub use crate::body::BoxBody;
    pub use crate::server::NamedService;
}
