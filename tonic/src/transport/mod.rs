//! Binding the dispatcher to a real network listener: TCP accept loop,
//! HTTP/2 connection handling, optional TLS termination, and graceful
//! shutdown (`spec.md` §4.9/SPEC_FULL §4.10 supplement, Server Transport
//! Wiring).

mod server;
#[cfg(any(feature = "tls-ring", feature = "tls-aws-lc"))]
mod tls;

pub use server::{Server, ServerBuilder};
#[cfg(any(feature = "tls-ring", feature = "tls-aws-lc"))]
pub use tls::{Identity, ServerTlsConfig};
