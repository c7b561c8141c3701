//! Server-side call handling: the per-method dispatcher, the traits
//! generated handler code implements, deadline enforcement, and the
//! per-call context handed to interceptors and handlers.

mod activation;
mod context;
mod deadline;
mod grpc;
mod observability;
mod options;
mod service;
mod writer;

pub use activation::{ServiceActivator, SharedActivator};
pub use context::ServerContext;
pub use deadline::DeadlineManager;
pub use grpc::Grpc;
pub use observability::{CallGuard, Metrics};
pub use options::{MethodOptions, ServerOptions, ServiceOptions, UnresolvedCompressionProvider};
pub use service::{
    ClientStreamingService, NamedService, ServerStreamingService, StreamingService, UnaryService,
};
pub use writer::{writer_channel, WriteOptions, Writer};
