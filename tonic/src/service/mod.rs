//! Routing and call interception: the service registry that binds
//! `/package.Service/Method` paths to handlers, and interceptors that run
//! ahead of them.

mod interceptor;
mod routes;

pub use interceptor::{Interceptor, InterceptedService};
pub use routes::{Routes, RoutesBuilder};
