//! The service registry: binds `/package.Service/Method` paths to the
//! `tower::Service` generated code produces for each registered service,
//! and answers anything else with `Code::Unimplemented` (`spec.md` §4.7,
//! Service Binder & Registry; §8, "call to an unregistered method").

use crate::body::BoxBody;
use crate::server::{Metrics, NamedService};
use crate::Status;
use axum::Router;
use http::{Request, Response};
use std::convert::Infallible;
use std::fmt;
use tower::Service;

/// The assembled set of routes a transport listener serves. Built up with
/// [`RoutesBuilder`], then handed to the server transport to bind.
pub struct Routes {
    router: Router,
}

impl Routes {
    /// Starts building an empty registry.
    pub fn builder() -> RoutesBuilder {
        RoutesBuilder::default()
    }

    pub(crate) fn into_router(self) -> Router {
        self.router
    }
}

impl fmt::Debug for Routes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Routes").finish()
    }
}

/// Incrementally builds a [`Routes`] registry, one service at a time.
#[derive(Default)]
pub struct RoutesBuilder {
    router: Router,
    metrics: Metrics,
}

impl RoutesBuilder {
    /// Registers `svc` under its [`NamedService::NAME`] prefix
    /// (`/package.Service/*`); generated service code calls this once per
    /// service via its own thin wrapper.
    pub fn add_service<S>(mut self, svc: S) -> Self
    where
        S: Service<Request<axum::body::Body>, Response = Response<BoxBody>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        let path = format!("/{}/{{*rest}}", S::NAME);
        self.router = self.router.route_service(&path, svc);
        self
    }

    /// Shares a process-wide [`Metrics`] handle with the registry, so calls
    /// falling through to the unimplemented fallback are counted alongside
    /// calls dispatched to a real handler (`spec.md` §4.11, Observability).
    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Finishes the registry. Any path that doesn't match a registered
    /// service falls through to a `Code::Unimplemented` response, matching
    /// how a real gRPC server answers an unregistered method rather than
    /// closing the connection (`spec.md` §8).
    pub fn build(self) -> Routes {
        let metrics = self.metrics;
        Routes {
            router: self.router.fallback(move |req| unimplemented_fallback(req, metrics)),
        }
    }
}

async fn unimplemented_fallback(req: Request<axum::body::Body>, metrics: Metrics) -> Response<BoxBody> {
    let path = req.uri().path().to_owned();
    tracing::debug!(%path, "no handler registered for this method");
    metrics.unimplemented(&path);
    Status::unimplemented("Method is unimplemented.").to_http()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unimplemented_fallback_reports_status() {
        let req = Request::builder()
            .uri("/does.not.Exist/Method")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = unimplemented_fallback(req, Metrics::default()).await;
        let status = crate::Status::from_header_map(response.headers()).unwrap();
        assert_eq!(status.code(), crate::Code::Unimplemented);
        assert_eq!(status.message(), "Method is unimplemented.");
    }
}
