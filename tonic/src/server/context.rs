//! The per-call context surfaced to interceptors and handlers: deadline,
//! peer information, and authentication outcome, gathered in one place
//! instead of scattered across request extensions (`spec.md` §4.4, Server
//! Call Context, generalizing grpc-dotnet's `ServerCallContext`).

use crate::extensions::{AuthContext, GrpcMethod, PeerAddr};
use crate::metadata::MetadataMap;
use crate::server::deadline::DeadlineManager;
use crate::Status;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct ResponseHeaders {
    started: bool,
    metadata: MetadataMap,
}

/// A read-only view over one call's ambient state: which method is being
/// invoked, the peer that invoked it, its deadline, and whatever an
/// authentication interceptor established.
///
/// Built by the dispatcher from the request's extensions before the handler
/// runs; handlers that need it declare it as an extractor-style parameter in
/// generated code, or read it off [`crate::Request::extensions`] directly.
#[derive(Debug, Clone)]
pub struct ServerContext {
    method: Option<GrpcMethod>,
    peer: Option<SocketAddr>,
    auth: Option<AuthContext>,
    deadline: DeadlineManager,
    response_headers: Arc<Mutex<ResponseHeaders>>,
}

impl ServerContext {
    pub(crate) fn new(
        method: Option<GrpcMethod>,
        peer: Option<SocketAddr>,
        auth: Option<AuthContext>,
        deadline: DeadlineManager,
    ) -> Self {
        ServerContext {
            method,
            peer,
            auth,
            deadline,
            response_headers: Arc::new(Mutex::new(ResponseHeaders::default())),
        }
    }

    /// Builds a context from a request's extensions and headers, applying
    /// `server_timeout` as the deadline ceiling.
    pub(crate) fn from_request<T>(
        request: &crate::Request<T>,
        server_timeout: Option<Duration>,
    ) -> Self {
        let method = request.extensions().get::<GrpcMethod>().copied();
        let auth = request.auth().cloned();
        let peer = request.remote_addr();
        let deadline =
            DeadlineManager::from_headers(request.metadata().as_headers(), server_timeout);
        ServerContext::new(method, peer, auth, deadline)
    }

    /// The fully-qualified method this call invoked, if routed through the
    /// generated service registry.
    pub fn method(&self) -> Option<GrpcMethod> {
        self.method
    }

    /// The caller's socket address, if the transport recorded one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// The caller formatted as `ipv4:<addr>:<port>` / `ipv6:[<addr>]:<port>`,
    /// or `"unknown"` if the transport never recorded a peer address
    /// (`spec.md` §3, "Peer string format").
    pub fn peer_string(&self) -> String {
        self.peer
            .map(|addr| crate::extensions::PeerAddr(addr).to_peer_string())
            .unwrap_or_else(|| "unknown".to_owned())
    }

    /// The authentication outcome for this call.
    pub fn auth(&self) -> Option<&AuthContext> {
        self.auth.as_ref()
    }

    /// The call's effective deadline (shorter of `grpc-timeout` and any
    /// server-configured ceiling), if either side set one.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline.deadline()
    }

    /// A token that fires once the deadline elapses, for long-running
    /// handler code to check cooperatively.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.deadline.cancellation_token()
    }

    /// Sends response headers ahead of the first response message. One-time
    /// per call: a second invocation fails rather than silently overwriting
    /// what was already queued (`spec.md` §4.2, Server Call Context).
    pub fn write_response_headers(&self, metadata: MetadataMap) -> Result<(), Status> {
        let mut state = self.response_headers.lock().unwrap();
        if state.started {
            return Err(Status::internal(
                "Response headers can only be sent once per call.",
            ));
        }
        state.started = true;
        state.metadata = metadata;
        Ok(())
    }

    /// The headers queued by [`ServerContext::write_response_headers`], if
    /// any were sent before the handler returned; consumed once by the
    /// dispatcher when assembling the outgoing response.
    pub(crate) fn take_response_headers(&self) -> Option<MetadataMap> {
        let mut state = self.response_headers.lock().unwrap();
        if state.started {
            state.started = false;
            Some(std::mem::take(&mut state.metadata))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Request;

    #[test]
    fn context_with_no_extensions_is_empty() {
        let request = Request::new(());
        let ctx = ServerContext::from_request(&request, None);
        assert!(ctx.method().is_none());
        assert!(ctx.peer_addr().is_none());
        assert!(ctx.auth().is_none());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn peer_string_is_unknown_without_a_transport_peer() {
        let request = Request::new(());
        let ctx = ServerContext::from_request(&request, None);
        assert_eq!(ctx.peer_string(), "unknown");
    }

    #[test]
    fn write_response_headers_is_one_shot() {
        let request = Request::new(());
        let ctx = ServerContext::from_request(&request, None);

        ctx.write_response_headers(MetadataMap::new()).unwrap();
        let err = ctx.write_response_headers(MetadataMap::new()).unwrap_err();
        assert_eq!(err.message(), "Response headers can only be sent once per call.");
    }

    #[test]
    fn take_response_headers_is_empty_until_written() {
        let request = Request::new(());
        let ctx = ServerContext::from_request(&request, None);
        assert!(ctx.take_response_headers().is_none());

        ctx.write_response_headers(MetadataMap::new()).unwrap();
        assert!(ctx.take_response_headers().is_some());
        assert!(ctx.take_response_headers().is_none());
    }

    #[test]
    fn peer_string_formats_ipv4_and_ipv6() {
        use crate::extensions::PeerAddr;
        use std::net::SocketAddr;

        let v4: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        assert_eq!(PeerAddr(v4).to_peer_string(), "ipv4:127.0.0.1:8080");

        let v6: SocketAddr = "[::1]:8080".parse().unwrap();
        assert_eq!(PeerAddr(v6).to_peer_string(), "ipv6:[::1]:8080");
    }
}
