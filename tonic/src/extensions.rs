//! Request extension types threaded through [`crate::Request`] by the
//! transport layer (peer address) and by interceptors/authentication
//! middleware (`spec.md` §3, Data Model: `AuthContext`; §4.6, Service
//! Activator & Interceptors).

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// The remote peer's socket address, set by the server transport before a
/// request reaches any interceptor or handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

impl PeerAddr {
    /// Renders the peer the way a call context surfaces it to handlers and
    /// log lines: `ipv4:<addr>:<port>` or `ipv6:[<addr>]:<port>`, the address
    /// family read straight off the socket address (`spec.md` §3, "Peer
    /// string format").
    pub fn to_peer_string(self) -> String {
        match self.0 {
            SocketAddr::V4(addr) => format!("ipv4:{}:{}", addr.ip(), addr.port()),
            SocketAddr::V6(addr) => format!("ipv6:[{}]:{}", addr.ip(), addr.port()),
        }
    }
}

/// The TLS peer certificate chain, set by the transport when the listener is
/// configured for mutual TLS. Opaque to the core; handlers that care about
/// identity extract it themselves.
#[derive(Clone)]
pub struct PeerCertificates(pub Arc<Vec<Vec<u8>>>);

impl fmt::Debug for PeerCertificates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerCertificates")
            .field("count", &self.0.len())
            .finish()
    }
}

/// The outcome of authenticating a call: set by an authentication
/// interceptor, read by downstream interceptors and the handler via
/// [`crate::server::ServerContext::auth`].
///
/// This is a supplemented piece of the data model: grpc-dotnet's
/// `ServerCallContext.GetHttpContext().User` plays the equivalent role there,
/// but ambient `ClaimsPrincipal` access doesn't have a Rust-idiomatic
/// equivalent, so it's modeled as an explicit, opaque extension instead.
#[derive(Clone)]
pub struct AuthContext {
    principal: Option<Arc<str>>,
    claims: Arc<[(String, String)]>,
}

impl AuthContext {
    /// An authenticated context naming `principal`, with no extra claims.
    pub fn authenticated(principal: impl Into<Arc<str>>) -> Self {
        AuthContext {
            principal: Some(principal.into()),
            claims: Arc::from(Vec::new()),
        }
    }

    /// An unauthenticated context (no principal, no claims).
    pub fn anonymous() -> Self {
        AuthContext {
            principal: None,
            claims: Arc::from(Vec::new()),
        }
    }

    /// Attaches claims to an authenticated context.
    pub fn with_claims(mut self, claims: Vec<(String, String)>) -> Self {
        self.claims = Arc::from(claims);
        self
    }

    /// `true` if a principal was established for this call.
    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    /// The authenticated principal's name, if any.
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// Claims attached by the authentication interceptor.
    pub fn claims(&self) -> &[(String, String)] {
        &self.claims
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("principal", &self.principal)
            .field("claims", &self.claims.len())
            .finish()
    }
}

/// The fully-qualified gRPC method this call is routed to
/// (`/package.Service/Method`), stashed as a request extension by the
/// generated service registration so interceptors can read it without
/// re-parsing the request URI.
#[derive(Debug, Clone, Copy)]
pub struct GrpcMethod {
    service: &'static str,
    method: &'static str,
}

impl GrpcMethod {
    /// Builds a method marker from the service's and method's names.
    pub const fn new(service: &'static str, method: &'static str) -> Self {
        GrpcMethod { service, method }
    }

    /// The service name, e.g. `package.Greeter`.
    pub fn service(&self) -> &'static str {
        self.service
    }

    /// The bare method name, e.g. `SayHello`.
    pub fn method(&self) -> &'static str {
        self.method
    }
}
