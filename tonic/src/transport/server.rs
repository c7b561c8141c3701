//! Binding the dispatcher to a real network listener.
//!
//! Everything upstream of this module (framing, deadlines, dispatch) is
//! transport-agnostic; `Server` is where that meets an actual `TcpListener`,
//! optional TLS termination, and `hyper`'s HTTP/2 connection driver
//! (`spec.md` §1, Out of Scope: "the HTTP transport itself"; SPEC_FULL §2,
//! component 15, Server Transport Wiring).

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tower::Service;

use crate::extensions::PeerAddr;
use crate::service::Routes;

#[cfg(any(feature = "tls-ring", feature = "tls-aws-lc"))]
use super::tls::ServerTlsConfig;

/// Incrementally configures a [`Server`], mirroring the connection-level
/// knobs a real deployment tunes (keepalive, concurrency, frame sizes)
/// separately from the per-method options resolved at service-registration
/// time (`spec.md` §4.7, Options Resolution covers the latter; this covers
/// the former).
pub struct ServerBuilder {
    tcp_nodelay: bool,
    tcp_keepalive: Option<Duration>,
    http2_keepalive_interval: Option<Duration>,
    http2_keepalive_timeout: Duration,
    http2_adaptive_window: Option<bool>,
    max_frame_size: Option<u32>,
    max_concurrent_streams: Option<u32>,
    #[cfg(any(feature = "tls-ring", feature = "tls-aws-lc"))]
    tls: Option<ServerTlsConfig>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        ServerBuilder {
            tcp_nodelay: true,
            tcp_keepalive: None,
            http2_keepalive_interval: None,
            http2_keepalive_timeout: Duration::from_secs(20),
            http2_adaptive_window: None,
            max_frame_size: None,
            max_concurrent_streams: None,
            #[cfg(any(feature = "tls-ring", feature = "tls-aws-lc"))]
            tls: None,
        }
    }
}

impl ServerBuilder {
    /// Sets `TCP_NODELAY` on accepted sockets. Enabled by default, since
    /// Nagle's algorithm fights gRPC's small, latency-sensitive frames.
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Enables `SO_KEEPALIVE` with the given probe interval.
    pub fn tcp_keepalive(mut self, interval: Option<Duration>) -> Self {
        self.tcp_keepalive = interval;
        self
    }

    /// Sends an HTTP/2 `PING` on idle connections at this interval, closing
    /// ones that don't answer within [`Self::http2_keepalive_timeout`].
    pub fn http2_keepalive_interval(mut self, interval: Option<Duration>) -> Self {
        self.http2_keepalive_interval = interval;
        self
    }

    /// How long to wait for a keepalive `PING` ack before closing the
    /// connection. Defaults to 20 seconds.
    pub fn http2_keepalive_timeout(mut self, timeout: Duration) -> Self {
        self.http2_keepalive_timeout = timeout;
        self
    }

    /// Enables HTTP/2 adaptive flow control instead of the fixed window `h2`
    /// otherwise uses.
    pub fn http2_adaptive_window(mut self, enabled: bool) -> Self {
        self.http2_adaptive_window = Some(enabled);
        self
    }

    /// Caps the HTTP/2 frame size `h2` will negotiate.
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.max_frame_size = Some(size);
        self
    }

    /// Caps concurrent streams per connection.
    pub fn max_concurrent_streams(mut self, limit: u32) -> Self {
        self.max_concurrent_streams = Some(limit);
        self
    }

    /// Terminates TLS at this listener, consuming `tls` built via
    /// [`super::ServerTlsConfig`]. The peer certificate chain, if any, is
    /// attached to each request's extensions as
    /// [`crate::extensions::PeerCertificates`].
    #[cfg(any(feature = "tls-ring", feature = "tls-aws-lc"))]
    pub fn tls_config(mut self, tls: ServerTlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    fn conn_builder(&self) -> ConnBuilder<TokioExecutor> {
        let mut builder = ConnBuilder::new(TokioExecutor::new());
        builder
            .http2()
            .keep_alive_interval(self.http2_keepalive_interval)
            .keep_alive_timeout(self.http2_keepalive_timeout);
        if let Some(adaptive) = self.http2_adaptive_window {
            builder.http2().adaptive_window(adaptive);
        }
        if let Some(max_frame_size) = self.max_frame_size {
            builder.http2().max_frame_size(max_frame_size);
        }
        if let Some(limit) = self.max_concurrent_streams {
            builder.http2().max_concurrent_streams(limit);
        }
        builder
    }

    /// Finishes configuration, binding no socket yet.
    pub fn build(self) -> Result<Server, crate::BoxError> {
        #[cfg(any(feature = "tls-ring", feature = "tls-aws-lc"))]
        let tls_acceptor = self.tls.as_ref().map(ServerTlsConfig::build).transpose()?;
        #[cfg(not(any(feature = "tls-ring", feature = "tls-aws-lc")))]
        let tls_acceptor = ();

        Ok(Server {
            conn_builder: Arc::new(self.conn_builder()),
            tcp_nodelay: self.tcp_nodelay,
            tcp_keepalive: self.tcp_keepalive,
            tls_acceptor,
        })
    }
}

#[cfg(any(feature = "tls-ring", feature = "tls-aws-lc"))]
type TlsAcceptor = Option<tokio_rustls::TlsAcceptor>;
#[cfg(not(any(feature = "tls-ring", feature = "tls-aws-lc")))]
type TlsAcceptor = ();

/// A configured, bindable gRPC server. Built via [`Server::builder`]; run
/// with [`Server::serve`] or [`Server::serve_with_shutdown`].
pub struct Server {
    conn_builder: Arc<ConnBuilder<TokioExecutor>>,
    tcp_nodelay: bool,
    tcp_keepalive: Option<Duration>,
    tls_acceptor: TlsAcceptor,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server").finish()
    }
}

impl Server {
    /// Starts configuring a server with default connection settings.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Binds `addr` and serves `routes` until the process is killed.
    pub async fn serve(self, addr: SocketAddr, routes: Routes) -> Result<(), crate::BoxError> {
        self.serve_with_shutdown(addr, routes, std::future::pending())
            .await
    }

    /// Binds `addr` and serves `routes` until `shutdown` resolves, at which
    /// point new connections stop being accepted; the returned future then
    /// waits for every connection already in flight to finish on its own
    /// (no `GOAWAY` is sent; a simpler "drain" shutdown rather than HTTP/2's
    /// full graceful-close handshake).
    pub async fn serve_with_shutdown(
        self,
        addr: SocketAddr,
        routes: Routes,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), crate::BoxError> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "gRPC server listening");

        let router = routes.into_router();
        // Closed once every per-connection sender is dropped, i.e. once
        // every accepted connection has finished serving.
        let (drain_tx, mut drain_rx) = mpsc::channel::<std::convert::Infallible>(1);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            tracing::debug!(%err, "failed to accept connection");
                            continue;
                        }
                    };

                    if self.tcp_nodelay {
                        let _ = stream.set_nodelay(true);
                    }
                    if let Some(interval) = self.tcp_keepalive {
                        apply_tcp_keepalive(&stream, interval);
                    }

                    let router = router.clone();
                    let conn_builder = self.conn_builder.clone();
                    let drain_guard = drain_tx.clone();

                    #[cfg(any(feature = "tls-ring", feature = "tls-aws-lc"))]
                    let tls_acceptor = self.tls_acceptor.clone();

                    tokio::spawn(async move {
                        let _drain_guard = drain_guard;
                        #[cfg(any(feature = "tls-ring", feature = "tls-aws-lc"))]
                        {
                            if let Some(acceptor) = tls_acceptor {
                                match acceptor.accept(stream).await {
                                    Ok(tls_stream) => {
                                        let peer_certs = super::tls::peer_certificates(&tls_stream);
                                        serve_connection(conn_builder, tls_stream, router, peer, peer_certs).await;
                                    }
                                    Err(err) => tracing::debug!(%err, "TLS handshake failed"),
                                }
                                return;
                            }
                        }
                        serve_connection(conn_builder, stream, router, peer, None).await;
                    });
                }
                _ = &mut shutdown => {
                    tracing::info!("gRPC server shutting down, no longer accepting connections");
                    break;
                }
            }
        }

        drop(listener);
        drop(drain_tx);
        // Resolves once every spawned connection task has dropped its guard.
        let _ = drain_rx.recv().await;
        Ok(())
    }
}

async fn serve_connection<I>(
    conn_builder: Arc<ConnBuilder<TokioExecutor>>,
    io: I,
    router: axum::Router,
    peer: SocketAddr,
    peer_certs: Option<crate::extensions::PeerCertificates>,
) where
    I: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let svc = tower::service_fn(move |mut req: http::Request<axum::body::Body>| {
        req.extensions_mut().insert(PeerAddr(peer));
        if let Some(certs) = peer_certs.clone() {
            req.extensions_mut().insert(certs);
        }
        let mut router = router.clone();
        async move { router.call(req).await }
    });
    let svc = TowerToHyperService::new(svc);

    if let Err(err) = conn_builder.serve_connection(TokioIo::new(io), svc).await {
        tracing::debug!(%err, %peer, "connection closed with error");
    }
}

fn apply_tcp_keepalive(stream: &TcpStream, interval: Duration) {
    let socket = socket2::SockRef::from(stream);
    let keepalive = socket2::TcpKeepalive::new().with_time(interval);
    if let Err(err) = socket.set_tcp_keepalive(&keepalive) {
        tracing::debug!(%err, "failed to set TCP keepalive");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_enable_nodelay() {
        let builder = ServerBuilder::default();
        assert!(builder.tcp_nodelay);
        assert!(builder.tcp_keepalive.is_none());
    }

    #[tokio::test]
    async fn serve_with_shutdown_returns_once_signalled() {
        let server = Server::builder().build().unwrap();
        let routes = Routes::builder().build();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(server.serve_with_shutdown(addr, routes, async {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
