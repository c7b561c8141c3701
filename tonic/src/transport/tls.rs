//! Server-side TLS termination, consumed as an opaque capability: this
//! module wires `tokio-rustls` into the accept loop and extracts the peer
//! certificate chain for handlers that want it, but never implements
//! certificate validation itself (`spec.md` §1, Out of Scope: "TLS
//! termination and peer-certificate extraction").

use std::fmt;
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig as RustlsServerConfig;
use tokio_rustls::TlsAcceptor;

/// A server identity: a certificate chain and the private key for its leaf
/// certificate, both in PEM.
#[derive(Clone)]
pub struct Identity {
    cert: Vec<u8>,
    key: Vec<u8>,
}

impl Identity {
    /// Reads a certificate chain and private key from PEM-encoded bytes.
    pub fn from_pems(cert: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        Identity {
            cert: cert.into(),
            key: key.into(),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity").finish()
    }
}

/// Server-side TLS configuration: the server's own identity, and optionally
/// a client-certificate verifier for mutual TLS.
#[derive(Clone, Default)]
pub struct ServerTlsConfig {
    identity: Option<Identity>,
    client_ca_roots: Vec<Vec<u8>>,
    client_auth_optional: bool,
}

impl fmt::Debug for ServerTlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerTlsConfig").finish()
    }
}

impl ServerTlsConfig {
    /// Starts from an empty configuration; call [`Self::identity`] before
    /// handing this to [`super::ServerBuilder::tls_config`].
    pub fn new() -> Self {
        ServerTlsConfig::default()
    }

    /// Sets the server's certificate chain and private key.
    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Adds a PEM-encoded CA certificate trusted to sign client certificates,
    /// enabling mutual TLS. May be called more than once to trust several
    /// roots.
    pub fn client_ca_root(mut self, ca: impl Into<Vec<u8>>) -> Self {
        self.client_ca_roots.push(ca.into());
        self
    }

    /// When mutual TLS is configured via [`Self::client_ca_root`], accept
    /// connections that present no client certificate rather than rejecting
    /// the handshake.
    pub fn client_auth_optional(mut self, optional: bool) -> Self {
        self.client_auth_optional = optional;
        self
    }

    pub(crate) fn build(&self) -> Result<TlsAcceptor, crate::BoxError> {
        let identity = self
            .identity
            .as_ref()
            .ok_or("no server identity configured for TLS")?;

        let certs = parse_certs(&identity.cert)?;
        let key = parse_key(&identity.key)?;

        let builder = RustlsServerConfig::builder();

        let mut config = if self.client_ca_roots.is_empty() {
            builder
                .with_no_client_auth()
                .with_single_cert(certs, key)?
        } else {
            let mut roots = tokio_rustls::rustls::RootCertStore::empty();
            for root in &self.client_ca_roots {
                for cert in parse_certs(root)? {
                    roots.add(cert)?;
                }
            }
            let verifier = tokio_rustls::rustls::server::WebPkiClientVerifier::builder(Arc::new(roots));
            let verifier = if self.client_auth_optional {
                verifier.allow_unauthenticated().build()?
            } else {
                verifier.build()?
            };
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)?
        };

        config.alpn_protocols = vec![b"h2".to_vec()];
        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, crate::BoxError> {
    rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(Into::into)
}

fn parse_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, crate::BoxError> {
    rustls_pemfile::private_key(&mut &pem[..])?
        .ok_or_else(|| "no private key found in PEM".into())
}

/// The verified peer certificate chain, recorded as a request extension by
/// the accept loop so handlers can build an [`crate::extensions::AuthContext`]
/// from it without the core ever inspecting certificate contents itself.
pub(crate) fn peer_certificates(
    connection: &tokio_rustls::server::TlsStream<tokio::net::TcpStream>,
) -> Option<crate::extensions::PeerCertificates> {
    let (_, session) = connection.get_ref();
    session
        .peer_certificates()
        .map(|certs| certs.iter().map(|c| c.as_ref().to_vec()).collect())
        .map(|certs| crate::extensions::PeerCertificates(Arc::new(certs)))
}
