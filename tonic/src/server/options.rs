//! Per-method options, resolved once at service-registration time and
//! thereafter immutable (`spec.md` §4.7, Options Resolution).
//!
//! Global server-wide defaults and per-service overrides are merged into a
//! single [`MethodOptions`] per method; the merge is a field-by-field
//! fallback (service → global → hard default), mirroring how
//! `tower::ServiceBuilder` layers compose but resolved eagerly instead of
//! wrapped as another layer, since the dispatcher (`crate::server::Grpc`)
//! needs a plain value it can read without indirection on every call.

use crate::codec::{CompressionEncoding, EnabledCompressionEncodings};
use std::time::Duration;

/// 4 MiB, the default ceiling on a single decoded request message
/// (`spec.md` §3, MethodOptions).
pub const DEFAULT_MAX_RECEIVE_BYTES: usize = 4 * 1024 * 1024;

/// Per-method knobs resolved once when a service is registered with a
/// [`super::RoutesBuilder`] (via [`crate::service::RoutesBuilder`]), not
/// re-read per call.
///
/// Construct via [`MethodOptions::resolve`], which applies the
/// service-over-global-over-default fallback `spec.md` §4.7 specifies;
/// building one directly with [`MethodOptions::new`] skips that merge and is
/// mainly useful in tests.
#[derive(Debug, Clone)]
pub struct MethodOptions {
    max_receive_bytes: usize,
    max_send_bytes: Option<usize>,
    detailed_errors: bool,
    accept_compression: EnabledCompressionEncodings,
    send_compression: Option<CompressionEncoding>,
    server_timeout: Option<Duration>,
}

impl Default for MethodOptions {
    fn default() -> Self {
        MethodOptions {
            max_receive_bytes: DEFAULT_MAX_RECEIVE_BYTES,
            max_send_bytes: None,
            detailed_errors: false,
            accept_compression: EnabledCompressionEncodings::default(),
            send_compression: None,
            server_timeout: None,
        }
    }
}

/// Raised when [`MethodOptions::resolve`] is asked for a response encoding
/// that isn't among the accepted encodings (`spec.md` §3, MethodOptions
/// invariant: "`response_compression_name` must be a key in
/// `compression_providers`").
#[derive(Debug)]
pub struct UnresolvedCompressionProvider(pub CompressionEncoding);

impl std::fmt::Display for UnresolvedCompressionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "response_compression_name {:?} is not in the accepted compression providers",
            self.0
        )
    }
}

impl std::error::Error for UnresolvedCompressionProvider {}

impl MethodOptions {
    /// Builds options directly from already-resolved fields, bypassing the
    /// global/service merge. Prefer [`MethodOptions::resolve`] for real
    /// registration.
    pub fn new(
        max_receive_bytes: usize,
        max_send_bytes: Option<usize>,
        detailed_errors: bool,
    ) -> Self {
        MethodOptions {
            max_receive_bytes,
            max_send_bytes,
            detailed_errors,
            ..MethodOptions::default()
        }
    }

    /// Merges `global` and `service` options per-field (service wins, then
    /// global, then the hard default), validating that any configured
    /// response compression is among the accepted encodings.
    pub fn resolve(
        global: &ServerOptions,
        service: &ServiceOptions,
    ) -> Result<MethodOptions, UnresolvedCompressionProvider> {
        let max_receive_bytes = service
            .max_receive_bytes
            .or(global.max_receive_bytes)
            .unwrap_or(DEFAULT_MAX_RECEIVE_BYTES);
        let max_send_bytes = service.max_send_bytes.or(global.max_send_bytes);
        let detailed_errors = service.detailed_errors.unwrap_or(global.detailed_errors);
        let server_timeout = service.server_timeout.or(global.server_timeout);

        let mut accept_compression = global.accept_compression;
        for encoding in service.accept_compression.iter() {
            accept_compression.enable(encoding);
        }

        let send_compression = service.send_compression.or(global.send_compression);
        if let Some(encoding) = send_compression {
            if !accept_compression.is_enabled(encoding) {
                return Err(UnresolvedCompressionProvider(encoding));
            }
        }

        Ok(MethodOptions {
            max_receive_bytes,
            max_send_bytes,
            detailed_errors,
            accept_compression,
            send_compression,
            server_timeout,
        })
    }

    /// The configured ceiling on a single decoded request message.
    pub fn max_receive_bytes(&self) -> usize {
        self.max_receive_bytes
    }

    /// The configured ceiling on a single encoded response message, if any.
    pub fn max_send_bytes(&self) -> Option<usize> {
        self.max_send_bytes
    }

    /// Whether handler-error detail (type/message) is reflected into
    /// `grpc-message` for errors the error mapper classifies as `Unknown`
    /// (`spec.md` §4.8, Error Mapper).
    pub fn detailed_errors(&self) -> bool {
        self.detailed_errors
    }

    /// The encodings this method accepts on incoming requests.
    pub fn accept_compression(&self) -> EnabledCompressionEncodings {
        self.accept_compression
    }

    /// The encoding this method prefers for its own responses, if any.
    pub fn send_compression(&self) -> Option<CompressionEncoding> {
        self.send_compression
    }

    /// A ceiling on the call's deadline regardless of what the client asks
    /// for via `grpc-timeout`.
    pub fn server_timeout(&self) -> Option<Duration> {
        self.server_timeout
    }
}

/// Server-wide option defaults, the "global" side of the merge in
/// [`MethodOptions::resolve`].
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    max_receive_bytes: Option<usize>,
    max_send_bytes: Option<usize>,
    detailed_errors: bool,
    accept_compression: EnabledCompressionEncodings,
    send_compression: Option<CompressionEncoding>,
    server_timeout: Option<Duration>,
}

impl ServerOptions {
    /// Starts from the hard defaults.
    pub fn new() -> Self {
        ServerOptions::default()
    }

    /// Sets the server-wide default receive-size ceiling.
    pub fn max_receive_bytes(mut self, limit: usize) -> Self {
        self.max_receive_bytes = Some(limit);
        self
    }

    /// Sets the server-wide default send-size ceiling.
    pub fn max_send_bytes(mut self, limit: usize) -> Self {
        self.max_send_bytes = Some(limit);
        self
    }

    /// Enables reflecting handler-error detail into `grpc-message` by
    /// default; per-service options may still turn it back off.
    pub fn detailed_errors(mut self, enabled: bool) -> Self {
        self.detailed_errors = enabled;
        self
    }

    /// Accepts `encoding` on incoming requests by default.
    pub fn accept_compressed(mut self, encoding: CompressionEncoding) -> Self {
        self.accept_compression.enable(encoding);
        self
    }

    /// Prefers `encoding` for outgoing responses by default.
    pub fn send_compressed(mut self, encoding: CompressionEncoding) -> Self {
        self.send_compression = Some(encoding);
        self
    }

    /// Caps every call's deadline at `timeout` regardless of client request.
    pub fn server_timeout(mut self, timeout: Duration) -> Self {
        self.server_timeout = Some(timeout);
        self
    }
}

/// Per-service option overrides, the "service" side of the merge in
/// [`MethodOptions::resolve`]. Any field left unset falls through to the
/// matching [`ServerOptions`] field.
#[derive(Debug, Clone, Default)]
pub struct ServiceOptions {
    max_receive_bytes: Option<usize>,
    max_send_bytes: Option<usize>,
    detailed_errors: Option<bool>,
    accept_compression: EnabledCompressionEncodings,
    send_compression: Option<CompressionEncoding>,
    server_timeout: Option<Duration>,
}

impl ServiceOptions {
    /// Starts with no overrides; every field falls through to the global
    /// options at [`MethodOptions::resolve`] time.
    pub fn new() -> Self {
        ServiceOptions::default()
    }

    /// Overrides the receive-size ceiling for this service.
    pub fn max_receive_bytes(mut self, limit: usize) -> Self {
        self.max_receive_bytes = Some(limit);
        self
    }

    /// Overrides the send-size ceiling for this service.
    pub fn max_send_bytes(mut self, limit: usize) -> Self {
        self.max_send_bytes = Some(limit);
        self
    }

    /// Overrides the detailed-errors toggle for this service.
    pub fn detailed_errors(mut self, enabled: bool) -> Self {
        self.detailed_errors = Some(enabled);
        self
    }

    /// Accepts `encoding` for this service, in addition to whatever the
    /// global options already accept.
    pub fn accept_compressed(mut self, encoding: CompressionEncoding) -> Self {
        self.accept_compression.enable(encoding);
        self
    }

    /// Overrides the preferred outgoing encoding for this service.
    pub fn send_compressed(mut self, encoding: CompressionEncoding) -> Self {
        self.send_compression = Some(encoding);
        self
    }

    /// Overrides the deadline ceiling for this service.
    pub fn server_timeout(mut self, timeout: Duration) -> Self {
        self.server_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_overrides_win_over_global() {
        let global = ServerOptions::new().max_receive_bytes(1024).detailed_errors(false);
        let service = ServiceOptions::new().max_receive_bytes(256).detailed_errors(true);

        let resolved = MethodOptions::resolve(&global, &service).unwrap();
        assert_eq!(resolved.max_receive_bytes(), 256);
        assert!(resolved.detailed_errors());
    }

    #[test]
    fn unset_fields_fall_back_to_global_then_default() {
        let global = ServerOptions::new().max_send_bytes(2048);
        let service = ServiceOptions::new();

        let resolved = MethodOptions::resolve(&global, &service).unwrap();
        assert_eq!(resolved.max_receive_bytes(), DEFAULT_MAX_RECEIVE_BYTES);
        assert_eq!(resolved.max_send_bytes(), Some(2048));
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn send_compression_must_be_accepted() {
        let global = ServerOptions::new().send_compressed(CompressionEncoding::Gzip);
        let service = ServiceOptions::new();

        let err = MethodOptions::resolve(&global, &service).unwrap_err();
        assert_eq!(err.0, CompressionEncoding::Gzip);
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn accepting_the_encoding_satisfies_validation() {
        let global = ServerOptions::new()
            .accept_compressed(CompressionEncoding::Gzip)
            .send_compressed(CompressionEncoding::Gzip);
        let service = ServiceOptions::new();

        let resolved = MethodOptions::resolve(&global, &service).unwrap();
        assert_eq!(resolved.send_compression(), Some(CompressionEncoding::Gzip));
    }
}
