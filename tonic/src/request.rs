//! The typed request wrapper handlers and interceptors see: a message body
//! plus [`crate::metadata::MetadataMap`] and transport-derived extensions
//! (`spec.md` §3, Data Model).

use crate::metadata::MetadataMap;
use std::net::SocketAddr;

/// A single gRPC request: the decoded message `T`, its metadata, and
/// transport extensions (peer address, TLS certificates, `AuthContext`).
///
/// For streaming methods `T` is typically [`crate::codec::Streaming`] rather
/// than a single decoded message.
#[derive(Debug)]
pub struct Request<T> {
    metadata: MetadataMap,
    message: T,
    extensions: http::Extensions,
}

impl<T> Request<T> {
    /// Wraps `message` with empty metadata and no extensions.
    pub fn new(message: T) -> Self {
        Request {
            metadata: MetadataMap::new(),
            message,
            extensions: http::Extensions::new(),
        }
    }

    pub(crate) fn from_http_parts(parts: http::request::Parts, message: T) -> Self {
        Request {
            metadata: MetadataMap::from_request_headers(&parts.headers),
            message,
            extensions: parts.extensions,
        }
    }

    pub(crate) fn from_http(request: http::Request<T>) -> Self {
        let (parts, message) = request.into_parts();
        Request::from_http_parts(parts, message)
    }

    /// Decomposes into the pieces needed to rebuild an `http::Request` after
    /// running an interceptor (metadata is re-encoded onto fresh headers,
    /// extensions carried through as-is).
    pub(crate) fn into_parts(self) -> (MetadataMap, http::Extensions, T) {
        (self.metadata, self.extensions, self.message)
    }

    /// The call's metadata (user-visible headers; reserved protocol headers
    /// are filtered out, see `spec.md` §3 "Filtered keys").
    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    /// Mutable access to the call's metadata.
    pub fn metadata_mut(&mut self) -> &mut MetadataMap {
        &mut self.metadata
    }

    /// Borrows the decoded message(s).
    pub fn get_ref(&self) -> &T {
        &self.message
    }

    /// Mutably borrows the decoded message(s).
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.message
    }

    /// Consumes the request, returning the decoded message(s).
    pub fn into_inner(self) -> T {
        self.message
    }

    /// The caller's socket address, if the transport recorded one.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.extensions
            .get::<crate::extensions::PeerAddr>()
            .map(|p| p.0)
    }

    /// The authentication outcome for this call, if an authentication
    /// interceptor ran before the handler.
    pub fn auth(&self) -> Option<&crate::extensions::AuthContext> {
        self.extensions.get::<crate::extensions::AuthContext>()
    }

    /// Access to the raw request extensions (transport- and
    /// interceptor-populated values keyed by type).
    pub fn extensions(&self) -> &http::Extensions {
        &self.extensions
    }

    /// Mutable access to the raw request extensions.
    pub fn extensions_mut(&mut self) -> &mut http::Extensions {
        &mut self.extensions
    }

    /// Maps the inner message, keeping metadata and extensions.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Request<U> {
        Request {
            metadata: self.metadata,
            message: f(self.message),
            extensions: self.extensions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_has_empty_metadata() {
        let req = Request::new(42);
        assert!(req.metadata().is_empty());
        assert_eq!(*req.get_ref(), 42);
    }

    #[test]
    fn map_preserves_metadata() {
        let mut req = Request::new(1);
        req.metadata_mut().insert(
            crate::metadata::AsciiMetadataKey::from_static("x-id"),
            crate::metadata::AsciiMetadataValue::from_static("abc"),
        );
        let mapped = req.map(|v| v.to_string());
        assert_eq!(mapped.get_ref(), "1");
        assert!(!mapped.metadata().is_empty());
    }
}
