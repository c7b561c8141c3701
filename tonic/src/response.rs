//! The typed response wrapper a handler returns: a message (or message
//! stream) plus response metadata (`spec.md` §3, Data Model).

use crate::metadata::MetadataMap;

/// A single gRPC response: the message `T` a handler produced, and any
/// custom metadata it wants reflected onto the response headers.
#[derive(Debug)]
pub struct Response<T> {
    metadata: MetadataMap,
    message: T,
    extensions: http::Extensions,
}

impl<T> Response<T> {
    /// Wraps `message` with empty metadata.
    pub fn new(message: T) -> Self {
        Response {
            metadata: MetadataMap::new(),
            message,
            extensions: http::Extensions::new(),
        }
    }

    pub(crate) fn from_http(response: http::Response<T>) -> Self {
        let (parts, message) = response.into_parts();
        Response {
            metadata: MetadataMap::from_headers(parts.headers),
            message,
            extensions: parts.extensions,
        }
    }

    pub(crate) fn into_http(self) -> http::Response<T> {
        let mut response = http::Response::new(self.message);
        *response.headers_mut() = self.metadata.into_headers();
        *response.extensions_mut() = self.extensions;
        response
    }

    /// The response metadata (set via [`Response::metadata_mut`] before the
    /// handler returns; merged onto the outgoing response headers).
    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    /// Mutable access to the response metadata.
    pub fn metadata_mut(&mut self) -> &mut MetadataMap {
        &mut self.metadata
    }

    /// Borrows the response message.
    pub fn get_ref(&self) -> &T {
        &self.message
    }

    /// Mutably borrows the response message.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.message
    }

    /// Consumes the response, returning the message.
    pub fn into_inner(self) -> T {
        self.message
    }

    /// Maps the inner message, keeping metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response {
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
    fn new_response_has_empty_metadata() {
        let resp = Response::new("hello");
        assert!(resp.metadata().is_empty());
        assert_eq!(*resp.get_ref(), "hello");
    }
}
