//! Call metadata: an ordered, duplicate-permitting multi-map of request and
//! response headers, plus the canonical gRPC protocol header/trailer names.
//!
//! [`MetadataMap`] is the typed surface handlers and interceptors see;
//! underneath it wraps an [`http::HeaderMap`] so that converting to/from the
//! wire representation the transport actually deals in is a move, not a
//! copy.

mod encoding;
mod key;
mod value;

pub use encoding::{Ascii, Binary};
pub use key::{InvalidMetadataKey, MetadataKey};
pub use value::{InvalidMetadataValue, MetadataValue};

use http::{HeaderMap, HeaderName, HeaderValue};
use std::fmt;

/// An ASCII-valued metadata key (the common case: any header not ending in
/// `-bin`).
pub type AsciiMetadataKey = MetadataKey<Ascii>;
/// A binary-valued metadata key (ends in `-bin`; value is base64 on the
/// wire).
pub type BinaryMetadataKey = MetadataKey<Binary>;
/// An ASCII metadata value.
pub type AsciiMetadataValue = MetadataValue<Ascii>;
/// A binary metadata value (decoded bytes; base64 applied at the wire
/// boundary).
pub type BinaryMetadataValue = MetadataValue<Binary>;

// --- Protocol Constants & Headers -----------------------------------------

/// The one supported request/response content type for this core (transcoding
/// to `-web` variants is out of scope; see `spec.md` §6).
pub(crate) const GRPC_CONTENT_TYPE: &str = "application/grpc";

/// `grpc-timeout` request header: `<integer><unit>`, e.g. `"50m"` (50ms).
pub(crate) const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";
/// `grpc-encoding` request/response header naming the compression used for
/// the message frames that follow.
pub(crate) const GRPC_ENCODING_HEADER: &str = "grpc-encoding";
/// `grpc-accept-encoding`: the comma-separated list of compression names the
/// sender is willing to decode.
pub(crate) const GRPC_ACCEPT_ENCODING_HEADER: &str = "grpc-accept-encoding";
/// `grpc-status` trailer: decimal status code.
pub(crate) const GRPC_STATUS_HEADER: &str = "grpc-status";
/// `grpc-message` trailer: percent-encoded status detail.
pub(crate) const GRPC_MESSAGE_HEADER: &str = "grpc-message";
/// Per-call override for the response compression, consumed (not forwarded)
/// by [`crate::server::context`].
pub(crate) const GRPC_INTERNAL_ENCODING_REQUEST: &str = "grpc-internal-encoding-request";

/// Returns `true` if `content_type` is an accepted `application/grpc`
/// request content type: exactly `application/grpc`, or that prefix followed
/// by `;` or `+` (`application/grpc+proto`, `application/grpc;proto` ...).
///
/// `application/grpc-web`/`application/grpc-web-text` intentionally do not
/// match here; grpc-web bridging is out of scope (`spec.md` §1).
pub(crate) fn is_grpc_content_type(content_type: &str) -> bool {
    if let Some(rest) = content_type.strip_prefix(GRPC_CONTENT_TYPE) {
        rest.is_empty() || rest.starts_with('+') || rest.starts_with(';')
    } else {
        false
    }
}

/// Headers that are either HTTP/2 pseudo-headers, or carry transport/framing
/// concerns the core consumes itself; these never appear in the
/// user-visible [`crate::Request::metadata`] view (`spec.md` §3, Metadata
/// entry, "Filtered keys").
fn is_reserved_header(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "content-type"
            | "te"
            | "host"
            | "accept-encoding"
            | "grpc-accept-encoding"
            | "grpc-encoding"
            | "grpc-timeout"
            | "grpc-internal-encoding-request"
            | "connection"
            | "transfer-encoding"
    )
}

/// An ordered, duplicate-permitting multi-map of gRPC metadata entries.
///
/// Binary entries (keys ending `-bin`) hold decoded bytes in memory; they're
/// base64-encoded only at [`MetadataMap::into_headers`] time, and decoded at
/// [`MetadataMap::from_headers`] time (tolerant of missing padding per
/// `spec.md` §3/§8).
#[derive(Clone, Default)]
pub struct MetadataMap {
    headers: HeaderMap,
}

impl MetadataMap {
    /// Creates an empty `MetadataMap`.
    pub fn new() -> Self {
        MetadataMap {
            headers: HeaderMap::new(),
        }
    }

    pub(crate) fn from_headers(headers: HeaderMap) -> Self {
        MetadataMap { headers }
    }

    /// Consumes this map, yielding the underlying `HeaderMap` with binary
    /// values base64-encoded back onto the wire.
    pub(crate) fn into_headers(self) -> HeaderMap {
        self.headers
    }

    pub(crate) fn as_headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub(crate) fn as_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Returns the number of entries (counting duplicates).
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Inserts an ASCII text entry, returning the previous value if the key
    /// was already present (duplicates beyond the first are reachable only
    /// via [`MetadataMap::append`]).
    pub fn insert<K>(&mut self, key: K, value: AsciiMetadataValue) -> Option<AsciiMetadataValue>
    where
        K: AsMetadataKey<Ascii>,
    {
        self.headers
            .insert(key.into_header_name(), value.into_header_value())
            .map(AsciiMetadataValue::from_header_value)
    }

    /// Inserts a binary entry (key must end in `-bin`).
    pub fn insert_bin<K>(
        &mut self,
        key: K,
        value: BinaryMetadataValue,
    ) -> Option<BinaryMetadataValue>
    where
        K: AsMetadataKey<Binary>,
    {
        self.headers
            .insert(key.into_header_name(), value.into_header_value())
            .map(BinaryMetadataValue::from_wire_header_value)
    }

    /// Appends an ASCII entry without removing any existing entries for the
    /// same key (order of insertion preserved, per `spec.md` §3).
    pub fn append<K>(&mut self, key: K, value: AsciiMetadataValue) -> bool
    where
        K: AsMetadataKey<Ascii>,
    {
        self.headers
            .append(key.into_header_name(), value.into_header_value())
    }

    /// Appends a binary entry.
    pub fn append_bin<K>(&mut self, key: K, value: BinaryMetadataValue) -> bool
    where
        K: AsMetadataKey<Binary>,
    {
        self.headers
            .append(key.into_header_name(), value.into_header_value())
    }

    /// Gets the first ASCII value for `key`, if present.
    pub fn get<K>(&self, key: K) -> Option<AsciiMetadataValue>
    where
        K: AsMetadataKey<Ascii>,
    {
        self.headers
            .get(key.as_header_name())
            .cloned()
            .map(AsciiMetadataValue::from_header_value)
    }

    /// Gets the first binary value for `key`, if present.
    pub fn get_bin<K>(&self, key: K) -> Option<BinaryMetadataValue>
    where
        K: AsMetadataKey<Binary>,
    {
        self.headers
            .get(key.as_header_name())
            .cloned()
            .map(BinaryMetadataValue::from_wire_header_value)
    }

    /// Removes all entries for `key`.
    pub fn remove<K>(&mut self, key: K) -> Option<AsciiMetadataValue>
    where
        K: AsMetadataKey<Ascii>,
    {
        self.headers
            .remove(key.as_header_name())
            .map(AsciiMetadataValue::from_header_value)
    }

    /// Iterates all values (duplicates included, insertion order) for `key`.
    pub fn get_all<K>(&self, key: K) -> impl Iterator<Item = AsciiMetadataValue> + '_
    where
        K: AsMetadataKey<Ascii>,
    {
        self.headers
            .get_all(key.as_header_name())
            .iter()
            .cloned()
            .map(AsciiMetadataValue::from_header_value)
    }

    /// Merges `other` into `self`. Per-key semantics match
    /// [`MetadataMap::append`]: existing entries are kept and new ones are
    /// added after them, preserving overall insertion order (used to fold
    /// trailing metadata produced mid-stream into the context, `spec.md`
    /// §4.4).
    pub fn merge(&mut self, other: MetadataMap) {
        for (name, value) in other.headers {
            if let Some(name) = name {
                self.headers.append(name, value);
            }
        }
    }

    /// Builds the user-visible request-headers view: drops pseudo-headers
    /// (`:method` etc., never present in an `http::HeaderMap` body, kept
    /// here for documentation) and the reserved/filtered names listed in
    /// `spec.md` §3, and leaves the rest (including `-bin` entries, still in
    /// their wire/base64 form; decode happens lazily per-key via
    /// [`MetadataMap::get_bin`]).
    pub(crate) fn from_request_headers(headers: &HeaderMap) -> Self {
        let mut out = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            if is_reserved_header(name) {
                continue;
            }
            out.append(name.clone(), value.clone());
        }
        MetadataMap { headers: out }
    }

    /// Iterator over `(key, value)` for ASCII entries only (binary entries
    /// are surfaced through [`MetadataMap::get_bin`]/`get_all` with an
    /// explicit `Binary` key type to keep base64 handling type-directed).
    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.headers.iter()
    }
}

impl fmt::Debug for MetadataMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.headers, f)
    }
}

impl From<HeaderMap> for MetadataMap {
    fn from(headers: HeaderMap) -> Self {
        MetadataMap { headers }
    }
}

/// Sealed-ish helper trait letting `MetadataMap` accept both owned
/// [`MetadataKey`]s and `&'static str` literals at call sites, mirroring
/// `http::HeaderMap`'s `AsHeaderName`.
pub trait AsMetadataKey<VE: self::encoding::ValueEncoding>: sealed::Sealed<VE> {
    #[doc(hidden)]
    fn into_header_name(self) -> HeaderName;
    #[doc(hidden)]
    fn as_header_name(&self) -> &HeaderName;
}

mod sealed {
    use super::encoding::ValueEncoding;
    pub trait Sealed<VE: ValueEncoding> {}
    impl<VE: ValueEncoding> Sealed<VE> for super::MetadataKey<VE> {}
    impl<VE: ValueEncoding> Sealed<VE> for &super::MetadataKey<VE> {}
}

impl<VE: self::encoding::ValueEncoding> AsMetadataKey<VE> for MetadataKey<VE> {
    fn into_header_name(self) -> HeaderName {
        MetadataKey::into_header_name(self)
    }

    fn as_header_name(&self) -> &HeaderName {
        MetadataKey::as_header_name(self)
    }
}

impl<VE: self::encoding::ValueEncoding> AsMetadataKey<VE> for &MetadataKey<VE> {
    fn into_header_name(self) -> HeaderName {
        self.inner.clone()
    }

    fn as_header_name(&self) -> &HeaderName {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_round_trip() {
        let mut map = MetadataMap::new();
        let key = AsciiMetadataKey::from_static("x-request-id");
        map.insert(key.clone(), AsciiMetadataValue::from_static("abc123"));
        assert_eq!(map.get(&key).unwrap().to_str().unwrap(), "abc123");
    }

    #[test]
    fn append_preserves_duplicates_in_order() {
        let mut map = MetadataMap::new();
        let key = AsciiMetadataKey::from_static("x-tag");
        map.append(key.clone(), AsciiMetadataValue::from_static("a"));
        map.append(key.clone(), AsciiMetadataValue::from_static("b"));
        let values: Vec<_> = map
            .get_all(&key)
            .map(|v| v.to_str().unwrap().to_owned())
            .collect();
        assert_eq!(values, vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn request_headers_view_drops_reserved_keys() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/grpc"));
        headers.insert("grpc-timeout", HeaderValue::from_static("50m"));
        headers.insert("x-custom", HeaderValue::from_static("value"));

        let view = MetadataMap::from_request_headers(&headers);
        assert!(view.get(AsciiMetadataKey::from_static("content-type")).is_none());
        assert!(view.get(AsciiMetadataKey::from_static("grpc-timeout")).is_none());
        assert_eq!(
            view.get(AsciiMetadataKey::from_static("x-custom"))
                .unwrap()
                .to_str()
                .unwrap(),
            "value"
        );
    }

    #[test]
    fn content_type_matching() {
        assert!(is_grpc_content_type("application/grpc"));
        assert!(is_grpc_content_type("application/grpc+proto"));
        assert!(is_grpc_content_type("application/grpc;proto"));
        assert!(!is_grpc_content_type("application/grpc-web"));
        assert!(!is_grpc_content_type("application/json"));
    }
}
