//! Percent-encoding for the `grpc-message` trailer.
//!
//! The gRPC-over-HTTP/2 spec requires `grpc-message` to be a valid HTTP header
//! value, so arbitrary UTF-8 status details must be squeezed through a
//! restricted ASCII alphabet. Only the "unreserved" bytes defined by the gRPC
//! spec pass through unescaped; everything else (including every non-ASCII
//! byte of a multi-byte UTF-8 sequence) becomes `%HH`.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

/// https://github.com/grpc/grpc/blob/master/doc/PROTOCOL-HTTP2.md#responses
///
/// `Grpc-Message` is a percent encoded value, the below is the character set
/// used for percent encoding.
///
/// ```text
/// CHAR = <any US-ASCII character except NUL>
/// ```
///
/// `CONTROLS` adds all non-printable ASCII characters (0x00-0x1f, plus 0x7f)
/// to the CONTROLS set defined by the crate, and then the specific printable
/// characters reserved by gRPC are added on top of that.
const GRPC_MESSAGE_PERCENT_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Percent-encodes `src` for use as a `grpc-message` trailer value.
pub(crate) fn percent_encode(src: &str) -> String {
    utf8_percent_encode(src, GRPC_MESSAGE_PERCENT_ENCODE_SET).to_string()
}

/// Percent-decodes a `grpc-message` trailer value back into a `String`,
/// replacing any invalid UTF-8 with `U+FFFD`.
pub(crate) fn percent_decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_passes_through() {
        assert_eq!(percent_encode("hello world"), "hello%20world");
    }

    #[test]
    fn round_trips_unicode() {
        let original = "caf\u{e9} \u{1f980}";
        let encoded = percent_encode(original);
        assert!(encoded.is_ascii());
        assert_eq!(percent_decode(&encoded), original);
    }

    #[quickcheck_macros::quickcheck]
    fn round_trips_any_string(s: String) -> bool {
        percent_decode(&percent_encode(&s)) == s
    }
}
