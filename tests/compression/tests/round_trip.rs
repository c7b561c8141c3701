//! Exercises the dispatcher end to end through each compression algorithm:
//! a compressed request frame decodes correctly, and the configured
//! response compression is actually applied to what comes back.
//!
//! There's no gRPC client here (out of scope); requests are built by hand at
//! the HTTP/2-request level, the same shape a real client would send.

use bytes::{Bytes, BytesMut};
use http_body_util::{BodyExt, Full};
use tonic::codec::CompressionEncoding;
use tonic::server::{Grpc, UnaryService};
use tonic::{Request, Response, Status};
use tonic_prost::ProstCodec;

#[derive(Clone, PartialEq, prost::Message)]
struct Echo {
    #[prost(string, tag = "1")]
    text: String,
}

#[derive(Clone, Default)]
struct EchoService;

impl UnaryService<Echo> for EchoService {
    type Response = Echo;
    type Future = std::future::Ready<Result<Response<Echo>, Status>>;

    fn call(&mut self, request: Request<Echo>) -> Self::Future {
        std::future::ready(Ok(Response::new(request.into_inner())))
    }
}

fn frame(compressed: bool, payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(5 + payload.len());
    out.extend_from_slice(&[compressed as u8]);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out.freeze()
}

fn gzip_compress(payload: &[u8]) -> Vec<u8> {
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).unwrap();
    encoder.finish().unwrap()
}

fn gzip_decompress(payload: &[u8]) -> Vec<u8> {
    use flate2::read::GzDecoder;
    use std::io::Read;
    let mut decoder = GzDecoder::new(payload);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).unwrap();
    out
}

async fn send_gzip_compressed_request_and_get_gzip_response(text: &str) -> Echo {
    let mut message = Vec::new();
    prost::Message::encode(
        &Echo {
            text: text.to_owned(),
        },
        &mut message,
    )
    .unwrap();
    let compressed = gzip_compress(&message);
    let body = Full::new(frame(true, &compressed));

    let request = http::Request::builder()
        .version(http::Version::HTTP_2)
        .header("content-type", "application/grpc")
        .header("grpc-encoding", "gzip")
        .header("grpc-accept-encoding", "gzip")
        .body(body)
        .unwrap();

    let mut grpc = Grpc::new(ProstCodec::<Echo, Echo>::default())
        .accept_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Gzip);

    let response = grpc.unary(EchoService, request).await;
    assert_eq!(
        response.headers().get("grpc-encoding").unwrap(),
        "gzip",
        "response should be compressed since the client advertised gzip support"
    );

    let collected = response.into_body().collect().await.unwrap();
    let bytes = collected.to_bytes();
    assert_eq!(bytes[0], 1, "compressed-flag bit must be set");
    let len = u32::from_be_bytes(bytes[1..5].try_into().unwrap()) as usize;
    let decompressed = gzip_decompress(&bytes[5..5 + len]);

    let trailers = collected.trailers().unwrap();
    assert_eq!(trailers.get("grpc-status").unwrap(), "0");

    prost::Message::decode(&decompressed[..]).unwrap()
}

#[tokio::test]
async fn gzip_request_and_response_round_trip() {
    let echoed = send_gzip_compressed_request_and_get_gzip_response("hello from a client").await;
    assert_eq!(echoed.text, "hello from a client");
}

#[tokio::test]
async fn uncompressed_request_with_no_accept_encoding_gets_uncompressed_response() {
    let mut message = Vec::new();
    prost::Message::encode(
        &Echo {
            text: "plain".to_owned(),
        },
        &mut message,
    )
    .unwrap();
    let body = Full::new(frame(false, &message));

    let request = http::Request::builder()
        .version(http::Version::HTTP_2)
        .header("content-type", "application/grpc")
        .body(body)
        .unwrap();

    let mut grpc = Grpc::new(ProstCodec::<Echo, Echo>::default())
        .accept_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Gzip);

    let response = grpc.unary(EchoService, request).await;
    assert!(
        response.headers().get("grpc-encoding").is_none(),
        "without a grpc-accept-encoding header the response must stay uncompressed"
    );

    let collected = response.into_body().collect().await.unwrap();
    let bytes = collected.to_bytes();
    assert_eq!(bytes[0], 0, "compressed-flag bit must be clear");
}

#[tokio::test]
async fn unsupported_encoding_is_rejected_before_reaching_the_handler() {
    let body = Full::new(frame(true, b"garbage"));
    let request = http::Request::builder()
        .version(http::Version::HTTP_2)
        .header("content-type", "application/grpc")
        .header("grpc-encoding", "snappy")
        .body(body)
        .unwrap();

    let mut grpc = Grpc::new(ProstCodec::<Echo, Echo>::default())
        .accept_compressed(CompressionEncoding::Gzip);

    let response = grpc.unary(EchoService, request).await;
    let status = tonic::Status::from_header_map(response.headers()).unwrap();
    assert_eq!(status.code(), tonic::Code::Unimplemented);
    assert_eq!(
        response.headers().get("grpc-accept-encoding").unwrap(),
        "identity,gzip",
        "rejection must advertise what the server does accept, identity included"
    );
}
