//! Response compression.
//!
//! An encoding is negotiated once per response, before headers are written:
//! the client must accept gzip, the content type must be compressible, the
//! body must clear a minimum size, and `Cache-Control: no-transform` wins
//! over everything. Large JSON array payloads can instead be framed as a
//! concatenation of independently-valid gzip members (`gzip_stream=yes`):
//! the framing layer stays `identity` while the bytes are gzip, and a client
//! can decode each flushed member as it arrives.

use std::io::Write;

use axum::http::{HeaderMap, header};
use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;

/// Bodies smaller than this are not worth a gzip pass.
pub const MIN_COMPRESS_SIZE: usize = 1024;

const COMPRESSIBLE_PREFIXES: [&str; 2] = ["text/", "application/x-mws-tiddler"];
const COMPRESSIBLE_TYPES: [&str; 3] = [
    "application/json",
    "application/javascript",
    "application/xml",
];

pub fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| {
            v.split(',')
                .any(|enc| enc.trim().split(';').next() == Some("gzip"))
        })
}

pub fn is_compressible(content_type: &str) -> bool {
    let base = content_type.split(';').next().unwrap_or("").trim();
    COMPRESSIBLE_PREFIXES.iter().any(|p| base.starts_with(p))
        || COMPRESSIBLE_TYPES.contains(&base)
}

fn no_transform(cache_control: Option<&str>) -> bool {
    cache_control.is_some_and(|cc| cc.split(',').any(|d| d.trim() == "no-transform"))
}

/// Decides, once, whether a buffered response body should be gzipped.
pub fn negotiate(
    request_headers: &HeaderMap,
    content_type: &str,
    cache_control: Option<&str>,
    body_len: usize,
) -> bool {
    accepts_gzip(request_headers)
        && is_compressible(content_type)
        && body_len >= MIN_COMPRESS_SIZE
        && !no_transform(cache_control)
}

/// Compresses a whole buffered body as one gzip stream.
pub fn gzip_body(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body)?;
    encoder.finish()
}

/// Compresses one chunk as a complete, self-terminated gzip member. A
/// sequence of members concatenates into a stream any multi-member-aware
/// gzip decoder accepts, letting the connection stay open between members.
pub fn gzip_member(chunk: &[u8]) -> std::io::Result<Bytes> {
    gzip_body(chunk).map(Bytes::from)
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use axum::http::HeaderValue;
    use flate2::read::{GzDecoder, MultiGzDecoder};

    use super::*;

    fn gzip_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate, br"),
        );
        headers
    }

    #[test]
    fn test_negotiate_requires_accept_encoding() {
        assert!(negotiate(&gzip_headers(), "application/json", None, 4096));
        assert!(!negotiate(&HeaderMap::new(), "application/json", None, 4096));
    }

    #[test]
    fn test_negotiate_size_threshold_and_type() {
        let headers = gzip_headers();
        assert!(!negotiate(&headers, "application/json", None, 10));
        assert!(!negotiate(&headers, "image/png", None, 1 << 20));
        assert!(negotiate(&headers, "text/html; charset=utf-8", None, 4096));
    }

    #[test]
    fn test_no_transform_wins() {
        let headers = gzip_headers();
        assert!(!negotiate(
            &headers,
            "application/json",
            Some("max-age=60, no-transform"),
            4096
        ));
    }

    #[test]
    fn test_gzip_body_roundtrip() {
        let payload = b"hello hello hello hello".repeat(100);
        let compressed = gzip_body(&payload).unwrap();
        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn test_member_concatenation_decodes_as_one_stream() {
        let chunks: [&[u8]; 3] = [b"[{\"a\":1}", b",{\"b\":2}", b"]"];
        let mut wire = Vec::new();
        for chunk in chunks {
            wire.extend_from_slice(&gzip_member(chunk).unwrap());
        }
        let mut decoder = MultiGzDecoder::new(wire.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"[{\"a\":1},{\"b\":2}]");
    }
}
