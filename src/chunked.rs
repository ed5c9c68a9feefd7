//! HTTP/1.1 chunked transfer-encoding.
//!
//! hyper's h1 writer already frames a body with unknown length as chunked
//! on the wire, so the useful Rust translation of the original's hand-rolled
//! `chunked_send_headers`/`chunked_send_chunk`/`chunked_send_final` state
//! machine is the *decision* of when to hand hyper a size-unknown streaming
//! body instead of one buffered frame, plus the header bookkeeping that
//! goes with it (`mark_chunked`, shared with `compress.rs`). The literal
//! wire-format functions (`encode_chunk`/`final_chunk`) are kept as the
//! direct translation of the original algorithm and are exercised by tests.

use crate::proxy::context::BoxBody;
use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, Version};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;

/// Bodies at or above this size are streamed in `CHUNK_SIZE`-byte pieces
/// instead of handed to hyper as one large buffered frame.
pub const STREAM_THRESHOLD_BYTES: usize = 256 * 1024;
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Progression of a single chunked response: header line written, zero or
/// more data chunks, the terminating zero-length chunk, done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkedState {
    Headers,
    Body,
    Final,
    Done,
}

/// Remove `Content-Length` and (for HTTP/1.x) set `Transfer-Encoding:
/// chunked` — the header-level half of switching a response to chunked
/// framing. HTTP/2 has no `Transfer-Encoding`; framing is per-stream there.
pub fn mark_chunked(headers: &mut HeaderMap, version: Version) {
    headers.remove(CONTENT_LENGTH);
    if version == Version::HTTP_11 || version == Version::HTTP_10 {
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    }
}

/// Encode one chunk in the literal `<size-hex>\r\n<data>\r\n` wire format.
pub fn encode_chunk(data: &[u8]) -> Bytes {
    if data.is_empty() {
        return Bytes::new();
    }
    let mut buf = BytesMut::with_capacity(data.len() + 16);
    buf.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    buf.freeze()
}

/// The terminating `0\r\n\r\n` chunk (no trailers).
pub fn final_chunk() -> Bytes {
    Bytes::from_static(b"0\r\n\r\n")
}

/// Split `body` into `CHUNK_SIZE` pieces and stream them as hyper body
/// frames, relying on hyper's own h1 writer to add the wire-level chunk
/// framing (`mark_chunked` must be applied to the response's headers by the
/// caller beforehand).
pub fn stream_in_chunks(body: Bytes) -> BoxBody {
    let stream = futures_util::stream::unfold(body, |mut remaining| async move {
        if remaining.is_empty() {
            return None;
        }
        let take = remaining.len().min(CHUNK_SIZE);
        let piece = remaining.split_to(take);
        let frame: Result<Frame<Bytes>, hyper::Error> = Ok(Frame::data(piece));
        Some((frame, remaining))
    });
    BodyExt::boxed(StreamBody::new(stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_wire_format_matches_literal_algorithm() {
        let chunk = encode_chunk(b"hello");
        assert_eq!(&chunk[..], b"5\r\nhello\r\n");
        assert_eq!(&final_chunk()[..], b"0\r\n\r\n");
    }

    #[test]
    fn empty_chunk_encodes_to_nothing() {
        assert_eq!(encode_chunk(b"").len(), 0);
    }

    #[test]
    fn mark_chunked_strips_length_on_http11() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("100"));
        mark_chunked(&mut headers, Version::HTTP_11);
        assert!(!headers.contains_key(CONTENT_LENGTH));
        assert_eq!(headers.get(TRANSFER_ENCODING).unwrap(), "chunked");
    }

    #[test]
    fn mark_chunked_skips_transfer_encoding_on_http2() {
        let mut headers = HeaderMap::new();
        mark_chunked(&mut headers, Version::HTTP_2);
        assert!(!headers.contains_key(TRANSFER_ENCODING));
    }
}
