//! Streaming response compression (gzip / brotli).
//!
//! Negotiates an encoding from the client's `Accept-Encoding` header and
//! wraps the response body in an `async-compression` encoder so bytes are
//! compressed on the fly rather than buffered in memory first.

use crate::chunked::mark_chunked;
use crate::config::types::GzipConfig;
use crate::proxy::context::BoxBody;
use bytes::Bytes;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use http::HeaderValue;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use hyper::Response;

/// Negotiate the best encoding from the client's `Accept-Encoding` header.
/// Returns `"br"` (brotli) or `"gzip"` if accepted (q > 0), otherwise `None`.
/// Properly parses quality values: `gzip;q=1, br;q=0` will NOT select br.
pub fn negotiate_encoding(accept_encoding: &str) -> Option<&'static str> {
    let mut br_ok = false;
    let mut gzip_ok = false;

    for part in accept_encoding.split(',') {
        let part = part.trim();
        let mut tokens = part.splitn(2, ';');
        let encoding = tokens.next().unwrap_or("").trim().to_ascii_lowercase();

        let q: f32 = tokens
            .next()
            .and_then(|params| {
                params.split(';').find_map(|p| {
                    let p = p.trim();
                    p.strip_prefix("q=")
                        .and_then(|v| v.trim().parse::<f32>().ok())
                })
            })
            .unwrap_or(1.0);

        if q <= 0.0 {
            continue;
        }

        match encoding.as_str() {
            "br" => br_ok = true,
            "gzip" => gzip_ok = true,
            "*" => {
                br_ok = true;
                gzip_ok = true;
            }
            _ => {}
        }
    }

    if br_ok {
        Some("br")
    } else if gzip_ok {
        Some("gzip")
    } else {
        None
    }
}

/// True if `content_type` is one of the configured compressible MIME types.
/// A missing or unparseable type is treated as non-compressible — nginx's
/// `gzip_types` defaults to `text/html` only for the same reason.
fn type_is_compressible(cfg: &GzipConfig, content_type: Option<&str>) -> bool {
    let ct = match content_type {
        Some(ct) => ct.split(';').next().unwrap_or(ct).trim(),
        None => return false,
    };
    cfg.types.iter().any(|t| t == ct)
}

/// Attempt to compress the response body using streaming compression.
///
/// Only compresses when `cfg.enabled`, the body is at least `cfg.min_length`
/// bytes (by `Content-Length`, when known — a body with no declared length is
/// compressed regardless, since withholding it would mean buffering first),
/// the response's content type is in `cfg.types`, and the client's
/// `Accept-Encoding` accepts gzip or brotli. Falls back to returning the
/// original, unmodified response on any mismatch.
pub fn try_compress_response(
    cfg: &GzipConfig,
    resp: Response<BoxBody>,
    accept_encoding: &str,
) -> Response<BoxBody> {
    if !cfg.enabled {
        return resp;
    }

    let encoding = match negotiate_encoding(accept_encoding) {
        Some(e) => e,
        None => return resp,
    };

    let content_type = resp
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    if !type_is_compressible(cfg, content_type) {
        return resp;
    }

    let content_length = resp
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if let Some(len) = content_length {
        if len < cfg.min_length {
            return resp;
        }
    }

    let version = resp.version();
    let (mut parts, body) = resp.into_parts();

    let body_reader = tokio_util::io::StreamReader::new(BodyStream(body));
    let buf_reader = tokio::io::BufReader::new(body_reader);

    let compressed_body: BoxBody = match encoding {
        "gzip" => {
            let encoder = async_compression::tokio::bufread::GzipEncoder::new(buf_reader);
            wrap_encoder_as_body(encoder)
        }
        "br" => {
            let encoder = async_compression::tokio::bufread::BrotliEncoder::with_quality(
                buf_reader,
                async_compression::Level::Fastest,
            );
            wrap_encoder_as_body(encoder)
        }
        _ => unreachable!(),
    };

    parts
        .headers
        .insert(CONTENT_ENCODING, HeaderValue::from_static(encoding));
    mark_chunked(&mut parts.headers, version);

    Response::from_parts(parts, compressed_body)
}

/// Wrap an `AsyncRead` compression encoder into a `BoxBody`.
fn wrap_encoder_as_body<R>(encoder: R) -> BoxBody
where
    R: tokio::io::AsyncRead + Send + Sync + 'static,
{
    use tokio::io::AsyncReadExt;

    let encoder = Box::pin(encoder);
    let stream = futures_util::stream::unfold(encoder, |mut enc| async move {
        let mut buf = vec![0u8; 8192];
        match enc.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                let frame: Result<Frame<Bytes>, hyper::Error> = Ok(Frame::data(Bytes::from(buf)));
                Some((frame, enc))
            }
            Err(_) => None,
        }
    });
    BodyExt::boxed(StreamBody::new(stream))
}

/// Adapter that converts a `BoxBody` into a `Stream<Item = io::Result<Bytes>>`
/// suitable for `tokio_util::io::StreamReader`.
struct BodyStream(BoxBody);

impl futures_util::Stream for BodyStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use hyper::body::Body;

        loop {
            match std::pin::Pin::new(&mut self.0).poll_frame(cx) {
                std::task::Poll::Ready(Some(Ok(frame))) => {
                    if let Ok(data) = frame.into_data() {
                        return std::task::Poll::Ready(Some(Ok(data)));
                    }
                    continue;
                }
                std::task::Poll::Ready(Some(Err(e))) => {
                    return std::task::Poll::Ready(Some(Err(std::io::Error::other(e.to_string()))));
                }
                std::task::Poll::Ready(None) => return std::task::Poll::Ready(None),
                std::task::Poll::Pending => return std::task::Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_prefers_brotli() {
        assert_eq!(negotiate_encoding("gzip, br"), Some("br"));
        assert_eq!(negotiate_encoding("gzip"), Some("gzip"));
        assert_eq!(negotiate_encoding("br;q=0, gzip"), Some("gzip"));
        assert_eq!(negotiate_encoding("identity"), None);
    }

    #[test]
    fn type_filter_matches_configured_list() {
        let cfg = GzipConfig {
            enabled: true,
            min_length: 0,
            types: vec!["text/html".to_string()],
        };
        assert!(type_is_compressible(&cfg, Some("text/html; charset=utf-8")));
        assert!(!type_is_compressible(&cfg, Some("image/png")));
        assert!(!type_is_compressible(&cfg, None));
    }
}
