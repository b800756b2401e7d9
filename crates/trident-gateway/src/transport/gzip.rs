use std::io::Read;

use bytes::Bytes;
use flate2::read::MultiGzDecoder;

use super::parser::ResponseHead;

/// Gunzip a body whose head declares gzip encoding
///
/// A body that fails to decompress is returned unchanged.
pub fn decode_body(head: &ResponseHead, body: Bytes) -> Bytes {
    if !head.is_gzip() || body.is_empty() {
        return body;
    }

    let mut decoded = Vec::with_capacity(body.len() * 4);
    match MultiGzDecoder::new(body.as_ref()).read_to_end(&mut decoded) {
        Ok(_) => Bytes::from(decoded),
        Err(e) => {
            tracing::warn!(error = %e, len = body.len(), "failed to gunzip response body, returning raw bytes");
            body
        }
    }
}
