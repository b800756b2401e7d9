//! Upstream exchanges through an external TLS client process
//!
//! The process reads one JSON request document on stdin and prints the raw
//! HTTP response (status line, headers, blank line, body) on stdout. Failures
//! are reported through the exit code and a JSON object on stderr.

mod gzip;
mod parser;
mod process;
mod request;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use gzip::decode_body;
pub use parser::{Feed, ResponseHead, ResponseParser};
pub use process::ProcessTransport;
pub use request::{RequestBody, TransportRequest, wire_request};

/// Transport failure kinds
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("canceled")]
    Canceled,

    #[error("failed to spawn transport process: {0}")]
    Spawn(String),

    #[error("transport configuration rejected: {0}")]
    Configuration(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request rejected with status {status}")]
    BadRequest { status: u16, body: String },

    #[error("server failed with status {status}")]
    BadResponse { status: u16, body: String },

    #[error("failed to process response: {0}")]
    ResponseProcessing(String),
}

/// Complete response of a buffered exchange
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Turn a 4xx into `BadRequest` and a 5xx into `BadResponse`
    pub fn error_for_status(self) -> Result<Self, TransportError> {
        match self.status {
            400..=499 => Err(TransportError::BadRequest {
                status: self.status,
                body: self.text(),
            }),
            500..=599 => Err(TransportError::BadResponse {
                status: self.status,
                body: self.text(),
            }),
            _ => Ok(self),
        }
    }
}

/// A piece of a streamed body
#[derive(Debug, Clone)]
pub struct BodyChunk {
    pub data: Bytes,
    /// Body bytes received so far, including this chunk
    pub received: u64,
    /// Declared `content-length`, when there is one
    pub total: Option<u64>,
}

pub type ChunkReceiver = mpsc::UnboundedReceiver<Result<BodyChunk, TransportError>>;

/// Handle to an exchange whose headers have arrived
///
/// Body chunks are delivered in order until the channel closes (success) or
/// yields an error (terminal). The status is informational; a non-2xx
/// response still streams its body. Dropping the handle kills the process.
#[derive(Debug)]
pub struct StreamingResponse {
    head: ResponseHead,
    rx: ChunkReceiver,
    cancel: CancellationToken,
    collected: BytesMut,
    outcome: Option<Result<(), TransportError>>,
}

impl StreamingResponse {
    pub fn new(head: ResponseHead, rx: ChunkReceiver, cancel: CancellationToken) -> Self {
        Self {
            head,
            rx,
            cancel,
            collected: BytesMut::new(),
            outcome: None,
        }
    }

    pub const fn head(&self) -> &ResponseHead {
        &self.head
    }

    pub const fn status(&self) -> u16 {
        self.head.status
    }

    /// Next body chunk; `None` once the body ended or failed
    pub async fn next_chunk(&mut self) -> Option<Result<BodyChunk, TransportError>> {
        if self.outcome.is_some() {
            return None;
        }

        match self.rx.recv().await {
            Some(Ok(chunk)) => {
                self.collected.extend_from_slice(&chunk.data);
                Some(Ok(chunk))
            }
            Some(Err(e)) => {
                self.outcome = Some(Err(e.clone()));
                Some(Err(e))
            }
            None => {
                self.outcome = Some(Ok(()));
                None
            }
        }
    }

    /// Full raw body once the stream has ended
    ///
    /// Resolves from the collected bytes when the stream already ended and
    /// repeats the terminal error when it failed.
    pub async fn bytes(&mut self) -> Result<Bytes, TransportError> {
        while self.next_chunk().await.is_some() {}

        match &self.outcome {
            Some(Err(e)) => Err(e.clone()),
            _ => Ok(Bytes::copy_from_slice(&self.collected)),
        }
    }

    /// Full body text once the stream has ended
    pub async fn text(&mut self) -> Result<String, TransportError> {
        let body = self.bytes().await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Kill the underlying process
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for StreamingResponse {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Executes upstream exchanges
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Run an exchange to completion
    async fn send(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> Result<TransportResponse, TransportError>;

    /// Run an exchange and return as soon as the headers are parsed
    async fn send_streaming(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> Result<StreamingResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(status: u16) -> ResponseHead {
        ResponseHead {
            version: "1.1".to_owned(),
            status,
            status_text: String::new(),
            headers: Vec::new(),
        }
    }

    fn chunk(data: &'static [u8]) -> Result<BodyChunk, TransportError> {
        Ok(BodyChunk {
            data: Bytes::from_static(data),
            received: 0,
            total: None,
        })
    }

    #[tokio::test]
    async fn text_collects_and_caches() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(chunk(b"hello ")).unwrap();
        tx.send(chunk(b"world")).unwrap();
        drop(tx);

        let mut response = StreamingResponse::new(head(200), rx, CancellationToken::new());
        assert_eq!(response.text().await.unwrap(), "hello world");
        assert_eq!(response.text().await.unwrap(), "hello world");
        assert!(response.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn text_repeats_terminal_error() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(chunk(b"partial")).unwrap();
        tx.send(Err(TransportError::Network("reset".to_owned()))).unwrap();
        drop(tx);

        let mut response = StreamingResponse::new(head(200), rx, CancellationToken::new());
        assert!(matches!(response.text().await, Err(TransportError::Network(_))));
        assert!(matches!(response.text().await, Err(TransportError::Network(_))));
    }

    #[test]
    fn dropping_handle_cancels() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        drop(StreamingResponse::new(head(200), rx, cancel.clone()));
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn status_classification() {
        let response = |status| TransportResponse {
            status,
            status_text: String::new(),
            headers: Vec::new(),
            body: Bytes::from_static(b"oops"),
        };

        assert!(matches!(
            response(404).error_for_status(),
            Err(TransportError::BadRequest { status: 404, ref body }) if body == "oops"
        ));
        assert!(matches!(
            response(503).error_for_status(),
            Err(TransportError::BadResponse { status: 503, .. })
        ));
        assert!(response(204).error_for_status().is_ok());
    }
}
