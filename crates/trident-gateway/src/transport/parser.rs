//! Incremental parser for the raw HTTP response the transport process prints

use std::sync::OnceLock;

use bytes::{Bytes, BytesMut};
use regex::Regex;

use super::TransportError;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

fn status_line() -> &'static Regex {
    static STATUS_LINE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    STATUS_LINE.get_or_init(|| Regex::new(r"^HTTP/(\S+)\s+(\d{3})\s*(.*)$").expect("valid status line regex"))
}

/// Status line and headers of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub version: String,
    pub status: u16,
    pub status_text: String,
    /// Lower-cased names, in arrival order
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// First value for a header; `name` must be lower case
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")?.parse().ok()
    }

    pub fn is_gzip(&self) -> bool {
        self.header("content-encoding")
            .is_some_and(|encoding| encoding.to_ascii_lowercase().contains("gzip"))
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    fn parse(raw: &[u8]) -> Result<Self, TransportError> {
        let text = String::from_utf8_lossy(raw);
        let mut lines = text.split("\r\n");

        let first = lines.next().unwrap_or_default();
        let captures = status_line()
            .captures(first)
            .ok_or_else(|| TransportError::ResponseProcessing(format!("malformed status line: {first:?}")))?;

        let status = captures[2]
            .parse()
            .map_err(|_| TransportError::ResponseProcessing(format!("invalid status code: {}", &captures[2])))?;

        let headers = lines
            .filter_map(|line| {
                let (name, value) = line.split_once(": ")?;
                Some((name.trim().to_ascii_lowercase(), value.trim().to_owned()))
            })
            .collect();

        Ok(Self {
            version: captures[1].to_owned(),
            status,
            status_text: captures[3].trim().to_owned(),
            headers,
        })
    }
}

#[derive(Debug)]
enum ParserState {
    AwaitingHead { buffer: BytesMut },
    StreamingBody,
    Closed,
}

/// What one call to [`ResponseParser::feed`] produced
#[derive(Debug, Default)]
pub struct Feed {
    /// Set exactly once, on the call that completed the header block
    pub head: Option<ResponseHead>,
    pub body: Option<Bytes>,
}

/// Framed parser over the transport's stdout
///
/// Header bytes accumulate until the first blank line is found in the
/// accumulated buffer, so the boundary may fall anywhere across chunks.
/// Everything after it is body and is passed through untouched.
#[derive(Debug)]
pub struct ResponseParser {
    state: ParserState,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::AwaitingHead {
                buffer: BytesMut::new(),
            },
        }
    }

    pub const fn head_parsed(&self) -> bool {
        !matches!(self.state, ParserState::AwaitingHead { .. })
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Result<Feed, TransportError> {
        match &mut self.state {
            ParserState::Closed => Ok(Feed::default()),
            ParserState::StreamingBody => Ok(Feed {
                head: None,
                body: (!chunk.is_empty()).then(|| Bytes::copy_from_slice(chunk)),
            }),
            ParserState::AwaitingHead { buffer } => {
                buffer.extend_from_slice(chunk);

                let Some(boundary) = buffer
                    .windows(HEAD_TERMINATOR.len())
                    .position(|window| window == HEAD_TERMINATOR)
                else {
                    return Ok(Feed::default());
                };

                let mut raw = buffer.split_to(boundary + HEAD_TERMINATOR.len());
                raw.truncate(boundary);
                let rest = buffer.split().freeze();

                let head = match ResponseHead::parse(&raw) {
                    Ok(head) => head,
                    Err(e) => {
                        self.state = ParserState::Closed;
                        return Err(e);
                    }
                };
                self.state = ParserState::StreamingBody;

                Ok(Feed {
                    head: Some(head),
                    body: (!rest.is_empty()).then_some(rest),
                })
            }
        }
    }

    /// Mark the end of input
    pub fn finish(&mut self) -> Result<(), TransportError> {
        let state = std::mem::replace(&mut self.state, ParserState::Closed);
        match state {
            ParserState::AwaitingHead { buffer } => Err(TransportError::ResponseProcessing(format!(
                "response ended before headers were complete ({} bytes received)",
                buffer.len()
            ))),
            ParserState::StreamingBody | ParserState::Closed => Ok(()),
        }
    }
}
