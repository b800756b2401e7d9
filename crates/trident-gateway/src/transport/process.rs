use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use trident_config::{ProxyConfig, TransportConfig};

use super::{
    BodyChunk, HttpTransport, ResponseHead, ResponseParser, StreamingResponse, TransportError, TransportRequest,
    TransportResponse, decode_body, wire_request,
};

const READ_BUFFER: usize = 16 * 1024;

/// Exit codes the TLS client uses for classified failures
const EXIT_TIMEOUT: i32 = 3;
const EXIT_CONFIGURATION: i32 = 4;

/// Spawns the TLS client once per exchange
#[derive(Debug, Clone)]
pub struct ProcessTransport {
    binary: PathBuf,
    args: Vec<String>,
    config_path: Option<PathBuf>,
    proxy: Option<ProxyConfig>,
}

impl ProcessTransport {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            args: config.args.clone(),
            config_path: config.config_path.clone(),
            proxy: config.proxy.clone(),
        }
    }

    fn spawn(&self, request: &TransportRequest) -> Result<(Child, Vec<u8>), TransportError> {
        let payload = wire_request(request, self.config_path.as_deref(), self.proxy.as_ref())
            .map_err(|e| TransportError::Configuration(format!("failed to encode request: {e}")))?;

        let child = Command::new(&self.binary)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Spawn(format!("{}: {e}", self.binary.display())))?;

        Ok((child, payload))
    }
}

#[async_trait]
impl HttpTransport for ProcessTransport {
    async fn send(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> Result<TransportResponse, TransportError> {
        let decompress = request.decompress;
        let mut response = self.send_streaming(request, cancel).await?;
        response.text().await?;

        let head = response.head().clone();
        let collected = std::mem::take(&mut response.collected).freeze();
        let body = if decompress {
            decode_body(&head, collected)
        } else {
            collected
        };

        Ok(TransportResponse {
            status: head.status,
            status_text: head.status_text,
            headers: head.headers,
            body,
        })
    }

    async fn send_streaming(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> Result<StreamingResponse, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Canceled);
        }

        tracing::debug!(method = %request.method, url = %request.url, binary = %self.binary.display(), "spawning transport process");

        let (child, payload) = self.spawn(&request)?;
        let exchange = cancel.child_token();
        let guard = exchange.clone().drop_guard();

        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::unbounded_channel();

        tokio::spawn(drive(
            child,
            payload,
            request.timeout,
            exchange.clone(),
            Reporter {
                head: Some(head_tx),
                body: body_tx,
            },
        ));

        let head = head_rx
            .await
            .map_err(|_| TransportError::Network("transport driver stopped unexpectedly".to_owned()))??;

        guard.disarm();
        Ok(StreamingResponse::new(head, body_rx, exchange))
    }
}

/// Delivers the exchange outcome to whichever side is waiting
struct Reporter {
    head: Option<oneshot::Sender<Result<ResponseHead, TransportError>>>,
    body: mpsc::UnboundedSender<Result<BodyChunk, TransportError>>,
}

impl Reporter {
    fn head(&mut self, head: ResponseHead) {
        if let Some(tx) = self.head.take() {
            let _ = tx.send(Ok(head));
        }
    }

    fn fail(mut self, error: TransportError) {
        match self.head.take() {
            Some(tx) => {
                let _ = tx.send(Err(error));
            }
            None => {
                let _ = self.body.send(Err(error));
            }
        }
    }
}

/// Run one exchange: feed stdin, parse stdout, race the header timer and
/// cancellation, then classify the exit status
async fn drive(
    mut child: Child,
    payload: Vec<u8>,
    timeout: Option<Duration>,
    cancel: CancellationToken,
    mut reporter: Reporter,
) {
    if let Some(mut stdin) = child.stdin.take() {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&payload).await {
                tracing::debug!(error = %e, "transport process closed stdin early");
            }
        });
    }

    let stderr = tokio::spawn(read_stderr(child.stderr.take()));
    let Some(mut stdout) = child.stdout.take() else {
        reporter.fail(TransportError::Spawn("transport process has no stdout".to_owned()));
        return;
    };

    let timer = tokio::time::sleep(timeout.unwrap_or_default());
    tokio::pin!(timer);

    let mut parser = ResponseParser::new();
    let mut buffer = vec![0u8; READ_BUFFER];
    let mut received = 0u64;
    let mut total = None;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                kill(&mut child).await;
                reporter.fail(TransportError::Canceled);
                return;
            }

            () = &mut timer, if timeout.is_some() && !parser.head_parsed() => {
                kill(&mut child).await;
                let seconds = timeout.unwrap_or_default().as_secs_f64();
                reporter.fail(TransportError::Timeout(format!("no response headers within {seconds}s")));
                return;
            }

            read = stdout.read(&mut buffer) => {
                let n = match read {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        kill(&mut child).await;
                        reporter.fail(TransportError::Network(format!("failed to read transport output: {e}")));
                        return;
                    }
                };

                let feed = match parser.feed(&buffer[..n]) {
                    Ok(feed) => feed,
                    Err(e) => {
                        kill(&mut child).await;
                        reporter.fail(e);
                        return;
                    }
                };

                if let Some(head) = feed.head {
                    total = head.content_length();
                    reporter.head(head);
                }

                if let Some(data) = feed.body {
                    received += data.len() as u64;
                    let _ = reporter.body.send(Ok(BodyChunk { data, received, total }));
                }
            }
        }
    }

    let status = tokio::select! {
        biased;

        () = cancel.cancelled() => {
            kill(&mut child).await;
            reporter.fail(TransportError::Canceled);
            return;
        }

        status = child.wait() => status,
    };

    let status = match status {
        Ok(status) => status,
        Err(e) => {
            reporter.fail(TransportError::Network(format!("failed to wait for transport process: {e}")));
            return;
        }
    };

    if !status.success() {
        let stderr = stderr.await.unwrap_or_default();
        reporter.fail(exit_error(status, &stderr));
        return;
    }

    if let Err(e) = parser.finish() {
        reporter.fail(e);
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "failed to kill transport process");
    }
}

async fn read_stderr(stderr: Option<ChildStderr>) -> Vec<u8> {
    let mut collected = Vec::new();
    if let Some(mut stderr) = stderr
        && let Err(e) = stderr.read_to_end(&mut collected).await
    {
        tracing::debug!(error = %e, "failed to read transport stderr");
    }
    collected
}

#[derive(Deserialize)]
struct ProcessFailure {
    error: String,
    #[serde(default)]
    error_type: Option<String>,
}

/// Map a failed exit to an error kind, taking the message from stderr
fn exit_error(status: ExitStatus, stderr: &[u8]) -> TransportError {
    let message = match serde_json::from_slice::<ProcessFailure>(stderr) {
        Ok(failure) => {
            tracing::debug!(error_type = failure.error_type.as_deref().unwrap_or("unknown"), "transport process failed");
            failure.error
        }
        Err(_) => {
            let raw = String::from_utf8_lossy(stderr).trim().to_owned();
            if raw.is_empty() {
                format!("transport process exited with {status}")
            } else {
                raw
            }
        }
    };

    match status.code() {
        Some(EXIT_TIMEOUT) => TransportError::Timeout(message),
        Some(EXIT_CONFIGURATION) => TransportError::Configuration(message),
        _ => TransportError::Network(message),
    }
}
