//! Scripted stand-in for the TLS client process
//!
//! A `/bin/sh` script records every wire request and answers with the raw
//! HTTP response stored for the endpoint the request targets.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::TempDir;

const SCRIPT: &str = r#"dir="$(dirname "$0")"
request="$(cat)"
printf '%s\n' "$request" >> "$dir/requests.log"
case "$request" in
  *streamGenerateContent*) name=stream ;;
  *fetchAvailableModels*) name=models ;;
  *) name=generate ;;
esac
if [ -f "$dir/$name.exit" ]; then
  cat "$dir/$name.stderr" >&2
  exit "$(cat "$dir/$name.exit")"
fi
cat "$dir/$name.http"
"#;

/// Upstream endpoint a scripted answer belongs to
#[derive(Debug, Clone, Copy)]
pub enum Endpoint {
    Generate,
    Stream,
    Models,
}

impl Endpoint {
    const fn name(self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Stream => "stream",
            Self::Models => "models",
        }
    }
}

pub struct MockUpstream {
    dir: TempDir,
}

impl MockUpstream {
    pub fn start() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("upstream.sh"), SCRIPT)?;
        Ok(Self { dir })
    }

    pub fn script(&self) -> PathBuf {
        self.dir.path().join("upstream.sh")
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.path().join(file)
    }

    /// Answer `endpoint` with a raw HTTP response
    pub fn respond(&self, endpoint: Endpoint, status: u16, body: &str) {
        let reason = match status {
            200 => "OK",
            403 => "Forbidden",
            429 => "Too Many Requests",
            _ => "Error",
        };
        let content_type = match endpoint {
            Endpoint::Stream if status == 200 => "text/event-stream",
            _ => "application/json",
        };
        let raw = format!("HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\n\r\n{body}");

        let _ = fs::remove_file(self.path(&format!("{}.exit", endpoint.name())));
        fs::write(self.path(&format!("{}.http", endpoint.name())), raw).unwrap();
    }

    /// Make the process fail for `endpoint` with an exit code and stderr
    pub fn fail(&self, endpoint: Endpoint, code: i32, stderr: &str) {
        fs::write(self.path(&format!("{}.stderr", endpoint.name())), stderr).unwrap();
        fs::write(self.path(&format!("{}.exit", endpoint.name())), code.to_string()).unwrap();
    }

    /// Wire requests received so far, oldest first
    pub fn requests(&self) -> Vec<Value> {
        read_log(&self.path("requests.log"))
    }

    /// Upstream JSON body of the `index`th request
    pub fn upstream_body(&self, index: usize) -> Value {
        let request = &self.requests()[index];
        serde_json::from_str(request["body"].as_str().unwrap()).unwrap()
    }
}

fn read_log(path: &Path) -> Vec<Value> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// One SSE event line carrying an upstream chunk wrapped in `response`
pub fn sse(chunk: &Value) -> String {
    format!("data: {}\n\n", serde_json::json!({ "response": chunk }))
}
