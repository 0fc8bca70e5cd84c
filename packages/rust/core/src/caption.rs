//! Image captioning through a JSON-lines subprocess bridge.
//!
//! The bridge process announces itself with `{"type":"ready"}`, then answers
//! one caption request per line until it receives `{"type":"shutdown"}`.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{info, warn};

use threadcrawl_shared::{Result, ThreadCrawlError};

use crate::enrichment::ImageCaptioner;

/// Default bound on one caption request.
pub const DEFAULT_CAPTION_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Serialize)]
#[serde(tag = "type")]
enum RequestMessage {
    #[serde(rename = "caption")]
    Caption { id: String, image_base64: String },
    #[serde(rename = "shutdown")]
    Shutdown,
}

#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type")]
enum ResponseMessage {
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "result")]
    Result { id: String, lines: Vec<String> },
    #[serde(rename = "error")]
    Error {
        #[allow(dead_code)]
        id: String,
        error: String,
    },
}

// ---------------------------------------------------------------------------
// Bridge handle
// ---------------------------------------------------------------------------

/// Pipes to a running bridge. Held for the length of one request.
struct BridgeIo {
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    request_counter: u64,
}

impl BridgeIo {
    fn read_message(&mut self) -> Result<ResponseMessage> {
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .map_err(|e| ThreadCrawlError::Enrichment(format!("bridge read error: {e}")))?;

        if line.is_empty() {
            return Err(ThreadCrawlError::Enrichment(
                "bridge closed stdout unexpectedly".into(),
            ));
        }

        serde_json::from_str(line.trim()).map_err(|e| {
            let shown: String = line.chars().take(200).collect();
            ThreadCrawlError::Enrichment(format!("invalid bridge message: {e} (got: {shown})"))
        })
    }

    fn wait_for_ready(&mut self) -> Result<()> {
        match self.read_message()? {
            ResponseMessage::Ready => {
                info!("caption bridge is ready");
                Ok(())
            }
            other => Err(ThreadCrawlError::Enrichment(format!(
                "expected ready message, got: {other:?}"
            ))),
        }
    }

    fn write_message(&mut self, msg: &RequestMessage) -> Result<()> {
        let json = serde_json::to_string(msg).map_err(|e| {
            ThreadCrawlError::Enrichment(format!("failed to serialize request: {e}"))
        })?;
        writeln!(self.stdin, "{json}").map_err(|e| {
            ThreadCrawlError::Enrichment(format!("failed to write to bridge stdin: {e}"))
        })?;
        self.stdin.flush().map_err(|e| {
            ThreadCrawlError::Enrichment(format!("failed to flush bridge stdin: {e}"))
        })
    }

    fn caption(&mut self, image: &[u8]) -> Result<Vec<String>> {
        self.request_counter += 1;
        let id = format!("req-{}", self.request_counter);

        self.write_message(&RequestMessage::Caption {
            id: id.clone(),
            image_base64: STANDARD.encode(image),
        })?;

        match self.read_message()? {
            ResponseMessage::Result { id: resp_id, lines } if resp_id == id => Ok(lines),
            ResponseMessage::Result { id: resp_id, .. } => Err(ThreadCrawlError::Enrichment(
                format!("bridge answered {resp_id}, expected {id}"),
            )),
            ResponseMessage::Error { error, .. } => Err(ThreadCrawlError::Enrichment(error)),
            ResponseMessage::Ready => Err(ThreadCrawlError::Enrichment(
                "unexpected ready message during captioning".into(),
            )),
        }
    }
}

/// The bridge process plus its pipes.
///
/// The child sits behind its own lock so a stuck request can be cut off by
/// killing the process while the pipes are still held.
struct BridgeHandle {
    child: Mutex<Child>,
    io: Mutex<BridgeIo>,
    discarded: AtomicBool,
}

impl BridgeHandle {
    fn spawn(cmd: &str, args: &[String]) -> Result<Self> {
        info!(%cmd, ?args, "spawning caption bridge");

        let mut child = Command::new(cmd)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                ThreadCrawlError::Enrichment(format!(
                    "failed to spawn caption bridge: {e}. Is `{cmd}` installed?"
                ))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            ThreadCrawlError::Enrichment("failed to capture bridge stdin".into())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ThreadCrawlError::Enrichment("failed to capture bridge stdout".into())
        })?;

        let mut io = BridgeIo {
            stdin,
            reader: BufReader::new(stdout),
            request_counter: 0,
        };
        if let Err(e) = io.wait_for_ready() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }

        Ok(Self {
            child: Mutex::new(child),
            io: Mutex::new(io),
            discarded: AtomicBool::new(false),
        })
    }

    fn is_discarded(&self) -> bool {
        self.discarded.load(Ordering::SeqCst)
    }

    /// Kill the process; any request blocked on its stdout sees EOF.
    fn discard(&self) {
        self.discarded.store(true, Ordering::SeqCst);
        match self.child.lock() {
            Ok(mut child) => {
                if let Err(e) = child.kill() {
                    warn!("failed to kill caption bridge: {e}");
                }
                let _ = child.wait();
            }
            Err(_) => warn!("caption bridge lock poisoned while discarding"),
        }
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        if self.is_discarded() {
            return;
        }
        if let Ok(io) = self.io.get_mut() {
            let _ = io.write_message(&RequestMessage::Shutdown);
        }
        if let Ok(child) = self.child.get_mut() {
            match child.wait() {
                Ok(status) => info!(?status, "caption bridge exited"),
                Err(e) => warn!("caption bridge wait error: {e}"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Captioners
// ---------------------------------------------------------------------------

/// [`ImageCaptioner`] backed by a long-lived bridge subprocess.
///
/// Requests are serialized. A request that outlives the timeout kills the
/// bridge, and every later request fails fast. The process is shut down
/// when the last clone of the bridge is dropped.
#[derive(Clone)]
pub struct CaptionBridge {
    handle: Arc<BridgeHandle>,
    timeout: Duration,
}

impl CaptionBridge {
    /// Spawn `cmd args...` and wait for its ready message.
    pub fn spawn(cmd: &str, args: &[String]) -> Result<Self> {
        let handle = BridgeHandle::spawn(cmd, args)?;
        Ok(Self {
            handle: Arc::new(handle),
            timeout: DEFAULT_CAPTION_TIMEOUT,
        })
    }

    /// Upper bound on a single caption request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ImageCaptioner for CaptionBridge {
    async fn caption(&self, image: Vec<u8>) -> Result<Vec<String>> {
        if self.handle.is_discarded() {
            return Err(ThreadCrawlError::Enrichment(
                "caption bridge was discarded after a timeout".into(),
            ));
        }

        let handle = Arc::clone(&self.handle);
        let request = tokio::task::spawn_blocking(move || {
            let mut io = handle
                .io
                .lock()
                .map_err(|_| ThreadCrawlError::Enrichment("caption bridge lock poisoned".into()))?;
            io.caption(&image)
        });

        match tokio::time::timeout(self.timeout, request).await {
            Ok(joined) => joined
                .map_err(|e| ThreadCrawlError::Enrichment(format!("caption task failed: {e}")))?,
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "caption bridge timed out, discarding it"
                );
                self.handle.discard();
                Err(ThreadCrawlError::Enrichment(format!(
                    "caption timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }
}

/// Captioner used when no bridge is configured; every request fails.
pub struct DisabledCaptioner;

#[async_trait]
impl ImageCaptioner for DisabledCaptioner {
    async fn caption(&self, _image: Vec<u8>) -> Result<Vec<String>> {
        Err(ThreadCrawlError::Enrichment(
            "image captioning is not configured".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caption_request_serializes() {
        let msg = RequestMessage::Caption {
            id: "req-1".into(),
            image_base64: STANDARD.encode(b"png"),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"caption","id":"req-1","image_base64":"cG5n"}"#
        );
    }

    #[test]
    fn shutdown_serializes() {
        let json = serde_json::to_string(&RequestMessage::Shutdown).unwrap();
        assert_eq!(json, r#"{"type":"shutdown"}"#);
    }

    #[test]
    fn responses_deserialize() {
        let msg: ResponseMessage =
            serde_json::from_str(r#"{"type":"result","id":"req-3","lines":["a","b"]}"#).unwrap();
        match msg {
            ResponseMessage::Result { id, lines } => {
                assert_eq!(id, "req-3");
                assert_eq!(lines, vec!["a", "b"]);
            }
            other => panic!("expected Result, got {other:?}"),
        }

        let msg: ResponseMessage =
            serde_json::from_str(r#"{"type":"error","id":"req-4","error":"bad image"}"#).unwrap();
        assert!(matches!(msg, ResponseMessage::Error { error, .. } if error == "bad image"));
    }

    #[tokio::test]
    async fn disabled_captioner_always_fails() {
        let err = DisabledCaptioner.caption(vec![1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, ThreadCrawlError::Enrichment(_)));
    }

    #[test]
    fn missing_command_fails_to_spawn() {
        let err = CaptionBridge::spawn("threadcrawl-no-such-bridge", &[])
            .err()
            .unwrap();
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_bridge_round_trip() {
        let script = r#"
echo '{"type":"ready"}'
while read -r line; do
  case "$line" in
    *shutdown*) exit 0 ;;
    *) id=$(printf '%s' "$line" | sed 's/.*"id":"\([^"]*\)".*/\1/')
       printf '{"type":"result","id":"%s","lines":["a cat","on a mat"]}\n' "$id" ;;
  esac
done
"#;
        let bridge =
            CaptionBridge::spawn("sh", &["-c".to_string(), script.to_string()]).unwrap();

        let first = bridge.caption(b"image one".to_vec()).await.unwrap();
        let second = bridge.caption(b"image two".to_vec()).await.unwrap();

        assert_eq!(first, vec!["a cat", "on a mat"]);
        assert_eq!(second, first);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_bridge_times_out_and_is_discarded() {
        let script = r#"
echo '{"type":"ready"}'
while read -r line; do :; done
"#;
        let bridge = CaptionBridge::spawn("sh", &["-c".to_string(), script.to_string()])
            .unwrap()
            .with_timeout(Duration::from_millis(200));

        let err = bridge.caption(b"image".to_vec()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));

        let err = bridge.caption(b"image".to_vec()).await.unwrap_err();
        assert!(err.to_string().contains("discarded"));
    }
}
