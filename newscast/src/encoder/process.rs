//! Child process lifecycle for encoder runs.

use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;

use process_utils::{Termination, terminate_with_grace, tokio_command};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::invocation::EncoderInvocation;
use super::traits::EncoderOutcome;

/// How long to wait for the stderr reader after the process exits.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Process handling knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessSettings {
    /// Time between the terminate request and a forced kill.
    pub kill_grace: Duration,
    /// Maximum number of stderr lines retained.
    pub stderr_tail_lines: usize,
    /// Maximum number of stderr bytes retained.
    pub stderr_tail_bytes: usize,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            kill_grace: Duration::from_secs(5),
            stderr_tail_lines: 64,
            stderr_tail_bytes: 4096,
        }
    }
}

/// Bounded tail of a process's diagnostic output.
#[derive(Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
    bytes: usize,
    max_lines: usize,
    max_bytes: usize,
}

impl StderrTail {
    fn new(max_lines: usize, max_bytes: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            bytes: 0,
            max_lines: max_lines.max(1),
            max_bytes: max_bytes.max(1),
        }
    }

    fn push(&mut self, line: String) {
        let line = if line.len() > self.max_bytes {
            let mut cut = self.max_bytes;
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            line[..cut].to_string()
        } else {
            line
        };
        self.bytes += line.len();
        self.lines.push_back(line);
        while self.lines.len() > self.max_lines || self.bytes > self.max_bytes {
            match self.lines.pop_front() {
                Some(old) => self.bytes -= old.len(),
                None => break,
            }
        }
    }

    fn into_string(self) -> String {
        Vec::from(self.lines).join("\n")
    }
}

fn spawn_stderr_reader<R>(stream: R, settings: &ProcessSettings) -> JoinHandle<StderrTail>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut tail = StderrTail::new(settings.stderr_tail_lines, settings.stderr_tail_bytes);
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    // Encoders print raw bytes from stream metadata.
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    trace!(target: "newscast::encoder::stderr", "{}", line);
                    tail.push(line.to_string());
                }
                Err(e) => {
                    debug!("Error reading encoder stderr: {}", e);
                    break;
                }
            }
        }
        tail
    })
}

async fn collect_tail(reader: Option<JoinHandle<StderrTail>>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut reader).await {
        Ok(Ok(tail)) => tail.into_string(),
        Ok(Err(e)) => {
            debug!("Stderr reader task failed: {}", e);
            String::new()
        }
        Err(_) => {
            // A grandchild may still hold the pipe open.
            reader.abort();
            String::new()
        }
    }
}

/// Launch `invocation` and wait for it to finish or for `cancel` to fire.
///
/// On cancellation the process is asked to terminate and, after
/// `settings.kill_grace`, killed. The process is always reaped before this
/// returns.
pub async fn run_to_completion(
    invocation: &EncoderInvocation,
    cancel: &CancellationToken,
    settings: &ProcessSettings,
) -> EncoderOutcome {
    if cancel.is_cancelled() {
        return EncoderOutcome::Cancelled;
    }

    debug!(
        program = invocation.program(),
        args = ?invocation.redacted_args(),
        "Launching encoder"
    );

    let mut child = match tokio_command(invocation.program())
        .args(invocation.args())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            warn!("Failed to launch {}: {}", invocation.program(), e);
            return EncoderOutcome::failed(
                None,
                format!("failed to launch {}: {}", invocation.program(), e),
            );
        }
    };

    let reader = child
        .stderr
        .take()
        .map(|stderr| spawn_stderr_reader(stderr, settings));

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            match terminate_with_grace(&mut child, settings.kill_grace).await {
                Ok(Termination::Exited(status)) => {
                    debug!("Encoder stopped on request ({})", status);
                }
                Ok(Termination::Killed) => {
                    warn!(
                        "Encoder ignored terminate for {:?}, killed",
                        settings.kill_grace
                    );
                }
                Err(e) => warn!("Error while stopping encoder: {}", e),
            }
            let _ = collect_tail(reader).await;
            EncoderOutcome::Cancelled
        }
        status = child.wait() => {
            let tail = collect_tail(reader).await;
            match status {
                Ok(status) if status.success() => EncoderOutcome::Success,
                Ok(status) => {
                    debug!("Encoder exited with {}", status);
                    EncoderOutcome::failed(status.code(), tail)
                }
                Err(e) => {
                    warn!("Error waiting for encoder: {}", e);
                    let _ = child.kill().await;
                    EncoderOutcome::failed(None, format!("{tail}\nwait failed: {e}"))
                }
            }
        }
    }
}
