//! Supervised synthesis subprocess.
//!
//! [`run_script`] spawns the synthesis program, pipes the JSON payload to
//! stdin, streams stdout line by line to the caller, and captures stderr
//! for error reporting. The child is killed when cancelled (it is spawned
//! with `kill_on_drop(true)` and dropped).

use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Maximum stderr captured for error messages (64 KiB).
const MAX_STDERR_BYTES: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Failed to start synthesis program: {0}")]
    Spawn(std::io::Error),

    #[error("Synthesis program I/O error: {0}")]
    Io(std::io::Error),

    #[error("Synthesis program exited with {status}: {stderr}")]
    Exit { status: ExitStatus, stderr: String },

    #[error("Synthesis cancelled")]
    Cancelled,
}

/// A line the script wrote to stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptLine {
    /// `progress <value> <max>`
    Progress { value: u32, max: u32 },
    Log(String),
}

impl ScriptLine {
    pub fn parse(line: &str) -> Self {
        let mut parts = line.split_whitespace();
        if parts.next() == Some("progress") {
            let value = parts.next().and_then(|v| v.parse().ok());
            let max = parts.next().and_then(|v| v.parse().ok());
            if let (Some(value), Some(max), None) = (value, max, parts.next()) {
                return ScriptLine::Progress { value, max };
            }
        }
        ScriptLine::Log(line.to_string())
    }
}

/// Spawn `cmd`, feed it `payload` and wait for it to exit.
///
/// Every stdout line is handed to `on_line` as it arrives. Returns the
/// wall-clock duration in milliseconds on a zero exit status.
pub async fn run_script<F>(
    cmd: &mut Command,
    payload: &Value,
    cancel: &CancellationToken,
    mut on_line: F,
) -> Result<u64, ScriptError>
where
    F: FnMut(ScriptLine) + Send,
{
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(ScriptError::Spawn)?;

    if let Some(mut stdin) = child.stdin.take() {
        let json_bytes = serde_json::to_vec(payload).unwrap_or_default();
        // The script may close stdin early; it reports its own errors.
        let _ = stdin.write_all(&json_bytes).await;
        drop(stdin);
    }

    let stderr_task = tokio::spawn(read_capped(child.stderr.take()));
    let stdout = child.stdout.take();

    let run = async {
        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await.map_err(ScriptError::Io)? {
                let line = line.trim();
                if !line.is_empty() {
                    on_line(ScriptLine::parse(line));
                }
            }
        }
        child.wait().await.map_err(ScriptError::Io)
    };

    let status = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ScriptError::Cancelled),
        status = run => status,
    }?;

    let stderr_bytes = stderr_task.await.unwrap_or_default();
    if status.success() {
        Ok(start.elapsed().as_millis() as u64)
    } else {
        Err(ScriptError::Exit {
            status,
            stderr: String::from_utf8_lossy(&stderr_bytes).trim().to_string(),
        })
    }
}

/// Read a stream to the end, keeping at most [`MAX_STDERR_BYTES`].
async fn read_capped<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_STDERR_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parses_progress_lines() {
        assert_eq!(
            ScriptLine::parse("progress 3 10"),
            ScriptLine::Progress { value: 3, max: 10 }
        );
        assert_matches!(ScriptLine::parse("progress three 10"), ScriptLine::Log(_));
        assert_matches!(ScriptLine::parse("progress 1 2 3"), ScriptLine::Log(_));
        assert_eq!(
            ScriptLine::parse("loading model"),
            ScriptLine::Log("loading model".into())
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streams_lines_and_reports_success() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("cat > /dev/null; echo 'progress 1 2'; echo 'progress 2 2'");
        let mut lines = Vec::new();
        let cancel = CancellationToken::new();

        run_script(&mut cmd, &serde_json::json!({"text": "hi"}), &cancel, |l| {
            lines.push(l)
        })
        .await
        .unwrap();

        assert_eq!(
            lines,
            vec![
                ScriptLine::Progress { value: 1, max: 2 },
                ScriptLine::Progress { value: 2, max: 2 },
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_carries_stderr() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo 'model missing' >&2; exit 3");
        let cancel = CancellationToken::new();

        let err = run_script(&mut cmd, &Value::Null, &cancel, |_| {})
            .await
            .unwrap_err();
        assert_matches!(err, ScriptError::Exit { ref stderr, .. } if stderr == "model missing");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_stops_the_child() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 30");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = run_script(&mut cmd, &Value::Null, &cancel, |_| {})
            .await
            .unwrap_err();
        assert_matches!(err, ScriptError::Cancelled);
    }
}
