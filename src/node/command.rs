//! Child command execution with output forwarded to a chain log

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::logs::LogSink;

/// Exit status plus whatever the command printed
#[derive(Debug)]
pub(crate) struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Short description for error messages
    pub fn describe_failure(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("exited with {}", self.status)
        } else {
            format!("exited with {}: {}", self.status, stderr)
        }
    }
}

/// Run `cmd` to completion, streaming each output line into `log`
pub(crate) async fn run_logged(mut cmd: Command, log: &Arc<LogSink>) -> std::io::Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (stdout, stderr, status) = tokio::join!(
        forward_lines(stdout, log.clone(), true),
        forward_lines(stderr, log.clone(), true),
        child.wait(),
    );

    Ok(CommandOutput {
        status: status?,
        stdout,
        stderr,
    })
}

/// Copy lines from `reader` into `log` until EOF
///
/// Returns the captured text when `capture` is set.
pub(crate) async fn forward_lines<R>(reader: Option<R>, log: Arc<LogSink>, capture: bool) -> String
where
    R: AsyncRead + Unpin,
{
    let mut captured = String::new();
    let Some(reader) = reader else {
        return captured;
    };

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                log.line(line);
                if capture {
                    captured.push_str(line);
                    captured.push('\n');
                }
            }
        }
    }
    captured
}
