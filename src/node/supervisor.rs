//! Process supervision
//!
//! State machine per node: `NotStarted -> Running -> Stopped`. Stopping sends
//! SIGINT, waits out a grace window and escalates to a kill.

use serde::Serialize;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::command::forward_lines;
use super::{Node, NodeError};

/// Time a node gets to exit after the interrupt signal
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Liveness as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    NotRunning,
    Running,
    Unknown,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::NotRunning => write!(f, "Not running"),
            NodeStatus::Running => write!(f, "Running"),
            NodeStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Handle of a spawned daemon
pub struct RunningProcess {
    child: Child,
    pub pid: u32,
    pub started_at: Instant,
}

impl std::fmt::Debug for RunningProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningProcess")
            .field("pid", &self.pid)
            .field("uptime", &self.started_at.elapsed())
            .finish()
    }
}

#[derive(Debug)]
pub enum ProcessState {
    NotStarted,
    Running(RunningProcess),
    Stopped,
}

impl ProcessState {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running(_))
    }

    pub fn pid(&self) -> Option<u32> {
        match self {
            ProcessState::Running(running) => Some(running.pid),
            _ => None,
        }
    }
}

impl Node {
    /// Spawn `<binary> start --home <home>`
    ///
    /// Returns as soon as the process is spawned; its output keeps flowing into
    /// the chain log for as long as it runs.
    pub fn start(&mut self) -> Result<(), NodeError> {
        if self.process.is_running() {
            return Err(NodeError::State(format!(
                "node {} is already running",
                self.chain_name()
            )));
        }

        let mut cmd = Command::new(&self.paths.binary);
        cmd.arg("start")
            .arg("--home")
            .arg(&self.paths.home)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            NodeError::Process(format!(
                "failed to spawn {}: {}",
                self.paths.binary.display(),
                e
            ))
        })?;

        let pid = child
            .id()
            .ok_or_else(|| NodeError::Process("process exited before its pid was read".into()))?;

        tokio::spawn(forward_lines(child.stdout.take(), self.log.clone(), false));
        tokio::spawn(forward_lines(child.stderr.take(), self.log.clone(), false));

        self.process = ProcessState::Running(RunningProcess {
            child,
            pid,
            started_at: Instant::now(),
        });
        self.note(format!("Node started with PID: {}", pid));
        Ok(())
    }

    /// Interrupt the process, then kill it if it outlives `grace`
    ///
    /// A node that was never started, or already stopped, is left untouched.
    pub async fn stop(&mut self, grace: Duration) -> Result<(), NodeError> {
        if !self.process.is_running() {
            return Ok(());
        }
        let ProcessState::Running(mut running) =
            std::mem::replace(&mut self.process, ProcessState::Stopped)
        else {
            return Ok(());
        };

        self.note(format!("Sending interrupt to PID {}", running.pid));
        if let Err(e) = send_interrupt(&mut running) {
            warn!(chain = %self.chain_name(), error = %e, "Failed to deliver interrupt");
            self.log.line(format!("Failed to deliver interrupt: {}", e));
        }

        match tokio::time::timeout(grace, running.child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                self.note("Node stopped gracefully");
                Ok(())
            }
            Ok(Ok(status)) => {
                self.note(format!("Node exited with {}", status));
                Err(NodeError::Process(format!("node exited with {}", status)))
            }
            Ok(Err(e)) => Err(NodeError::Process(format!("failed to wait for node: {}", e))),
            Err(_) => {
                self.note(format!(
                    "Node did not exit within {}s, killing",
                    grace.as_secs()
                ));
                if let Err(e) = running.child.kill().await {
                    warn!(chain = %self.chain_name(), error = %e, "Kill failed");
                }
                Err(NodeError::Process(format!(
                    "did not exit within {}s, killed after timeout",
                    grace.as_secs()
                )))
            }
        }
    }

    /// Probe whether the process is still alive
    ///
    /// Exited children are reaped here, so a dead node moves to `Stopped`.
    pub fn status(&mut self) -> NodeStatus {
        let ProcessState::Running(running) = &mut self.process else {
            return NodeStatus::NotRunning;
        };

        match running.child.try_wait() {
            Ok(Some(status)) => {
                debug!(chain = %self.descriptor.chain_name, %status, "Node process exited");
                self.process = ProcessState::Stopped;
                NodeStatus::NotRunning
            }
            Ok(None) => probe_pid(running.pid),
            Err(e) => {
                warn!(chain = %self.descriptor.chain_name, error = %e, "Failed to query process");
                NodeStatus::Unknown
            }
        }
    }
}

#[cfg(unix)]
fn send_interrupt(running: &mut RunningProcess) -> std::io::Result<()> {
    let pid = libc::pid_t::try_from(running.pid)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    // SAFETY: plain syscall on a pid we spawned and have not reaped yet
    let rc = unsafe { libc::kill(pid, libc::SIGINT) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_interrupt(running: &mut RunningProcess) -> std::io::Result<()> {
    running.child.start_kill()
}

#[cfg(unix)]
fn probe_pid(pid: u32) -> NodeStatus {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return NodeStatus::Unknown;
    };
    // SAFETY: signal 0 performs only the existence and permission check
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        NodeStatus::Running
    } else {
        NodeStatus::NotRunning
    }
}

#[cfg(not(unix))]
fn probe_pid(_pid: u32) -> NodeStatus {
    // try_wait already saw the child alive
    NodeStatus::Running
}
