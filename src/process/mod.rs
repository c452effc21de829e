//! Supervised subprocess handles
//!
//! Every external process the supervisor owns (display server, guest
//! application, capture encoder) is wrapped in a [`ManagedProcess`]: an
//! owned resource exposing spawn, terminate and wait, with combined
//! stdout/stderr captured into a bounded ring buffer.

use std::collections::{HashMap, VecDeque};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::RwLock;

use crate::error::{AppError, Result};

/// Maximum number of captured output lines kept per process
const LOG_BUFFER_SIZE: usize = 200;

/// A spawned subprocess owned by the supervisor.
///
/// The child is killed on drop as a last resort; orderly teardown goes
/// through [`ManagedProcess::terminate`], which escalates from SIGTERM to
/// SIGKILL after a bounded wait.
#[derive(Debug)]
pub struct ManagedProcess {
    name: String,
    child: Child,
    logs: Arc<RwLock<VecDeque<String>>>,
}

impl ManagedProcess {
    /// Spawn a process with captured output.
    ///
    /// When `env` is `Some`, the child's environment is cleared and
    /// replaced with exactly the given mapping; otherwise the parent
    /// environment is inherited.
    pub fn spawn(
        name: &str,
        program: &str,
        args: &[String],
        env: Option<&HashMap<String, String>>,
    ) -> Result<Self> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(env) = env {
            command.env_clear().envs(env);
        }

        let mut child = command.spawn().map_err(|e| AppError::ProcessLaunch {
            process: name.to_string(),
            reason: e.to_string(),
        })?;

        let logs = Arc::new(RwLock::new(VecDeque::with_capacity(LOG_BUFFER_SIZE)));

        // Collect stdout and stderr into the same ring buffer
        if let Some(stdout) = child.stdout.take() {
            let logs = logs.clone();
            let name = name.to_string();
            tokio::spawn(async move {
                collect_output(&name, stdout, logs).await;
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let logs = logs.clone();
            let name = name.to_string();
            tokio::spawn(async move {
                collect_output(&name, stderr, logs).await;
            });
        }

        tracing::info!(
            "Started {}: {} {} (pid {:?})",
            name,
            program,
            args.join(" "),
            child.id()
        );

        Ok(Self {
            name: name.to_string(),
            child,
            logs,
        })
    }

    /// Process name used in logs and error messages
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process id, `None` once the child has been reaped
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Non-blocking exit check
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Wait for the process to exit on its own
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Terminate the process: SIGTERM, bounded wait, SIGKILL escalation.
    ///
    /// Returns `Ok` if the process exited (or had already exited — an
    /// exited child is never re-signalled). Returns the soft
    /// [`AppError::ProcessTermination`] after escalation; the child is
    /// guaranteed to be gone either way.
    pub async fn terminate(&mut self, timeout: Duration) -> Result<()> {
        if self.try_wait()?.is_some() {
            tracing::debug!("{} already exited, nothing to terminate", self.name);
            return Ok(());
        }

        if let Some(pid) = self.child.id() {
            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                tracing::info!("{} exited: {}", self.name, status);
                Ok(())
            }
            Err(_) => {
                tracing::warn!("{} ignored SIGTERM for {:?}, killing", self.name, timeout);
                self.child.kill().await?;
                Err(AppError::ProcessTermination {
                    process: self.name.clone(),
                    timeout,
                })
            }
        }
    }

    /// Most recent captured output lines
    pub async fn logs(&self, lines: usize) -> Vec<String> {
        let logs = self.logs.read().await;
        let start = logs.len().saturating_sub(lines);
        logs.range(start..).cloned().collect()
    }
}

/// Read a child output stream line by line into the shared ring buffer
async fn collect_output<R: tokio::io::AsyncRead + Unpin>(
    name: &str,
    reader: R,
    logs: Arc<RwLock<VecDeque<String>>>,
) {
    let reader = BufReader::new(reader);
    let mut lines = reader.lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::debug!("[{}] {}", name, line);
                let mut logs = logs.write().await;
                if logs.len() >= LOG_BUFFER_SIZE {
                    logs.pop_front();
                }
                logs.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("[{}] Error reading output: {}", name, e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let err = ManagedProcess::spawn("ghost", "/nonexistent/binary", &[], None).unwrap_err();
        assert!(matches!(err, AppError::ProcessLaunch { .. }));
    }

    #[tokio::test]
    async fn test_wait_collects_exit_status() {
        let mut proc =
            ManagedProcess::spawn("true", "/bin/sh", &args(&["-c", "exit 0"]), None).unwrap();
        let status = proc.wait().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_terminate_graceful() {
        let mut proc =
            ManagedProcess::spawn("sleeper", "/bin/sh", &args(&["-c", "sleep 30"]), None).unwrap();
        proc.terminate(Duration::from_secs(5)).await.unwrap();
        assert!(proc.try_wait().unwrap().is_some() || proc.id().is_none());
    }

    #[tokio::test]
    async fn test_terminate_escalates_to_kill() {
        // Child ignores SIGTERM, so termination must escalate
        let mut proc = ManagedProcess::spawn(
            "stubborn",
            "/bin/sh",
            &args(&["-c", "trap '' TERM; sleep 30 & wait"]),
            None,
        )
        .unwrap();
        // Give the shell a moment to install the trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let err = proc.terminate(Duration::from_millis(300)).await.unwrap_err();
        assert!(matches!(err, AppError::ProcessTermination { .. }));
        assert!(proc.id().is_none());
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let mut proc =
            ManagedProcess::spawn("quick", "/bin/sh", &args(&["-c", "exit 0"]), None).unwrap();
        proc.wait().await.unwrap();
        // Already exited: no re-kill, no error
        proc.terminate(Duration::from_millis(100)).await.unwrap();
        proc.terminate(Duration::from_millis(100)).await.unwrap();
    }

    #[tokio::test]
    async fn test_output_capture() {
        let mut proc = ManagedProcess::spawn(
            "echoer",
            "/bin/sh",
            &args(&["-c", "echo out-line; echo err-line >&2"]),
            None,
        )
        .unwrap();
        proc.wait().await.unwrap();
        // Give the collectors a moment to drain the pipes
        tokio::time::sleep(Duration::from_millis(200)).await;

        let logs = proc.logs(10).await;
        assert!(logs.iter().any(|l| l == "out-line"));
        assert!(logs.iter().any(|l| l == "err-line"));
    }

    #[tokio::test]
    async fn test_scrubbed_environment() {
        let mut env = HashMap::new();
        env.insert("DISPLAY".to_string(), ":42".to_string());

        let mut proc = ManagedProcess::spawn(
            "env-check",
            "/bin/sh",
            &args(&["-c", "echo D=$DISPLAY H=$HOME"]),
            Some(&env),
        )
        .unwrap();
        proc.wait().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let logs = proc.logs(10).await;
        assert!(logs.iter().any(|l| l == "D=:42 H="));
    }
}
