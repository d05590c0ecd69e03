//! Child-process lifecycle for a spawned engine binary: spawn, drain
//! stdout/stderr, graceful-then-forceful stop.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const FORCEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// A spawned engine subprocess plus its background stdout/stderr drains.
pub struct EngineProcess {
    child: Child,
    pid: Option<u32>,
    stdout_drain: Option<JoinHandle<()>>,
    stderr_drain: Option<JoinHandle<()>>,
}

impl EngineProcess {
    pub fn spawn(binary: &str, args: &[String]) -> Result<Self> {
        let mut cmd = Command::new(binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Internal(format!("failed to spawn {binary}: {e}")))?;
        let pid = child.id();

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_drain = stdout.map(|s| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(s).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::info!(target: "engine::stdout", "{line}");
                }
            })
        });
        let stderr_drain = stderr.map(|s| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(s).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(target: "engine::stderr", "{line}");
                }
            })
        });

        tracing::info!(pid, binary, "spawned engine process");

        Ok(Self {
            child,
            pid,
            stdout_drain,
            stderr_drain,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// True if the process has exited (non-blocking check).
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Waits for the process to exit, for the crash-detection watcher.
    pub async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }

    /// Idempotent graceful-then-forceful stop, per spec: SIGTERM and wait up
    /// to 10s, then SIGKILL and wait up to 5s, then join the drain tasks.
    pub async fn stop(mut self) {
        if self.has_exited() {
            self.join_drains().await;
            return;
        }

        #[cfg(unix)]
        if let Some(pid) = self.pid {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }

        match tokio::time::timeout(GRACEFUL_STOP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(?status, "engine process exited gracefully");
                self.join_drains().await;
                return;
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "error waiting for engine process"),
            Err(_) => tracing::warn!("engine process did not exit within graceful timeout, killing"),
        }

        let _ = self.child.start_kill();
        match tokio::time::timeout(FORCEFUL_STOP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(?status, "engine process killed"),
            Ok(Err(e)) => tracing::warn!(error = %e, "error waiting for engine process after kill"),
            Err(_) => tracing::error!("engine process did not exit even after kill"),
        }

        self.join_drains().await;
    }

    async fn join_drains(&mut self) {
        if let Some(h) = self.stdout_drain.take() {
            let _ = h.await;
        }
        if let Some(h) = self.stderr_drain.take() {
            let _ = h.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_and_stop_short_lived_process() {
        let process = EngineProcess::spawn("/bin/sh", &["-c".to_string(), "sleep 5".to_string()]).unwrap();
        assert!(process.pid().is_some());
        process.stop().await;
    }

    #[tokio::test]
    async fn stop_is_a_no_op_on_already_exited_process() {
        let mut process = EngineProcess::spawn("/bin/sh", &["-c".to_string(), "exit 0".to_string()]).unwrap();
        let _ = process.wait().await;
        process.stop().await;
    }

    #[tokio::test]
    async fn spawn_failure_on_missing_binary_is_an_error() {
        let result = EngineProcess::spawn("/no/such/binary-xyz", &[]);
        assert!(result.is_err());
    }
}
