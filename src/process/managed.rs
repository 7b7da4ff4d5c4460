//! Spawning and signalling external service processes.

use super::readiness::{LineStream, drain_in_background, lines_of};
use super::safety_net;
use crate::errors::HarnessError;
use futures::stream;
use localnet_common::{CommandSpec, ServerConfig, ServiceKind};
use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::timeout;

/// Signals the orchestrator sends to its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
    Kill,
}

impl Signal {
    fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Interrupt => libc::SIGINT,
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// Render an exit status for error messages.
pub fn describe_status(status: Option<ExitStatus>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "exit status unknown".to_string(),
    }
}

fn command_line(spec: &CommandSpec, args: &[String]) -> String {
    let mut line = spec.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// A running child process owned by exactly one lifecycle scope.
///
/// stdout and stderr are piped and merged into one line stream, which the
/// owner either hands to a readiness watcher or forwards to the log.
pub struct ManagedProcess {
    service: ServiceKind,
    command_line: String,
    endpoint: Option<ServerConfig>,
    pid: u32,
    child: Child,
    output: Option<LineStream>,
}

impl ManagedProcess {
    /// Launch `spec` followed by `args`. `endpoint` is the address the
    /// service is expected to listen on, if any.
    pub fn spawn(
        service: ServiceKind,
        spec: &CommandSpec,
        args: &[String],
        endpoint: Option<ServerConfig>,
    ) -> Result<Self, HarnessError> {
        let command_line = command_line(spec, args);
        tracing::info!(%service, command = %command_line, "spawning");

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HarnessError::ProcessSpawn {
                service,
                program: spec.program.clone(),
                source,
            })?;

        let pid = child.id().ok_or_else(|| HarnessError::ProcessExitedEarly {
            service,
            status: "exited before its pid could be read".to_string(),
        })?;
        safety_net::install();
        safety_net::register(pid);

        let stdout = child.stdout.take().map(lines_of);
        let stderr = child.stderr.take().map(lines_of);
        let output: Option<LineStream> = match (stdout, stderr) {
            (Some(out), Some(err)) => Some(Box::pin(stream::select(out, err))),
            (Some(only), None) | (None, Some(only)) => Some(only),
            (None, None) => None,
        };

        tracing::debug!(%service, pid, "spawned");
        Ok(Self {
            service,
            command_line,
            endpoint,
            pid,
            child,
            output,
        })
    }

    pub fn service(&self) -> ServiceKind {
        self.service
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn endpoint(&self) -> Option<&ServerConfig> {
        self.endpoint.as_ref()
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Hand the merged output stream to the caller. `None` once taken.
    pub fn take_output(&mut self) -> Option<LineStream> {
        self.output.take()
    }

    /// Log the remaining output in the background so the child never blocks
    /// on a full pipe.
    pub fn forward_output(&mut self) {
        if let Some(lines) = self.output.take() {
            drain_in_background(self.service, lines);
        }
    }

    /// Deliver `signal`. Does not wait for the process to exit.
    pub fn terminate(&self, signal: Signal) -> std::io::Result<()> {
        tracing::debug!(service = %self.service, pid = self.pid, ?signal, "signalling");
        // SAFETY: kill(2) has no memory-safety preconditions; the pid is our
        // own unreaped child, so it cannot have been recycled.
        let rc = unsafe { libc::kill(self.pid as libc::pid_t, signal.as_raw()) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    /// Non-blocking check for an exit status.
    pub fn try_exit_status(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Wait up to `grace` for the process to exit on its own.
    pub async fn wait_for_exit(&mut self, grace: Duration) -> Option<ExitStatus> {
        match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(err)) => {
                tracing::warn!(service = %self.service, error = %err, "failed to wait for child");
                None
            }
            Err(_) => None,
        }
    }

    /// Collect the exit status, escalating to SIGKILL if the process is
    /// still running after `grace`.
    pub async fn reap(&mut self, grace: Duration) -> Option<ExitStatus> {
        if let Some(status) = self.wait_for_exit(grace).await {
            return Some(status);
        }
        tracing::warn!(
            service = %self.service,
            pid = self.pid,
            "still running after {:?}, killing",
            grace
        );
        if let Err(err) = self.child.start_kill() {
            tracing::warn!(service = %self.service, error = %err, "SIGKILL failed");
        }
        self.child.wait().await.ok()
    }
}

impl std::fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("service", &self.service)
            .field("pid", &self.pid)
            .field("command_line", &self.command_line)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        safety_net::unregister(self.pid);
    }
}

/// Run a short-lived helper command to completion, failing on a non-zero
/// exit.
pub async fn run_to_completion(
    service: ServiceKind,
    spec: &CommandSpec,
    args: &[String],
) -> Result<Output, HarnessError> {
    let command = command_line(spec, args);
    tracing::debug!(%service, %command, "running helper");

    let output = Command::new(&spec.program)
        .args(&spec.args)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| HarnessError::ProcessSpawn {
            service,
            program: spec.program.clone(),
            source,
        })?;

    if output.status.success() {
        Ok(output)
    } else {
        Err(HarnessError::CommandFailed {
            service,
            command,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::os::unix::process::ExitStatusExt;

    fn sh(script: &str) -> (CommandSpec, Vec<String>) {
        (
            CommandSpec::new("sh"),
            vec!["-c".to_string(), script.to_string()],
        )
    }

    #[tokio::test]
    async fn spawn_missing_binary_is_a_spawn_error() {
        let spec = CommandSpec::new("/nonexistent/localnet-test-binary");
        let err = ManagedProcess::spawn(ServiceKind::Indexer, &spec, &[], None).unwrap_err();
        match err {
            HarnessError::ProcessSpawn {
                service, program, ..
            } => {
                assert_eq!(service, ServiceKind::Indexer);
                assert_eq!(program, "/nonexistent/localnet-test-binary");
            }
            other => panic!("Expected ProcessSpawn, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn interrupt_stops_a_running_process() {
        let (spec, args) = sh("exec sleep 30");
        let mut process = ManagedProcess::spawn(ServiceKind::QueryNode, &spec, &args, None).unwrap();
        assert!(safety_net::is_registered(process.pid()));
        assert!(process.try_exit_status().is_none());

        process.terminate(Signal::Interrupt).unwrap();
        let status = process.reap(Duration::from_secs(5)).await.unwrap();
        assert_eq!(status.signal(), Some(libc::SIGINT));
    }

    #[tokio::test]
    async fn reap_escalates_when_signal_is_ignored() {
        let (spec, args) = sh("trap '' INT; echo armed; while true; do sleep 1; done");
        let mut process = ManagedProcess::spawn(ServiceKind::AppServer, &spec, &args, None).unwrap();
        // Wait for the trap to be installed before interrupting.
        let mut lines = process.take_output().unwrap();
        assert_eq!(lines.next().await.unwrap().unwrap(), "armed");

        process.terminate(Signal::Interrupt).unwrap();
        let status = process.reap(Duration::from_millis(300)).await.unwrap();
        assert_eq!(status.signal(), Some(libc::SIGKILL));
    }

    #[tokio::test]
    async fn drop_unregisters_from_safety_net() {
        let (spec, args) = sh("exec sleep 30");
        let process = ManagedProcess::spawn(ServiceKind::Database, &spec, &args, None).unwrap();
        let pid = process.pid();
        assert!(safety_net::is_registered(pid));
        drop(process);
        assert!(!safety_net::is_registered(pid));
    }

    #[tokio::test]
    async fn command_line_includes_leading_args() {
        let spec = CommandSpec::with_args("sh", ["-c"]);
        let args = vec!["exit 0".to_string()];
        let mut process = ManagedProcess::spawn(ServiceKind::Emulator, &spec, &args, None).unwrap();
        assert_eq!(process.command_line(), "sh -c exit 0");
        let status = process.reap(Duration::from_secs(5)).await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn run_to_completion_reports_failures_with_stderr() {
        let (spec, args) = sh("echo 'role exists' >&2; exit 3");
        let err = run_to_completion(ServiceKind::Database, &spec, &args)
            .await
            .unwrap_err();
        match err {
            HarnessError::CommandFailed { status, stderr, .. } => {
                assert!(status.contains('3'));
                assert_eq!(stderr, "role exists");
            }
            other => panic!("Expected CommandFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_to_completion_returns_stdout() {
        let (spec, args) = sh("echo ok");
        let output = run_to_completion(ServiceKind::Database, &spec, &args)
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "ok");
    }
}
