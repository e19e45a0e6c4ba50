//! Launching a viewer subprocess and waiting for it to listen.

use std::{
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Duration,
};

use command_group::{AsyncCommandGroup, AsyncGroupChild};
use tokio::{
    net::TcpStream,
    process::Command,
    time::{Instant, sleep, timeout},
};

use crate::{SpawnError, StartupError};

/// Flag asking a viewer to enable its remote server.
pub const SERVER_FLAG: &str = "--server";

/// Shortest single connect attempt while waiting for a viewer.
const MIN_CONNECT_ATTEMPT: Duration = Duration::from_millis(10);

/// Viewer command line: program plus arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchCommand {
    /// Build the command line for a viewer: the shell-split `base`, the
    /// caller's `args` verbatim, then [`SERVER_FLAG`] unless already present.
    ///
    /// # Errors
    /// Returns error if `base` cannot be split or the result is empty.
    pub fn build<I>(base: &str, args: I) -> Result<Self, SpawnError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut parts = split_command_line(base)?;
        parts.extend(args.into_iter().map(Into::into));
        if parts.is_empty() {
            return Err(SpawnError::EmptyCommand);
        }
        if !parts.iter().skip(1).any(|arg| arg == SERVER_FLAG) {
            parts.push(SERVER_FLAG.to_string());
        }
        let program = parts.remove(0);
        Ok(Self {
            program,
            args: parts,
        })
    }

    /// Resolve the program to an executable path.
    ///
    /// # Errors
    /// Returns `ExecutableNotFound` if the program is not a file and not on PATH.
    pub async fn resolve(&self) -> Result<PathBuf, SpawnError> {
        resolve_executable(&self.program)
            .await
            .ok_or_else(|| SpawnError::ExecutableNotFound(self.program.clone()))
    }
}

fn split_command_line(input: &str) -> Result<Vec<String>, SpawnError> {
    #[cfg(windows)]
    {
        Ok(winsplit::split(input))
    }

    #[cfg(not(windows))]
    {
        shlex::split(input).ok_or_else(|| SpawnError::InvalidCommand(input.to_string()))
    }
}

/// Explicit paths are taken as-is, bare names are looked up on PATH.
async fn resolve_executable(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }
    let path = Path::new(executable);
    if path.components().count() > 1 || path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }
    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}

/// A viewer running in its own process group.
///
/// Dropping the handle kills the group while `kill_on_drop` is set.
pub struct ViewerProcess {
    child: AsyncGroupChild,
    kill_on_drop: bool,
}

impl ViewerProcess {
    /// Spawn `command` with stdin closed and output inherited.
    ///
    /// The process starts with `kill_on_drop` set so that an abandoned
    /// startup does not leak it.
    ///
    /// # Errors
    /// Returns error if the program cannot be resolved or spawned.
    pub async fn spawn(command: &LaunchCommand) -> Result<Self, SpawnError> {
        let executable = command.resolve().await?;
        tracing::info!(
            program = %executable.display(),
            args = ?command.args,
            "Launching viewer"
        );
        let child = Command::new(&executable)
            .args(&command.args)
            .stdin(Stdio::null())
            .group_spawn()?;
        Ok(Self {
            child,
            kill_on_drop: true,
        })
    }

    /// OS process id, while it runs.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Change whether dropping the handle kills the process group.
    pub const fn set_kill_on_drop(&mut self, kill: bool) {
        self.kill_on_drop = kill;
    }

    /// Poll `addr` until it accepts a connection.
    ///
    /// Fails early if the process exits, or after `startup_timeout`. Any
    /// listener on `addr` counts as ready; if the process is found to have
    /// exited right after the connect succeeds, the listener belongs to
    /// someone else and `Exited` is returned instead. A process that exits
    /// later than that goes unnoticed here.
    ///
    /// # Errors
    /// Returns `Exited` or `Timeout`. The process is left running either way.
    pub async fn wait_until_listening(
        &mut self,
        addr: &str,
        startup_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<TcpStream, StartupError> {
        let deadline = Instant::now() + startup_timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Err(StartupError::Exited(status));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let attempt = remaining.min(poll_interval).max(MIN_CONNECT_ATTEMPT);
            match timeout(attempt, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => return self.confirm_running(stream),
                Ok(Err(e)) => tracing::trace!(addr, "Viewer not listening yet: {e}"),
                Err(_) => tracing::trace!(addr, "Connect attempt timed out"),
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(StartupError::Timeout(startup_timeout));
            }
            sleep(poll_interval.min(deadline - now)).await;
        }
    }

    fn confirm_running(&mut self, stream: TcpStream) -> Result<TcpStream, StartupError> {
        match self.child.try_wait()? {
            Some(status) => {
                tracing::warn!(%status, "Viewer exited although its port accepted a connection");
                Err(StartupError::Exited(status))
            }
            None => Ok(stream),
        }
    }

    /// Exit status if the process already exited.
    ///
    /// # Errors
    /// Returns error if the status cannot be queried.
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    /// Returns error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Kill the process group and reap it.
    ///
    /// # Errors
    /// Returns error if the group cannot be signalled.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.child.kill().await
    }
}

impl std::fmt::Debug for ViewerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerProcess")
            .field("pid", &self.child.id())
            .field("kill_on_drop", &self.kill_on_drop)
            .finish()
    }
}

impl Drop for ViewerProcess {
    fn drop(&mut self) {
        if !self.kill_on_drop {
            return;
        }
        if let Ok(None) = self.child.try_wait() {
            tracing::debug!(pid = ?self.child.id(), "Killing viewer process");
            if let Err(e) = self.child.start_kill() {
                tracing::warn!("Failed to kill viewer process: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_appends_server_flag() {
        let cmd = LaunchCommand::build("bodyview-viewer", ["--port", "9000"]).unwrap();
        assert_eq!(cmd.program, "bodyview-viewer");
        assert_eq!(cmd.args, ["--port", "9000", "--server"]);
    }

    #[test]
    fn test_build_keeps_single_server_flag() {
        let cmd = LaunchCommand::build("viewer --server", Vec::<String>::new()).unwrap();
        assert_eq!(cmd.args, ["--server"]);

        let cmd = LaunchCommand::build("viewer", ["--server", "--fullscreen"]).unwrap();
        assert_eq!(cmd.args, ["--server", "--fullscreen"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_build_splits_quoted_base() {
        let cmd = LaunchCommand::build("python3 '/opt/my viewer/run.py'", ["scene.npz"]).unwrap();
        assert_eq!(cmd.program, "python3");
        assert_eq!(cmd.args, ["/opt/my viewer/run.py", "scene.npz", "--server"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_build_rejects_bad_base() {
        assert!(matches!(
            LaunchCommand::build("", Vec::<String>::new()),
            Err(SpawnError::EmptyCommand)
        ));
        assert!(matches!(
            LaunchCommand::build("viewer 'unterminated", Vec::<String>::new()),
            Err(SpawnError::InvalidCommand(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_missing_program() {
        let cmd = LaunchCommand::build("bodyview-no-such-viewer-binary", Vec::<String>::new())
            .unwrap();
        assert!(matches!(
            cmd.resolve().await,
            Err(SpawnError::ExecutableNotFound(name)) if name == "bodyview-no-such-viewer-binary"
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_before_listening() {
        let cmd = LaunchCommand {
            program: "true".to_string(),
            args: vec![],
        };
        let mut process = ViewerProcess::spawn(&cmd).await.unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = process
            .wait_until_listening(&addr, Duration::from_secs(10), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, StartupError::Exited(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_startup_timeout() {
        let cmd = LaunchCommand {
            program: "sleep".to_string(),
            args: vec!["30".to_string()],
        };
        let mut process = ViewerProcess::spawn(&cmd).await.unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = process
            .wait_until_listening(&addr, Duration::from_millis(300), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, StartupError::Timeout(_)));
        process.kill().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_startup_timeout_bounds_slow_polling() {
        let cmd = LaunchCommand {
            program: "sleep".to_string(),
            args: vec!["30".to_string()],
        };
        let mut process = ViewerProcess::spawn(&cmd).await.unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let started = Instant::now();
        let err = process
            .wait_until_listening(&addr, Duration::from_millis(200), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, StartupError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
        process.kill().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_foreign_listener_does_not_hide_exit() {
        let cmd = LaunchCommand {
            program: "true".to_string(),
            args: vec![],
        };
        let mut process = ViewerProcess::spawn(&cmd).await.unwrap();
        sleep(Duration::from_millis(300)).await;

        // Another program already owns the port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let err = process
            .wait_until_listening(&addr, Duration::from_secs(5), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, StartupError::Exited(_)));
    }
}
