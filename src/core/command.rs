//! Portable invocation of external measurement tools.
//!
//! All subprocesses (iperf3, librespeed-cli, mtr) go through
//! [`ManagedCommand`], which starts the child in its own process group so
//! that cancellation can terminate the whole tree: a SIGKILL to the group on
//! POSIX, `taskkill /T /F` with a plain-kill fallback on Windows. Tools are
//! discovered on `PATH` once at startup; absence degrades the owning feature
//! instead of failing the process.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

/// Locate an executable on `PATH`. Absolute paths are checked directly.
pub fn find_tool(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.is_absolute() {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let full = dir.join(name);
        if is_executable(&full) {
            return Some(full);
        }
        #[cfg(windows)]
        {
            let exe = dir.join(format!("{name}.exe"));
            if is_executable(&exe) {
                return Some(exe);
            }
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Command builder whose children live in their own process group.
#[derive(Debug, Clone)]
pub struct ManagedCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl ManagedCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Spawn with piped stdout/stderr for streaming consumption.
    pub fn spawn(&self) -> Result<ManagedChild> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            // New process group so a cancel can reap the whole tree.
            unsafe {
                command.pre_exec(|| {
                    if libc::setpgid(0, 0) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Unavailable(self.program.display().to_string())
            } else {
                Error::Internal(format!("spawn {}: {e}", self.program.display()))
            }
        })?;

        Ok(ManagedChild { child })
    }

    /// Run to completion within `budget`, returning captured output. On
    /// timeout the whole group is killed and `Error::Timeout` is returned.
    pub async fn output(&self, budget: Duration) -> Result<std::process::Output> {
        let mut child = self.spawn()?;
        match tokio::time::timeout(budget, child.child.wait_with_output_take()).await {
            Ok(output) => output,
            Err(_) => {
                child.kill_group().await;
                Err(Error::Timeout(budget))
            }
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

/// A running child in its own process group.
#[derive(Debug)]
pub struct ManagedChild {
    child: Child,
}

impl ManagedChild {
    pub fn take_stdout(&mut self) -> Option<tokio::process::ChildStdout> {
        self.child.stdout.take()
    }

    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        self.child
            .wait()
            .await
            .map_err(|e| Error::Internal(format!("wait child: {e}")))
    }

    /// Terminate the child's entire process group.
    pub async fn kill_group(&mut self) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                // Negative pid addresses the group the child leads.
                unsafe {
                    libc::killpg(pid as i32, libc::SIGKILL);
                }
            }
        }

        #[cfg(windows)]
        {
            if let Some(pid) = self.child.id() {
                let result = Command::new("taskkill")
                    .args(["/T", "/F", "/PID", &pid.to_string()])
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await;
                if result.is_err() {
                    let _ = self.child.start_kill();
                }
            }
        }

        let _ = self.child.kill().await;
    }
}

/// Internal extension: `wait_with_output` by value needs ownership, but the
/// timeout path still needs the child for the group kill, so capture the
/// pipes manually.
trait WaitWithOutputTake {
    async fn wait_with_output_take(&mut self) -> Result<std::process::Output>;
}

impl WaitWithOutputTake for Child {
    async fn wait_with_output_take(&mut self) -> Result<std::process::Output> {
        use tokio::io::AsyncReadExt;

        let mut stdout_pipe = self.stdout.take();
        let mut stderr_pipe = self.stderr.take();

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let read_stdout = async {
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut stdout).await;
            }
        };
        let read_stderr = async {
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut stderr).await;
            }
        };

        let (status, _, _) = tokio::join!(self.wait(), read_stdout, read_stderr);
        let status = status.map_err(|e| Error::Internal(format!("wait child: {e}")))?;

        Ok(std::process::Output {
            status,
            stdout,
            stderr,
        })
    }
}
