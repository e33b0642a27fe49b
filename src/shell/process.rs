//! Child process plumbing shared by the persistent shell and background jobs
//!
//! Every command runs as the leader of its own process group so that
//! cancellation reaches pipelines and subshells, not just the top process.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::{CoreError, Result};

/// Time between SIGTERM and SIGKILL when stopping a process group
pub(crate) const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// How long to keep reading pipes after the process itself has exited
pub(crate) const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Resolve the interpreter: explicit path, else `bash`, else `sh`
pub(crate) fn resolve_shell(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    which::which("bash")
        .or_else(|_| which::which("sh"))
        .map_err(|e| CoreError::invalid_config(format!("no usable shell found in PATH: {e}")))
}

/// Build a command running in a fresh process group with piped output
pub(crate) fn group_command(program: &Path, working_dir: &Path) -> Command {
    let mut cmd = Command::new(program);
    cmd.current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

/// Copy everything from `reader` into `sink` on a background task
pub(crate) fn pump<R, F>(reader: Option<R>, mut sink: F) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    F: FnMut(&[u8]) + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut reader) = reader else {
            return;
        };
        let mut buffer = vec![0u8; 8192];
        loop {
            match reader.read(&mut buffer).await {
                Ok(0) => break,
                Ok(n) => sink(&buffer[..n]),
                Err(e) => {
                    log::debug!("Output pipe closed with error: {e}");
                    break;
                }
            }
        }
    })
}

/// Wait for pump tasks, abandoning them once `limit` has elapsed
///
/// Descendants that escaped the process group can hold a pipe open forever.
pub(crate) async fn drain(pumps: Vec<JoinHandle<()>>, limit: Duration) {
    let deadline = tokio::time::Instant::now() + limit;
    for mut handle in pumps {
        if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
            log::debug!("Abandoning output reader after {limit:?}");
            handle.abort();
        }
    }
}

/// Stop a process group: SIGTERM, then SIGKILL after `grace`
pub(crate) async fn terminate(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        signal_group(pid, libc::SIGTERM);
        let status = match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                signal_group(pid, libc::SIGKILL);
                child.wait().await
            }
        };
        // Stragglers that ignored SIGTERM still hold our pipes.
        signal_group(pid, libc::SIGKILL);
        return status;
    }

    if let Err(e) = child.start_kill() {
        log::debug!("start_kill failed: {e}");
    }
    child.wait().await
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: kill(2) with a negative pid only delivers a signal to that
    // process group and touches no memory owned by this process.
    let result = unsafe { libc::kill(-pgid, signal) };
    if result != 0 {
        log::trace!(
            "kill(-{pgid}, {signal}) failed: {}",
            io::Error::last_os_error()
        );
    }
}

/// Numeric exit code, using the `128 + signal` convention for signal deaths
pub(crate) fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
