//! Persistent interactive shell session
//!
//! [`PersistentShell`] executes one command at a time. Each command runs in a
//! fresh interpreter that starts from the session's [`ShellState`], and the
//! interpreter's final directory and exported environment become the state
//! for the next command. That is how `cd` and `export` persist.

use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, Result};
use crate::pubsub::{Broker, EventType};
use crate::types::options::ShellOptions;

use super::block::{BlockFunc, find_blocked};
use super::parser;
use super::process::{self, OUTPUT_DRAIN_TIMEOUT, TERMINATE_GRACE};

/// Variables that describe the interpreter process rather than the session
const VOLATILE_VARS: &[&str] = &["SHLVL", "_"];

// ============================================================================
// State and results
// ============================================================================

/// Working directory and environment carried between commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellState {
    /// Current working directory
    pub working_dir: PathBuf,
    /// Exported environment
    pub env: HashMap<String, String>,
}

/// Captured result of one command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Exit code (`128 + n` when killed by signal `n`)
    pub exit_code: i32,
    /// Whether cancellation or a deadline ended the command
    pub interrupted: bool,
}

impl CommandOutput {
    /// Whether the command exited with status 0
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0 && !self.interrupted
    }
}

/// History entry published after every executed command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    /// Command text as submitted
    pub command: String,
    /// Directory the command started in
    pub working_dir: PathBuf,
    /// Exit code
    pub exit_code: i32,
    /// Whether the command was interrupted
    pub interrupted: bool,
    /// When the command finished
    pub finished_at: DateTime<Utc>,
}

enum Stop {
    Exited(io::Result<ExitStatus>),
    Deadline,
    Cancelled,
}

// ============================================================================
// Persistent shell
// ============================================================================

/// Serialized command executor with persistent directory and environment
///
/// Share it behind an `Arc`; concurrent callers queue in FIFO order.
pub struct PersistentShell {
    state: Mutex<ShellState>,
    shell_path: PathBuf,
    block_funcs: Vec<BlockFunc>,
    default_timeout: Duration,
    history: Broker<CommandRecord>,
}

impl std::fmt::Debug for PersistentShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentShell")
            .field("shell_path", &self.shell_path)
            .field("block_funcs", &self.block_funcs.len())
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl PersistentShell {
    /// Create a shell session
    ///
    /// # Errors
    /// Returns error if no interpreter can be found or the current directory
    /// is unreadable.
    pub fn new(options: ShellOptions) -> Result<Self> {
        let shell_path = process::resolve_shell(options.shell_path.as_deref())?;
        let working_dir = match options.working_dir.clone() {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        let env = options
            .env
            .clone()
            .unwrap_or_else(|| std::env::vars().collect());
        let default_timeout = options.command_timeout();

        log::debug!("Persistent shell using {} in {}", shell_path.display(), working_dir.display());

        Ok(Self {
            state: Mutex::new(ShellState { working_dir, env }),
            shell_path,
            block_funcs: options.block_funcs,
            default_timeout,
            history: Broker::new(),
        })
    }

    /// Broker receiving a [`CommandRecord`] after every command
    #[must_use]
    pub fn history(&self) -> &Broker<CommandRecord> {
        &self.history
    }

    /// Snapshot of the current state (waits for a running command)
    pub async fn state(&self) -> ShellState {
        self.state.lock().await.clone()
    }

    /// Current working directory (waits for a running command)
    pub async fn working_dir(&self) -> PathBuf {
        self.state.lock().await.working_dir.clone()
    }

    /// Execute `command` and capture its output
    ///
    /// `timeout` defaults to the configured command timeout. A non-zero exit
    /// is reported in [`CommandOutput::exit_code`], not as an error.
    ///
    /// # Errors
    /// - `CoreError::Parse` if the command is not valid bash
    /// - `CoreError::CommandBlocked` if a block function rejects it
    /// - `CoreError::Interrupted` carrying partial output if `cancel` fired or
    ///   the deadline passed
    /// - `CoreError::Io` if the interpreter could not be started
    pub async fn execute(
        &self,
        command: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        let mut state = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(CoreError::Interrupted {
                    output: CommandOutput { exit_code: 1, interrupted: true, ..Default::default() },
                });
            }
            guard = self.state.lock() => guard,
        };

        let parsed = parser::parse(command)?;
        if let Some(blocked) = find_blocked(&self.block_funcs, &parsed) {
            log::warn!("Blocked command: {blocked}");
            return Err(CoreError::CommandBlocked(blocked));
        }

        let started_in = state.working_dir.clone();
        let deadline = timeout.unwrap_or(self.default_timeout);
        let (output, captured) = self.run(&state, command, deadline, cancel).await?;

        if let Some(next) = captured {
            *state = next;
        }
        drop(state);

        log::info!(
            "Command finished: {command:?} (exit {}, interrupted {})",
            output.exit_code,
            output.interrupted
        );
        self.history.publish(
            EventType::Created,
            CommandRecord {
                command: command.to_string(),
                working_dir: started_in,
                exit_code: output.exit_code,
                interrupted: output.interrupted,
                finished_at: Utc::now(),
            },
        );

        if output.interrupted {
            Err(CoreError::Interrupted { output })
        } else {
            Ok(output)
        }
    }

    async fn run(
        &self,
        state: &ShellState,
        command: &str,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<(CommandOutput, Option<ShellState>)> {
        let state_file = tempfile::NamedTempFile::new()?;

        let mut cmd = process::group_command(&self.shell_path, &state.working_dir);
        cmd.env_clear()
            .envs(&state.env)
            .env("PWD", &state.working_dir)
            .arg("-c")
            .arg(wrap_script(command, state_file.path()));

        let mut child = cmd.spawn()?;

        let stdout = Arc::new(SyncMutex::new(Vec::new()));
        let stderr = Arc::new(SyncMutex::new(Vec::new()));
        let pumps = vec![
            process::pump(child.stdout.take(), {
                let sink = Arc::clone(&stdout);
                move |chunk: &[u8]| sink.lock().extend_from_slice(chunk)
            }),
            process::pump(child.stderr.take(), {
                let sink = Arc::clone(&stderr);
                move |chunk: &[u8]| sink.lock().extend_from_slice(chunk)
            }),
        ];

        let stop = tokio::select! {
            status = child.wait() => Stop::Exited(status),
            () = tokio::time::sleep(deadline) => Stop::Deadline,
            () = cancel.cancelled() => Stop::Cancelled,
        };

        let (status, interrupted) = match stop {
            Stop::Exited(status) => (status, false),
            Stop::Deadline => {
                log::debug!("Command exceeded its {deadline:?} deadline");
                (process::terminate(&mut child, TERMINATE_GRACE).await, true)
            }
            Stop::Cancelled => (process::terminate(&mut child, TERMINATE_GRACE).await, true),
        };
        process::drain(pumps, OUTPUT_DRAIN_TIMEOUT).await;

        let mut exit_code = match &status {
            Ok(status) => process::exit_code(status),
            Err(e) => {
                log::warn!("Failed to wait for shell: {e}");
                1
            }
        };
        if interrupted && exit_code == 0 {
            exit_code = 1;
        }

        let captured = match tokio::fs::read(state_file.path()).await {
            Ok(raw) => parse_state_dump(&raw),
            Err(e) => {
                log::debug!("No state captured: {e}");
                None
            }
        };

        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&stdout.lock()).into_owned(),
            stderr: String::from_utf8_lossy(&stderr.lock()).into_owned(),
            exit_code,
            interrupted,
        };
        Ok((output, captured))
    }
}

/// Wrap a command so the interpreter dumps its state on every exit path
fn wrap_script(command: &str, state_file: &Path) -> String {
    let path = shell_quote(&state_file.to_string_lossy());
    format!(
        "__kodegen_state={path}\n\
         trap 'printf \"%s\\0\" \"$PWD\" > \"$__kodegen_state\"; env -0 >> \"$__kodegen_state\"' EXIT\n\
         trap 'exit 143' TERM\n\
         {command}\n"
    )
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Parse `$PWD\0NAME=value\0...` as written by the exit trap
fn parse_state_dump(raw: &[u8]) -> Option<ShellState> {
    let text = String::from_utf8_lossy(raw);
    let mut fields = text.split('\0');
    let working_dir = fields.next().filter(|pwd| !pwd.is_empty())?;

    let env = fields
        .filter_map(|entry| entry.split_once('='))
        .filter(|(name, _)| !name.is_empty() && !VOLATILE_VARS.contains(name))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();

    Some(ShellState {
        working_dir: PathBuf::from(working_dir),
        env,
    })
}
