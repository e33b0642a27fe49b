//! Shell execution
//!
//! - [`PersistentShell`] - serialized, stateful command execution (`cd` and
//!   `export` persist between commands)
//! - [`BackgroundJobManager`] - long-running commands with bounded output
//! - [`BoundedBuffer`] - tail-retaining output buffer
//! - [`BlockFunc`] - deny rules checked against the parsed command
//!
//! ```rust,no_run
//! use kodegen_agent_core::shell::PersistentShell;
//! use kodegen_agent_core::types::ShellOptions;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> kodegen_agent_core::Result<()> {
//! let shell = PersistentShell::new(ShellOptions::default())?;
//! let cancel = CancellationToken::new();
//!
//! shell.execute("cd /tmp && export GREETING=hi", None, &cancel).await?;
//! let output = shell.execute("echo $GREETING from $PWD", None, &cancel).await?;
//! assert_eq!(output.stdout, "hi from /tmp\n");
//! # Ok(())
//! # }
//! ```

mod background;
mod block;
mod buffer;
mod job;
pub mod parser;
mod persistent;
mod process;

pub use background::BackgroundJobManager;
pub use block::{BlockFunc, argument_blocker, command_blocker};
pub use buffer::BoundedBuffer;
pub use job::{BackgroundJob, JobEvent, JobOutput};
pub use persistent::{CommandOutput, CommandRecord, PersistentShell, ShellState};
