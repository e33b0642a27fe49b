//! Stdio transport type and `Transport` implementation

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{CoreError, Result};
use crate::transport::Transport;
use crate::types::mcp::McpStdioServerConfig;

use super::config::DEFAULT_MAX_BUFFER_SIZE;

/// Subprocess transport for one stdio MCP server
pub struct StdioTransport {
    pub(super) name: String,
    pub(super) config: McpStdioServerConfig,
    pub(super) program: PathBuf,
    pub(super) cwd: Option<PathBuf>,
    pub(super) process: Option<Child>,
    pub(super) stdin: Option<ChildStdin>,
    pub(super) stdout: Option<ChildStdout>,
    pub(super) ready: Arc<AtomicBool>,
    pub(super) max_buffer_size: usize,
    pub(super) reader_task: Option<JoinHandle<()>>,
    pub(super) stderr_task: Option<JoinHandle<()>>,
}

impl StdioTransport {
    /// Create a transport for the server `name`
    ///
    /// # Errors
    /// Returns `CoreError::Connection` if the command cannot be found
    pub fn new(name: impl Into<String>, config: McpStdioServerConfig) -> Result<Self> {
        let program = Self::find_program(&config.command)?;

        Ok(Self {
            name: name.into(),
            config,
            program,
            cwd: None,
            process: None,
            stdin: None,
            stdout: None,
            ready: Arc::new(AtomicBool::new(false)),
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            reader_task: None,
            stderr_task: None,
        })
    }

    /// Run the server in `cwd` instead of the current directory
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Override the maximum accepted line length
    #[must_use]
    pub fn with_max_buffer_size(mut self, bytes: usize) -> Self {
        self.max_buffer_size = bytes;
        self
    }

    /// Server name this transport was created for
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve a server command through `PATH`
    ///
    /// # Errors
    /// Returns `CoreError::Connection` if the command cannot be found
    pub fn find_program(command: &str) -> Result<PathBuf> {
        if let Ok(path) = which::which(command) {
            return Ok(path);
        }

        let path = Path::new(command);
        if path.components().count() > 1 && path.is_file() {
            return Ok(path.to_path_buf());
        }

        Err(CoreError::connection(format!("MCP server command not found: {command}")))
    }
}

impl Transport for StdioTransport {
    async fn connect(&mut self) -> Result<()> {
        self.connect_impl().await
    }

    async fn write(&mut self, data: &str) -> Result<()> {
        if !self.is_ready() {
            return Err(CoreError::transport("Transport is not ready for writing"));
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| CoreError::transport("stdin not available"))?;

        stdin
            .write_all(data.as_bytes())
            .await
            .map_err(|e| CoreError::transport(format!("Failed to write to stdin: {e}")))?;
        if !data.ends_with('\n') {
            stdin
                .write_all(b"\n")
                .await
                .map_err(|e| CoreError::transport(format!("Failed to write to stdin: {e}")))?;
        }

        stdin
            .flush()
            .await
            .map_err(|e| CoreError::transport(format!("Failed to flush stdin: {e}")))?;

        Ok(())
    }

    async fn end_input(&mut self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin
                .shutdown()
                .await
                .map_err(|e| CoreError::transport(format!("Failed to close stdin: {e}")))?;
        }
        Ok(())
    }

    fn read_messages(&mut self) -> mpsc::UnboundedReceiver<Result<serde_json::Value>> {
        self.read_messages_impl()
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn close(&mut self) -> Result<()> {
        self.close_impl().await
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.drop_impl();
    }
}
