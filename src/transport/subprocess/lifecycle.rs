//! Lifecycle management for the stdio transport (connect, close)

use std::collections::HashMap;
use std::env;
use std::process::Stdio;
use std::sync::atomic::Ordering;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::error::{CoreError, Result};

use super::config::{DANGEROUS_ENV_VARS, GRACEFUL_EXIT_TIMEOUT};
use super::transport::StdioTransport;

impl StdioTransport {
    /// Spawn the server process and set up stdio pipes
    ///
    /// # Errors
    /// Returns error if process spawning fails or stdio handles cannot be obtained
    pub(super) async fn connect_impl(&mut self) -> Result<()> {
        if self.process.is_some() {
            return Ok(());
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.config.args);

        let mut process_env = env::vars().collect::<HashMap<_, _>>();
        for (key, value) in &self.config.env {
            if DANGEROUS_ENV_VARS.contains(&key.as_str()) {
                log::warn!("[{}] Ignoring environment variable {key}", self.name);
                continue;
            }
            process_env.insert(key.clone(), value.clone());
        }

        if let Some(ref cwd) = self.cwd {
            process_env.insert("PWD".to_string(), cwd.to_string_lossy().to_string());
            cmd.current_dir(cwd);
        }

        cmd.env_clear().envs(process_env);

        // Stderr is piped rather than inherited so the server cannot touch
        // the parent terminal.
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if let Some(ref cwd) = self.cwd
                && !cwd.exists()
            {
                return CoreError::connection(format!(
                    "Working directory does not exist: {}",
                    cwd.display()
                ));
            }
            CoreError::connection(format!(
                "Failed to start MCP server '{}': {e}",
                self.name
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CoreError::connection("Failed to get stdin handle"))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CoreError::connection("Failed to get stdout handle"))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CoreError::connection("Failed to get stderr handle"))?;

        // Consume stderr so the server never blocks on a full pipe
        let name = self.name.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log::debug!("[{name}] stderr: {line}");
            }
        });

        self.stdin = Some(stdin);
        self.stdout = Some(stdout);
        self.process = Some(child);
        self.stderr_task = Some(stderr_task);
        self.ready.store(true, Ordering::SeqCst);

        log::debug!("[{}] Spawned {}", self.name, self.program.display());
        Ok(())
    }

    /// Close the transport and clean up resources
    ///
    /// # Errors
    /// Returns error if waiting on the process fails
    pub(super) async fn close_impl(&mut self) -> Result<()> {
        self.ready.store(false, Ordering::SeqCst);

        // Closing stdin is the MCP shutdown signal for stdio servers
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }

        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        self.stdout = None;

        if let Some(mut child) = self.process.take() {
            match tokio::time::timeout(GRACEFUL_EXIT_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => {
                    log::debug!("[{}] Server exited: {status}", self.name);
                }
                Ok(Err(e)) => {
                    return Err(CoreError::Io(e));
                }
                Err(_) => {
                    log::warn!("[{}] Server did not exit, killing it", self.name);
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                }
            }
        }

        Ok(())
    }

    /// Handle Drop cleanup
    pub(super) fn drop_impl(&mut self) {
        drop(self.stdin.take());

        if let Some(task) = self.reader_task.take() {
            task.abort();
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        if let Some(mut child) = self.process.take() {
            let _ = child.start_kill();
        }
    }
}
