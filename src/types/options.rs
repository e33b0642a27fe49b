//! Component options and configuration
//!
//! Options are plain structs with builders; loading them from files or the
//! environment is the embedding application's job.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::shell::BlockFunc;

/// Maximum number of concurrently tracked background jobs
pub const MAX_BACKGROUND_JOBS: usize = 50;

/// Maximum size of each background job output stream (1MB)
pub const MAX_OUTPUT_BUFFER_SIZE: usize = 1024 * 1024;

/// How long completed jobs are kept before the cleanup sweep removes them
pub const COMPLETED_JOB_RETENTION: Duration = Duration::from_secs(30 * 60);

/// Deadline applied when a command is executed without an explicit timeout
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(999 * 60 * 60);

// ============================================================================
// Shell Options
// ============================================================================

/// Options for the persistent shell and for background job shells
#[derive(Clone, Default)]
pub struct ShellOptions {
    /// Initial working directory (defaults to the process cwd)
    pub working_dir: Option<PathBuf>,
    /// Initial environment (defaults to the process environment)
    pub env: Option<HashMap<String, String>>,
    /// Interpreter binary (defaults to `bash`, then `sh`)
    pub shell_path: Option<PathBuf>,
    /// Command deny rules
    pub block_funcs: Vec<BlockFunc>,
    /// Deadline for commands run without an explicit timeout
    pub default_timeout: Option<Duration>,
}

impl ShellOptions {
    /// Create a new builder for `ShellOptions`
    #[must_use]
    pub fn builder() -> ShellOptionsBuilder {
        ShellOptionsBuilder::default()
    }

    /// Effective deadline for commands run without an explicit timeout
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        self.default_timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl std::fmt::Debug for ShellOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellOptions")
            .field("working_dir", &self.working_dir)
            .field("env", &self.env.as_ref().map(|e| format!("[{} vars]", e.len())))
            .field("shell_path", &self.shell_path)
            .field("block_funcs", &format!("[{} rules]", self.block_funcs.len()))
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

/// Builder for `ShellOptions`
#[derive(Debug, Default)]
pub struct ShellOptionsBuilder {
    options: ShellOptions,
}

impl ShellOptionsBuilder {
    /// Set working directory
    #[must_use]
    pub fn working_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.working_dir = Some(path.into());
        self
    }

    /// Replace the initial environment
    #[must_use]
    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.options.env = Some(env);
        self
    }

    /// Set the interpreter binary
    #[must_use]
    pub fn shell_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.shell_path = Some(path.into());
        self
    }

    /// Add a block function
    #[must_use]
    pub fn block_func(mut self, func: BlockFunc) -> Self {
        self.options.block_funcs.push(func);
        self
    }

    /// Set the deadline for commands run without an explicit timeout
    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.options.default_timeout = Some(timeout);
        self
    }

    /// Build the options
    #[must_use]
    pub fn build(self) -> ShellOptions {
        self.options
    }
}

// ============================================================================
// Background Job Manager Options
// ============================================================================

/// Limits for the background job manager
#[derive(Debug, Clone)]
pub struct JobManagerOptions {
    /// Maximum tracked jobs (running or completed but not yet swept)
    pub max_jobs: usize,
    /// Capacity of each stdout/stderr buffer in bytes
    pub buffer_capacity: usize,
    /// Retention window for completed jobs
    pub retention: Duration,
    /// Shell settings shared by every job
    pub shell: ShellOptions,
}

impl Default for JobManagerOptions {
    fn default() -> Self {
        Self {
            max_jobs: MAX_BACKGROUND_JOBS,
            buffer_capacity: MAX_OUTPUT_BUFFER_SIZE,
            retention: COMPLETED_JOB_RETENTION,
            shell: ShellOptions::default(),
        }
    }
}

impl JobManagerOptions {
    /// Create a new builder for `JobManagerOptions`
    #[must_use]
    pub fn builder() -> JobManagerOptionsBuilder {
        JobManagerOptionsBuilder::default()
    }
}

/// Builder for `JobManagerOptions`
#[derive(Debug, Default)]
pub struct JobManagerOptionsBuilder {
    options: JobManagerOptions,
}

impl JobManagerOptionsBuilder {
    /// Set the job cap
    ///
    /// # Panics
    /// Panics if `max_jobs` is zero
    #[must_use]
    pub fn max_jobs(mut self, max_jobs: usize) -> Self {
        assert!(max_jobs > 0, "max_jobs must be at least 1");
        self.options.max_jobs = max_jobs;
        self
    }

    /// Set the per-stream buffer capacity
    #[must_use]
    pub fn buffer_capacity(mut self, bytes: usize) -> Self {
        self.options.buffer_capacity = bytes;
        self
    }

    /// Set the completed job retention window
    #[must_use]
    pub fn retention(mut self, retention: Duration) -> Self {
        self.options.retention = retention;
        self
    }

    /// Set shell options for jobs
    #[must_use]
    pub fn shell(mut self, shell: ShellOptions) -> Self {
        self.options.shell = shell;
        self
    }

    /// Build the options
    #[must_use]
    pub fn build(self) -> JobManagerOptions {
        self.options
    }
}
