//! A single background job and its run loop

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Child;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, Result};
use crate::pubsub::{Broker, EventType};
use crate::types::identifiers::JobId;

use super::buffer::BoundedBuffer;
use super::process::{self, OUTPUT_DRAIN_TIMEOUT, TERMINATE_GRACE};

/// Final outcome of a job, set exactly once
#[derive(Debug, Clone)]
struct Completion {
    exit_code: Option<i32>,
    error: Option<String>,
    completed_at: DateTime<Utc>,
}

/// Non-blocking snapshot of a job's output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutput {
    /// Captured stdout (with truncation notice when applicable)
    pub stdout: String,
    /// Captured stderr (with truncation notice when applicable)
    pub stderr: String,
    /// Whether the job has finished
    pub done: bool,
    /// Exit code once finished
    pub exit_code: Option<i32>,
    /// Failure description once finished, if it failed
    pub error: Option<String>,
}

/// Payload of job lifecycle events
///
/// Published as `Created` on start, `Updated` on completion and `Deleted`
/// when the job stops being tracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    /// Job ID
    pub id: JobId,
    /// Command text
    pub command: String,
    /// Whether the job has finished
    pub done: bool,
    /// Exit code once finished
    pub exit_code: Option<i32>,
}

/// A command running (or finished) in the background
#[derive(Debug)]
pub struct BackgroundJob {
    id: JobId,
    command: String,
    description: String,
    working_dir: PathBuf,
    started_at: DateTime<Utc>,
    stdout: BoundedBuffer,
    stderr: BoundedBuffer,
    cancel: CancellationToken,
    done_rx: watch::Receiver<bool>,
    completion: Mutex<Option<Completion>>,
}

/// Sender half of the done flag, owned by the run loop
pub(crate) struct DoneSignal(watch::Sender<bool>);

impl BackgroundJob {
    pub(crate) fn new(
        id: JobId,
        command: impl Into<String>,
        description: impl Into<String>,
        working_dir: &Path,
        buffer_capacity: usize,
        cancel: CancellationToken,
    ) -> (Arc<Self>, DoneSignal) {
        let (done_tx, done_rx) = watch::channel(false);
        let job = Arc::new(Self {
            id,
            command: command.into(),
            description: description.into(),
            working_dir: working_dir.to_path_buf(),
            started_at: Utc::now(),
            stdout: BoundedBuffer::new(buffer_capacity),
            stderr: BoundedBuffer::new(buffer_capacity),
            cancel,
            done_rx,
            completion: Mutex::new(None),
        });
        (job, DoneSignal(done_tx))
    }

    /// Job ID
    #[must_use]
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Command text
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Human-readable description supplied at start
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Directory the job runs in
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// When the job was started
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the job finished
    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completion.lock().as_ref().map(|c| c.completed_at)
    }

    /// Whether the job has finished
    #[must_use]
    pub fn is_done(&self) -> bool {
        *self.done_rx.borrow()
    }

    /// Stdout buffer
    #[must_use]
    pub fn stdout(&self) -> &BoundedBuffer {
        &self.stdout
    }

    /// Stderr buffer
    #[must_use]
    pub fn stderr(&self) -> &BoundedBuffer {
        &self.stderr
    }

    /// Snapshot of output and status without waiting
    #[must_use]
    pub fn output(&self) -> JobOutput {
        let completion = self.completion.lock().clone();
        JobOutput {
            stdout: self.stdout.read(),
            stderr: self.stderr.read(),
            done: completion.is_some(),
            exit_code: completion.as_ref().and_then(|c| c.exit_code),
            error: completion.and_then(|c| c.error),
        }
    }

    /// Ask the job to stop; returns immediately
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait until the job has finished
    ///
    /// Returns immediately if it already has.
    pub async fn wait(&self) {
        let mut rx = self.done_rx.clone();
        // Err means the run loop is gone, which only happens after completion.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Wait until the job has finished or `cancel` fires
    ///
    /// # Errors
    /// Returns `CoreError::Cancelled` if `cancel` fired first.
    pub async fn wait_until(&self, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            () = self.wait() => Ok(()),
            () = cancel.cancelled() => Err(CoreError::cancelled(format!(
                "stopped waiting for background job {}",
                self.id
            ))),
        }
    }

    /// Record the outcome, publish it, then release waiters
    fn complete(
        &self,
        done: DoneSignal,
        exit_code: Option<i32>,
        error: Option<String>,
        events: &Broker<JobEvent>,
    ) {
        {
            let mut completion = self.completion.lock();
            if completion.is_some() {
                return;
            }
            *completion = Some(Completion {
                exit_code,
                error,
                completed_at: Utc::now(),
            });
        }
        events.publish(EventType::Updated, self.event());
        done.0.send_replace(true);
    }

    pub(crate) fn event(&self) -> JobEvent {
        let output = self.completion.lock().clone();
        JobEvent {
            id: self.id.clone(),
            command: self.command.clone(),
            done: output.is_some(),
            exit_code: output.and_then(|c| c.exit_code),
        }
    }
}

/// Drive a spawned job to completion
///
/// Output is pumped into the job's buffers; cancellation of the job token
/// terminates the whole process group.
pub(crate) async fn run_job(
    job: Arc<BackgroundJob>,
    mut child: Child,
    done: DoneSignal,
    events: Broker<JobEvent>,
) {
    let pumps = vec![
        process::pump(child.stdout.take(), {
            let job = Arc::clone(&job);
            move |chunk: &[u8]| job.stdout.write(chunk)
        }),
        process::pump(child.stderr.take(), {
            let job = Arc::clone(&job);
            move |chunk: &[u8]| job.stderr.write(chunk)
        }),
    ];

    let exited = tokio::select! {
        status = child.wait() => Some(status),
        () = job.cancel.cancelled() => None,
    };
    let (status, killed) = match exited {
        Some(status) => (status, false),
        None => (process::terminate(&mut child, TERMINATE_GRACE).await, true),
    };
    process::drain(pumps, OUTPUT_DRAIN_TIMEOUT).await;

    let (exit_code, error) = match status {
        Ok(status) => {
            let code = process::exit_code(&status);
            let error = if killed {
                Some("job was killed".to_string())
            } else if code != 0 {
                Some(format!("exit status {code}"))
            } else {
                None
            };
            (Some(code), error)
        }
        Err(e) => {
            log::error!("[{}] Failed to wait for job: {e}", job.id);
            (None, Some(e.to_string()))
        }
    };

    log::info!(
        "[{}] Background job finished (exit {:?}, killed {killed})",
        job.id,
        exit_code
    );
    job.complete(done, exit_code, error, &events);
}
