//! Background job manager
//!
//! Tracks up to a fixed number of jobs. Each job runs in its own `sh -c`
//! process, independent of the persistent shell, with stdout and stderr
//! captured into bounded buffers. Completed jobs are kept for a retention
//! window so their output can still be read, then swept.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, Result};
use crate::pubsub::{Broker, EventType};
use crate::types::identifiers::JobId;
use crate::types::options::JobManagerOptions;

use super::block::find_blocked;
use super::job::{BackgroundJob, JobEvent, JobOutput, run_job};
use super::parser;
use super::process;

/// Job IDs are unique for the lifetime of the process, across managers
static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

struct ManagerInner {
    jobs: RwLock<HashMap<JobId, Arc<BackgroundJob>>>,
    /// Slots held by starts that are still spawning; only changed under the `jobs` write lock
    reserved: AtomicUsize,
    options: JobManagerOptions,
    job_shell: PathBuf,
    events: Broker<JobEvent>,
}

impl ManagerInner {
    fn cleanup(&self) -> usize {
        let Ok(retention) = chrono::Duration::from_std(self.options.retention) else {
            return 0;
        };
        let cutoff = Utc::now() - retention;

        let removed: Vec<Arc<BackgroundJob>> = {
            let mut jobs = self.jobs.write();
            let expired: Vec<JobId> = jobs
                .iter()
                .filter(|(_, job)| job.completed_at().is_some_and(|at| at < cutoff))
                .map(|(id, _)| id.clone())
                .collect();
            expired.iter().filter_map(|id| jobs.remove(id)).collect()
        };

        for job in &removed {
            log::debug!("[{}] Swept completed background job", job.id());
            self.events.publish(EventType::Deleted, job.event());
        }
        removed.len()
    }
}

/// Manager for concurrently running background shell jobs
pub struct BackgroundJobManager {
    inner: Arc<ManagerInner>,
    cleanup_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for BackgroundJobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundJobManager")
            .field("jobs", &self.inner.jobs.read().len())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl BackgroundJobManager {
    /// Create a manager
    ///
    /// # Errors
    /// Returns error if no `sh` can be found for jobs.
    pub fn new(options: JobManagerOptions) -> Result<Self> {
        let job_shell = match options.shell.shell_path.clone() {
            Some(path) => path,
            None => which::which("sh")
                .map_err(|e| CoreError::invalid_config(format!("sh not found in PATH: {e}")))?,
        };

        Ok(Self {
            inner: Arc::new(ManagerInner {
                jobs: RwLock::new(HashMap::new()),
                reserved: AtomicUsize::new(0),
                options,
                job_shell,
                events: Broker::new(),
            }),
            cleanup_handle: parking_lot::Mutex::new(None),
        })
    }

    /// Broker receiving [`JobEvent`]s
    #[must_use]
    pub fn events(&self) -> &Broker<JobEvent> {
        &self.inner.events
    }

    /// Start `command` in the background
    ///
    /// The job's token is a child of `cancel`, so cancelling the caller
    /// stops the job too. `working_dir` defaults to the configured shell
    /// directory, then to the process cwd. Must be called from within a
    /// tokio runtime.
    ///
    /// # Errors
    /// - `CoreError::ResourceExhausted` if the job cap is reached
    /// - `CoreError::Parse` / `CoreError::CommandBlocked` for rejected commands
    /// - `CoreError::Io` if the process could not be spawned
    pub fn start(
        &self,
        cancel: &CancellationToken,
        working_dir: Option<&Path>,
        command: &str,
        description: &str,
    ) -> Result<Arc<BackgroundJob>> {
        let parsed = parser::parse(command)?;
        if let Some(blocked) = find_blocked(&self.inner.options.shell.block_funcs, &parsed) {
            log::warn!("Blocked background command: {blocked}");
            return Err(CoreError::CommandBlocked(blocked));
        }

        let working_dir = match working_dir.or(self.inner.options.shell.working_dir.as_deref()) {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir()?,
        };

        {
            let jobs = self.inner.jobs.write();
            let limit = self.inner.options.max_jobs;
            if jobs.len() + self.inner.reserved.load(Ordering::Relaxed) >= limit {
                return Err(CoreError::ResourceExhausted { limit });
            }
            self.inner.reserved.fetch_add(1, Ordering::Relaxed);
        }

        let mut cmd = process::group_command(&self.inner.job_shell, &working_dir);
        if let Some(env) = &self.inner.options.shell.env {
            cmd.env_clear().envs(env);
        }
        cmd.arg("-c").arg(command);
        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let _jobs = self.inner.jobs.write();
                self.inner.reserved.fetch_sub(1, Ordering::Relaxed);
                return Err(e.into());
            }
        };

        let id = JobId::from_sequence(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed));
        let (job, done) = BackgroundJob::new(
            id,
            command,
            description,
            &working_dir,
            self.inner.options.buffer_capacity,
            cancel.child_token(),
        );
        {
            let mut jobs = self.inner.jobs.write();
            self.inner.reserved.fetch_sub(1, Ordering::Relaxed);
            jobs.insert(job.id().clone(), Arc::clone(&job));
        }

        log::info!("[{}] Started background job: {command}", job.id());
        self.inner.events.publish(EventType::Created, job.event());
        tokio::spawn(run_job(
            Arc::clone(&job),
            child,
            done,
            self.inner.events.clone(),
        ));

        Ok(job)
    }

    /// Look up a job
    #[must_use]
    pub fn get(&self, id: &JobId) -> Option<Arc<BackgroundJob>> {
        self.inner.jobs.read().get(id).cloned()
    }

    /// All tracked jobs, ordered by ID
    #[must_use]
    pub fn list(&self) -> Vec<Arc<BackgroundJob>> {
        let mut jobs: Vec<_> = self.inner.jobs.read().values().cloned().collect();
        jobs.sort_by(|a, b| a.id().cmp(b.id()));
        jobs
    }

    /// Number of tracked jobs
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.inner.jobs.read().len()
    }

    /// Output snapshot of a job
    ///
    /// # Errors
    /// Returns `CoreError::JobNotFound` for unknown IDs.
    pub fn get_output(&self, id: &JobId) -> Result<JobOutput> {
        self.get(id)
            .map(|job| job.output())
            .ok_or_else(|| CoreError::JobNotFound(id.to_string()))
    }

    /// Terminate a job, wait for it to exit and stop tracking it
    ///
    /// # Errors
    /// Returns `CoreError::JobNotFound` for unknown IDs.
    pub async fn kill(&self, id: &JobId) -> Result<()> {
        let job = self
            .get(id)
            .ok_or_else(|| CoreError::JobNotFound(id.to_string()))?;

        job.cancel();
        job.wait().await;

        if self.inner.jobs.write().remove(id).is_some() {
            self.inner.events.publish(EventType::Deleted, job.event());
        }
        log::info!("[{id}] Killed background job");
        Ok(())
    }

    /// Stop tracking a job without terminating it
    ///
    /// Returns the job so the caller can keep observing it.
    ///
    /// # Errors
    /// Returns `CoreError::JobNotFound` for unknown IDs.
    pub fn remove(&self, id: &JobId) -> Result<Arc<BackgroundJob>> {
        let job = self
            .inner
            .jobs
            .write()
            .remove(id)
            .ok_or_else(|| CoreError::JobNotFound(id.to_string()))?;
        self.inner.events.publish(EventType::Deleted, job.event());
        Ok(job)
    }

    /// Remove jobs that completed longer ago than the retention window
    ///
    /// Returns the number of jobs removed.
    pub fn cleanup(&self) -> usize {
        self.inner.cleanup()
    }

    /// Run [`cleanup`](Self::cleanup) every `interval` until the manager is dropped
    ///
    /// Calling it again replaces the previous task.
    pub fn spawn_cleanup_task(&self, interval: Duration) {
        let inner = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let removed = inner.cleanup();
                if removed > 0 {
                    log::debug!("Cleanup removed {removed} background jobs");
                }
            }
        });

        if let Some(previous) = self.cleanup_handle.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Terminate every job and wait until all have exited
    ///
    /// The registry is emptied first, so jobs started concurrently are not
    /// affected.
    pub async fn kill_all(&self) {
        let detached = std::mem::take(&mut *self.inner.jobs.write());
        if detached.is_empty() {
            return;
        }
        log::info!("Killing {} background jobs", detached.len());

        for job in detached.values() {
            job.cancel();
        }
        futures::future::join_all(detached.values().map(|job| job.wait())).await;

        for job in detached.values() {
            self.inner.events.publish(EventType::Deleted, job.event());
        }
    }
}

impl Drop for BackgroundJobManager {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_handle.get_mut().take() {
            handle.abort();
        }
    }
}
