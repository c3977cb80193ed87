use crate::broadcaster::OutputReceiver;
use crate::errors::{JobError, Result};
use crate::job::Job;
use crate::status::JobStatus;
use crate::types::{Args, Command, JobId, Program};

use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A `JobCoordinator` which provides functionality for managing jobs and querying job state.
///
/// Jobs live in a sharded concurrent map, so calls for unrelated jobs never wait on each other.
/// The struct is a handle: clones share the same set of jobs.
#[derive(Clone, Default)]
pub struct JobCoordinator {
    jobs: Arc<DashMap<JobId, Arc<Job>>>,
}

impl JobCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new job. Nothing is registered if the process can't be launched.
    pub fn start_job(&self, cmd: Program, args: Args) -> Result<JobId> {
        if cmd.is_empty() {
            return Err(JobError::InvalidArgument(
                "command name is required".to_string(),
            ));
        }
        let job = Job::start(Command::new(cmd, args))?;
        let job_id = job.id();
        self.jobs.insert(job_id, Arc::new(job));
        info!(%job_id, "job started");
        Ok(job_id)
    }

    /// Stop a job. Stopping a job that already ended is not an error.
    pub fn stop_job(&self, job_id: JobId) -> Result<()> {
        self.get(job_id)?.stop();
        info!(%job_id, "job stopped");
        Ok(())
    }

    pub fn get_job_status(&self, job_id: JobId) -> Result<JobStatus> {
        Ok(self.get(job_id)?.status())
    }

    /// Tail a job's combined output from its first byte.
    pub fn stream_output(&self, job_id: JobId, cancel: CancellationToken) -> Result<OutputReceiver> {
        Ok(self.get(job_id)?.subscribe(cancel))
    }

    /// Remove every job, killing processes that are still running and deleting their output.
    pub fn cleanup(&self) {
        let job_ids: Vec<JobId> = self.jobs.iter().map(|entry| *entry.key()).collect();
        for job_id in job_ids {
            if let Some((_, job)) = self.jobs.remove(&job_id) {
                match job.cleanup() {
                    Ok(()) => info!(%job_id, "job cleaned up"),
                    Err(err) => warn!(%job_id, error = %err, "failed to clean up job"),
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn get(&self, job_id: JobId) -> Result<Arc<Job>> {
        self.jobs
            .get(&job_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(JobError::NotFound)
    }
}
