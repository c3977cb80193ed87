use crate::types::Command;
use arc_swap::ArcSwap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// The process image is being created.
    Started,
    Running,
    /// The process terminated on its own.
    Exited,
    /// The process was terminated by a stop request.
    Stopped,
    /// The process could not be launched.
    Error,
}

impl StatusCode {
    /// Terminal codes never change once published.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exited | Self::Stopped | Self::Error)
    }
}

/// A point-in-time snapshot of a job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobStatus {
    pub code: StatusCode,
    /// -1 until the process exits normally.
    pub exit_code: i32,
    /// true only if the process exited on its own, false if it was killed by a signal.
    pub exited: bool,
    pub signal: Option<i32>,
    pub error: Option<String>,
    pub command: Command,
}

impl JobStatus {
    pub fn started(command: Command) -> Self {
        Self {
            code: StatusCode::Started,
            exit_code: -1,
            exited: false,
            signal: None,
            error: None,
            command,
        }
    }
}

/// Publishes immutable `JobStatus` snapshots.
///
/// Readers do a single atomic load. Writers copy the current snapshot, modify the copy and
/// install it with compare-and-swap, retrying if another writer got there first.
pub(crate) struct StatusCell {
    current: ArcSwap<JobStatus>,
}

impl StatusCell {
    pub fn new(status: JobStatus) -> Self {
        Self {
            current: ArcSwap::from_pointee(status),
        }
    }

    pub fn load(&self) -> JobStatus {
        JobStatus::clone(&self.current.load())
    }

    /// Apply `change` to a copy of the current snapshot and publish it.
    ///
    /// `change` may run more than once under contention. A terminal code is kept even if
    /// `change` tries to overwrite it.
    pub fn update<F>(&self, change: F)
    where
        F: Fn(&mut JobStatus),
    {
        loop {
            let current = self.current.load_full();
            let mut next = JobStatus::clone(&current);
            change(&mut next);
            if current.code.is_terminal() {
                next.code = current.code;
            }
            let previous = self.current.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&*previous, &current) {
                return;
            }
        }
    }
}
