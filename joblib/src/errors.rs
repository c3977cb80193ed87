use crate::types::JobId;
use std::{io, result};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("No such job exists")]
    NotFound,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Failed to launch job {job_id}: {source}")]
    Launch {
        job_id: JobId,
        #[source]
        source: io::Error,
    },
    #[error("Job output io error: {0}")]
    Io(#[from] io::Error),
    #[error("Output stream cancelled")]
    Cancelled,
}

pub type Result<T> = result::Result<T, JobError>;
