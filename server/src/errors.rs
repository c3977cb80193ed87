use joblib::errors::JobError;
use thiserror::Error;
use tonic::Status;
use tracing::error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Permission denied")]
    Unauthorized,
    #[error("{0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Job(#[from] JobError),
}

impl From<ServiceError> for Status {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unauthorized => Status::permission_denied("Permission denied"),
            ServiceError::InvalidArgument(msg) => Status::invalid_argument(msg),
            ServiceError::Job(JobError::NotFound) => Status::not_found("Job not found"),
            ServiceError::Job(JobError::InvalidArgument(msg)) => Status::invalid_argument(msg),
            // the id of a job that never launched is useless to the caller, so it stays in our logs
            ServiceError::Job(JobError::Launch { source, .. }) => {
                Status::failed_precondition(format!("Failed to launch command: {}", source))
            }
            ServiceError::Job(JobError::Io(err)) => {
                error!(error = %err, "job output io error");
                Status::internal("Internal error")
            }
            ServiceError::Job(JobError::Cancelled) => Status::cancelled("Output stream cancelled"),
        }
    }
}
