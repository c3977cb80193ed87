pub mod authz;

use crate::errors::ServiceError;
use crate::interceptors::cert::RolesExtension;
use futures::Stream;
use joblib::types::JobId;
use joblib::{JobCoordinator, JobStatus, StatusCode};
use protobuf::remote_jobs_server::RemoteJobs;
use protobuf::{
    JobStatusCode, OutputRequest, OutputResponse, StartRequest, StartResponse, StatusRequest,
    StatusResponse, StopRequest, StopResponse,
};
use std::pin::Pin;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};
use uuid::Uuid;

pub struct RemoteJobsService {
    coordinator: JobCoordinator,
    /// Parent of every output stream's cancellation token.
    shutdown: CancellationToken,
}

impl RemoteJobsService {
    pub fn new(coordinator: JobCoordinator, shutdown: CancellationToken) -> Self {
        Self {
            coordinator,
            shutdown,
        }
    }

    /// Check the caller's roles against `method`.
    ///
    /// Runs before any argument is looked at so a denied caller can't learn whether a job exists.
    fn authorize<T>(&self, req: &Request<T>, method: &str) -> Result<(), ServiceError> {
        let allowed = req
            .extensions()
            .get::<RolesExtension>()
            .map(|ext| authz::is_authorized(method, &ext.roles))
            .unwrap_or(false);
        if allowed {
            Ok(())
        } else {
            debug!(method, "permission denied");
            Err(ServiceError::Unauthorized)
        }
    }
}

fn parse_job_id(job_id: &[u8]) -> Result<JobId, ServiceError> {
    if job_id.len() != 16 {
        return Err(ServiceError::InvalidArgument(format!(
            "job id must be 16 bytes, got {}",
            job_id.len()
        )));
    }
    Uuid::from_slice(job_id).map_err(|err| ServiceError::InvalidArgument(err.to_string()))
}

fn status_response(status: JobStatus) -> StatusResponse {
    let code = match status.code {
        StatusCode::Started => JobStatusCode::Started,
        StatusCode::Running => JobStatusCode::Running,
        StatusCode::Exited => JobStatusCode::Exited,
        StatusCode::Stopped => JobStatusCode::Stopped,
        StatusCode::Error => JobStatusCode::Error,
    };
    StatusResponse {
        status: code as i32,
        exit_code: status.exit_code,
        exited: status.exited,
        cmd: status.command.program,
        args: status.command.args,
        signal: status.signal.unwrap_or(0),
        error: status.error.unwrap_or_default(),
    }
}

#[tonic::async_trait]
impl RemoteJobs for RemoteJobsService {
    type StreamOutputStream = Pin<Box<dyn Stream<Item = Result<OutputResponse, Status>> + Send>>;

    async fn start_job(
        &self,
        req: Request<StartRequest>,
    ) -> Result<Response<StartResponse>, Status> {
        self.authorize(&req, authz::START_JOB)?;

        let StartRequest { cmd, args } = req.into_inner();
        let job_id = self.coordinator.start_job(cmd, args).map_err(|err| {
            warn!(error = %err, "failed to start job");
            ServiceError::from(err)
        })?;
        Ok(Response::new(StartResponse {
            job_id: job_id.as_bytes().to_vec(),
        }))
    }

    async fn stop_job(&self, req: Request<StopRequest>) -> Result<Response<StopResponse>, Status> {
        self.authorize(&req, authz::STOP_JOB)?;

        let job_id = parse_job_id(&req.get_ref().job_id)?;
        self.coordinator
            .stop_job(job_id)
            .map_err(ServiceError::from)?;
        Ok(Response::new(StopResponse {})) // empty response on success
    }

    async fn query_status(
        &self,
        req: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        self.authorize(&req, authz::QUERY_STATUS)?;

        let job_id = parse_job_id(&req.get_ref().job_id)?;
        let job_status = self
            .coordinator
            .get_job_status(job_id)
            .map_err(ServiceError::from)?;
        Ok(Response::new(status_response(job_status)))
    }

    async fn stream_output(
        &self,
        req: Request<OutputRequest>,
    ) -> Result<Response<Self::StreamOutputStream>, Status> {
        self.authorize(&req, authz::STREAM_OUTPUT)?;

        let job_id = parse_job_id(&req.get_ref().job_id)?;
        // the subscriber also ends on its own once tonic drops the response stream
        let receiver = self
            .coordinator
            .stream_output(job_id, self.shutdown.child_token())
            .map_err(ServiceError::from)?;

        let response_stream = ReceiverStream::new(receiver).map(|blob| {
            blob.map(|data| OutputResponse {
                data: data.to_vec(),
            })
            .map_err(|err| Status::from(ServiceError::from(err)))
        });
        Ok(Response::new(
            Box::pin(response_stream) as Self::StreamOutputStream
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request_as<T>(message: T, roles: &[&str]) -> Request<T> {
        let mut req = Request::new(message);
        req.extensions_mut().insert(RolesExtension {
            roles: roles.iter().map(|role| role.to_string()).collect(),
        });
        req
    }

    fn service() -> RemoteJobsService {
        RemoteJobsService::new(JobCoordinator::new(), CancellationToken::new())
    }

    async fn start(service: &RemoteJobsService, cmd: &str, args: &[&str]) -> Vec<u8> {
        let req = request_as(
            StartRequest {
                cmd: cmd.into(),
                args: args.iter().map(|arg| arg.to_string()).collect(),
            },
            &["full"],
        );
        service
            .start_job(req)
            .await
            .expect("start failed")
            .into_inner()
            .job_id
    }

    #[test]
    fn job_id_must_be_16_bytes() {
        assert!(matches!(
            parse_job_id(&[0; 15]),
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            parse_job_id(&[]),
            Err(ServiceError::InvalidArgument(_))
        ));
        let job_id = Uuid::new_v4();
        assert_eq!(parse_job_id(job_id.as_bytes()).unwrap(), job_id);
    }

    #[tokio::test]
    async fn start_returns_a_usable_id() {
        let service = service();
        let job_id = start(&service, "sleep", &["1"]).await;
        assert_eq!(job_id.len(), 16);
        assert_ne!(job_id, vec![0; 16]);

        let status = service
            .query_status(request_as(StatusRequest { job_id }, &["read"]))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(status.status(), JobStatusCode::Running);
        assert!(!status.exited);
        assert_eq!(status.cmd, "sleep");
        assert_eq!(status.args, vec!["1".to_string()]);
        service.coordinator.cleanup();
    }

    #[tokio::test]
    async fn denial_hides_whether_the_job_exists() {
        let service = service();
        for job_id in [vec![1, 2, 3], Uuid::new_v4().as_bytes().to_vec()] {
            let err = service
                .query_status(request_as(StatusRequest { job_id }, &[]))
                .await
                .unwrap_err();
            assert_eq!(err.code(), tonic::Code::PermissionDenied);
        }
    }

    #[tokio::test]
    async fn missing_roles_extension_is_denied() {
        let service = service();
        let err = service
            .stop_job(Request::new(StopRequest {
                job_id: Uuid::new_v4().as_bytes().to_vec(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::PermissionDenied);
    }

    #[tokio::test]
    async fn read_role_cannot_start_or_stop() {
        let service = service();
        let err = service
            .start_job(request_as(
                StartRequest {
                    cmd: "true".into(),
                    args: vec![],
                },
                &["read"],
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::PermissionDenied);
        assert!(service.coordinator.is_empty());

        let err = service
            .stop_job(request_as(
                StopRequest {
                    job_id: Uuid::new_v4().as_bytes().to_vec(),
                },
                &["read"],
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::PermissionDenied);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let service = service();
        let job_id = Uuid::new_v4().as_bytes().to_vec();
        let err = service
            .stop_job(request_as(
                StopRequest {
                    job_id: job_id.clone(),
                },
                &["full"],
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);

        let err = service
            .query_status(request_as(
                StatusRequest {
                    job_id: job_id.clone(),
                },
                &["full"],
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);

        let err = service
            .stream_output(request_as(OutputRequest { job_id }, &["read"]))
            .await
            .err()
            .expect("stream for unknown job");
        assert_eq!(err.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn bad_commands_are_rejected() {
        let service = service();
        let err = service
            .start_job(request_as(
                StartRequest {
                    cmd: String::new(),
                    args: vec![],
                },
                &["full"],
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);

        let err = service
            .start_job(request_as(
                StartRequest {
                    cmd: "doesnotexist".into(),
                    args: vec![],
                },
                &["full"],
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::FailedPrecondition);
        assert!(service.coordinator.is_empty());
    }

    #[tokio::test]
    async fn stopped_job_reports_stopped() {
        let service = service();
        let job_id = start(&service, "sleep", &["5"]).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        service
            .stop_job(request_as(
                StopRequest {
                    job_id: job_id.clone(),
                },
                &["full"],
            ))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let status = service
            .query_status(request_as(StatusRequest { job_id }, &["full"]))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(status.status(), JobStatusCode::Stopped);
        assert!(!status.exited);
        assert_eq!(status.signal, 9);
        service.coordinator.cleanup();
    }

    #[tokio::test]
    async fn shutdown_cancels_output_streams() {
        let shutdown = CancellationToken::new();
        let service = RemoteJobsService::new(JobCoordinator::new(), shutdown.clone());
        let job_id = start(&service, "echo", &["-n", "hi"]).await;
        let mut stream = service
            .stream_output(request_as(OutputRequest { job_id }, &["read"]))
            .await
            .unwrap()
            .into_inner();

        let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("no output")
            .expect("stream ended")
            .expect("stream error");
        assert_eq!(first.data, b"hi");

        shutdown.cancel();
        let end = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("stream did not end")
            .expect("stream ended without a status");
        assert_eq!(end.unwrap_err().code(), tonic::Code::Cancelled);
        service.coordinator.cleanup();
    }
}
