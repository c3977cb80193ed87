use protobuf::{
    remote_jobs_client::RemoteJobsClient, JobStatusCode, OutputRequest, OutputResponse,
    StartRequest, StatusRequest, StatusResponse, StopRequest,
};
use std::error::Error;
use std::io::{self, Write};
use std::path::Path;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity};
use tonic::Status;
use uuid::Uuid;

pub struct ClientCli {
    inner: RemoteJobsClient<Channel>,
}

/// Where to connect and who to connect as.
pub struct Connection<'a> {
    pub server: &'a str,
    pub domain: &'a str,
    pub ca: &'a Path,
    pub cert: &'a Path,
    pub key: &'a Path,
}

impl ClientCli {
    pub async fn connect(conn: Connection<'_>) -> Result<Self, Box<dyn Error>> {
        let ca_cert = tokio::fs::read(conn.ca).await?;
        let client_cert = tokio::fs::read(conn.cert).await?;
        let client_key = tokio::fs::read(conn.key).await?;
        let tls = ClientTlsConfig::new()
            .domain_name(conn.domain)
            .ca_certificate(Certificate::from_pem(ca_cert))
            .identity(Identity::from_pem(client_cert, client_key));

        let channel = Channel::from_shared(format!("https://{}", conn.server))?
            .tls_config(tls)?
            .connect()
            .await?;
        Ok(Self {
            inner: RemoteJobsClient::new(channel),
        })
    }

    pub async fn start_job(&mut self, cmd: &str, args: &[String]) -> Result<(), Status> {
        let request = tonic::Request::new(StartRequest {
            cmd: cmd.into(),
            args: args.into(),
        });
        let response = self.inner.start_job(request).await?;
        let job_id = response.into_inner().job_id;
        let uuid = Uuid::from_slice(&job_id)
            .map_err(|_| Status::internal("server responded with invalid job id"))?;
        println!("Started job id: {}", uuid);
        Ok(())
    }

    pub async fn stop_job(&mut self, job_id: Uuid) -> Result<(), Status> {
        let request = tonic::Request::new(StopRequest {
            job_id: job_id.as_bytes().to_vec(),
        });
        self.inner.stop_job(request).await?;
        println!("Stopped job id: {}", job_id);
        Ok(())
    }

    pub async fn query_status(&mut self, job_id: Uuid) -> Result<(), Status> {
        let request = tonic::Request::new(StatusRequest {
            job_id: job_id.as_bytes().to_vec(),
        });
        let status = self.inner.query_status(request).await?.into_inner();
        println!("{}", describe(&status));
        Ok(())
    }

    /// Write the job's output to stdout as it arrives, until the server ends the stream.
    pub async fn stream_output(&mut self, job_id: Uuid) -> Result<(), Status> {
        let request = tonic::Request::new(OutputRequest {
            job_id: job_id.as_bytes().to_vec(),
        });
        let mut stream = self.inner.stream_output(request).await?.into_inner();
        let mut stdout = io::stdout();
        while let Some(OutputResponse { data }) = stream.message().await? {
            stdout
                .write_all(&data)
                .and_then(|()| stdout.flush())
                .map_err(|err| Status::internal(format!("failed to write output: {}", err)))?;
        }
        Ok(())
    }
}

fn describe(status: &StatusResponse) -> String {
    let command = std::iter::once(status.cmd.as_str())
        .chain(status.args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");
    let state = match status.status() {
        JobStatusCode::Started => "Started".to_string(),
        JobStatusCode::Running => "Running".to_string(),
        JobStatusCode::Exited if status.signal != 0 => {
            format!("Exited, killed by signal: {}", status.signal)
        }
        JobStatusCode::Exited => format!("Exited with code: {}", status.exit_code),
        JobStatusCode::Stopped if status.signal != 0 => {
            format!("Stopped, killed by signal: {}", status.signal)
        }
        JobStatusCode::Stopped => "Stopped".to_string(),
        JobStatusCode::Error => format!("Failed to start: {}", status.error),
    };
    format!("{} ({})", state, command)
}
