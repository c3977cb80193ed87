mod config;
mod errors;
mod interceptors;
mod logging;
mod services;
mod shutdown;

use clap::Parser;
use config::ServerConfig;
use interceptors::cert;
use joblib::JobCoordinator;
use protobuf::remote_jobs_server::RemoteJobsServer;
use services::jobservice::RemoteJobsService;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::info;

/// Serve the remote jobs API over mutual TLS
#[derive(Debug, Parser)]
struct Args {
    /// Path to the TOML config file
    #[clap(short, long, env = "JOBS_SERVER_CONFIG", default_value = "server.toml")]
    config: PathBuf,
    /// Log level, overrides the config file. RUST_LOG overrides both.
    #[clap(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = config::load_from_path(&args.config)?;
    logging::init_logging(args.log_level.as_deref().unwrap_or(&config.log_level));
    let shutdown = shutdown::install_shutdown_handler()?;
    serve(config, shutdown).await
}

async fn serve(
    config: ServerConfig,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let tls_config = config.tls_config()?;

    let coordinator = JobCoordinator::new();
    let job_service = RemoteJobsService::new(coordinator.clone(), shutdown.clone());
    let remote_jobs_server = RemoteJobsServer::with_interceptor(job_service, cert::extract_roles);
    info!(addr = %config.endpoint, "Listening");

    let served = Server::builder()
        .tls_config(tls_config)?
        .add_service(remote_jobs_server)
        .serve_with_shutdown(config.endpoint, shutdown.cancelled())
        .await;

    info!(jobs = coordinator.len(), "Server stopped, cleaning up jobs");
    coordinator.cleanup();
    served?;
    Ok(())
}
