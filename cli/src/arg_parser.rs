use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// Connect to a remote jobs gRPC server
#[derive(Debug, Parser)]
pub struct ArgParser {
    /// The address of the server
    #[clap(short = 's', long = "server", env = "JOBS_SERVER", default_value = "127.0.0.1:5001")]
    pub server: String,
    /// Domain name the server certificate is checked against
    #[clap(long, default_value = "localhost")]
    pub domain: String,
    /// CA certificate used to verify the server (PEM)
    #[clap(long, env = "JOBS_CA")]
    pub ca: PathBuf,
    /// Client certificate (PEM). Its role extension decides what you may do.
    #[clap(long, env = "JOBS_CERT")]
    pub cert: PathBuf,
    /// Client private key (PEM)
    #[clap(long, env = "JOBS_KEY")]
    pub key: PathBuf,
    /// The sub-command to use
    #[clap(subcommand)]
    pub sub_command: SubCommand,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Subcommand)]
pub enum SubCommand {
    /// start a new job
    Start {
        #[clap(long)]
        /// name of the command to run
        command: String,

        #[clap(long, multiple_values = true, allow_hyphen_values = true)]
        /// a list of args to the command
        args: Vec<String>,
    },
    /// stop a job
    Stop {
        /// Uuid v4 string
        job_id: Uuid,
    },
    /// get a job's status
    Status {
        /// Uuid v4 string
        job_id: Uuid,
    },
    /// stream a job's combined stdout and stderr
    Output {
        /// Uuid v4 string
        job_id: Uuid,
    },
}
