mod arg_parser;
mod client_cli;

use arg_parser::{ArgParser, SubCommand};
use client_cli::{ClientCli, Connection};

use clap::Parser;
use std::error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn error::Error>> {
    let args = ArgParser::parse();
    let mut client = ClientCli::connect(Connection {
        server: &args.server,
        domain: &args.domain,
        ca: &args.ca,
        cert: &args.cert,
        key: &args.key,
    })
    .await?;

    match args.sub_command {
        SubCommand::Start { command, args } => {
            client.start_job(&command, &args).await?;
        }
        SubCommand::Stop { job_id } => {
            client.stop_job(job_id).await?;
        }
        SubCommand::Status { job_id } => {
            client.query_status(job_id).await?;
        }
        SubCommand::Output { job_id } => {
            client.stream_output(job_id).await?;
        }
    }

    Ok(())
}
