use anyhow::Result;
use clap::Parser;
use igmpd::logging::Severity;
use igmpd::{ControlCommand, DEFAULT_CONTROL_SOCKET};
use std::net::Ipv4Addr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: CliCommand,

    /// Path to the control socket
    #[arg(long, default_value = DEFAULT_CONTROL_SOCKET)]
    socket_path: PathBuf,
}

#[derive(Parser, Debug)]
pub enum CliCommand {
    /// Join a multicast group
    Join {
        /// Multicast group address
        group: Ipv4Addr,
    },
    /// Leave a multicast group
    Leave {
        /// Multicast group address
        group: Ipv4Addr,
    },
    /// Show per-group membership state
    Status,
    /// Check that the daemon is responding
    Ping,
    /// Show the daemon's control protocol version
    Version,
    /// Change the daemon's minimum log level
    SetLogLevel {
        /// One of emergency..debug
        level: Severity,
    },
}

pub fn build_command(cli_command: CliCommand) -> ControlCommand {
    match cli_command {
        CliCommand::Join { group } => ControlCommand::Join { group },
        CliCommand::Leave { group } => ControlCommand::Leave { group },
        CliCommand::Status => ControlCommand::Status,
        CliCommand::Ping => ControlCommand::Ping,
        CliCommand::Version => ControlCommand::GetVersion,
        CliCommand::SetLogLevel { level } => ControlCommand::SetLogLevel { level },
    }
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> Result<()> {
    use igmpd::Response;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    let args = Args::parse();
    let command = build_command(args.command);

    let mut stream = UnixStream::connect(args.socket_path).await?;
    stream.write_all(&serde_json::to_vec(&command)?).await?;
    stream.shutdown().await?;

    let mut response_bytes = Vec::new();
    stream.read_to_end(&mut response_bytes).await?;

    let response: Response = serde_json::from_slice(&response_bytes)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    if matches!(response, Response::Error(_)) {
        std::process::exit(1);
    }

    Ok(())
}
