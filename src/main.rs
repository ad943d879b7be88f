use anyhow::Result;
use clap::Parser;
use igmpd::daemon::{self, MemberOptions, RouterOptions};
use igmpd::logging::Logger;
use igmpd::{Args, Command, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Member {
            config,
            control_socket_path,
            bind_address,
            log_level,
        } => {
            let config = match config {
                Some(path) => Config::load_from_file(&path)?,
                None => Config::default(),
            };
            let logger = Logger::stderr(log_level);
            let options =
                MemberOptions::from_config(&config, control_socket_path, bind_address, logger);
            if let Err(e) = daemon::run_member(options).await {
                eprintln!("[igmpd] member endpoint failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Command::Router {
            config,
            control_socket_path,
            address,
            log_level,
        } => {
            let config = match config {
                Some(path) => Config::load_from_file(&path)?,
                None => Config::default(),
            };
            let logger = Logger::stderr(log_level);
            let options =
                RouterOptions::from_config(&config, control_socket_path, address, logger)?;
            if let Err(e) = daemon::run_router(options).await {
                eprintln!("[igmpd] router endpoint failed: {:#}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
