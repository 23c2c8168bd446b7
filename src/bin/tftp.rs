//! Command-line TFTP client
//!
//! `tftp get <remote> <local>` downloads a file, `tftp put <local>
//! <remote>` uploads one.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use argh::FromArgs;
use tftp::{TftpClient, TransferConfig, TransferMode};

#[derive(FromArgs, Debug)]
#[argh(
    description = "TFTP client",
    example = "Download a file:\n  {command_name} --server 10.0.1.50:69 get boot.img ./boot.img",
    example = "Upload a file:\n  {command_name} --server 10.0.1.50:69 put ./config.txt config.txt"
)]
struct CliConfig {
    #[argh(option, short = 's', description = "server address (host:port)")]
    server: String,

    #[argh(
        option,
        short = 'm',
        description = "transfer mode: octet or netascii",
        default = "TransferMode::Octet"
    )]
    mode: TransferMode,

    #[argh(option, description = "retransmissions per block before giving up", default = "3")]
    max_retries: u32,

    #[argh(option, description = "per-attempt timeout in seconds", default = "2")]
    timeout: u64,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
enum Command {
    Get(GetCommand),
    Put(PutCommand),
}

/// Download a remote file.
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "get")]
struct GetCommand {
    #[argh(positional, description = "remote filename")]
    remote: String,

    #[argh(positional, description = "local destination path")]
    local: PathBuf,
}

/// Upload a local file.
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "put")]
struct PutCommand {
    #[argh(positional, description = "local source path")]
    local: PathBuf,

    #[argh(positional, description = "remote filename")]
    remote: String,
}

async fn resolve_server(address: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(address)
        .await
        .with_context(|| format!("cannot resolve server address '{}'", address))?
        .next()
        .ok_or_else(|| anyhow!("server address '{}' resolved to nothing", address))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli_config: CliConfig = argh::from_env();
    let server = resolve_server(&cli_config.server).await?;

    let client = TftpClient::new(TransferConfig {
        max_retries: cli_config.max_retries,
        timeout: Duration::from_secs(cli_config.timeout),
    });

    match cli_config.command {
        Command::Get(get) => client
            .receive_file(&get.remote, cli_config.mode, &get.local, server)
            .await
            .with_context(|| format!("failed to download '{}'", get.remote))?,
        Command::Put(put) => client
            .send_file(&put.local, &put.remote, cli_config.mode, server)
            .await
            .with_context(|| format!("failed to upload '{}'", put.local.display()))?,
    }

    Ok(())
}
