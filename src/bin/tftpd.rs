//! TFTP server daemon
//!
//! Serves files from a sandboxed root directory over UDP. Runs until
//! interrupted; ctrl-C triggers an orderly shutdown that aborts any
//! in-flight transfers.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use tftp::{spawn_tftp_server, ServerMode, TftpServerConfig, TransferConfig};

const DEFAULT_BIND: &str = "0.0.0.0:6969"; // use 6969 for non-root testing; redirect or run as root for :69
const DEFAULT_ROOT: &str = "./tftp_root";

#[derive(FromArgs, Debug)]
#[argh(
    description = "TFTP server - serves files from a sandboxed root directory over UDP",
    example = "Read-only boot file server:\n  {command_name} --root /tftpboot --mode get-only",
    example = "Accept uploads into a separate directory:\n  {command_name} --root ./pub --write-root ./incoming"
)]
struct CliConfig {
    #[argh(
        option,
        short = 'b',
        description = "server bind address",
        default = "DEFAULT_BIND.to_string()"
    )]
    bind: String,

    #[argh(
        option,
        short = 'r',
        description = "root directory for read requests",
        default = "PathBuf::from(DEFAULT_ROOT)"
    )]
    root: PathBuf,

    #[argh(option, short = 'w', description = "root directory for write requests (defaults to the read root)")]
    write_root: Option<PathBuf>,

    #[argh(
        option,
        short = 'm',
        description = "server mode: get-only, put-only or get-and-put",
        default = "ServerMode::GetAndPut"
    )]
    mode: ServerMode,

    #[argh(option, description = "retransmissions per block before giving up", default = "3")]
    max_retries: u32,

    #[argh(option, description = "per-attempt timeout in seconds", default = "2")]
    timeout: u64,
}

impl CliConfig {
    fn into_server_config(self) -> TftpServerConfig {
        let write_root = self.write_root.unwrap_or_else(|| self.root.clone());

        TftpServerConfig {
            bind_address: self.bind,
            read_root: self.root,
            write_root,
            mode: self.mode,
            transfer: TransferConfig {
                max_retries: self.max_retries,
                timeout: Duration::from_secs(self.timeout),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli_config: CliConfig = argh::from_env();
    let server = spawn_tftp_server(cli_config.into_server_config())
        .await
        .context("failed to start TFTP server")?;

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    server.shutdown().await;

    Ok(())
}
