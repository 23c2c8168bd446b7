//! TFTP client
//!
//! Each operation binds a fresh ephemeral socket, issues the request to the
//! server's well-known port and then conducts the whole lock-step exchange
//! with the session-specific endpoint the server replies from. The call
//! resolves only once the session has completed or failed.

use std::net::SocketAddr;
use std::path::Path;

use tokio::fs::File;
use tracing::info;

use crate::packet::TransferMode;
use crate::transfer::{ephemeral_socket, Direction, Transfer, TransferConfig, TransferError};

/// TFTP client for whole-file uploads and downloads.
#[derive(Debug, Clone)]
pub struct TftpClient {
    config: TransferConfig,
}

impl TftpClient {
    pub fn new(config: TransferConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(TransferConfig::default())
    }

    /// Upload the file at `local` to the server as `remote`.
    pub async fn send_file(
        &self,
        local: impl AsRef<Path>,
        remote: &str,
        mode: TransferMode,
        server: SocketAddr,
    ) -> Result<(), TransferError> {
        let data = tokio::fs::read(local.as_ref()).await?;
        let socket = ephemeral_socket(server).await?;

        let mut transfer = Transfer::client(socket, server, Direction::Send, self.config);
        transfer.open_write(remote, mode).await?;
        transfer.send_data(&data).await?;

        info!("sent '{}' to {} ({} bytes)", remote, server, data.len());
        Ok(())
    }

    /// Download `remote` from the server into the file at `local`.
    ///
    /// The local file is created before the transfer starts; a failed
    /// transfer leaves it empty or partially written.
    pub async fn receive_file(
        &self,
        remote: &str,
        mode: TransferMode,
        local: impl AsRef<Path>,
        server: SocketAddr,
    ) -> Result<(), TransferError> {
        let socket = ephemeral_socket(server).await?;
        let mut file = File::create(local.as_ref()).await?;

        let mut transfer = Transfer::client(socket, server, Direction::Receive, self.config);
        transfer.open_read(remote, mode).await?;
        transfer.receive_data(&mut file).await?;

        info!("received '{}' from {}", remote, server);
        Ok(())
    }
}
